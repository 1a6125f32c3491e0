use clap::Parser;

use frg::cli::{self, CliArgs};
use frg::logger;

fn main() -> std::process::ExitCode {
    // Session log first so argument errors and panics land in it too.
    logger::init();
    let args = CliArgs::parse();
    cli::run(args)
}
