pub mod ai;
pub mod compositor;
pub mod filters;
pub mod floating;
pub mod selection;
pub mod transform;
