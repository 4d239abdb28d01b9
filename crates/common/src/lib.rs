pub mod detections;
pub mod plates;
pub mod sources;
pub mod validation;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
