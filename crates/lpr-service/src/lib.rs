pub mod api;
pub mod config;
pub mod inference;
pub mod pipeline;
pub mod recognize;
pub mod source;
pub mod state;
pub mod store;

pub use config::LprServiceConfig;
pub use state::{LprServiceState, StateOptions};
