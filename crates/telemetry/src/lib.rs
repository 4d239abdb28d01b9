use tracing_subscriber::{fmt, EnvFilter};

pub mod logging;
pub mod metrics;

pub use logging::{init_structured_logging, init_with_service, LogConfig, LogFormat, LogGuard};

/// Plain `fmt` subscriber honouring `RUST_LOG`; for tools and tests
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
