pub mod assemble;
pub mod config;
pub mod fixture;
pub mod frame;
pub mod lookup;
pub mod model;
pub mod normalize;
pub mod odds;
pub mod pipeline;
pub mod pivot;
pub mod schema;
pub mod train;
pub mod window;

/// Installs the fmt subscriber used by the binaries. `RUST_LOG` wins, `info` otherwise.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
