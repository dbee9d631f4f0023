use anyhow::Result;
use tracing_subscriber::{EnvFilter, fmt};

/// `RUST_LOG` wins over the level implied by `--verbose`.
pub fn init(verbose: bool) -> Result<()> {
    let from_env = std::env::var("RUST_LOG").is_ok();
    if !verbose && !from_env {
        return Ok(());
    }
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("tms_bridge=debug,info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .try_init();
    Ok(())
}
