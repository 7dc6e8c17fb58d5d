use tracing::{debug, error, info, warn};

/// Thin wrapper over `tracing` so call sites read like log statements
/// without committing to a specific macro import set everywhere.
pub struct Logger;

impl Logger {
    pub fn init() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("soku_web=info")
            .with_target(false)
            .without_time()
            .try_init();
    }

    pub fn info(msg: &str) {
        info!("{msg}");
    }

    pub fn warn(msg: &str) {
        warn!("{msg}");
    }

    pub fn error(msg: &str) {
        error!("{msg}");
    }

    pub fn debug(msg: &str) {
        debug!("{msg}");
    }
}
