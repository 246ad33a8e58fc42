use std::sync::Once;

static INIT_LOGGING: Once = Once::new();

pub fn init() {
    use env_logger::{Builder, Env};

    INIT_LOGGING.call_once(|| {
        #[cfg(debug_assertions)]
        const DEFAULT_LOG_FILTER: &str = concat!(env!("CARGO_CRATE_NAME"), "=debug,layergen=debug");
        #[cfg(not(debug_assertions))]
        const DEFAULT_LOG_FILTER: &str = concat!(env!("CARGO_CRATE_NAME"), "=info,layergen=info");

        Builder::from_env(Env::default().default_filter_or(DEFAULT_LOG_FILTER)).init();
    });
}
