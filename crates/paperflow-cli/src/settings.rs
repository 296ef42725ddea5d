use std::path::PathBuf;

use paperflow_core::Config;
use paperflow_core::config_file::{
    self, ConcurrencyConfig, ConfigFile, SourceConfig, StorageConfig,
};

/// Flag values that override everything else.
#[derive(Debug, Default)]
pub struct Overrides {
    pub output_dir: Option<PathBuf>,
    pub workers: Option<usize>,
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// `PAPERFLOW_*` environment variables as a config overlay.
pub fn env_overlay() -> ConfigFile {
    let source = SourceConfig {
        base_url: std::env::var("PAPERFLOW_BASE_URL").ok(),
        request_delay_ms: env_parse("PAPERFLOW_REQUEST_DELAY_MS"),
        timeout_secs: env_parse("PAPERFLOW_TIMEOUT_SECS"),
        user_agent: std::env::var("PAPERFLOW_USER_AGENT").ok(),
    };
    let concurrency = ConcurrencyConfig {
        workers: env_parse("PAPERFLOW_WORKERS"),
        cpu_workers: env_parse("PAPERFLOW_CPU_WORKERS"),
    };
    let storage = StorageConfig {
        output_dir: std::env::var("PAPERFLOW_OUTPUT_DIR").ok(),
    };
    ConfigFile {
        source: Some(source),
        concurrency: Some(concurrency),
        storage: Some(storage),
        ..Default::default()
    }
}

/// Config file cascade overlaid with the environment.
pub fn layered_file() -> ConfigFile {
    config_file::merge(config_file::load_config(), env_overlay())
}

/// Resolve the runtime config: flags > environment > config files > defaults.
pub fn resolve(overrides: Overrides) -> Config {
    let mut config = Config::from_file(&layered_file());
    if let Some(dir) = overrides.output_dir {
        config.output_dir = Some(dir);
    }
    if let Some(n) = overrides.workers {
        config.num_workers = n.max(1);
    }
    tracing::debug!(?config, "resolved configuration");
    config
}
