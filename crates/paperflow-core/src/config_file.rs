use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Config;

/// On-disk TOML configuration structure.
/// All fields are optional so partial configs work (merge with defaults).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub source: Option<SourceConfig>,
    pub retry: Option<RetryConfig>,
    pub concurrency: Option<ConcurrencyConfig>,
    pub segmentation: Option<SegmentationConfig>,
    pub storage: Option<StorageConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceConfig {
    pub base_url: Option<String>,
    pub request_delay_ms: Option<u64>,
    pub timeout_secs: Option<u64>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryConfig {
    pub initial_delay_ms: Option<u64>,
    pub multiplier: Option<f64>,
    pub max_retries: Option<u32>,
    pub max_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    pub workers: Option<usize>,
    pub cpu_workers: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SegmentationConfig {
    pub min_segments: Option<usize>,
    pub min_paragraph_chars: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    pub output_dir: Option<String>,
}

/// Platform config directory path: `<config_dir>/paperflow/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("paperflow").join("config.toml"))
}

/// Load config by cascading CWD `.paperflow.toml` over platform config.
/// CWD values override platform values.
pub fn load_config() -> ConfigFile {
    let platform = config_path().and_then(|p| load_from_path(&p));
    let cwd = load_from_path(Path::new(".paperflow.toml"));

    match (platform, cwd) {
        (None, None) => ConfigFile::default(),
        (Some(p), None) => p,
        (None, Some(c)) => c,
        (Some(p), Some(c)) => merge(p, c),
    }
}

/// Load a config from a specific path. Returns `None` if the file doesn't
/// exist or can't be parsed; a parse failure is logged.
pub fn load_from_path(path: &Path) -> Option<ConfigFile> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring malformed config file");
            None
        }
    }
}

/// First `Some` of `pick(overlay)` and `pick(base)`.
fn layered<S, T>(overlay: Option<&S>, base: Option<&S>, pick: impl Fn(&S) -> Option<T>) -> Option<T> {
    overlay.and_then(&pick).or_else(|| base.and_then(&pick))
}

/// Merge two configs: `overlay` values take precedence over `base`.
pub fn merge(base: ConfigFile, overlay: ConfigFile) -> ConfigFile {
    let (bs, os) = (base.source.as_ref(), overlay.source.as_ref());
    let (br, or) = (base.retry.as_ref(), overlay.retry.as_ref());
    let (bc, oc) = (base.concurrency.as_ref(), overlay.concurrency.as_ref());
    let (bg, og) = (base.segmentation.as_ref(), overlay.segmentation.as_ref());
    let (bt, ot) = (base.storage.as_ref(), overlay.storage.as_ref());

    ConfigFile {
        source: Some(SourceConfig {
            base_url: layered(os, bs, |s| s.base_url.clone()),
            request_delay_ms: layered(os, bs, |s| s.request_delay_ms),
            timeout_secs: layered(os, bs, |s| s.timeout_secs),
            user_agent: layered(os, bs, |s| s.user_agent.clone()),
        }),
        retry: Some(RetryConfig {
            initial_delay_ms: layered(or, br, |r| r.initial_delay_ms),
            multiplier: layered(or, br, |r| r.multiplier),
            max_retries: layered(or, br, |r| r.max_retries),
            max_delay_ms: layered(or, br, |r| r.max_delay_ms),
        }),
        concurrency: Some(ConcurrencyConfig {
            workers: layered(oc, bc, |c| c.workers),
            cpu_workers: layered(oc, bc, |c| c.cpu_workers),
        }),
        segmentation: Some(SegmentationConfig {
            min_segments: layered(og, bg, |g| g.min_segments),
            min_paragraph_chars: layered(og, bg, |g| g.min_paragraph_chars),
        }),
        storage: Some(StorageConfig {
            output_dir: layered(ot, bt, |t| t.output_dir.clone()),
        }),
    }
}

impl Config {
    /// Defaults overlaid with every value present in `file`.
    pub fn from_file(file: &ConfigFile) -> Self {
        let mut config = Config::default();

        if let Some(ref s) = file.source {
            if let Some(ref url) = s.base_url {
                config.base_url = url.clone();
            }
            if let Some(ms) = s.request_delay_ms {
                config.request_delay = Duration::from_millis(ms);
            }
            if let Some(secs) = s.timeout_secs {
                config.request_timeout = Duration::from_secs(secs);
            }
            if let Some(ref ua) = s.user_agent {
                config.user_agent = ua.clone();
            }
        }
        if let Some(ref r) = file.retry {
            if let Some(ms) = r.initial_delay_ms {
                config.retry.initial_delay = Duration::from_millis(ms);
            }
            if let Some(m) = r.multiplier {
                config.retry.multiplier = m;
            }
            if let Some(n) = r.max_retries {
                config.retry.max_retries = n;
            }
            if let Some(ms) = r.max_delay_ms {
                config.retry.max_delay = Some(Duration::from_millis(ms));
            }
        }
        if let Some(ref c) = file.concurrency {
            if let Some(n) = c.workers {
                config.num_workers = n.max(1);
            }
            if let Some(n) = c.cpu_workers {
                config.cpu_workers = n.max(1);
            }
        }
        if let Some(ref g) = file.segmentation {
            if let Some(n) = g.min_segments {
                config.min_segments = n;
            }
            if let Some(n) = g.min_paragraph_chars {
                config.min_paragraph_chars = n;
            }
        }
        if let Some(ref t) = file.storage
            && let Some(ref dir) = t.output_dir
        {
            config.output_dir = Some(PathBuf::from(dir));
        }

        config
    }
}

/// Save the config to the platform config directory.
pub fn save_config(config: &ConfigFile) -> Result<PathBuf, String> {
    let path = config_path().ok_or_else(|| "Could not determine config directory".to_string())?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let content =
        toml::to_string_pretty(config).map_err(|e| format!("Failed to serialize config: {}", e))?;
    std::fs::write(&path, content).map_err(|e| format!("Failed to write config: {}", e))?;
    Ok(path)
}
