use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use eyre::{Context, Result};

use crate::config::models::ServerConfig;

/// Prefix for structured environment overrides (`APIGATE_RATE_LIMIT__REQUESTS=50`).
pub const ENV_PREFIX: &str = "APIGATE";

/// Plain variables understood for compatibility with existing deployments.
const LEGACY_ENV_KEYS: [(&str, &str); 3] = [
    ("PORT", "port"),
    ("MASTER_API_KEY", "master_api_key"),
    ("STATUS_PAGE_API_KEY", "status_page_api_key"),
];

/// Load configuration from a file (optional), `APIGATE_*` variables and the
/// legacy `PORT` / `MASTER_API_KEY` / `STATUS_PAGE_API_KEY` variables, in
/// increasing order of precedence.
pub async fn load_config(config_path: &str) -> Result<ServerConfig> {
    load_config_sync(config_path)
}

/// Load configuration synchronously
pub fn load_config_sync(config_path: &str) -> Result<ServerConfig> {
    let overrides = LEGACY_ENV_KEYS
        .iter()
        .map(|(var, key)| (*key, std::env::var(var).ok().filter(|v| !v.is_empty())))
        .collect::<Vec<_>>();
    build_config(config_path, &overrides)
}

/// Build a configuration from a file plus explicit overrides, skipping the
/// legacy variable lookup.
pub fn build_config(config_path: &str, overrides: &[(&str, Option<String>)]) -> Result<ServerConfig> {
    let path = Path::new(config_path);

    // Determine file format based on extension
    let format = match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        Some("ini") => FileFormat::Ini,
        _ => FileFormat::Toml,
    };

    let path_str = path
        .to_str()
        .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", path.display()))?;

    let mut builder = Config::builder()
        .add_source(File::new(path_str, format).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    for (key, value) in overrides {
        builder = builder
            .set_override_option(*key, value.clone())
            .with_context(|| format!("Failed to apply override for '{key}'"))?;
    }

    let settings = builder
        .build()
        .with_context(|| format!("Failed to build config from {}", path.display()))?;

    settings
        .try_deserialize()
        .with_context(|| format!("Failed to deserialize config from {}", path.display()))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;
    use crate::config::models::ThroughputMode;

    #[test]
    fn test_load_toml_config() {
        let toml_content = r#"
listen_addr = "127.0.0.1:4000"
master_api_key = "master-from-file"

[rate_limit]
requests = 25
period = "1m"

[metrics]
throughput = "since_last_read"
"#;

        let mut temp_file = NamedTempFile::with_suffix(".toml").unwrap();
        write!(temp_file, "{}", toml_content).unwrap();

        let config = build_config(temp_file.path().to_str().unwrap(), &[]).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:4000");
        assert_eq!(config.master_api_key.as_deref(), Some("master-from-file"));
        assert_eq!(config.rate_limit.requests, 25);
        assert_eq!(config.rate_limit.status_code, 429);
        assert_eq!(config.metrics.throughput, ThroughputMode::SinceLastRead);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");

        let config = build_config(path.to_str().unwrap(), &[]).unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:3000");
        assert!(config.master_api_key.is_none());
    }

    #[test]
    fn test_overrides_win_over_file() {
        let mut temp_file = NamedTempFile::with_suffix(".json").unwrap();
        write!(
            temp_file,
            r#"{{"master_api_key": "from-file", "listen_addr": "127.0.0.1:3000"}}"#
        )
        .unwrap();

        let overrides = [
            ("master_api_key", Some("from-env".to_string())),
            ("port", Some("9090".to_string())),
            ("status_page_api_key", None),
        ];
        let config = build_config(temp_file.path().to_str().unwrap(), &overrides).unwrap();
        assert_eq!(config.master_api_key.as_deref(), Some("from-env"));
        assert_eq!(config.port, Some(9090));
        assert!(config.status_page_api_key.is_none());
    }
}
