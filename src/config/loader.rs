//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<GatewayConfig, ConfigError> {
    let config: GatewayConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use crate::fastcgi::Transport;

    const SAMPLE: &str = r#"
[listener]
bind_address = "127.0.0.1:8080"

[[vhosts]]
names = ["example.test", "www.example.test"]
root = "/srv/example"
index = ["index.php", "index.html"]

[vhosts.fastcgi]
network = "unix"
address = "/run/php/php-fpm.sock"

[default_vhost]
root = "/srv/default"

[timeouts]
connect_secs = 2
"#;

    #[test]
    fn parses_sample_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.listener.bind_address, "127.0.0.1:8080");
        assert_eq!(config.vhosts.len(), 1);

        let vhost = &config.vhosts[0];
        assert_eq!(vhost.index, vec!["index.php", "index.html"]);
        let fcgi = vhost.fastcgi.as_ref().unwrap();
        assert_eq!(fcgi.network, Transport::Unix);
        assert_eq!(fcgi.extensions, vec!["php"]);

        assert_eq!(config.default_vhost.index, vec!["index.html"]);
        assert!(config.default_vhost.fastcgi.is_none());
        assert_eq!(config.timeouts.connect_secs, 2);
        assert_eq!(config.timeouts.shutdown_grace_secs, 30);
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.listener.bind_address, "0.0.0.0:8080");
        assert!(config.vhosts.is_empty());
    }

    #[test]
    fn syntax_error_is_parse_error() {
        assert!(matches!(parse_config("[listener"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn semantic_error_is_validation_error() {
        let err = parse_config("[listener]\nmax_connections = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(ref v) if v.len() == 1));
        assert!(err.to_string().contains("max_connections"));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_config(Path::new("/nonexistent/gateway.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
