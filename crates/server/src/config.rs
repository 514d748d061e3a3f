use std::collections::HashMap;
use std::env;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::Path;

const DEFAULT_BIND: &str = "127.0.0.1:9100";
const DEFAULT_HTTP_BIND: &str = "127.0.0.1:9101";
const DEFAULT_OUTBOUND_BUFFER: usize = 128;

#[derive(Debug)]
pub enum ConfigError {
    Io,
    Parse,
    Missing,
    Invalid,
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io => write!(f, "configuration io failure"),
            Self::Parse => write!(f, "configuration parse failure"),
            Self::Missing => write!(f, "configuration key missing"),
            Self::Invalid => write!(f, "configuration value invalid"),
        }
    }
}

impl Error for ConfigError {}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreConfig {
    Memory,
    Postgres { dsn: String },
}

#[derive(Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub http_bind: String,
    pub store: StoreConfig,
    pub outbound_buffer: usize,
}

/// Loads server configuration from the filesystem with environment
/// overrides. A missing file is treated as an empty one so the server can
/// run from environment variables alone.
pub fn load_configuration(path: &Path) -> Result<ServerConfig, ConfigError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(_) => return Err(ConfigError::Io),
    };
    let mut section = String::new();
    let mut map = HashMap::new();
    for line in contents.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if trimmed.starts_with('[') && trimmed.ends_with(']') {
            section = trimmed
                .trim_start_matches('[')
                .trim_end_matches(']')
                .to_string();
            continue;
        }
        let parts: Vec<&str> = trimmed.splitn(2, '=').collect();
        if parts.len() != 2 {
            return Err(ConfigError::Parse);
        }
        let key = if section.is_empty() {
            parts[0].trim().to_string()
        } else {
            format!("{}.{}", section, parts[0].trim())
        };
        let mut value = parts[1].trim().to_string();
        if let Some(idx) = value.find('#') {
            value.truncate(idx);
            value = value.trim().to_string();
        }
        if value.starts_with('"') && value.ends_with('"') && value.len() >= 2 {
            value = value[1..value.len() - 1].to_string();
        }
        map.insert(key, value);
    }

    let bind = override_env("COURIER_BIND", map.remove("server.bind"))?
        .unwrap_or_else(|| DEFAULT_BIND.to_string());
    let http_bind = override_env("COURIER_HTTP_BIND", map.remove("server.http_bind"))?
        .unwrap_or_else(|| DEFAULT_HTTP_BIND.to_string());
    let mode = override_env("COURIER_STORE", map.remove("storage.mode"))?
        .unwrap_or_else(|| "memory".to_string());
    let postgres_dsn = override_env("COURIER_PG_DSN", map.remove("storage.postgres_dsn"))?;
    let store = match mode.as_str() {
        "memory" => StoreConfig::Memory,
        "postgres" => StoreConfig::Postgres {
            dsn: postgres_dsn.ok_or(ConfigError::Missing)?,
        },
        _ => return Err(ConfigError::Invalid),
    };
    let outbound_buffer =
        override_env("COURIER_OUTBOUND_BUFFER", map.remove("limits.outbound_buffer"))?
            .map(|value| value.parse::<usize>().map_err(|_| ConfigError::Invalid))
            .transpose()?
            .unwrap_or(DEFAULT_OUTBOUND_BUFFER);
    if outbound_buffer == 0 {
        return Err(ConfigError::Invalid);
    }

    Ok(ServerConfig {
        bind,
        http_bind,
        store,
        outbound_buffer,
    })
}

fn override_env(key: &str, current: Option<String>) -> Result<Option<String>, ConfigError> {
    match env::var(key) {
        Ok(value) => Ok(Some(value)),
        Err(env::VarError::NotPresent) => Ok(current),
        Err(_) => Err(ConfigError::Invalid),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    #[test]
    fn parse_configuration_minimal() {
        let mut path = PathBuf::from(env::temp_dir());
        path.push("courier_test_config.toml");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(
            b"[server]\nbind=\"127.0.0.1:9400\"\nhttp_bind=\"127.0.0.1:9401\"\n[storage]\nmode=\"postgres\"\npostgres_dsn=\"postgres://courier@localhost/courier\"\n[limits]\noutbound_buffer=\"64\"\n",
        )
        .unwrap();
        let config = load_configuration(&path).unwrap();
        assert_eq!(config.bind, "127.0.0.1:9400");
        assert_eq!(config.http_bind, "127.0.0.1:9401");
        assert_eq!(
            config.store,
            StoreConfig::Postgres {
                dsn: "postgres://courier@localhost/courier".to_string()
            }
        );
        assert_eq!(config.outbound_buffer, 64);
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config =
            load_configuration(Path::new("/definitely/not/here/courier.toml")).unwrap();
        assert_eq!(config.bind, DEFAULT_BIND);
        assert_eq!(config.store, StoreConfig::Memory);
        assert_eq!(config.outbound_buffer, DEFAULT_OUTBOUND_BUFFER);
    }

    #[test]
    fn postgres_mode_requires_dsn() {
        let mut path = PathBuf::from(env::temp_dir());
        path.push("courier_test_config_nodsn.toml");
        fs::write(&path, "[storage]\nmode=\"postgres\"\n").unwrap();
        let result = load_configuration(&path);
        assert!(matches!(result, Err(ConfigError::Missing)));
        fs::remove_file(path).unwrap();
    }
}
