use figment::{
    providers::{Data, Env, Format, Serialized, Toml},
    Figment,
};
use std::path::{Path, PathBuf};

use super::{types::Config, ConfigError};

/// Environment variable naming the config file.
pub const CONFIG_PATH_VAR: &str = "TURNSTILE_CONFIG";

/// Config file used when `TURNSTILE_CONFIG` is unset.
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Prefix for per-key overrides, e.g. `TURNSTILE_WORKERS__COUNT=8`.
///
/// Nested keys are separated by a double underscore because field names
/// themselves contain underscores (`busy_timeout_ms`).
const ENV_PREFIX: &str = "TURNSTILE_";
const ENV_SPLIT: &str = "__";

/// Path of the config file, from `TURNSTILE_CONFIG` or the default.
pub fn config_path_from_env() -> PathBuf {
    std::env::var_os(CONFIG_PATH_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Built-in defaults, then the TOML file, then `TURNSTILE_` overrides.
fn layered(file: Data<Toml>) -> Figment {
    Figment::from(Serialized::defaults(Config::default()))
        .merge(file)
        .merge(
            Env::prefixed(ENV_PREFIX)
                .ignore(&["CONFIG"])
                .split(ENV_SPLIT),
        )
}

fn extract(figment: Figment) -> Result<Config, ConfigError> {
    figment
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// Load configuration from file with environment variable overrides
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }
    extract(layered(Toml::file(path)))
}

/// Load configuration from a TOML string. Environment overrides are not
/// applied.
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    extract(Figment::from(Serialized::defaults(Config::default())).merge(Toml::string(toml_str)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChannelBackend;
    use figment::Jail;

    #[test]
    fn test_empty_string_gives_defaults() {
        let config = load_config_from_str("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.channel.backend, ChannelBackend::Sqlite);
        assert!(config.workers.enabled);
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = load_config_from_str(
            r#"
[workers]
count = 8

[workers.retry]
max_delay_ms = 1000
"#,
        )
        .unwrap();
        assert_eq!(config.workers.count, 8);
        assert_eq!(config.workers.retry.max_delay_ms, 1000);
        assert_eq!(config.workers.retry.initial_delay_ms, 100);
        assert_eq!(config.database.busy_timeout_ms, 5000);
    }

    #[test]
    fn test_wrong_type_is_parse_error() {
        let result = load_config_from_str("[server]\nport = \"eighty\"\n");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));

        let result = load_config_from_str("[channel]\nbackend = \"kafka\"\n");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/config.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_env_overrides_nested_keys() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                r#"
[server]
host = "127.0.0.1"
port = 3000

[database]
busy_timeout_ms = 250
"#,
            )?;
            jail.set_env("TURNSTILE_SERVER__PORT", "4000");
            jail.set_env("TURNSTILE_DATABASE__BUSY_TIMEOUT_MS", "900");
            jail.set_env("TURNSTILE_CHANNEL__BACKEND", "memory");

            let config = load_config(Path::new("config.toml")).map_err(|e| e.to_string())?;
            assert_eq!(config.server.host.to_string(), "127.0.0.1");
            assert_eq!(config.server.port, 4000);
            assert_eq!(config.database.busy_timeout_ms, 900);
            assert_eq!(config.channel.backend, ChannelBackend::Memory);
            Ok(())
        });
    }

    #[test]
    fn test_config_path_variable_is_not_an_override() {
        Jail::expect_with(|jail| {
            jail.create_file("custom.toml", "[server]\nport = 3100\n")?;
            jail.set_env(CONFIG_PATH_VAR, "custom.toml");

            let path = config_path_from_env();
            assert_eq!(path, PathBuf::from("custom.toml"));
            let config = load_config(&path).map_err(|e| e.to_string())?;
            assert_eq!(config.server.port, 3100);
            Ok(())
        });
    }

}
