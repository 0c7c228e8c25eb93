//! Host configuration: environment first, command-line flags on top.

use anyhow::{Context, bail};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use proxybridge::DEFAULT_MAX_FRAME_BYTES;

const LOG_ENV: &str = "PROXYBRIDGE_LOG";
const MAX_FRAME_ENV: &str = "PROXYBRIDGE_MAX_FRAME_BYTES";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    pub max_frame_bytes: usize,
    /// Base level for the crate's own targets; ignored when `RUST_LOG` is set.
    pub log_level: &'static str,
    pub json_logs: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            log_level: "info",
            json_logs: false,
        }
    }
}

impl HostConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let log_level = match lookup(LOG_ENV).as_deref() {
            Some("debug") => "debug",
            Some("warn") | Some("warning") => "warn",
            Some("error") => "error",
            _ => "info",
        };
        let max_frame_bytes = match lookup(MAX_FRAME_ENV) {
            Some(raw) => {
                parse_frame_bytes(&raw).with_context(|| format!("invalid {MAX_FRAME_ENV}"))?
            }
            None => DEFAULT_MAX_FRAME_BYTES,
        };

        Ok(Self {
            max_frame_bytes,
            log_level,
            json_logs: lookup("LOG_FORMAT").as_deref() == Some("json"),
        })
    }

    pub fn apply(&mut self, overrides: &CliOverrides) {
        if let Some(max) = overrides.max_frame_bytes {
            self.max_frame_bytes = max;
        }
    }
}

/// Flags given on the command line; unset fields keep the environment's value.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CliOverrides {
    pub max_frame_bytes: Option<usize>,
}

pub fn parse_args(args: &[String]) -> Result<CliOverrides, String> {
    let mut overrides = CliOverrides::default();

    let mut i = 1; // skip argv[0]
    while i < args.len() {
        match args[i].as_str() {
            "--max-frame-bytes" => {
                i += 1;
                let raw = args.get(i).ok_or("--max-frame-bytes requires a value")?;
                overrides.max_frame_bytes =
                    Some(parse_frame_bytes(raw).map_err(|e| format!("--max-frame-bytes: {e}"))?);
            }
            "--help" | "-h" => return Err("".to_string()),
            arg => return Err(format!("unexpected argument: {arg}")),
        }
        i += 1;
    }

    Ok(overrides)
}

fn parse_frame_bytes(raw: &str) -> anyhow::Result<usize> {
    let value: usize = raw
        .trim()
        .parse()
        .with_context(|| format!("'{raw}' is not a byte count"))?;
    if value == 0 {
        bail!("frame limit must be greater than zero");
    }
    Ok(value)
}

/// Installs the global subscriber. Logs go to stderr; stdout carries frames.
pub fn init_tracing(config: &HostConfig) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(format!(
            "proxybridge={level},proxybridge_host={level}",
            level = config.log_level
        ))
    };

    if config.json_logs {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> anyhow::Result<HostConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        HostConfig::from_lookup(|key| vars.get(key).cloned())
    }

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("proxybridge-host")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn defaults_without_environment() {
        assert_eq!(config_from(&[]).unwrap(), HostConfig::default());
        assert_eq!(HostConfig::default().max_frame_bytes, 8 * 1024 * 1024);
    }

    #[test]
    fn reads_log_settings() {
        let config = config_from(&[(LOG_ENV, "warning"), ("LOG_FORMAT", "json")]).unwrap();
        assert_eq!(config.log_level, "warn");
        assert!(config.json_logs);

        let config = config_from(&[(LOG_ENV, "verbose")]).unwrap();
        assert_eq!(config.log_level, "info");
        assert!(!config.json_logs);
    }

    #[test]
    fn reads_and_validates_frame_limit() {
        let config = config_from(&[(MAX_FRAME_ENV, "4096")]).unwrap();
        assert_eq!(config.max_frame_bytes, 4096);

        let err = config_from(&[(MAX_FRAME_ENV, "lots")]).unwrap_err();
        assert!(err.to_string().contains(MAX_FRAME_ENV));
        assert!(config_from(&[(MAX_FRAME_ENV, "0")]).is_err());
    }

    #[test]
    fn flag_overrides_environment() {
        let mut config = config_from(&[(MAX_FRAME_ENV, "4096")]).unwrap();
        let overrides = parse_args(&args(&["--max-frame-bytes", "1024"])).unwrap();
        config.apply(&overrides);
        assert_eq!(config.max_frame_bytes, 1024);

        let mut config = config_from(&[(MAX_FRAME_ENV, "4096")]).unwrap();
        config.apply(&parse_args(&args(&[])).unwrap());
        assert_eq!(config.max_frame_bytes, 4096);
    }

    #[test]
    fn parse_args_errors() {
        assert_eq!(
            parse_args(&args(&["--max-frame-bytes"])).unwrap_err(),
            "--max-frame-bytes requires a value"
        );
        assert!(
            parse_args(&args(&["--max-frame-bytes", "x"]))
                .unwrap_err()
                .starts_with("--max-frame-bytes:")
        );
        assert_eq!(
            parse_args(&args(&["--verbose"])).unwrap_err(),
            "unexpected argument: --verbose"
        );
        assert_eq!(parse_args(&args(&["--help"])).unwrap_err(), "");
    }
}
