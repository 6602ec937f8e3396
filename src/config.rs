//! Configuration management
use crate::error::{ClientError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_API_URL: &str = "http://127.0.0.1:5000/api";
const DEFAULT_WS_URL: &str = "ws://127.0.0.1:5000/ws";

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the REST API (including the `/api` prefix)
    pub api_base_url: String,

    /// WebSocket URL for the live channel
    pub ws_url: String,

    /// Directory for persisted client state (credential file)
    pub data_dir: PathBuf,

    /// Interval between full-history poll refreshes of the open conversation
    pub poll_interval: Duration,

    /// HTTP request timeout
    pub connect_timeout: Duration,

    /// Delay before re-dialing a dropped live channel
    pub reconnect_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            data_dir: default_data_dir(),
            poll_interval: Duration::from_secs(3),
            connect_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(2),
        }
    }
}

fn default_data_dir() -> PathBuf {
    match std::env::var("HOME") {
        Ok(home) => PathBuf::from(home).join(".anywork"),
        Err(_) => PathBuf::from(".anywork"),
    }
}

impl Config {
    /// Create config from command line arguments. Flags may appear anywhere;
    /// non-flag arguments are left for the command dispatcher. Env overrides
    /// are applied first, so an explicit flag always wins over the
    /// environment.
    pub fn from_args(args: &[String]) -> Result<(Self, Vec<String>)> {
        let mut config = Config::default();

        // Env overrides (nice for scripts)
        if let Ok(url) = std::env::var("ANYWORK_API_URL") {
            config.api_base_url = url.trim_end_matches('/').to_string();
        }
        if let Ok(url) = std::env::var("ANYWORK_WS_URL") {
            config.ws_url = url;
        }
        if let Ok(dir) = std::env::var("ANYWORK_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }

        let mut rest = Vec::new();

        let mut i = 0;
        while i < args.len() {
            match args[i].as_str() {
                "--api-url" => {
                    let url = args.get(i + 1).ok_or_else(|| {
                        ClientError::Config("--api-url requires a URL argument".to_string())
                    })?;
                    config.api_base_url = url.trim_end_matches('/').to_string();
                    i += 2;
                }
                "--ws-url" => {
                    let url = args.get(i + 1).ok_or_else(|| {
                        ClientError::Config("--ws-url requires a URL argument".to_string())
                    })?;
                    config.ws_url = url.clone();
                    i += 2;
                }
                "--data-dir" => {
                    let path = args.get(i + 1).ok_or_else(|| {
                        ClientError::Config("--data-dir requires a path argument".to_string())
                    })?;
                    config.data_dir = PathBuf::from(path);
                    i += 2;
                }
                "--poll-secs" => {
                    let secs = args.get(i + 1).ok_or_else(|| {
                        ClientError::Config("--poll-secs requires a number argument".to_string())
                    })?;
                    let secs = secs.parse::<u64>().map_err(|_| {
                        ClientError::Config("--poll-secs must be a positive number".to_string())
                    })?;
                    if secs == 0 {
                        return Err(ClientError::Config(
                            "--poll-secs must be a positive number".to_string(),
                        ));
                    }
                    config.poll_interval = Duration::from_secs(secs);
                    i += 2;
                }
                other => {
                    rest.push(other.to_string());
                    i += 1;
                }
            }
        }

        Ok((config, rest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_args(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_flags_and_leaves_commands() {
        let (config, rest) = Config::from_args(&to_args(&[
            "chat",
            "--api-url",
            "http://10.0.0.2:5000/api/",
            "alice",
            "--poll-secs",
            "5",
        ]))
        .unwrap();

        assert_eq!(config.api_base_url, "http://10.0.0.2:5000/api");
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(rest, vec!["chat".to_string(), "alice".to_string()]);
    }

    #[test]
    fn rejects_zero_poll_interval() {
        let err = Config::from_args(&to_args(&["--poll-secs", "0"])).unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
    }

    #[test]
    fn rejects_missing_flag_value() {
        assert!(Config::from_args(&to_args(&["--data-dir"])).is_err());
    }

    #[test]
    fn explicit_flag_beats_env_override() {
        std::env::set_var("ANYWORK_API_URL", "http://env-host:5000/api");
        std::env::set_var("ANYWORK_WS_URL", "ws://env-host:5000/ws");

        let (config, _) = Config::from_args(&to_args(&[
            "--api-url",
            "http://flag-host:5000/api",
        ]))
        .unwrap();

        // The flag wins; the env still fills flags that were not given
        assert_eq!(config.api_base_url, "http://flag-host:5000/api");
        assert_eq!(config.ws_url, "ws://env-host:5000/ws");

        std::env::remove_var("ANYWORK_API_URL");
        std::env::remove_var("ANYWORK_WS_URL");
    }
}
