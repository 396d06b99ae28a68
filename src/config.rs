use std::time::Duration;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "verify-hands")]
#[command(about = "Review machine-predicted hand boxes and store the corrections")]
pub struct Config {
    /// Base URL of the annotation store
    #[arg(long, env = "VERIFY_HANDS_BASE_URL", default_value = "http://localhost:5000")]
    pub base_url: String,

    /// Seconds to wait for any single store request
    #[arg(long, env = "VERIFY_HANDS_TIMEOUT_SECS", default_value_t = 30)]
    pub timeout_secs: u64,

    /// Log filter, in env_logger syntax; RUST_LOG takes precedence
    #[arg(long, env = "VERIFY_HANDS_LOG", default_value = "info")]
    pub log_level: String,
}

impl Config {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let config = Config::try_parse_from([
            "verify-hands",
            "--base-url",
            "http://store.internal:8080/api",
            "--timeout-secs",
            "5",
            "--log-level",
            "debug",
        ])
        .unwrap();

        assert_eq!(config.base_url, "http://store.internal:8080/api");
        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn rejects_a_non_numeric_timeout() {
        assert!(Config::try_parse_from(["verify-hands", "--timeout-secs", "soon"]).is_err());
    }
}
