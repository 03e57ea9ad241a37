use serde_derive::Deserialize;

/// Runtime configuration for the relay service. Every field has a default
/// so the server can run without a config file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Listen address in `<ip>:<port>` form.
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    /// Upper bound on concurrent connections and on registered users.
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
    /// Per-user capacity of the offline message mailbox.
    #[serde(default = "default_mailbox_depth")]
    pub mailbox_depth: usize,
    #[serde(default = "default_rate_window_secs")]
    pub rate_window_secs: u64,
    #[serde(default = "default_rate_max_requests")]
    pub rate_max_requests: u32,
    /// Deadline on any single client write, so a stalled peer cannot block
    /// a broadcasting thread indefinitely.
    #[serde(default = "default_write_timeout_secs")]
    pub write_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            listen: default_listen(),
            backlog: default_backlog(),
            max_clients: default_max_clients(),
            mailbox_depth: default_mailbox_depth(),
            rate_window_secs: default_rate_window_secs(),
            rate_max_requests: default_rate_max_requests(),
            write_timeout_secs: default_write_timeout_secs(),
        }
    }
}

impl Config {
    /// Loads the configuration from a TOML file.
    pub fn load(path: &str) -> Result<Config, String> {
        serdeconv::from_toml_file(path).map_err(|err| err.to_string())
    }
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_backlog() -> i32 {
    50
}

fn default_max_clients() -> usize {
    1000
}

fn default_mailbox_depth() -> usize {
    100
}

fn default_rate_window_secs() -> u64 {
    60
}

fn default_rate_max_requests() -> u32 {
    100
}

fn default_write_timeout_secs() -> u64 {
    5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();

        assert_eq!(config.listen, "0.0.0.0:8080");
        assert_eq!(config.backlog, 50);
        assert_eq!(config.max_clients, 1000);
        assert_eq!(config.mailbox_depth, 100);
        assert_eq!(config.rate_window_secs, 60);
        assert_eq!(config.rate_max_requests, 100);
    }

    #[test]
    fn test_partial_file_falls_back_to_defaults() {
        let config: Config = serdeconv::from_toml_str(
            r#"
listen = "127.0.0.1:9000"
max_clients = 64
"#,
        )
        .unwrap();

        assert_eq!(config.listen, "127.0.0.1:9000");
        assert_eq!(config.max_clients, 64);
        assert_eq!(config.mailbox_depth, 100);
        assert_eq!(config.rate_window_secs, 60);
    }
}
