pub use slog::{crit, debug, error, info, o, trace, warn};
pub use slog::{Discard, Drain, Logger};

use sloggers::{Config, LoggerConfig};

/// Builds the terminal logger shared by the services. Output goes to stderr
/// so that it can be redirected independently of the process stdout.
pub fn init() -> Logger {
    let config: LoggerConfig = serdeconv::from_toml_str(
        r#"
type = "terminal"
level = "info"
destination = "stderr"
"#,
    )
    .expect("invalid logger configuration");

    config.build_logger().expect("logger construction failed")
}
