use tracing_subscriber::EnvFilter;

use crate::cli::LogFormat;

/// Environment variable holding a full `EnvFilter` directive.
pub const LOG_ENV: &str = "QUOTEPIPE_LOG";

/// Install the global subscriber. Logs go to stderr; stdout carries reports.
pub fn init_tracing(log_level: &str, log_format: LogFormat) -> Result<(), String> {
    let filter = std::env::var(LOG_ENV).unwrap_or_else(|_| log_level.to_string());
    let env_filter =
        EnvFilter::try_new(filter).map_err(|err| format!("invalid log filter: {err}"))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    let installed = match log_format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };
    installed.map_err(|err| format!("failed to install {} logger: {err}", log_format.as_str()))
}
