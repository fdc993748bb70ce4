use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Validation(#[from] quotepipe_core::ValidationError),

    #[error(transparent)]
    Config(#[from] quotepipe_core::ConfigError),

    #[error("logging setup failed: {0}")]
    Logging(String),

    #[error("strict mode failed: {failed} of {total} symbols failed")]
    StrictModeViolation { failed: usize, total: usize },

    #[error(transparent)]
    Warehouse(#[from] quotepipe_core::WarehouseError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("interrupted before the run finished")]
    Interrupted,
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) => 2,
            Self::Config(_) => 2,
            Self::Logging(_) => 2,
            Self::StrictModeViolation { .. } => 5,
            Self::Serialization(_) => 4,
            Self::Warehouse(_) => 6,
            Self::Io(_) => 10,
            Self::Interrupted => 130,
        }
    }
}
