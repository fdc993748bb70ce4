use std::sync::Arc;

use quotepipe_core::{PipelineConfig, ReqwestHttpClient, Runner, Warehouse};

use crate::error::CliError;

use super::CommandOutput;

pub async fn run(config: &PipelineConfig) -> Result<CommandOutput, CliError> {
    let warehouse = Warehouse::open(config.warehouse.clone())?;
    tracing::info!(
        db_path = %warehouse.db_path().display(),
        symbols = config.symbols.len(),
        "warehouse ready"
    );

    let runner = Runner::from_config(
        config,
        Arc::new(ReqwestHttpClient::new()),
        Arc::new(warehouse),
    );

    // Dropping the run future aborts in-flight symbols; committed rows stay.
    let report = tokio::select! {
        report = runner.run(&config.symbols) => report,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("interrupt received, abandoning run");
            return Err(CliError::Interrupted);
        }
    };

    Ok(CommandOutput {
        failed: report.failed().count(),
        total: report.outcomes.len(),
        data: serde_json::to_value(&report)?,
    })
}
