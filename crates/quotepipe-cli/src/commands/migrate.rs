use serde::Serialize;

use quotepipe_core::{Warehouse, WarehouseConfig};

use crate::error::CliError;

use super::CommandOutput;

#[derive(Debug, Serialize)]
struct MigrateResponseData {
    db_path: String,
    migrations: Vec<String>,
}

pub fn run(config: &WarehouseConfig) -> Result<CommandOutput, CliError> {
    let warehouse = Warehouse::open(config.clone())?;
    let data = MigrateResponseData {
        db_path: warehouse.db_path().display().to_string(),
        migrations: warehouse.applied_migrations()?,
    };
    tracing::info!(db_path = %data.db_path, versions = data.migrations.len(), "schema up to date");
    Ok(CommandOutput::ok(serde_json::to_value(data)?))
}
