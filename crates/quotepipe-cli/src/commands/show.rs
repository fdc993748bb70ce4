use serde::Serialize;

use quotepipe_core::{StoredPrice, Symbol, Warehouse, WarehouseConfig};

use crate::cli::ShowArgs;
use crate::error::CliError;

use super::CommandOutput;

#[derive(Debug, Serialize)]
struct ShowResponseData {
    symbol: Symbol,
    rows: Vec<StoredPrice>,
}

pub fn run(args: &ShowArgs, config: &WarehouseConfig) -> Result<CommandOutput, CliError> {
    let symbol = Symbol::parse(&args.symbol)?;
    let warehouse = Warehouse::open(config.clone())?;
    let rows = warehouse.prices_for(symbol.as_str(), args.limit)?;

    Ok(CommandOutput::ok(serde_json::to_value(ShowResponseData {
        symbol,
        rows,
    })?))
}
