mod migrate;
mod run;
mod show;

use std::collections::HashMap;

use quotepipe_core::{warehouse_from_map, PipelineConfig, Symbol, WarehouseConfig};
use serde_json::Value;

use crate::cli::{Cli, Command, RunArgs};
use crate::error::CliError;

/// What a command hands back to `main` for rendering.
#[derive(Debug)]
pub struct CommandOutput {
    pub data: Value,
    /// Symbols that did not reach `Written`.
    pub failed: usize,
    pub total: usize,
}

impl CommandOutput {
    pub fn ok(data: Value) -> Self {
        Self {
            data,
            failed: 0,
            total: 0,
        }
    }
}

pub async fn run(cli: &Cli) -> Result<CommandOutput, CliError> {
    let env = std::env::vars().collect::<HashMap<_, _>>();
    match &cli.command {
        Command::Run(args) => {
            let config = pipeline_config(cli, args, &env)?;
            run::run(&config).await
        }
        Command::Migrate => migrate::run(&warehouse_config(cli, &env)?),
        Command::Show(args) => show::run(args, &warehouse_config(cli, &env)?),
    }
}

/// Build the run configuration, letting CLI flags win over the environment.
fn pipeline_config(
    cli: &Cli,
    args: &RunArgs,
    env: &HashMap<String, String>,
) -> Result<PipelineConfig, CliError> {
    let mut config = PipelineConfig::from_map(env)?;
    if let Some(raw) = &args.symbols {
        let symbols = Symbol::parse_list(raw)?;
        if !symbols.is_empty() {
            config.symbols = symbols;
        }
    }
    if let Some(concurrency) = args.concurrency {
        config.max_concurrency = usize::from(concurrency);
    }
    if let Some(db_path) = &cli.db_path {
        config.warehouse.db_path = db_path.clone();
    }
    Ok(config)
}

fn warehouse_config(
    cli: &Cli,
    env: &HashMap<String, String>,
) -> Result<WarehouseConfig, CliError> {
    let mut config = warehouse_from_map(env)?;
    if let Some(db_path) = &cli.db_path {
        config.db_path = db_path.clone();
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use clap::Parser;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn flags_override_environment() {
        let cli = Cli::try_parse_from([
            "quotepipe",
            "--db-path",
            "/tmp/override.duckdb",
            "run",
            "--symbols",
            "aapl,msft",
            "--concurrency",
            "3",
        ])
        .expect("parse");
        let Command::Run(args) = &cli.command else {
            panic!("expected run");
        };

        let config = pipeline_config(
            &cli,
            args,
            &env(&[
                ("ALPHA_VANTAGE_API_KEY", "demo"),
                ("STOCK_SYMBOLS", "IBM"),
                ("QUOTEPIPE_DB_PATH", "/tmp/env.duckdb"),
            ]),
        )
        .expect("config");

        let names = config.symbols.iter().map(Symbol::as_str).collect::<Vec<_>>();
        assert_eq!(names, vec!["AAPL", "MSFT"]);
        assert_eq!(config.max_concurrency, 3);
        assert_eq!(config.warehouse.db_path, PathBuf::from("/tmp/override.duckdb"));
    }

    #[test]
    fn run_without_api_key_is_a_config_error() {
        let cli = Cli::try_parse_from(["quotepipe", "run"]).expect("parse");
        let Command::Run(args) = &cli.command else {
            panic!("expected run");
        };

        let error = pipeline_config(&cli, args, &env(&[])).expect_err("missing key");
        assert!(matches!(error, CliError::Config(_)));
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn storage_commands_do_not_need_an_api_key() {
        let cli = Cli::try_parse_from(["quotepipe", "migrate"]).expect("parse");
        let config =
            warehouse_config(&cli, &env(&[("QUOTEPIPE_HOME", "/srv/q")])).expect("config");
        assert_eq!(config.db_path, PathBuf::from("/srv/q/warehouse.duckdb"));
    }
}
