mod cli;
mod commands;
mod error;
mod obs;

use std::io::Write;
use std::process::ExitCode;

use clap::Parser;

use crate::cli::{Cli, Command};
use crate::error::CliError;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(error) => {
            tracing::error!(code = error.exit_code(), "{error}");
            eprintln!("error: {error}");
            ExitCode::from(error.exit_code())
        }
    }
}

async fn run() -> Result<ExitCode, CliError> {
    let cli = Cli::parse();
    obs::init_tracing(&cli.log_level, cli.log_format).map_err(CliError::Logging)?;

    let output = commands::run(&cli).await?;
    render(&output.data, cli.pretty)?;

    let strict = matches!(&cli.command, Command::Run(args) if args.strict);
    if output.failed > 0 {
        if strict {
            return Err(CliError::StrictModeViolation {
                failed: output.failed,
                total: output.total,
            });
        }
        return Ok(ExitCode::from(3));
    }

    Ok(ExitCode::SUCCESS)
}

fn render(data: &serde_json::Value, pretty: bool) -> Result<(), CliError> {
    let rendered = if pretty {
        serde_json::to_string_pretty(data)?
    } else {
        serde_json::to_string(data)?
    };
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{rendered}")?;
    Ok(())
}
