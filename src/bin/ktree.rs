use std::io::{self, Write};
use std::process::ExitCode;

use clap::Parser;
use ktree::cli::Cli;
use ktree::config::Mode;
use ktree::Index;

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("ktree: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> ktree::Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        // `--help`/`--version` print to stdout and exit 0 on their own; every
        // other parse failure (unknown flag, missing required arg, bad
        // value) funnels through the same exit-1 path as domain errors.
        Err(err) if !err.use_stderr() => err.exit(),
        Err(err) => return Err(err.into()),
    };
    let config = cli.into_config()?;

    match config.mode {
        Mode::Index => {
            let index = Index::build(config)?;
            index.save()?;
        }
        Mode::Query => {
            let index = Index::load(config)?;
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            index.search(&mut handle)?;
            handle.flush()?;
        }
    }
    Ok(())
}
