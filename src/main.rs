use std::process::ExitCode;
use std::sync::Arc;

use camino::Utf8PathBuf;
use clap::{Parser, ValueEnum};
use tsumugi::Config;

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Command {
    /// Clean the output directory and compile every asset once.
    Build,
    /// Build, then serve the output and rebuild on change.
    Dev,
}

#[derive(Parser, Debug, Clone)]
#[command(version, about)]
struct Args {
    #[clap(value_enum, index = 1, default_value = "build")]
    command: Command,

    /// Settings file, `tsumugi.json` in the working directory by default.
    #[clap(long)]
    config: Option<Utf8PathBuf>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    #[cfg(feature = "logging")]
    tsumugi::logging::init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let config = Arc::new(Config::load(args.config.as_deref())?);

    match args.command {
        Command::Build => {
            let diagnostics = tsumugi::build(config)?;
            if !diagnostics.skipped.is_empty() {
                tracing::warn!("skipped: {}", diagnostics.skipped.join(", "));
            }
        }
        #[cfg(feature = "live")]
        Command::Dev => tsumugi::dev(config)?,
        #[cfg(not(feature = "live"))]
        Command::Dev => anyhow::bail!("the `dev` command needs the `live` feature"),
    }

    Ok(())
}
