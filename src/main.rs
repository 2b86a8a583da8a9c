use clap::Parser as _;
use maico_ws_tools::commands;
use tracing_subscriber::filter::{LevelFilter, targets::Targets};
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _};

const LOG_ENV_VAR: &str = "MAICO_WS_TOOLS_LOG";

#[derive(clap::Parser)]
#[clap(version, about, author)]
enum Commands {
    Registers(commands::registers::Args),
    Read(commands::read::Args),
    Status(commands::status::Args),
    Watch(commands::watch::Args),
    Set(commands::set::Args),
    Probe(commands::probe::Args),
}

fn end<E: std::error::Error>(r: Result<(), E>) {
    std::process::exit(match r {
        Ok(_) => 0,
        Err(e) => {
            eprintln!("error: {e}");
            let mut cause = e.source();
            while let Some(e) = cause {
                eprintln!("  because: {e}");
                cause = e.source();
            }
            1
        }
    });
}

fn log_filter() -> Targets {
    let default = Targets::new().with_default(LevelFilter::INFO);
    let Ok(description) = std::env::var(LOG_ENV_VAR) else {
        return default;
    };
    match description.parse::<Targets>() {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("warning: ignoring {LOG_ENV_VAR}={description:?}: {e}");
            default
        }
    }
}

fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(log_filter())
        .init();
    match Commands::parse() {
        Commands::Registers(args) => end(commands::registers::run(args)),
        Commands::Read(args) => end(commands::read::run(args)),
        Commands::Status(args) => end(commands::status::run(args)),
        Commands::Watch(args) => end(commands::watch::run(args)),
        Commands::Set(args) => end(commands::set::run(args)),
        Commands::Probe(args) => end(commands::probe::run(args)),
    }
}
