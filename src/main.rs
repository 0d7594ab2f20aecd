use clap::Parser as _;
use topvex_tools::commands;
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _};

#[derive(clap::Parser)]
#[clap(version, about, author)]
enum Commands {
    Registers(commands::registers::Args),
    Snapshot(commands::snapshot::Args),
    Alarms(commands::alarms::Args),
    Set(commands::set::Args),
    Monitor(commands::monitor::Args),
    Boost(commands::boost::Args),
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

#[tokio::main]
async fn main() {
    let filter_description =
        std::env::var("TOPVEX_TOOLS_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = match filter_description
        .parse::<tracing_subscriber::filter::targets::Targets>()
    {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("error: could not parse TOPVEX_TOOLS_LOG: {e}");
            std::process::exit(2);
        }
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
    match Commands::parse() {
        Commands::Registers(args) => end(commands::registers::run(args)),
        Commands::Snapshot(args) => end(commands::snapshot::run(args).await),
        Commands::Alarms(args) => end(commands::alarms::run(args).await),
        Commands::Set(args) => end(commands::set::run(args).await),
        Commands::Monitor(args) => end(commands::monitor::run(args).await),
        Commands::Boost(args) => end(commands::boost::run(args).await),
    }
}
