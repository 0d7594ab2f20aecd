use tokio_util::task::AbortOnDropHandle;
use tracing::info;

use crate::connection;
use crate::poll::{Command, Monitor};

/// Run a temporary high-airflow boost, restoring the previous fan
/// configuration when it ends. Ctrl-C cancels and restores early.
#[derive(clap::Parser)]
pub struct Args {
    #[clap(flatten)]
    connection: connection::Args,
    /// How long to boost for.
    #[arg(long, short = 'd', default_value = "10m")]
    duration: humantime::Duration,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Connection(#[from] connection::Error),
    #[error(transparent)]
    Execute(#[from] crate::poll::ExecuteError),
}

pub async fn run(args: Args) -> Result<(), Error> {
    let mut client = connection::Client::new(args.connection);
    client.connect().await?;
    let (monitor, handle) = Monitor::new(client);
    let task = AbortOnDropHandle::new(tokio::spawn(monitor.run()));

    handle.execute(Command::StartBoost(*args.duration)).await?;
    let mut snapshots = handle.snapshots();
    let mut started = false;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("cancelling the boost early");
                handle.execute(Command::CancelBoost).await?;
                break;
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = {
                    let snapshot = snapshots.borrow_and_update();
                    snapshot.as_ref().map(|s| (s.boost_active, s.boost_remaining_secs))
                };
                match status {
                    Some((true, remaining)) => {
                        started = true;
                        info!("boosting, {remaining}s remaining");
                    }
                    Some((false, _)) if started => {
                        info!("boost finished, fan configuration restored");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }
    drop(task);
    Ok(())
}
