use futures::StreamExt as _;
use tokio_stream::wrappers::WatchStream;
use tokio_util::task::AbortOnDropHandle;

use crate::poll::Monitor;
use crate::snapshot::Snapshot;
use crate::{connection, output};

/// Poll the unit continuously, emitting one record per snapshot.
#[derive(clap::Parser)]
pub struct Args {
    #[clap(flatten)]
    connection: connection::Args,
    #[clap(flatten)]
    output: output::Args,
    /// Stop after this many snapshots.
    #[arg(long, short = 'n')]
    count: Option<u64>,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Connection(#[from] connection::Error),
    #[error(transparent)]
    Output(#[from] output::Error),
}

fn scalar(value: Option<f32>) -> String {
    value.map(|v| format!("{v:.1}")).unwrap_or_default()
}

fn summary_row(snapshot: &Snapshot) -> Vec<String> {
    vec![
        jiff::Zoned::now().strftime("%F %T").to_string(),
        scalar(snapshot.outdoor_temp),
        scalar(snapshot.supply_temp),
        scalar(snapshot.extract_temp),
        scalar(snapshot.saf_flow),
        scalar(snapshot.eaf_flow),
        snapshot.unit_mode_name.clone().unwrap_or_default(),
        snapshot.alarms.len().to_string(),
        if snapshot.boost_active {
            format!("{}s", snapshot.boost_remaining_secs)
        } else {
            String::new()
        },
    ]
}

pub async fn run(args: Args) -> Result<(), Error> {
    let mut client = connection::Client::new(args.connection);
    // Fail loudly up front; later connection losses are retried each cycle.
    client.connect().await?;
    let (monitor, handle) = Monitor::new(client);
    let task = AbortOnDropHandle::new(tokio::spawn(monitor.run()));

    let mut output = args.output.to_output()?;
    output.table_headers(vec![
        "Time", "Outdoor", "Supply", "Extract", "SAF flow", "EAF flow", "Unit mode", "Alarms",
        "Boost",
    ])?;
    let mut snapshots = WatchStream::new(handle.snapshots());
    let mut emitted = 0;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            next = snapshots.next() => {
                let Some(published) = next else { break };
                let Some(snapshot) = published else { continue };
                output.result(|| summary_row(&snapshot), || &*snapshot)?;
                emitted += 1;
                if args.count.is_some_and(|count| emitted >= count) {
                    break;
                }
            }
        }
    }
    drop(task);
    Ok(output.commit()?)
}
