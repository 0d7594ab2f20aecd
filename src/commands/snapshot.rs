use crate::{alarms, connection, output, snapshot};

/// Read one full snapshot of the unit's sensors, settings and alarms.
#[derive(clap::Parser)]
pub struct Args {
    #[clap(flatten)]
    connection: connection::Args,
    #[clap(flatten)]
    output: output::Args,
    /// Skip the alarm bank scan.
    #[arg(long)]
    no_alarms: bool,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Connection(#[from] connection::Error),
    #[error(transparent)]
    Output(#[from] output::Error),
    #[error("could not serialize the snapshot")]
    Serialize(#[source] serde_json::Error),
}

fn render(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

pub async fn run(args: Args) -> Result<(), Error> {
    let mut client = connection::Client::new(args.connection);
    client.connect().await?;
    let mut snapshot = snapshot::read(&mut client).await;
    if !args.no_alarms {
        snapshot.alarms = alarms::scan(&mut client).await;
    }
    client.disconnect();

    let mut output = args.output.to_output()?;
    output.table_headers(vec!["Field", "Value"])?;
    let serde_json::Value::Object(fields) =
        serde_json::to_value(&snapshot).map_err(Error::Serialize)?
    else {
        unreachable!("a snapshot serializes to an object");
    };
    for (field, value) in &fields {
        output.result(
            || vec![field.clone(), render(value)],
            || serde_json::json!({ "field": field, "value": value }),
        )?;
    }
    Ok(output.commit()?)
}
