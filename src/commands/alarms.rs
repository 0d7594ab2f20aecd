use crate::{alarms, connection, output};

/// Scan the alarm bank and list the non-nominal alarms.
#[derive(clap::Parser)]
pub struct Args {
    #[clap(flatten)]
    connection: connection::Args,
    #[clap(flatten)]
    output: output::Args,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Connection(#[from] connection::Error),
    #[error(transparent)]
    Output(#[from] output::Error),
}

pub async fn run(args: Args) -> Result<(), Error> {
    let mut client = connection::Client::new(args.connection);
    client.connect().await?;
    let alarms = alarms::scan(&mut client).await;
    client.disconnect();

    let mut output = args.output.to_output()?;
    output.table_headers(vec!["Id", "Name", "Status", "Status name"])?;
    for alarm in alarms.iter() {
        output.result(
            || {
                vec![
                    alarm.id.to_string(),
                    alarm.name.clone(),
                    alarm.status.to_string(),
                    alarm.status_name.clone(),
                ]
            },
            || alarm,
        )?;
    }
    Ok(output.commit()?)
}
