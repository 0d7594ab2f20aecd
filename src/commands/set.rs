use crate::registers::{AhuMode, BypassMode, Fan, FanMode};
use crate::{connection, control, snapshot};

/// Change one setting on the unit.
#[derive(clap::Parser)]
pub struct Args {
    #[clap(flatten)]
    connection: connection::Args,
    #[command(subcommand)]
    setting: Setting,
}

#[derive(clap::Subcommand)]
pub enum Setting {
    /// Overall operating mode. The automatic presets also switch both fans
    /// to auto.
    Mode { mode: AhuMode },
    /// Submode used while the unit is in manual operation.
    ManualSubmode { submode: i16 },
    /// Supply air temperature setpoint, C.
    SupplySetpoint { celsius: f32 },
    /// Extract air temperature setpoint, C.
    ExtractSetpoint { celsius: f32 },
    /// One fan's control mode, on its own.
    FanMode { fan: Fan, mode: FanMode },
    /// Fixed fan output in percent, switching the fan to manual output mode
    /// if needed.
    FanOutput { fan: Fan, percent: f32 },
    /// Fixed fan flow setpoint in m3/h, switching the fan to manual setpoint
    /// mode if needed.
    FanFlow { fan: Fan, flow: f32 },
    /// Bypass damper control mode.
    BypassMode { mode: BypassMode },
    /// Bypass damper manual output, percent.
    BypassOutput { percent: f32 },
    /// Acknowledge all alarms.
    AcknowledgeAlarms,
    /// Reset the filter alarm counter.
    ResetFilterAlarm,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Connection(#[from] connection::Error),
    #[error(transparent)]
    Command(#[from] control::CommandError),
}

pub async fn run(args: Args) -> Result<(), Error> {
    let mut client = connection::Client::new(args.connection);
    client.connect().await?;
    // A one-shot invocation has no cached state, so precondition decisions
    // get a fresh read instead.
    let current = snapshot::read(&mut client).await;
    let current = Some(&current);
    match args.setting {
        Setting::Mode { mode } => control::set_ahu_mode(&mut client, mode).await?,
        Setting::ManualSubmode { submode } => {
            control::set_manual_submode(&mut client, submode).await?
        }
        Setting::SupplySetpoint { celsius } => {
            control::set_supply_setpoint(&mut client, celsius).await?
        }
        Setting::ExtractSetpoint { celsius } => {
            control::set_extract_setpoint(&mut client, celsius).await?
        }
        Setting::FanMode { fan, mode } => control::set_fan_mode(&mut client, fan, mode).await?,
        Setting::FanOutput { fan, percent } => {
            control::set_fan_manual_output(&mut client, current, fan, percent).await?
        }
        Setting::FanFlow { fan, flow } => {
            control::set_fan_manual_flow(&mut client, current, fan, flow).await?
        }
        Setting::BypassMode { mode } => control::set_bypass_mode(&mut client, mode).await?,
        Setting::BypassOutput { percent } => {
            control::set_bypass_output(&mut client, percent).await?
        }
        Setting::AcknowledgeAlarms => control::acknowledge_alarms(&mut client).await?,
        Setting::ResetFilterAlarm => control::reset_filter_alarm(&mut client).await?,
    }
    client.disconnect();
    Ok(())
}
