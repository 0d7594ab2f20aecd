//! Semantic write operations against the unit's settings registers.
//!
//! Each operation issues one or more ordered holding-register writes,
//! inserting mode-switch writes first when the last known snapshot shows a
//! precondition is not met. Precondition checks trust the cached snapshot,
//! which may lag the device by up to one poll cycle; a redundant mode write
//! is harmless, a skipped one is corrected on the next poll.

use tracing::info;

use crate::connection::RegisterBus;
use crate::modbus::word_from_signed;
use crate::registers::{AhuMode, BypassMode, DataType, Fan, FanMode, coil, hr};
use crate::snapshot::Snapshot;

/// Manual fan output is restricted to a range the motors tolerate.
pub const MANUAL_OUTPUT_RANGE: std::ops::RangeInclusive<f32> = 25.0..=100.0;
/// Manual flow setpoints outside this range are rejected by the unit.
pub const MANUAL_FLOW_RANGE: std::ops::RangeInclusive<f32> = 100.0..=2000.0;
const BYPASS_OUTPUT_RANGE: std::ops::RangeInclusive<f32> = 0.0..=100.0;

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("the unit rejected writing {value} to holding register {address}")]
    WriteRejected { address: u16, value: u16 },
    #[error("the unit rejected pulsing coil {address}")]
    PulseRejected { address: u16 },
}

async fn write<B: RegisterBus>(
    bus: &mut B,
    address: u16,
    value: u16,
) -> Result<(), CommandError> {
    if bus.write_holding(address, value).await {
        Ok(())
    } else {
        Err(CommandError::WriteRejected { address, value })
    }
}

async fn write_mode<B: RegisterBus>(
    bus: &mut B,
    address: u16,
    mode: i16,
) -> Result<(), CommandError> {
    write(bus, address, word_from_signed(mode)).await
}

/// Change the overall operating mode.
///
/// The automatic presets only take effect when both fans follow the unit, so
/// selecting one also forces both fan modes to Auto.
pub async fn set_ahu_mode<B: RegisterBus>(bus: &mut B, mode: AhuMode) -> Result<(), CommandError> {
    info!("setting operating mode to {mode}");
    write_mode(bus, hr::AHU_MODE, mode as i16).await?;
    if matches!(mode, AhuMode::Auto | AhuMode::Low | AhuMode::Normal | AhuMode::High) {
        write_mode(bus, hr::SAF_MODE, FanMode::Auto as i16).await?;
        write_mode(bus, hr::EAF_MODE, FanMode::Auto as i16).await?;
    }
    Ok(())
}

/// Change one fan's control mode directly, without touching the rest of the
/// configuration.
pub async fn set_fan_mode<B: RegisterBus>(
    bus: &mut B,
    fan: Fan,
    mode: FanMode,
) -> Result<(), CommandError> {
    info!("setting {fan} mode to {mode}");
    write_mode(bus, fan.registers().mode, mode as i16).await
}

/// Select the submode used while the unit is in manual operation.
pub async fn set_manual_submode<B: RegisterBus>(
    bus: &mut B,
    submode: i16,
) -> Result<(), CommandError> {
    write_mode(bus, hr::MANUAL_SUBMODE, submode).await
}

pub async fn set_supply_setpoint<B: RegisterBus>(
    bus: &mut B,
    celsius: f32,
) -> Result<(), CommandError> {
    info!("setting supply air setpoint to {celsius:.1} C");
    write(bus, hr::SUPPLY_SETPOINT, DataType::DEC.encode(celsius)).await
}

pub async fn set_extract_setpoint<B: RegisterBus>(
    bus: &mut B,
    celsius: f32,
) -> Result<(), CommandError> {
    info!("setting extract air setpoint to {celsius:.1} C");
    write(bus, hr::EXTRACT_SETPOINT, DataType::DEC.encode(celsius)).await
}

/// Put the unit in manual operation unless the snapshot already shows it.
async fn require_manual_operation<B: RegisterBus>(
    bus: &mut B,
    snapshot: Option<&Snapshot>,
) -> Result<(), CommandError> {
    if snapshot.and_then(|s| s.ahu_mode) != Some(AhuMode::Manual as i16) {
        write_mode(bus, hr::AHU_MODE, AhuMode::Manual as i16).await?;
    }
    Ok(())
}

async fn require_fan_mode<B: RegisterBus>(
    bus: &mut B,
    snapshot: Option<&Snapshot>,
    fan: Fan,
    mode: FanMode,
) -> Result<(), CommandError> {
    if snapshot.and_then(|s| s.fan_mode(fan)) != Some(mode as i16) {
        write_mode(bus, fan.registers().mode, mode as i16).await?;
    }
    Ok(())
}

/// Drive a fan at a fixed output percentage.
pub async fn set_fan_manual_output<B: RegisterBus>(
    bus: &mut B,
    snapshot: Option<&Snapshot>,
    fan: Fan,
    percent: f32,
) -> Result<(), CommandError> {
    let percent = percent.clamp(*MANUAL_OUTPUT_RANGE.start(), *MANUAL_OUTPUT_RANGE.end());
    info!("setting {fan} to manual output {percent:.1}%");
    require_manual_operation(bus, snapshot).await?;
    require_fan_mode(bus, snapshot, fan, FanMode::ManualOutput).await?;
    write(bus, fan.registers().manual_output, DataType::DEC.encode(percent)).await
}

/// Drive a fan toward a fixed flow setpoint.
pub async fn set_fan_manual_flow<B: RegisterBus>(
    bus: &mut B,
    snapshot: Option<&Snapshot>,
    fan: Fan,
    flow: f32,
) -> Result<(), CommandError> {
    let flow = flow.clamp(*MANUAL_FLOW_RANGE.start(), *MANUAL_FLOW_RANGE.end());
    info!("setting {fan} to manual flow {flow:.0} m3/h");
    require_manual_operation(bus, snapshot).await?;
    require_fan_mode(bus, snapshot, fan, FanMode::ManualSetpoint).await?;
    write(bus, fan.registers().manual_setpoint, DataType::FLO.encode(flow)).await
}

pub async fn set_bypass_mode<B: RegisterBus>(
    bus: &mut B,
    mode: BypassMode,
) -> Result<(), CommandError> {
    info!("setting bypass control to {mode}");
    write_mode(bus, hr::BYPASS_MODE, mode as i16).await
}

pub async fn set_bypass_output<B: RegisterBus>(
    bus: &mut B,
    percent: f32,
) -> Result<(), CommandError> {
    let percent = percent.clamp(*BYPASS_OUTPUT_RANGE.start(), *BYPASS_OUTPUT_RANGE.end());
    info!("setting bypass manual output to {percent:.1}%");
    write(bus, hr::BYPASS_OUTPUT, DataType::DEC.encode(percent)).await
}

async fn pulse<B: RegisterBus>(bus: &mut B, address: u16) -> Result<(), CommandError> {
    if bus.write_coil(address, true).await {
        Ok(())
    } else {
        Err(CommandError::PulseRejected { address })
    }
}

pub async fn acknowledge_alarms<B: RegisterBus>(bus: &mut B) -> Result<(), CommandError> {
    info!("acknowledging all alarms");
    pulse(bus, coil::ACKNOWLEDGE_ALARMS).await
}

pub async fn reset_filter_alarm<B: RegisterBus>(bus: &mut B) -> Result<(), CommandError> {
    info!("resetting the filter alarm counter");
    pulse(bus, coil::RESET_FILTER_ALARM).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::testing::{BusOp, FakeBus};

    fn snapshot_with_modes(ahu: i16, saf: i16, eaf: i16) -> Snapshot {
        Snapshot {
            ahu_mode: Some(ahu),
            saf_mode: Some(saf),
            eaf_mode: Some(eaf),
            ..Snapshot::default()
        }
    }

    #[tokio::test]
    async fn auto_mode_forces_both_fans_to_follow() {
        let mut bus = FakeBus::default();
        set_ahu_mode(&mut bus, AhuMode::Auto).await.unwrap();
        assert_eq!(
            bus.writes(),
            vec![
                BusOp::WriteHolding { address: hr::AHU_MODE, value: 2 },
                BusOp::WriteHolding { address: hr::SAF_MODE, value: 2 },
                BusOp::WriteHolding { address: hr::EAF_MODE, value: 2 },
            ]
        );
    }

    #[tokio::test]
    async fn off_mode_leaves_fan_modes_alone() {
        let mut bus = FakeBus::default();
        set_ahu_mode(&mut bus, AhuMode::Off).await.unwrap();
        assert_eq!(bus.writes(), vec![BusOp::WriteHolding { address: hr::AHU_MODE, value: 0 }]);
    }

    #[tokio::test]
    async fn manual_output_inserts_missing_preconditions() {
        let mut bus = FakeBus::default();
        let snapshot = snapshot_with_modes(AhuMode::Auto as i16, FanMode::Auto as i16, 2);
        set_fan_manual_output(&mut bus, Some(&snapshot), Fan::Supply, 80.0).await.unwrap();
        assert_eq!(
            bus.writes(),
            vec![
                BusOp::WriteHolding { address: hr::AHU_MODE, value: 1 },
                BusOp::WriteHolding { address: hr::SAF_MODE, value: 1 },
                BusOp::WriteHolding { address: hr::SAF_MANUAL_OUTPUT, value: 800 },
            ]
        );
    }

    #[tokio::test]
    async fn manual_output_skips_preconditions_already_met() {
        let mut bus = FakeBus::default();
        let snapshot =
            snapshot_with_modes(AhuMode::Manual as i16, 2, FanMode::ManualOutput as i16);
        set_fan_manual_output(&mut bus, Some(&snapshot), Fan::Extract, 50.0).await.unwrap();
        assert_eq!(
            bus.writes(),
            vec![BusOp::WriteHolding { address: hr::EAF_MANUAL_OUTPUT, value: 500 }]
        );
    }

    #[tokio::test]
    async fn missing_snapshot_means_all_preconditions_are_written() {
        let mut bus = FakeBus::default();
        set_fan_manual_flow(&mut bus, None, Fan::Extract, 350.0).await.unwrap();
        assert_eq!(
            bus.writes(),
            vec![
                BusOp::WriteHolding { address: hr::AHU_MODE, value: 1 },
                BusOp::WriteHolding { address: hr::EAF_MODE, value: 3 },
                BusOp::WriteHolding { address: hr::EAF_MANUAL_SETPOINT, value: 3500 },
            ]
        );
    }

    #[tokio::test]
    async fn output_and_flow_values_are_clamped() {
        let mut bus = FakeBus::default();
        let snapshot =
            snapshot_with_modes(AhuMode::Manual as i16, FanMode::ManualOutput as i16, 1);
        set_fan_manual_output(&mut bus, Some(&snapshot), Fan::Supply, 10.0).await.unwrap();
        set_fan_manual_output(&mut bus, Some(&snapshot), Fan::Supply, 150.0).await.unwrap();
        assert_eq!(
            bus.writes(),
            vec![
                BusOp::WriteHolding { address: hr::SAF_MANUAL_OUTPUT, value: 250 },
                BusOp::WriteHolding { address: hr::SAF_MANUAL_OUTPUT, value: 1000 },
            ]
        );

        let mut bus = FakeBus::default();
        let snapshot = Snapshot {
            ahu_mode: Some(AhuMode::Manual as i16),
            saf_mode: Some(FanMode::ManualSetpoint as i16),
            ..Snapshot::default()
        };
        set_fan_manual_flow(&mut bus, Some(&snapshot), Fan::Supply, 9000.0).await.unwrap();
        assert_eq!(
            bus.writes(),
            vec![BusOp::WriteHolding { address: hr::SAF_MANUAL_SETPOINT, value: 20000 }]
        );
    }

    #[tokio::test]
    async fn setpoints_encode_one_decimal() {
        let mut bus = FakeBus::default();
        set_supply_setpoint(&mut bus, 19.5).await.unwrap();
        set_bypass_output(&mut bus, 120.0).await.unwrap();
        assert_eq!(
            bus.writes(),
            vec![
                BusOp::WriteHolding { address: hr::SUPPLY_SETPOINT, value: 195 },
                BusOp::WriteHolding { address: hr::BYPASS_OUTPUT, value: 1000 },
            ]
        );
    }

    #[tokio::test]
    async fn alarm_coils_are_pulsed() {
        let mut bus = FakeBus::default();
        acknowledge_alarms(&mut bus).await.unwrap();
        reset_filter_alarm(&mut bus).await.unwrap();
        assert_eq!(
            bus.writes(),
            vec![
                BusOp::WriteCoil { address: coil::ACKNOWLEDGE_ALARMS, on: true },
                BusOp::WriteCoil { address: coil::RESET_FILTER_ALARM, on: true },
            ]
        );
    }

    #[tokio::test]
    async fn rejected_writes_surface_the_register() {
        let mut bus = FakeBus { fail_writes: true, ..FakeBus::default() };
        let error = set_supply_setpoint(&mut bus, 20.0).await.unwrap_err();
        assert!(matches!(
            error,
            CommandError::WriteRejected { address: hr::SUPPLY_SETPOINT, value: 200 }
        ));
        let error = acknowledge_alarms(&mut bus).await.unwrap_err();
        assert!(matches!(error, CommandError::PulseRejected { address: coil::ACKNOWLEDGE_ALARMS }));
    }
}
