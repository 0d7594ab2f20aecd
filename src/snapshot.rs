use std::sync::Arc;

use crate::alarms::Alarm;
use crate::connection::RegisterBus;
use crate::modbus::word_to_signed;
use crate::registers::{
    AhuMode, BypassMode, DataType, Fan, FanMode, FanType, UnitMode, VentControlType, hr, ir,
    mode_name,
};

/// Everything decoded from the unit in one poll cycle.
///
/// A snapshot is built once and never mutated afterwards; the next cycle
/// supersedes it wholesale. Fields whose read batch failed stay `None`.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct Snapshot {
    // Temperatures, C.
    pub outdoor_temp: Option<f32>,
    pub intake_temp: Option<f32>,
    pub supply_temp: Option<f32>,
    pub exhaust_temp: Option<f32>,
    pub extract_temp: Option<f32>,
    pub after_recovery_temp: Option<f32>,

    // Fan flow, m3/h.
    pub saf_flow: Option<f32>,
    pub eaf_flow: Option<f32>,

    // Fan output, %.
    pub saf_output: Option<f32>,
    pub eaf_output: Option<f32>,

    // Pressures, Pa.
    pub exch_pressure: Option<f32>,
    pub filter_pressure_saf: Option<f32>,
    pub filter_pressure_eaf: Option<f32>,

    pub recovery_efficiency: Option<f32>,
    pub frost_protection: Option<f32>,
    /// Control sequence B output, the bypass damper.
    pub seq_b: Option<f32>,

    // Environment.
    pub co2: Option<f32>,
    pub humidity_room: Option<f32>,
    pub humidity_duct: Option<f32>,
    pub humidity_outdoor: Option<f32>,

    pub unit_mode: Option<u16>,
    pub unit_mode_name: Option<String>,

    pub ahu_mode: Option<i16>,
    pub ahu_mode_name: Option<String>,
    pub manual_submode: Option<i16>,
    pub saf_mode: Option<i16>,
    pub saf_mode_name: Option<String>,
    pub saf_manual_setpoint: Option<f32>,
    pub saf_manual_output: Option<f32>,
    pub eaf_mode: Option<i16>,
    pub eaf_mode_name: Option<String>,
    pub eaf_manual_setpoint: Option<f32>,
    pub eaf_manual_output: Option<f32>,

    pub vent_control: Option<i16>,
    pub vent_control_name: Option<String>,
    pub fan_type: Option<i16>,
    pub fan_type_name: Option<String>,
    pub supply_setpoint: Option<f32>,
    pub extract_setpoint: Option<f32>,
    pub supply_setpoint_max: Option<f32>,
    pub supply_setpoint_min: Option<f32>,

    pub saf_flow_low: Option<f32>,
    pub saf_flow_normal: Option<f32>,
    pub saf_flow_high: Option<f32>,
    pub eaf_flow_low: Option<f32>,
    pub eaf_flow_normal: Option<f32>,
    pub eaf_flow_high: Option<f32>,

    pub bypass_mode: Option<i16>,
    pub bypass_mode_name: Option<String>,
    pub bypass_manual_output: Option<f32>,

    /// Non-nominal alarms, shared with the previous snapshot on cycles that
    /// skip the alarm scan.
    pub alarms: Arc<[Alarm]>,

    pub boost_active: bool,
    pub boost_remaining_secs: u64,
}

impl Snapshot {
    pub fn fan_mode(&self, fan: Fan) -> Option<i16> {
        match fan {
            Fan::Supply => self.saf_mode,
            Fan::Extract => self.eaf_mode,
        }
    }

    pub fn fan_manual_setpoint(&self, fan: Fan) -> Option<f32> {
        match fan {
            Fan::Supply => self.saf_manual_setpoint,
            Fan::Extract => self.eaf_manual_setpoint,
        }
    }
}

/// Read and decode one snapshot, without the alarm bank.
///
/// The read plan is hand-tuned: contiguous ranges are read in single
/// requests where the device tolerates it, and the registers known to fail
/// in batch reads are fetched one at a time. Each batch is decoded
/// independently, so a failed batch degrades its own fields to `None`
/// without aborting the rest.
pub async fn read<B: RegisterBus>(bus: &mut B) -> Snapshot {
    let mut snapshot = Snapshot::default();
    read_sensors(bus, &mut snapshot).await;
    read_settings(bus, &mut snapshot).await;
    snapshot
}

async fn read_single<B: RegisterBus>(bus: &mut B, address: u16) -> Option<f32> {
    let words = bus.read_inputs(address, 1).await?;
    Some(DataType::DEC.decode(words[0]))
}

async fn read_sensors<B: RegisterBus>(bus: &mut B, snapshot: &mut Snapshot) {
    // Temperatures, flows and exchanger pressure sit in one 15-register run.
    if let Some(words) = bus.read_inputs(ir::OUTDOOR_TEMP, 15).await {
        let raw_outdoor = DataType::DEC.decode(words[0]);
        snapshot.intake_temp = Some(DataType::DEC.decode(words[1]));
        snapshot.supply_temp = Some(DataType::DEC.decode(words[2]));
        snapshot.exhaust_temp = Some(DataType::DEC.decode(words[3]));
        snapshot.extract_temp = Some(DataType::DEC.decode(words[4]));
        // An absent outdoor sensor reads exactly 0; substitute the intake
        // temperature as a best effort.
        snapshot.outdoor_temp =
            if raw_outdoor == 0.0 { snapshot.intake_temp } else { Some(raw_outdoor) };
        snapshot.saf_flow = Some(DataType::FLO.decode(words[11]));
        snapshot.eaf_flow = Some(DataType::FLO.decode(words[12]));
        snapshot.exch_pressure = Some(DataType::DEC.decode(words[14]));
    }

    snapshot.filter_pressure_saf = read_single(bus, ir::FILTER_PRESSURE_SAF).await;
    snapshot.filter_pressure_eaf = read_single(bus, ir::FILTER_PRESSURE_EAF).await;
    snapshot.after_recovery_temp = read_single(bus, ir::AFTER_RECOVERY_TEMP).await;

    if let Some(words) = bus.read_inputs(ir::SEQ_A, 2).await {
        snapshot.seq_b = Some(DataType::DEC.decode(words[1]));
    }

    if let Some(words) = bus.read_inputs(ir::SAF_OUTPUT, 2).await {
        snapshot.saf_output = Some(DataType::DEC.decode(words[0]));
        snapshot.eaf_output = Some(DataType::DEC.decode(words[1]));
    }

    snapshot.frost_protection = read_single(bus, ir::FROST_PROTECTION).await;

    if let Some(words) = bus.read_inputs(ir::RECOVERY_EFFICIENCY, 2).await {
        snapshot.recovery_efficiency = Some(DataType::DEC.decode(words[0]));
        set_unit_mode(snapshot, words[1]);
    } else if let Some(words) = bus.read_inputs(ir::UNIT_MODE, 1).await {
        // Still worth knowing the unit mode when the pair read fails.
        set_unit_mode(snapshot, words[0]);
    }

    if let Some(words) = bus.read_inputs(ir::CO2, 4).await {
        snapshot.co2 = Some(DataType::DEC.decode(words[0]));
        snapshot.humidity_room = Some(DataType::DEC.decode(words[1]));
        snapshot.humidity_duct = Some(DataType::DEC.decode(words[2]));
        snapshot.humidity_outdoor = Some(DataType::DEC.decode(words[3]));
    }
}

fn set_unit_mode(snapshot: &mut Snapshot, word: u16) {
    snapshot.unit_mode = Some(word);
    snapshot.unit_mode_name = Some(mode_name::<UnitMode>(word_to_signed(word)));
}

async fn read_settings<B: RegisterBus>(bus: &mut B, snapshot: &mut Snapshot) {
    if let Some(words) = bus.read_holdings(hr::AHU_MODE, 10).await {
        let ahu_mode = word_to_signed(words[0]);
        snapshot.ahu_mode = Some(ahu_mode);
        snapshot.ahu_mode_name = Some(mode_name::<AhuMode>(ahu_mode));
        snapshot.manual_submode = Some(word_to_signed(words[1]));
        let saf_mode = word_to_signed(words[2]);
        snapshot.saf_mode = Some(saf_mode);
        snapshot.saf_mode_name = Some(mode_name::<FanMode>(saf_mode));
        snapshot.saf_manual_setpoint = Some(DataType::FLO.decode(words[3]));
        snapshot.saf_manual_output = Some(DataType::DEC.decode(words[4]));
        let eaf_mode = word_to_signed(words[5]);
        snapshot.eaf_mode = Some(eaf_mode);
        snapshot.eaf_mode_name = Some(mode_name::<FanMode>(eaf_mode));
        snapshot.eaf_manual_setpoint = Some(DataType::FLO.decode(words[6]));
        snapshot.eaf_manual_output = Some(DataType::DEC.decode(words[7]));
    }

    if let Some(words) = bus.read_holdings(hr::VENT_CONTROL, 9).await {
        let vent_control = word_to_signed(words[0]);
        snapshot.vent_control = Some(vent_control);
        snapshot.vent_control_name = Some(mode_name::<VentControlType>(vent_control));
        let fan_type = word_to_signed(words[1]);
        snapshot.fan_type = Some(fan_type);
        snapshot.fan_type_name = Some(mode_name::<FanType>(fan_type));
        snapshot.supply_setpoint = Some(DataType::DEC.decode(words[3]));
        snapshot.extract_setpoint = Some(DataType::DEC.decode(words[4]));
        snapshot.supply_setpoint_max = Some(DataType::DEC.decode(words[5]));
        snapshot.supply_setpoint_min = Some(DataType::DEC.decode(words[6]));
    }

    if let Some(words) = bus.read_holdings(hr::SAF_FLOW_LOW, 12).await {
        snapshot.saf_flow_low = Some(DataType::FLO.decode(words[0]));
        snapshot.saf_flow_normal = Some(DataType::FLO.decode(words[1]));
        snapshot.saf_flow_high = Some(DataType::FLO.decode(words[2]));
        snapshot.eaf_flow_low = Some(DataType::FLO.decode(words[3]));
        snapshot.eaf_flow_normal = Some(DataType::FLO.decode(words[4]));
        snapshot.eaf_flow_high = Some(DataType::FLO.decode(words[5]));
    }

    if let Some(words) = bus.read_holdings(hr::BYPASS_MODE, 2).await {
        let bypass_mode = word_to_signed(words[0]);
        snapshot.bypass_mode = Some(bypass_mode);
        snapshot.bypass_mode_name = Some(mode_name::<BypassMode>(bypass_mode));
        snapshot.bypass_manual_output = Some(DataType::DEC.decode(words[1]));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::testing::FakeBus;
    use crate::modbus::word_from_signed;

    fn populated_bus() -> FakeBus {
        let mut bus = FakeBus::with_inputs([
            (ir::OUTDOOR_TEMP, word_from_signed(-52)),
            (ir::INTAKE_TEMP, 31),
            (ir::SUPPLY_TEMP, 185),
            (ir::EXHAUST_TEMP, 42),
            (ir::EXTRACT_TEMP, 221),
            (ir::SAF_FLOW, 12500),
            (ir::EAF_FLOW, 11800),
            (ir::EXCH_PRESSURE_EAF, 1530),
            (ir::CO2, 6120),
            (ir::HUMIDITY_ROOM, 451),
            (ir::FILTER_PRESSURE_SAF, 880),
            (ir::SEQ_B, 350),
            (ir::SAF_OUTPUT, 755),
            (ir::EAF_OUTPUT, 700),
            (ir::FROST_PROTECTION, 120),
            (ir::RECOVERY_EFFICIENCY, 832),
            (ir::UNIT_MODE, 3),
        ]);
        bus.holdings = [
            (hr::AHU_MODE, 2),
            (hr::MANUAL_SUBMODE, 0),
            (hr::SAF_MODE, 2),
            (hr::SAF_MANUAL_SETPOINT, 12000),
            (hr::SAF_MANUAL_OUTPUT, 800),
            (hr::EAF_MODE, 3),
            (hr::EAF_MANUAL_SETPOINT, 3500),
            (hr::EAF_MANUAL_OUTPUT, 650),
            (hr::VENT_CONTROL, 0),
            (hr::FAN_TYPE, 1),
            (hr::SUPPLY_SETPOINT, 195),
            (hr::EXTRACT_SETPOINT, 210),
            (hr::SUPPLY_SETPOINT_MAX, 250),
            (hr::SUPPLY_SETPOINT_MIN, 150),
            (hr::SAF_FLOW_LOW, 8000),
            (hr::EAF_FLOW_HIGH, 16000),
            (hr::BYPASS_MODE, 1),
            (hr::BYPASS_OUTPUT, 420),
        ]
        .into_iter()
        .collect();
        bus
    }

    #[tokio::test]
    async fn decodes_a_full_snapshot() {
        let snapshot = read(&mut populated_bus()).await;
        assert_eq!(snapshot.outdoor_temp, Some(-5.2));
        assert_eq!(snapshot.intake_temp, Some(3.1));
        assert_eq!(snapshot.supply_temp, Some(18.5));
        assert_eq!(snapshot.saf_flow, Some(1250.0));
        assert_eq!(snapshot.eaf_flow, Some(1180.0));
        assert_eq!(snapshot.exch_pressure, Some(153.0));
        assert_eq!(snapshot.filter_pressure_saf, Some(88.0));
        assert_eq!(snapshot.seq_b, Some(35.0));
        assert_eq!(snapshot.saf_output, Some(75.5));
        assert_eq!(snapshot.co2, Some(612.0));
        assert_eq!(snapshot.humidity_room, Some(45.1));
        assert_eq!(snapshot.recovery_efficiency, Some(83.2));
        assert_eq!(snapshot.unit_mode, Some(3));
        assert_eq!(snapshot.unit_mode_name.as_deref(), Some("Normal speed"));
        assert_eq!(snapshot.ahu_mode, Some(2));
        assert_eq!(snapshot.ahu_mode_name.as_deref(), Some("Auto"));
        assert_eq!(snapshot.saf_manual_setpoint, Some(1200.0));
        assert_eq!(snapshot.eaf_mode_name.as_deref(), Some("Manual setpoint"));
        assert_eq!(snapshot.eaf_manual_setpoint, Some(350.0));
        assert_eq!(snapshot.eaf_manual_output, Some(65.0));
        assert_eq!(snapshot.fan_type_name.as_deref(), Some("Flow"));
        assert_eq!(snapshot.supply_setpoint, Some(19.5));
        assert_eq!(snapshot.saf_flow_low, Some(800.0));
        assert_eq!(snapshot.eaf_flow_high, Some(1600.0));
        assert_eq!(snapshot.bypass_mode_name.as_deref(), Some("Manual"));
        assert_eq!(snapshot.bypass_manual_output, Some(42.0));
        assert!(snapshot.alarms.is_empty());
    }

    #[tokio::test]
    async fn substitutes_intake_for_a_dead_outdoor_sensor() {
        let mut bus = populated_bus();
        bus.inputs.insert(ir::OUTDOOR_TEMP, 0);
        let snapshot = read(&mut bus).await;
        assert_eq!(snapshot.outdoor_temp, Some(3.1));
        assert_eq!(snapshot.intake_temp, Some(3.1));
    }

    #[tokio::test]
    async fn failed_batch_leaves_only_its_own_fields_unset() {
        let mut bus = populated_bus();
        bus.fail_input_reads_at = vec![ir::OUTDOOR_TEMP];
        bus.fail_holding_reads_at = vec![hr::VENT_CONTROL];
        let snapshot = read(&mut bus).await;
        // The failed sensor run.
        assert_eq!(snapshot.outdoor_temp, None);
        assert_eq!(snapshot.supply_temp, None);
        assert_eq!(snapshot.saf_flow, None);
        // The failed settings batch.
        assert_eq!(snapshot.vent_control, None);
        assert_eq!(snapshot.supply_setpoint, None);
        // Unrelated batches still decode.
        assert_eq!(snapshot.filter_pressure_saf, Some(88.0));
        assert_eq!(snapshot.saf_output, Some(75.5));
        assert_eq!(snapshot.ahu_mode, Some(2));
        assert_eq!(snapshot.saf_flow_low, Some(800.0));
        assert_eq!(snapshot.bypass_mode, Some(1));
    }

    #[tokio::test]
    async fn falls_back_to_a_single_unit_mode_read() {
        let mut bus = populated_bus();
        bus.fail_input_reads_at = vec![ir::RECOVERY_EFFICIENCY];
        let snapshot = read(&mut bus).await;
        assert_eq!(snapshot.recovery_efficiency, None);
        assert_eq!(snapshot.unit_mode, Some(3));
        assert_eq!(snapshot.unit_mode_name.as_deref(), Some("Normal speed"));
    }
}
