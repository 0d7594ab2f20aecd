//! Timed high-airflow override with automatic restoration.
//!
//! Starting a boost captures the fan configuration once, forces both fans
//! into manual setpoint mode at fixed high flows and arms an expiry timer.
//! Expiry or cancellation restores the captured configuration and always
//! lands in the idle state, even when a restore write fails.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::task::AbortOnDropHandle;
use tracing::{info, warn};

use crate::connection::RegisterBus;
use crate::control::CommandError;
use crate::modbus::word_from_signed;
use crate::registers::{DataType, Fan, FanMode, hr};
use crate::snapshot::Snapshot;

/// Flow setpoints forced while boosting, m3/h.
pub const BOOST_SAF_FLOW: f32 = 1400.0;
pub const BOOST_EAF_FLOW: f32 = 400.0;

/// Fan configuration captured when a boost starts, written back when it ends.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SavedFanConfig {
    saf_mode: Option<i16>,
    eaf_mode: Option<i16>,
    saf_manual_setpoint: Option<f32>,
    eaf_manual_setpoint: Option<f32>,
}

impl SavedFanConfig {
    fn capture(snapshot: Option<&Snapshot>) -> Self {
        let Some(snapshot) = snapshot else { return Self::default() };
        Self {
            saf_mode: snapshot.saf_mode,
            eaf_mode: snapshot.eaf_mode,
            saf_manual_setpoint: snapshot.saf_manual_setpoint,
            eaf_manual_setpoint: snapshot.eaf_manual_setpoint,
        }
    }

    fn mode(&self, fan: Fan) -> Option<i16> {
        match fan {
            Fan::Supply => self.saf_mode,
            Fan::Extract => self.eaf_mode,
        }
    }

    fn manual_setpoint(&self, fan: Fan) -> Option<f32> {
        match fan {
            Fan::Supply => self.saf_manual_setpoint,
            Fan::Extract => self.eaf_manual_setpoint,
        }
    }
}

/// The override state machine. At most one expiry timer is armed at a time;
/// re-arming drops the previous timer task, so a superseded deadline can
/// never fire.
#[derive(Default)]
pub struct BoostState {
    ends_at: Option<Instant>,
    saved: Option<SavedFanConfig>,
    timer: Option<AbortOnDropHandle<()>>,
}

impl BoostState {
    /// The countdown shown to consumers. Hits 0 at the deadline whether or
    /// not the expiry timer has fired yet.
    pub fn remaining_secs(&self) -> u64 {
        match self.ends_at {
            Some(ends_at) => ends_at.saturating_duration_since(Instant::now()).as_secs(),
            None => 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.remaining_secs() > 0
    }
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

/// Start or extend a boost. A start while already boosting replaces the
/// deadline but keeps the originally captured configuration.
pub async fn start<B: RegisterBus>(
    bus: &mut B,
    state: &mut BoostState,
    snapshot: Option<&Snapshot>,
    duration: Duration,
    expired: mpsc::Sender<()>,
) -> Result<(), CommandError> {
    if state.saved.is_none() {
        state.saved = Some(SavedFanConfig::capture(snapshot));
    }
    info!("boosting for {}", humantime::format_duration(duration));
    // Both fans go to manual setpoint mode unconditionally; the overall
    // operating mode stays as it is.
    write(bus, hr::SAF_MODE, word_from_signed(FanMode::ManualSetpoint as i16)).await?;
    write(bus, hr::EAF_MODE, word_from_signed(FanMode::ManualSetpoint as i16)).await?;
    write(bus, hr::SAF_MANUAL_SETPOINT, DataType::FLO.encode(BOOST_SAF_FLOW)).await?;
    write(bus, hr::EAF_MANUAL_SETPOINT, DataType::FLO.encode(BOOST_EAF_FLOW)).await?;

    let ends_at = Instant::now() + duration;
    state.ends_at = Some(ends_at);
    state.timer = Some(AbortOnDropHandle::new(tokio::spawn(async move {
        tokio::time::sleep_until(ends_at).await;
        let _ = expired.send(()).await;
    })));
    Ok(())
}

/// End a boost and restore the captured fan configuration.
///
/// Restoration is fail-open: a rejected write is logged and skipped, and the
/// state machine reaches idle unconditionally. Safe to call when no boost is
/// running.
pub async fn stop<B: RegisterBus>(bus: &mut B, state: &mut BoostState) {
    state.timer = None;
    state.ends_at = None;
    let Some(saved) = state.saved.take() else { return };
    info!("boost over, restoring fan configuration");
    for fan in [Fan::Supply, Fan::Extract] {
        let registers = fan.registers();
        if let Some(mode) = saved.mode(fan) {
            if !bus.write_holding(registers.mode, word_from_signed(mode)).await {
                warn!("failed to restore the {fan} mode");
                continue;
            }
            // Setpoints only matter to the mode that reads them.
            if mode == FanMode::ManualSetpoint as i16
                && let Some(setpoint) = saved.manual_setpoint(fan)
                && !bus
                    .write_holding(registers.manual_setpoint, DataType::FLO.encode(setpoint))
                    .await
            {
                warn!("failed to restore the {fan} setpoint");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::testing::{BusOp, FakeBus};
    use crate::registers::hr;

    fn fan_snapshot(saf_mode: i16, eaf_mode: i16, saf_flow: f32, eaf_flow: f32) -> Snapshot {
        Snapshot {
            ahu_mode: Some(crate::registers::AhuMode::Manual as i16),
            saf_mode: Some(saf_mode),
            eaf_mode: Some(eaf_mode),
            saf_manual_setpoint: Some(saf_flow),
            eaf_manual_setpoint: Some(eaf_flow),
            ..Snapshot::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn boost_forces_high_flow_setpoints() {
        let mut bus = FakeBus::default();
        let mut state = BoostState::default();
        let (tx, _rx) = mpsc::channel(1);
        let snapshot = fan_snapshot(2, 3, 1200.0, 350.0);
        start(&mut bus, &mut state, Some(&snapshot), Duration::from_secs(600), tx)
            .await
            .unwrap();
        assert_eq!(
            bus.writes(),
            vec![
                BusOp::WriteHolding { address: hr::SAF_MODE, value: 3 },
                BusOp::WriteHolding { address: hr::EAF_MODE, value: 3 },
                BusOp::WriteHolding { address: hr::SAF_MANUAL_SETPOINT, value: 14000 },
                BusOp::WriteHolding { address: hr::EAF_MANUAL_SETPOINT, value: 4000 },
            ]
        );
        assert!(state.is_active());
        assert_eq!(state.remaining_secs(), 600);
    }

    #[tokio::test(start_paused = true)]
    async fn restarting_keeps_the_first_capture_and_supersedes_the_timer() {
        let mut bus = FakeBus::default();
        let mut state = BoostState::default();
        let (tx, mut rx) = mpsc::channel(1);

        let before = fan_snapshot(2, 3, 1200.0, 350.0);
        start(&mut bus, &mut state, Some(&before), Duration::from_secs(60), tx.clone())
            .await
            .unwrap();
        // The device now shows the boosted configuration; a second start must
        // not capture it.
        let boosted = fan_snapshot(3, 3, BOOST_SAF_FLOW, BOOST_EAF_FLOW);
        start(&mut bus, &mut state, Some(&boosted), Duration::from_secs(120), tx)
            .await
            .unwrap();
        assert_eq!(state.saved, Some(SavedFanConfig::capture(Some(&before))));

        // The superseded 60s deadline never fires.
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(rx.try_recv().is_err());
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn restore_writes_setpoint_only_for_manual_setpoint_fans() {
        let mut bus = FakeBus::default();
        let mut state = BoostState::default();
        let (tx, _rx) = mpsc::channel(1);
        let snapshot = fan_snapshot(FanMode::Auto as i16, FanMode::ManualSetpoint as i16, 0.0, 350.0);
        start(&mut bus, &mut state, Some(&snapshot), Duration::from_secs(60), tx)
            .await
            .unwrap();
        bus.log.clear();

        stop(&mut bus, &mut state).await;
        assert_eq!(
            bus.writes(),
            vec![
                BusOp::WriteHolding { address: hr::SAF_MODE, value: 2 },
                BusOp::WriteHolding { address: hr::EAF_MODE, value: 3 },
                BusOp::WriteHolding { address: hr::EAF_MANUAL_SETPOINT, value: 3500 },
            ]
        );
        assert!(!state.is_active());
        assert!(state.saved.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_is_monotone_and_reaches_zero_at_the_deadline() {
        let mut bus = FakeBus::default();
        let mut state = BoostState::default();
        let (tx, _rx) = mpsc::channel(1);
        start(&mut bus, &mut state, None, Duration::from_secs(60), tx).await.unwrap();
        assert_eq!(state.remaining_secs(), 60);
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(state.remaining_secs(), 30);
        tokio::time::advance(Duration::from_secs(40)).await;
        assert_eq!(state.remaining_secs(), 0);
        assert!(!state.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn restore_failures_still_reach_idle() {
        let mut bus = FakeBus::default();
        let mut state = BoostState::default();
        let (tx, _rx) = mpsc::channel(1);
        let snapshot = fan_snapshot(2, 3, 1200.0, 350.0);
        start(&mut bus, &mut state, Some(&snapshot), Duration::from_secs(60), tx)
            .await
            .unwrap();

        bus.fail_writes = true;
        stop(&mut bus, &mut state).await;
        assert!(state.saved.is_none());
        assert!(!state.is_active());
        assert_eq!(state.remaining_secs(), 0);

        // Stopping again is a no-op.
        stop(&mut bus, &mut state).await;
    }
}
