//! The periodic driver owning the session, the boost state and the last
//! snapshot.
//!
//! All register traffic is funnelled through one `Monitor` task, since the
//! controller cannot cope with interleaved exchanges. Consumers watch the
//! snapshot channel and submit commands through a [`Handle`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::warn;

use crate::boost::{self, BoostState};
use crate::connection::{Client, RegisterBus};
use crate::control::{self, CommandError};
use crate::registers::{AhuMode, BypassMode, Fan, FanMode};
use crate::alarms;
use crate::snapshot::{self, Snapshot};

pub const POLL_PERIOD: Duration = Duration::from_secs(10);
/// Alarm state changes rarely; scanning the bank every cycle would double
/// the request count for little gain.
pub const ALARM_SCAN_EVERY: u64 = 6;

/// A connectable register bus, as the monitor requires one.
pub trait Session: RegisterBus {
    /// Establish the session if it is down. Returns whether it is up.
    fn ensure_connected(&mut self) -> impl Future<Output = bool> + Send;
}

impl Session for Client {
    async fn ensure_connected(&mut self) -> bool {
        if self.is_connected() {
            return true;
        }
        match self.connect().await {
            Ok(()) => true,
            Err(error) => {
                warn!(message = "reconnect failed", error = &error as &dyn std::error::Error);
                false
            }
        }
    }
}

/// Mutating operations the monitor executes on behalf of consumers.
#[derive(Debug, Clone, Copy)]
pub enum Command {
    SetAhuMode(AhuMode),
    SetManualSubmode(i16),
    SetSupplySetpoint(f32),
    SetExtractSetpoint(f32),
    SetFanMode(Fan, FanMode),
    SetFanManualOutput(Fan, f32),
    SetFanManualFlow(Fan, f32),
    SetBypassMode(BypassMode),
    SetBypassOutput(f32),
    AcknowledgeAlarms,
    ResetFilterAlarm,
    StartBoost(Duration),
    CancelBoost,
}

type Envelope = (Command, oneshot::Sender<Result<(), CommandError>>);

#[derive(Debug, thiserror::Error)]
pub enum ExecuteError {
    #[error("the monitor task is gone")]
    MonitorGone,
    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Cloneable consumer side of a running [`Monitor`].
#[derive(Clone)]
pub struct Handle {
    commands: mpsc::Sender<Envelope>,
    snapshots: watch::Receiver<Option<Arc<Snapshot>>>,
    healthy: watch::Receiver<bool>,
}

impl Handle {
    /// The last published snapshot, `None` before the first successful poll.
    pub fn snapshots(&self) -> watch::Receiver<Option<Arc<Snapshot>>> {
        self.snapshots.clone()
    }

    /// Whether the last cycle could talk to the controller at all.
    pub fn healthy(&self) -> watch::Receiver<bool> {
        self.healthy.clone()
    }

    /// Run one command on the monitor task and wait for its outcome. The
    /// monitor publishes a fresh snapshot right after, without waiting for
    /// the next scheduled cycle.
    pub async fn execute(&self, command: Command) -> Result<(), ExecuteError> {
        let (reply, outcome) = oneshot::channel();
        self.commands.send((command, reply)).await.map_err(|_| ExecuteError::MonitorGone)?;
        Ok(outcome.await.map_err(|_| ExecuteError::MonitorGone)??)
    }
}

pub struct Monitor<B> {
    bus: B,
    boost: BoostState,
    cycle: u64,
    snapshots: watch::Sender<Option<Arc<Snapshot>>>,
    healthy: watch::Sender<bool>,
    commands: mpsc::Receiver<Envelope>,
    boost_expired_tx: mpsc::Sender<()>,
    boost_expired_rx: mpsc::Receiver<()>,
}

impl<B: Session> Monitor<B> {
    pub fn new(bus: B) -> (Self, Handle) {
        let (command_tx, command_rx) = mpsc::channel(8);
        let (snapshot_tx, snapshot_rx) = watch::channel(None);
        let (healthy_tx, healthy_rx) = watch::channel(false);
        let (boost_expired_tx, boost_expired_rx) = mpsc::channel(1);
        let monitor = Self {
            bus,
            boost: BoostState::default(),
            cycle: 0,
            snapshots: snapshot_tx,
            healthy: healthy_tx,
            commands: command_rx,
            boost_expired_tx,
            boost_expired_rx,
        };
        let handle =
            Handle { commands: command_tx, snapshots: snapshot_rx, healthy: healthy_rx };
        (monitor, handle)
    }

    /// Drive the poll cycle until every [`Handle`] is dropped.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(POLL_PERIOD);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.poll_cycle().await,
                Some(()) = self.boost_expired_rx.recv() => {
                    boost::stop(&mut self.bus, &mut self.boost).await;
                    self.refresh().await;
                }
                envelope = self.commands.recv() => {
                    let Some((command, reply)) = envelope else { break };
                    let outcome = self.execute(command).await;
                    let _ = reply.send(outcome);
                    self.refresh().await;
                }
            }
        }
    }

    fn last_snapshot(&self) -> Option<Arc<Snapshot>> {
        self.snapshots.borrow().clone()
    }

    async fn execute(&mut self, command: Command) -> Result<(), CommandError> {
        let snapshot = self.last_snapshot();
        let snapshot = snapshot.as_deref();
        match command {
            Command::SetAhuMode(mode) => control::set_ahu_mode(&mut self.bus, mode).await,
            Command::SetManualSubmode(submode) => {
                control::set_manual_submode(&mut self.bus, submode).await
            }
            Command::SetSupplySetpoint(celsius) => {
                control::set_supply_setpoint(&mut self.bus, celsius).await
            }
            Command::SetExtractSetpoint(celsius) => {
                control::set_extract_setpoint(&mut self.bus, celsius).await
            }
            Command::SetFanMode(fan, mode) => {
                control::set_fan_mode(&mut self.bus, fan, mode).await
            }
            Command::SetFanManualOutput(fan, percent) => {
                control::set_fan_manual_output(&mut self.bus, snapshot, fan, percent).await
            }
            Command::SetFanManualFlow(fan, flow) => {
                control::set_fan_manual_flow(&mut self.bus, snapshot, fan, flow).await
            }
            Command::SetBypassMode(mode) => control::set_bypass_mode(&mut self.bus, mode).await,
            Command::SetBypassOutput(percent) => {
                control::set_bypass_output(&mut self.bus, percent).await
            }
            Command::AcknowledgeAlarms => control::acknowledge_alarms(&mut self.bus).await,
            Command::ResetFilterAlarm => control::reset_filter_alarm(&mut self.bus).await,
            Command::StartBoost(duration) => {
                boost::start(
                    &mut self.bus,
                    &mut self.boost,
                    snapshot,
                    duration,
                    self.boost_expired_tx.clone(),
                )
                .await
            }
            Command::CancelBoost => {
                boost::stop(&mut self.bus, &mut self.boost).await;
                Ok(())
            }
        }
    }

    async fn poll_cycle(&mut self) {
        let scan_alarms = self.cycle % ALARM_SCAN_EVERY == 0;
        self.cycle += 1;
        self.publish_snapshot(scan_alarms).await;
    }

    /// An out-of-band cycle after a command, carrying the alarm list over.
    async fn refresh(&mut self) {
        self.publish_snapshot(false).await;
    }

    async fn publish_snapshot(&mut self, scan_alarms: bool) {
        if !self.bus.ensure_connected().await {
            self.healthy.send_replace(false);
            return;
        }
        let mut snapshot = snapshot::read(&mut self.bus).await;
        snapshot.alarms = if scan_alarms {
            alarms::scan(&mut self.bus).await
        } else {
            self.last_snapshot().map(|s| s.alarms.clone()).unwrap_or_default()
        };
        snapshot.boost_active = self.boost.is_active();
        snapshot.boost_remaining_secs = self.boost.remaining_secs();
        self.healthy.send_replace(true);
        self.snapshots.send_replace(Some(Arc::new(snapshot)));
    }
}
