use std::sync::Arc;

use tracing::warn;

use crate::connection::RegisterBus;
use crate::modbus::MAX_REGISTERS_PER_REQUEST;
use crate::registers::{alarm_name, alarm_status_name, ir};

/// No alarm register is assigned at this offset.
const STATUS_NO_REGISTER: u16 = 0;
const STATUS_OK: u16 = 1;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Alarm {
    /// Offset into the alarm bank.
    pub id: u16,
    pub name: String,
    pub status: u16,
    pub status_name: String,
}

/// Read the full alarm status bank and keep only the non-nominal entries.
///
/// The bank is larger than a single request allows, so it is read as
/// sequential chunks and concatenated in address order. An unreadable chunk
/// is treated as all-OK: a transient read failure should not masquerade as
/// an alarm storm, at the cost of possibly hiding a real alarm until the
/// next scan.
pub async fn scan<B: RegisterBus>(bus: &mut B) -> Arc<[Alarm]> {
    let mut statuses = Vec::with_capacity(usize::from(ir::ALARM_BANK_LEN));
    let mut start = ir::ALARM_BANK_START;
    while start < ir::ALARM_BANK_START + ir::ALARM_BANK_LEN {
        let remaining = ir::ALARM_BANK_START + ir::ALARM_BANK_LEN - start;
        let count = remaining.min(MAX_REGISTERS_PER_REQUEST);
        match bus.read_inputs(start, count).await {
            Some(words) => statuses.extend(words.into_iter().take(count.into())),
            None => {
                warn!(start, count, "alarm bank chunk unreadable, assuming OK");
                statuses.extend(std::iter::repeat_n(STATUS_OK, count.into()));
            }
        }
        start += count;
    }
    active_alarms(&statuses).into()
}

/// Filter a status bank down to entries that indicate a non-nominal state.
pub fn active_alarms(statuses: &[u16]) -> Vec<Alarm> {
    statuses
        .iter()
        .enumerate()
        .filter(|&(_, &status)| status != STATUS_NO_REGISTER && status != STATUS_OK)
        .map(|(id, &status)| {
            let id = id as u16;
            Alarm {
                id,
                name: alarm_name(id),
                status,
                status_name: alarm_status_name(status),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::testing::{BusOp, FakeBus};

    #[tokio::test]
    async fn scans_the_bank_in_four_chunks() {
        let mut bus = FakeBus::default();
        let alarms = scan(&mut bus).await;
        assert!(alarms.is_empty());
        assert_eq!(
            bus.log,
            vec![
                BusOp::ReadInputs { address: 0, count: 47 },
                BusOp::ReadInputs { address: 47, count: 47 },
                BusOp::ReadInputs { address: 94, count: 47 },
                BusOp::ReadInputs { address: 141, count: 19 },
            ]
        );
    }

    #[tokio::test]
    async fn reports_only_non_nominal_statuses() {
        let mut bus =
            FakeBus::with_inputs([(52, 7), (57, 2), (60, 1), (61, 0), (100, 3)]);
        let alarms = scan(&mut bus).await;
        assert_eq!(alarms.len(), 3);
        assert!(alarms.iter().all(|a| a.status != 0 && a.status != 1));
        assert_eq!(alarms[0].id, 52);
        assert_eq!(alarms[0].name, "Supply filter alarm");
        assert_eq!(alarms[0].status_name, "Active");
        assert_eq!(alarms[1].id, 57);
        assert_eq!(alarms[1].status_name, "Blocked");
        assert_eq!(alarms[2].id, 100);
        assert_eq!(alarms[2].name, "Alarm 100");
        assert_eq!(alarms[2].status_name, "Acknowledged");
    }

    #[tokio::test]
    async fn unreadable_chunk_degrades_to_nominal() {
        let mut bus = FakeBus::with_inputs([(10, 7), (120, 7)]);
        // The second and third chunks fail; 120 falls in the third chunk.
        bus.fail_input_reads_at = vec![47, 94];
        let alarms = scan(&mut bus).await;
        assert_eq!(alarms.len(), 1);
        assert_eq!(alarms[0].id, 10);
        assert_eq!(bus.log.len(), 4);
    }

    #[test]
    fn never_reports_nominal_entries() {
        let bank: Vec<u16> = (0..160).map(|i| i % 8).collect();
        for alarm in active_alarms(&bank) {
            assert!(alarm.status != 0 && alarm.status != 1, "id {}", alarm.id);
        }
    }
}
