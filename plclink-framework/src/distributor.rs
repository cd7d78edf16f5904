//! Value distribution: fan one cycle's results out to interested consumers.

use std::collections::{BTreeMap, HashMap};

use tokio::sync::mpsc::error::TrySendError;

use plclink_common::{ConsumerId, DecodedValue, LinkValue, ReadKey, Result, ValueUpdate};

use crate::adapter::CycleError;
use crate::registry::{LinkRegistry, Snapshot};

/// Result of one poll cycle, threaded from the engine into distribution.
#[derive(Debug)]
pub enum CycleOutcome {
    /// The batch ran to completion; individual reads may still have failed.
    Completed(Vec<(ReadKey, Result<LinkValue>)>),
    /// The batch was abandoned (connection failure or timeout).
    Failed(CycleError),
}

/// Counters from one distribution pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DistributionStats {
    /// Updates handed to a consumer queue.
    pub delivered: usize,
    /// Updates dropped because the consumer queue was full.
    pub dropped: usize,
    /// Consumers that left between snapshot and distribution.
    pub skipped: usize,
    /// Values delivered with bad quality.
    pub bad_values: usize,
}

/// Deliver one cycle's results to every consumer present in `snapshot`.
///
/// Each consumer receives a single [`ValueUpdate`] holding one value per
/// binding; a failed read yields a bad-quality value, never an omission.
/// Delivery goes to the registration the snapshot was taken from; a
/// consumer that re-registered since then is skipped for this cycle.
pub fn distribute(
    registry: &LinkRegistry,
    link: &str,
    cycle: u64,
    timestamp: i64,
    snapshot: &Snapshot,
    outcome: &CycleOutcome,
) -> DistributionStats {
    let mut stats = DistributionStats::default();

    let (results, error) = match outcome {
        CycleOutcome::Completed(results) => (
            results.iter().map(|(k, v)| (*k, v)).collect::<HashMap<_, _>>(),
            None,
        ),
        CycleOutcome::Failed(err) => (HashMap::new(), Some(err.message.clone())),
    };

    let mut per_consumer: BTreeMap<(&ConsumerId, u64), Vec<DecodedValue>> = BTreeMap::new();

    for request in snapshot.requests() {
        let value = match results.get(&request.key) {
            Some(Ok(value)) => Some(value),
            Some(Err(e)) => {
                tracing::debug!(link = %link, key = %request.key, error = %e, "Read failed");
                None
            }
            None => None,
        };

        for interest in &request.interests {
            let decoded = match value {
                Some(v) => DecodedValue::good(&interest.name, v.clone(), interest.unit.clone()),
                None => {
                    stats.bad_values += 1;
                    DecodedValue::bad(&interest.name, interest.unit.clone())
                }
            };
            per_consumer
                .entry((&interest.consumer, interest.generation))
                .or_default()
                .push(decoded);
        }
    }

    for ((consumer, generation), values) in per_consumer {
        let Some(sink) = registry.sink(consumer, generation) else {
            stats.skipped += 1;
            continue;
        };

        let update = ValueUpdate {
            consumer: consumer.clone(),
            link: link.to_string(),
            cycle,
            timestamp,
            values,
            error: error.clone(),
        };

        match sink.try_send(update) {
            Ok(()) => stats.delivered += 1,
            Err(TrySendError::Full(_)) => {
                stats.dropped += 1;
                tracing::warn!(
                    link = %link,
                    consumer = %consumer,
                    cycle,
                    "Consumer queue full, dropping update"
                );
            }
            Err(TrySendError::Closed(_)) => {
                stats.skipped += 1;
                tracing::debug!(
                    link = %link,
                    consumer = %consumer,
                    "Consumer receiver dropped, unregistering"
                );
                registry.unregister_generation(consumer, generation);
            }
        }
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use plclink_common::{AddressBinding, DeviceFamily, Error, ErrorKind, Quality, TypedValue};

    fn hr(address: u16, name: &str) -> AddressBinding {
        AddressBinding::new(DeviceFamily::HoldingRegister, address, 1, name).unwrap()
    }

    fn word(v: u16) -> LinkValue {
        LinkValue::new(format!("0x{:04X}", v), TypedValue::Register(v))
    }

    fn key(address: u16) -> ReadKey {
        hr(address, "").key()
    }

    #[test]
    fn test_both_consumers_receive_shared_value() {
        let reg = LinkRegistry::new(DeviceFamily::ALL);
        let mut a = reg.register("a", vec![hr(10, "tank")], 4).unwrap();
        let mut b = reg.register("b", vec![hr(10, "level")], 4).unwrap();

        let snapshot = reg.snapshot();
        let outcome = CycleOutcome::Completed(vec![(key(10), Ok(word(10)))]);
        let stats = distribute(&reg, "plc01", 1, 0, &snapshot, &outcome);

        assert_eq!(stats.delivered, 2);

        let update = a.try_recv().unwrap();
        assert_eq!(update.values[0].name, "tank");
        assert_eq!(update.values[0].value.as_ref().unwrap().text, "0x000A");

        let update = b.try_recv().unwrap();
        assert_eq!(update.values[0].name, "level");
        assert!(update.error.is_none());
    }

    #[test]
    fn test_failed_read_delivered_as_bad() {
        let reg = LinkRegistry::new(DeviceFamily::ALL);
        let mut a = reg
            .register("a", vec![hr(1, "ok"), hr(2, "broken"), hr(3, "missing")], 4)
            .unwrap();

        let snapshot = reg.snapshot();
        let outcome = CycleOutcome::Completed(vec![
            (key(1), Ok(word(1))),
            (key(2), Err(Error::decode("exception 0x02"))),
        ]);
        let stats = distribute(&reg, "plc01", 1, 0, &snapshot, &outcome);
        assert_eq!(stats.bad_values, 2);

        let update = a.try_recv().unwrap();
        assert_eq!(update.values.len(), 3);
        assert_eq!(update.get("ok").unwrap().quality, Quality::Good);
        assert_eq!(update.get("broken").unwrap().quality, Quality::Bad);
        assert!(update.get("broken").unwrap().value.is_none());
        assert_eq!(update.get("missing").unwrap().quality, Quality::Bad);
    }

    #[test]
    fn test_failed_cycle_marks_everything_bad() {
        let reg = LinkRegistry::new(DeviceFamily::ALL);
        let mut a = reg.register("a", vec![hr(1, "x"), hr(2, "y")], 4).unwrap();

        let snapshot = reg.snapshot();
        let outcome =
            CycleOutcome::Failed(CycleError::new(ErrorKind::Connection, "modbus com error"));
        distribute(&reg, "plc01", 7, 0, &snapshot, &outcome);

        let update = a.try_recv().unwrap();
        assert_eq!(update.cycle, 7);
        assert_eq!(update.error.as_deref(), Some("modbus com error"));
        assert!(update.values.iter().all(|v| v.quality == Quality::Bad));
    }

    #[test]
    fn test_unregistered_consumer_skipped() {
        let reg = LinkRegistry::new(DeviceFamily::ALL);
        let _a = reg.register("a", vec![hr(1, "x")], 4).unwrap();

        let snapshot = reg.snapshot();
        reg.unregister(&ConsumerId::new("a"));

        let outcome = CycleOutcome::Completed(vec![(key(1), Ok(word(1)))]);
        let stats = distribute(&reg, "plc01", 1, 0, &snapshot, &outcome);
        assert_eq!(stats.delivered, 0);
        assert_eq!(stats.skipped, 1);
    }

    #[test]
    fn test_reregistered_consumer_skipped_for_stale_snapshot() {
        let reg = LinkRegistry::new(DeviceFamily::ALL);
        let _old = reg.register("a", vec![hr(1, "old")], 4).unwrap();

        let snapshot = reg.snapshot();
        let mut new = reg.register("a", vec![hr(2, "new")], 4).unwrap();

        let outcome = CycleOutcome::Completed(vec![(key(1), Ok(word(1)))]);
        let stats = distribute(&reg, "plc01", 1, 0, &snapshot, &outcome);

        assert_eq!(stats.delivered, 0);
        assert_eq!(stats.skipped, 1);
        assert!(new.try_recv().is_err());

        // The next snapshot reaches the new registration.
        let snapshot = reg.snapshot();
        let outcome = CycleOutcome::Completed(vec![(key(2), Ok(word(2)))]);
        distribute(&reg, "plc01", 2, 0, &snapshot, &outcome);
        let update = new.try_recv().unwrap();
        assert_eq!(update.values[0].name, "new");
    }

    #[test]
    fn test_closed_old_receiver_keeps_new_registration() {
        let reg = LinkRegistry::new(DeviceFamily::ALL);
        let old = reg.register("a", vec![hr(1, "x")], 4).unwrap();
        let snapshot = reg.snapshot();

        let _new = reg.register("a", vec![hr(1, "x")], 4).unwrap();
        drop(old);

        let outcome = CycleOutcome::Completed(vec![(key(1), Ok(word(1)))]);
        distribute(&reg, "plc01", 1, 0, &snapshot, &outcome);

        assert!(reg.is_registered(&ConsumerId::new("a")));
        assert_eq!(reg.snapshot().len(), 1);
    }

    #[test]
    fn test_full_queue_drops_update() {
        let reg = LinkRegistry::new(DeviceFamily::ALL);
        let mut a = reg.register("a", vec![hr(1, "x")], 1).unwrap();

        let snapshot = reg.snapshot();
        let outcome = CycleOutcome::Completed(vec![(key(1), Ok(word(1)))]);
        distribute(&reg, "plc01", 1, 0, &snapshot, &outcome);
        let stats = distribute(&reg, "plc01", 2, 0, &snapshot, &outcome);

        assert_eq!(stats.dropped, 1);
        assert_eq!(a.try_recv().unwrap().cycle, 1);
        assert!(a.try_recv().is_err());
    }

    #[test]
    fn test_dropped_receiver_unregisters() {
        let reg = LinkRegistry::new(DeviceFamily::ALL);
        drop(reg.register("a", vec![hr(1, "x")], 4));

        let snapshot = reg.snapshot();
        let outcome = CycleOutcome::Completed(vec![(key(1), Ok(word(1)))]);
        distribute(&reg, "plc01", 1, 0, &snapshot, &outcome);

        assert!(!reg.is_registered(&ConsumerId::new("a")));
        assert!(reg.snapshot().is_empty());
    }
}
