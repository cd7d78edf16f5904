//! Link registry: per-connection set of consumer bindings.
//!
//! The registry records which [`AddressBinding`]s each consumer contributed
//! and keeps an interest index keyed by [`ReadKey`], so that the polling
//! engine can build a de-duplicated batch at the start of every cycle. A
//! key stays in the index for as long as at least one live consumer
//! references it.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::mpsc;

use plclink_common::{AddressBinding, ConsumerId, DeviceFamily, RawBinding, ReadKey, ValueUpdate};

use crate::adapter::ProtocolAdapter;

/// Default depth of a consumer's delivery queue.
pub const DEFAULT_DELIVERY_CAPACITY: usize = 64;

/// A consumer's interest in one read key, under its own display name.
///
/// `generation` identifies the registration that contributed the interest;
/// re-registering the same id yields a new generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interest {
    pub consumer: ConsumerId,
    pub generation: u64,
    pub name: String,
    pub unit: Option<String>,
}

/// One de-duplicated read and everyone who wants its result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    pub key: ReadKey,
    pub interests: Vec<Interest>,
}

/// Point-in-time, immutable copy of the registry's read set.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    requests: Vec<ReadRequest>,
}

impl Snapshot {
    /// Requests ordered by family, address and quantity.
    pub fn requests(&self) -> &[ReadRequest] {
        &self.requests
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Distinct consumers referenced by this snapshot.
    pub fn consumers(&self) -> HashSet<&ConsumerId> {
        self.requests
            .iter()
            .flat_map(|r| r.interests.iter().map(|i| &i.consumer))
            .collect()
    }
}

struct ConsumerEntry {
    generation: u64,
    bindings: Vec<AddressBinding>,
    sink: mpsc::Sender<ValueUpdate>,
}

#[derive(Default)]
struct RegistryInner {
    consumers: HashMap<ConsumerId, ConsumerEntry>,
    interest: BTreeMap<ReadKey, Vec<Interest>>,
    next_generation: u64,
}

impl RegistryInner {
    fn remove(&mut self, consumer: &ConsumerId) -> bool {
        let Some(entry) = self.consumers.remove(consumer) else {
            return false;
        };

        for binding in &entry.bindings {
            let key = binding.key();
            if let Some(interests) = self.interest.get_mut(&key) {
                interests.retain(|i| &i.consumer != consumer);
                if interests.is_empty() {
                    self.interest.remove(&key);
                }
            }
        }

        true
    }
}

/// Shared handle to the bindings registered on one link.
///
/// Cloning is cheap; all clones observe the same state. No method performs
/// I/O, so registration never waits on the connection.
#[derive(Clone)]
pub struct LinkRegistry {
    inner: Arc<RwLock<RegistryInner>>,
    supported: Arc<[DeviceFamily]>,
}

impl LinkRegistry {
    /// Create an empty registry accepting the given device families.
    pub fn new(supported: impl IntoIterator<Item = DeviceFamily>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(RegistryInner::default())),
            supported: supported.into_iter().collect(),
        }
    }

    /// Create an empty registry accepting the families `adapter` can read.
    pub fn for_adapter(adapter: &impl ProtocolAdapter) -> Self {
        Self::new(
            DeviceFamily::ALL
                .into_iter()
                .filter(|family| adapter.supports(*family)),
        )
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn supports(&self, family: DeviceFamily) -> bool {
        self.supported.contains(&family)
    }

    /// Register a consumer's bindings.
    ///
    /// Bindings of unsupported families and exact duplicates are dropped.
    /// Returns the receiving end of the consumer's delivery queue, or `None`
    /// when nothing is left to register (no entry is created in that case).
    /// Registering an id that already exists replaces its bindings and queue.
    pub fn register(
        &self,
        consumer: impl Into<ConsumerId>,
        bindings: impl IntoIterator<Item = AddressBinding>,
        capacity: usize,
    ) -> Option<mpsc::Receiver<ValueUpdate>> {
        let consumer = consumer.into();

        let mut seen = HashSet::new();
        let mut accepted = Vec::new();
        for binding in bindings {
            if !self.supports(binding.family) {
                tracing::debug!(
                    consumer = %consumer,
                    family = %binding.family,
                    address = binding.address,
                    "Dropping binding for unsupported device family"
                );
                continue;
            }
            if seen.insert(binding.clone()) {
                accepted.push(binding);
            }
        }

        if accepted.is_empty() {
            tracing::debug!(consumer = %consumer, "No usable bindings, consumer not registered");
            return None;
        }

        let (sink, receiver) = mpsc::channel(capacity.max(1));

        let mut inner = self.write();
        if inner.remove(&consumer) {
            tracing::debug!(consumer = %consumer, "Replacing existing registration");
        }

        inner.next_generation += 1;
        let generation = inner.next_generation;

        for binding in &accepted {
            inner
                .interest
                .entry(binding.key())
                .or_default()
                .push(Interest {
                    consumer: consumer.clone(),
                    generation,
                    name: binding.name.clone(),
                    unit: binding.unit.clone(),
                });
        }

        tracing::debug!(
            consumer = %consumer,
            bindings = accepted.len(),
            keys = inner.interest.len(),
            "Registered consumer"
        );

        inner.consumers.insert(
            consumer,
            ConsumerEntry {
                generation,
                bindings: accepted,
                sink,
            },
        );

        Some(receiver)
    }

    /// Register untyped bindings, silently dropping any that do not parse.
    pub fn register_raw(
        &self,
        consumer: impl Into<ConsumerId>,
        bindings: impl IntoIterator<Item = RawBinding>,
        capacity: usize,
    ) -> Option<mpsc::Receiver<ValueUpdate>> {
        let consumer = consumer.into();
        let parsed: Vec<AddressBinding> = bindings
            .into_iter()
            .filter_map(|raw| match AddressBinding::try_from(raw) {
                Ok(binding) => Some(binding),
                Err(e) => {
                    tracing::debug!(consumer = %consumer, error = %e, "Dropping binding");
                    None
                }
            })
            .collect();

        self.register(consumer, parsed, capacity)
    }

    /// Remove a consumer and exactly its own bindings.
    ///
    /// Returns `false` if the consumer was not registered.
    pub fn unregister(&self, consumer: &ConsumerId) -> bool {
        let removed = self.write().remove(consumer);
        if removed {
            tracing::debug!(consumer = %consumer, "Unregistered consumer");
        }
        removed
    }

    /// Build the de-duplicated read set for the next cycle.
    pub fn snapshot(&self) -> Snapshot {
        let inner = self.read();
        Snapshot {
            requests: inner
                .interest
                .iter()
                .map(|(key, interests)| ReadRequest {
                    key: *key,
                    interests: interests.clone(),
                })
                .collect(),
        }
    }

    pub fn is_registered(&self, consumer: &ConsumerId) -> bool {
        self.read().consumers.contains_key(consumer)
    }

    pub fn consumer_count(&self) -> usize {
        self.read().consumers.len()
    }

    /// Bindings currently registered for a consumer.
    pub fn bindings(&self, consumer: &ConsumerId) -> Option<Vec<AddressBinding>> {
        self.read()
            .consumers
            .get(consumer)
            .map(|entry| entry.bindings.clone())
    }

    /// Delivery queue of a consumer, if `generation` is still its live
    /// registration.
    pub(crate) fn sink(
        &self,
        consumer: &ConsumerId,
        generation: u64,
    ) -> Option<mpsc::Sender<ValueUpdate>> {
        self.read()
            .consumers
            .get(consumer)
            .filter(|entry| entry.generation == generation)
            .map(|entry| entry.sink.clone())
    }

    /// Remove a consumer only if `generation` is still its live registration.
    pub(crate) fn unregister_generation(&self, consumer: &ConsumerId, generation: u64) -> bool {
        let mut inner = self.write();
        let live = inner
            .consumers
            .get(consumer)
            .is_some_and(|entry| entry.generation == generation);
        let removed = live && inner.remove(consumer);
        if removed {
            tracing::debug!(consumer = %consumer, generation, "Unregistered consumer");
        }
        removed
    }
}

impl std::fmt::Debug for LinkRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.read();
        f.debug_struct("LinkRegistry")
            .field("consumers", &inner.consumers.len())
            .field("keys", &inner.interest.len())
            .field("supported", &self.supported)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hr(address: u16, name: &str) -> AddressBinding {
        AddressBinding::new(DeviceFamily::HoldingRegister, address, 1, name).unwrap()
    }

    fn coil(address: u16, name: &str) -> AddressBinding {
        AddressBinding::new(DeviceFamily::Coil, address, 1, name).unwrap()
    }

    fn registry() -> LinkRegistry {
        LinkRegistry::new(DeviceFamily::ALL)
    }

    #[test]
    fn test_register_and_snapshot() {
        let reg = registry();
        let rx = reg.register("a", vec![hr(0, "level"), coil(3, "pump")], 8);

        assert!(rx.is_some());
        assert_eq!(reg.consumer_count(), 1);

        let snapshot = reg.snapshot();
        assert_eq!(snapshot.len(), 2);
        // Ordered by family first.
        assert_eq!(snapshot.requests()[0].key.family, DeviceFamily::Coil);
        assert_eq!(snapshot.requests()[1].key.family, DeviceFamily::HoldingRegister);
    }

    #[test]
    fn test_shared_address_read_once() {
        let reg = registry();
        let _a = reg.register("a", vec![hr(10, "tank_a")], 8);
        let _b = reg.register("b", vec![hr(10, "tank_b")], 8);

        let snapshot = reg.snapshot();
        assert_eq!(snapshot.len(), 1);

        let names: Vec<_> = snapshot.requests()[0]
            .interests
            .iter()
            .map(|i| i.name.as_str())
            .collect();
        assert_eq!(names, vec!["tank_a", "tank_b"]);
    }

    #[test]
    fn test_unregister_keeps_shared_address() {
        let reg = registry();
        let _a = reg.register("a", vec![hr(10, "x"), hr(11, "only_a")], 8);
        let _b = reg.register("b", vec![hr(10, "x")], 8);

        assert!(reg.unregister(&ConsumerId::new("a")));

        let snapshot = reg.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.requests()[0].key.address, 10);
        assert_eq!(snapshot.requests()[0].interests.len(), 1);
        assert_eq!(
            snapshot.requests()[0].interests[0].consumer,
            ConsumerId::new("b")
        );
    }

    #[test]
    fn test_unregister_idempotent() {
        let reg = registry();
        let _a = reg.register("a", vec![hr(1, "x")], 8);

        assert!(reg.unregister(&ConsumerId::new("a")));
        assert!(!reg.unregister(&ConsumerId::new("a")));
        assert!(!reg.unregister(&ConsumerId::new("never")));
        assert!(reg.snapshot().is_empty());
    }

    #[test]
    fn test_no_leak_after_random_sequence() {
        let reg = registry();
        let mut live: HashMap<String, Vec<AddressBinding>> = HashMap::new();
        let mut receivers = Vec::new();

        // Deterministic pseudo-random walk over register/unregister calls.
        let mut state: u32 = 0x2545_F491;
        for _ in 0..500 {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;

            let id = format!("c{}", state % 7);
            if state % 3 == 0 {
                reg.unregister(&ConsumerId::new(id.clone()));
                live.remove(&id);
            } else {
                let bindings = vec![
                    hr((state % 5) as u16, "a"),
                    coil((state % 4) as u16, "b"),
                ];
                receivers.push(reg.register(id.clone(), bindings.clone(), 1));
                live.insert(id, bindings);
            }

            let expected: HashSet<ReadKey> =
                live.values().flatten().map(AddressBinding::key).collect();
            let actual: HashSet<ReadKey> =
                reg.snapshot().requests().iter().map(|r| r.key).collect();
            assert_eq!(actual, expected);
        }
    }

    #[test]
    fn test_unsupported_family_dropped() {
        let reg = LinkRegistry::new([DeviceFamily::HoldingRegister]);

        let rx = reg.register("a", vec![coil(1, "pump"), hr(2, "level")], 8);
        assert!(rx.is_some());
        assert_eq!(reg.bindings(&ConsumerId::new("a")).unwrap().len(), 1);

        let rx = reg.register("b", vec![coil(1, "pump")], 8);
        assert!(rx.is_none());
        assert!(!reg.is_registered(&ConsumerId::new("b")));
    }

    #[test]
    fn test_register_raw_filters_invalid() {
        let reg = registry();
        let raw = vec![
            RawBinding {
                device: "HR".to_string(),
                address: 4,
                quantity: 1,
                name: "speed".to_string(),
                unit: Some("rpm".to_string()),
            },
            RawBinding {
                device: "error".to_string(),
                address: 0,
                quantity: 1,
                name: "marker".to_string(),
                unit: None,
            },
            RawBinding {
                device: "IR".to_string(),
                address: 9,
                quantity: 0,
                name: "empty".to_string(),
                unit: None,
            },
        ];

        assert!(reg.register_raw("a", raw, 8).is_some());
        let bindings = reg.bindings(&ConsumerId::new("a")).unwrap();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].name, "speed");

        let only_invalid = vec![RawBinding {
            device: "DB".to_string(),
            address: 0,
            quantity: 1,
            name: "x".to_string(),
            unit: None,
        }];
        assert!(reg.register_raw("b", only_invalid, 8).is_none());
        assert_eq!(reg.consumer_count(), 1);
    }

    #[test]
    fn test_reregister_replaces() {
        let reg = registry();
        let mut first = reg.register("a", vec![hr(1, "old")], 8).unwrap();
        let _second = reg.register("a", vec![hr(2, "new")], 8).unwrap();

        let snapshot = reg.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.requests()[0].key.address, 2);

        // The replaced queue is closed.
        assert!(matches!(
            first.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_reregister_bumps_generation() {
        let reg = registry();
        let _first = reg.register("a", vec![hr(1, "old")], 8).unwrap();
        let old = reg.snapshot().requests()[0].interests[0].generation;

        let _second = reg.register("a", vec![hr(2, "new")], 8).unwrap();
        let new = reg.snapshot().requests()[0].interests[0].generation;
        assert_ne!(old, new);

        let id = ConsumerId::new("a");
        assert!(reg.sink(&id, old).is_none());
        assert!(reg.sink(&id, new).is_some());

        assert!(!reg.unregister_generation(&id, old));
        assert!(reg.is_registered(&id));
        assert!(reg.unregister_generation(&id, new));
        assert!(reg.snapshot().is_empty());
    }

    #[test]
    fn test_duplicate_bindings_collapse() {
        let reg = registry();
        let _rx = reg.register("a", vec![hr(1, "x"), hr(1, "x")], 8);

        let snapshot = reg.snapshot();
        assert_eq!(snapshot.requests()[0].interests.len(), 1);
    }

    #[test]
    fn test_snapshot_is_immutable_copy() {
        let reg = registry();
        let _a = reg.register("a", vec![hr(1, "x")], 8);

        let snapshot = reg.snapshot();
        reg.unregister(&ConsumerId::new("a"));
        let _b = reg.register("b", vec![hr(7, "y")], 8);

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.requests()[0].key.address, 1);
        assert!(snapshot.consumers().contains(&ConsumerId::new("a")));
    }
}
