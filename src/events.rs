pub mod catalog;
#[cfg(target_os = "linux")]
mod perf_resolver;
mod synthetic;

#[cfg(target_os = "linux")]
pub use perf_resolver::{PERF_ALIASES, PerfResolver};
pub use synthetic::SyntheticResolver;

use log::{debug, info, warn};
use std::{
    cmp::Ordering,
    collections::{BTreeMap, BTreeSet},
    fmt,
    hash::{Hash, Hasher},
};
use thiserror::Error;

/// Maximum number of hardware counters a [`StampConfig`](crate::StampConfig) can hold.
pub const MAX_COUNTERS: usize = 8;

/// A hardware event, identified by its symbolic `name`.
///
/// `descriptor` is opaque to the engine and only interpreted by an [`EventResolver`].
/// Equality, ordering and hashing consider the name only.
#[derive(Clone, Copy, Debug)]
pub struct Event {
    pub name: &'static str,
    pub descriptor: &'static str,
}

impl Event {
    pub const fn new(name: &'static str, descriptor: &'static str) -> Self {
        Event { name, descriptor }
    }

    /// True for [`NO_EVENT`] and [`NANOS_EVENT`], which never occupy a counter.
    pub fn is_sentinel(&self) -> bool {
        *self == NO_EVENT || *self == NANOS_EVENT
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(other.name)
    }
}

impl Hash for Event {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "event[name={},descriptor={}]", self.name, self.descriptor)
    }
}

/// Explicitly "no event", e.g. the denominator of a non-ratio column.
pub const NO_EVENT: Event = Event::new("none", "");
/// Pseudo-event standing for the wall time of a delta in nanoseconds.
pub const NANOS_EVENT: Event = Event::new("nanos", "nanos");

/// Opaque handle to a counter programmed by an [`EventResolver`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CounterHandle(pub usize);

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("unknown event descriptor {0:?}")]
    UnknownDescriptor(String),
    #[error("failed to program counter: {0}")]
    Program(#[from] std::io::Error),
    #[error("{0}")]
    Rejected(String),
}

/// Turns event descriptors into readable counters.
///
/// Resolving is allowed to fail per event. A failure never affects the other events.
pub trait EventResolver {
    /// Programs the counter described by `event`.
    fn resolve(&mut self, event: &Event) -> Result<CounterHandle, ResolveError>;
    /// Reads the current raw value of a programmed counter.
    fn read(&mut self, handle: CounterHandle) -> u64;
    /// Reads a batch of counters, `dst[i]` receiving the value of `handles[i]`.
    ///
    /// Implementations should make this as tight as possible, it runs between two cycle counter reads.
    fn read_batch(&mut self, handles: &[CounterHandle], dst: &mut [u64]) {
        for (h, d) in handles.iter().zip(dst) {
            *d = self.read(*h);
        }
    }
}

impl EventResolver for Box<dyn EventResolver> {
    fn resolve(&mut self, event: &Event) -> Result<CounterHandle, ResolveError> {
        (**self).resolve(event)
    }

    fn read(&mut self, handle: CounterHandle) -> u64 {
        (**self).read(handle)
    }

    fn read_batch(&mut self, handles: &[CounterHandle], dst: &mut [u64]) {
        (**self).read_batch(handles, dst)
    }
}

/// Multiplexes the [`MAX_COUNTERS`] counter slots across the events requested by columns.
///
/// Events are assigned slots in registration order.
/// After [`prepare`](Self::prepare) the mapping is frozen until another event is added.
pub struct EventManager {
    resolver: Box<dyn EventResolver>,
    event_map: BTreeMap<Event, usize>,
    event_vec: Vec<Event>,
    // requested while all slots were taken
    rejected: BTreeSet<Event>,
    setup_results: Vec<Option<CounterHandle>>,
    // slot and handle of every programmed event, in slot order
    programmed: Vec<(usize, CounterHandle)>,
    programmed_handles: Vec<CounterHandle>,
    prepared: bool,
}

impl EventManager {
    pub fn new(resolver: Box<dyn EventResolver>) -> Self {
        EventManager {
            resolver,
            event_map: BTreeMap::new(),
            event_vec: Vec::new(),
            rejected: BTreeSet::new(),
            setup_results: Vec::new(),
            programmed: Vec::new(),
            programmed_handles: Vec::new(),
            prepared: false,
        }
    }

    /// Requests a slot for `event`.
    ///
    /// Returns `false` only if all slots are taken by other events. Such an event reads as
    /// unavailable afterwards, like an event that failed to program.
    /// Sentinels and already registered events succeed without consuming a slot.
    pub fn add_event(&mut self, event: &Event) -> bool {
        if event.is_sentinel() {
            return true;
        }
        if self.event_map.contains_key(event) {
            return true;
        }
        if self.event_map.len() == MAX_COUNTERS {
            warn!("cannot add {event}: all {MAX_COUNTERS} counter slots are in use");
            self.rejected.insert(*event);
            return false;
        }
        debug!("adding {event}");
        self.prepared = false;
        self.event_map.insert(*event, self.event_vec.len());
        self.event_vec.push(*event);
        true
    }

    /// Programs every registered event that has not been programmed yet.
    ///
    /// Failures are logged and remembered, they are not fatal.
    pub fn prepare(&mut self) {
        debug_assert_eq!(self.event_map.len(), self.event_vec.len());
        for event in &self.event_vec[self.setup_results.len()..] {
            let result = match self.resolver.resolve(event) {
                Ok(handle) => {
                    debug!("programmed {event} as {handle:?}");
                    self.programmed.push((self.setup_results.len(), handle));
                    Some(handle)
                }
                Err(e) => {
                    warn!("failed to program event {:?}: {e}", event.name);
                    None
                }
            };
            self.setup_results.push(result);
        }
        self.programmed_handles = self.programmed.iter().map(|x| x.1).collect();
        let failures = self.setup_results.iter().filter(|x| x.is_none()).count();
        if failures > 0 {
            warn!("{failures} events failed to be configured");
        }
        info!(
            "event manager configured {} events",
            self.setup_results.len() - failures
        );
        self.prepared = true;
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    /// Returns the slot of `event`, or `None` if it was requested but failed to program
    /// or did not fit into the counter slots.
    ///
    /// # Panics
    ///
    /// If called before [`prepare`](Self::prepare) or for an event that was never requested.
    pub fn get_mapping(&self, event: &Event) -> Option<usize> {
        assert!(self.prepared, "event manager queried before prepare()");
        let Some(&slot) = self.event_map.get(event) else {
            if self.rejected.contains(event) {
                return None;
            }
            panic!("counter {} doesn't exist", event.name);
        };
        self.setup_results[slot].map(|_| slot)
    }

    /// Number of registered events, programmed or not.
    pub fn event_count(&self) -> usize {
        self.event_vec.len()
    }

    /// Number of events that were successfully programmed.
    pub fn programmed_count(&self) -> usize {
        self.programmed.len()
    }

    /// Registered events in slot order.
    pub fn events(&self) -> &[Event] {
        &self.event_vec
    }

    /// Reads every programmed counter into its slot of `dst`.
    /// Slots of events that failed to program are left untouched.
    #[inline]
    pub(crate) fn read_counters(&mut self, dst: &mut [u64; MAX_COUNTERS]) {
        let mut raw = [0u64; MAX_COUNTERS];
        let n = self.programmed_handles.len();
        self.resolver
            .read_batch(&self.programmed_handles, &mut raw[..n]);
        for (&(slot, _), value) in self.programmed.iter().zip(raw) {
            dst[slot] = value;
        }
    }
}

#[cfg(test)]
fn test_manager() -> EventManager {
    EventManager::new(Box::new(SyntheticResolver::new(1)))
}

#[cfg(test)]
const TEST_EVENTS: [Event; 9] = [
    Event::new("e0", "e0"),
    Event::new("e1", "e1"),
    Event::new("e2", "e2"),
    Event::new("e3", "e3"),
    Event::new("e4", "e4"),
    Event::new("e5", "e5"),
    Event::new("e6", "e6"),
    Event::new("e7", "e7"),
    Event::new("e8", "e8"),
];

#[test]
fn test_capacity() {
    let mut em = test_manager();
    for e in &TEST_EVENTS[..MAX_COUNTERS] {
        assert!(em.add_event(e));
    }
    assert!(!em.add_event(&TEST_EVENTS[MAX_COUNTERS]));
    assert_eq!(em.event_count(), MAX_COUNTERS);
    em.prepare();
    assert_eq!(em.get_mapping(&TEST_EVENTS[MAX_COUNTERS]), None);
    assert_eq!(em.get_mapping(&TEST_EVENTS[MAX_COUNTERS - 1]), Some(MAX_COUNTERS - 1));
}

#[test]
fn test_sentinels_and_duplicates_are_free() {
    let mut em = test_manager();
    assert!(em.add_event(&TEST_EVENTS[0]));
    assert!(em.add_event(&TEST_EVENTS[0]));
    assert!(em.add_event(&Event::new("e0", "other descriptor")));
    assert!(em.add_event(&NO_EVENT));
    assert!(em.add_event(&NANOS_EVENT));
    assert_eq!(em.event_count(), 1);
    for e in &TEST_EVENTS[1..MAX_COUNTERS] {
        assert!(em.add_event(e));
    }
    assert!(em.add_event(&NO_EVENT));
    assert!(em.add_event(&TEST_EVENTS[3]));
}

#[test]
fn test_mapping_after_prepare() {
    let mut em = EventManager::new(Box::new(
        SyntheticResolver::new(1).failing(["e1"]),
    ));
    em.add_event(&TEST_EVENTS[0]);
    em.add_event(&TEST_EVENTS[1]);
    em.add_event(&TEST_EVENTS[2]);
    em.prepare();
    assert_eq!(em.get_mapping(&TEST_EVENTS[0]), Some(0));
    assert_eq!(em.get_mapping(&TEST_EVENTS[1]), None);
    assert_eq!(em.get_mapping(&TEST_EVENTS[2]), Some(2));
    assert_eq!(em.programmed_count(), 2);
}

#[test]
fn test_failed_slot_keeps_other_slots_aligned() {
    let mut em = EventManager::new(Box::new(
        SyntheticResolver::new(5).failing(["e0"]),
    ));
    em.add_event(&TEST_EVENTS[0]);
    em.add_event(&TEST_EVENTS[1]);
    em.prepare();
    let mut counts = [0; MAX_COUNTERS];
    em.read_counters(&mut counts);
    assert_eq!(counts[0], 0);
    assert_eq!(counts[1], 5);
}

#[test]
#[should_panic(expected = "before prepare")]
fn test_mapping_before_prepare_faults() {
    let mut em = test_manager();
    em.add_event(&TEST_EVENTS[0]);
    em.get_mapping(&TEST_EVENTS[0]);
}

#[test]
#[should_panic(expected = "doesn't exist")]
fn test_unregistered_event_faults() {
    let mut em = test_manager();
    em.add_event(&TEST_EVENTS[0]);
    em.prepare();
    em.get_mapping(&TEST_EVENTS[1]);
}
