use super::{CounterHandle, Event, EventResolver, ResolveError};
use std::collections::HashSet;

/// An [`EventResolver`] without hardware behind it.
///
/// Every counter advances by a fixed increment each time it is read, so deltas between
/// consecutive stamps are predictable. Events listed via [`failing`](Self::failing)
/// are rejected at resolve time, like counters the PMU could not schedule.
///
/// Select it with `STAMP_BACKEND=synthetic` for a dry run on machines without perf access.
pub struct SyntheticResolver {
    increment: u64,
    failing: HashSet<String>,
    counters: Vec<u64>,
}

impl SyntheticResolver {
    pub fn new(increment: u64) -> Self {
        SyntheticResolver {
            increment,
            failing: HashSet::new(),
            counters: Vec::new(),
        }
    }

    /// Makes resolving any of the named events fail.
    pub fn failing<'a>(mut self, names: impl IntoIterator<Item = &'a str>) -> Self {
        self.failing.extend(names.into_iter().map(str::to_string));
        self
    }
}

impl EventResolver for SyntheticResolver {
    fn resolve(&mut self, event: &Event) -> Result<CounterHandle, ResolveError> {
        if self.failing.contains(event.name) {
            return Err(ResolveError::Rejected(format!(
                "synthetic failure for {:?}",
                event.name
            )));
        }
        self.counters.push(0);
        Ok(CounterHandle(self.counters.len() - 1))
    }

    fn read(&mut self, handle: CounterHandle) -> u64 {
        let c = &mut self.counters[handle.0];
        *c += self.increment;
        *c
    }
}

#[test]
fn test_synthetic_counts() {
    let mut r = SyntheticResolver::new(3).failing(["bad"]);
    let a = r.resolve(&Event::new("a", "a")).unwrap();
    assert!(r.resolve(&Event::new("bad", "bad")).is_err());
    let b = r.resolve(&Event::new("b", "b")).unwrap();
    assert_eq!(r.read(a), 3);
    assert_eq!(r.read(a), 6);
    let mut dst = [0; 2];
    r.read_batch(&[a, b], &mut dst);
    assert_eq!(dst, [9, 3]);
}
