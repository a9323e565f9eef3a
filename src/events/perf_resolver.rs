use super::{CounterHandle, Event, EventResolver, ResolveError};
use log::{debug, warn};
use perf_event::{
    Builder, Sampler,
    events::{Cache, CacheId, CacheOp, CacheResult, Hardware, Raw, Software},
};

/// Descriptor aliases understood by [`PerfResolver`], besides raw `rXXXX` codes.
pub const PERF_ALIASES: &[&str] = &[
    "instructions",
    "cycles",
    "ref-cycles",
    "branches",
    "branch-misses",
    "cache-references",
    "cache-misses",
    "l1d-read-miss",
    "task-clock",
];

/// An [`EventResolver`] backed by [`perf_event`] counters on the calling thread.
///
/// Note that this crate uses the `perf-event` crate from the `perf-event2` package, not the `perf-event` package.
///
/// Descriptors are either one of [`PERF_ALIASES`] or a raw PMU encoding written as
/// `r` followed by hex digits (`event | umask << 8 | cmask << 24`), as accepted by `perf stat`.
/// Counters are enabled as soon as they are resolved and keep running for the lifetime of the resolver.
///
/// Every counter is memory mapped and read with `rdpmc` from user space. Only when the kernel
/// denies that for a counter is it read with a `read(2)` syscall, which is slow enough to fail
/// most stability checks of [`StampConfig::stamp`](crate::StampConfig::stamp).
pub struct PerfResolver {
    counters: Vec<PerfCounter>,
}

struct PerfCounter {
    sampler: Sampler,
    user_read: bool,
}

impl PerfCounter {
    #[inline]
    fn read(&mut self) -> u64 {
        let user = match self.user_read {
            true => self.sampler.read_user().count(),
            false => None,
        };
        // a counter that stops being readable reports zero growth rather than aborting a sample
        user.unwrap_or_else(|| self.sampler.read().unwrap_or(0))
    }
}

impl Default for PerfResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl PerfResolver {
    pub fn new() -> Self {
        PerfResolver {
            counters: Vec::new(),
        }
    }

    /// True if every resolved counter is read from user space.
    pub fn user_reads(&self) -> bool {
        self.counters.iter().all(|c| c.user_read)
    }

    fn open(descriptor: &str) -> Result<Sampler, ResolveError> {
        // Keep this clean. Users are expected to read this match statement
        // to discover available descriptors.
        let builder = match descriptor {
            "instructions" => Builder::new(Hardware::INSTRUCTIONS),
            "cycles" => Builder::new(Hardware::CPU_CYCLES),
            "ref-cycles" => Builder::new(Hardware::REF_CPU_CYCLES),
            "branches" => Builder::new(Hardware::BRANCH_INSTRUCTIONS),
            "branch-misses" => Builder::new(Hardware::BRANCH_MISSES),
            "cache-references" => Builder::new(Hardware::CACHE_REFERENCES),
            "cache-misses" => Builder::new(Hardware::CACHE_MISSES),
            "l1d-read-miss" => Builder::new(Cache {
                which: CacheId::L1D,
                operation: CacheOp::READ,
                result: CacheResult::MISS,
            }),
            "task-clock" => Builder::new(Software::TASK_CLOCK),
            raw => {
                let config = raw
                    .strip_prefix('r')
                    .and_then(|hex| u64::from_str_radix(hex, 16).ok())
                    .ok_or_else(|| ResolveError::UnknownDescriptor(raw.to_string()))?;
                Builder::new(Raw::new(config))
            }
        };
        // the smallest mapping, only the control page is used
        Ok(builder.build()?.sampled(0)?)
    }
}

impl EventResolver for PerfResolver {
    fn resolve(&mut self, event: &Event) -> Result<CounterHandle, ResolveError> {
        let mut sampler = Self::open(event.descriptor)?;
        sampler.reset()?;
        sampler.enable()?;
        let user_read = sampler.read_user().count().is_some();
        if user_read {
            debug!(
                "opened perf counter for {:?} ({}), read with rdpmc",
                event.name, event.descriptor
            );
        } else {
            warn!(
                "rdpmc is not available for {:?} ({}), falling back to read(2); expect stamps to be retried",
                event.name, event.descriptor
            );
        }
        self.counters.push(PerfCounter { sampler, user_read });
        Ok(CounterHandle(self.counters.len() - 1))
    }

    fn read(&mut self, handle: CounterHandle) -> u64 {
        self.counters[handle.0].read()
    }

    fn read_batch(&mut self, handles: &[CounterHandle], dst: &mut [u64]) {
        for (h, d) in handles.iter().zip(dst) {
            *d = self.counters[h.0].read();
        }
    }
}

#[test]
fn test_unknown_descriptor() {
    let mut r = PerfResolver::new();
    let err = r
        .resolve(&Event::new("bogus", "not-an-event"))
        .unwrap_err();
    assert!(matches!(err, ResolveError::UnknownDescriptor(_)));
    assert!(matches!(
        r.resolve(&Event::new("bogus", "rzz")),
        Err(ResolveError::UnknownDescriptor(_))
    ));
}

#[test]
fn test_user_space_reads() {
    use crate::{StampConfig, TimeSource, registers::SyntheticRegisters};

    let mut r = PerfResolver::new();
    let Ok(handle) = r.resolve(&Event::new("INSTRU", "instructions")) else {
        // no perf_event_open here, e.g. in a container
        return;
    };
    let a = r.read(handle);
    let b = r.read(handle);
    assert!(b >= a);
    if !r.user_reads() {
        return;
    }
    let mut sc = StampConfig::new(
        Box::new(r),
        Box::new(SyntheticRegisters::new()),
        TimeSource::new(),
    );
    sc.add_event(&Event::new("INSTRU", "instructions"));
    sc.prepare().unwrap();
    let quiet = (0..100).filter(|_| sc.stamp().retries() == 0).count();
    assert!(quiet >= 90, "only {quiet} of 100 stamps passed the stability check");
}
