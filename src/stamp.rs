use crate::{
    error::SetupError,
    events::{Event, EventManager, EventResolver, MAX_COUNTERS},
    registers::{RegisterManager, RegisterReader, RegisterValues},
    time_source::TimeSource,
};
use log::info;
use std::{fmt, ptr};

/// Threshold policy for the stability check done by [`StampConfig::stamp`].
///
/// A stamp whose two cycle counter reads are more than
/// `base + per_counter * programmed_counters` cycles apart was probably interrupted
/// and is retried, at most `max_retries` times.
/// The defaults suit a recent x86 core reading counters with `rdpmc`, as the perf backend does
/// whenever the kernel allows it. Counters read through a syscall need a much larger `per_counter`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: u64,
    pub per_counter: u64,
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            base: 100,
            per_counter: 50,
            max_retries: 3,
        }
    }
}

impl RetryPolicy {
    pub fn retry_gap(&self, programmed_counters: usize) -> u64 {
        self.base + self.per_counter * programmed_counters as u64
    }
}

/// Everything captured at one point in time: the cycle counter before and after reading
/// the hardware counters, the counters themselves and the configured registers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Stamp {
    t0: u64,
    t1: u64,
    counters: [u64; MAX_COUNTERS],
    registers: RegisterValues,
    retries: u32,
}

impl Stamp {
    /// Cycle counter after the counters were read.
    pub fn cycles(&self) -> u64 {
        self.t1
    }

    /// Cycle counter before the counters were read.
    pub fn entry_cycles(&self) -> u64 {
        self.t0
    }

    /// Cycles spent reading the counters.
    pub fn read_gap(&self) -> u64 {
        self.t1.saturating_sub(self.t0)
    }

    /// How many attempts were discarded before this stamp was accepted.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn registers(&self) -> &RegisterValues {
        &self.registers
    }
}

/// Holds the events and registers to capture and takes [`Stamp`]s.
///
/// Columns register what they need, then [`prepare`](Self::prepare) programs counters and
/// validates registers. Stamps may only be taken after that.
pub struct StampConfig {
    em: EventManager,
    rm: RegisterManager,
    time: TimeSource,
    policy: RetryPolicy,
    retry_gap: u64,
    prepared: bool,
}

impl fmt::Debug for StampConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StampConfig")
            .field("events", &self.em.events())
            .field("registers", &self.rm.register_count())
            .field("policy", &self.policy)
            .field("retry_gap", &self.retry_gap)
            .field("prepared", &self.prepared)
            .finish()
    }
}

impl StampConfig {
    pub fn new(
        resolver: Box<dyn EventResolver>,
        registers: Box<dyn RegisterReader>,
        time: TimeSource,
    ) -> Self {
        StampConfig {
            em: EventManager::new(resolver),
            rm: RegisterManager::new(registers),
            time,
            policy: RetryPolicy::default(),
            retry_gap: 0,
            prepared: false,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self.retry_gap = policy.retry_gap(self.em.programmed_count());
        self
    }

    pub fn add_event(&mut self, event: &Event) -> bool {
        let added = self.em.add_event(event);
        self.prepared &= self.em.is_prepared();
        added
    }

    pub fn add_register(&mut self, address: u32) {
        self.rm.add_register(address);
        self.prepared = false;
    }

    /// Programs the requested events and test-reads the requested registers.
    ///
    /// Events that fail to program only degrade the columns using them.
    /// A register that cannot be read fails the whole setup.
    pub fn prepare(&mut self) -> Result<(), SetupError> {
        self.em.prepare();
        self.rm.prepare()?;
        self.retry_gap = self.policy.retry_gap(self.em.programmed_count());
        info!(
            "stamp config prepared: {} counters, {} registers, retry gap {} cycles",
            self.em.programmed_count(),
            self.rm.register_count(),
            self.retry_gap
        );
        self.prepared = true;
        Ok(())
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    pub fn event_manager(&self) -> &EventManager {
        &self.em
    }

    pub fn register_manager(&self) -> &RegisterManager {
        &self.rm
    }

    pub fn time_source(&self) -> &TimeSource {
        &self.time
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn retry_gap(&self) -> u64 {
        self.retry_gap
    }

    /// Takes a stamp, retrying up to the policy's limit while the counter read looks interrupted.
    ///
    /// The last attempt is accepted whether or not it passed; its [`retries`](Stamp::retries)
    /// records how many attempts were thrown away.
    #[inline]
    pub fn stamp(&mut self) -> Stamp {
        debug_assert!(self.prepared, "stamp taken before prepare()");
        let mut retries = 0;
        loop {
            let mut stamp = Stamp {
                retries,
                ..Stamp::default()
            };
            stamp.t0 = self.time.now();
            self.em.read_counters(&mut stamp.counters);
            stamp.t1 = self.time.now();
            self.rm.do_stamp(&mut stamp.registers);
            if stamp.read_gap() <= self.retry_gap || retries >= self.policy.max_retries {
                return stamp;
            }
            retries += 1;
        }
    }

    /// The change from `before` to `after`, both of which must have been taken by this config.
    pub fn delta<'a>(&'a self, before: &Stamp, after: &Stamp) -> StampDelta<'a> {
        StampDelta {
            config: Some(self),
            cycle_delta: after.t1.wrapping_sub(before.t1),
            counters: calc_delta(&before.counters, &after.counters, self.em.event_count()),
            registers: after.registers,
            retries: after.retries,
        }
    }
}

/// Per-slot difference of two counter snapshots. Slots at and past `limit` are left zero.
fn calc_delta(
    before: &[u64; MAX_COUNTERS],
    after: &[u64; MAX_COUNTERS],
    limit: usize,
) -> [u64; MAX_COUNTERS] {
    let mut ret = [0; MAX_COUNTERS];
    for i in 0..limit.min(MAX_COUNTERS) {
        ret[i] = after[i].wrapping_sub(before[i]);
    }
    ret
}

/// The difference between two stamps taken by the same [`StampConfig`].
///
/// A delta borrows its config for per-event lookups.
/// The [`empty`](Self::empty) delta is the identity of [`apply`](Self::apply), handy as the start of a min/max accumulation.
#[derive(Clone, Copy, Debug)]
pub struct StampDelta<'a> {
    config: Option<&'a StampConfig>,
    cycle_delta: u64,
    counters: [u64; MAX_COUNTERS],
    registers: RegisterValues,
    retries: u32,
}

impl PartialEq for StampDelta<'_> {
    fn eq(&self, other: &Self) -> bool {
        let same_config = match (self.config, other.config) {
            (Some(a), Some(b)) => ptr::eq(a, b),
            (None, None) => true,
            _ => false,
        };
        same_config
            && self.cycle_delta == other.cycle_delta
            && self.counters == other.counters
            && self.registers == other.registers
            && self.retries == other.retries
    }
}

impl Default for StampDelta<'_> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<'a> StampDelta<'a> {
    pub const fn empty() -> Self {
        StampDelta {
            config: None,
            cycle_delta: 0,
            counters: [0; MAX_COUNTERS],
            registers: RegisterValues {
                raw: [0; crate::registers::MAX_REGISTERS],
                count: 0,
            },
            retries: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.config.is_none()
    }

    fn config(&self) -> &'a StampConfig {
        self.config.expect("empty stamp delta has no values")
    }

    pub fn cycles(&self) -> u64 {
        self.config();
        self.cycle_delta
    }

    pub fn nanos(&self) -> f64 {
        self.config().time.to_nanos(self.cycle_delta)
    }

    /// Counter deltas of all registered events, in slot order.
    pub fn counters(&self) -> &[u64] {
        &self.counters[..self.config().em.event_count()]
    }

    /// The delta of `event`, or `None` if it was registered but could not be programmed.
    ///
    /// # Panics
    ///
    /// If `event` was never registered with the config that produced this delta, or is one of
    /// the sentinels, which have no counter. Wall time is available from [`nanos`](Self::nanos).
    pub fn counter(&self, event: &Event) -> Option<u64> {
        assert!(!event.is_sentinel(), "{} has no counter", event.name);
        self.config()
            .em
            .get_mapping(event)
            .map(|slot| self.counters[slot])
    }

    /// Raw value of the register at `address`, as read by the closing stamp.
    ///
    /// # Panics
    ///
    /// If the register was not registered or not read by the closing stamp.
    pub fn register(&self, address: u32) -> u64 {
        self.config().rm.get_value(address, &self.registers)
    }

    /// Retries spent on the closing stamp.
    pub fn retries(&self) -> u32 {
        self.config();
        self.retries
    }

    /// Combines two deltas elementwise with `f`.
    ///
    /// An empty operand is absorbing: the other operand is returned unchanged.
    ///
    /// # Panics
    ///
    /// If both are non-empty and come from different configs.
    pub fn apply(l: &Self, r: &Self, f: impl Fn(u64, u64) -> u64) -> Self {
        let (Some(lc), Some(rc)) = (l.config, r.config) else {
            return if l.is_empty() { *r } else { *l };
        };
        assert!(
            ptr::eq(lc, rc),
            "cannot combine deltas from different stamp configs"
        );
        let mut counters = [0; MAX_COUNTERS];
        for (i, c) in counters.iter_mut().enumerate() {
            *c = f(l.counters[i], r.counters[i]);
        }
        let mut registers = l.registers;
        registers.count = l.registers.count.min(r.registers.count);
        for i in 0..registers.count {
            registers.raw[i] = f(l.registers.raw[i], r.registers.raw[i]);
        }
        StampDelta {
            config: Some(lc),
            cycle_delta: f(l.cycle_delta, r.cycle_delta),
            counters,
            registers,
            retries: f(l.retries as u64, r.retries as u64) as u32,
        }
    }

    pub fn min(l: &Self, r: &Self) -> Self {
        Self::apply(l, r, u64::min)
    }

    pub fn max(l: &Self, r: &Self) -> Self {
        Self::apply(l, r, u64::max)
    }
}

#[cfg(test)]
use crate::{
    events::{CounterHandle, NANOS_EVENT, ResolveError, SyntheticResolver},
    registers::SyntheticRegisters,
};
#[cfg(test)]
use std::{cell::RefCell, collections::VecDeque};

#[cfg(test)]
thread_local! {
    static SCRIPT: RefCell<(VecDeque<u64>, u64)> = RefCell::new((VecDeque::new(), 0));
}

/// Replays the scripted readings, then keeps counting up by one.
#[cfg(test)]
fn scripted_clock() -> u64 {
    SCRIPT.with(|s| {
        let (script, last) = &mut *s.borrow_mut();
        *last = script.pop_front().unwrap_or(*last + 1);
        *last
    })
}

#[cfg(test)]
fn set_script(readings: &[u64]) {
    SCRIPT.with(|s| *s.borrow_mut() = (readings.iter().copied().collect(), 0));
}

#[cfg(test)]
const A: Event = Event::new("a", "a");
#[cfg(test)]
const B: Event = Event::new("b", "b");

#[cfg(test)]
fn config() -> StampConfig {
    let mut sc = StampConfig::new(
        Box::new(SyntheticResolver::new(10).failing(["b"])),
        Box::new(SyntheticRegisters::new().with(0x198, 0x1c00_0000_0000)),
        TimeSource::with_reader(scripted_clock, 1.0),
    );
    sc.add_event(&A);
    sc.add_event(&B);
    sc.add_register(0x198);
    sc.prepare().unwrap();
    sc
}

/// Counters whose every read moves the scripted clock forward by a fixed cost.
#[cfg(test)]
struct SlowResolver {
    cost: u64,
    programmed: usize,
}

#[cfg(test)]
impl EventResolver for SlowResolver {
    fn resolve(&mut self, _event: &Event) -> Result<CounterHandle, ResolveError> {
        self.programmed += 1;
        Ok(CounterHandle(self.programmed - 1))
    }

    fn read(&mut self, _handle: CounterHandle) -> u64 {
        SCRIPT.with(|s| s.borrow_mut().1 += self.cost);
        0
    }
}

#[cfg(test)]
fn slow_config(cost: u64) -> StampConfig {
    let mut sc = StampConfig::new(
        Box::new(SlowResolver {
            cost,
            programmed: 0,
        }),
        Box::new(SyntheticRegisters::new()),
        TimeSource::with_reader(scripted_clock, 1.0),
    );
    sc.add_event(&A);
    sc.add_event(&B);
    sc.prepare().unwrap();
    sc
}

#[test]
fn test_retry_gap_follows_policy() {
    set_script(&[]);
    let sc = config().with_retry_policy(RetryPolicy {
        base: 10,
        per_counter: 3,
        max_retries: 1,
    });
    // only "a" was programmed
    assert_eq!(sc.retry_gap(), 13);
}

#[test]
fn test_noisy_read_is_retried_once() {
    set_script(&[]);
    let mut sc = config();
    set_script(&[0, 10_000, 20_000, 20_001]);
    let stamp = sc.stamp();
    assert_eq!(stamp.retries(), 1);
    assert_eq!(stamp.entry_cycles(), 20_000);
    assert_eq!(stamp.cycles(), 20_001);
}

#[test]
fn test_retries_are_bounded() {
    set_script(&[]);
    let mut sc = config().with_retry_policy(RetryPolicy {
        max_retries: 2,
        ..RetryPolicy::default()
    });
    set_script(&[0, 1000, 2000, 3000, 4000, 5000, 6000, 7000]);
    let stamp = sc.stamp();
    assert_eq!(stamp.retries(), 2);
    assert_eq!(stamp.entry_cycles(), 4000);
    assert_eq!(stamp.read_gap(), 1000);
}

#[test]
fn test_quiet_read_is_accepted() {
    set_script(&[]);
    let mut sc = config();
    let stamp = sc.stamp();
    assert_eq!(stamp.retries(), 0);
    assert_eq!(stamp.registers().as_slice(), &[0x1c00_0000_0000]);
}

#[test]
fn test_read_cost_within_gap_is_not_retried() {
    set_script(&[]);
    // two counters at 60 cycles each against a gap of 100 + 2 * 50
    let mut sc = slow_config(60);
    assert_eq!(sc.retry_gap(), 200);
    for _ in 0..100 {
        let stamp = sc.stamp();
        assert_eq!(stamp.retries(), 0);
        assert_eq!(stamp.read_gap(), 121);
    }
}

#[test]
fn test_syscall_sized_reads_exhaust_retries() {
    set_script(&[]);
    let mut sc = slow_config(1500);
    let stamp = sc.stamp();
    assert_eq!(stamp.retries(), RetryPolicy::default().max_retries);
    assert!(stamp.read_gap() > sc.retry_gap());
}

#[test]
fn test_self_delta_is_zero() {
    set_script(&[]);
    let mut sc = config();
    let s = sc.stamp();
    let d = sc.delta(&s, &s);
    assert_eq!(d.cycles(), 0);
    assert!(d.counters().iter().all(|&c| c == 0));
    assert_eq!(d.counter(&A), Some(0));
}

#[test]
fn test_delta_between_stamps() {
    set_script(&[]);
    let mut sc = config();
    let before = sc.stamp();
    let after = sc.stamp();
    let d = sc.delta(&before, &after);
    assert_eq!(d.cycles(), after.cycles() - before.cycles());
    assert_eq!(d.nanos(), d.cycles() as f64);
    assert_eq!(d.counter(&A), Some(10));
    assert_eq!(d.counter(&B), None);
    assert_eq!(d.register(0x198), 0x1c00_0000_0000);
}

#[test]
fn test_empty_is_identity_for_apply() {
    set_script(&[]);
    let mut sc = config();
    let s0 = sc.stamp();
    let s1 = sc.stamp();
    let s2 = sc.stamp();
    let l = sc.delta(&s0, &s1);
    let r = sc.delta(&s0, &s2);
    let empty = StampDelta::empty();
    assert_eq!(StampDelta::apply(&empty, &r, u64::min), r);
    assert_eq!(StampDelta::apply(&l, &empty, u64::min), l);
    assert!(StampDelta::apply(&empty, &empty, u64::min).is_empty());
    assert_eq!(StampDelta::min(&l, &r).counter(&A), Some(10));
    assert_eq!(StampDelta::max(&l, &r).counter(&A), Some(20));
}

#[test]
#[should_panic(expected = "different stamp configs")]
fn test_combining_configs_faults() {
    set_script(&[]);
    let mut a = config();
    let mut b = config();
    let sa = a.stamp();
    let sb = b.stamp();
    StampDelta::min(&a.delta(&sa, &sa), &b.delta(&sb, &sb));
}

#[test]
#[should_panic(expected = "doesn't exist")]
fn test_unregistered_event_faults() {
    set_script(&[]);
    let mut sc = config();
    let s = sc.stamp();
    sc.delta(&s, &s).counter(&Event::new("c", "c"));
}

#[test]
#[should_panic(expected = "nanos has no counter")]
fn test_nanos_is_not_a_counter() {
    set_script(&[]);
    let mut sc = config();
    let s = sc.stamp();
    sc.delta(&s, &s).counter(&NANOS_EVENT);
}
