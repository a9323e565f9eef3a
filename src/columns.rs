use crate::{
    error::{ColFailed, ConfigError},
    events::{Event, NANOS_EVENT, NO_EVENT, catalog::*},
    registers::extract_bits,
    stamp::{StampConfig, StampDelta},
};
use log::warn;

/// How a column value is made independent of the amount of work measured.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NormMode {
    /// No normalization, e.g. because the value is a ratio.
    None,
    /// Per element of input.
    Instrument,
    /// Per element and per inner iteration.
    Full,
    /// Per inner iteration only.
    ItersOnly,
}

/// Immutable metadata of a run, used for normalization.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunInfo {
    pub elements: usize,
    pub iterations: usize,
}

/// One completed measurement as seen by a column.
#[derive(Clone, Copy, Debug)]
pub struct BenchResults<'a> {
    pub delta: StampDelta<'a>,
    pub info: RunInfo,
}

/// Extracts the value of a custom column.
pub type Extractor = fn(&BenchResults<'_>) -> Result<f64, ColFailed>;

/// A bit field of a model-specific register, scaled to a physical unit.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RegisterSlice {
    pub address: u32,
    pub start: u32,
    pub stop: u32,
    pub scale: f64,
}

impl RegisterSlice {
    pub fn value(&self, raw: u64) -> f64 {
        extract_bits(raw, self.start, self.stop) as f64 * self.scale
    }
}

#[derive(Clone, Copy, Debug)]
pub enum ColumnKind {
    /// `top / bottom`.
    Ratio { top: Event, bottom: Event },
    /// A single event.
    Event(Event),
    /// A slice of a register as read by the closing stamp.
    Register(RegisterSlice),
    Custom(Extractor),
}

/// Something that can be printed as one column: knows which events and registers it needs,
/// and how to turn a [`StampDelta`] into a number.
#[derive(Clone, Copy, Debug)]
pub struct Column {
    heading: &'static str,
    precision: usize,
    norm: NormMode,
    post_output: bool,
    kind: ColumnKind,
}

impl Column {
    /// A ratio of two events, or a single normalized event if `bottom` is [`NO_EVENT`].
    pub const fn ratio(heading: &'static str, precision: usize, top: Event, bottom: Event) -> Self {
        if is_no_event(bottom) {
            return Self::event(heading, precision, top);
        }
        Column {
            heading,
            precision,
            norm: NormMode::None,
            post_output: false,
            kind: ColumnKind::Ratio { top, bottom },
        }
    }

    pub const fn event(heading: &'static str, precision: usize, event: Event) -> Self {
        Column {
            heading,
            precision,
            norm: NormMode::Full,
            post_output: false,
            kind: ColumnKind::Event(event),
        }
    }

    pub const fn register(heading: &'static str, precision: usize, slice: RegisterSlice) -> Self {
        Column {
            heading,
            precision,
            norm: NormMode::None,
            post_output: false,
            kind: ColumnKind::Register(slice),
        }
    }

    pub const fn custom(
        heading: &'static str,
        precision: usize,
        norm: NormMode,
        extractor: Extractor,
    ) -> Self {
        Column {
            heading,
            precision,
            norm,
            post_output: false,
            kind: ColumnKind::Custom(extractor),
        }
    }

    pub const fn with_norm(mut self, norm: NormMode) -> Self {
        self.norm = norm;
        self
    }

    /// Marks the column to be printed after each repeat instead of inside the sample table.
    pub const fn post_output(mut self) -> Self {
        self.post_output = true;
        self
    }

    pub fn heading(&self) -> &'static str {
        self.heading
    }

    pub fn precision(&self) -> usize {
        self.precision
    }

    pub fn norm_mode(&self) -> NormMode {
        self.norm
    }

    pub fn is_post_output(&self) -> bool {
        self.post_output
    }

    pub fn kind(&self) -> &ColumnKind {
        &self.kind
    }

    /// Registers the events and registers this column reads.
    ///
    /// Returns `false` if an event did not fit into the counter slots, in which case
    /// the column will only produce NaN.
    pub fn update_config(&self, sc: &mut StampConfig) -> bool {
        let ok = match &self.kind {
            ColumnKind::Ratio { top, bottom } => sc.add_event(top) & sc.add_event(bottom),
            ColumnKind::Event(e) => sc.add_event(e),
            ColumnKind::Register(slice) => {
                sc.add_register(slice.address);
                true
            }
            ColumnKind::Custom(_) => true,
        };
        if !ok {
            warn!("column {} is out of counter slots and will be empty", self.heading);
        }
        ok
    }

    fn raw_value(&self, results: &BenchResults<'_>) -> Result<f64, ColFailed> {
        match &self.kind {
            ColumnKind::Ratio { top, bottom } => {
                Ok(event_value(&results.delta, top)? / event_value(&results.delta, bottom)?)
            }
            ColumnKind::Event(e) => event_value(&results.delta, e),
            ColumnKind::Register(slice) => Ok(slice.value(results.delta.register(slice.address))),
            ColumnKind::Custom(f) => f(results),
        }
    }

    pub fn norm_divisor(&self, info: &RunInfo) -> f64 {
        match self.norm {
            NormMode::None => 1.0,
            NormMode::Instrument => info.elements as f64,
            NormMode::Full => (info.iterations * info.elements) as f64,
            NormMode::ItersOnly => info.iterations as f64,
        }
    }

    /// The normalized value, or the failure to render in its place.
    pub fn value(&self, results: &BenchResults<'_>) -> Result<f64, ColFailed> {
        Ok(self.raw_value(results)? / self.norm_divisor(&results.info))
    }

    /// The normalized value, NaN if the column failed.
    pub fn final_value(&self, results: &BenchResults<'_>) -> f64 {
        self.value(results).unwrap_or(f64::NAN)
    }

    /// Renders a value with this column's precision: `-` for NaN, the placeholder for failures.
    pub fn format_value(&self, value: &Result<f64, ColFailed>) -> String {
        match value {
            Ok(v) if v.is_nan() => "-".to_string(),
            Ok(v) => format!("{v:.prec$}", prec = self.precision),
            Err(failed) => failed.placeholder.clone(),
        }
    }
}

const fn is_no_event(e: Event) -> bool {
    let (a, b) = (e.name.as_bytes(), NO_EVENT.name.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    let mut i = 0;
    while i < a.len() {
        if a[i] != b[i] {
            return false;
        }
        i += 1;
    }
    true
}

fn event_value(delta: &StampDelta<'_>, e: &Event) -> Result<f64, ColFailed> {
    if *e == NANOS_EVENT {
        return Ok(delta.nanos());
    }
    if *e == NO_EVENT {
        return Ok(1.0);
    }
    delta
        .counter(e)
        .map(|v| v as f64)
        .ok_or_else(|| ColFailed::new("fail"))
}

pub const BASIC_COLUMNS: &[Column] = &[
    Column::custom("Cycles", 2, NormMode::Full, |r| Ok(r.delta.cycles() as f64)),
    Column::custom("Nanos", 2, NormMode::Full, |r| Ok(r.delta.nanos())),
    Column::custom("Retries", 0, NormMode::None, |r| Ok(r.delta.retries() as f64)),
];

pub const EVENT_COLUMNS: &[Column] = &[
    Column::ratio("INSTRU", 2, INST_RETIRED_ANY, NO_EVENT),
    Column::ratio("IPC", 2, INST_RETIRED_ANY, CPU_CLK_UNHALTED_THREAD),
    Column::ratio("UPC", 2, UOPS_ISSUED_ANY, CPU_CLK_UNHALTED_THREAD),
    Column::ratio("UOPS", 2, UOPS_ISSUED_ANY, NO_EVENT),
    Column::ratio("MLP1A", 2, L1D_PEND_MISS_PENDING, CPU_CLK_UNHALTED_THREAD),
    Column::ratio("MLP1B", 2, L1D_PEND_MISS_PENDING, L1D_PEND_MISS_PENDING_CYCLES),
    Column::ratio("LAT", 0, L1D_PEND_MISS_PENDING, MEM_LOAD_RETIRED_L1_MISS),
    Column::ratio("LOADO %", 2, L1D_PEND_MISS_PENDING_CYCLES, CPU_CLK_UNHALTED_THREAD),
    Column::ratio("ALL_LOAD", 2, MEM_INST_RETIRED_ALL_LOADS, NO_EVENT),
    Column::ratio("L1_MISS", 1, MEM_LOAD_RETIRED_L1_MISS, NO_EVENT),
    Column::ratio("L1_REPL", 1, L1D_REPLACEMENT, NO_EVENT),
    Column::ratio("BR_MISS", 2, BRANCH_MISSES, NO_EVENT),
    Column::ratio("Unhalt_GHz", 3, CPU_CLK_UNHALTED_THREAD, NANOS_EVENT),
    Column::ratio("REF_GHz", 3, CPU_CLK_UNHALTED_REF_TSC, NANOS_EVENT),
    Column::ratio("P0", 2, UOPS_DISPATCHED_PORT_0, NO_EVENT),
    Column::ratio("P1", 2, UOPS_DISPATCHED_PORT_1, NO_EVENT),
    Column::ratio("P2", 2, UOPS_DISPATCHED_PORT_2, NO_EVENT),
    Column::ratio("P3", 2, UOPS_DISPATCHED_PORT_3, NO_EVENT),
    Column::ratio("P4", 2, UOPS_DISPATCHED_PORT_4, NO_EVENT),
    Column::ratio("P5", 2, UOPS_DISPATCHED_PORT_5, NO_EVENT),
    Column::ratio("P6", 2, UOPS_DISPATCHED_PORT_6, NO_EVENT),
    Column::ratio("P7", 2, UOPS_DISPATCHED_PORT_7, NO_EVENT),
];

/// IA32_PERF_STATUS
pub const MSR_PERF_STATUS: u32 = 0x198;

pub const REGISTER_COLUMNS: &[Column] = &[
    Column::register(
        "Volts",
        3,
        RegisterSlice {
            address: MSR_PERF_STATUS,
            start: 32,
            stop: 47,
            scale: 1.0 / 8192.0,
        },
    ),
    Column::register(
        "Mult",
        0,
        RegisterSlice {
            address: MSR_PERF_STATUS,
            start: 8,
            stop: 15,
            scale: 1.0,
        },
    ),
];

/// Every built-in column.
pub fn all_columns() -> impl Iterator<Item = &'static Column> {
    BASIC_COLUMNS
        .iter()
        .chain(EVENT_COLUMNS)
        .chain(REGISTER_COLUMNS)
}

pub fn by_name(name: &str) -> Option<&'static Column> {
    all_columns().find(|c| c.heading == name)
}

/// Looks up a comma separated list of column names. Empty entries are skipped.
pub fn by_list(list: &str) -> Result<Vec<Column>, ConfigError> {
    list.split(',')
        .map(str::trim)
        .filter(|x| !x.is_empty())
        .map(|name| {
            by_name(name)
                .copied()
                .ok_or_else(|| ConfigError::UnknownColumn(name.to_string()))
        })
        .collect()
}

#[cfg(test)]
use crate::{
    events::SyntheticResolver, registers::SyntheticRegisters, time_source::TimeSource,
};

#[cfg(test)]
fn counting_clock() -> u64 {
    thread_local!(static NOW: std::cell::Cell<u64> = const { std::cell::Cell::new(0) });
    NOW.with(|n| {
        n.set(n.get() + 1);
        n.get()
    })
}

#[cfg(test)]
const TOP: Event = Event::new("top", "top");
#[cfg(test)]
const BOTTOM: Event = Event::new("bottom", "bottom");
#[cfg(test)]
const BROKEN: Event = Event::new("broken", "broken");

#[cfg(test)]
fn config(increment: u64) -> StampConfig {
    StampConfig::new(
        Box::new(SyntheticResolver::new(increment).failing(["broken"])),
        Box::new(SyntheticRegisters::new().with(MSR_PERF_STATUS, 0x0000_2000_0000_2a00)),
        TimeSource::with_reader(counting_clock, 1.0),
    )
}

#[cfg(test)]
fn configure(sc: &mut StampConfig, columns: &[Column]) {
    for c in columns {
        c.update_config(sc);
    }
    sc.prepare().unwrap();
}

#[cfg(test)]
const INFO: RunInfo = RunInfo {
    elements: 100,
    iterations: 10,
};

#[test]
fn test_normalization_modes() {
    let mut sc = config(1000);
    let col = Column::event("top", 2, TOP);
    configure(&mut sc, &[col]);
    let s0 = sc.stamp();
    let s1 = sc.stamp();
    let results = BenchResults {
        delta: sc.delta(&s0, &s1),
        info: INFO,
    };
    assert_eq!(col.final_value(&results), 1.0);
    assert_eq!(col.with_norm(NormMode::None).final_value(&results), 1000.0);
    assert_eq!(col.with_norm(NormMode::Instrument).final_value(&results), 10.0);
    assert_eq!(col.with_norm(NormMode::ItersOnly).final_value(&results), 100.0);
}

#[test]
fn test_ratio_and_shared_registration() {
    let mut sc = config(7);
    let ratio = Column::ratio("r", 2, TOP, BOTTOM);
    let single = Column::ratio("s", 2, TOP, NO_EVENT);
    assert!(matches!(single.kind(), ColumnKind::Event(_)));
    assert_eq!(single.norm_mode(), NormMode::Full);
    configure(&mut sc, &[ratio, single, ratio]);
    assert_eq!(sc.event_manager().event_count(), 2);
    let s0 = sc.stamp();
    let s1 = sc.stamp();
    let results = BenchResults {
        delta: sc.delta(&s0, &s1),
        info: INFO,
    };
    assert_eq!(ratio.final_value(&results), 1.0);
}

#[test]
fn test_nanos_pseudo_event() {
    let mut sc = config(3);
    let ghz = Column::ratio("GHz", 3, TOP, NANOS_EVENT);
    configure(&mut sc, &[ghz]);
    let s0 = sc.stamp();
    let s1 = sc.stamp();
    let results = BenchResults {
        delta: sc.delta(&s0, &s1),
        info: INFO,
    };
    // two clock reads per stamp at one cycle per nanosecond
    assert_eq!(results.delta.nanos(), 2.0);
    assert_eq!(ghz.final_value(&results), 1.5);
}

#[test]
fn test_failed_event_degrades_to_nan() {
    let mut sc = config(1);
    let col = Column::ratio("b", 2, BROKEN, TOP);
    configure(&mut sc, &[col]);
    let s = sc.stamp();
    let results = BenchResults {
        delta: sc.delta(&s, &s),
        info: INFO,
    };
    assert_eq!(col.value(&results), Err(ColFailed::new("fail")));
    assert!(col.final_value(&results).is_nan());
    assert_eq!(col.format_value(&col.value(&results)), "fail");
}

#[test]
#[should_panic(expected = "doesn't exist")]
fn test_unregistered_event_faults() {
    let mut sc = config(1);
    configure(&mut sc, &[]);
    let s = sc.stamp();
    let results = BenchResults {
        delta: sc.delta(&s, &s),
        info: INFO,
    };
    Column::event("top", 2, TOP).final_value(&results);
}

#[test]
fn test_register_columns() {
    let mut sc = config(1);
    let volts = by_name("Volts").unwrap();
    let mult = by_name("Mult").unwrap();
    configure(&mut sc, &[*volts, *mult]);
    assert_eq!(sc.register_manager().register_count(), 1);
    let s = sc.stamp();
    let results = BenchResults {
        delta: sc.delta(&s, &s),
        info: INFO,
    };
    assert_eq!(volts.final_value(&results), 1.0);
    assert_eq!(mult.final_value(&results), 42.0);
    assert_eq!(volts.format_value(&volts.value(&results)), "1.000");
}

#[test]
fn test_basic_columns() {
    let mut sc = config(1);
    configure(&mut sc, BASIC_COLUMNS);
    let s0 = sc.stamp();
    let s1 = sc.stamp();
    let results = BenchResults {
        delta: sc.delta(&s0, &s1),
        info: RunInfo {
            elements: 1,
            iterations: 1,
        },
    };
    let cycles = by_name("Cycles").unwrap();
    assert_eq!(cycles.final_value(&results), 2.0);
    assert_eq!(by_name("Retries").unwrap().final_value(&results), 0.0);
}

#[test]
fn test_lookup_by_list() {
    let cols = by_list("Cycles, IPC,,Volts").unwrap();
    let names: Vec<_> = cols.iter().map(|c| c.heading()).collect();
    assert_eq!(names, ["Cycles", "IPC", "Volts"]);
    assert_eq!(
        by_list("Cycles,nope").unwrap_err(),
        ConfigError::UnknownColumn("nope".to_string())
    );
}

#[test]
fn test_headings_are_unique() {
    let mut names: Vec<_> = all_columns().map(|c| c.heading()).collect();
    names.sort();
    names.dedup();
    assert_eq!(names.len(), all_columns().count());
}
