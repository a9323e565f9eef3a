//! Events used by the built-in columns.
//!
//! Descriptors are generic perf aliases where one exists and raw Skylake-family
//! encodings (`event | umask << 8 | cmask << 24`) otherwise.

use super::Event;

pub const INST_RETIRED_ANY: Event = Event::new("INST_RETIRED.ANY", "instructions");
pub const CPU_CLK_UNHALTED_THREAD: Event = Event::new("CPU_CLK_UNHALTED.THREAD", "cycles");
pub const CPU_CLK_UNHALTED_REF_TSC: Event = Event::new("CPU_CLK_UNHALTED.REF_TSC", "ref-cycles");
pub const UOPS_ISSUED_ANY: Event = Event::new("UOPS_ISSUED.ANY", "r010e");
pub const L1D_PEND_MISS_PENDING: Event = Event::new("L1D_PEND_MISS.PENDING", "r0148");
pub const L1D_PEND_MISS_PENDING_CYCLES: Event =
    Event::new("L1D_PEND_MISS.PENDING_CYCLES", "r1000148");
pub const MEM_LOAD_RETIRED_L1_MISS: Event = Event::new("MEM_LOAD_RETIRED.L1_MISS", "r08d1");
pub const MEM_INST_RETIRED_ALL_LOADS: Event = Event::new("MEM_INST_RETIRED.ALL_LOADS", "r81d0");
pub const L1D_REPLACEMENT: Event = Event::new("L1D.REPLACEMENT", "r0151");
pub const BRANCH_MISSES: Event = Event::new("BR_MISP_RETIRED.ALL_BRANCHES", "branch-misses");
pub const UOPS_DISPATCHED_PORT_0: Event = Event::new("UOPS_DISPATCHED_PORT.PORT_0", "r01a1");
pub const UOPS_DISPATCHED_PORT_1: Event = Event::new("UOPS_DISPATCHED_PORT.PORT_1", "r02a1");
pub const UOPS_DISPATCHED_PORT_2: Event = Event::new("UOPS_DISPATCHED_PORT.PORT_2", "r04a1");
pub const UOPS_DISPATCHED_PORT_3: Event = Event::new("UOPS_DISPATCHED_PORT.PORT_3", "r08a1");
pub const UOPS_DISPATCHED_PORT_4: Event = Event::new("UOPS_DISPATCHED_PORT.PORT_4", "r10a1");
pub const UOPS_DISPATCHED_PORT_5: Event = Event::new("UOPS_DISPATCHED_PORT.PORT_5", "r20a1");
pub const UOPS_DISPATCHED_PORT_6: Event = Event::new("UOPS_DISPATCHED_PORT.PORT_6", "r40a1");
pub const UOPS_DISPATCHED_PORT_7: Event = Event::new("UOPS_DISPATCHED_PORT.PORT_7", "r80a1");

pub const ALL_EVENTS: &[Event] = &[
    INST_RETIRED_ANY,
    CPU_CLK_UNHALTED_THREAD,
    CPU_CLK_UNHALTED_REF_TSC,
    UOPS_ISSUED_ANY,
    L1D_PEND_MISS_PENDING,
    L1D_PEND_MISS_PENDING_CYCLES,
    MEM_LOAD_RETIRED_L1_MISS,
    MEM_INST_RETIRED_ALL_LOADS,
    L1D_REPLACEMENT,
    BRANCH_MISSES,
    UOPS_DISPATCHED_PORT_0,
    UOPS_DISPATCHED_PORT_1,
    UOPS_DISPATCHED_PORT_2,
    UOPS_DISPATCHED_PORT_3,
    UOPS_DISPATCHED_PORT_4,
    UOPS_DISPATCHED_PORT_5,
    UOPS_DISPATCHED_PORT_6,
    UOPS_DISPATCHED_PORT_7,
];

#[test]
fn test_names_are_unique() {
    let mut names: Vec<_> = ALL_EVENTS.iter().map(|e| e.name).collect();
    names.sort();
    names.dedup();
    assert_eq!(names.len(), ALL_EVENTS.len());
}
