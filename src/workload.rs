//! Named code fragments to sample.
//!
//! The catalog is plain data: a table of [`Workload`]s, each a function pointer plus
//! metadata, so it can be listed and filtered without running anything.

use crate::error::ConfigError;
use bitflags::bitflags;
use std::hint::black_box;

bitflags! {
    /// Advisory flags of a [`Workload`].
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct WorkloadFlags: u32 {
        /// Too slow to be part of the default set.
        const SLOW = 1 << 0;
        /// Known to produce wrong results.
        const INCORRECT = 1 << 1;
        /// Must not be followed by `vzeroupper`.
        const NO_VZ = 1 << 2;
    }
}

/// Buffers handed to a workload on every call.
pub struct BenchArgs<'a> {
    pub input: &'a [u8],
    pub output: &'a mut [u8],
}

#[derive(Clone, Copy, Debug)]
pub struct Workload {
    pub name: &'static str,
    pub desc: &'static str,
    pub flags: WorkloadFlags,
    pub f: fn(&mut BenchArgs<'_>),
}

impl Workload {
    pub const fn new(name: &'static str, desc: &'static str, f: fn(&mut BenchArgs<'_>)) -> Self {
        Workload {
            name,
            desc,
            flags: WorkloadFlags::empty(),
            f,
        }
    }

    pub const fn with_flags(mut self, flags: WorkloadFlags) -> Self {
        self.flags = flags;
        self
    }

    #[inline(always)]
    pub fn call(&self, args: &mut BenchArgs<'_>) {
        (self.f)(args)
    }
}

fn dummy(_: &mut BenchArgs<'_>) {}

fn memcpy(args: &mut BenchArgs<'_>) {
    let n = args.input.len().min(args.output.len());
    args.output[..n].copy_from_slice(&args.input[..n]);
    black_box(&args.output);
}

fn memset(args: &mut BenchArgs<'_>) {
    args.output.fill(0);
    black_box(&args.output);
}

fn sum(args: &mut BenchArgs<'_>) {
    let total = args
        .input
        .iter()
        .fold(0u64, |acc, &b| acc.wrapping_add(b as u64));
    black_box(total);
}

fn spin100(_: &mut BenchArgs<'_>) {
    for i in 0..100u32 {
        black_box(i);
    }
}

pub const WORKLOADS: &[Workload] = &[
    Workload::new("dummy", "empty function", dummy),
    Workload::new("memcpy", "copy input to output", memcpy),
    Workload::new("memset", "zero the output buffer", memset),
    Workload::new("sum", "byte sum of the input", sum),
    Workload::new("spin100", "100 iterations of an opaque loop", spin100)
        .with_flags(WorkloadFlags::SLOW),
];

pub fn by_name(name: &str) -> Option<&'static Workload> {
    WORKLOADS.iter().find(|w| w.name == name)
}

/// Looks up a comma separated list of workload names.
pub fn by_list(list: &str) -> Result<Vec<&'static Workload>, ConfigError> {
    list.split(',')
        .map(str::trim)
        .filter(|x| !x.is_empty())
        .map(|name| by_name(name).ok_or_else(|| ConfigError::UnknownWorkload(name.to_string())))
        .collect()
}

/// Every workload not flagged [`SLOW`](WorkloadFlags::SLOW), unless `include_slow` is set.
pub fn default_set(include_slow: bool) -> Vec<&'static Workload> {
    WORKLOADS
        .iter()
        .filter(|w| include_slow || !w.flags.contains(WorkloadFlags::SLOW))
        .collect()
}

#[test]
fn test_default_set_skips_slow() {
    let fast: Vec<_> = default_set(false).iter().map(|w| w.name).collect();
    assert!(!fast.contains(&"spin100"));
    assert!(fast.contains(&"dummy"));
    assert_eq!(default_set(true).len(), WORKLOADS.len());
}

#[test]
fn test_by_list() {
    let ws = by_list("memcpy, sum").unwrap();
    assert_eq!(ws.len(), 2);
    assert_eq!(ws[1].name, "sum");
    assert_eq!(
        by_list("memcpy,nope").unwrap_err(),
        ConfigError::UnknownWorkload("nope".into())
    );
}

#[test]
fn test_workloads_run() {
    let input = [3u8; 16];
    let mut output = [1u8; 16];
    let mut args = BenchArgs {
        input: &input,
        output: &mut output,
    };
    by_name("memcpy").unwrap().call(&mut args);
    assert_eq!(args.output, &[3u8; 16]);
    by_name("memset").unwrap().call(&mut args);
    assert_eq!(args.output, &[0u8; 16]);
    for w in WORKLOADS {
        w.call(&mut args);
    }
}
