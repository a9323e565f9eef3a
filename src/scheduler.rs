use crate::{
    stamp::{Stamp, StampConfig, StampDelta},
    time_source::{load_fence, zero_upper},
    workload::{BenchArgs, Workload, WorkloadFlags},
};
use log::{debug, info};

/// Timing of one sampling run, all durations in cycles of the time source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SamplerSettings {
    /// Total duration of one repeat.
    pub test_cycles: u64,
    /// Length of one period.
    pub period_cycles: u64,
    /// Distance between two samples.
    pub resolution_cycles: u64,
    /// The workload only runs during the first `payload_cycles` of each period.
    /// `None` runs it for the whole period.
    pub payload_cycles: Option<u64>,
    /// Busy-wait before each repeat.
    pub warmup_cycles: u64,
    pub repeats: usize,
    /// Skip the throw-away stamp taken before the start stamp.
    pub no_warm: bool,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        SamplerSettings {
            test_cycles: 1_000_000_000,
            period_cycles: 100_000_000,
            resolution_cycles: 1_000,
            payload_cycles: None,
            warmup_cycles: 1_000_000_000,
            repeats: 3,
            no_warm: false,
        }
    }
}

impl SamplerSettings {
    /// Number of samples taken per repeat. The two extra samples absorb deadline drift.
    pub fn samples_max(&self) -> usize {
        self.test_cycles.div_ceil(self.resolution_cycles) as usize + 2
    }
}

/// One tick of the sampling loop.
#[derive(Clone, Copy, Debug)]
pub struct Sample {
    /// Cycles since the start of the repeat, read when the sample deadline passed.
    pub tsc: u64,
    pub period: usize,
    /// The deadline this sample waited for, relative to the start of the repeat.
    pub deadline: u64,
    /// Workload invocations since the previous sample.
    pub payload_calls: u64,
    /// Spin loop iterations since the previous sample, including those that ran the workload.
    pub spins: u64,
    pub stamp: Stamp,
}

/// All samples of one repeat, in time order.
#[derive(Clone, Debug)]
pub struct RepeatSamples {
    pub repeat: usize,
    /// Stamp taken right before sampling started.
    pub start: Stamp,
    pub samples: Vec<Sample>,
}

impl RepeatSamples {
    /// The delta of every sample against the one before it, the first against [`start`](Self::start).
    pub fn deltas<'a>(&self, sc: &'a StampConfig) -> Vec<StampDelta<'a>> {
        let mut prior = &self.start;
        self.samples
            .iter()
            .map(|s| {
                let d = sc.delta(prior, &s.stamp);
                prior = &s.stamp;
                d
            })
            .collect()
    }

    /// The delta over the whole repeat.
    pub fn total<'a>(&self, sc: &'a StampConfig) -> StampDelta<'a> {
        match self.samples.last() {
            Some(last) => sc.delta(&self.start, &last.stamp),
            None => StampDelta::empty(),
        }
    }

    pub fn min_delta<'a>(&self, sc: &'a StampConfig) -> StampDelta<'a> {
        self.deltas(sc)
            .iter()
            .fold(StampDelta::empty(), |acc, d| StampDelta::min(&acc, d))
    }

    pub fn max_delta<'a>(&self, sc: &'a StampConfig) -> StampDelta<'a> {
        self.deltas(sc)
            .iter()
            .fold(StampDelta::empty(), |acc, d| StampDelta::max(&acc, d))
    }
}

/// Drives a workload against nested period and resolution deadlines, stamping at every
/// resolution deadline.
pub struct SamplingScheduler {
    settings: SamplerSettings,
}

impl SamplingScheduler {
    pub fn new(settings: SamplerSettings) -> Self {
        assert!(settings.resolution_cycles > 0, "resolution must be non-zero");
        assert!(settings.period_cycles > 0, "period must be non-zero");
        SamplingScheduler { settings }
    }

    pub fn settings(&self) -> &SamplerSettings {
        &self.settings
    }

    /// Runs every repeat.
    pub fn run(
        &self,
        sc: &mut StampConfig,
        workload: &Workload,
        args: &mut BenchArgs<'_>,
    ) -> Vec<RepeatSamples> {
        info!(
            "sampling {} for {} repeats of {} samples",
            workload.name,
            self.settings.repeats,
            self.settings.samples_max()
        );
        (0..self.settings.repeats)
            .map(|repeat| self.run_repeat(sc, workload, args, repeat))
            .collect()
    }

    pub fn run_repeat(
        &self,
        sc: &mut StampConfig,
        workload: &Workload,
        args: &mut BenchArgs<'_>,
        repeat: usize,
    ) -> RepeatSamples {
        assert!(sc.is_prepared(), "sampling with an unprepared stamp config");
        let s = &self.settings;
        let time = *sc.time_source();
        let reset_upper = !workload.flags.contains(WorkloadFlags::NO_VZ);
        let samples_max = s.samples_max();
        let mut samples = Vec::with_capacity(samples_max);

        if reset_upper {
            zero_upper();
        }
        time.hot_wait(s.warmup_cycles);
        if !s.no_warm {
            sc.stamp();
        }

        let mut tsc = time.now();
        let start_tsc = tsc;
        let start = sc.stamp();
        let mut sample_deadline = tsc;
        let mut period_deadline = tsc;
        let mut period = 0;
        while samples.len() < samples_max {
            let period_start = period_deadline;
            period_deadline += s.period_cycles;
            let payload_deadline = match s.payload_cycles {
                Some(p) => (period_start + p).min(period_deadline),
                None => period_deadline,
            };
            while tsc < period_deadline && samples.len() < samples_max {
                sample_deadline += s.resolution_cycles;
                let mut payload_calls = 0;
                let mut spins = 0;
                loop {
                    tsc = time.now();
                    if tsc >= sample_deadline {
                        break;
                    }
                    if tsc < payload_deadline {
                        load_fence();
                        workload.call(args);
                        payload_calls += 1;
                    }
                    spins += 1;
                }
                let stamp = sc.stamp();
                samples.push(Sample {
                    tsc: tsc - start_tsc,
                    period,
                    deadline: sample_deadline - start_tsc,
                    payload_calls,
                    spins,
                    stamp,
                });
            }
            period += 1;
        }
        if reset_upper {
            zero_upper();
        }
        debug!(
            "repeat {repeat} of {} took {} samples over {period} periods",
            workload.name,
            samples.len()
        );
        RepeatSamples {
            repeat,
            start,
            samples,
        }
    }
}

#[cfg(test)]
use crate::{
    events::{Event, SyntheticResolver},
    registers::SyntheticRegisters,
    time_source::TimeSource,
    workload::by_name,
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
const E: Event = Event::new("e", "e");

#[cfg(test)]
fn config() -> StampConfig {
    let mut sc = StampConfig::new(
        Box::new(SyntheticResolver::new(2)),
        Box::new(SyntheticRegisters::new()),
        TimeSource::with_reader(counting_clock, 1.0),
    );
    sc.add_event(&E);
    sc.prepare().unwrap();
    sc
}

#[cfg(test)]
fn settings() -> SamplerSettings {
    SamplerSettings {
        test_cycles: 10_000,
        period_cycles: 10_000,
        resolution_cycles: 1_000,
        payload_cycles: None,
        warmup_cycles: 0,
        repeats: 2,
        no_warm: false,
    }
}

#[test]
fn test_samples_max_rounds_up() {
    let mut s = settings();
    assert_eq!(s.samples_max(), 12);
    s.test_cycles = 10_001;
    assert_eq!(s.samples_max(), 13);
}

#[test]
fn test_ten_samples_per_period() {
    let mut sc = config();
    let dummy = by_name("dummy").unwrap();
    let mut out = [0u8; 0];
    let mut args = BenchArgs {
        input: &[],
        output: &mut out,
    };
    let repeats = SamplingScheduler::new(settings()).run(&mut sc, dummy, &mut args);
    assert_eq!(repeats.len(), 2);
    for r in &repeats {
        assert_eq!(r.samples.len(), 12);
        assert_eq!(r.samples.iter().filter(|s| s.period == 0).count(), 10);
        assert_eq!(r.samples.iter().filter(|s| s.period == 1).count(), 2);
        for (i, s) in r.samples.iter().enumerate() {
            assert_eq!(s.deadline, 1000 * (i as u64 + 1));
            assert!(s.tsc >= s.deadline);
            assert!(s.payload_calls > 0);
        }
        let deltas = r.deltas(&sc);
        assert!(deltas.iter().all(|d| d.counter(&E) == Some(2)));
        assert_eq!(r.total(&sc).counter(&E), Some(24));
    }
}

#[test]
fn test_payload_window_limits_calls() {
    let mut sc = config();
    let dummy = by_name("dummy").unwrap();
    let mut out = [0u8; 0];
    let mut args = BenchArgs {
        input: &[],
        output: &mut out,
    };
    let sched = SamplingScheduler::new(SamplerSettings {
        payload_cycles: Some(2_500),
        repeats: 1,
        ..settings()
    });
    let r = sched.run_repeat(&mut sc, dummy, &mut args, 0);
    let calls: Vec<_> = r.samples[..10].iter().map(|s| s.payload_calls).collect();
    assert!(calls[0] > 0 && calls[1] > 0 && calls[2] > 0);
    assert!(calls[3..].iter().all(|&c| c == 0));
    assert!(r.samples.iter().all(|s| s.spins > 0));
}

#[test]
fn test_min_max_over_samples() {
    let mut sc = config();
    let dummy = by_name("dummy").unwrap();
    let mut out = [0u8; 0];
    let mut args = BenchArgs {
        input: &[],
        output: &mut out,
    };
    let r = SamplingScheduler::new(settings()).run_repeat(&mut sc, dummy, &mut args, 0);
    let min = r.min_delta(&sc);
    let max = r.max_delta(&sc);
    assert!(min.cycles() <= max.cycles());
    assert_eq!(min.counter(&E), Some(2));
    assert_eq!(max.counter(&E), Some(2));
}
