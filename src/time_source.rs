use std::{
    sync::OnceLock,
    time::{Duration, Instant},
};

/// Reads the cycle counter and converts cycle counts to nanoseconds.
///
/// On x86_64 this is the time-stamp counter. Everywhere else it falls back to
/// nanoseconds since a process wide epoch, which makes one "cycle" one nanosecond.
///
/// All waiting done by the sampler is busy-waiting on this clock. Nothing here sleeps.
#[derive(Clone, Copy, Debug)]
pub struct TimeSource {
    read: fn() -> u64,
    cycles_per_ns: f64,
    method: &'static str,
}

impl Default for TimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource {
    /// The hardware cycle counter, with its frequency taken from CPUID when available
    /// and calibrated against [`Instant`] otherwise.
    pub fn new() -> Self {
        #[cfg(target_arch = "x86_64")]
        {
            if let Some(hz) = cpuid_tsc_hz() {
                return TimeSource {
                    read: rdtsc,
                    cycles_per_ns: hz as f64 / 1e9,
                    method: "cpuid leaf 0x15",
                };
            }
            TimeSource {
                read: rdtsc,
                cycles_per_ns: calibrate(rdtsc, Duration::from_millis(20)),
                method: "calibration loop",
            }
        }
        #[cfg(not(target_arch = "x86_64"))]
        TimeSource {
            read: epoch_nanos,
            cycles_per_ns: 1.0,
            method: "monotonic clock (no cycle counter)",
        }
    }

    /// Builds a time source from an arbitrary counter reader ticking at `cycles_per_ns`.
    pub fn with_reader(read: fn() -> u64, cycles_per_ns: f64) -> Self {
        assert!(cycles_per_ns > 0.0, "cycles_per_ns must be positive");
        TimeSource {
            read,
            cycles_per_ns,
            method: "user supplied",
        }
    }

    #[inline(always)]
    pub fn now(&self) -> u64 {
        (self.read)()
    }

    pub fn cycles_per_ns(&self) -> f64 {
        self.cycles_per_ns
    }

    pub fn frequency_hz(&self) -> f64 {
        self.cycles_per_ns * 1e9
    }

    /// How the frequency was determined.
    pub fn calibration_info(&self) -> &'static str {
        self.method
    }

    pub fn to_nanos(&self, cycles: u64) -> f64 {
        cycles as f64 / self.cycles_per_ns
    }

    pub fn to_secs(&self, cycles: u64) -> f64 {
        self.to_nanos(cycles) / 1e9
    }

    /// Spins until the counter reaches `deadline` and returns the first reading at or past it.
    #[inline]
    pub fn spin_until(&self, deadline: u64) -> u64 {
        loop {
            let now = self.now();
            if now >= deadline {
                return now;
            }
            std::hint::spin_loop();
        }
    }

    /// Busy-waits for `cycles`, giving the core time to settle before measuring.
    pub fn hot_wait(&self, cycles: u64) {
        let deadline = self.now().saturating_add(cycles);
        self.spin_until(deadline);
        zero_upper();
    }
}

#[cfg(target_arch = "x86_64")]
#[inline(always)]
pub fn rdtsc() -> u64 {
    #[allow(unused_unsafe)]
    unsafe {
        core::arch::x86_64::_rdtsc()
    }
}

#[cfg(not(target_arch = "x86_64"))]
pub fn rdtsc() -> u64 {
    epoch_nanos()
}

#[allow(dead_code)]
fn epoch_nanos() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_nanos() as u64
}

/// Orders all prior loads (in particular instrumentation reads) before whatever follows.
#[inline(always)]
pub fn load_fence() {
    #[cfg(target_arch = "x86_64")]
    #[allow(unused_unsafe)]
    unsafe {
        core::arch::x86_64::_mm_lfence();
    }
    #[cfg(not(target_arch = "x86_64"))]
    std::sync::atomic::fence(std::sync::atomic::Ordering::Acquire);
}

/// Clears the upper halves of the vector registers if the CPU has them.
#[inline]
pub fn zero_upper() {
    #[cfg(target_arch = "x86_64")]
    if std::arch::is_x86_feature_detected!("avx") {
        // SAFETY: avx support was checked above.
        unsafe { vzeroupper() }
    }
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx")]
unsafe fn vzeroupper() {
    core::arch::x86_64::_mm256_zeroupper();
}

/// TSC frequency as reported by CPUID leaf 0x15, if the CPU reports the crystal clock.
#[cfg(target_arch = "x86_64")]
fn cpuid_tsc_hz() -> Option<u64> {
    use core::arch::x86_64::__cpuid;
    #[allow(unused_unsafe)]
    let max_leaf = unsafe { __cpuid(0) }.eax;
    if max_leaf < 0x15 {
        return None;
    }
    #[allow(unused_unsafe)]
    let leaf = unsafe { __cpuid(0x15) };
    let (denominator, numerator, crystal_hz) = (leaf.eax, leaf.ebx, leaf.ecx);
    if denominator == 0 || numerator == 0 || crystal_hz == 0 {
        return None;
    }
    Some(crystal_hz as u64 * numerator as u64 / denominator as u64)
}

/// Measures how many counter ticks elapse per nanosecond of [`Instant`] time.
pub fn calibrate(read: fn() -> u64, duration: Duration) -> f64 {
    for _ in 0..10 {
        read();
    }
    let start_instant = Instant::now();
    let start = read();
    while start_instant.elapsed() < duration {
        std::hint::spin_loop();
    }
    let end = read();
    let elapsed = start_instant.elapsed();
    (end - start) as f64 / elapsed.as_nanos() as f64
}

#[test]
fn test_conversion() {
    fn zero() -> u64 {
        0
    }
    let ts = TimeSource::with_reader(zero, 2.5);
    assert_eq!(ts.to_nanos(2500), 1000.0);
    assert_eq!(ts.frequency_hz(), 2.5e9);
    assert_eq!(ts.calibration_info(), "user supplied");
}

#[test]
fn test_spin_until_reaches_deadline() {
    let ts = TimeSource::new();
    let start = ts.now();
    let deadline = start + 10_000;
    assert!(ts.spin_until(deadline) >= deadline);
    assert!(ts.cycles_per_ns() > 0.0);
}
