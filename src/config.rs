//! Run configuration read from `STAMP_*` environment variables.

use crate::{error::ConfigError, scheduler::SamplerSettings, stamp::RetryPolicy};
use log::debug;
use std::str::FromStr;

/// Where hardware counters come from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backend {
    /// `perf_event_open`, Linux only.
    Perf,
    /// Deterministic counters for dry runs.
    Synthetic,
}

impl FromStr for Backend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, ConfigError> {
        match s {
            "perf" => Ok(Backend::Perf),
            "synthetic" => Ok(Backend::Synthetic),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SamplerConfig {
    pub settings: SamplerSettings,
    pub iterations: usize,
    /// Input buffer size in bytes, also the element count used for normalization.
    pub size: usize,
    pub columns: String,
    pub format: String,
    pub backend: Backend,
    pub msr_cpu: usize,
    pub retry: RetryPolicy,
    pub include_slow: bool,
    pub line_len: Option<usize>,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        SamplerConfig {
            settings: SamplerSettings::default(),
            iterations: 100,
            size: 4096,
            columns: "Cycles,INSTRU,IPC,UPC,Unhalt_GHz".to_string(),
            format: "live".to_string(),
            backend: if cfg!(target_os = "linux") {
                Backend::Perf
            } else {
                Backend::Synthetic
            },
            msr_cpu: 0,
            retry: RetryPolicy::default(),
            include_slow: false,
            line_len: None,
        }
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    let Some(value) = lookup(var) else {
        return Ok(None);
    };
    debug!("{var}={value:?}");
    value
        .trim()
        .replace('_', "")
        .parse()
        .map(Some)
        .map_err(|_| ConfigError::Invalid { var, value })
}

fn parse_bool(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<bool>, ConfigError> {
    let Some(value) = lookup(var) else {
        return Ok(None);
    };
    match value.trim() {
        "" | "0" | "false" | "no" => Ok(Some(false)),
        "1" | "true" | "yes" => Ok(Some(true)),
        _ => Err(ConfigError::Invalid { var, value }),
    }
}

impl SamplerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Builds a config from `lookup`, which maps variable names to their values.
    /// Unset variables keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut c = SamplerConfig::default();
        let s = &mut c.settings;
        macro_rules! set {
            ($dst:expr, $var:literal) => {
                if let Some(v) = parse(&lookup, $var)? {
                    $dst = v;
                }
            };
        }
        set!(s.test_cycles, "STAMP_TEST_CYC");
        set!(s.period_cycles, "STAMP_TEST_PER");
        set!(s.resolution_cycles, "STAMP_TEST_RES");
        s.payload_cycles = parse(&lookup, "STAMP_PAYLOAD_CYC")?;
        set!(s.warmup_cycles, "STAMP_WARMUP_CYC");
        set!(s.repeats, "STAMP_REPEATS");
        if let Some(v) = parse_bool(&lookup, "STAMP_NO_WARM")? {
            s.no_warm = v;
        }
        set!(c.iterations, "STAMP_ITERS");
        set!(c.size, "STAMP_SIZE");
        if let Some(v) = lookup("STAMP_COLS") {
            c.columns = v;
        }
        if let Some(v) = lookup("STAMP_FORMAT") {
            c.format = v;
        }
        if let Some(v) = lookup("STAMP_BACKEND") {
            c.backend = v.trim().parse()?;
        }
        set!(c.msr_cpu, "STAMP_MSR_CPU");
        set!(c.retry.base, "STAMP_RETRY_BASE");
        set!(c.retry.per_counter, "STAMP_RETRY_PER");
        set!(c.retry.max_retries, "STAMP_MAX_RETRIES");
        if let Some(v) = parse_bool(&lookup, "STAMP_INCLUDE_SLOW")? {
            c.include_slow = v;
        }
        c.line_len = parse(&lookup, "STAMP_LINE_LEN")?;
        c.validate()?;
        Ok(c)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.settings;
        if s.resolution_cycles == 0 || s.period_cycles == 0 {
            return Err(ConfigError::Inconsistent("period and resolution must be non-zero"));
        }
        if s.resolution_cycles > s.period_cycles {
            return Err(ConfigError::Inconsistent("resolution must not exceed the period"));
        }
        if s.repeats == 0 {
            return Err(ConfigError::Inconsistent("at least one repeat is required"));
        }
        if self.iterations == 0 {
            return Err(ConfigError::Inconsistent("at least one iteration is required"));
        }
        Ok(())
    }
}

#[cfg(test)]
fn lookup_from<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
    move |var| {
        vars.iter()
            .find(|(k, _)| *k == var)
            .map(|(_, v)| v.to_string())
    }
}

#[test]
fn test_defaults() {
    let c = SamplerConfig::from_lookup(|_| None).unwrap();
    assert_eq!(c, SamplerConfig::default());
    assert_eq!(c.settings.resolution_cycles, 1000);
    assert_eq!(c.columns, "Cycles,INSTRU,IPC,UPC,Unhalt_GHz");
}

#[test]
fn test_overrides() {
    let c = SamplerConfig::from_lookup(lookup_from(&[
        ("STAMP_TEST_CYC", "10_000"),
        ("STAMP_TEST_PER", "10000"),
        ("STAMP_TEST_RES", " 1000 "),
        ("STAMP_PAYLOAD_CYC", "500"),
        ("STAMP_NO_WARM", "1"),
        ("STAMP_BACKEND", "synthetic"),
        ("STAMP_MAX_RETRIES", "0"),
        ("STAMP_LINE_LEN", "80"),
    ]))
    .unwrap();
    assert_eq!(c.settings.test_cycles, 10_000);
    assert_eq!(c.settings.payload_cycles, Some(500));
    assert!(c.settings.no_warm);
    assert_eq!(c.backend, Backend::Synthetic);
    assert_eq!(c.retry.max_retries, 0);
    assert_eq!(c.retry.base, 100);
    assert_eq!(c.line_len, Some(80));
}

#[test]
fn test_invalid_values() {
    assert_eq!(
        SamplerConfig::from_lookup(lookup_from(&[("STAMP_REPEATS", "three")])),
        Err(ConfigError::Invalid {
            var: "STAMP_REPEATS",
            value: "three".into()
        })
    );
    assert_eq!(
        SamplerConfig::from_lookup(lookup_from(&[("STAMP_BACKEND", "papi")])),
        Err(ConfigError::UnknownBackend("papi".into()))
    );
    assert!(matches!(
        SamplerConfig::from_lookup(lookup_from(&[("STAMP_TEST_RES", "0")])),
        Err(ConfigError::Inconsistent(_))
    ));
    assert!(matches!(
        SamplerConfig::from_lookup(lookup_from(&[
            ("STAMP_TEST_PER", "100"),
            ("STAMP_TEST_RES", "1000")
        ])),
        Err(ConfigError::Inconsistent(_))
    ));
    assert!(SamplerConfig::from_lookup(lookup_from(&[("STAMP_NO_WARM", "maybe")])).is_err());
}
