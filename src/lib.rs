//! Samples hardware performance counters, the time-stamp counter and model-specific registers
//! at cycle resolution while a short code fragment runs in a busy loop.
//!
//! Columns declare the events and registers they need on a [`StampConfig`], the
//! [`SamplingScheduler`] takes a [`Stamp`] at every resolution deadline, and consecutive
//! stamps are turned into [`StampDelta`]s that columns normalize into printable values.
//! [`Sampler`] wires all of this to a [`Format`](formats::Format) and is configured from
//! `STAMP_*` environment variables by [`Sampler::from_env`].

pub mod columns;
pub mod config;
pub mod error;
pub mod events;
pub mod formats;
pub mod registers;
pub mod report;
pub mod scheduler;
pub mod stamp;
pub mod time_source;
pub mod workload;

pub use columns::{Column, NormMode, RunInfo};
pub use config::{Backend, SamplerConfig};
pub use error::{ColFailed, ConfigError, SetupError};
pub use events::{Event, EventManager, EventResolver, MAX_COUNTERS};
pub use registers::{MAX_REGISTERS, RegisterManager, RegisterReader};
pub use report::RepeatReport;
pub use scheduler::{SamplerSettings, SamplingScheduler};
pub use stamp::{RetryPolicy, Stamp, StampConfig, StampDelta};
pub use time_source::TimeSource;
pub use workload::{BenchArgs, Workload, WorkloadFlags};

use crate::{
    columns::MSR_PERF_STATUS,
    events::{SyntheticResolver, catalog::ALL_EVENTS},
    formats::{Format, format_from_name},
    registers::SyntheticRegisters,
    workload::WORKLOADS,
};
use log::{error, info};
use std::error::Error;
use tabled::{builder::Builder, settings::Style};

/// Runs workloads under a fixed set of columns and reports every repeat to a format.
///
/// The format is closed when the sampler is dropped.
pub struct Sampler {
    config: StampConfig,
    columns: Vec<Column>,
    scheduler: SamplingScheduler,
    info: RunInfo,
    format: Box<dyn Format>,
    input: Vec<u8>,
    output: Vec<u8>,
}

impl Sampler {
    /// Registers `columns` on `config` and prepares it.
    ///
    /// Fails if a register needed by a column cannot be read.
    pub fn new(
        mut config: StampConfig,
        columns: Vec<Column>,
        settings: SamplerSettings,
        info: RunInfo,
        mut format: Box<dyn Format>,
    ) -> Result<Self, SetupError> {
        for c in &columns {
            c.update_config(&mut config);
        }
        config.prepare()?;
        if let Err(e) = format.start_run(&columns) {
            error!("failed to start output: {e}");
        }
        Ok(Sampler {
            config,
            columns,
            scheduler: SamplingScheduler::new(settings),
            info,
            format,
            input: (0..info.elements).map(|i| i as u8).collect(),
            output: vec![0; info.elements],
        })
    }

    /// Builds a sampler as configured by the `STAMP_*` environment variables.
    pub fn from_env() -> Result<Self, Box<dyn Error>> {
        Self::from_config(&SamplerConfig::from_env()?)
    }

    pub fn from_config(c: &SamplerConfig) -> Result<Self, Box<dyn Error>> {
        let time = TimeSource::new();
        info!(
            "cycle counter at {:.3} GHz ({})",
            time.frequency_hz() / 1e9,
            time.calibration_info()
        );
        let (resolver, registers): (Box<dyn EventResolver>, Box<dyn RegisterReader>) =
            match c.backend {
                #[cfg(target_os = "linux")]
                Backend::Perf => (
                    Box::new(events::PerfResolver::new()),
                    Box::new(registers::MsrReader::new(c.msr_cpu)),
                ),
                #[cfg(not(target_os = "linux"))]
                Backend::Perf => {
                    return Err(ConfigError::Inconsistent("the perf backend requires Linux").into());
                }
                Backend::Synthetic => (
                    Box::new(SyntheticResolver::new(1000)),
                    // 1.0 V at multiplier 30
                    Box::new(SyntheticRegisters::new().with(MSR_PERF_STATUS, 0x2000_0000_1e00)),
                ),
            };
        let config = StampConfig::new(resolver, registers, time).with_retry_policy(c.retry);
        let columns = columns::by_list(&c.columns)?;
        let format = format_from_name(&c.format, c.line_len)?;
        let info = RunInfo {
            elements: c.size,
            iterations: c.iterations,
        };
        Ok(Self::new(config, columns, c.settings, info, format)?)
    }

    pub fn stamp_config(&self) -> &StampConfig {
        &self.config
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Samples `workload` for every repeat without printing anything.
    pub fn measure(&mut self, workload: &Workload) -> Vec<RepeatReport> {
        let mut args = BenchArgs {
            input: &self.input,
            output: &mut self.output,
        };
        let repeats = self.scheduler.run(&mut self.config, workload, &mut args);
        repeats
            .iter()
            .map(|r| RepeatReport::new(workload.name, r, &self.config, &self.columns, self.info))
            .collect()
    }

    /// Samples `workload` and pushes every repeat to the format.
    /// Output errors are logged, they do not stop sampling.
    pub fn run(&mut self, workload: &Workload) -> Vec<RepeatReport> {
        let reports = self.measure(workload);
        for r in &reports {
            if let Err(e) = self.format.push_repeat(r) {
                error!("failed to write repeat {} of {}: {e}", r.repeat, r.workload);
            }
        }
        reports
    }

    pub fn run_all<'w>(&mut self, workloads: impl IntoIterator<Item = &'w Workload>) {
        for w in workloads {
            self.run(w);
        }
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        if let Err(e) = self.format.end_run() {
            error!("failed to finish output: {e}");
        }
    }
}

/// Markdown table of the built-in events.
pub fn list_events() -> String {
    let mut table = Builder::new();
    table.push_record(["name", "descriptor"]);
    for e in ALL_EVENTS {
        table.push_record([e.name, e.descriptor]);
    }
    let mut table = table.build();
    table.with(Style::markdown());
    table.to_string()
}

/// Markdown table of the built-in workloads.
pub fn list_workloads() -> String {
    let mut table = Builder::new();
    table.push_record(["name", "description", "flags"]);
    for w in WORKLOADS {
        table.push_record([w.name.to_string(), w.desc.to_string(), format!("{:?}", w.flags)]);
    }
    let mut table = table.build();
    table.with(Style::markdown());
    table.to_string()
}

#[test]
fn test_listings() {
    let events = list_events();
    assert!(events.contains("INST_RETIRED.ANY") && events.contains("r010e"));
    assert_eq!(events.lines().count(), ALL_EVENTS.len() + 2);
    let workloads = list_workloads();
    assert!(workloads.contains("spin100") && workloads.contains("SLOW"));
}
