use std::io;
use thiserror::Error;

/// Failure while preparing a [`StampConfig`](crate::StampConfig).
///
/// Any of these abort the run before a single measurement is taken.
#[derive(Error, Debug)]
pub enum SetupError {
    #[error("{requested} registers requested but at most {max} are supported, raise MAX_REGISTERS")]
    TooManyRegisters { requested: usize, max: usize },
    #[error("failed to read register {address:#x}")]
    RegisterRead {
        address: u32,
        #[source]
        source: io::Error,
    },
}

/// Invalid run configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
    #[error("no column named {0:?}")]
    UnknownColumn(String),
    #[error("no workload named {0:?}")]
    UnknownWorkload(String),
    #[error("unrecognized output format {0:?}, supported values: live, md, csv")]
    UnknownFormat(String),
    #[error("unrecognized counter backend {0:?}, supported values: perf, synthetic")]
    UnknownBackend(String),
    #[error("{0}")]
    Inconsistent(&'static str),
}

/// A column could not produce a value for one measurement.
///
/// This never aborts a run: the output layer renders `placeholder` in place of the value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("column failed ({placeholder})")]
pub struct ColFailed {
    pub placeholder: String,
}

impl ColFailed {
    pub fn new(placeholder: impl Into<String>) -> Self {
        ColFailed {
            placeholder: placeholder.into(),
        }
    }
}
