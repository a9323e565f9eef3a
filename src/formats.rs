mod csv;
mod live;
mod live_table;
mod tabled;
mod tabled_float;

pub use csv::Csv;
pub use live::Live;
pub use live_table::LiveTable;
pub use tabled::Tabled;
pub use tabled_float::TabledFloat;

use crate::{columns::Column, error::ConfigError, report::RepeatReport};
use std::error::Error;

/// Sink for the reports of a run.
///
/// A run is `start_run`, any number of `push_repeat` calls, possibly for several workloads,
/// then `end_run`. Errors are reported to the caller, which logs them and keeps sampling.
pub trait Format {
    fn start_run(&mut self, columns: &[Column]) -> Result<(), Box<dyn Error>>;
    fn push_repeat(&mut self, report: &RepeatReport) -> Result<(), Box<dyn Error>>;
    /// Flushes whatever is buffered. Called again for every run, so this must reset the sink.
    fn end_run(&mut self) -> Result<(), Box<dyn Error>>;
}

impl Format for Box<dyn Format> {
    fn start_run(&mut self, columns: &[Column]) -> Result<(), Box<dyn Error>> {
        (**self).start_run(columns)
    }

    fn push_repeat(&mut self, report: &RepeatReport) -> Result<(), Box<dyn Error>> {
        (**self).push_repeat(report)
    }

    fn end_run(&mut self) -> Result<(), Box<dyn Error>> {
        (**self).end_run()
    }
}

/// Builds the format named `name`: `live`, `md` or `csv`.
pub fn format_from_name(name: &str, line_len: Option<usize>) -> Result<Box<dyn Format>, ConfigError> {
    match name {
        "csv" => Ok(Box::new(Csv::stdout())),
        "md" => Ok(Box::new(Tabled::new())),
        "live" => Ok(Box::new(Live::new(line_len))),
        other => Err(ConfigError::UnknownFormat(other.to_string())),
    }
}

/// Fixed columns preceding the column values in every format.
const SAMPLE_FIELDS: [&str; 7] = [
    "repeat", "tsc", "period", "deadline", "payload", "spins", "retries",
];

#[cfg(test)]
use crate::{
    columns::{RunInfo, by_name},
    error::ColFailed,
    report::ReportRow,
};
#[cfg(test)]
use std::{
    cell::RefCell,
    io::{self, Write},
    rc::Rc,
};

/// A writer whose output can be inspected after it was handed to a format.
#[cfg(test)]
#[derive(Clone, Default)]
pub(crate) struct SharedBuf(Rc<RefCell<Vec<u8>>>);

#[cfg(test)]
impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
impl SharedBuf {
    pub(crate) fn text(&self) -> String {
        String::from_utf8(self.0.borrow().clone()).unwrap()
    }
}

#[cfg(test)]
pub(crate) fn sample_report(workload: &'static str, repeat: usize) -> RepeatReport {
    let columns = vec![*by_name("Cycles").unwrap(), *by_name("IPC").unwrap()];
    RepeatReport {
        workload,
        repeat,
        info: RunInfo {
            elements: 1,
            iterations: 1,
        },
        columns,
        rows: (0..3)
            .map(|i| ReportRow {
                elapsed: 1000 * (i + 1),
                period: 0,
                deadline: 1000 * (i + 1),
                payload_calls: 10,
                spins: 12,
                retries: 0,
                values: vec![
                    Ok(1000.0 + i as f64),
                    if i == 1 {
                        Err(ColFailed::new("fail"))
                    } else {
                        Ok(f64::NAN)
                    },
                ],
            })
            .collect(),
        post: Vec::new(),
    }
}

#[test]
fn test_format_from_name() {
    assert!(format_from_name("md", None).is_ok());
    assert!(format_from_name("live", Some(80)).is_ok());
    assert_eq!(
        format_from_name("xml", None).err(),
        Some(ConfigError::UnknownFormat("xml".into()))
    );
}
