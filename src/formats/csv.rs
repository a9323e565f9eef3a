use super::{Format, SAMPLE_FIELDS};
use crate::{columns::Column, report::RepeatReport};
use log::info;
use std::{
    error::Error,
    io::{Write, stdout},
    iter,
};

/// One record per sample. The header is repeated whenever the workload changes.
pub struct Csv {
    header_for: Option<&'static str>,
    writer: csv::Writer<Box<dyn Write>>,
}

impl Csv {
    pub fn new(out: Box<dyn Write>) -> Self {
        Csv {
            header_for: None,
            writer: csv::Writer::from_writer(out),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(stdout()))
    }

    fn write_header(&mut self, report: &RepeatReport) -> csv::Result<()> {
        self.writer.write_field("workload")?;
        for f in SAMPLE_FIELDS {
            self.writer.write_field(f)?;
        }
        for c in &report.columns {
            self.writer.write_field(c.heading())?;
        }
        self.writer.write_record(iter::empty::<&[u8]>())
    }
}

impl Format for Csv {
    fn start_run(&mut self, _columns: &[Column]) -> Result<(), Box<dyn Error>> {
        self.header_for = None;
        Ok(())
    }

    fn push_repeat(&mut self, report: &RepeatReport) -> Result<(), Box<dyn Error>> {
        if self.header_for != Some(report.workload) {
            self.header_for = Some(report.workload);
            self.write_header(report)?;
        }
        for row in &report.rows {
            self.writer.write_field(report.workload)?;
            for x in [
                report.repeat as u64,
                row.elapsed,
                row.period as u64,
                row.deadline,
                row.payload_calls,
                row.spins,
                row.retries as u64,
            ] {
                self.writer.write_field(x.to_string())?;
            }
            for (c, v) in report.columns.iter().zip(&row.values) {
                self.writer.write_field(c.format_value(v))?;
            }
            self.writer.write_record(iter::empty::<&[u8]>())?;
        }
        for (c, v) in &report.post {
            info!(
                "{} repeat {} {}: {}",
                report.workload,
                report.repeat,
                c.heading(),
                c.format_value(v)
            );
        }
        self.writer.flush()?;
        Ok(())
    }

    fn end_run(&mut self) -> Result<(), Box<dyn Error>> {
        self.header_for = None;
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
use super::{SharedBuf, sample_report};

#[test]
fn test_header_once_per_workload() {
    let buf = SharedBuf::default();
    let mut csv = Csv::new(Box::new(buf.clone()));
    csv.start_run(&[]).unwrap();
    csv.push_repeat(&sample_report("a", 0)).unwrap();
    csv.push_repeat(&sample_report("a", 1)).unwrap();
    csv.push_repeat(&sample_report("b", 0)).unwrap();
    csv.end_run().unwrap();
    let text = buf.text();
    let lines: Vec<_> = text.lines().collect();
    assert_eq!(lines.len(), 2 + 9);
    assert_eq!(
        lines[0],
        "workload,repeat,tsc,period,deadline,payload,spins,retries,Cycles,IPC"
    );
    assert_eq!(lines[1], "a,0,1000,0,1000,10,12,0,1000.00,-");
    assert_eq!(lines[2], "a,0,2000,0,2000,10,12,0,1001.00,fail");
    assert_eq!(lines[7], lines[0]);
}
