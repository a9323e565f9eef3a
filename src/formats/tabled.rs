use super::{Format, SAMPLE_FIELDS};
use crate::{columns::Column, report::RepeatReport};
use std::{
    error::Error,
    io::{Write, stdout},
    iter,
};
use tabled::{builder::Builder, settings::Style};

/// A markdown table per repeat, closed by `min`, `max` and `median` rows.
pub struct Tabled {
    out: Box<dyn Write>,
}

impl Tabled {
    pub fn new() -> Self {
        Self::with_writer(Box::new(stdout()))
    }

    pub fn with_writer(out: Box<dyn Write>) -> Self {
        Tabled { out }
    }
}

impl Default for Tabled {
    fn default() -> Self {
        Self::new()
    }
}

fn render(report: &RepeatReport) -> String {
    let mut table = Builder::new();
    table.push_record(
        SAMPLE_FIELDS
            .iter()
            .map(|x| x.to_string())
            .chain(report.columns.iter().map(|c| c.heading().to_string())),
    );
    for row in &report.rows {
        let fixed = [
            report.repeat as u64,
            row.elapsed,
            row.period as u64,
            row.deadline,
            row.payload_calls,
            row.spins,
            row.retries as u64,
        ];
        table.push_record(
            fixed.iter().map(u64::to_string).chain(
                report
                    .columns
                    .iter()
                    .zip(&row.values)
                    .map(|(c, v)| c.format_value(v)),
            ),
        );
    }
    let summaries: Vec<_> = (0..report.columns.len()).map(|i| report.summary(i)).collect();
    let stats: [(&str, fn(&crate::report::ColumnSummary) -> f64); 3] = [
        ("min", |s| s.min),
        ("max", |s| s.max),
        ("median", |s| s.median),
    ];
    for (label, stat) in stats {
        table.push_record(
            iter::once(label.to_string())
                .chain(iter::repeat_n(String::new(), SAMPLE_FIELDS.len() - 1))
                .chain(report.columns.iter().zip(&summaries).map(|(c, s)| {
                    c.format_value(&Ok(s.as_ref().map_or(f64::NAN, stat)))
                })),
        );
    }
    let mut table = table.build();
    table.with(Style::markdown());
    table.to_string()
}

impl Format for Tabled {
    fn start_run(&mut self, _columns: &[Column]) -> Result<(), Box<dyn Error>> {
        Ok(())
    }

    fn push_repeat(&mut self, report: &RepeatReport) -> Result<(), Box<dyn Error>> {
        writeln!(self.out, "\n{} repeat {}\n", report.workload, report.repeat)?;
        writeln!(self.out, "{}", render(report))?;
        for (c, v) in &report.post {
            writeln!(self.out, "{}: {}", c.heading(), c.format_value(v))?;
        }
        Ok(())
    }

    fn end_run(&mut self) -> Result<(), Box<dyn Error>> {
        self.out.flush()?;
        Ok(())
    }
}

#[test]
fn test_markdown_with_summary() {
    use super::{SharedBuf, sample_report};
    let buf = SharedBuf::default();
    let mut tabled = Tabled::with_writer(Box::new(buf.clone()));
    tabled.start_run(&[]).unwrap();
    tabled.push_repeat(&sample_report("memcpy", 2)).unwrap();
    tabled.end_run().unwrap();
    let text = buf.text();
    assert!(text.contains("memcpy repeat 2"));
    let rows: Vec<_> = text.lines().filter(|l| l.starts_with('|')).collect();
    // header, separator, three samples, three summary rows
    assert_eq!(rows.len(), 8);
    assert!(rows[0].contains("Cycles") && rows[0].contains("IPC"));
    assert!(rows[3].contains("fail"));
    let median = rows[7];
    assert!(median.contains("median") && median.contains("1001.00"));
    assert!(rows[5].contains("min") && rows[5].contains("1000.00"));
    let cells: Vec<_> = rows[5].split('|').map(str::trim).collect();
    assert_eq!(cells[cells.len() - 2], "-");
}
