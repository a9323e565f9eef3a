use super::{Format, LiveTable, TabledFloat};
use crate::{columns::Column, report::RepeatReport};
use std::{
    error::Error,
    io::{Write, stdout},
};

const CELL_WIDTH: usize = 9;
const LEADING: [&str; 5] = ["workload", "repeat", "tsc", "period", "retries"];

/// Streams samples into a [`LiveTable`] as each repeat completes.
pub struct Live {
    line_len: usize,
    sink: Option<Box<dyn FnMut() -> Box<dyn Write>>>,
    table: Option<LiveTable>,
}

impl Live {
    /// `line_len` overrides the terminal width.
    pub fn new(line_len: Option<usize>) -> Self {
        Live {
            line_len: line_len
                .or_else(|| terminal_size::terminal_size().map(|x| x.0.0 as usize))
                .unwrap_or(160),
            sink: None,
            table: None,
        }
    }

    /// Writes to whatever `sink` returns instead of stdout. Called once per table.
    pub fn with_sink(line_len: usize, sink: impl FnMut() -> Box<dyn Write> + 'static) -> Self {
        Live {
            line_len,
            sink: Some(Box::new(sink)),
            table: None,
        }
    }

    fn open(&mut self, report: &RepeatReport) -> Result<&mut LiveTable, Box<dyn Error>> {
        let out = match &mut self.sink {
            Some(sink) => sink(),
            None => Box::new(stdout()),
        };
        let widths = vec![CELL_WIDTH; LEADING.len() + report.columns.len()];
        let table = self
            .table
            .insert(LiveTable::new(out, &widths, self.line_len));
        for x in LEADING {
            table.push(x.to_string())?;
        }
        for c in &report.columns {
            table.push(c.heading().to_string())?;
        }
        Ok(table)
    }
}

impl Format for Live {
    fn start_run(&mut self, _columns: &[Column]) -> Result<(), Box<dyn Error>> {
        Ok(())
    }

    fn push_repeat(&mut self, report: &RepeatReport) -> Result<(), Box<dyn Error>> {
        let table = match self.table.take() {
            Some(t) => self.table.insert(t),
            None => self.open(report)?,
        };
        for row in &report.rows {
            table.push(report.workload.to_string())?;
            table.push(report.repeat.to_string())?;
            table.push(TabledFloat(row.elapsed as f64).to_string())?;
            table.push(row.period.to_string())?;
            table.push(row.retries.to_string())?;
            for v in &row.values {
                let cell = match v {
                    Ok(x) => TabledFloat(*x).to_string(),
                    Err(failed) => failed.placeholder.clone(),
                };
                table.push(cell)?;
            }
        }
        if !report.post.is_empty() {
            table.end_table()?;
            self.table = None;
            let mut out = match &mut self.sink {
                Some(sink) => sink(),
                None => Box::new(stdout()),
            };
            for (c, v) in &report.post {
                writeln!(out, "{}: {}", c.heading(), c.format_value(v))?;
            }
        }
        Ok(())
    }

    fn end_run(&mut self) -> Result<(), Box<dyn Error>> {
        if let Some(table) = &mut self.table {
            table.end_table()?;
        }
        self.table = None;
        Ok(())
    }
}

#[test]
fn test_live_rows() {
    use super::{SharedBuf, sample_report};
    let buf = SharedBuf::default();
    let sink_buf = buf.clone();
    let mut live = Live::with_sink(200, move || Box::new(sink_buf.clone()));
    live.start_run(&[]).unwrap();
    live.push_repeat(&sample_report("sum", 0)).unwrap();
    live.push_repeat(&sample_report("sum", 1)).unwrap();
    live.end_run().unwrap();
    let text = buf.text();
    let lines: Vec<_> = text.lines().collect();
    // head, header row, then a separator and a content line per sample, foot
    assert_eq!(lines.len(), 2 + 2 * 6 + 1);
    assert!(lines[1].contains("Cycles"));
    let cells: Vec<_> = lines[3].split('│').map(str::trim).collect();
    assert_eq!(cells[1..cells.len() - 1], ["sum", "0", "1.0 k", "0", "0", "1.0 k", "-"]);
    assert!(lines[5].contains("fail"));
    assert!(lines.last().unwrap().starts_with('└'));
}
