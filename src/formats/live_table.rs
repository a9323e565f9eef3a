use std::{
    io::{self, Write},
    iter,
};

/// A box-drawn table that is printed row by row as cells arrive.
///
/// Columns that do not fit into the line width wrap into additional line groups,
/// so one logical row may span several physical rows.
pub struct LiveTable {
    out: Box<dyn Write>,
    groups: Vec<Vec<usize>>,
    current_group: usize,
    group_separators: Vec<String>,
    head: String,
    foot: String,
    pending: Vec<String>,
    started: bool,
}

fn group_width(g: &[usize]) -> usize {
    g.iter().sum::<usize>() + g.len() + 1
}

/// Packs `requested` widths into groups fitting `line_width`, then widens the first column of
/// every group so all groups are equally wide.
fn layout(requested: &[usize], line_width: usize) -> Vec<Vec<usize>> {
    let mut groups = Vec::new();
    let mut group = Vec::new();
    let mut width = 1;
    for &w in requested {
        if width + w + 1 > line_width && !group.is_empty() {
            groups.push(std::mem::take(&mut group));
            width = 1;
        }
        group.push(w.min(line_width - width - 1));
        width += w + 1;
    }
    if !group.is_empty() {
        groups.push(group);
    }
    let widest = groups.iter().map(|g| group_width(g)).max().unwrap_or(2);
    for g in &mut groups {
        g[0] += widest.saturating_sub(group_width(g));
    }
    groups
}

/// A horizontal rule between a row laid out as `above` and one laid out as `below`.
/// `joints` is indexed by a two bit mask: column border above (1) and below (2).
fn rule(above: &[usize], below: &[usize], ends: (&str, &str), joints: [&str; 4]) -> String {
    let mut kinds = vec![0u8; group_width(above) - 2];
    let mut mark = |widths: &[usize], bit: u8| {
        let mut pos = 0;
        for w in &widths[..widths.len() - 1] {
            pos += w;
            kinds[pos] |= bit;
            pos += 1;
        }
    };
    mark(above, 1);
    mark(below, 2);
    iter::once(ends.0)
        .chain(kinds.iter().map(|k| joints[*k as usize]))
        .chain([ends.1, "\n"])
        .collect()
}

impl LiveTable {
    pub fn new(out: Box<dyn Write>, column_widths: &[usize], line_width: usize) -> Self {
        assert!(!column_widths.is_empty(), "live table without columns");
        let groups = layout(column_widths, line_width.max(9));
        let n = groups.len();
        let group_separators = (0..n)
            .map(|i| {
                let dash = if i == 0 { "─" } else { "╌" };
                rule(&groups[(i + n - 1) % n], &groups[i], ("├", "┤"), [dash, "┴", "┬", "┼"])
            })
            .collect();
        LiveTable {
            out,
            head: rule(&groups[0], &groups[0], ("┌", "┐"), ["─", "─", "┬", "┬"]),
            foot: rule(&groups[n - 1], &groups[n - 1], ("└", "┘"), ["─", "┴", "─", "┴"]),
            group_separators,
            current_group: 0,
            pending: Vec::new(),
            started: false,
            groups,
        }
    }

    pub fn column_count(&self) -> usize {
        self.groups.iter().map(Vec::len).sum()
    }

    /// Adds the next cell, printing a line group as soon as it is complete.
    pub fn push(&mut self, cell: String) -> io::Result<()> {
        self.pending.push(cell);
        if self.pending.len() < self.groups[self.current_group].len() {
            return Ok(());
        }
        if self.started {
            self.out
                .write_all(self.group_separators[self.current_group].as_bytes())?;
        } else {
            self.started = true;
            self.out.write_all(self.head.as_bytes())?;
        }
        self.write_group()?;
        self.current_group = (self.current_group + 1) % self.groups.len();
        Ok(())
    }

    fn write_group(&mut self) -> io::Result<()> {
        let widths = &self.groups[self.current_group];
        let wrapped: Vec<_> = self
            .pending
            .iter()
            .zip(widths)
            .map(|(s, w)| textwrap::wrap(s, *w))
            .collect();
        let height = wrapped.iter().map(Vec::len).max().unwrap_or(0);
        for line in 0..height {
            write!(self.out, "│")?;
            for (cell, &width) in wrapped.iter().zip(widths) {
                let text = cell.get(line).map(|x| x.as_ref()).unwrap_or("");
                write!(self.out, "{text:^width$}│")?;
            }
            writeln!(self.out)?;
        }
        self.pending.clear();
        Ok(())
    }

    /// Closes the table. The next push starts a new one.
    pub fn end_table(&mut self) -> io::Result<()> {
        if self.started {
            self.out.write_all(self.foot.as_bytes())?;
            self.started = false;
            self.current_group = 0;
        }
        self.out.flush()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }
}

#[test]
fn test_layout() {
    let cases = [
        (vec![10, 10, 10], 40, vec![vec![10, 10, 10]]),
        (vec![10, 10, 10], 25, vec![vec![10, 10], vec![21]]),
        (vec![10, 5, 10], 25, vec![vec![10, 5], vec![16]]),
        (vec![20, 10, 5], 25, vec![vec![20], vec![14, 5]]),
        (vec![20, 10, 30], 25, vec![vec![23], vec![23], vec![23]]),
        (vec![9; 4], 30, vec![vec![9, 9], vec![9, 9]]),
    ];
    for (requested, line, expected) in cases {
        assert_eq!(layout(&requested, line), expected, "{requested:?} in {line}");
    }
}

#[test]
fn test_rows_wrap_into_groups() {
    use super::SharedBuf;
    let buf = SharedBuf::default();
    let mut t = LiveTable::new(Box::new(buf.clone()), &[5, 5, 5], 13);
    assert_eq!(t.column_count(), 3);
    for x in ["a", "b", "c", "d", "e", "f"] {
        t.push(x.to_string()).unwrap();
    }
    t.end_table().unwrap();
    assert!(!t.is_started());
    let text = buf.text();
    let lines: Vec<_> = text.lines().collect();
    assert_eq!(
        lines,
        [
            "┌─────┬─────┐",
            "│  a  │  b  │",
            "├╌╌╌╌╌┴╌╌╌╌╌┤",
            "│     c     │",
            "├─────┬─────┤",
            "│  d  │  e  │",
            "├╌╌╌╌╌┴╌╌╌╌╌┤",
            "│     f     │",
            "└───────────┘",
        ]
    );
}
