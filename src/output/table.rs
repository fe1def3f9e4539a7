#![forbid(unsafe_code)]

/// Column-aligned text for `list`: cells are left-aligned, joined by two spaces,
/// and the last column is left ragged.
#[derive(Debug)]
pub struct Table<const N: usize> {
    rows: Vec<[String; N]>,
}

impl<const N: usize> Table<N> {
    pub fn new(headers: [&str; N]) -> Self {
        Self {
            rows: vec![headers.map(str::to_owned)],
        }
    }

    pub fn row(&mut self, cells: [String; N]) {
        self.rows.push(cells);
    }

    #[must_use]
    pub fn render(&self) -> String {
        let widths: [usize; N] = std::array::from_fn(|col| {
            self.rows
                .iter()
                .map(|r| r[col].chars().count())
                .max()
                .unwrap_or(0)
        });

        let mut out = String::new();
        for row in &self.rows {
            let mut line = String::new();
            for (col, cell) in row.iter().enumerate() {
                if col + 1 < N {
                    line.push_str(&format!("{cell:<width$}  ", width = widths[col]));
                } else {
                    line.push_str(cell);
                }
            }
            out.push_str(line.trim_end());
            out.push('\n');
        }
        out
    }
}
