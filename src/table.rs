//! Fixed-layout text tables for display commands.
//!
//! Column alignment is fixed per report. Each column is as wide as the
//! widest of its minimum width, its header lines and its cells. Headers may
//! span several lines (`"ONT\nID"`); every header line is aligned like the
//! cells beneath it.

/// Horizontal alignment of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Right,
    /// Extra padding goes to the right when it cannot be split evenly.
    Center,
}

/// One column of a report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub title: &'static str,
    pub align: Align,
    pub min_width: usize,
}

impl Column {
    pub const fn new(title: &'static str, align: Align, min_width: usize) -> Self {
        Self {
            title,
            align,
            min_width,
        }
    }

    fn title_lines(&self) -> Vec<&'static str> {
        self.title.split('\n').collect()
    }
}

const INDENT: &str = "  ";
const GAP: &str = "  ";

/// A table of string cells rendered with [`Column`] layout rules.
#[derive(Debug, Clone)]
pub struct Table {
    columns: Vec<Column>,
    rows: Vec<Vec<String>>,
    rule_width: Option<usize>,
}

impl Table {
    pub fn new(columns: &[Column]) -> Self {
        Self {
            columns: columns.to_vec(),
            rows: Vec::new(),
            rule_width: None,
        }
    }

    /// Draws rules with exactly `width` dashes instead of the table width.
    pub fn with_rule(mut self, width: usize) -> Self {
        self.rule_width = Some(width);
        self
    }

    /// Appends a row. Missing trailing cells render as empty.
    pub fn push_row<I, S>(&mut self, cells: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rows.push(cells.into_iter().map(Into::into).collect());
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Resolved width of every column.
    pub fn widths(&self) -> Vec<usize> {
        self.columns
            .iter()
            .enumerate()
            .map(|(idx, column)| {
                let header = column
                    .title_lines()
                    .iter()
                    .map(|line| line.chars().count())
                    .max()
                    .unwrap_or(0);
                let cells = self
                    .rows
                    .iter()
                    .filter_map(|row| row.get(idx))
                    .map(|cell| cell.chars().count())
                    .max()
                    .unwrap_or(0);
                column.min_width.max(header).max(cells)
            })
            .collect()
    }

    /// Dashed rule spanning the full table width.
    pub fn separator(&self) -> String {
        if let Some(width) = self.rule_width {
            return rule(width);
        }
        let widths = self.widths();
        let gaps = widths.len().saturating_sub(1) * GAP.len();
        rule(widths.iter().sum::<usize>() + gaps)
    }

    /// Header lines, one per title line.
    pub fn header_lines(&self) -> Vec<String> {
        let widths = self.widths();
        let height = self
            .columns
            .iter()
            .map(|column| column.title_lines().len())
            .max()
            .unwrap_or(0);
        (0..height)
            .map(|line| {
                let cells = self.columns.iter().map(|column| {
                    column
                        .title_lines()
                        .get(line)
                        .copied()
                        .unwrap_or("")
                        .to_string()
                });
                self.format_line(cells, &widths)
            })
            .collect()
    }

    /// Body lines, one per row.
    pub fn row_lines(&self) -> Vec<String> {
        let widths = self.widths();
        self.rows
            .iter()
            .map(|row| {
                let cells = (0..self.columns.len())
                    .map(|idx| row.get(idx).cloned().unwrap_or_default());
                self.format_line(cells, &widths)
            })
            .collect()
    }

    /// Full report: rule, header, rule, rows, rule.
    pub fn render(&self) -> Vec<String> {
        let separator = self.separator();
        let mut lines = vec![separator.clone()];
        lines.extend(self.header_lines());
        lines.push(separator.clone());
        lines.extend(self.row_lines());
        lines.push(separator);
        lines
    }

    fn format_line(&self, cells: impl Iterator<Item = String>, widths: &[usize]) -> String {
        let padded = cells
            .zip(self.columns.iter())
            .zip(widths.iter())
            .map(|((cell, column), width)| pad(&cell, column.align, *width))
            .collect::<Vec<_>>();
        format!("{INDENT}{}", padded.join(GAP))
    }
}

/// Indented dashed rule of `width` dashes.
pub fn rule(width: usize) -> String {
    format!("{INDENT}{}", "-".repeat(width))
}

/// Pads `text` to `width` characters. Text wider than `width` is returned unchanged.
pub fn pad(text: &str, align: Align, width: usize) -> String {
    let len = text.chars().count();
    if len >= width {
        return text.to_string();
    }
    let fill = width - len;
    match align {
        Align::Left => format!("{text}{}", " ".repeat(fill)),
        Align::Right => format!("{}{text}", " ".repeat(fill)),
        Align::Center => {
            let left = fill / 2;
            format!("{}{text}{}", " ".repeat(left), " ".repeat(fill - left))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLUMNS: &[Column] = &[
        Column::new("ID", Align::Right, 4),
        Column::new("Name", Align::Left, 0),
        Column::new("SN", Align::Center, 6),
    ];

    #[test]
    fn pad_respects_alignment() {
        assert_eq!(pad("ab", Align::Left, 5), "ab   ");
        assert_eq!(pad("ab", Align::Right, 5), "   ab");
        assert_eq!(pad("ab", Align::Center, 5), " ab  ");
        assert_eq!(pad("abcdef", Align::Right, 3), "abcdef");
    }

    #[test]
    fn widths_take_max_of_minimum_header_and_cells() {
        let mut table = Table::new(COLUMNS);
        table.push_row(["1", "alpha", "X"]);
        table.push_row(["22", "b", "ABCDEFGH"]);
        assert_eq!(table.widths(), vec![4, 5, 8]);
    }

    #[test]
    fn render_is_bit_exact() {
        let mut table = Table::new(COLUMNS);
        table.push_row(["1", "alpha", "X"]);
        let lines = table.render();
        assert_eq!(
            lines,
            vec![
                "  -------------------".to_string(),
                "    ID  Name     SN  ".to_string(),
                "  -------------------".to_string(),
                "     1  alpha    X   ".to_string(),
                "  -------------------".to_string(),
            ]
        );
    }

    #[test]
    fn multi_line_headers_pad_short_columns() {
        let columns = [
            Column::new("ONT\nID", Align::Right, 0),
            Column::new("SN", Align::Left, 0),
        ];
        let mut table = Table::new(&columns);
        table.push_row(["7", "ABC"]);
        assert_eq!(
            table.header_lines(),
            vec!["  ONT  SN ".to_string(), "   ID     ".to_string()]
        );
        assert_eq!(table.row_lines(), vec!["    7  ABC".to_string()]);
    }

    #[test]
    fn fixed_rule_overrides_table_width() {
        let table = Table::new(COLUMNS).with_rule(5);
        assert_eq!(table.separator(), "  -----");
    }

    #[test]
    fn missing_cells_render_blank() {
        let mut table = Table::new(COLUMNS);
        table.push_row(["5"]);
        assert_eq!(table.row_lines(), vec!["     5              ".to_string()]);
    }
}
