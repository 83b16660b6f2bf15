//! Box-drawing table for the check summary.
//!
//! Widths are measured in characters before any styling is applied, so a
//! colored status column still lines up.

use colored::{ColoredString, Colorize};

/// Column alignment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Align {
    Left,
    Right,
}

pub struct Table {
    headers: Vec<String>,
    alignments: Vec<Align>,
    rows: Vec<Vec<String>>,
    status_column: Option<usize>,
}

impl Table {
    /// All columns default to left-alignment.
    pub fn new(headers: &[&str]) -> Self {
        let headers: Vec<String> = headers.iter().map(|h| h.to_string()).collect();
        let alignments = vec![Align::Left; headers.len()];
        Self {
            headers,
            alignments,
            rows: Vec::new(),
            status_column: None,
        }
    }

    /// Out-of-range columns are ignored.
    pub fn align(mut self, col: usize, alignment: Align) -> Self {
        if col < self.alignments.len() {
            self.alignments[col] = alignment;
        }
        self
    }

    /// Color `PASSED`/`FAILED` cells of `col` green/red.
    pub fn status_column(mut self, col: usize) -> Self {
        self.status_column = Some(col);
        self
    }

    /// Add a row. Extra cells are dropped; missing cells are empty.
    pub fn add_row(&mut self, cells: &[&str]) {
        let row: Vec<String> = (0..self.headers.len())
            .map(|i| cells.get(i).copied().unwrap_or_default().to_string())
            .collect();
        self.rows.push(row);
    }

    fn column_widths(&self) -> Vec<usize> {
        let mut widths: Vec<usize> = self.headers.iter().map(|h| width(h)).collect();
        for row in &self.rows {
            for (w, cell) in widths.iter_mut().zip(row) {
                *w = (*w).max(width(cell));
            }
        }
        widths
    }

    fn pad(text: &str, cols: usize, alignment: Align) -> String {
        let fill = " ".repeat(cols.saturating_sub(width(text)));
        match alignment {
            Align::Left => format!("{text}{fill}"),
            Align::Right => format!("{fill}{text}"),
        }
    }

    fn style(&self, col: usize, padded: String) -> ColoredString {
        if self.status_column != Some(col) {
            return padded.normal();
        }
        match padded.trim() {
            "PASSED" => padded.bright_green(),
            "FAILED" => padded.bright_red(),
            _ => padded.normal(),
        }
    }

    fn border(widths: &[usize], left: &str, mid: &str, right: &str) -> String {
        let segments: Vec<String> = widths.iter().map(|w| "\u{2500}".repeat(w + 2)).collect();
        format!("{left}{}{right}", segments.join(mid))
    }

    /// ```text
    /// ┌────────────────┬────────┐
    /// │ Check          │ Result │
    /// ├────────────────┼────────┤
    /// │ Library Import │ PASSED │
    /// └────────────────┴────────┘
    /// ```
    pub fn render(&self) -> String {
        let widths = self.column_widths();
        let mut lines = vec![Self::border(&widths, "\u{250c}", "\u{252c}", "\u{2510}")];

        let header: Vec<String> = self
            .headers
            .iter()
            .enumerate()
            .map(|(i, h)| format!(" {} ", Self::pad(h, widths[i], self.alignments[i]).bold()))
            .collect();
        lines.push(format!("\u{2502}{}\u{2502}", header.join("\u{2502}")));
        lines.push(Self::border(&widths, "\u{251c}", "\u{253c}", "\u{2524}"));

        for row in &self.rows {
            let cells: Vec<String> = row
                .iter()
                .enumerate()
                .map(|(i, cell)| {
                    let padded = Self::pad(cell, widths[i], self.alignments[i]);
                    format!(" {} ", self.style(i, padded))
                })
                .collect();
            lines.push(format!("\u{2502}{}\u{2502}", cells.join("\u{2502}")));
        }

        lines.push(Self::border(&widths, "\u{2514}", "\u{2534}", "\u{2518}"));
        lines.join("\n")
    }

    pub fn print(&self) {
        println!("{}", self.render());
    }
}

fn width(text: &str) -> usize {
    text.chars().count()
}
