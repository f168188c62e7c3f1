// Copyright 2024 The zmx Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The thin [`Terminal`] backend: `vte`'s sequence parser driving a
//! minimal cell grid we own and walk ourselves. No html serialization
//! (the trait contract allows returning `None`), and scrollback is a
//! plain ring buffer of rows capped at the configured maximum instead of
//! `vt100`'s richer cell-attribute history.

use std::collections::VecDeque;

use vte::{Params, Parser, Perform};

use super::{Format, Terminal};

#[derive(Clone)]
struct Row {
    cells: Vec<char>,
}

impl Row {
    fn blank(cols: usize) -> Row {
        Row { cells: vec![' '; cols] }
    }

    fn text(&self) -> String {
        self.cells.iter().collect::<String>().trim_end().to_string()
    }
}

struct Grid {
    cols: usize,
    rows: usize,
    max_scrollback: usize,
    scrollback: VecDeque<Row>,
    screen: Vec<Row>,
    cursor_row: usize,
    cursor_col: usize,
}

impl Grid {
    fn new(cols: u16, rows: u16, max_scrollback: usize) -> Grid {
        let cols = cols.max(1) as usize;
        let rows = rows.max(1) as usize;
        Grid {
            cols,
            rows,
            max_scrollback,
            scrollback: VecDeque::new(),
            screen: vec![Row::blank(cols); rows],
            cursor_row: 0,
            cursor_col: 0,
        }
    }

    fn resize(&mut self, cols: u16, rows: u16) {
        let cols = cols.max(1) as usize;
        let rows = rows.max(1) as usize;
        for row in self.screen.iter_mut() {
            row.cells.resize(cols, ' ');
        }
        if rows > self.screen.len() {
            self.screen.resize(rows, Row::blank(cols));
        } else {
            self.screen.truncate(rows.max(1));
        }
        self.cols = cols;
        self.rows = rows;
        self.cursor_row = self.cursor_row.min(self.rows.saturating_sub(1));
        self.cursor_col = self.cursor_col.min(self.cols.saturating_sub(1));
    }

    fn put(&mut self, c: char) {
        if self.cursor_col >= self.cols {
            self.newline();
        }
        self.screen[self.cursor_row].cells[self.cursor_col] = c;
        self.cursor_col += 1;
    }

    fn newline(&mut self) {
        self.cursor_col = 0;
        if self.cursor_row + 1 >= self.rows {
            let scrolled = self.screen.remove(0);
            self.scrollback.push_back(scrolled);
            while self.scrollback.len() > self.max_scrollback {
                self.scrollback.pop_front();
            }
            self.screen.push(Row::blank(self.cols));
        } else {
            self.cursor_row += 1;
        }
    }

    fn carriage_return(&mut self) {
        self.cursor_col = 0;
    }

    fn backspace(&mut self) {
        self.cursor_col = self.cursor_col.saturating_sub(1);
    }

    fn tab(&mut self) {
        self.cursor_col = ((self.cursor_col / 8) + 1) * 8;
        if self.cursor_col >= self.cols {
            self.cursor_col = self.cols - 1;
        }
    }

    fn cursor_move(&mut self, row: Option<usize>, col: Option<usize>) {
        if let Some(r) = row {
            self.cursor_row = r.saturating_sub(1).min(self.rows.saturating_sub(1));
        }
        if let Some(c) = col {
            self.cursor_col = c.saturating_sub(1).min(self.cols.saturating_sub(1));
        }
    }

    fn erase_in_display(&mut self) {
        for row in self.screen.iter_mut() {
            row.cells.fill(' ');
        }
    }

    fn erase_in_line(&mut self) {
        self.screen[self.cursor_row].cells.fill(' ');
    }

    fn contents(&self) -> String {
        let mut lines: Vec<String> =
            self.scrollback.iter().chain(self.screen.iter()).map(Row::text).collect();
        while lines.last().is_some_and(|l| l.is_empty()) {
            lines.pop();
        }
        lines.join("\n")
    }

    /// A self-contained replay of just the visible screen: clear-and-home,
    /// every row of `self.screen` in order, then an absolute cursor-position
    /// sequence so a freshly reset terminal ends up looking exactly like
    /// this one. Scrollback isn't part of the visible screen so it's left
    /// out, same as a real terminal redraw would.
    fn vt_bytes(&self) -> Vec<u8> {
        let mut out = String::from("\x1b[2J\x1b[H");
        for (i, row) in self.screen.iter().enumerate() {
            if i > 0 {
                out.push_str("\r\n");
            }
            out.push_str(&row.text());
        }
        out.push_str(&format!("\x1b[{};{}H", self.cursor_row + 1, self.cursor_col + 1));
        out.into_bytes()
    }
}

struct GridPerform<'a> {
    grid: &'a mut Grid,
}

impl Perform for GridPerform<'_> {
    fn print(&mut self, c: char) {
        self.grid.put(c);
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            b'\r' => self.grid.carriage_return(),
            b'\n' => self.grid.newline(),
            0x08 => self.grid.backspace(),
            b'\t' => self.grid.tab(),
            _ => {}
        }
    }

    fn csi_dispatch(&mut self, params: &Params, _intermediates: &[u8], _ignore: bool, c: char) {
        let nums: Vec<u16> = params.iter().map(|p| p.first().copied().unwrap_or(0)).collect();
        match c {
            'H' | 'f' => {
                let row = nums.first().copied().unwrap_or(1).max(1) as usize;
                let col = nums.get(1).copied().unwrap_or(1).max(1) as usize;
                self.grid.cursor_move(Some(row), Some(col));
            }
            'A' => self.grid.cursor_row =
                self.grid.cursor_row.saturating_sub(nums.first().copied().unwrap_or(1).max(1) as usize),
            'B' => self.grid.cursor_row =
                (self.grid.cursor_row + nums.first().copied().unwrap_or(1).max(1) as usize)
                    .min(self.grid.rows.saturating_sub(1)),
            'C' => self.grid.cursor_col =
                (self.grid.cursor_col + nums.first().copied().unwrap_or(1).max(1) as usize)
                    .min(self.grid.cols.saturating_sub(1)),
            'D' => self.grid.cursor_col =
                self.grid.cursor_col.saturating_sub(nums.first().copied().unwrap_or(1).max(1) as usize),
            'J' => self.grid.erase_in_display(),
            'K' => self.grid.erase_in_line(),
            _ => {}
        }
    }
}

pub struct VteTerminal {
    parser: Parser,
    grid: Grid,
}

impl VteTerminal {
    pub fn new(cols: u16, rows: u16, max_scrollback: usize) -> VteTerminal {
        VteTerminal { parser: Parser::new(), grid: Grid::new(cols, rows, max_scrollback) }
    }
}

impl Terminal for VteTerminal {
    fn resize(&mut self, cols: u16, rows: u16) {
        self.grid.resize(cols, rows);
    }

    fn feed(&mut self, bytes: &[u8]) {
        let mut perform = GridPerform { grid: &mut self.grid };
        for &b in bytes {
            self.parser.advance(&mut perform, b);
        }
    }

    fn serialize(&self, format: Format) -> Option<Vec<u8>> {
        match format {
            Format::Plain => {
                let text = self.grid.contents();
                if text.is_empty() {
                    None
                } else {
                    Some(text.into_bytes())
                }
            }
            Format::Vt => {
                if self.grid.contents().is_empty() {
                    None
                } else {
                    Some(self.grid.vt_bytes())
                }
            }
            Format::Html => None,
        }
    }
}
