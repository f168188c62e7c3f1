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

//! The full-featured [`Terminal`] backend, a thin wrapper around the
//! `vt100` crate's own `Parser`. Supports all three serialization formats;
//! `html` is synthesized here since `vt100` doesn't ship one itself.

use std::fmt::Write as _;

use vt100::Color;

use super::{Format, Terminal};

pub struct Vt100Terminal {
    parser: vt100::Parser,
}

impl Vt100Terminal {
    pub fn new(cols: u16, rows: u16, max_scrollback: usize) -> Vt100Terminal {
        Vt100Terminal { parser: vt100::Parser::new(rows, cols, max_scrollback) }
    }

    fn to_html(&self) -> Option<Vec<u8>> {
        let screen = self.parser.screen();
        let (rows, cols) = screen.size();
        if rows == 0 || cols == 0 {
            return None;
        }

        let mut out = String::new();
        out.push_str("<pre>");
        for row in 0..rows {
            if row > 0 {
                out.push('\n');
            }
            let mut open_span = false;
            for col in 0..cols {
                let Some(cell) = screen.cell(row, col) else { continue };
                let style = cell_style(cell);
                if !style.is_empty() {
                    if open_span {
                        out.push_str("</span>");
                    }
                    let _ = write!(out, "<span style=\"{style}\">");
                    open_span = true;
                } else if open_span {
                    out.push_str("</span>");
                    open_span = false;
                }
                for c in cell.contents().chars() {
                    match c {
                        '<' => out.push_str("&lt;"),
                        '>' => out.push_str("&gt;"),
                        '&' => out.push_str("&amp;"),
                        ' ' if cell.contents().is_empty() => {}
                        c => out.push(c),
                    }
                }
                if cell.contents().is_empty() {
                    out.push(' ');
                }
            }
            if open_span {
                out.push_str("</span>");
            }
        }
        out.push_str("</pre>");

        if out == "<pre></pre>" {
            None
        } else {
            Some(out.into_bytes())
        }
    }
}

fn cell_style(cell: &vt100::Cell) -> String {
    let mut decls = Vec::new();
    if let Some(c) = css_color(cell.fgcolor()) {
        decls.push(format!("color:{c}"));
    }
    if let Some(c) = css_color(cell.bgcolor()) {
        decls.push(format!("background-color:{c}"));
    }
    if cell.bold() {
        decls.push("font-weight:bold".to_string());
    }
    if cell.italic() {
        decls.push("font-style:italic".to_string());
    }
    if cell.underline() {
        decls.push("text-decoration:underline".to_string());
    }
    decls.join(";")
}

fn css_color(c: Color) -> Option<String> {
    match c {
        Color::Default => None,
        Color::Idx(i) => Some(format!("var(--zmx-ansi-{i})")),
        Color::Rgb(r, g, b) => Some(format!("#{r:02x}{g:02x}{b:02x}")),
    }
}

impl Terminal for Vt100Terminal {
    fn resize(&mut self, cols: u16, rows: u16) {
        self.parser.set_size(rows, cols);
    }

    fn feed(&mut self, bytes: &[u8]) {
        self.parser.process(bytes);
    }

    fn serialize(&self, format: Format) -> Option<Vec<u8>> {
        match format {
            Format::Plain => {
                let text = self.parser.screen().contents();
                let trimmed = text.trim_end_matches('\n');
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.as_bytes().to_vec())
                }
            }
            Format::Vt => {
                let bytes = self.parser.screen().contents_formatted();
                if bytes.is_empty() {
                    None
                } else {
                    Some(bytes)
                }
            }
            Format::Html => self.to_html(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn feeds_plain_text_and_serializes_it_back() {
        let mut term = Vt100Terminal::new(80, 24, 1000);
        term.feed(b"hello world");
        let plain = term.serialize(Format::Plain).unwrap();
        assert!(String::from_utf8(plain).unwrap().contains("hello world"));
    }

    #[test]
    fn empty_screen_serializes_to_none_in_plain_format() {
        let term = Vt100Terminal::new(80, 24, 1000);
        assert_eq!(term.serialize(Format::Plain), None);
    }

    #[test]
    fn vt_snapshot_is_nonempty_after_feeding_data() {
        let mut term = Vt100Terminal::new(80, 24, 1000);
        term.feed(b"some output\r\n");
        assert!(term.serialize(Format::Vt).is_some());
    }

    #[test]
    fn resize_does_not_panic_and_affects_subsequent_feed() {
        let mut term = Vt100Terminal::new(80, 24, 1000);
        term.resize(40, 12);
        term.feed(b"resized");
        assert!(term.serialize(Format::Plain).is_some());
    }
}
