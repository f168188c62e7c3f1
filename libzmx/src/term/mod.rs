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

//! The daemon's view of the shell's screen. Every byte that comes off the
//! pty master is fed here, in order, exactly once; client input never is.
//! The daemon only ever touches this through [`Terminal`] so the backend
//! (full `vt100` emulator vs. the thinner `vte`-based one) is an
//! implementation detail picked at compile time.

#[cfg(feature = "vt100-backend")]
pub mod vt100_backend;
#[cfg(feature = "vte-backend")]
pub mod vte_backend;

pub use zmx_protocol::HistoryFormat as Format;

/// An abstract VT-state machine, object-safe so the daemon can hold it as
/// `Box<dyn Terminal>` without caring which backend built it.
pub trait Terminal: Send {
    /// Grow or shrink the screen; may move the cursor and reflow wrapped
    /// lines depending on the backend.
    fn resize(&mut self, cols: u16, rows: u16);

    /// Append raw pty output to the VT state machine.
    fn feed(&mut self, bytes: &[u8]);

    /// Render the current state in `format`. `Plain` returns trimmed UTF-8
    /// text; `Vt` returns a self-contained byte stream that reproduces the
    /// screen, cursor, modes, and scrolling region when replayed into a
    /// freshly reset terminal; `Html` is backend-optional. `None` is also
    /// a legal answer for an empty screen in any format.
    fn serialize(&self, format: Format) -> Option<Vec<u8>>;

    /// Convenience for the re-attach snapshot: `serialize(Vt)` plus the
    /// cursor, i.e. exactly what a client needs to redraw the screen after
    /// reconnecting.
    fn serialize_state(&self) -> Option<Vec<u8>> {
        self.serialize(Format::Vt)
    }
}

/// Build the configured backend. Panics to link-error territory only if
/// both or neither Cargo feature is selected, which `Cargo.toml` prevents
/// via its `default = ["vt100-backend"]` / mutually-additive features.
pub fn new(cols: u16, rows: u16, max_scrollback: usize) -> Box<dyn Terminal> {
    #[cfg(feature = "vt100-backend")]
    {
        Box::new(vt100_backend::Vt100Terminal::new(cols, rows, max_scrollback))
    }
    #[cfg(all(feature = "vte-backend", not(feature = "vt100-backend")))]
    {
        Box::new(vte_backend::VteTerminal::new(cols, rows, max_scrollback))
    }
}
