//! Rendering of `(source, line)` pairs for the terminal.

use std::collections::HashMap;

use owo_colors::{AnsiColors, OwoColorize, Style};

/// Renders one emitted line together with the source it came from.
///
/// The returned string is written as-is, so it keeps the line's terminator.
pub trait Formatter {
    fn format(&mut self, source: &str, line: &[u8]) -> String;
}

impl<F: Formatter + ?Sized> Formatter for Box<F> {
    fn format(&mut self, source: &str, line: &[u8]) -> String {
        (**self).format(source, line)
    }
}

/// `source: line`, no escapes.
#[derive(Debug, Default)]
pub struct PlainFormatter;

impl PlainFormatter {
    pub fn new() -> Self {
        PlainFormatter
    }
}

impl Formatter for PlainFormatter {
    fn format(&mut self, source: &str, line: &[u8]) -> String {
        format!("{}: {}", source, String::from_utf8_lossy(line))
    }
}

const PALETTE: [AnsiColors; 7] = [
    AnsiColors::Blue,
    AnsiColors::Green,
    AnsiColors::Cyan,
    AnsiColors::Red,
    AnsiColors::Magenta,
    AnsiColors::Yellow,
    AnsiColors::White,
];

/// Prefixes each line with its source in a bold color, the same color for
/// the same source for the whole session.
///
/// Colors are handed out in palette order as sources are first seen, wrapping
/// around once the palette is exhausted.
#[derive(Debug, Default)]
pub struct ColorFormatter {
    slots: HashMap<String, usize>,
    next: usize,
}

impl ColorFormatter {
    pub fn new() -> Self {
        ColorFormatter::default()
    }

    /// Palette slot assigned to `source`, assigning the next one if the
    /// source is new.
    pub fn slot(&mut self, source: &str) -> usize {
        if let Some(slot) = self.slots.get(source) {
            return *slot;
        }

        let slot = self.next;
        self.slots.insert(source.to_string(), slot);
        self.next = (self.next + 1) % PALETTE.len();
        slot
    }

    pub fn palette_len() -> usize {
        PALETTE.len()
    }
}

impl Formatter for ColorFormatter {
    fn format(&mut self, source: &str, line: &[u8]) -> String {
        let style = Style::new().color(PALETTE[self.slot(source)]).bold();
        let label = format!("{}:", source);
        format!("{} {}", label.style(style), String::from_utf8_lossy(line))
    }
}
