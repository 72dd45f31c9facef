//! Turning captured shell bytes into caller-facing text.

use vte::{Parser, Perform};

/// Converts raw command output into text.
pub struct OutputSanitizer;

impl OutputSanitizer {
    /// Turn captured command bytes into the text handed back to callers.
    ///
    /// Terminal output (`strip_ansi == true`) goes through the VTE parser
    /// first. Either way `\r\n` line endings collapse to `\n`.
    pub fn clean(input: &[u8], strip_ansi: bool) -> String {
        let text = if strip_ansi {
            Self::strip_ansi(input)
        } else {
            String::from_utf8_lossy(input).into_owned()
        };
        Self::normalize_newlines(&text)
    }

    /// Replace `\r\n` with `\n`, leaving lone carriage returns alone.
    pub fn normalize_newlines(input: &str) -> String {
        input.replace("\r\n", "\n")
    }

    /// Drop escape sequences and terminal controls from PTY output.
    ///
    /// Printable text, `\n`, `\r` and `\t` survive. A backspace erases the
    /// character before it, as line editing on the terminal would.
    pub fn strip_ansi(input: &[u8]) -> String {
        let mut text = TerminalText::default();
        Parser::new().advance(&mut text, input);
        text.0
    }
}

/// Collects what a terminal would print, minus sequences and controls.
#[derive(Default)]
struct TerminalText(String);

impl Perform for TerminalText {
    fn print(&mut self, c: char) {
        self.0.push(c);
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            b'\n' | b'\r' | b'\t' => self.0.push(byte as char),
            0x08 => {
                if self.0.ends_with(|c: char| c != '\n') {
                    self.0.pop();
                }
            }
            _ => {}
        }
    }
}
