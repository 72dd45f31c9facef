//! Output processing and sanitization.
//!
//! Shells attached to a terminal decorate their output with control
//! sequences; this module turns captured bytes back into plain text.
//!
//! # Example
//!
//! ```
//! use arbitrium::output::OutputSanitizer;
//!
//! let raw = b"\x1b[31mRed text\x1b[0m\r\n";
//! let clean = OutputSanitizer::clean(raw, true);
//! assert_eq!(clean, "Red text\n");
//! ```

mod sanitizer;

pub use sanitizer::OutputSanitizer;
