//! Small helpers shared across the compiler pipeline: debug tracing and
//! source-span rendering.

use crate::lexer::Span;
use std::fmt;

/// Macro that can wrap any body, and only executes the body if we are running
/// in debug mode. Debug mode is enabled by setting the environment variable
/// DEBUG=true. This compiles away to nothing when --release is used.
///
/// Example:
/// ```
/// use pscal_core::debug;
/// debug!(println!("Hello!"));
/// ```
#[macro_export]
macro_rules! debug {
    ($arg:expr) => {
        #[cfg(debug_assertions)]
        {
            if let Ok(debug_val) = std::env::var("DEBUG") {
                if debug_val.to_lowercase().as_str() == "true" {
                    $arg
                }
            }
        }
    };
}

/// Recovers the literal source text covered by `span` out of the full
/// `source` string, by byte offset. Returns an empty slice if the span's
/// bounds fall outside `source` (can happen for a synthetic/point span).
pub fn span_slice<'a>(source: &'a str, span: &Span) -> &'a str {
    let end = (span.offset + span.length).min(source.len());
    let start = span.offset.min(end);
    &source[start..end]
}

/// Writes a `^^^` caret highlight under the source slice covered by `span`,
/// using `source` to recover the full line the span starts on.
pub fn fmt_src_highlights(
    f: &mut fmt::Formatter<'_>,
    span: &Span,
    source: &str,
) -> fmt::Result {
    let line = source.lines().nth(span.start_line.saturating_sub(1));
    if let Some(line) = line {
        writeln!(f)?;
        writeln!(f, "{}", line)?;
        let pad = " ".repeat(span.start_col.saturating_sub(1));
        let carets = "^".repeat(span.length.max(1));
        write!(f, "{}{}", pad, carets)?;
    }
    Ok(())
}
