//! Logging helpers that keep wire dumps and peripheral strings on one line.

use std::fmt::Write;

/// Escape a string for single-line logging:
/// - `\n` => `\\n`
/// - `\r` => `\\r`
/// - `\t` => `\\t`
/// - backslash => `\\\\`
///   Truncates very long strings (over `max_preview`) with an ellipsis to cap log noise.
pub fn escape_log(s: &str) -> String {
    const MAX_PREVIEW: usize = 300;
    let mut out = String::with_capacity(s.len().min(MAX_PREVIEW) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= MAX_PREVIEW {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// Render bytes as dotted upper-case hex followed by the length, e.g. `55.AA.00 (3)`.
///
/// Dumps longer than 64 bytes are cut short with an ellipsis before the count.
pub fn hex_pretty(bytes: &[u8]) -> String {
    const MAX_BYTES: usize = 64;
    if bytes.is_empty() {
        return String::from("(0)");
    }
    let mut out = String::with_capacity(bytes.len().min(MAX_BYTES) * 3 + 8);
    for (i, b) in bytes.iter().take(MAX_BYTES).enumerate() {
        if i > 0 {
            out.push('.');
        }
        let _ = write!(&mut out, "{:02X}", b);
    }
    if bytes.len() > MAX_BYTES {
        out.push('…');
    }
    let _ = write!(&mut out, " ({})", bytes.len());
    out
}
