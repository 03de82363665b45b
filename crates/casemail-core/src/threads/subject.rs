//! Subject normalisation

use regex::Regex;
use std::sync::OnceLock;

/// Placeholder for threads whose subject is empty after stripping
pub const NO_SUBJECT: &str = "(No Subject)";

fn reply_prefix() -> &'static Regex {
    static PREFIX: OnceLock<Regex> = OnceLock::new();
    // Re:, Re[2]:, Fw:, Fwd: in any case, possibly padded
    PREFIX.get_or_init(|| {
        Regex::new(r"(?i)^\s*(?:re\s*(?:\[\d+\])?|fwd?)\s*:\s*").expect("reply prefix pattern")
    })
}

/// Strip chained reply/forward markers from a subject.
///
/// `"RE: Fwd: Re[3]: Contract Review"` becomes `"Contract Review"`. The
/// result is trimmed, and empty subjects become [`NO_SUBJECT`]. Applying
/// the function to its own output returns the same string.
pub fn normalize_subject(subject: Option<&str>) -> String {
    let mut current = subject.unwrap_or_default().trim();
    while let Some(found) = reply_prefix().find(current) {
        current = current[found.end()..].trim_start();
    }

    let current = current.trim();
    if current.is_empty() {
        NO_SUBJECT.to_string()
    } else {
        current.to_string()
    }
}
