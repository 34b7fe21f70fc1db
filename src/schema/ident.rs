//! Identifier sanitizing

use once_cell::sync::Lazy;
use regex::Regex;

static UNSAFE_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9_]").unwrap());
static UNDERSCORE_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"_+").unwrap());

/// Map an arbitrary external field name to a safe column name.
///
/// Lower-cases, replaces every character outside `[a-z0-9_]` with `_`,
/// collapses runs of `_` and strips them from both ends. The result matches
/// `^[a-z0-9_]*$` and `sanitize(sanitize(x)) == sanitize(x)`. It may be empty.
pub fn sanitize(name: &str) -> String {
    let lowered = name.to_lowercase();
    let replaced = UNSAFE_CHARS.replace_all(&lowered, "_");
    let collapsed = UNDERSCORE_RUNS.replace_all(&replaced, "_");
    collapsed.trim_matches('_').to_string()
}
