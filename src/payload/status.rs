//! Milestone status vocabulary

use once_cell::sync::Lazy;
use std::collections::HashMap;

pub const NOT_STARTED: &str = "Not Started";
pub const COMPLETE: &str = "Complete";

static STATUS_ALIASES: Lazy<HashMap<String, &'static str>> = Lazy::new(|| {
    let canonical = [
        NOT_STARTED,
        "In Progress",
        "Approved",
        "Approved with corrections",
        "Rejected",
        COMPLETE,
        "Waiting On",
        "NA",
    ];
    let mut map = HashMap::new();
    for status in canonical {
        let lower = status.to_lowercase();
        map.insert(lower.replace(' ', "_"), status);
        map.insert(lower.replace(' ', "-"), status);
        map.insert(lower, status);
    }
    map.insert("completed".to_string(), COMPLETE);
    map.insert("n/a".to_string(), "NA");
    map
});

/// Map any PLM spelling onto the fixed vocabulary; unknown or blank is Not Started.
pub fn normalize_status(value: Option<&str>) -> &'static str {
    value
        .map(|v| v.trim().to_lowercase())
        .and_then(|key| STATUS_ALIASES.get(key.as_str()).copied())
        .unwrap_or(NOT_STARTED)
}
