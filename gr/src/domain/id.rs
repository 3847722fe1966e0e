//! Domain ID generation and timestamps
//!
//! Task and subtask IDs use the format: `{6-char-hex}-{type}-{slug}`
//! Example: `019430-task-compare-airpods-prices`

/// Current wall-clock time in Unix milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Generate a domain ID from type and a human-readable hint
pub fn generate_id(domain_type: &str, hint: &str) -> String {
    let uuid = uuid::Uuid::now_v7();
    let hex_prefix = &uuid.to_string()[..6];
    let slug = slugify(hint);
    if slug.is_empty() {
        format!("{}-{}", hex_prefix, domain_type)
    } else {
        format!("{}-{}-{}", hex_prefix, domain_type, slug)
    }
}

/// Slugify a hint for use in IDs
fn slugify(hint: &str) -> String {
    hint.to_lowercase()
        .chars()
        .filter_map(|c| {
            if c.is_alphanumeric() {
                Some(c)
            } else if c == '\'' || c == '\u{2019}' || c == '\u{2018}' {
                None
            } else {
                Some('-')
            }
        })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .take(6)
        .collect::<Vec<_>>()
        .join("-")
}
