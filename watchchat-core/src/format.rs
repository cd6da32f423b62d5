//! Formatting helpers shared across front ends.

use chrono::{DateTime, Local, TimeZone, Utc};

use crate::types::{SessionId, TitleIndex};

/// Format a timestamp as relative time (e.g., "2m ago").
pub fn format_relative_time(ts: DateTime<Utc>) -> String {
    let now = Utc::now();
    let duration = now.signed_duration_since(ts);

    if duration.num_seconds() < 0 {
        "just now".to_string()
    } else if duration.num_seconds() < 60 {
        format!("{}s ago", duration.num_seconds())
    } else if duration.num_minutes() < 60 {
        format!("{}m ago", duration.num_minutes())
    } else if duration.num_hours() < 24 {
        format!("{}h ago", duration.num_hours())
    } else if duration.num_days() < 7 {
        format!("{}d ago", duration.num_days())
    } else {
        ts.format("%b %d").to_string()
    }
}

/// Creation time encoded in a session id.
pub fn session_created_at(id: &SessionId) -> Option<DateTime<Utc>> {
    id.timestamp_millis()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}

/// Display label for a session: its indexed title, else its creation time in
/// local time, else the raw key.
pub fn format_session_label(id: &SessionId, titles: &TitleIndex) -> String {
    if let Some(title) = titles.get(id.as_str()).filter(|t| !t.is_empty()) {
        return title.clone();
    }
    match session_created_at(id) {
        Some(ts) => ts
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
        None => id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_prefers_title() {
        let mut titles = TitleIndex::new();
        titles.insert("1700000000000.json".to_string(), "trip ideas".to_string());
        let id = SessionId::new("1700000000000.json");
        assert_eq!(format_session_label(&id, &titles), "trip ideas");
    }

    #[test]
    fn test_label_falls_back_to_timestamp() {
        let id = SessionId::new("1700000000000.json");
        let label = format_session_label(&id, &TitleIndex::new());
        let expected = Utc
            .timestamp_millis_opt(1_700_000_000_000)
            .unwrap()
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();
        assert_eq!(label, expected);
    }

    #[test]
    fn test_label_raw_key_without_timestamp() {
        let id = SessionId::new("draft.json");
        assert_eq!(format_session_label(&id, &TitleIndex::new()), "draft.json");
    }

    #[test]
    fn test_relative_time_recent() {
        let ts = Utc::now() - chrono::Duration::seconds(5);
        assert!(format_relative_time(ts).ends_with("s ago"));
    }
}
