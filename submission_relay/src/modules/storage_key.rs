use std::{
    fmt,
    sync::atomic::{AtomicI64, Ordering},
};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;

use crate::modules::submission_worker::submission::SubmissionEvent;

// Source of "now" for storage keys and audit ids
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

// Wall clock that never goes backwards within the process.
// Resolution is one millisecond, the finest unit keys and audit ids use.
#[derive(Debug, Default)]
pub struct SystemClock {
    last_millis: AtomicI64,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        let current = Utc::now().timestamp_millis();
        let previous = self.last_millis.fetch_max(current, Ordering::SeqCst);
        let millis = previous.max(current);
        DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
    }
}

// How keys are laid out in the bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyScheme {
    // {baseName}-{timestamp}.zip
    Flat,
    // {userId/}{assignmentId/}{baseName}-{timestamp}.zip
    #[default]
    Partitioned,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageKey(String);

impl StorageKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the object key a submission is stored under.
///
/// Pure: the same event, instant and scheme always give the same key.
/// Path segments for `userId`/`assignmentId` are skipped when the event
/// does not carry them or carries them empty.
pub fn derive_key(event: &SubmissionEvent, instant: DateTime<Utc>, scheme: KeyScheme) -> StorageKey {
    let mut key = String::new();

    if scheme == KeyScheme::Partitioned {
        let segments = [&event.user_id, &event.assignment_id]
            .into_iter()
            .flatten()
            .filter(|segment| !segment.is_empty());
        for segment in segments {
            key.push_str(segment);
            key.push('/');
        }
    }

    key.push_str(base_name(&event.submission_url));
    key.push('-');
    key.push_str(&timestamp_digits(instant));
    key.push_str(".zip");

    StorageKey(key)
}

// The instant as ISO-8601 with every non-digit removed,
// e.g. 2024-10-19T12:34:56.789Z -> 20241019123456789
pub fn timestamp_digits(instant: DateTime<Utc>) -> String {
    instant
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .chars()
        .filter(char::is_ascii_digit)
        .collect()
}

// Original file name without its extension. Falls back to the last
// non-empty piece of the raw URL when the path has no file component.
fn base_name(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let file = path
        .rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or(url);

    if let Some(stem) = file.strip_suffix(".zip") {
        if !stem.is_empty() {
            return stem;
        }
    }
    match file.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => file,
    }
}
