//! Timestamps and random identifiers used in artifact names.

use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use rand::{Rng, distributions::Alphanumeric};

/// Compact UTC timestamp (`YYYYmmdd_HHMMSS`) used in log and request names.
pub fn compact_timestamp() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Six lowercase alphanumeric characters.
pub fn short_id() -> String {
    let mut rng = rand::thread_rng();
    std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(6)
        .collect::<String>()
        .to_lowercase()
}

pub fn epoch_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default()
}

/// ISO-8601 rendering of a filesystem timestamp.
pub fn iso_timestamp(time: SystemTime) -> String {
    DateTime::<Utc>::from(time)
        .format("%Y-%m-%dT%H:%M:%S")
        .to_string()
}
