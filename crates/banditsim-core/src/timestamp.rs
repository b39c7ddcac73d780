//! Wall-clock timestamps for artifacts.

use time::{format_description::well_known::Rfc3339, OffsetDateTime};

/// Used when the current time cannot be formatted.
pub const FALLBACK_TIMESTAMP: &str = "1970-01-01T00:00:00Z";

/// Current UTC time as RFC 3339.
pub fn iso8601_now() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| FALLBACK_TIMESTAMP.to_string())
}
