//! Text and value encoding helpers for the XML body.

use std::borrow::Cow;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};

use crate::kdbx::types::models::KdbxVersion;

/// Seconds between 0001-01-01T00:00:00Z and the Unix epoch.
const DOTNET_EPOCH_OFFSET: i64 = 62_135_596_800;

const LEGACY_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Whether `c` may appear in XML 1.0 character data.
fn is_xml_char(c: char) -> bool {
    matches!(c,
        '\t' | '\n' | '\r'
        | '\u{20}'..='\u{D7FF}'
        | '\u{E000}'..='\u{FFFD}'
        | '\u{10000}'..='\u{10FFFF}')
}

/// Removes characters that are not legal in XML text.
///
/// Borrows when the input is already clean.
pub fn safe_xml_string(text: &str) -> Cow<'_, str> {
    if text.chars().all(is_xml_char) {
        Cow::Borrowed(text)
    } else {
        Cow::Owned(text.chars().filter(|&c| is_xml_char(c)).collect())
    }
}

/// Encodes a timestamp the way each dialect expects.
///
/// - Legacy: `yyyy-MM-ddTHH:mm:ssZ`
/// - Modern: base64 of the little-endian i64 seconds since 0001-01-01
pub fn format_date(date: &DateTime<Utc>, version: KdbxVersion) -> String {
    if version.is_modern() {
        let seconds = date.timestamp() + DOTNET_EPOCH_OFFSET;
        STANDARD.encode(seconds.to_le_bytes())
    } else {
        date.format(LEGACY_DATE_FORMAT).to_string()
    }
}

pub fn base64(data: &[u8]) -> String {
    STANDARD.encode(data)
}
