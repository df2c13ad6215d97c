//! gRPC metadata (headers and trailers) and the `grpc-timeout` format.

use crate::error::Error;
use base64::Engine;
use base64::alphabet;
use base64::engine::general_purpose::STANDARD;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use bytes::Bytes;
use http2::HeaderField;
use std::time::Duration;

/// Accepts base64 with or without trailing padding, as peers send both.
const BIN_DECODER: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// gRPC metadata: an ordered multimap of lowercase names to values.
///
/// Metadata is used for headers (sent before the messages) and trailers
/// (sent after them, carrying the status). Insertion order is preserved.
/// Values of names ending in `-bin` are raw bytes here and base64 on the
/// wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    entries: Vec<(String, Bytes)>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value, keeping any existing values for `name`.
    pub fn append(&mut self, name: &str, value: impl Into<Bytes>) {
        self.entries.push((name.to_ascii_lowercase(), value.into()));
    }

    /// Replace every value for `name` with a single one.
    pub fn set(&mut self, name: &str, value: impl Into<Bytes>) {
        self.remove(name);
        self.append(name, value);
    }

    /// Remove every value for `name`. Returns true if any was present.
    pub fn remove(&mut self, name: &str) -> bool {
        let name = name.to_ascii_lowercase();
        let before = self.entries.len();
        self.entries.retain(|(n, _)| *n != name);
        self.entries.len() != before
    }

    /// All values for `name`, comma-joined.
    pub fn get(&self, name: &str) -> Option<String> {
        let values: Vec<_> = self
            .get_all(name)
            .into_iter()
            .map(|v| String::from_utf8_lossy(v).into_owned())
            .collect();
        if values.is_empty() {
            None
        } else {
            Some(values.join(","))
        }
    }

    /// The first value for `name`, if it is valid UTF-8.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.entries
            .iter()
            .find(|(n, _)| *n == name)
            .and_then(|(_, v)| std::str::from_utf8(v).ok())
    }

    /// The first value for `name` as raw bytes.
    pub fn get_bin(&self, name: &str) -> Option<Bytes> {
        let name = name.to_ascii_lowercase();
        self.entries
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.clone())
    }

    pub fn get_all(&self, name: &str) -> Vec<&Bytes> {
        let name = name.to_ascii_lowercase();
        self.entries
            .iter()
            .filter(|(n, _)| *n == name)
            .map(|(_, v)| v)
            .collect()
    }

    pub fn contains_key(&self, name: &str) -> bool {
        let name = name.to_ascii_lowercase();
        self.entries.iter().any(|(n, _)| *n == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Bytes)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries, counting repeated names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Append every entry of `other`.
    pub fn extend(&mut self, other: &Metadata) {
        self.entries.extend(other.entries.iter().cloned());
    }

    /// Header fields in wire order.
    ///
    /// Pseudo-headers come first, then the HTTP headers gRPC cares about,
    /// then reserved `grpc-*` headers, then everything else. Relative order
    /// within each group is kept.
    pub fn for_wire(&self) -> Vec<HeaderField> {
        let mut entries: Vec<_> = self.entries.iter().collect();
        entries.sort_by_key(|(name, _)| wire_rank(name));
        entries
            .into_iter()
            .map(|(name, value)| {
                if name.ends_with("-bin") {
                    HeaderField::new(name.as_str(), STANDARD.encode(value))
                } else {
                    HeaderField::new(name.as_str(), value.to_vec())
                }
            })
            .collect()
    }

    /// Parse a received header block, decoding `-bin` values.
    pub fn from_wire(fields: &[HeaderField]) -> Result<Metadata, Error> {
        let mut metadata = Metadata::new();
        for field in fields {
            let name = std::str::from_utf8(&field.name)
                .map_err(|_| Error::Protocol("header name is not valid utf-8".into()))?;
            if name.ends_with("-bin") {
                let value = BIN_DECODER.decode(&field.value).map_err(|e| {
                    Error::Protocol(format!("invalid base64 in {}: {}", name, e))
                })?;
                metadata.append(name, value);
            } else {
                metadata.append(name, Bytes::copy_from_slice(&field.value));
            }
        }
        Ok(metadata)
    }

    /// Entries an application should see: no pseudo-headers, no reserved
    /// `grpc-*` names, no transport headers.
    pub fn for_application(&self) -> Metadata {
        Metadata {
            entries: self
                .entries
                .iter()
                .filter(|(name, _)| {
                    !name.starts_with(':')
                        && !name.starts_with("grpc-")
                        && name != "te"
                        && name != "content-type"
                })
                .cloned()
                .collect(),
        }
    }
}

fn wire_rank(name: &str) -> u8 {
    match name {
        n if n.starts_with(':') => 0,
        "te" => 1,
        "content-type" => 2,
        "user-agent" => 3,
        "accept-encoding" => 4,
        n if n.starts_with("grpc-") => 5,
        _ => 6,
    }
}

impl<K: AsRef<str>, V: Into<Bytes>> FromIterator<(K, V)> for Metadata {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut metadata = Metadata::new();
        for (name, value) in iter {
            metadata.append(name.as_ref(), value);
        }
        metadata
    }
}

/// Largest count a `grpc-timeout` value may carry.
const MAX_TIMEOUT_DIGITS: usize = 8;
const MAX_TIMEOUT_COUNT: u128 = 99_999_999;

/// Units from finest to coarsest, in nanoseconds.
const TIMEOUT_UNITS: [(u128, char); 6] = [
    (1, 'n'),
    (1_000, 'u'),
    (1_000_000, 'm'),
    (1_000_000_000, 'S'),
    (60_000_000_000, 'M'),
    (3_600_000_000_000, 'H'),
];

/// A `grpc-timeout` value.
///
/// Format: `<count><unit>` with at most 8 digits, where unit is:
/// - `n`: nanoseconds
/// - `u`: microseconds
/// - `m`: milliseconds
/// - `S`: seconds
/// - `M`: minutes
/// - `H`: hours
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeout {
    nanos: u128,
}

impl Timeout {
    pub fn from_duration(duration: Duration) -> Self {
        Self {
            nanos: duration.as_nanos(),
        }
    }

    /// From fractional seconds, rounded to the nearest nanosecond.
    pub fn from_secs_f64(secs: f64) -> Self {
        Self {
            nanos: (secs.max(0.0) * 1e9).round() as u128,
        }
    }

    pub fn as_duration(&self) -> Duration {
        let secs = (self.nanos / 1_000_000_000).min(u64::MAX as u128) as u64;
        Duration::new(secs, (self.nanos % 1_000_000_000) as u32)
    }

    /// Format as a `grpc-timeout` header value.
    ///
    /// Uses the coarsest unit that represents the value exactly. If that
    /// count needs more than 8 digits, moves to coarser units, rounding up.
    pub fn to_grpc_format(self) -> String {
        if self.nanos == 0 {
            return "0n".to_string();
        }
        let exact = TIMEOUT_UNITS
            .iter()
            .rposition(|(unit, _)| self.nanos % unit == 0)
            .unwrap_or(0);
        for (idx, (unit, suffix)) in TIMEOUT_UNITS.iter().enumerate().skip(exact) {
            let count = if idx == exact {
                self.nanos / unit
            } else {
                self.nanos.div_ceil(*unit)
            };
            if count <= MAX_TIMEOUT_COUNT {
                return format!("{}{}", count, suffix);
            }
        }
        format!("{}H", MAX_TIMEOUT_COUNT)
    }

    /// Parse a `grpc-timeout` header value.
    pub fn parse(value: &str) -> Result<Self, Error> {
        let invalid = || Error::Protocol(format!("invalid grpc-timeout: {:?}", value));

        let mut chars = value.chars();
        let suffix = chars.next_back().ok_or_else(invalid)?;
        let count = chars.as_str();
        if count.is_empty()
            || count.len() > MAX_TIMEOUT_DIGITS
            || !count.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(invalid());
        }
        let (unit, _) = TIMEOUT_UNITS
            .iter()
            .find(|(_, s)| *s == suffix)
            .ok_or_else(invalid)?;
        let count: u128 = count.parse().map_err(|_| invalid())?;
        Ok(Self {
            nanos: count * unit,
        })
    }
}
