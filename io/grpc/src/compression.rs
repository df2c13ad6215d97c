//! Per-message compression and `grpc-encoding` negotiation.

use crate::error::Error;
use flate2::Compression as Level;
use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use std::fmt;
use std::io::{self, Read, Write};

/// A message compression algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Compression {
    #[default]
    Identity,
    Gzip,
    /// zlib-wrapped deflate, as gRPC peers send it.
    Deflate,
}

/// Supported algorithms in preference order.
pub const SUPPORTED: [Compression; 3] = [
    Compression::Gzip,
    Compression::Deflate,
    Compression::Identity,
];

impl Compression {
    /// Identifier used in `grpc-encoding` and `grpc-accept-encoding`.
    pub fn name(self) -> &'static str {
        match self {
            Compression::Identity => "identity",
            Compression::Gzip => "gzip",
            Compression::Deflate => "deflate",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim() {
            "identity" => Some(Compression::Identity),
            "gzip" => Some(Compression::Gzip),
            "deflate" => Some(Compression::Deflate),
            _ => None,
        }
    }

    pub fn is_identity(self) -> bool {
        self == Compression::Identity
    }

    pub fn compress(self, data: &[u8]) -> io::Result<Vec<u8>> {
        match self {
            Compression::Identity => Ok(data.to_vec()),
            Compression::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), Level::default());
                encoder.write_all(data)?;
                encoder.finish()
            }
            Compression::Deflate => {
                let mut encoder = ZlibEncoder::new(Vec::new(), Level::default());
                encoder.write_all(data)?;
                encoder.finish()
            }
        }
    }

    /// Decompress `data`, refusing output larger than `limit` bytes.
    pub fn decompress(self, data: &[u8], limit: usize) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        let read = match self {
            Compression::Identity => {
                out.extend_from_slice(data);
                data.len()
            }
            Compression::Gzip => GzDecoder::new(data)
                .take(limit as u64 + 1)
                .read_to_end(&mut out)?,
            Compression::Deflate => ZlibDecoder::new(data)
                .take(limit as u64 + 1)
                .read_to_end(&mut out)?,
        };
        if read > limit {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("decompressed message exceeds {} bytes", limit),
            ));
        }
        Ok(out)
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Value for the `grpc-accept-encoding` header.
pub fn accept_encoding() -> String {
    SUPPORTED
        .iter()
        .map(|c| c.name())
        .collect::<Vec<_>>()
        .join(",")
}

/// Pick the algorithm for a stream.
///
/// `acceptable` is the peer's comma-separated `grpc-accept-encoding` value;
/// an empty value means only identity is acceptable. The `preferred`
/// algorithm wins if it is known and acceptable, then the first acceptable
/// one in [`SUPPORTED`] order.
pub fn select_algorithm(acceptable: &str, preferred: &str) -> Result<Compression, Error> {
    let mut offered: Vec<&str> = acceptable
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .collect();
    if offered.is_empty() {
        offered.push(Compression::Identity.name());
    }

    if let Some(preferred) = Compression::from_name(preferred)
        && offered.contains(&preferred.name())
    {
        return Ok(preferred);
    }

    SUPPORTED
        .iter()
        .copied()
        .find(|c| offered.contains(&c.name()))
        .ok_or_else(|| Error::UnsupportedEncoding(acceptable.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        for c in SUPPORTED {
            assert_eq!(Compression::from_name(c.name()), Some(c));
        }
        assert_eq!(Compression::from_name("br"), None);
        assert_eq!(accept_encoding(), "gzip,deflate,identity");
    }

    #[test]
    fn test_select_preferred() {
        assert_eq!(
            select_algorithm("gzip,deflate", "deflate").unwrap(),
            Compression::Deflate
        );
        assert_eq!(
            select_algorithm("identity, gzip", "identity").unwrap(),
            Compression::Identity
        );
    }

    #[test]
    fn test_select_falls_back_to_supported() {
        assert_eq!(
            select_algorithm("minify,gzip,identity", "minify").unwrap(),
            Compression::Gzip
        );
        assert_eq!(
            select_algorithm("identity,deflate", "gzip").unwrap(),
            Compression::Deflate
        );
    }

    #[test]
    fn test_select_empty_means_identity() {
        assert_eq!(select_algorithm("", "gzip").unwrap(), Compression::Identity);
        assert_eq!(select_algorithm(" , ", "").unwrap(), Compression::Identity);
    }

    #[test]
    fn test_select_nothing_supported() {
        assert!(matches!(
            select_algorithm("br,zstd", "gzip"),
            Err(Error::UnsupportedEncoding(_))
        ));
    }

    #[test]
    fn test_gzip_and_deflate() {
        let data = b"the quick brown fox jumps over the lazy dog ".repeat(20);
        for c in [Compression::Gzip, Compression::Deflate] {
            let packed = c.compress(&data).unwrap();
            assert!(packed.len() < data.len());
            assert_eq!(c.decompress(&packed, data.len()).unwrap(), data);
        }
    }

    #[test]
    fn test_decompress_limit() {
        let data = vec![0u8; 10_000];
        let packed = Compression::Gzip.compress(&data).unwrap();
        assert!(Compression::Gzip.decompress(&packed, 9_999).is_err());
        assert!(Compression::Gzip.decompress(&packed, 10_000).is_ok());
    }

    #[test]
    fn test_decompress_garbage() {
        assert!(Compression::Gzip.decompress(b"not gzip", 1024).is_err());
        assert!(Compression::Deflate.decompress(b"not zlib", 1024).is_err());
    }
}
