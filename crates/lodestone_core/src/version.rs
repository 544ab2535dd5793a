//! Record versions: tree revision ids and version vectors.
//!
//! A record's `version` field is an opaque byte string in one of two
//! binary forms, told apart by the first byte:
//!
//! - **Tree revision id**: `uvarint(generation) || digest`. The
//!   generation is at least 1, so the first byte is never zero.
//! - **Version vector**: a `0x00` tag byte followed by entries of
//!   `uvarint(counter) || uvarint(source len) || source bytes`, most
//!   recent entry first. Version vectors identify revisions for
//!   multi-master replication.

use crate::error::{Error, Result};

/// Tag byte marking a binary version vector.
const VECTOR_TAG: u8 = 0x00;

/// A parsed record version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Version {
    /// A linear (revision-tree) revision id.
    Tree {
        /// Revision generation, starting at 1.
        generation: u64,
        /// Content digest bytes.
        digest: Vec<u8>,
    },
    /// A version vector of `(source, counter)` pairs.
    Vector(VersionVector),
}

impl Version {
    /// Builds a tree revision id.
    ///
    /// # Errors
    ///
    /// Fails if `generation` is zero; generation zero would collide with
    /// the version-vector tag byte.
    pub fn tree(generation: u64, digest: impl Into<Vec<u8>>) -> Result<Self> {
        if generation == 0 {
            return Err(Error::invalid_parameter("revision generation must be >= 1"));
        }
        Ok(Self::Tree {
            generation,
            digest: digest.into(),
        })
    }

    /// Parses a binary version.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(Error::corrupt_data("empty version"));
        }
        if bytes[0] == VECTOR_TAG {
            VersionVector::parse(&bytes[1..]).map(Self::Vector)
        } else {
            let (generation, rest) = read_uvarint(bytes)
                .ok_or_else(|| Error::corrupt_data("bad revision generation varint"))?;
            Ok(Self::Tree {
                generation,
                digest: rest.to_vec(),
            })
        }
    }

    /// True if this version is a version vector.
    #[must_use]
    pub fn is_vector(&self) -> bool {
        matches!(self, Self::Vector(_))
    }

    /// Binary encoding.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Tree { generation, digest } => {
                let mut out = Vec::with_capacity(10 + digest.len());
                write_uvarint(&mut out, *generation);
                out.extend_from_slice(digest);
                out
            }
            Self::Vector(vv) => {
                let mut out = vec![VECTOR_TAG];
                vv.encode_into(&mut out);
                out
            }
        }
    }

    /// Human-readable form of the current revision:
    /// `generation-hexdigest` for a tree revision, the most recent
    /// `counter@source` entry for a version vector. The full vector is
    /// available through [`VersionVector::as_ascii`].
    #[must_use]
    pub fn expanded(&self) -> String {
        match self {
            Self::Tree { generation, digest } => {
                let mut s = format!("{generation}-");
                for b in digest {
                    s.push_str(&format!("{b:02x}"));
                }
                s
            }
            Self::Vector(vv) => vv.current(),
        }
    }
}

/// An ordered set of `(source, counter)` pairs, most recent first.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VersionVector {
    entries: Vec<(Vec<u8>, u64)>,
}

impl VersionVector {
    /// Builds a vector from `(source, counter)` pairs, most recent first.
    #[must_use]
    pub fn new(entries: Vec<(Vec<u8>, u64)>) -> Self {
        Self { entries }
    }

    /// The entries, most recent first.
    #[must_use]
    pub fn entries(&self) -> &[(Vec<u8>, u64)] {
        &self.entries
    }

    fn parse(mut bytes: &[u8]) -> Result<Self> {
        let mut entries = Vec::new();
        while !bytes.is_empty() {
            let (counter, rest) = read_uvarint(bytes)
                .ok_or_else(|| Error::corrupt_data("bad version vector counter"))?;
            let (len, rest) = read_uvarint(rest)
                .ok_or_else(|| Error::corrupt_data("bad version vector source length"))?;
            let len = len as usize;
            if rest.len() < len {
                return Err(Error::corrupt_data("truncated version vector source"));
            }
            entries.push((rest[..len].to_vec(), counter));
            bytes = &rest[len..];
        }
        if entries.is_empty() {
            return Err(Error::corrupt_data("empty version vector"));
        }
        Ok(Self { entries })
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        for (source, counter) in &self.entries {
            write_uvarint(out, *counter);
            write_uvarint(out, source.len() as u64);
            out.extend_from_slice(source);
        }
    }

    /// ASCII form: `counter@source` entries joined by commas, most recent
    /// first. Non-UTF-8 source ids are hex-encoded.
    #[must_use]
    pub fn as_ascii(&self) -> String {
        let mut parts = Vec::with_capacity(self.entries.len());
        for (source, counter) in &self.entries {
            parts.push(format!("{counter}@{}", Self::source_ascii(source)));
        }
        parts.join(",")
    }

    /// The most recent entry alone, `counter@source`.
    #[must_use]
    pub fn current(&self) -> String {
        self.entries
            .first()
            .map(|(source, counter)| format!("{counter}@{}", Self::source_ascii(source)))
            .unwrap_or_default()
    }

    fn source_ascii(source: &[u8]) -> String {
        match std::str::from_utf8(source) {
            Ok(s) if s.chars().all(|c| c.is_ascii_graphic() && c != ',') => s.to_string(),
            _ => source.iter().map(|b| format!("{b:02x}")).collect(),
        }
    }
}

fn write_uvarint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn read_uvarint(bytes: &[u8]) -> Option<(u64, &[u8])> {
    let mut value = 0u64;
    let mut shift = 0u32;
    for (i, &b) in bytes.iter().enumerate() {
        if shift >= 64 {
            return None;
        }
        value |= u64::from(b & 0x7F) << shift;
        if b & 0x80 == 0 {
            return Some((value, &bytes[i + 1..]));
        }
        shift += 7;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tree_revision_round_trip() {
        let v = Version::tree(3, vec![0xDE, 0xAD, 0xBE, 0xEF]).unwrap();
        let parsed = Version::parse(&v.encode()).unwrap();
        assert_eq!(v, parsed);
        assert!(!parsed.is_vector());
        assert_eq!(parsed.expanded(), "3-deadbeef");
    }

    #[test]
    fn generation_zero_rejected() {
        assert!(Version::tree(0, vec![1]).is_err());
    }

    #[test]
    fn large_generation_round_trip() {
        let v = Version::tree(1_000_000, vec![0xAB]).unwrap();
        let parsed = Version::parse(&v.encode()).unwrap();
        assert_eq!(parsed.expanded(), "1000000-ab");
    }

    #[test]
    fn version_vector_round_trip() {
        let vv = VersionVector::new(vec![
            (b"alice".to_vec(), 7),
            (b"bob".to_vec(), 3),
        ]);
        let v = Version::Vector(vv);
        let encoded = v.encode();
        assert_eq!(encoded[0], 0x00);
        let parsed = Version::parse(&encoded).unwrap();
        assert!(parsed.is_vector());
        assert_eq!(parsed, v);
    }

    #[test]
    fn version_vector_ascii_form() {
        let vv = VersionVector::new(vec![
            (b"alice".to_vec(), 7),
            (b"bob".to_vec(), 3),
        ]);
        assert_eq!(vv.as_ascii(), "7@alice,3@bob");
        assert_eq!(vv.current(), "7@alice");
        // expanded() gives only the current version of a vector.
        assert_eq!(Version::Vector(vv).expanded(), "7@alice");
    }

    #[test]
    fn non_utf8_source_hex_encoded() {
        let vv = VersionVector::new(vec![(vec![0xFF, 0x00], 1)]);
        assert_eq!(vv.as_ascii(), "1@ff00");
    }

    #[test]
    fn empty_and_garbage_versions_rejected() {
        assert!(Version::parse(&[]).is_err());
        assert!(Version::parse(&[0x00]).is_err());
        assert!(Version::parse(&[0x80]).is_err());
    }
}
