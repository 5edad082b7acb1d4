//! Versioned persisted form of a [`MemoryItem`]
//!
//! Items are stored as JSON with a format version and a SHA-256 digest of
//! the content. Anything that fails either check is reported as index
//! corruption rather than loaded.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Result, StratumError};
use crate::memory::MemoryItem;

/// Current envelope format
pub const ENVELOPE_VERSION: u32 = 1;

/// Lowercase hex SHA-256 of `content`
pub fn content_digest(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub version: u32,
    pub checksum: String,
    #[serde(flatten)]
    pub item: MemoryItem,
}

#[derive(Deserialize)]
struct Header {
    version: u32,
}

impl Envelope {
    pub fn seal(item: MemoryItem) -> Self {
        Self {
            version: ENVELOPE_VERSION,
            checksum: content_digest(&item.content),
            item,
        }
    }

    /// Serialize an item into envelope bytes
    pub fn encode(item: &MemoryItem) -> Result<Bytes> {
        let envelope = Self::seal(item.clone());
        Ok(Bytes::from(serde_json::to_vec(&envelope)?))
    }

    /// Parse and verify envelope bytes
    pub fn decode(bytes: &[u8]) -> Result<MemoryItem> {
        let header: Header = serde_json::from_slice(bytes)
            .map_err(|e| StratumError::IndexCorruption(format!("unreadable envelope: {e}")))?;
        if header.version != ENVELOPE_VERSION {
            return Err(StratumError::IndexCorruption(format!(
                "unsupported envelope version {}",
                header.version
            )));
        }

        let envelope: Envelope = serde_json::from_slice(bytes)
            .map_err(|e| StratumError::IndexCorruption(format!("malformed envelope: {e}")))?;
        let actual = content_digest(&envelope.item.content);
        if actual != envelope.checksum {
            return Err(StratumError::IndexCorruption(format!(
                "checksum mismatch for {}: stored {}, computed {actual}",
                envelope.item.id, envelope.checksum
            )));
        }
        Ok(envelope.item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Tier;

    #[test]
    fn test_content_digest_reference_values() {
        assert_eq!(
            content_digest(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            content_digest("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_encode_decode_preserves_item() {
        let mut item = MemoryItem::new("persist me")
            .with_embedding(vec![0.5, -0.5])
            .with_metadata("source", serde_json::json!("notes"));
        item.tier = Tier::LongTerm;

        let bytes = Envelope::encode(&item).unwrap();
        assert_eq!(Envelope::decode(&bytes).unwrap(), item);
    }

    #[test]
    fn test_envelope_carries_version_and_checksum() {
        let item = MemoryItem::new("fields");
        let value: serde_json::Value = serde_json::from_slice(&Envelope::encode(&item).unwrap()).unwrap();

        assert_eq!(value["version"], 1);
        assert_eq!(value["tier"], "working");
        assert_eq!(value["content"], "fields");
        assert_eq!(value["checksum"], content_digest("fields"));
    }

    #[test]
    fn test_tampered_content_is_corruption() {
        let item = MemoryItem::new("original");
        let bytes = Envelope::encode(&item).unwrap();
        let tampered = String::from_utf8(bytes.to_vec()).unwrap().replace("original", "modified");

        let err = Envelope::decode(tampered.as_bytes()).unwrap_err();
        assert!(matches!(err, StratumError::IndexCorruption(_)));
        assert!(err.to_string().contains("checksum mismatch"));
    }

    #[test]
    fn test_unknown_version_is_corruption() {
        let item = MemoryItem::new("future");
        let mut value: serde_json::Value = serde_json::from_slice(&Envelope::encode(&item).unwrap()).unwrap();
        value["version"] = serde_json::json!(2);

        let err = Envelope::decode(&serde_json::to_vec(&value).unwrap()).unwrap_err();
        assert!(err.to_string().contains("unsupported envelope version 2"));
    }

    #[test]
    fn test_garbage_is_corruption() {
        assert!(Envelope::decode(b"not json").unwrap_err().is_fatal());
    }
}
