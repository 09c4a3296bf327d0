use rmp_serde::{decode, encode};
use thiserror::Error;

use crate::{ConfigPayload, PushMessage};

#[derive(Debug, Error)]
pub enum WireError {
    #[error("encode error: {0}")]
    Encode(#[from] encode::Error),
    #[error("decode error: {0}")]
    Decode(#[from] decode::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Realtime push frames travel as MessagePack on the socket channel.
pub fn serialize_push(msg: &PushMessage) -> Result<Vec<u8>, WireError> {
    Ok(encode::to_vec_named(msg)?)
}

pub fn deserialize_push(bytes: &[u8]) -> Result<PushMessage, WireError> {
    Ok(decode::from_slice(bytes)?)
}

/// Deterministic config hash for idempotent commits.
///
/// Hashes the JSON serialization of the payload using FNV-1a 64-bit; the
/// payload constructor keeps key order canonical, so equal configs hash
/// equal regardless of edit order.
pub fn config_hash(config: &ConfigPayload) -> Result<u64, WireError> {
    let bytes = serde_json::to_vec(config)?;
    Ok(hash_bytes_fnv1a64(&bytes))
}

/// Deterministic, stable 64-bit hash for raw bytes (FNV-1a).
pub fn hash_bytes_fnv1a64(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;

    let mut hash = OFFSET_BASIS;
    for &byte in bytes {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::UnitKey;
    use crate::types::{StatPatch, UnitOverride};

    #[test]
    fn config_hash_ignores_edit_order() {
        let over = UnitOverride {
            reason: "injured".to_string(),
            stats: StatPatch {
                toughness: Some(2),
                ..StatPatch::default()
            },
        };

        let a = ConfigPayload::new(
            vec![UnitKey::hero(2), UnitKey::hero(1)],
            [(UnitKey::hero(2), over.clone())].into(),
            vec![],
        );
        let b = ConfigPayload::new(
            vec![UnitKey::hero(1), UnitKey::hero(2)],
            [(UnitKey::hero(2), over)].into(),
            vec![],
        );

        assert_eq!(config_hash(&a).unwrap(), config_hash(&b).unwrap());
    }

    #[test]
    fn config_hash_changes_with_content() {
        let a = ConfigPayload::new(vec![UnitKey::hero(1)], Default::default(), vec![]);
        let b = ConfigPayload::new(vec![UnitKey::hero(2)], Default::default(), vec![]);
        assert_ne!(config_hash(&a).unwrap(), config_hash(&b).unwrap());
    }

    #[test]
    fn push_frames_round_trip_as_msgpack() {
        let msg = PushMessage::BattleStateChanged {
            battle: crate::ids::BattleId(9),
        };
        let bytes = serialize_push(&msg).unwrap();
        assert_eq!(deserialize_push(&bytes).unwrap(), msg);
    }

    #[test]
    fn fnv_matches_known_vector() {
        // FNV-1a("a") per the reference tables.
        assert_eq!(hash_bytes_fnv1a64(b"a"), 0xaf63dc4c8601ec8c);
        assert_eq!(hash_bytes_fnv1a64(b""), 0xcbf29ce484222325);
    }
}
