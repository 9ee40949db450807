//! Opaque pagination cursors.
//!
//! A token is `base64url(tag || json)` where `json` is a versioned envelope
//! around the last-seen sort key and `tag` is the left half of an
//! HMAC-SHA256 over the json. Every decode failure maps to `InvalidCursor`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use super::SortMode;
use crate::{Result, SemaphoreError};

/// Envelope version written by this codec.
const CURSOR_VERSION: u8 = 1;

type HmacSha256 = Hmac<Sha256>;

/// Bytes of MAC kept in a token.
const TAG_LEN: usize = 16;

/// Largest token accepted before decoding.
const MAX_TOKEN_LEN: usize = 512;

/// Keyset position for recency ordering.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecencyCursor {
    /// Publish time, or update time when the item has none.
    pub sort_date: DateTime<Utc>,
    pub item_id: i64,
}

/// Position within a ranked snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScoreCursor {
    pub score: f64,
    pub item_id: i64,
}

/// The last item returned to a client.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Cursor {
    New(RecencyCursor),
    Hot(ScoreCursor),
}

impl Cursor {
    /// The sort mode this cursor belongs to.
    pub fn sort_mode(&self) -> SortMode {
        match self {
            Cursor::New(_) => SortMode::New,
            Cursor::Hot(_) => SortMode::Hot,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct Envelope {
    v: u8,
    c: Cursor,
}

/// Encodes and verifies cursor tokens.
#[derive(Clone)]
pub struct CursorCodec {
    key: Vec<u8>,
}

impl CursorCodec {
    /// Create a codec keyed with `secret`.
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            key: secret.as_ref().to_vec(),
        }
    }

    fn mac(&self, payload: &[u8]) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| SemaphoreError::Config(format!("cursor key: {e}")))?;
        mac.update(payload);
        Ok(mac)
    }

    fn tag(&self, payload: &[u8]) -> Result<[u8; TAG_LEN]> {
        let digest = self.mac(payload)?.finalize().into_bytes();
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(&digest[..TAG_LEN]);
        Ok(tag)
    }

    /// Encode a cursor into an opaque token.
    pub fn encode(&self, cursor: &Cursor) -> Result<String> {
        let payload = serde_json::to_vec(&Envelope {
            v: CURSOR_VERSION,
            c: *cursor,
        })
        .map_err(|e| SemaphoreError::Validation(format!("cursor encode: {e}")))?;

        let mut token = Vec::with_capacity(TAG_LEN + payload.len());
        token.extend_from_slice(&self.tag(&payload)?);
        token.extend_from_slice(&payload);
        Ok(URL_SAFE_NO_PAD.encode(token))
    }

    /// Decode a token of any sort mode.
    pub fn decode_any(&self, token: &str) -> Result<Cursor> {
        if token.is_empty() || token.len() > MAX_TOKEN_LEN {
            return Err(SemaphoreError::InvalidCursor);
        }

        let raw = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| SemaphoreError::InvalidCursor)?;
        if raw.len() <= TAG_LEN {
            return Err(SemaphoreError::InvalidCursor);
        }

        let (tag, payload) = raw.split_at(TAG_LEN);
        self.mac(payload)
            .map_err(|_| SemaphoreError::InvalidCursor)?
            .verify_truncated_left(tag)
            .map_err(|_| SemaphoreError::InvalidCursor)?;

        let mut de = serde_json::Deserializer::from_slice(payload);
        let envelope =
            Envelope::deserialize(&mut de).map_err(|_| SemaphoreError::InvalidCursor)?;
        de.end().map_err(|_| SemaphoreError::InvalidCursor)?;

        if envelope.v != CURSOR_VERSION {
            return Err(SemaphoreError::InvalidCursor);
        }
        if let Cursor::Hot(ScoreCursor { score, .. }) = envelope.c {
            if !score.is_finite() {
                return Err(SemaphoreError::InvalidCursor);
            }
        }

        Ok(envelope.c)
    }

    /// Decode a token that must belong to `mode`.
    pub fn decode(&self, token: &str, mode: SortMode) -> Result<Cursor> {
        let cursor = self.decode_any(token)?;
        if cursor.sort_mode() != mode {
            return Err(SemaphoreError::InvalidCursor);
        }
        Ok(cursor)
    }
}

impl std::fmt::Debug for CursorCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CursorCodec").finish_non_exhaustive()
    }
}
