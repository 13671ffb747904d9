//! Rally wire format: the Envelope every peer exchanges over the bus.
//!
//! On the wire an Envelope is a JSON object:
//!
//! ```text
//! { "kind": "transferChunk", "senderId": "9f1c…", "sentAt": 1718000000000,
//!   "payload": { "transferId": "…", "index": 2, "bytes": "00ff…" } }
//! ```
//!
//! Decoding is two-stage. The outer object is parsed with an untyped
//! `payload`, then `kind` selects the concrete payload type. An unknown
//! `kind` is reported as [`WireError::UnknownKind`] so receivers can drop it
//! without treating it as corruption: the bus carries traffic from newer
//! peers too.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unix timestamp in milliseconds.
pub type Timestamp = u64;

/// Per-peer probe counter. Only meaningful together with the prober's id.
pub type ProbeId = u64;

/// Default transfer chunk size (64 KiB).
pub const DEFAULT_CHUNK_SIZE: u32 = 64 * 1024;

/// Hex length of a derived `TransferId`.
const TRANSFER_ID_LEN: usize = 32;

/// Encoded size of a chunk Envelope from `sender` carrying no bytes, with
/// every numeric field at its widest.
pub fn chunk_overhead(sender: &PeerId) -> Result<usize, WireError> {
    let empty = Envelope::new(
        sender.clone(),
        Timestamp::MAX,
        Body::TransferChunk(TransferChunk {
            transfer_id: TransferId::new("0".repeat(TRANSFER_ID_LEN)),
            index: u32::MAX,
            bytes: Vec::new(),
        }),
    );
    Ok(empty.to_bytes()?.len())
}

/// Largest raw chunk from `sender` that still fits a transport message of
/// `max_message_bytes` once hex-encoded and wrapped in an Envelope.
pub fn chunk_capacity(sender: &PeerId, max_message_bytes: usize) -> Result<usize, WireError> {
    Ok(max_message_bytes.saturating_sub(chunk_overhead(sender)?) / 2)
}

// ── Identifiers ───────────────────────────────────────────────────────────────

/// Identity of a peer on the bus. Opaque; freshly generated per process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Random 64-bit id, hex-encoded.
    pub fn generate() -> Self {
        let bytes: [u8; 8] = rand::random();
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identity of one transfer. Unique per sender; derived from sender, name,
/// start time and a local sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(String);

impl TransferId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// `hex(blake3(sender || name || started_at_le || seq_le))[..32]`
    pub fn derive(sender: &PeerId, name: &str, started_at: Timestamp, seq: u64) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(sender.as_str().as_bytes());
        hasher.update(name.as_bytes());
        hasher.update(&started_at.to_le_bytes());
        hasher.update(&seq.to_le_bytes());
        let hash = hasher.finalize();
        Self(hex::encode(&hash.as_bytes()[..TRANSFER_ID_LEN / 2]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransferId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ── Kinds ─────────────────────────────────────────────────────────────────────

/// Envelope discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Heartbeat,
    Probe,
    Echo,
    TransferStart,
    TransferChunk,
    TransferComplete,
    StateJoin,
    StateScore,
    StateMatchStart,
    StateReset,
}

impl Kind {
    pub const ALL: [Kind; 10] = [
        Kind::Heartbeat,
        Kind::Probe,
        Kind::Echo,
        Kind::TransferStart,
        Kind::TransferChunk,
        Kind::TransferComplete,
        Kind::StateJoin,
        Kind::StateScore,
        Kind::StateMatchStart,
        Kind::StateReset,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Heartbeat => "heartbeat",
            Kind::Probe => "probe",
            Kind::Echo => "echo",
            Kind::TransferStart => "transferStart",
            Kind::TransferChunk => "transferChunk",
            Kind::TransferComplete => "transferComplete",
            Kind::StateJoin => "stateJoin",
            Kind::StateScore => "stateScore",
            Kind::StateMatchStart => "stateMatchStart",
            Kind::StateReset => "stateReset",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == value)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Payloads ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Probe {
    pub probe_id: ProbeId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Echo {
    pub probe_id: ProbeId,
    /// `sentAt` of the probe being answered, copied verbatim.
    pub original_sent_at: Timestamp,
    /// Peer that issued the probe. Everyone else ignores this echo.
    pub prober: PeerId,
}

/// Describes the payload being transferred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferMetadata {
    pub name: String,
    pub byte_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_hint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferStart {
    pub transfer_id: TransferId,
    pub total_chunks: u32,
    /// Chunk size used by the sender. Offsets are `index * chunk_size`.
    pub chunk_size: u32,
    pub metadata: TransferMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferChunk {
    pub transfer_id: TransferId,
    pub index: u32,
    #[serde(with = "hex_bytes")]
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferComplete {
    pub transfer_id: TransferId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateJoin {
    pub display_name: String,
}

/// The sender's own authoritative cumulative score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateScore {
    pub score: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateMatchStart {
    pub started_at: Timestamp,
    pub duration_seconds: u32,
}

/// Kind-specific content of an Envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    Heartbeat,
    Probe(Probe),
    Echo(Echo),
    TransferStart(TransferStart),
    TransferChunk(TransferChunk),
    TransferComplete(TransferComplete),
    StateJoin(StateJoin),
    StateScore(StateScore),
    StateMatchStart(StateMatchStart),
    StateReset,
}

impl Body {
    pub fn kind(&self) -> Kind {
        match self {
            Body::Heartbeat => Kind::Heartbeat,
            Body::Probe(_) => Kind::Probe,
            Body::Echo(_) => Kind::Echo,
            Body::TransferStart(_) => Kind::TransferStart,
            Body::TransferChunk(_) => Kind::TransferChunk,
            Body::TransferComplete(_) => Kind::TransferComplete,
            Body::StateJoin(_) => Kind::StateJoin,
            Body::StateScore(_) => Kind::StateScore,
            Body::StateMatchStart(_) => Kind::StateMatchStart,
            Body::StateReset => Kind::StateReset,
        }
    }

    fn payload_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            Body::Heartbeat | Body::StateReset => Ok(serde_json::Value::Null),
            Body::Probe(p) => serde_json::to_value(p),
            Body::Echo(p) => serde_json::to_value(p),
            Body::TransferStart(p) => serde_json::to_value(p),
            Body::TransferChunk(p) => serde_json::to_value(p),
            Body::TransferComplete(p) => serde_json::to_value(p),
            Body::StateJoin(p) => serde_json::to_value(p),
            Body::StateScore(p) => serde_json::to_value(p),
            Body::StateMatchStart(p) => serde_json::to_value(p),
        }
    }
}

// ── Envelope ──────────────────────────────────────────────────────────────────

/// The unit of transport. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub sender_id: PeerId,
    pub sent_at: Timestamp,
    pub body: Body,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEnvelope {
    kind: String,
    sender_id: PeerId,
    sent_at: Timestamp,
    #[serde(default)]
    payload: serde_json::Value,
}

impl Envelope {
    pub fn new(sender_id: PeerId, sent_at: Timestamp, body: Body) -> Self {
        Self {
            sender_id,
            sent_at,
            body,
        }
    }

    pub fn kind(&self) -> Kind {
        self.body.kind()
    }

    /// Serialize for transmission.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        let raw = RawEnvelope {
            kind: self.kind().as_str().to_string(),
            sender_id: self.sender_id.clone(),
            sent_at: self.sent_at,
            payload: self.body.payload_value().map_err(WireError::Encode)?,
        };
        serde_json::to_vec(&raw).map_err(WireError::Encode)
    }

    /// Parse a received frame.
    pub fn from_bytes(data: &[u8]) -> Result<Self, WireError> {
        let raw: RawEnvelope = serde_json::from_slice(data).map_err(WireError::Malformed)?;
        if raw.sender_id.as_str().is_empty() {
            return Err(WireError::MissingSender);
        }
        let kind = Kind::parse(&raw.kind).ok_or(WireError::UnknownKind(raw.kind))?;

        let payload = raw.payload;
        let body = match kind {
            Kind::Heartbeat => Body::Heartbeat,
            Kind::StateReset => Body::StateReset,
            Kind::Probe => Body::Probe(decode_payload(kind, payload)?),
            Kind::Echo => Body::Echo(decode_payload(kind, payload)?),
            Kind::TransferStart => Body::TransferStart(decode_payload(kind, payload)?),
            Kind::TransferChunk => Body::TransferChunk(decode_payload(kind, payload)?),
            Kind::TransferComplete => Body::TransferComplete(decode_payload(kind, payload)?),
            Kind::StateJoin => Body::StateJoin(decode_payload(kind, payload)?),
            Kind::StateScore => Body::StateScore(decode_payload(kind, payload)?),
            Kind::StateMatchStart => Body::StateMatchStart(decode_payload(kind, payload)?),
        };

        Ok(Self {
            sender_id: raw.sender_id,
            sent_at: raw.sent_at,
            body,
        })
    }
}

fn decode_payload<T: for<'de> Deserialize<'de>>(
    kind: Kind,
    payload: serde_json::Value,
) -> Result<T, WireError> {
    serde_json::from_value(payload).map_err(|source| WireError::Payload { kind, source })
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("undecodable envelope: {0}")]
    Malformed(serde_json::Error),
    #[error("envelope has an empty senderId")]
    MissingSender,
    #[error("unknown envelope kind {0:?}")]
    UnknownKind(String),
    #[error("invalid {kind} payload: {source}")]
    Payload {
        kind: Kind,
        source: serde_json::Error,
    },
    #[error("failed to encode envelope: {0}")]
    Encode(serde_json::Error),
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}
