use crate::{
    Result,
    constants::{MAX_CARD_ID_LENGTH, MIN_CARD_ID_LENGTH},
    error::Error,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use subtle::ConstantTimeEq;

/// Card identifier read from a badge (opaque token).
///
/// The identifier is normalized on construction: surrounding whitespace and
/// NUL padding are removed and ASCII letters are uppercased, so `"a1b2c3 "`
/// and `"A1B2C3"` name the same card.
///
/// # Security
/// This type implements constant-time comparison to prevent timing attacks
/// when comparing card identifiers against the allow-list.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CardId(String);

impl CardId {
    /// Create a new card identifier with validation.
    ///
    /// # Errors
    /// Returns `Error::InvalidCardFormat` if:
    /// - The normalized identifier is not between 1-64 characters
    /// - The identifier contains non-printable or non-ASCII characters
    pub fn new(raw: &str) -> Result<Self> {
        let normalized = raw
            .trim_matches(|c: char| c.is_whitespace() || c == '\0')
            .to_ascii_uppercase();

        let len = normalized.len();
        if !(MIN_CARD_ID_LENGTH..=MAX_CARD_ID_LENGTH).contains(&len) {
            return Err(Error::InvalidCardFormat(format!(
                "Card id must be {MIN_CARD_ID_LENGTH}-{MAX_CARD_ID_LENGTH} chars, got {len}"
            )));
        }

        if !normalized.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(Error::InvalidCardFormat(
                "Card id must be printable ASCII".to_string(),
            ));
        }

        Ok(CardId(normalized))
    }

    /// Get the card identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CardId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for CardId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        CardId::new(s)
    }
}

impl TryFrom<String> for CardId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        CardId::new(&value)
    }
}

impl From<CardId> for String {
    fn from(id: CardId) -> Self {
        id.0
    }
}

/// Constant-time comparison implementation for CardId
impl PartialEq for CardId {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_bytes().ct_eq(other.0.as_bytes()).into()
    }
}

impl std::hash::Hash for CardId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

/// A single decoded card read.
///
/// Produced by the card reader adapter and consumed exactly once by the
/// access manager. Immutable after creation; the recent-events log keeps
/// its own clone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardEvent {
    /// Decoded card identifier.
    pub card_id: CardId,

    /// When the report was received from the reader.
    pub timestamp: DateTime<Utc>,

    /// Raw HID report bytes the identifier was decoded from.
    #[serde(with = "hex_payload")]
    pub raw_payload: Bytes,
}

impl CardEvent {
    /// Create a card event stamped with the current time.
    pub fn new(card_id: CardId, raw_payload: impl Into<Bytes>) -> Self {
        Self {
            card_id,
            timestamp: Utc::now(),
            raw_payload: raw_payload.into(),
        }
    }

    /// Raw payload rendered as uppercase hex.
    pub fn payload_hex(&self) -> String {
        hex_payload::encode(&self.raw_payload)
    }
}

/// Outcome of an authorization lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionResult {
    Granted,
    Denied,
}

impl fmt::Display for DecisionResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DecisionResult::Granted => write!(f, "Granted"),
            DecisionResult::Denied => write!(f, "Denied"),
        }
    }
}

/// Authorization decision for exactly one [`CardEvent`].
///
/// Decisions are totally ordered by `(timestamp, sequence)`; `sequence` is
/// assigned by the access manager and strictly increases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessDecision {
    /// Monotonic decision number.
    pub sequence: u64,

    /// Card the decision applies to.
    pub card_id: CardId,

    /// When the decision was made.
    pub timestamp: DateTime<Utc>,

    /// Granted or denied.
    pub result: DecisionResult,

    /// Human readable reason.
    pub reason: String,
}

impl AccessDecision {
    /// Create a granted decision stamped now.
    pub fn granted(sequence: u64, card_id: CardId, reason: impl Into<String>) -> Self {
        Self::new(sequence, card_id, DecisionResult::Granted, reason)
    }

    /// Create a denied decision stamped now.
    pub fn denied(sequence: u64, card_id: CardId, reason: impl Into<String>) -> Self {
        Self::new(sequence, card_id, DecisionResult::Denied, reason)
    }

    fn new(
        sequence: u64,
        card_id: CardId,
        result: DecisionResult,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            sequence,
            card_id,
            timestamp: Utc::now(),
            result,
            reason: reason.into(),
        }
    }

    /// Returns `true` if access was granted.
    #[inline]
    #[must_use]
    pub fn is_granted(&self) -> bool {
        matches!(self.result, DecisionResult::Granted)
    }
}

mod hex_payload {
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    pub fn encode(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02X}")).collect()
    }

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s.len() % 2 != 0 {
            return Err(D::Error::custom("hex payload must have an even length"));
        }
        (0..s.len())
            .step_by(2)
            .map(|i| {
                s.get(i..i + 2)
                    .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                    .ok_or_else(|| D::Error::custom(format!("invalid hex at offset {i}")))
            })
            .collect::<Result<Vec<u8>, _>>()
            .map(Bytes::from)
    }
}
