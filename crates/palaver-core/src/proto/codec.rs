//! JSON codec for the wire envelopes
//!
//! Encoding and decoding conventions shared by all message types: RFC3339
//! dates with millisecond precision, standard-alphabet base64 for binary
//! fields, and the null-sentinel string used to explicitly erase a field on
//! the server.

use chrono::{DateTime, SecondsFormat, Utc};

use super::client::ClientMessage;
use super::server::ServerMessage;
use crate::errors::{ClientError, Result};

/// The literal "explicitly unset this field" value understood by the server:
/// the single-character string U+2421.
pub const NULL_VALUE: &str = "\u{2421}";

/// True when a wire string is the null sentinel.
pub fn is_null(value: &str) -> bool {
    value == NULL_VALUE
}

// ----------------------------------------------------------------------------
// Envelope Encode / Decode
// ----------------------------------------------------------------------------

/// Serialize a client message into a single-tag JSON frame.
pub fn encode(msg: &ClientMessage) -> Result<Vec<u8>> {
    serde_json::to_vec(msg).map_err(ClientError::JsonEncode)
}

/// Parse a server frame.
///
/// Frames with zero recognized tags, more than one tag, or an unknown tag are
/// rejected; unknown fields inside a recognized payload are ignored.
pub fn decode(raw: &str) -> Result<ServerMessage> {
    serde_json::from_str(raw).map_err(ClientError::JsonDecode)
}

// ----------------------------------------------------------------------------
// Serde Helpers
// ----------------------------------------------------------------------------

fn format_rfc3339_ms(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_rfc3339(raw: &str) -> core::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc))
}

/// `Option<DateTime<Utc>>` as RFC3339 with millisecond precision.
pub mod opt_rfc3339 {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, ser: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(dt) => ser.serialize_str(&super::format_rfc3339_ms(dt)),
            None => ser.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(de: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(de)?;
        raw.map(|s| super::parse_rfc3339(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// `Vec<u8>` as standard-alphabet base64.
pub mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        ser.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(de: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(de)?;
        STANDARD.decode(raw).map_err(serde::de::Error::custom)
    }
}

/// `Option<Vec<u8>>` as standard-alphabet base64.
pub mod opt_b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &Option<Vec<u8>>, ser: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match bytes {
            Some(b) => ser.serialize_str(&STANDARD.encode(b)),
            None => ser.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(de: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(de)?;
        raw.map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
