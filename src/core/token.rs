//! Purpose: Encode and decode the two continuation token variants.
//! Exports: `NextPageToken`, `SyncToken`, `Continuation`, `TokenKind`, `TOKEN_FORMAT_VERSION`.
//! Role: Pure codec between cursor state and URL-safe opaque strings; no I/O.
//! Invariants: Decoding never succeeds partially; any shape error is `MalformedToken`.
//! Invariants: Absent optional fields are omitted from the wire form, never zero-filled.
//! Notes: Tokens are neither signed nor encrypted; holders can forge any field.
use crate::core::clock::Timestamp;
use crate::core::error::{Error, ErrorKind};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub const TOKEN_FORMAT_VERSION: u8 = 1;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TokenKind {
    NextPage,
    Sync,
}

impl TokenKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TokenKind::NextPage => "next_page",
            TokenKind::Sync => "sync",
        }
    }
}

/// Continue an in-progress read of a pinned snapshot.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct NextPageToken {
    pub snapshot_time: Timestamp,
    pub updated_after: Option<Timestamp>,
    pub offset: u64,
    pub valid_until: Timestamp,
}

/// A finished traversal; the next pass lists changes made after `timestamp`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SyncToken {
    pub timestamp: Timestamp,
    pub valid_until: Timestamp,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Continuation {
    NextPage(NextPageToken),
    Sync(SyncToken),
}

impl Continuation {
    pub fn kind(&self) -> TokenKind {
        match self {
            Continuation::NextPage(_) => TokenKind::NextPage,
            Continuation::Sync(_) => TokenKind::Sync,
        }
    }

    pub fn valid_until(&self) -> Timestamp {
        match self {
            Continuation::NextPage(token) => token.valid_until,
            Continuation::Sync(token) => token.valid_until,
        }
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.valid_until() < now
    }

    pub fn encode(&self) -> Result<String, Error> {
        match self {
            Continuation::NextPage(token) => token.encode(),
            Continuation::Sync(token) => token.encode(),
        }
    }

    /// Decode a token whose variant is not known up front.
    pub fn decode(text: &str) -> Result<Self, Error> {
        let bytes = unwrap_text(text)?;
        let probe: WireProbe = parse_wire(&bytes)?;
        check_version(probe.format)?;
        match probe.kind.as_str() {
            KIND_NEXT_PAGE => NextPageToken::from_bytes(&bytes).map(Continuation::NextPage),
            KIND_SYNC => SyncToken::from_bytes(&bytes).map(Continuation::Sync),
            other => Err(malformed(format!("unknown token kind {other:?}"))),
        }
    }

    /// Diagnostic JSON view with RFC3339 times.
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert("kind".to_string(), self.kind().as_str().into());
        match self {
            Continuation::NextPage(token) => {
                map.insert("snapshot_time".to_string(), time_json(token.snapshot_time));
                if let Some(updated_after) = token.updated_after {
                    map.insert("updated_after".to_string(), time_json(updated_after));
                }
                map.insert("offset".to_string(), token.offset.into());
            }
            Continuation::Sync(token) => {
                map.insert("timestamp".to_string(), time_json(token.timestamp));
            }
        }
        map.insert("valid_until".to_string(), time_json(self.valid_until()));
        serde_json::Value::Object(map)
    }
}

const KIND_NEXT_PAGE: &str = "n";
const KIND_SYNC: &str = "s";

#[derive(Deserialize)]
struct WireProbe {
    #[serde(rename = "f")]
    format: u8,
    #[serde(rename = "k")]
    kind: String,
}

#[derive(Serialize, Deserialize)]
struct NextPageWire {
    #[serde(rename = "f")]
    format: u8,
    #[serde(rename = "k")]
    kind: String,
    #[serde(rename = "t")]
    snapshot_time: i64,
    #[serde(rename = "u", default, skip_serializing_if = "Option::is_none")]
    updated_after: Option<i64>,
    #[serde(rename = "o")]
    offset: u64,
    #[serde(rename = "v")]
    valid_until: i64,
}

#[derive(Serialize, Deserialize)]
struct SyncWire {
    #[serde(rename = "f")]
    format: u8,
    #[serde(rename = "k")]
    kind: String,
    #[serde(rename = "t")]
    timestamp: i64,
    #[serde(rename = "v")]
    valid_until: i64,
}

impl NextPageToken {
    pub fn encode(&self) -> Result<String, Error> {
        let wire = NextPageWire {
            format: TOKEN_FORMAT_VERSION,
            kind: KIND_NEXT_PAGE.to_string(),
            snapshot_time: self.snapshot_time.as_micros(),
            updated_after: self.updated_after.map(Timestamp::as_micros),
            offset: self.offset,
            valid_until: self.valid_until.as_micros(),
        };
        wrap_text(&wire)
    }

    pub fn decode(text: &str) -> Result<Self, Error> {
        Self::from_bytes(&unwrap_text(text)?)
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let wire: NextPageWire = parse_wire(bytes)?;
        check_version(wire.format)?;
        check_kind(&wire.kind, KIND_NEXT_PAGE)?;
        Ok(Self {
            snapshot_time: Timestamp::from_micros(wire.snapshot_time),
            updated_after: wire.updated_after.map(Timestamp::from_micros),
            offset: wire.offset,
            valid_until: Timestamp::from_micros(wire.valid_until),
        })
    }
}

impl SyncToken {
    pub fn encode(&self) -> Result<String, Error> {
        let wire = SyncWire {
            format: TOKEN_FORMAT_VERSION,
            kind: KIND_SYNC.to_string(),
            timestamp: self.timestamp.as_micros(),
            valid_until: self.valid_until.as_micros(),
        };
        wrap_text(&wire)
    }

    pub fn decode(text: &str) -> Result<Self, Error> {
        Self::from_bytes(&unwrap_text(text)?)
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let wire: SyncWire = parse_wire(bytes)?;
        check_version(wire.format)?;
        check_kind(&wire.kind, KIND_SYNC)?;
        Ok(Self {
            timestamp: Timestamp::from_micros(wire.timestamp),
            valid_until: Timestamp::from_micros(wire.valid_until),
        })
    }
}

fn wrap_text<T: Serialize>(wire: &T) -> Result<String, Error> {
    let bytes = serde_json::to_vec(wire).map_err(|err| {
        Error::new(ErrorKind::Encoding)
            .with_message("failed to serialize token")
            .with_source(err)
    })?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

fn unwrap_text(text: &str) -> Result<Vec<u8>, Error> {
    URL_SAFE_NO_PAD
        .decode(text.trim())
        .map_err(|err| malformed("token is not valid base64url").with_source(err))
}

fn parse_wire<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, Error> {
    serde_json::from_slice(bytes)
        .map_err(|err| malformed("token payload has the wrong shape").with_source(err))
}

fn check_version(format: u8) -> Result<(), Error> {
    if format == TOKEN_FORMAT_VERSION {
        Ok(())
    } else {
        Err(malformed(format!("unsupported token format version {format}")))
    }
}

fn check_kind(actual: &str, expected: &str) -> Result<(), Error> {
    if actual == expected {
        return Ok(());
    }
    let expected_name = if expected == KIND_SYNC {
        TokenKind::Sync.as_str()
    } else {
        TokenKind::NextPage.as_str()
    };
    Err(malformed(format!("token is not a {expected_name} token"))
        .with_hint("Pass sync tokens as sync_token and next page tokens as next_page_token."))
}

fn malformed(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::MalformedToken).with_message(message)
}

fn time_json(ts: Timestamp) -> serde_json::Value {
    match ts.to_rfc3339() {
        Ok(text) => text.into(),
        Err(_) => ts.as_micros().into(),
    }
}
