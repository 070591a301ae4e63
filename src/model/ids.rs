//! Identifier model shared by every backend and link table.
//!
//! A single polymorphic [`Id`] carries the three key flavors the engine
//! supports: auto-increment integers, UUID v7 and 24-hex object ids. Link
//! columns and aggregated id lists dispatch on [`IdKind`] at runtime instead
//! of being generated per key type.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

/// Text width of a UUID rendered in its canonical hyphenated form.
pub const UUID_TEXT_LEN: usize = 36;
/// Text width of an object id rendered as lowercase hex.
pub const OID_TEXT_LEN: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdKind {
    Long,
    Uuid,
    Oid,
}

impl IdKind {
    /// Separator used when several ids are aggregated into one text cell.
    /// Integers are variable-width and need one; UUID and OID tokens are
    /// fixed-width and are simply concatenated.
    pub fn separator(self) -> &'static str {
        match self {
            IdKind::Long => "-",
            IdKind::Uuid | IdKind::Oid => "",
        }
    }

    pub fn token_width(self) -> Option<usize> {
        match self {
            IdKind::Long => None,
            IdKind::Uuid => Some(UUID_TEXT_LEN),
            IdKind::Oid => Some(OID_TEXT_LEN),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Id {
    Long(i64),
    Uuid(Uuid),
    Oid(String),
}

impl Id {
    pub fn kind(&self) -> IdKind {
        match self {
            Id::Long(_) => IdKind::Long,
            Id::Uuid(_) => IdKind::Uuid,
            Id::Oid(_) => IdKind::Oid,
        }
    }

    /// Generate a fresh id for kinds the engine can mint client-side.
    pub fn generate(kind: IdKind) -> Option<Id> {
        match kind {
            IdKind::Long => None,
            IdKind::Uuid => Some(Id::Uuid(Uuid::now_v7())),
            IdKind::Oid => Some(Id::Oid(new_oid())),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Id::Long(v) => serde_json::Value::from(*v),
            Id::Uuid(v) => serde_json::Value::String(v.to_string()),
            Id::Oid(v) => serde_json::Value::String(v.clone()),
        }
    }

    pub fn from_json(kind: IdKind, value: &serde_json::Value) -> Option<Id> {
        match kind {
            IdKind::Long => value.as_i64().map(Id::Long),
            IdKind::Uuid => value
                .as_str()
                .and_then(|raw| Uuid::parse_str(raw).ok())
                .map(Id::Uuid),
            IdKind::Oid => value.as_str().map(|raw| Id::Oid(raw.to_string())),
        }
    }

    /// Text token used inside aggregated id lists.
    pub fn encode(&self) -> String {
        match self {
            Id::Long(v) => v.to_string(),
            Id::Uuid(v) => v.to_string(),
            Id::Oid(v) => v.clone(),
        }
    }
}

/// Mint a 24-hex object id from a v7 UUID, keeping its time-ordered prefix.
pub fn new_oid() -> String {
    let source = Uuid::now_v7();
    let mut out = String::with_capacity(OID_TEXT_LEN);
    for byte in &source.as_bytes()[..OID_TEXT_LEN / 2] {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

/// Join ids into the aggregated text form read back by [`decode_id_list`].
pub fn encode_id_list(kind: IdKind, ids: &[Id]) -> String {
    let tokens: Vec<String> = ids.iter().map(Id::encode).collect();
    tokens.join(kind.separator())
}

/// Split an aggregated cell back into ids. An empty cell is an empty list,
/// never an error: zero links aggregate to NULL/absent upstream.
pub fn decode_id_list(kind: IdKind, raw: &str) -> Result<Vec<Id>, Error> {
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    if !raw.is_ascii() {
        return Err(Error::Deserialize(format!(
            "id list contains non-ascii data: {:?}",
            raw
        )));
    }
    match kind.token_width() {
        // A negative id's sign collides with the separator; the empty token
        // it produces must fail instead of being dropped.
        None => raw
            .split(IdKind::Long.separator())
            .map(|token| {
                token.parse::<i64>().map(Id::Long).map_err(|err| {
                    Error::Deserialize(format!("invalid integer id '{}': {}", token, err))
                })
            })
            .collect(),
        Some(width) => {
            if raw.len() % width != 0 {
                return Err(Error::Deserialize(format!(
                    "id list length {} is not a multiple of the {}-char token width",
                    raw.len(),
                    width
                )));
            }
            let mut out = Vec::with_capacity(raw.len() / width);
            let mut rest = raw;
            while !rest.is_empty() {
                let (token, tail) = rest.split_at(width);
                rest = tail;
                match kind {
                    IdKind::Uuid => {
                        let parsed = Uuid::parse_str(token).map_err(|err| {
                            Error::Deserialize(format!("invalid uuid token '{}': {}", token, err))
                        })?;
                        out.push(Id::Uuid(parsed));
                    }
                    IdKind::Oid => {
                        if !token.bytes().all(|b| b.is_ascii_hexdigit()) {
                            return Err(Error::Deserialize(format!(
                                "invalid oid token '{}'",
                                token
                            )));
                        }
                        out.push(Id::Oid(token.to_string()));
                    }
                    IdKind::Long => unreachable!(),
                }
            }
            Ok(out)
        }
    }
}

/// Read a JSON list field (absent or null meaning empty) into ids.
pub fn id_list_from_json(
    kind: IdKind,
    value: Option<&serde_json::Value>,
) -> Result<Vec<Id>, Error> {
    let Some(value) = value else {
        return Ok(Vec::new());
    };
    match value {
        serde_json::Value::Null => Ok(Vec::new()),
        serde_json::Value::Array(items) => items
            .iter()
            .map(|item| {
                Id::from_json(kind, item)
                    .ok_or_else(|| Error::Serialize(format!("invalid id value: {}", item)))
            })
            .collect(),
        other => Err(Error::Serialize(format!(
            "expected a list of ids, got: {}",
            other
        ))),
    }
}
