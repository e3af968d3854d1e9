//! Frame codec
//!
//! Stateless conversion between protocol types and JSON text frames.
//! Decoding resolves the envelope kind once, at the boundary: `error` wins
//! when present, otherwise exactly one recognized key must be present.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::protocol::{ApiError, Envelope, EnvelopeKind, Request};

/// Codec failure; never fatal to the connection
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame is not a JSON object")]
    NotAnObject,

    #[error("malformed `{kind}` payload: {source}")]
    Payload {
        kind: EnvelopeKind,
        #[source]
        source: serde_json::Error,
    },
}

/// Serialize a request into a text frame
pub fn encode(request: &Request) -> Result<String, DecodeError> {
    Ok(serde_json::to_string(request)?)
}

/// Parse a text frame into an envelope
pub fn decode(frame: &str) -> Result<Envelope, DecodeError> {
    let value: Value = serde_json::from_str(frame)?;
    let Value::Object(mut object) = value else {
        return Err(DecodeError::NotAnObject);
    };

    if has_payload(&object, EnvelopeKind::Error) {
        let mut error: ApiError = payload(&mut object, EnvelopeKind::Error)?;
        error.msg_type = object
            .get("msg_type")
            .and_then(Value::as_str)
            .map(str::to_string);
        return Ok(Envelope::Error(error));
    }

    let present: Vec<EnvelopeKind> = EnvelopeKind::ALL
        .into_iter()
        .filter(|kind| has_payload(&object, *kind))
        .collect();

    let kind = match present.as_slice() {
        [kind] => *kind,
        _ => {
            return Ok(Envelope::Unrecognized {
                keys: object.keys().cloned().collect(),
            })
        }
    };

    let envelope = match kind {
        EnvelopeKind::Authorize => Envelope::Authorize(payload(&mut object, kind)?),
        EnvelopeKind::ActiveSymbols => Envelope::ActiveSymbols(payload(&mut object, kind)?),
        EnvelopeKind::Tick => Envelope::Tick(payload(&mut object, kind)?),
        EnvelopeKind::Balance => Envelope::Balance(payload(&mut object, kind)?),
        EnvelopeKind::Portfolio => Envelope::Portfolio(payload(&mut object, kind)?),
        EnvelopeKind::ProfitTable => Envelope::ProfitTable(payload(&mut object, kind)?),
        EnvelopeKind::Buy => Envelope::Buy(payload(&mut object, kind)?),
        EnvelopeKind::GetLimits => Envelope::GetLimits(payload(&mut object, kind)?),
        EnvelopeKind::ForgetAll => Envelope::ForgetAll(forgotten_ids(&object)),
        EnvelopeKind::Ping => Envelope::Ping,
        EnvelopeKind::Error => Envelope::Error(payload(&mut object, kind)?),
    };

    Ok(envelope)
}

// A `null` value counts as absent: the server echoes some keys with null bodies.
fn has_payload(object: &Map<String, Value>, kind: EnvelopeKind) -> bool {
    object.get(kind.key()).is_some_and(|v| !v.is_null())
}

fn payload<T: DeserializeOwned>(
    object: &mut Map<String, Value>,
    kind: EnvelopeKind,
) -> Result<T, DecodeError> {
    let value = object.remove(kind.key()).unwrap_or(Value::Null);
    serde_json::from_value(value).map_err(|source| DecodeError::Payload { kind, source })
}

fn forgotten_ids(object: &Map<String, Value>) -> Vec<String> {
    match object.get(EnvelopeKind::ForgetAll.key()) {
        Some(Value::Array(ids)) => ids
            .iter()
            .filter_map(|id| id.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}
