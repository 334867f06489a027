//! Task payload envelope.
//!
//! A payload is a JSON string literal whose contents are themselves a JSON
//! object of string values: `"{\"to\":\"a@b.c\"}"`. Producers and workers
//! already speak this two-layer format, so both layers are kept.

use std::collections::HashMap;

use crate::error::{Error, Result};

/// Executor parameters decoded from a payload.
pub type Params = HashMap<String, String>;

/// Decode a payload envelope into executor parameters.
///
/// Fails with [`Error::Payload`] if either layer does not decode.
pub fn decode_params(payload: &str) -> Result<Params> {
    let inner: String = serde_json::from_str(payload)
        .map_err(|e| Error::Payload(format!("outer layer is not a JSON string: {e}")))?;
    serde_json::from_str(&inner)
        .map_err(|e| Error::Payload(format!("inner layer is not a string map: {e}")))
}

/// Build a payload envelope from parameters.
pub fn encode_params(params: &Params) -> Result<String> {
    let inner = serde_json::to_string(params)?;
    Ok(serde_json::to_string(&inner)?)
}

/// Wrap already-encoded inner JSON text into an envelope without validating it.
pub fn wrap_raw(inner: &str) -> Result<String> {
    Ok(serde_json::to_string(inner)?)
}
