//! Wire format spoken with the Teneo endpoint
//!
//! The node only ever sends a heartbeat; inbound frames are opaque and
//! only logged.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Serialize;
use url::Url;

use crate::error::{Error, Result};

/// Path appended to the configured base address
pub const WEBSOCKET_PATH: &str = "websocket";

/// Characters escaped in query values: everything except
/// `A-Z a-z 0-9 - _ . ! ~ * ' ( )`
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Messages the node sends to the endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundMessage {
    /// Liveness signal sent on every heartbeat tick
    Ping,
}

impl OutboundMessage {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Build `<base>/websocket?userId=<id>&version=<version>`.
///
/// Both query values are percent-encoded with [`QUERY_VALUE`]. The query is
/// appended as text: `Url` would re-escape `'` for ws/wss.
pub fn endpoint_url(base: &str, user_id: &str, version: &str) -> Result<String> {
    let mut url = Url::parse(base).map_err(|e| Error::invalid_endpoint(base, e.to_string()))?;

    match url.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(Error::invalid_endpoint(
                base,
                format!("unsupported scheme '{}'", other),
            ))
        }
    }

    url.path_segments_mut()
        .map_err(|_| Error::invalid_endpoint(base, "address cannot carry a path"))?
        .pop_if_empty()
        .push(WEBSOCKET_PATH);
    url.set_query(None);
    url.set_fragment(None);

    Ok(format!(
        "{}?userId={}&version={}",
        url,
        utf8_percent_encode(user_id, QUERY_VALUE),
        utf8_percent_encode(version, QUERY_VALUE)
    ))
}
