/*
[INPUT]:  Raw gzip-compressed frame bytes / outbound envelopes
[OUTPUT]: Classified InboundFrame values / serialized JSON text
[POS]:    WebSocket layer - frame decompression and envelope shapes
[UPDATE]: When adding new envelope kinds or changing dispatch priority
*/

use std::io::Read;

use flate2::read::GzDecoder;
use serde::Serialize;
use serde_json::Value;

use crate::error::{FeedError, Result};

/// Client to server envelopes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum OutboundFrame {
    Ping { ping: i64 },
    Pong { pong: i64 },
    Subscribe { sub: String, id: String },
    Request { req: String, id: String },
}

impl OutboundFrame {
    /// Subscribe command; the topic doubles as the correlation id
    pub fn subscribe(topic: &str) -> Self {
        OutboundFrame::Subscribe {
            sub: topic.to_string(),
            id: topic.to_string(),
        }
    }

    pub fn request(topic: &str, id: &str) -> Self {
        OutboundFrame::Request {
            req: topic.to_string(),
            id: id.to_string(),
        }
    }

    /// Serialize to the flat JSON text sent on the wire
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Server to client envelopes, one per inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Ping { ts: i64 },
    Pong { ts: i64 },
    Push { channel: String, payload: Value },
    Subscribed {
        topic: String,
        status: String,
        err_msg: Option<String>,
    },
    Reply {
        id: String,
        payload: Value,
        err_msg: Option<String>,
    },
    ErrorNotice { id: String, err_msg: String },
}

impl InboundFrame {
    /// Classify a parsed frame.
    ///
    /// Checks run in a fixed order and the first match wins: ping, pong,
    /// channel push, subscribe ack, request reply, error notice. Returns
    /// `None` when no shape matches.
    pub fn classify(value: Value) -> Option<Self> {
        if let Some(ts) = positive_i64(&value, "ping") {
            return Some(InboundFrame::Ping { ts });
        }

        if let Some(ts) = positive_i64(&value, "pong") {
            return Some(InboundFrame::Pong { ts });
        }

        if let Some(channel) = non_empty_str(&value, "ch") {
            let channel = channel.to_string();
            return Some(InboundFrame::Push {
                channel,
                payload: value,
            });
        }

        if let Some(topic) = non_empty_str(&value, "subbed") {
            return Some(InboundFrame::Subscribed {
                topic: topic.to_string(),
                status: value
                    .get("status")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                err_msg: err_msg(&value),
            });
        }

        if non_empty_str(&value, "rep").is_some()
            && let Some(id) = non_empty_str(&value, "id")
        {
            let id = id.to_string();
            let err_msg = err_msg(&value);
            return Some(InboundFrame::Reply {
                id,
                payload: value,
                err_msg,
            });
        }

        if value.get("status").and_then(Value::as_str) == Some("error") {
            return Some(InboundFrame::ErrorNotice {
                id: value
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                err_msg: err_msg(&value).unwrap_or_default(),
            });
        }

        None
    }

    /// Short label for logs
    pub fn kind(&self) -> &'static str {
        match self {
            InboundFrame::Ping { .. } => "ping",
            InboundFrame::Pong { .. } => "pong",
            InboundFrame::Push { .. } => "push",
            InboundFrame::Subscribed { .. } => "subbed",
            InboundFrame::Reply { .. } => "reply",
            InboundFrame::ErrorNotice { .. } => "error",
        }
    }
}

/// Inflate a gzip-compressed frame
pub fn decompress(frame: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(frame);
    let mut out = Vec::with_capacity(frame.len().saturating_mul(4));
    decoder
        .read_to_end(&mut out)
        .map_err(|err| FeedError::Decode(format!("gzip: {err}")))?;
    Ok(out)
}

/// Decompress, parse and classify one inbound frame.
///
/// `Ok(None)` means the frame parsed but matched no known envelope.
pub fn decode_frame(frame: &[u8]) -> Result<Option<InboundFrame>> {
    let raw = decompress(frame)?;
    let value: Value = serde_json::from_slice(&raw)?;
    Ok(InboundFrame::classify(value))
}

fn positive_i64(value: &Value, field: &str) -> Option<i64> {
    value
        .get(field)
        .and_then(Value::as_i64)
        .filter(|ts| *ts > 0)
}

fn non_empty_str<'a>(value: &'a Value, field: &str) -> Option<&'a str> {
    value
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

fn err_msg(value: &Value) -> Option<String> {
    value
        .get("err-msg")
        .and_then(Value::as_str)
        .map(str::to_string)
}
