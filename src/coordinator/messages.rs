use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::engine::events::OrderEvent;
use crate::engine::types::{AggregatedState, BookError, OrderBookEvent, OrderBookState};

/// Work for one symbol's worker.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Event(OrderEvent),
    GetAggregatedState { symbol: String },
    GetOrderBookState { symbol: String },
    #[cfg(test)]
    Poison { symbol: String },
    #[cfg(test)]
    Stall { symbol: String, millis: u64 },
}

impl Request {
    pub fn symbol(&self) -> &str {
        match self {
            Request::Event(event) => event.symbol(),
            Request::GetAggregatedState { symbol } | Request::GetOrderBookState { symbol } => symbol,
            #[cfg(test)]
            Request::Poison { symbol } | Request::Stall { symbol, .. } => symbol,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Request::Event(event) => event.name(),
            Request::GetAggregatedState { .. } => "GetAggregatedState",
            Request::GetOrderBookState { .. } => "GetOrderBookState",
            #[cfg(test)]
            Request::Poison { .. } => "Poison",
            #[cfg(test)]
            Request::Stall { .. } => "Stall",
        }
    }
}

/// A request tagged with its correlation id, as queued to a worker.
#[derive(Debug)]
pub struct Envelope {
    pub id: u64,
    pub request: Request,
}

/// What a worker hands back for one request.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Event(OrderBookEvent),
    AggregatedState(AggregatedState),
    OrderBookState(OrderBookState),
    /// The worker died while holding this request.
    Unavailable,
}

/// Snapshot carried under `state`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateSnapshot {
    OrderBook(OrderBookState),
    Aggregated(AggregatedState),
}

/// Wire payload: the event fields inline, or `{state}` for snapshot queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponsePayload {
    Event(OrderBookEvent),
    State { state: StateSnapshot },
}

/// Front-end response `{id, type, reason, matches, filledCompletely, timestamp}` or
/// `{id, type, state}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub payload: ResponsePayload,
}

impl Response {
    /// `None` for `Unavailable`, which never reaches the front end as a response.
    pub fn new(id: u64, kind: &str, body: ResponseBody) -> Option<Response> {
        let payload = match body {
            ResponseBody::Event(event) => ResponsePayload::Event(event),
            ResponseBody::AggregatedState(state) => ResponsePayload::State { state: StateSnapshot::Aggregated(state) },
            ResponseBody::OrderBookState(state) => ResponsePayload::State { state: StateSnapshot::OrderBook(state) },
            ResponseBody::Unavailable => return None,
        };
        Some(Response { id, kind: kind.to_string(), payload })
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error(transparent)]
    Book(#[from] BookError),
    #[error("malformed request: {0}")]
    Malformed(String),
}

/// Parses a front-end request `{id, type, order, oldPrice?, oldQuantity?}` or
/// `{id, type, symbol}` for snapshots. Returns the caller's id with the request.
pub fn decode_request(json: &str) -> Result<(u64, Request), DecodeError> {
    let value: Value = serde_json::from_str(json).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    let id = value.get("id").and_then(Value::as_u64).unwrap_or(0);
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| DecodeError::Malformed("missing type".to_string()))?
        .to_string();

    let request = match kind.as_str() {
        "GetAggregatedState" | "GetOrderBookState" => {
            let symbol = value
                .get("symbol")
                .and_then(Value::as_str)
                .ok_or_else(|| DecodeError::Malformed("missing symbol".to_string()))?
                .to_string();
            if kind == "GetAggregatedState" {
                Request::GetAggregatedState { symbol }
            } else {
                Request::GetOrderBookState { symbol }
            }
        }
        k if OrderEvent::TYPES.contains(&k) => {
            let event: OrderEvent = serde_json::from_value(value).map_err(|e| DecodeError::Malformed(e.to_string()))?;
            Request::Event(event)
        }
        _ => return Err(BookError::UnknownEventType(kind).into()),
    };
    Ok((id, request))
}
