/*
[INPUT]:  Crate modules and public type definitions
[OUTPUT]: Public Huobi stream adapter crate surface
[POS]:    Crate root - module wiring
[UPDATE]: When public modules or exports change
*/

pub mod error;
pub mod http;
pub mod types;
pub mod ws;

pub use error::{FeedError, Result, TransportError};

// Re-export commonly used types from http
pub use http::{ClientConfig, HuobiClient, Params, RequestSigner};

// Re-export all types
pub use types::*;

// Re-export commonly used types from ws
pub use ws::{
    DEFAULT_ENDPOINT,
    InboundFrame,
    OutboundFrame,
    Session,
    SessionConfig,
    TopicListener,
    Transport,
    TransportConfig,
    TransportHandle,
    TransportState,
};
