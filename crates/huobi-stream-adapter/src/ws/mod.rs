/*
[INPUT]:  Feed endpoint, session configuration and topic listeners
[OUTPUT]: Resilient multiplexed market data session
[POS]:    WebSocket layer - real-time data streams
[UPDATE]: When adding new envelope kinds or changing connection logic
*/

pub mod codec;
pub mod liveness;
pub mod session;
pub mod transport;

pub use codec::{InboundFrame, OutboundFrame, decode_frame, decompress};
pub use liveness::{Liveness, now_millis};
pub use session::{DEFAULT_ENDPOINT, Session, SessionConfig, TopicListener};
pub use transport::{
    DEFAULT_QUEUE_CAPACITY, TerminalSignal, Transport, TransportConfig, TransportHandle,
    TransportState,
};
