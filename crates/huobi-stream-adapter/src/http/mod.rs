/*
[INPUT]:  HTTP client configuration, key pair and API endpoints
[OUTPUT]: Signed REST responses and typed API results
[POS]:    HTTP layer - REST API communication
[UPDATE]: When adding new endpoints or changing client behavior
*/

pub mod client;
pub mod public;
pub mod signature;

pub use client::{ClientConfig, ENDPOINT, HuobiClient, MARKET_ENDPOINT, Params, TRADE_ENDPOINT};
pub use signature::{RequestSigner, encode_query};
