/*
[INPUT]:  Feed payload schemas and serde requirements
[OUTPUT]: Typed Rust structs/enums with serialization support
[POS]:    Data layer - type definitions for feed and REST payloads
[UPDATE]: When payload schema changes or new types added
*/

pub mod market;

pub use market::*;
