//! Runtime protobuf support: `.proto` parsing and binary decoding.

pub mod decoder;
pub mod parser;

pub use decoder::ProtoDecoder;
pub use parser::ProtoParser;
