//! One session is one target: address formatting, TLS material, compression
//! and per-call credential metadata, validated once at startup.

pub mod channel;
pub mod config;
