//! Inbound feed parsing and outbound per-channel feed serialization.

pub mod export;
pub mod parse;
