//! parrot — per-conversation Markov chain engine.
//! Learns one chain per conversation from chat history, generates
//! continuations seeded by recent context.

pub mod api;
pub mod cache;
pub mod chain;
pub mod context;
pub mod engine;
pub mod error;
pub mod store;
pub mod token;

/// Opaque integer key identifying a conversation. Stable for the
/// lifetime of the process; assigned by whatever chat frontend feeds us.
pub type ConversationId = i64;
