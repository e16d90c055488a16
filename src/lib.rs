//! Streaming chat client for an AI assistant.
//!
//! The core is the streaming event protocol and its transport clients: an
//! assistant turn arrives as a sequence of typed [`event::StreamEvent`]s over
//! either a server-push channel ([`transport::sse::SseClient`]) or a
//! full-duplex socket ([`transport::ws::WsClient`], with linear-backoff
//! reconnection). The [`turn::TurnController`] folds that sequence into an
//! assistant [`models::Message`], and the [`store::Store`] owns the resulting
//! conversations and artifacts.
//!
//! Persistence and the assistant backend are external collaborators reached
//! through [`api::ApiClient`] and the streaming endpoint respectively.

pub mod api;
pub mod config;
pub mod errors;
pub mod event;
pub mod models;
pub mod retry;
pub mod store;
pub mod transport;
pub mod turn;
