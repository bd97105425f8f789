//! TaskGate: an authentication, rate-limiting, and session gateway in
//! front of a JSON-RPC tool-execution engine.
//!
//! The gateway validates bearer credentials against an upstream identity
//! endpoint (with a two-tier TTL cache), enforces a per-credential
//! sliding-window quota over a shared store, tracks session lifecycles,
//! and forwards validated envelopes to the protocol engine over either the
//! streamable POST transport or the legacy event-stream transport.
//!
//! ## Module Organization
//!
//! - [`auth`] - credential validation and the principal cache
//! - [`quota`] - sliding-window-log rate limiting
//! - [`session`] - session registry and lifecycle sweep
//! - [`envelope`] - strict request-envelope validation
//! - [`engine`] - protocol engine dispatch
//! - [`gateway`] - HTTP routes and the per-request pipeline
//! - [`store`] - shared key-value store abstraction
//! - [`error`] - error taxonomy and JSON-RPC error rendering
//! - [`audit`] - fire-and-forget audit events
//! - [`config`] - environment-driven configuration

pub mod audit;
pub mod auth;
pub mod config;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod gateway;
pub mod quota;
pub mod session;
pub mod store;
