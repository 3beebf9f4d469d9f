//! # Spanbridge API Surface
//!
//! JSON over HTTP for the request/response endpoints and a WebSocket stream
//! of lifecycle transitions. Field names on every wire object are protocol
//! surface and covered by tests.
//!
//! Endpoints:
//! - `POST /api/validate-transfer` - dry-run validation
//! - `POST /api/initiate-transfer` - accept a transfer
//! - `GET  /api/transfer-status/{request_id}` - full response record
//! - `GET  /api/supported-pairs` - active routing table
//! - `GET  /api/stats` - relay counters
//! - `GET  /api/health` - replay store and worker health
//! - `WS   /ws/logs` - newline-delimited JSON lifecycle events

pub mod config;
pub mod http;
pub mod ws;

pub use config::BridgeConfig;
pub use http::BridgeApi;
