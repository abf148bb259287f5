//! # emporium-server
//!
//! Real-time messaging hub for the Emporium storefront.
//!
//! - `WebSocket` gateway: authenticated upgrade, origin allow-list, connection limit
//! - Per-connection sessions: inbound/outbound pumps, rate limiting, heartbeat
//! - Room registry and fan-out with drop-on-full backpressure
//! - HTTP endpoints: health check, Prometheus metrics
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod auth;
pub mod chat;
pub mod config;
pub mod errors;
pub mod health;
pub mod ids;
pub mod metrics;
pub mod origin;
pub mod server;
pub mod shutdown;
pub mod websocket;
