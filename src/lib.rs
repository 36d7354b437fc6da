//! glimpsed - Glimpse Presence Broker.
//!
//! A real-time presence broker: many concurrent duplex WebSocket sessions,
//! per-user aggregation of multi-window activity, privacy-filtered fan-out
//! across two contact graphs, heartbeat liveness with silent resumption,
//! 1:1 chat, and single-use invite codes.
//!
//! The binary lives in `main.rs`; everything is exported here so the
//! integration suite can stand up in-process brokers.

pub mod aggregate;
pub mod backup;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod fanout;
pub mod handlers;
pub mod http;
pub mod identity;
pub mod metrics;
pub mod network;
pub mod state;
pub mod visibility;
