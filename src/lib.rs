//! Headless client core for a real-time air-quality monitoring dashboard.
//!
//! The crate keeps a reconciled per-point view of sensor data that can come
//! from three places: server-side simulation playback, on-demand historical
//! queries and a live push feed. [`monitor::RealtimeMonitor`] is the entry
//! point; it owns the state and wires together the push connection
//! ([`push::PushClient`]), the REST client ([`rest::RestClient`]), the
//! playback controller ([`simulation::SimulationController`]) and the
//! critical-alert engine ([`alerts::AlertEngine`]).

pub mod alerts;
pub mod config;
pub mod error;
pub mod models;
pub mod monitor;
pub mod push;
pub mod reconciler;
pub mod rest;
pub mod simulation;
pub mod window;
pub mod wire;

pub use alerts::AlertEngine;
pub use config::ClientConfig;
pub use monitor::RealtimeMonitor;
pub use push::{ConnectionState, PushCallbacks, PushClient, WebSocketTransport};
pub use rest::RestClient;
pub use simulation::SimulationController;
