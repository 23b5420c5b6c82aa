pub mod channel;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod metrics;
pub mod registry;
pub mod server;
pub mod signals;
pub mod telemetry;
pub mod turn;
pub mod websocket;
