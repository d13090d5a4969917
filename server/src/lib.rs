//! Livestage server: settings, background reaping and reconciliation, the
//! status/admin HTTP surface, and the viewer/broadcaster session wiring used
//! by embedding clients.

pub mod app;
pub mod background;
pub mod bootstrap;
pub mod config;
pub mod server;
pub mod sessions;
pub mod shutdown;

pub use bootstrap::{init_foundation, spawn_background_tasks};
