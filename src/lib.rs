// Library surface for integration tests; main.rs drives the same modules.

pub mod api;
pub mod charts;
pub mod config;
pub mod error;
pub mod format;
pub mod handoff;
pub mod logs;
pub mod model;
pub mod poller;
pub mod routes;
pub mod run_config;
pub mod server;
pub mod session;
pub mod state;
pub mod stats;
pub mod table;
