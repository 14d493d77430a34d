//! Multi-user task tracker: a REST service with bearer-token auth, task
//! ownership and a per-user change feed, plus a client that keeps a local
//! task cache in sync with it.

pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod feed;
pub mod routes;
pub mod session;
pub mod state;

pub use routes::routes;
