pub mod api;
pub mod auth;
pub mod client;
pub mod compactor;
pub mod config;
pub mod directory;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod sync;
pub mod wal;
