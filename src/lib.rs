pub mod config;
pub mod dispatch;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod reaper;
pub mod session;
pub mod store;
pub mod wal;
