pub mod cdn;
pub mod config;
pub mod db;
pub mod drive;
pub mod model;
pub mod pipeline;
pub mod preflight;
pub mod server;
pub mod shutdown;
pub mod sync;
pub mod sync_log;
pub mod trigger;
pub mod upload;
pub mod validate;
pub mod watch;
