// Library root: re-exports all modules so integration tests and the binary
// can access the crate's public API.

pub mod app;
pub mod auction;
pub mod config;
pub mod console;
pub mod db;
pub mod notifier;
pub mod protocol;
pub mod store;
