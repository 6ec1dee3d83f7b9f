// Core auction logic: data model, engine, turn timer, roster import and
// results export.

pub mod clock;
pub mod engine;
pub mod error;
pub mod results;
pub mod roster_import;
pub mod state;
pub mod timer;

pub use engine::AuctionEngine;
pub use error::AuctionError;
