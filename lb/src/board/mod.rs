//! Shared coordination board
//!
//! One JSON document holds per-agent status, threaded notes and area
//! ownership. Writers serialize on a lease; readers never block.

mod model;
mod store;

pub use model::{Area, BOARD_SCHEMA_VERSION, Board, Note, Status, ThreadSummary};
pub use store::{BoardStore, NormalizeReport};
