//! Streaming pipeline (spec §4.F): buffering, per-stream state, wire framing,
//! and the strategy-dispatching processor built on top of them.

pub mod buffer;
pub mod framing;
pub mod processor;
pub mod state;

pub use buffer::TextBuffer;
pub use processor::{select_strategy, Strategy, StreamProcessor};
pub use state::StreamState;
