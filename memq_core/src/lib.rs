//! Token-addressed asynchronous queues.
//!
//! `push` and `pop` return a [`QToken`] immediately; a pair of workers on the
//! tokio runtime does the channel work, and the result is collected later
//! with `poll` or `wait`.

pub mod channel;
pub mod error;
pub mod memory_queue;
pub mod queue;
pub mod queue_table;
pub mod registry;
pub mod scheduler;
pub mod sga;
pub mod token;
mod worker;

/// Queue descriptor, assigned by whoever constructs the queue.
pub type Qd = i32;

pub use error::QueueError;
pub use memory_queue::{MemoryQueue, QueueState};
pub use queue::{IoQueue, Outcome, PollState, QOpcode, QResult, QueueKind};
pub use queue_table::QueueTable;
pub use sga::{ScatterGatherArray, Segment};
pub use token::QToken;
