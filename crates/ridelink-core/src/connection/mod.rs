//! Live channel lifecycle
//!
//! - `machine`: pure reconnection state machine with linear backoff
//! - `manager`: handle and driver task that carry the machine's effects out

pub mod machine;
pub mod manager;

pub use machine::{BackoffPolicy, ConnectionMachine, ConnectionState, Effect, Transition, Trigger};
pub use manager::ConnectionManager;
