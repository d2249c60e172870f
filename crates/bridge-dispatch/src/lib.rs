//! Command arbitration: the single-writer `Dispatcher`, its durable
//! `OutboundQueue`, and the queue flusher task.

pub mod dispatcher;
pub mod error;
pub mod flusher;
pub mod gateway;
pub mod queue;

pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use error::DispatchError;
pub use gateway::DeviceToolGateway;
pub use queue::{OutboundQueue, QueueRecord};
