//! # vidiary-dispatch: upload events to running executors, exactly once
//!
//! The dispatcher is a single-threaded loop over one queue carrying two
//! message shapes: storage upload events and upload-API confirmations. Each
//! message is processed to completion: parse, adopt or await the
//! confirmation-created job, resolve the object version, claim the
//! idempotency tuple, create the job record, launch an isolated executor
//! task, and only then delete the queue message. Any failure before the
//! delete leaves the message for redelivery; the claim record makes the
//! redelivery harmless.

mod dispatcher;
mod error;
mod launcher;
mod message;
mod queue;

pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use error::{DispatchError, DispatchResult};
pub use launcher::{LaunchSpec, ProcessLauncher, TaskLauncher};
pub use message::{parse_message, ParsedMessage};
pub use queue::{MemoryQueue, MessageQueue, QueueMessage, SqsQueue};
