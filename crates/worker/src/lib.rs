//! Worker primitives shared by the shadow execution layer.
//!
//! Everything here runs on dedicated OS threads: a shadow thread's worker
//! must be able to park indefinitely (empty queue, epoch gate, contended
//! monitor) without starving any other worker.

mod class;
mod mailbox;
mod panic;
mod registry;
mod spawn;
mod token;

pub use class::TaskClass;
pub use mailbox::{Mailbox, MailboxReceiver, MailboxSendError, MailboxSender};
pub use panic::panic_message;
pub use registry::{WorkerRecord, WorkerRegistry};
pub use spawn::spawn_named_thread;
pub use token::{CancelToken, GenerationClock};
