//! Outbound side: throttle ledger + queue-draining scheduler.

pub mod ledger;
pub mod scheduler;

pub use ledger::{Ledger, LedgerEntry};
pub use scheduler::{OutboundScheduler, spawn_queue_sender};
