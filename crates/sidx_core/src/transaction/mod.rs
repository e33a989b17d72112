//! Transactions over records and their index entries.
//!
//! Transactions provide:
//! - **Atomicity**: every record write and index mutation of a commit
//!   applies, or none does
//! - **Isolation**: readers see only committed state; scans run on
//!   point-in-time snapshots
//! - **Uniqueness under concurrency**: unique keys are validated at commit
//!   under a single commit lock, so two racing writers never both win

mod buffer;
mod manager;
mod state;

pub use buffer::{IndexBuffer, KeyOps, PendingOp};
pub use manager::TransactionManager;
pub use state::{Transaction, TransactionState};
