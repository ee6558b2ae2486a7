//! Transaction submission: transfers inside the head and commits into it

mod commit;
mod send;

pub use commit::CommitFlow;
pub use send::{SendLifecycle, TransferRequest};
