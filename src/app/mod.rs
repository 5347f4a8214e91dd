//! Reference applications built on the dispatcher contract.

pub mod chat;

pub use chat::{ChatApp, HISTORY_LIMIT};
