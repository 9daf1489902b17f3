//! Core domain types for the scheduler: entry kinds, the entry codec, the structured
//! `Value` replacement for pickling-JSON args/kwargs, and shared error/time helpers.
//! See SPEC_FULL.md §3-4 (components A, B, H).

pub mod codec;
pub mod cron;
pub mod entry;
pub mod error;
pub mod time;
pub mod value;

pub use codec::EntryTypeRegistry;
pub use entry::EntryKind;
pub use error::{Error, Result};
pub use value::{Args, Kwargs, Value};
