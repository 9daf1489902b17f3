pub mod kv;
pub mod lock;
pub mod mem;
pub mod sql;
pub mod traits;

pub use kv::KvStore;
pub use lock::{acquire_with_retry, validate_lock_timeout, LeaderLockBackend, LockToken};
pub use mem::MemStore;
pub use sql::SqlStore;
pub use traits::{EntryStore, FireOutcome, StoredPage};
