pub mod scheduler;

pub use scheduler::{ListPage, Scheduler};
