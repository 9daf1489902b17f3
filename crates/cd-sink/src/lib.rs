pub mod broker;
pub mod registry;
pub mod simple;
pub mod traits;

pub use broker::{BrokerQueueSink, RegisteredTask};
pub use registry::SinkRegistry;
pub use simple::{QueuedTask, SimpleQueueSink};
pub use traits::TaskSink;
