pub use crate::builder::{Distribution, SelectorBuilder};
pub use crate::bucket::VirtualBucketTable;
pub use crate::error::SelectError;
pub use crate::fleet::{Fleet, ServerEntry, ServerInstance, Transport};
pub use crate::hash::{digest, HashAlgorithm, Hashkit};
pub use crate::sched::RebalanceController;
pub use crate::selector::{Command, Selector, MAX_KEY_LEN};
pub use crate::stats::{ServerTickStats, TextLineExporter, TickExporter};
