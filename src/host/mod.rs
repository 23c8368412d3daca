//! Host adapters
//!
//! Production implementations of the domain ports, driving the node's
//! storage tools and the Kubernetes API.

pub mod command;
pub mod events;
pub mod local_disk;
pub mod lvm;
pub mod mounter;
pub mod node;
pub mod pmem;

pub use command::{ShellRunner, NSENTER_PREFIX};
pub use events::{KubeEventRecorder, LogEventRecorder};
pub use local_disk::{LocalDiskConfig, SysfsDiskInventory};
pub use lvm::NodeLvm;
pub use mounter::NodeMounter;
pub use node::KubeNodeSource;
pub use pmem::NodePmem;
