//! External collaborator interfaces.

mod memory;
mod traits;

pub use memory::{MemoryPersistence, MemoryRemote};
pub use traits::{Persistence, RemoteFeed};
