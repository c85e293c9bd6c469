//! Entity implementations built on the kernel's entity contract: quantum
//! memories with coherence-time expiration, the arrays that own them, and a
//! relay used to wire up demo topologies.

mod args;
mod memory;
mod relay;

pub use memory::{Memory, MemoryArray, MemoryParams};
pub use relay::Relay;
