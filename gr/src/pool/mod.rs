//! Ghost session pool
//!
//! A warm pool of isolated browser sessions bounded by [min, max].
//! Tasks acquire exclusive leases; overflow requests queue FIFO with
//! foreground preemption; crashed or destroyed slots are replenished so
//! the pool topology stays stable.

mod factory;
mod lease;
mod manager;
mod slot;

pub use factory::{SessionFactory, StubSessionFactory};
pub use lease::Lease;
pub use manager::{PoolConfig, PoolError, PoolManager, PoolSnapshot, PoolStats};
pub use slot::{SessionSlot, SlotState};
