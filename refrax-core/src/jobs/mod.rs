//! The durable video job queue: Postgres-backed store, in-process event
//! fan-out, and the bounded worker pool that drives the transcoder.

mod events;
mod store;
mod worker;

pub use events::JobEventBus;
pub use store::{JobStore, MIGRATOR};
pub use worker::WorkerPool;
