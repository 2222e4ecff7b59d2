pub mod graph;
pub mod handlers;
pub mod worker;

pub use graph::Operation;
pub use worker::WorkerPool;
