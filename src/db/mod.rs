pub mod sqlite;

pub use sqlite::{init, init_in_memory, SqlDb};
