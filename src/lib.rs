pub mod application;
pub mod chunking;
pub mod client;
pub mod db;
pub mod error;
pub mod git;
pub mod indexes;
pub mod llm;
pub mod model;
pub mod pipeline;
pub mod queue;
pub mod search;
pub mod store;
pub mod tracker;
pub mod webserver;

pub use client::{Client, ClientOptions, SearchOptions};
pub use error::Error;
