pub mod application;
pub mod config;
pub mod logging;

pub use application::Application;
pub use config::Configuration;
