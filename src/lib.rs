pub mod analytics;
pub mod bus;
pub mod cli;
pub mod config;
pub mod console;
pub mod domain;
pub mod engine;
pub mod error;
pub mod feed;
pub mod market;
pub mod sink;
pub mod strategy;

pub use bus::{Event, EventBus};
pub use config::AppConfig;
pub use engine::Engine;
pub use error::{FluxoError, Result};
