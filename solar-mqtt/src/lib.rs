mod shutdown;

pub mod command;
pub mod config;
pub mod homeassistant;
pub mod modbus;
pub mod model;
pub mod mqtt;
pub mod publisher;
pub mod scheduler;
pub mod server;

mod error;
pub use error::Error;

pub type Result<T> = std::result::Result<T, Error>;
