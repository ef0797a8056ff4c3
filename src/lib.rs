pub mod config;
pub mod error;
pub mod gateway;
pub mod models;
pub mod protocol;
pub mod proxy;
pub mod router;

pub use error::{Error, Result};
