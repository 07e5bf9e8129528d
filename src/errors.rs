use thiserror::Error;

/// Engine error type
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Adapter error: {0}")]
    Adapter(String),
    #[error("Order error: {0}")]
    Order(String),
}

pub type Result<T> = std::result::Result<T, Error>;
