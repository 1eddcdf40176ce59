use crate::config::ConfigError;
use dataq_protocol::ProtocolError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DaqError>;

#[derive(Error, Debug)]
pub enum DaqError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Signal handler error: {0}")]
    Signal(#[from] ctrlc::Error),
}
