pub mod acquisition;
pub mod config;
pub mod error;
pub mod mock_device;

pub use error::{DaqError, Result};
