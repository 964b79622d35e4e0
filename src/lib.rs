pub mod board;
pub mod bus;
pub mod config;
pub mod error;
pub mod handle;


pub use error::{BusError, Result};
pub use handle::DeviceHandle;
