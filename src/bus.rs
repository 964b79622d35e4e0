use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;

pub trait BusController: Send {
    fn name(&self) -> String;
    fn device_path(&self) -> &Path;
}

/// A controller behind one mutex, for callers that share it across threads.
/// Every ioctl exchange on a descriptor must be serialized, so this is the
/// only supported way to hand a controller to more than one thread.
pub type Shared<T> = Arc<Mutex<T>>;

pub fn share<T: BusController>(controller: T) -> Shared<T> {
    Arc::new(Mutex::new(controller))
}

// Bus implementations
pub mod smbus; // SMBus ioctl structures
pub mod i2c; // I2CBusController
pub mod uart; // SerialPortController
pub mod spi; // SPIChannelController
