use super::smbus::{self, SmbusSize, SmbusTransaction};
use super::BusController;
use crate::board::BoardRevision;
use crate::error::{BusError, ConfigStep, Fault, Operation, Result, Target};
use crate::handle::DeviceHandle;
use log::{debug, warn};
use nix::errno::Errno;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

/// Highest 7-bit device address.
pub const MAX_ADDRESS: u8 = 0x7F;

/// The two calls the i2c-dev driver offers for SMBus traffic.
pub trait SmbusAdapter: Send {
    fn select_target(&mut self, address: u16) -> std::result::Result<(), Errno>;
    fn smbus_access(&mut self, transaction: &mut SmbusTransaction) -> std::result::Result<(), Errno>;
}

impl SmbusAdapter for DeviceHandle {
    fn select_target(&mut self, address: u16) -> std::result::Result<(), Errno> {
        unsafe { smbus::i2c_set_slave(self.as_raw_fd(), address as nix::libc::c_int) }?;
        Ok(())
    }

    fn smbus_access(&mut self, transaction: &mut SmbusTransaction) -> std::result::Result<(), Errno> {
        let args = transaction.ioctl_data();
        // `args.data` points into `transaction`, which outlives the call.
        unsafe { smbus::i2c_smbus(self.as_raw_fd(), &args) }?;
        Ok(())
    }
}

/// Register access to one device on an I2C bus.
pub struct I2CBusController<A = DeviceHandle> {
    adapter: A,
    address: u8,
    path: PathBuf,
}

impl<A: SmbusAdapter> BusController for I2CBusController<A> {
    fn name(&self) -> String {
        "I2C".to_string()
    }

    fn device_path(&self) -> &Path {
        &self.path
    }
}

impl I2CBusController<DeviceHandle> {
    /// Opens the adapter node and binds it to `address`.
    pub fn open<P: AsRef<Path>>(device_path: P, address: u8) -> Result<Self> {
        let handle = DeviceHandle::open_read_write(device_path.as_ref())?;
        let path = handle.path().to_path_buf();
        Self::with_adapter(handle, path, address)
    }

    /// Opens the adapter that carries the header pins on this board revision.
    pub fn open_for_board(revision: BoardRevision, address: u8) -> Result<Self> {
        Self::open(revision.i2c_bus_path(), address)
    }

    pub fn close(self) -> Result<()> {
        debug!("Releasing I2C device 0x{:02X} on {}", self.address, self.path.display());
        self.adapter.close()
    }
}

impl<A: SmbusAdapter> I2CBusController<A> {
    /// Binds an already opened adapter to `address`. The adapter is dropped if
    /// the bind fails.
    pub fn with_adapter(mut adapter: A, path: impl Into<PathBuf>, address: u8) -> Result<Self> {
        let path = path.into();
        if address > MAX_ADDRESS {
            return Err(BusError::configuration(
                path,
                ConfigStep::BindAddress,
                Fault::OutOfRange(address as u32),
            ));
        }

        if let Err(err) = adapter.select_target(address as u16) {
            warn!("Failed to select I2C device 0x{:02X} on {}: {}", address, path.display(), err);
            return Err(BusError::configuration(path, ConfigStep::BindAddress, err));
        }

        debug!("Bound {} to I2C device 0x{:02X}", path.display(), address);
        Ok(I2CBusController {
            adapter,
            address,
            path,
        })
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    fn submit(&mut self, mut transaction: SmbusTransaction) -> Result<SmbusTransaction> {
        match self.adapter.smbus_access(&mut transaction) {
            Ok(()) => Ok(transaction),
            Err(err) => Err(BusError::transfer(
                transaction.operation(),
                transaction.target(),
                err,
            )),
        }
    }

    /// Sends a single read/write bit with no data.
    pub fn write_quick(&mut self, bit: bool) -> Result<()> {
        self.submit(SmbusTransaction::quick(bit))?;
        Ok(())
    }

    /// Reads one byte without naming a register.
    pub fn read_byte(&mut self) -> Result<u8> {
        let transaction = self.submit(SmbusTransaction::read(0, SmbusSize::Byte))?;
        Ok(transaction.byte())
    }

    pub fn write_byte(&mut self, value: u8) -> Result<()> {
        self.submit(SmbusTransaction::write_byte(value))?;
        Ok(())
    }

    pub fn read_register8(&mut self, register: u8) -> Result<u8> {
        let transaction = self.submit(SmbusTransaction::read(register, SmbusSize::ByteData))?;
        Ok(transaction.byte())
    }

    pub fn write_register8(&mut self, register: u8, value: u8) -> Result<()> {
        self.submit(SmbusTransaction::write_byte_data(register, value))?;
        Ok(())
    }

    pub fn read_register16(&mut self, register: u8) -> Result<u16> {
        let transaction = self.submit(SmbusTransaction::read(register, SmbusSize::WordData))?;
        Ok(transaction.word())
    }

    pub fn write_register16(&mut self, register: u8, value: u16) -> Result<()> {
        self.submit(SmbusTransaction::write_word_data(register, value))?;
        Ok(())
    }

    /// SMBus block read. The device decides how many bytes come back.
    pub fn read_block(&mut self, register: u8) -> Result<Vec<u8>> {
        let transaction = self.submit(SmbusTransaction::read(register, SmbusSize::BlockData))?;
        Ok(transaction.block().to_vec())
    }

    pub fn write_block(&mut self, register: u8, values: &[u8]) -> Result<()> {
        self.submit(SmbusTransaction::write_block_data(register, values)?)?;
        Ok(())
    }

    /// Plain I2C block read of exactly `len` bytes, for devices without SMBus
    /// block support.
    pub fn read_i2c_block(&mut self, register: u8, len: usize) -> Result<Vec<u8>> {
        let transaction = self.submit(SmbusTransaction::read_i2c_block_data(register, len)?)?;
        let block = transaction.block();
        if block.len() < len {
            return Err(BusError::transfer(
                Operation::Read,
                Target::Register(register),
                Fault::ShortCount {
                    done: block.len(),
                    expected: len,
                },
            ));
        }

        Ok(block[..len].to_vec())
    }

    pub fn write_i2c_block(&mut self, register: u8, values: &[u8]) -> Result<()> {
        self.submit(SmbusTransaction::write_i2c_block_data(register, values)?)?;
        Ok(())
    }
}
