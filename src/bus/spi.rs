//! Full-duplex transfers over spidev.
//!
//! A transfer always exchanges in place: the same buffer is handed to the
//! kernel as both the transmit source and the receive destination, so after a
//! transfer the buffer holds what the device clocked back.

use super::BusController;
use crate::error::{BusError, ConfigStep, Fault, Operation, Result, Target};
use crate::handle::DeviceHandle;
use log::{debug, warn};
use nix::errno::Errno;
use nix::libc;
use serde::{Deserialize, Serialize};
use std::mem::size_of;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

pub const SPI_IOC_MAGIC: u8 = b'k';
pub const SPI_BITS_PER_WORD: u8 = 8;
pub const SPI_DELAY_USECS: u16 = 0;
/// Clock polarity and phase both zero.
pub const SPI_MODE_0: u8 = 0;

nix::ioctl_write_buf!(spi_ioc_message, SPI_IOC_MAGIC, 0, SpiIocTransfer);
nix::ioctl_write_ptr!(spi_ioc_wr_mode, SPI_IOC_MAGIC, 1, u8);
nix::ioctl_write_ptr!(spi_ioc_wr_bits_per_word, SPI_IOC_MAGIC, 3, u8);
nix::ioctl_write_ptr!(spi_ioc_wr_max_speed_hz, SPI_IOC_MAGIC, 4, u32);

/// `struct spi_ioc_transfer`. Buffers are passed as 64-bit addresses
/// regardless of the pointer width of the process.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SpiIocTransfer {
    pub tx_buf: u64,
    pub rx_buf: u64,
    pub len: u32,
    pub speed_hz: u32,
    pub delay_usecs: u16,
    pub bits_per_word: u8,
    pub cs_change: u8,
    pub tx_nbits: u8,
    pub rx_nbits: u8,
    pub word_delay_usecs: u8,
    pub pad: u8,
}

const _: () = assert!(size_of::<SpiIocTransfer>() == 32);

/// The two chip selects on the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpiChannel {
    Zero,
    One,
}

impl SpiChannel {
    pub fn index(self) -> usize {
        match self {
            SpiChannel::Zero => 0,
            SpiChannel::One => 1,
        }
    }

    pub fn device_path(self) -> &'static str {
        match self {
            SpiChannel::Zero => "/dev/spidev0.0",
            SpiChannel::One => "/dev/spidev0.1",
        }
    }

    fn target(self) -> Target {
        Target::Channel(self.index() as u8)
    }
}

impl TryFrom<u8> for SpiChannel {
    type Error = BusError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(SpiChannel::Zero),
            1 => Ok(SpiChannel::One),
            _ => Err(BusError::configuration(
                format!("/dev/spidev0.{}", value),
                ConfigStep::ChannelIndex,
                Fault::OutOfRange(value as u32),
            )),
        }
    }
}

/// One duplex exchange over `buffer`.
#[derive(Debug)]
pub struct SpiTransferDescriptor<'a> {
    buffer: &'a mut [u8],
    speed_hz: u32,
    bits_per_word: u8,
    delay_usecs: u16,
    cs_change: bool,
}

impl<'a> SpiTransferDescriptor<'a> {
    pub fn duplex(buffer: &'a mut [u8], speed_hz: u32) -> Self {
        SpiTransferDescriptor {
            buffer,
            speed_hz,
            bits_per_word: SPI_BITS_PER_WORD,
            delay_usecs: SPI_DELAY_USECS,
            cs_change: false,
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn speed_hz(&self) -> u32 {
        self.speed_hz
    }

    pub fn bits_per_word(&self) -> u8 {
        self.bits_per_word
    }

    pub fn delay_usecs(&self) -> u16 {
        self.delay_usecs
    }

    pub fn cs_change(&self) -> bool {
        self.cs_change
    }

    /// The exchange buffer. Before submission it holds the bytes to send,
    /// afterwards the bytes received.
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer[..]
    }

    /// Kernel view of this descriptor. The addresses point into the borrowed
    /// buffer, so the result is only valid while `self` is.
    pub fn to_ioc(&mut self) -> SpiIocTransfer {
        let addr = self.buffer.as_mut_ptr() as u64;
        SpiIocTransfer {
            tx_buf: addr,
            rx_buf: addr,
            len: self.buffer.len() as u32,
            speed_hz: self.speed_hz,
            delay_usecs: self.delay_usecs,
            bits_per_word: self.bits_per_word,
            cs_change: self.cs_change as u8,
            ..Default::default()
        }
    }
}

/// The spidev calls this layer uses.
pub trait SpiDevice: Send {
    fn set_mode(&mut self, mode: u8) -> std::result::Result<(), Errno>;
    fn set_bits_per_word(&mut self, bits: u8) -> std::result::Result<(), Errno>;
    fn set_max_speed_hz(&mut self, speed_hz: u32) -> std::result::Result<(), Errno>;
    /// Runs one transfer and returns the kernel's result code.
    fn transfer(&mut self, descriptor: &mut SpiTransferDescriptor<'_>) -> std::result::Result<libc::c_int, Errno>;
}

impl SpiDevice for DeviceHandle {
    fn set_mode(&mut self, mode: u8) -> std::result::Result<(), Errno> {
        unsafe { spi_ioc_wr_mode(self.as_raw_fd(), &mode) }?;
        Ok(())
    }

    fn set_bits_per_word(&mut self, bits: u8) -> std::result::Result<(), Errno> {
        unsafe { spi_ioc_wr_bits_per_word(self.as_raw_fd(), &bits) }?;
        Ok(())
    }

    fn set_max_speed_hz(&mut self, speed_hz: u32) -> std::result::Result<(), Errno> {
        unsafe { spi_ioc_wr_max_speed_hz(self.as_raw_fd(), &speed_hz) }?;
        Ok(())
    }

    fn transfer(&mut self, descriptor: &mut SpiTransferDescriptor<'_>) -> std::result::Result<libc::c_int, Errno> {
        let ioc = descriptor.to_ioc();
        unsafe { spi_ioc_message(self.as_raw_fd(), std::slice::from_ref(&ioc)) }
    }
}

/// Per-channel clock speeds. A channel without a speed cannot transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpiChannelConfig {
    pub speeds_hz: [Option<u32>; 2],
}

impl SpiChannelConfig {
    pub fn speed(&self, channel: SpiChannel) -> Option<u32> {
        self.speeds_hz[channel.index()]
    }

    pub fn set_speed(&mut self, channel: SpiChannel, speed_hz: u32) {
        self.speeds_hz[channel.index()] = Some(speed_hz);
    }
}

/// Both SPI channels of the board, each with its own handle and speed.
pub struct SPIChannelController<D = DeviceHandle> {
    devices: [Option<D>; 2],
    paths: [Option<PathBuf>; 2],
    config: SpiChannelConfig,
}

impl<D: SpiDevice> BusController for SPIChannelController<D> {
    fn name(&self) -> String {
        "SPI".to_string()
    }

    /// The node of the lowest open channel, or channel 0's node when none is open.
    fn device_path(&self) -> &Path {
        self.paths
            .iter()
            .flatten()
            .next()
            .map(PathBuf::as_path)
            .unwrap_or_else(|| Path::new(SpiChannel::Zero.device_path()))
    }
}

impl<D: SpiDevice> Default for SPIChannelController<D> {
    fn default() -> Self {
        Self::with_config(SpiChannelConfig::default())
    }
}

impl SPIChannelController<DeviceHandle> {
    /// Opens the fixed device node for `channel` and programs mode 0, 8-bit
    /// words and the channel's speed. The speed must already be set.
    pub fn open_channel(&mut self, channel: SpiChannel) -> Result<()> {
        let path = PathBuf::from(channel.device_path());
        if self.devices[channel.index()].is_some() {
            warn!("SPI channel {} is already open, reopening", channel.index());
        }

        let handle = DeviceHandle::open_read_write(&path)?;
        self.attach(channel, handle, &path)
    }

    pub fn close_channel(&mut self, channel: SpiChannel) -> Result<()> {
        self.paths[channel.index()] = None;
        match self.devices[channel.index()].take() {
            Some(handle) => handle.close(),
            None => Ok(()),
        }
    }
}

impl<D: SpiDevice> SPIChannelController<D> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: SpiChannelConfig) -> Self {
        SPIChannelController {
            devices: [None, None],
            paths: [None, None],
            config,
        }
    }

    pub fn config(&self) -> &SpiChannelConfig {
        &self.config
    }

    /// Records the clock speed used by every later transfer on `channel`.
    pub fn set_channel_speed(&mut self, channel: SpiChannel, speed_hz: u32) {
        self.config.set_speed(channel, speed_hz);
    }

    /// Installs an opened device on `channel` and programs it. On failure the
    /// device is dropped and the channel stays empty.
    pub fn attach(&mut self, channel: SpiChannel, mut device: D, path: &Path) -> Result<()> {
        let speed = self.config.speed(channel).ok_or_else(|| {
            BusError::configuration(path, ConfigStep::ChannelSpeed, Fault::Unset)
        })?;

        device
            .set_mode(SPI_MODE_0)
            .map_err(|err| BusError::configuration(path, ConfigStep::SpiMode, err))?;
        device
            .set_bits_per_word(SPI_BITS_PER_WORD)
            .map_err(|err| BusError::configuration(path, ConfigStep::SpiBitsPerWord, err))?;
        device
            .set_max_speed_hz(speed)
            .map_err(|err| BusError::configuration(path, ConfigStep::SpiMaxSpeed, err))?;

        debug!("SPI channel {} ready at {} Hz", channel.index(), speed);
        self.devices[channel.index()] = Some(device);
        self.paths[channel.index()] = Some(path.to_path_buf());
        Ok(())
    }

    /// The device opened for `channel`, if any.
    pub fn handle(&self, channel: SpiChannel) -> Option<&D> {
        self.devices[channel.index()].as_ref()
    }

    /// Exchanges the first `len` bytes of `buffer` with the device on
    /// `channel`. On return those bytes hold what the device sent back.
    pub fn transfer(&mut self, channel: SpiChannel, buffer: &mut [u8], len: usize) -> Result<libc::c_int> {
        let target = channel.target();
        if len > buffer.len() {
            return Err(BusError::transfer(
                Operation::Transfer,
                target,
                Fault::OutOfRange(len as u32),
            ));
        }

        let speed = self.config.speed(channel).ok_or_else(|| {
            BusError::configuration(channel.device_path(), ConfigStep::ChannelSpeed, Fault::Unset)
        })?;

        let device = self.devices[channel.index()]
            .as_mut()
            .ok_or_else(|| BusError::transfer(Operation::Transfer, target, Errno::EBADF))?;

        let mut descriptor = SpiTransferDescriptor::duplex(&mut buffer[..len], speed);
        let code = device
            .transfer(&mut descriptor)
            .map_err(|err| BusError::transfer(Operation::Transfer, target, err))?;

        if code < 0 {
            return Err(BusError::transfer(
                Operation::Transfer,
                target,
                Errno::from_raw(-code),
            ));
        }

        Ok(code)
    }
}
