//! SMBus transaction types as the i2c-dev driver expects them.
//!
//! `SmbusData` mirrors `union i2c_smbus_data` (34 bytes, 2-byte aligned) and
//! `SmbusIoctlData` mirrors `struct i2c_smbus_ioctl_data`. The byte and word
//! members of the kernel union overlay the start of the block member, so a
//! single byte array with typed accessors covers all three views.

use crate::error::{BusError, Fault, Operation, Result, Target};
use std::mem::size_of;
use strum::Display;

/// Ioctl request selecting the target device address.
pub const I2C_SLAVE: u32 = 0x0703;
/// Ioctl request performing one SMBus transaction.
pub const I2C_SMBUS: u32 = 0x0720;

/// Maximum data bytes in a block transaction.
pub const SMBUS_BLOCK_MAX: usize = 32;

nix::ioctl_write_int_bad!(i2c_set_slave, I2C_SLAVE);
nix::ioctl_write_ptr_bad!(i2c_smbus, I2C_SMBUS, SmbusIoctlData);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[repr(u8)]
pub enum Direction {
    Write = 0,
    Read = 1,
}

impl Direction {
    pub fn operation(self) -> Operation {
        match self {
            Direction::Write => Operation::Write,
            Direction::Read => Operation::Read,
        }
    }
}

/// Shape of an SMBus transaction. The discriminants are the kernel's size codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[repr(u32)]
pub enum SmbusSize {
    Quick = 0,
    Byte = 1,
    ByteData = 2,
    WordData = 3,
    BlockData = 5,
    I2cBlockData = 8,
}

impl SmbusSize {
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Whether the command byte names a register for this shape.
    pub fn has_register(self) -> bool {
        !matches!(self, SmbusSize::Quick | SmbusSize::Byte)
    }
}

#[repr(C, align(2))]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SmbusData {
    block: [u8; SMBUS_BLOCK_MAX + 2],
}

const _: () = assert!(size_of::<SmbusData>() == 34);

impl Default for SmbusData {
    fn default() -> Self {
        SmbusData {
            block: [0; SMBUS_BLOCK_MAX + 2],
        }
    }
}

impl std::fmt::Debug for SmbusData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmbusData")
            .field("block", &self.block)
            .finish()
    }
}

#[repr(C)]
#[derive(Debug)]
pub struct SmbusIoctlData {
    pub read_write: u8,
    pub command: u8,
    pub size: u32,
    pub data: *mut SmbusData,
}

/// One SMBus request and, once submitted, its response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmbusTransaction {
    direction: Direction,
    command: u8,
    size: SmbusSize,
    data: SmbusData,
}

impl SmbusTransaction {
    fn new(direction: Direction, command: u8, size: SmbusSize) -> Self {
        SmbusTransaction {
            direction,
            command,
            size,
            data: SmbusData::default(),
        }
    }

    /// A read of the given shape. The response is filled in by the adapter.
    pub fn read(command: u8, size: SmbusSize) -> Self {
        Self::new(Direction::Read, command, size)
    }

    /// Sends only the read/write bit; `bit` rides in the direction field.
    pub fn quick(bit: bool) -> Self {
        let direction = if bit { Direction::Read } else { Direction::Write };
        Self::new(direction, 0, SmbusSize::Quick)
    }

    /// For a plain byte write the value travels in the command slot.
    pub fn write_byte(value: u8) -> Self {
        Self::new(Direction::Write, value, SmbusSize::Byte)
    }

    pub fn write_byte_data(register: u8, value: u8) -> Self {
        let mut transaction = Self::new(Direction::Write, register, SmbusSize::ByteData);
        transaction.set_byte(value);
        transaction
    }

    pub fn write_word_data(register: u8, value: u16) -> Self {
        let mut transaction = Self::new(Direction::Write, register, SmbusSize::WordData);
        transaction.set_word(value);
        transaction
    }

    pub fn write_block_data(register: u8, values: &[u8]) -> Result<Self> {
        let mut transaction = Self::new(Direction::Write, register, SmbusSize::BlockData);
        transaction.set_block(values)?;
        Ok(transaction)
    }

    pub fn write_i2c_block_data(register: u8, values: &[u8]) -> Result<Self> {
        let mut transaction = Self::new(Direction::Write, register, SmbusSize::I2cBlockData);
        transaction.set_block(values)?;
        Ok(transaction)
    }

    /// An I2C block read must tell the kernel how many bytes to fetch.
    pub fn read_i2c_block_data(register: u8, len: usize) -> Result<Self> {
        if len == 0 || len > SMBUS_BLOCK_MAX {
            return Err(BusError::transfer(
                Operation::Read,
                Target::Register(register),
                Fault::OutOfRange(len as u32),
            ));
        }

        let mut transaction = Self::new(Direction::Read, register, SmbusSize::I2cBlockData);
        transaction.data.block[0] = len as u8;
        Ok(transaction)
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// The operation the caller asked for. A quick transaction carries its bit
    /// in the direction field but is always a write from the caller's side.
    pub fn operation(&self) -> Operation {
        match self.size {
            SmbusSize::Quick => Operation::Write,
            _ => self.direction.operation(),
        }
    }

    pub fn command(&self) -> u8 {
        self.command
    }

    pub fn size(&self) -> SmbusSize {
        self.size
    }

    pub fn target(&self) -> Target {
        if self.size.has_register() {
            Target::Register(self.command)
        } else {
            Target::Device
        }
    }

    pub fn byte(&self) -> u8 {
        self.data.block[0]
    }

    pub fn set_byte(&mut self, value: u8) {
        self.data.block[0] = value;
    }

    /// The word is held as the kernel's native `__u16`.
    pub fn word(&self) -> u16 {
        u16::from_ne_bytes([self.data.block[0], self.data.block[1]])
    }

    pub fn set_word(&mut self, value: u16) {
        self.data.block[..2].copy_from_slice(&value.to_ne_bytes());
    }

    /// Data bytes of a block transaction, without the length prefix.
    pub fn block(&self) -> &[u8] {
        let len = (self.data.block[0] as usize).min(SMBUS_BLOCK_MAX);
        &self.data.block[1..=len]
    }

    /// Stores `values` behind a one-byte length prefix.
    pub fn set_block(&mut self, values: &[u8]) -> Result<()> {
        if values.len() > SMBUS_BLOCK_MAX {
            return Err(BusError::transfer(
                self.operation(),
                self.target(),
                Fault::OutOfRange(values.len() as u32),
            ));
        }

        self.data.block[0] = values.len() as u8;
        self.data.block[1..=values.len()].copy_from_slice(values);
        Ok(())
    }

    /// The bytes this transaction carries, interpreted according to its size.
    pub fn payload(&self) -> &[u8] {
        match self.size {
            SmbusSize::Quick => &[],
            SmbusSize::Byte if self.direction == Direction::Write => &[],
            SmbusSize::Byte | SmbusSize::ByteData => &self.data.block[..1],
            SmbusSize::WordData => &self.data.block[..2],
            SmbusSize::BlockData | SmbusSize::I2cBlockData => {
                let len = (self.data.block[0] as usize).min(SMBUS_BLOCK_MAX);
                &self.data.block[..=len]
            }
        }
    }

    /// Builds the ioctl argument. The result borrows this transaction's data
    /// buffer through a raw pointer and must not outlive it.
    pub(crate) fn ioctl_data(&mut self) -> SmbusIoctlData {
        let data = match (self.direction, self.size) {
            // No data block travels with these shapes.
            (Direction::Write, SmbusSize::Quick | SmbusSize::Byte) => std::ptr::null_mut(),
            (Direction::Read, SmbusSize::Quick) => std::ptr::null_mut(),
            _ => &mut self.data as *mut SmbusData,
        };

        SmbusIoctlData {
            read_write: self.direction as u8,
            command: self.command,
            size: self.size.code(),
            data,
        }
    }
}
