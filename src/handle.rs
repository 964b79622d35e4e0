use crate::error::{BusError, Fault, Operation, Result, Target};
use log::debug;
use nix::fcntl::OFlag;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, IntoRawFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

/// One open device node.
///
/// The handle is the only owner of its descriptor. Dropping it closes the
/// descriptor, so a handle abandoned halfway through a multi-step setup never
/// leaks. `close` consumes the handle, which makes a second close impossible to
/// write.
#[derive(Debug)]
pub struct DeviceHandle {
    file: File,
    path: PathBuf,
}

impl DeviceHandle {
    /// Opens a bus node for reading and writing.
    pub fn open_read_write<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path.as_ref(), OFlag::empty())
    }

    /// Opens a TTY node without making it the controlling terminal and without
    /// blocking on carrier detect.
    pub fn open_tty<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path.as_ref(), OFlag::O_NOCTTY | OFlag::O_NONBLOCK)
    }

    fn open_with(path: &Path, flags: OFlag) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(flags.bits())
            .open(path)
            .map_err(|err| BusError::OpenFailure {
                path: path.to_path_buf(),
                fault: Fault::from(&err),
            })?;

        debug!("Opened {} (fd {})", path.display(), file.as_raw_fd());
        Ok(DeviceHandle {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    pub(crate) fn read_bytes(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.file.read(buf)
    }

    pub(crate) fn write_bytes(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.file.write(buf)
    }

    /// Releases the descriptor and reports any error the kernel raises doing so.
    pub fn close(self) -> Result<()> {
        debug!("Closing {}", self.path.display());
        let fd = self.file.into_raw_fd();
        nix::unistd::close(fd).map_err(|err| BusError::transfer(Operation::Close, Target::Device, err))
    }
}

impl AsFd for DeviceHandle {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl AsRawFd for DeviceHandle {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}
