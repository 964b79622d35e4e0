use super::BusController;
use crate::error::{BusError, ConfigStep, Fault, Operation, Result, Target};
use crate::handle::DeviceHandle;
use log::{debug, warn};
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::libc;
use nix::sys::termios::{
    self, ControlFlags, FlushArg, LocalFlags, OutputFlags, SetArg, SpecialCharacterIndices, Termios,
};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::os::fd::AsRawFd;
use std::path::Path;
use std::thread;
use std::time::Duration;
use strum::{Display, EnumIter, IntoEnumIterator};

/// How long the line is left to settle after the modem lines are raised.
pub const SETTLE_DELAY: Duration = Duration::from_millis(10);

nix::ioctl_read_bad!(fionread, libc::FIONREAD, libc::c_int);
nix::ioctl_write_ptr_bad!(tiocmbis, libc::TIOCMBIS, libc::c_int);

/// Line speeds the serial port accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter, Serialize, Deserialize)]
pub enum BaudRate {
    B50,
    B75,
    B110,
    B134,
    B150,
    B200,
    B300,
    B600,
    B1200,
    B1800,
    B2400,
    B4800,
    B9600,
    B19200,
    B38400,
    B57600,
    B115200,
    B230400,
}

impl BaudRate {
    pub fn from_bps(bps: u32) -> Option<Self> {
        BaudRate::iter().find(|rate| rate.bps() == bps)
    }

    pub fn bps(self) -> u32 {
        match self {
            BaudRate::B50 => 50,
            BaudRate::B75 => 75,
            BaudRate::B110 => 110,
            BaudRate::B134 => 134,
            BaudRate::B150 => 150,
            BaudRate::B200 => 200,
            BaudRate::B300 => 300,
            BaudRate::B600 => 600,
            BaudRate::B1200 => 1200,
            BaudRate::B1800 => 1800,
            BaudRate::B2400 => 2400,
            BaudRate::B4800 => 4800,
            BaudRate::B9600 => 9600,
            BaudRate::B19200 => 19200,
            BaudRate::B38400 => 38400,
            BaudRate::B57600 => 57600,
            BaudRate::B115200 => 115200,
            BaudRate::B230400 => 230400,
        }
    }

    /// The kernel's speed code for this rate, as stored in `c_cflag`.
    pub fn rate_code(self) -> libc::speed_t {
        match self {
            BaudRate::B50 => libc::B50,
            BaudRate::B75 => libc::B75,
            BaudRate::B110 => libc::B110,
            BaudRate::B134 => libc::B134,
            BaudRate::B150 => libc::B150,
            BaudRate::B200 => libc::B200,
            BaudRate::B300 => libc::B300,
            BaudRate::B600 => libc::B600,
            BaudRate::B1200 => libc::B1200,
            BaudRate::B1800 => libc::B1800,
            BaudRate::B2400 => libc::B2400,
            BaudRate::B4800 => libc::B4800,
            BaudRate::B9600 => libc::B9600,
            BaudRate::B19200 => libc::B19200,
            BaudRate::B38400 => libc::B38400,
            BaudRate::B57600 => libc::B57600,
            BaudRate::B115200 => libc::B115200,
            BaudRate::B230400 => libc::B230400,
        }
    }

    fn termios_rate(self) -> std::result::Result<termios::BaudRate, nix::errno::Errno> {
        termios::BaudRate::try_from(self.rate_code())
    }
}

impl TryFrom<u32> for BaudRate {
    type Error = Fault;

    fn try_from(bps: u32) -> std::result::Result<Self, Self::Error> {
        BaudRate::from_bps(bps).ok_or(Fault::OutOfRange(bps))
    }
}

/// The line settings applied at open time: 8N1, raw input, no output
/// processing, reads returning after `timeout_deciseconds` with whatever
/// arrived (possibly nothing).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialLineConfig {
    pub baud_rate: BaudRate,
    pub min_bytes: u8,
    pub timeout_deciseconds: u8,
}

impl SerialLineConfig {
    pub fn new(baud_rate: BaudRate) -> Self {
        SerialLineConfig {
            baud_rate,
            min_bytes: 0,
            timeout_deciseconds: 10,
        }
    }

    /// Rewrites `attrs` in place. Only the speed can fail.
    pub fn apply(&self, attrs: &mut Termios) -> std::result::Result<(), nix::errno::Errno> {
        termios::cfsetspeed(attrs, self.baud_rate.termios_rate()?)?;

        attrs.control_flags.insert(ControlFlags::CLOCAL | ControlFlags::CREAD);
        attrs
            .control_flags
            .remove(ControlFlags::PARENB | ControlFlags::CSTOPB | ControlFlags::CSIZE);
        attrs.control_flags.insert(ControlFlags::CS8);

        attrs
            .local_flags
            .remove(LocalFlags::ICANON | LocalFlags::ECHO | LocalFlags::ECHOE | LocalFlags::ISIG);

        attrs.output_flags = OutputFlags::empty();

        attrs.control_chars[SpecialCharacterIndices::VMIN as usize] = self.min_bytes;
        attrs.control_chars[SpecialCharacterIndices::VTIME as usize] = self.timeout_deciseconds;
        Ok(())
    }
}

/// Raw byte access to a UART.
pub struct SerialPortController {
    handle: DeviceHandle,
    config: SerialLineConfig,
}

impl BusController for SerialPortController {
    fn name(&self) -> String {
        "UART".to_string()
    }

    fn device_path(&self) -> &Path {
        self.handle.path()
    }
}

impl SerialPortController {
    /// Opens and configures the TTY at `device_path`. Unsupported rates are
    /// rejected before the device is touched, and a port that fails any setup
    /// step is closed before the error is returned.
    pub fn open<P: AsRef<Path>>(device_path: P, baud_rate: u32) -> Result<Self> {
        let path = device_path.as_ref();
        let rate = BaudRate::try_from(baud_rate)
            .map_err(|fault| BusError::configuration(path, ConfigStep::BaudRate, fault))?;

        let config = SerialLineConfig::new(rate);
        let handle = DeviceHandle::open_tty(path)?;
        configure_line(&handle, &config)?;
        assert_modem_lines(&handle)?;
        thread::sleep(SETTLE_DELAY);

        debug!("Opened serial port {} at {} baud", path.display(), rate.bps());
        Ok(SerialPortController { handle, config })
    }

    /// Wraps a handle whose line settings are already in place.
    pub(crate) fn from_handle(handle: DeviceHandle, config: SerialLineConfig) -> Self {
        SerialPortController { handle, config }
    }

    pub fn config(&self) -> &SerialLineConfig {
        &self.config
    }

    /// Discards everything queued in both directions.
    pub fn flush(&mut self) -> Result<()> {
        termios::tcflush(&self.handle, FlushArg::TCIOFLUSH)
            .map_err(|err| BusError::transfer(Operation::Flush, Target::Device, err))
    }

    /// Writes all of `bytes` in one call. A partial write is a failure.
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let written = loop {
            match self.handle.write_bytes(bytes) {
                Ok(n) => break n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    return Err(BusError::transfer(Operation::Write, Target::Device, &err));
                }
            }
        };

        if written < bytes.len() {
            warn!(
                "Short write on {}: {} of {} bytes",
                self.handle.path().display(),
                written,
                bytes.len()
            );
            return Err(BusError::transfer(
                Operation::Write,
                Target::Device,
                Fault::ShortCount {
                    done: written,
                    expected: bytes.len(),
                },
            ));
        }

        Ok(())
    }

    /// Number of received bytes waiting to be read.
    pub fn bytes_available(&self) -> Result<usize> {
        let mut count: libc::c_int = 0;
        unsafe { fionread(self.handle.as_raw_fd(), &mut count) }
            .map_err(|err| BusError::transfer(Operation::Query, Target::Device, err))?;

        usize::try_from(count).map_err(|_| {
            BusError::transfer(Operation::Query, Target::Device, Fault::OutOfRange(count as u32))
        })
    }

    /// Reads one byte, waiting at most the configured timeout. `None` means the
    /// timeout elapsed with nothing received.
    pub fn read_byte(&mut self) -> Result<Option<u8>> {
        let mut buf = [0u8; 1];
        Ok(match self.read(&mut buf)? {
            0 => None,
            _ => Some(buf[0]),
        })
    }

    /// Reads up to `buf.len()` bytes under the same timeout as `read_byte`.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            match self.handle.read_bytes(buf) {
                Ok(n) => return Ok(n),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(0),
                Err(err) => return Err(BusError::transfer(Operation::Read, Target::Device, &err)),
            }
        }
    }

    pub fn close(self) -> Result<()> {
        self.handle.close()
    }
}

/// Puts the line into the state described by `config`: blocking reads, the
/// configured speed, 8N1 raw mode. Input that arrived before this call is
/// discarded.
pub(crate) fn configure_line(handle: &DeviceHandle, config: &SerialLineConfig) -> Result<()> {
    let path = handle.path();

    fcntl(handle.as_raw_fd(), FcntlArg::F_SETFL(OFlag::empty()))
        .map_err(|err| BusError::configuration(path, ConfigStep::ClearNonBlocking, err))?;

    let mut attrs = termios::tcgetattr(handle)
        .map_err(|err| BusError::configuration(path, ConfigStep::GetAttributes, err))?;

    config
        .apply(&mut attrs)
        .map_err(|err| BusError::configuration(path, ConfigStep::SetSpeed, err))?;

    termios::tcsetattr(handle, SetArg::TCSAFLUSH, &attrs)
        .map_err(|err| BusError::configuration(path, ConfigStep::ApplyAttributes, err))
}

/// Raises DTR and RTS.
fn assert_modem_lines(handle: &DeviceHandle) -> Result<()> {
    let lines: libc::c_int = libc::TIOCM_DTR | libc::TIOCM_RTS;
    unsafe { tiocmbis(handle.as_raw_fd(), &lines) }
        .map_err(|err| BusError::configuration(handle.path(), ConfigStep::ModemLines, err))?;
    Ok(())
}
