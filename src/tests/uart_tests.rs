use crate::bus::uart::{configure_line, BaudRate, SerialLineConfig, SerialPortController};
use crate::error::{BusError, ConfigStep, Fault, Operation, Target};
use crate::handle::DeviceHandle;
use nix::errno::Errno;
use nix::libc;
use nix::sys::termios::{self, ControlFlags, LocalFlags, OutputFlags, SpecialCharacterIndices, Termios};
use strum::IntoEnumIterator;

const EXPECTED_RATES: [(u32, libc::speed_t); 18] = [
    (50, libc::B50),
    (75, libc::B75),
    (110, libc::B110),
    (134, libc::B134),
    (150, libc::B150),
    (200, libc::B200),
    (300, libc::B300),
    (600, libc::B600),
    (1200, libc::B1200),
    (1800, libc::B1800),
    (2400, libc::B2400),
    (4800, libc::B4800),
    (9600, libc::B9600),
    (19200, libc::B19200),
    (38400, libc::B38400),
    (57600, libc::B57600),
    (115200, libc::B115200),
    (230400, libc::B230400),
];

fn blank_termios() -> Termios {
    // All-zero is a valid (if useless) termios value.
    let raw: libc::termios = unsafe { std::mem::zeroed() };
    Termios::from(raw)
}

/// Starts from a cooked-mode line with odd parity, 7 data bits, two stop bits,
/// echo and output processing enabled.
fn cooked_termios() -> Termios {
    let mut attrs = blank_termios();
    attrs.control_flags = ControlFlags::CS7 | ControlFlags::PARENB | ControlFlags::PARODD | ControlFlags::CSTOPB;
    attrs.local_flags =
        LocalFlags::ICANON | LocalFlags::ECHO | LocalFlags::ECHOE | LocalFlags::ISIG | LocalFlags::IEXTEN;
    attrs.output_flags = OutputFlags::OPOST | OutputFlags::ONLCR;
    attrs.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
    attrs.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;
    attrs
}

#[test]
fn baud_table() {
    assert_eq!(BaudRate::iter().count(), EXPECTED_RATES.len());
    for (bps, code) in EXPECTED_RATES {
        let rate = BaudRate::from_bps(bps).unwrap();
        assert_eq!(rate.bps(), bps);
        assert_eq!(rate.rate_code(), code);
    }
}

#[test]
fn every_rate_applies() {
    for rate in BaudRate::iter() {
        let mut attrs = blank_termios();
        SerialLineConfig::new(rate).apply(&mut attrs).unwrap();
        let raw = libc::termios::from(attrs);
        assert_eq!(raw.c_cflag & libc::CBAUD, rate.rate_code(), "{}", rate);
    }
}

#[test]
fn unsupported_rates() {
    for bps in [0u32, 1, 100, 14400, 28800, 76800, 250000, 460800, 921600] {
        assert_eq!(BaudRate::from_bps(bps), None);
        assert_eq!(BaudRate::try_from(bps), Err(Fault::OutOfRange(bps)));
    }
}

#[test]
fn unsupported_rate_rejected_before_open() {
    // The path does not exist, so any attempt to open it would be an OpenFailure.
    let err = SerialPortController::open("/dev/tty-does-not-exist", 14400).err().unwrap();
    assert_eq!(
        err,
        BusError::ConfigurationFailure {
            path: "/dev/tty-does-not-exist".into(),
            step: ConfigStep::BaudRate,
            fault: Fault::OutOfRange(14400),
        }
    );
}

#[test]
fn missing_tty() {
    let err = SerialPortController::open("/dev/tty-does-not-exist", 9600).err().unwrap();
    assert!(matches!(err, BusError::OpenFailure { .. }));
    assert_eq!(err.errno(), Some(Errno::ENOENT));
}

#[test]
fn line_settings_9600() {
    let config = SerialLineConfig::new(BaudRate::B9600);
    assert_eq!(config.min_bytes, 0);
    assert_eq!(config.timeout_deciseconds, 10);

    let mut attrs = cooked_termios();
    config.apply(&mut attrs).unwrap();

    assert_eq!(termios::cfgetispeed(&attrs), termios::BaudRate::B9600);
    assert_eq!(termios::cfgetospeed(&attrs), termios::BaudRate::B9600);

    let cflag = attrs.control_flags;
    assert!(cflag.contains(ControlFlags::CLOCAL | ControlFlags::CREAD));
    assert_eq!(cflag & ControlFlags::CSIZE, ControlFlags::CS8);
    assert!(!cflag.contains(ControlFlags::PARENB));
    assert!(!cflag.contains(ControlFlags::CSTOPB));

    let lflag = attrs.local_flags;
    assert!(!lflag.intersects(LocalFlags::ICANON | LocalFlags::ECHO | LocalFlags::ECHOE | LocalFlags::ISIG));
    // Flags outside the raw-mode set are left alone.
    assert!(lflag.contains(LocalFlags::IEXTEN));

    assert!(attrs.output_flags.is_empty());
    assert_eq!(attrs.control_chars[SpecialCharacterIndices::VMIN as usize], 0);
    assert_eq!(attrs.control_chars[SpecialCharacterIndices::VTIME as usize], 10);
}

fn dev_null_port() -> SerialPortController {
    let handle = DeviceHandle::open_read_write("/dev/null").unwrap();
    SerialPortController::from_handle(handle, SerialLineConfig::new(BaudRate::B115200))
}

#[test]
fn bytes_available_query_error() {
    let port = dev_null_port();
    assert_eq!(
        port.bytes_available().unwrap_err(),
        BusError::TransferFailure {
            op: Operation::Query,
            target: Target::Device,
            fault: Fault::Os(Errno::ENOTTY),
        }
    );
}

#[test]
fn end_of_input_reads_empty() {
    let mut port = dev_null_port();
    assert_eq!(port.read_byte().unwrap(), None);
}

#[test]
fn full_write() {
    let mut port = dev_null_port();
    port.write(b"hello").unwrap();
    port.write(&[]).unwrap();
    port.close().unwrap();
}

#[test]
fn line_setup_on_non_tty() {
    let handle = DeviceHandle::open_read_write("/dev/null").unwrap();
    let err = configure_line(&handle, &SerialLineConfig::new(BaudRate::B9600)).unwrap_err();
    assert_eq!(
        err,
        BusError::ConfigurationFailure {
            path: "/dev/null".into(),
            step: ConfigStep::GetAttributes,
            fault: Fault::Os(Errno::ENOTTY),
        }
    );
}

#[cfg(not(feature = "skip-pty-tests"))]
mod pty {
    use super::*;
    use nix::pty::openpty;
    use std::fs::File;
    use std::io::{Read, Write};
    use std::os::fd::{AsRawFd, OwnedFd};
    use std::path::{Path, PathBuf};
    use std::thread;
    use std::time::{Duration, Instant};

    struct Pty {
        master: File,
        // Kept open so the line stays up while the port is in use.
        slave: OwnedFd,
        path: PathBuf,
    }

    fn pty() -> Pty {
        let result = openpty(None, None).unwrap();
        let path = std::fs::read_link(format!("/proc/self/fd/{}", result.slave.as_raw_fd())).unwrap();
        Pty {
            master: File::from(result.master),
            slave: result.slave,
            path,
        }
    }

    fn configured_port(pty: &Pty) -> SerialPortController {
        let config = SerialLineConfig::new(BaudRate::B9600);
        let handle = DeviceHandle::open_tty(&pty.path).unwrap();
        configure_line(&handle, &config).unwrap();
        SerialPortController::from_handle(handle, config)
    }

    fn wait_for_bytes(port: &SerialPortController, count: usize) -> usize {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let available = port.bytes_available().unwrap();
            if available >= count || Instant::now() > deadline {
                return available;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn configured_line_state() {
        let pty = pty();
        let port = configured_port(&pty);
        let attrs = termios::tcgetattr(&pty.slave).unwrap();

        assert_eq!(attrs.control_flags & ControlFlags::CSIZE, ControlFlags::CS8);
        assert!(!attrs.control_flags.contains(ControlFlags::PARENB));
        assert!(!attrs.local_flags.intersects(LocalFlags::ICANON | LocalFlags::ECHO | LocalFlags::ISIG));
        assert_eq!(attrs.control_chars[SpecialCharacterIndices::VMIN as usize], 0);
        assert_eq!(attrs.control_chars[SpecialCharacterIndices::VTIME as usize], 10);
        port.close().unwrap();
    }

    #[test]
    fn receive_bytes() {
        let mut pty = pty();
        let mut port = configured_port(&pty);
        assert_eq!(port.bytes_available().unwrap(), 0);

        pty.master.write_all(&[0x41, 0x00, 0xFF]).unwrap();
        assert_eq!(wait_for_bytes(&port, 3), 3);

        assert_eq!(port.read_byte().unwrap(), Some(0x41));
        assert_eq!(port.read_byte().unwrap(), Some(0x00));
        assert_eq!(port.read_byte().unwrap(), Some(0xFF));
        assert_eq!(port.bytes_available().unwrap(), 0);
    }

    #[test]
    fn read_times_out_empty() {
        let pty = pty();
        let mut port = configured_port(&pty);
        let started = Instant::now();
        assert_eq!(port.read_byte().unwrap(), None);
        assert!(started.elapsed() >= Duration::from_millis(500));
    }

    #[test]
    fn transmit_bytes() {
        let mut pty = pty();
        let mut port = configured_port(&pty);
        port.write(b"AT\r\n").unwrap();

        let mut received = [0u8; 4];
        pty.master.read_exact(&mut received).unwrap();
        assert_eq!(&received, b"AT\r\n");
    }

    #[test]
    fn flush_discards_input() {
        let mut pty = pty();
        let mut port = configured_port(&pty);
        pty.master.write_all(b"stale").unwrap();
        assert_eq!(wait_for_bytes(&port, 5), 5);

        port.flush().unwrap();
        assert_eq!(port.bytes_available().unwrap(), 0);
    }

    /// Descriptors in this process that refer to `path`.
    fn open_descriptors(path: &Path) -> usize {
        std::fs::read_dir("/proc/self/fd")
            .unwrap()
            .filter_map(|entry| std::fs::read_link(entry.ok()?.path()).ok())
            .filter(|target| target == path)
            .count()
    }

    #[test]
    fn failed_setup_closes_port() {
        let pty = pty();
        let before = open_descriptors(&pty.path);
        assert!(SerialPortController::open(&pty.path, 9600).is_err());
        assert_eq!(open_descriptors(&pty.path), before);
    }

    #[test]
    fn failed_setup_names_step() {
        // A pseudo-terminal has no modem control lines, so the full open
        // sequence stops at that step.
        let pty = pty();
        let err = SerialPortController::open(&pty.path, 9600).err().unwrap();
        assert!(matches!(
            err,
            BusError::ConfigurationFailure {
                step: ConfigStep::ModemLines,
                ..
            }
        ));
    }
}
