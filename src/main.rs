use log::{error, info, warn, LevelFilter};
use nvos_busio::board;
use nvos_busio::bus::i2c::I2CBusController;
use nvos_busio::bus::spi::SPIChannelController;
use nvos_busio::bus::uart::SerialPortController;
use nvos_busio::bus::BusController;
use nvos_busio::config::{ConfigSectionI2C, ConfigSectionSPI, ConfigSectionSerial, Configuration};
use simple_logger::SimpleLogger;
use std::error::Error;
use std::fs::File;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const DEFAULT_CONFIG_PATH: &str = "/etc/nvos/busio.json";
const PROBE_REGISTER: u8 = 0x00;
const PROBE_PATTERN: [u8; 4] = [0xDE, 0xAD, 0xBE, 0xEF];

fn load_config() -> Result<Configuration, Box<dyn Error>> {
    let path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    info!("Loading configuration from {}", path);
    let file = File::open(&path)?;
    Ok(Configuration::from_reader(file)?)
}

fn probe_i2c(section: &ConfigSectionI2C) -> Result<(), Box<dyn Error>> {
    let path = match &section.device_path {
        Some(path) => path.clone(),
        None => match board::detect() {
            Ok(revision) => {
                info!("Detected board {}", revision);
                revision.i2c_bus_path().to_string()
            }
            Err(err) => {
                // Picking an adapter blindly could drive the wrong bus.
                error!("Unable to identify this board: {}", err);
                error!("Set i2c.device_path explicitly if this is a supported board");
                process::exit(1);
            }
        },
    };

    let mut bus = I2CBusController::open(&path, section.address)?;
    let value = bus.read_register8(PROBE_REGISTER)?;
    info!(
        "{} device 0x{:02X} on {}: register 0x{:02X} = 0x{:02X}",
        bus.name(),
        bus.address(),
        bus.device_path().display(),
        PROBE_REGISTER,
        value
    );
    bus.close()?;
    Ok(())
}

fn probe_spi(section: &ConfigSectionSPI) -> Result<(), Box<dyn Error>> {
    let mut spi: SPIChannelController = SPIChannelController::with_config(section.channels);
    for channel in section.enabled_channels() {
        spi.open_channel(channel)?;
        let mut buffer = PROBE_PATTERN;
        let len = buffer.len();
        let code = spi.transfer(channel, &mut buffer, len)?;
        info!(
            "SPI channel {} exchanged {} bytes: {:02X?} -> {:02X?}",
            channel.index(),
            code,
            PROBE_PATTERN,
            buffer
        );
        spi.close_channel(channel)?;
    }

    Ok(())
}

fn monitor_serial(section: &ConfigSectionSerial, running: &AtomicBool) -> Result<(), Box<dyn Error>> {
    let mut port = SerialPortController::open(&section.device_path, section.baud_rate)?;
    port.flush()?;
    info!("Monitoring {} at {} baud, press Ctrl-C to stop", section.device_path, section.baud_rate);

    let mut buffer = [0u8; 256];
    while running.load(Ordering::SeqCst) {
        let count = port.read(&mut buffer)?;
        if count > 0 {
            info!("RX {:02X?}", &buffer[..count]);
        }
    }

    port.close()?;
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .env()
        .init()?;

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = running.clone();
    ctrlc::set_handler(move || handler_flag.store(false, Ordering::SeqCst))?;

    let config = load_config()?;

    if let Some(section) = &config.i2c {
        if let Err(err) = probe_i2c(section) {
            warn!("I2C probe failed: {}", err);
        }
    }

    if let Some(section) = &config.spi {
        if let Err(err) = probe_spi(section) {
            warn!("SPI probe failed: {}", err);
        }
    }

    if let Some(section) = &config.serial {
        monitor_serial(section, &running)?;
    }

    info!("Exiting.");
    Ok(())
}
