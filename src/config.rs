use crate::bus::i2c::MAX_ADDRESS;
use crate::bus::spi::{SpiChannel, SpiChannelConfig};
use crate::bus::uart::BaudRate;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("serialize/parse error: {0}")]
    SerializeError(String),
    #[error("invalid config entry: {0}")]
    InvalidEntry(String),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ConfigSectionI2C {
    /// Adapter node; detected from the board revision when absent.
    #[serde(default)]
    pub device_path: Option<String>,
    pub address: u8,
}

impl ConfigSectionI2C {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.address > MAX_ADDRESS {
            return Err(ConfigError::InvalidEntry(format!(
                "invalid I2C address 0x{:02X}: only 7-bit addresses (0x00-0x7F) are supported",
                self.address
            )));
        }

        if let Some(path) = &self.device_path {
            if path.trim().is_empty() {
                return Err(ConfigError::InvalidEntry("I2C device path cannot be empty".to_string()));
            }
        }

        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ConfigSectionSerial {
    pub device_path: String,
    pub baud_rate: u32,
}

impl ConfigSectionSerial {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device_path.trim().is_empty() {
            return Err(ConfigError::InvalidEntry("serial device path cannot be empty".to_string()));
        }

        if BaudRate::from_bps(self.baud_rate).is_none() {
            return Err(ConfigError::InvalidEntry(format!(
                "unsupported baud rate {}: must be one of 50-230400 in the standard series",
                self.baud_rate
            )));
        }

        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ConfigSectionSPI {
    pub channels: SpiChannelConfig,
}

impl ConfigSectionSPI {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for channel in [SpiChannel::Zero, SpiChannel::One] {
            if self.channels.speed(channel) == Some(0) {
                return Err(ConfigError::InvalidEntry(format!(
                    "SPI channel {} speed cannot be 0",
                    channel.index()
                )));
            }
        }

        Ok(())
    }

    /// Channels with a configured speed.
    pub fn enabled_channels(&self) -> Vec<SpiChannel> {
        [SpiChannel::Zero, SpiChannel::One]
            .into_iter()
            .filter(|channel| self.channels.speed(*channel).is_some())
            .collect()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Configuration {
    #[serde(default)]
    pub i2c: Option<ConfigSectionI2C>,
    #[serde(default)]
    pub serial: Option<ConfigSectionSerial>,
    #[serde(default)]
    pub spi: Option<ConfigSectionSPI>,
}

impl Configuration {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(i2c) = &self.i2c {
            i2c.validate()?;
        }

        if let Some(serial) = &self.serial {
            serial.validate()?;
        }

        if let Some(spi) = &self.spi {
            spi.validate()?;
        }

        Ok(())
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Configuration, ConfigError> {
        let config: Configuration = serde_json::from_reader(reader)
            .map_err(|e| ConfigError::SerializeError(format!("failed to parse bus configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_str(json_str: &str) -> Result<Configuration, ConfigError> {
        Self::from_reader(json_str.as_bytes())
    }

    pub fn to_writer<W: Write>(&self, writer: W, pretty: bool) -> Result<(), ConfigError> {
        let written = match pretty {
            true => serde_json::to_writer_pretty(writer, self),
            false => serde_json::to_writer(writer, self),
        };
        written.map_err(|e| ConfigError::SerializeError(format!("failed to write bus configuration: {}", e)))
    }

    pub fn to_str(&self, pretty: bool) -> Result<String, ConfigError> {
        let mut out = Vec::new();
        self.to_writer(&mut out, pretty)?;
        String::from_utf8(out).map_err(|e| ConfigError::SerializeError(e.to_string()))
    }
}
