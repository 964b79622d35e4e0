use crate::bus::spi::SpiChannel;
use crate::config::{ConfigError, Configuration};

const FULL_CONFIG: &str = r#"{
    "i2c": { "device_path": "/dev/i2c-1", "address": 72 },
    "serial": { "device_path": "/dev/ttyAMA0", "baud_rate": 115200 },
    "spi": { "channels": { "speeds_hz": [500000, null] } }
}"#;

#[test]
fn parse_full() {
    let config = Configuration::from_str(FULL_CONFIG).unwrap();

    let i2c = config.i2c.as_ref().unwrap();
    assert_eq!(i2c.device_path.as_deref(), Some("/dev/i2c-1"));
    assert_eq!(i2c.address, 0x48);

    let serial = config.serial.as_ref().unwrap();
    assert_eq!(serial.device_path, "/dev/ttyAMA0");
    assert_eq!(serial.baud_rate, 115200);

    let spi = config.spi.as_ref().unwrap();
    assert_eq!(spi.channels.speed(SpiChannel::Zero), Some(500_000));
    assert_eq!(spi.channels.speed(SpiChannel::One), None);
    assert_eq!(spi.enabled_channels(), vec![SpiChannel::Zero]);
}

#[test]
fn empty_config() {
    let config = Configuration::from_str("{}").unwrap();
    assert_eq!(config, Configuration::default());
}

#[test]
fn i2c_path_is_optional() {
    let config = Configuration::from_str(r#"{ "i2c": { "address": 16 } }"#).unwrap();
    assert_eq!(config.i2c.unwrap().device_path, None);
}

#[test]
fn round_trip() {
    let config = Configuration::from_str(FULL_CONFIG).unwrap();
    for pretty in [false, true] {
        let text = config.to_str(pretty).unwrap();
        assert_eq!(Configuration::from_str(&text).unwrap(), config);
    }

    let mut out = Vec::new();
    config.to_writer(&mut out, true).unwrap();
    assert_eq!(Configuration::from_reader(out.as_slice()).unwrap(), config);
}

#[test]
fn wide_address() {
    let result = Configuration::from_str(r#"{ "i2c": { "address": 128 } }"#);
    assert!(matches!(result, Err(ConfigError::InvalidEntry(_))));
}

#[test]
fn unsupported_baud() {
    let result = Configuration::from_str(r#"{ "serial": { "device_path": "/dev/ttyS0", "baud_rate": 14400 } }"#);
    assert!(matches!(result, Err(ConfigError::InvalidEntry(_))));
}

#[test]
fn empty_serial_path() {
    let result = Configuration::from_str(r#"{ "serial": { "device_path": " ", "baud_rate": 9600 } }"#);
    assert!(matches!(result, Err(ConfigError::InvalidEntry(_))));
}

#[test]
fn zero_spi_speed() {
    let result = Configuration::from_str(r#"{ "spi": { "channels": { "speeds_hz": [null, 0] } } }"#);
    assert_eq!(
        result,
        Err(ConfigError::InvalidEntry("SPI channel 1 speed cannot be 0".to_string()))
    );
}

#[test]
fn malformed_json() {
    let result = Configuration::from_str(r#"{ "i2c": "#);
    assert!(matches!(result, Err(ConfigError::SerializeError(_))));
}
