//! Board identification from the kernel's CPU information text.
//!
//! Which I2C adapter carries the header pins depends on the board revision:
//! the earliest boards route them to `i2c-0`, every later one to `i2c-1`.
//! Guessing wrong would drive a different bus, so an unrecognized board is a
//! fatal error for the caller rather than something to fall back from.

use std::collections::HashMap;
use std::fs;
use std::io;
use strum::Display;
use thiserror::Error;

pub const CPUINFO_PATH: &str = "/proc/cpuinfo";

const KNOWN_HARDWARE: [&str; 6] = ["BCM2708", "BCM2709", "BCM2835", "BCM2836", "BCM2837", "BCM2711"];
const MODEL_PREFIX: &str = "Raspberry Pi";
const REV1_CODES: [&str; 2] = ["0002", "0003"];

#[derive(Error, Debug)]
pub enum BoardError {
    #[error("failed to read board information: {0}")]
    Io(#[from] io::Error),

    #[error("unrecognized hardware \"{0}\"")]
    UnknownHardware(String),

    #[error("board information has no revision entry")]
    MissingRevision,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum BoardRevision {
    #[strum(serialize = "revision 1")]
    Rev1,
    #[strum(serialize = "revision 2")]
    Rev2,
}

impl BoardRevision {
    pub fn code(self) -> u8 {
        match self {
            BoardRevision::Rev1 => 1,
            BoardRevision::Rev2 => 2,
        }
    }

    /// The I2C adapter node wired to the header on this revision.
    pub fn i2c_bus_path(self) -> &'static str {
        match self {
            BoardRevision::Rev1 => "/dev/i2c-0",
            BoardRevision::Rev2 => "/dev/i2c-1",
        }
    }
}

/// Splits `key: value` lines. Lines without a colon are skipped and both
/// sides are trimmed; a later duplicate key replaces an earlier one.
pub fn parse_key_values(text: &str) -> HashMap<String, String> {
    text.lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .collect()
}

pub fn board_revision(cpuinfo: &str) -> Result<BoardRevision, BoardError> {
    let entries = parse_key_values(cpuinfo);

    let hardware = entries.get("Hardware").map(String::as_str).unwrap_or("");
    let model = entries.get("Model").map(String::as_str).unwrap_or("");
    if !KNOWN_HARDWARE.contains(&hardware) && !model.starts_with(MODEL_PREFIX) {
        let seen = if hardware.is_empty() { model } else { hardware };
        return Err(BoardError::UnknownHardware(seen.to_string()));
    }

    let revision = match entries.get("Revision") {
        Some(r) if !r.is_empty() => r,
        _ => return Err(BoardError::MissingRevision),
    };

    if REV1_CODES.iter().any(|code| revision.ends_with(code)) {
        Ok(BoardRevision::Rev1)
    } else {
        Ok(BoardRevision::Rev2)
    }
}

/// Reads the running system's CPU information and identifies the board.
pub fn detect() -> Result<BoardRevision, BoardError> {
    let cpuinfo = fs::read_to_string(CPUINFO_PATH)?;
    board_revision(&cpuinfo)
}
