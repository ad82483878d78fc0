//! candump log replay
//!
//! Parses the line format written by `candump -l`:
//!
//! ```text
//! (1436509052.249713) can0 123#DEADBEEF
//! (1436509052.250101) can0 18FEF100#0102030405060708
//! ```
//!
//! The timestamp and interface columns are optional. Identifiers written
//! with eight hex digits, or above 0x7FF, are extended. `#R` remote frames are read as empty frames.
//! CAN-FD (`##`) lines are rejected.

use crate::types::{Frame, FrameError, MAX_STANDARD_ID};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// One frame read from a candump log
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayFrame {
    /// Seconds since epoch as written by candump, if present
    pub timestamp: Option<f64>,
    /// Interface column, if present
    pub interface: Option<String>,
    pub id: u32,
    /// 29-bit identifier, from the eight-digit form or the id value
    pub is_extended: bool,
    pub data: Vec<u8>,
}

impl ReplayFrame {
    /// Build the frame to put on the bus, stamped with the current instant
    pub fn to_frame(&self) -> Result<Frame, FrameError> {
        let frame = Frame::new(self.id, &self.data)?;
        Ok(if self.is_extended { frame.into_extended() } else { frame })
    }
}

/// Errors raised while reading a candump log
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("Line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("Line {line}: {source}")]
    InvalidFrame {
        line: usize,
        #[source]
        source: FrameError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Load a candump log file
pub fn load_candump(path: &Path) -> Result<Vec<ReplayFrame>, ReplayError> {
    log::info!("Loading candump log: {:?}", path);
    let file = File::open(path)?;
    let frames = parse_candump(BufReader::new(file))?;
    log::info!("Loaded {} frames from {:?}", frames.len(), path);
    Ok(frames)
}

/// Parse candump lines from any reader
///
/// Blank lines and lines starting with `#` are skipped.
pub fn parse_candump<R: BufRead>(reader: R) -> Result<Vec<ReplayFrame>, ReplayError> {
    let mut frames = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line_no = index + 1;
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        frames.push(parse_line(trimmed, line_no)?);
    }

    Ok(frames)
}

fn parse_line(line: &str, line_no: usize) -> Result<ReplayFrame, ReplayError> {
    let malformed = |reason: &str| ReplayError::Malformed {
        line: line_no,
        reason: reason.to_string(),
    };

    let mut timestamp = None;
    let mut interface = None;
    let mut frame_field = None;

    for token in line.split_whitespace() {
        if let Some(inner) = token.strip_prefix('(').and_then(|t| t.strip_suffix(')')) {
            let secs = inner
                .parse::<f64>()
                .map_err(|_| malformed("invalid timestamp"))?;
            timestamp = Some(secs);
        } else if token.contains('#') {
            frame_field = Some(token);
        } else {
            interface = Some(token.to_string());
        }
    }

    let frame_field = frame_field.ok_or_else(|| malformed("missing <id>#<data> field"))?;
    let (id_text, data_text) = frame_field
        .split_once('#')
        .ok_or_else(|| malformed("missing '#' separator"))?;

    if data_text.starts_with('#') {
        return Err(malformed("CAN-FD frames are not supported"));
    }
    if id_text.is_empty() || id_text.len() > 8 {
        return Err(malformed("identifier must be 1 to 8 hex digits"));
    }
    let id = u32::from_str_radix(id_text, 16).map_err(|_| malformed("invalid identifier"))?;
    let is_extended = id_text.len() == 8 || id > MAX_STANDARD_ID;

    let data = if data_text.starts_with('R') || data_text.starts_with('r') {
        Vec::new()
    } else {
        parse_hex_bytes(data_text).ok_or_else(|| malformed("invalid data bytes"))?
    };

    // Reuse frame validation for the id range and payload length
    Frame::new(id, &data).map_err(|source| ReplayError::InvalidFrame {
        line: line_no,
        source,
    })?;

    Ok(ReplayFrame {
        timestamp,
        interface,
        id,
        is_extended,
        data,
    })
}

fn parse_hex_bytes(text: &str) -> Option<Vec<u8>> {
    let digits: Vec<char> = text.chars().filter(|c| *c != '.').collect();
    if digits.len() % 2 != 0 {
        return None;
    }

    digits
        .chunks(2)
        .map(|pair| {
            let hi = pair[0].to_digit(16)?;
            let lo = pair[1].to_digit(16)?;
            Some((hi * 16 + lo) as u8)
        })
        .collect()
}
