//! CRC-16/X-25 validation for AX.25 frames.
//!
//! Polynomial 0x1021 (reflected 0x8408), init 0xFFFF, final XOR 0xFFFF,
//! input and output bit-reversed. The frame check sequence trails the frame
//! low byte first.

use crate::types::{Result, SondeError};

const POLY_REFLECTED: u16 = 0x8408;
const INIT: u16 = 0xFFFF;
const XOR_OUT: u16 = 0xFFFF;

/// Length of the trailing frame check sequence.
pub const FCS_LEN: usize = 2;

// ---------------------------------------------------------------------------
// CRC lookup table (compile-time)
// ---------------------------------------------------------------------------

const fn build_crc_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u16;
        let mut bit = 0;
        while bit < 8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ POLY_REFLECTED;
            } else {
                crc >>= 1;
            }
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static CRC_TABLE: [u16; 256] = build_crc_table();

// ---------------------------------------------------------------------------
// Core CRC functions
// ---------------------------------------------------------------------------

/// CRC-16/X-25 over all bytes.
pub fn crc16_x25(data: &[u8]) -> u16 {
    let mut crc = INIT;
    for &byte in data {
        crc = (crc >> 8) ^ CRC_TABLE[((crc ^ byte as u16) & 0xFF) as usize];
    }
    crc ^ XOR_OUT
}

/// Append the frame check sequence (low byte first).
pub fn append_fcs(frame: &mut Vec<u8>) {
    let crc = crc16_x25(frame);
    frame.extend_from_slice(&crc.to_le_bytes());
}

/// Check the trailing FCS of a frame and return the frame without it.
pub fn verify_frame(data: &[u8]) -> Result<&[u8]> {
    if data.len() <= FCS_LEN {
        return Err(SondeError::FrameTooShort {
            expected: FCS_LEN + 1,
            actual: data.len(),
        });
    }
    let payload_len = data.len() - FCS_LEN;
    let payload = &data[..payload_len];
    let trailer = u16::from_le_bytes([data[payload_len], data[payload_len + 1]]);
    if crc16_x25(payload) == trailer {
        Ok(payload)
    } else {
        Err(SondeError::CrcFailed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
