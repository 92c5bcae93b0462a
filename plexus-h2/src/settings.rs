//! HTTP/2 SETTINGS parameters (RFC 7540 Section 6.5.1).

use crate::error::H2Error;

// Settings identifiers.
pub const SETTINGS_HEADER_TABLE_SIZE: u16 = 0x1;
pub const SETTINGS_ENABLE_PUSH: u16 = 0x2;
pub const SETTINGS_MAX_CONCURRENT_STREAMS: u16 = 0x3;
pub const SETTINGS_INITIAL_WINDOW_SIZE: u16 = 0x4;
pub const SETTINGS_MAX_FRAME_SIZE: u16 = 0x5;
pub const SETTINGS_MAX_HEADER_LIST_SIZE: u16 = 0x6;

/// Bytes per parameter on the wire: 16-bit id, 32-bit value.
pub const PARAM_LEN: usize = 6;

/// Largest legal flow-control window (RFC 7540 Section 6.9.1).
pub const MAX_WINDOW_SIZE: u32 = 0x7fff_ffff;

/// Legal range for SETTINGS_MAX_FRAME_SIZE.
pub const MIN_MAX_FRAME_SIZE: u32 = 1 << 14;
pub const MAX_MAX_FRAME_SIZE: u32 = (1 << 24) - 1;

/// Concurrency cap a client advertises unless configured otherwise.
pub const DEFAULT_CLIENT_MAX_CONCURRENT_STREAMS: u32 = 100;

/// One endpoint's view of the SETTINGS parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// SETTINGS_HEADER_TABLE_SIZE (0x1). Default 4096.
    pub header_table_size: u32,
    /// SETTINGS_ENABLE_PUSH (0x2). Default enabled.
    pub enable_push: bool,
    /// SETTINGS_MAX_CONCURRENT_STREAMS (0x3). Default unlimited.
    pub max_concurrent_streams: Option<u32>,
    /// SETTINGS_INITIAL_WINDOW_SIZE (0x4). Default 65535.
    pub initial_window_size: u32,
    /// SETTINGS_MAX_FRAME_SIZE (0x5). Default 16384.
    pub max_frame_size: u32,
    /// SETTINGS_MAX_HEADER_LIST_SIZE (0x6). Default unlimited.
    pub max_header_list_size: Option<u32>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            header_table_size: 4096,
            enable_push: true,
            max_concurrent_streams: None,
            initial_window_size: 65_535,
            max_frame_size: MIN_MAX_FRAME_SIZE,
            max_header_list_size: None,
        }
    }
}

impl Settings {
    /// What a client advertises: push disabled and a concurrency cap.
    pub fn client_default() -> Self {
        Self {
            enable_push: false,
            max_concurrent_streams: Some(DEFAULT_CLIENT_MAX_CONCURRENT_STREAMS),
            ..Default::default()
        }
    }

    /// Apply one received parameter.
    ///
    /// Unknown identifiers are ignored (RFC 7540 Section 6.5.2). Side effects
    /// of a change, such as shifting stream windows, are left to the caller.
    pub fn apply(&mut self, id: u16, value: u32) -> Result<(), H2Error> {
        match id {
            SETTINGS_HEADER_TABLE_SIZE => self.header_table_size = value,
            SETTINGS_ENABLE_PUSH => {
                if value > 1 {
                    return Err(H2Error::ProtocolError(format!(
                        "ENABLE_PUSH must be 0 or 1, got {value}"
                    )));
                }
                self.enable_push = value == 1;
            }
            SETTINGS_MAX_CONCURRENT_STREAMS => self.max_concurrent_streams = Some(value),
            SETTINGS_INITIAL_WINDOW_SIZE => {
                if value > MAX_WINDOW_SIZE {
                    return Err(H2Error::FlowControlError);
                }
                self.initial_window_size = value;
            }
            SETTINGS_MAX_FRAME_SIZE => {
                if !(MIN_MAX_FRAME_SIZE..=MAX_MAX_FRAME_SIZE).contains(&value) {
                    return Err(H2Error::ProtocolError(format!(
                        "MAX_FRAME_SIZE {value} out of range"
                    )));
                }
                self.max_frame_size = value;
            }
            SETTINGS_MAX_HEADER_LIST_SIZE => self.max_header_list_size = Some(value),
            _ => {}
        }
        Ok(())
    }

    /// Parameters to advertise. Values equal to the protocol defaults are
    /// still listed so the peer never has to guess.
    pub fn to_params(&self) -> Vec<(u16, u32)> {
        let mut params = vec![
            (SETTINGS_HEADER_TABLE_SIZE, self.header_table_size),
            (SETTINGS_ENABLE_PUSH, u32::from(self.enable_push)),
        ];
        if let Some(v) = self.max_concurrent_streams {
            params.push((SETTINGS_MAX_CONCURRENT_STREAMS, v));
        }
        params.push((SETTINGS_INITIAL_WINDOW_SIZE, self.initial_window_size));
        params.push((SETTINGS_MAX_FRAME_SIZE, self.max_frame_size));
        if let Some(v) = self.max_header_list_size {
            params.push((SETTINGS_MAX_HEADER_LIST_SIZE, v));
        }
        params
    }
}

/// Append 6-byte `(id, value)` pairs.
pub fn encode_params(params: &[(u16, u32)], buf: &mut Vec<u8>) {
    for &(id, value) in params {
        buf.extend_from_slice(&id.to_be_bytes());
        buf.extend_from_slice(&value.to_be_bytes());
    }
}

/// Split a SETTINGS payload into `(id, value)` pairs without interpreting them.
pub fn decode_params(buf: &[u8]) -> Result<Vec<(u16, u32)>, H2Error> {
    if !buf.len().is_multiple_of(PARAM_LEN) {
        return Err(H2Error::FrameSizeError);
    }
    Ok(buf
        .chunks_exact(PARAM_LEN)
        .map(|p| {
            (
                u16::from_be_bytes([p[0], p[1]]),
                u32::from_be_bytes([p[2], p[3], p[4], p[5]]),
            )
        })
        .collect())
}
