//! AM2320 climate sensor framing over I2C.

use thiserror::Error;

pub const I2C_ADDRESS: u8 = 0x5C;
/// Read 4 registers starting at humidity high byte.
pub const READ_REQUEST: [u8; 3] = [0x03, 0x00, 0x04];
pub const RESPONSE_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Am2320Error {
    #[error("unexpected function header {function:#04x}/{len}")]
    Header { function: u8, len: u8 },
    #[error("crc mismatch: frame {frame:#06x}, computed {computed:#06x}")]
    Crc { frame: u16, computed: u16 },
}

/// Modbus CRC16 as used by the sensor.
pub fn crc16(bytes: &[u8]) -> u16 {
    let mut crc = 0xFFFF_u16;
    for byte in bytes {
        crc ^= u16::from(*byte);
        for _ in 0..8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0xA001
            } else {
                crc >> 1
            };
        }
    }
    crc
}

/// Decodes a read response into `(temperature °C, relative humidity %)`.
pub fn decode(frame: &[u8; RESPONSE_LEN]) -> Result<(f32, f32), Am2320Error> {
    if frame[0] != READ_REQUEST[0] || frame[1] != READ_REQUEST[2] {
        return Err(Am2320Error::Header {
            function: frame[0],
            len: frame[1],
        });
    }

    let expected = u16::from_le_bytes([frame[6], frame[7]]);
    let computed = crc16(&frame[..6]);
    if expected != computed {
        return Err(Am2320Error::Crc {
            frame: expected,
            computed,
        });
    }

    let humidity = u16::from_be_bytes([frame[2], frame[3]]);
    let raw_temperature = u16::from_be_bytes([frame[4], frame[5]]);
    // Sign-magnitude, not two's complement.
    let magnitude = f32::from(raw_temperature & 0x7FFF) / 10.0;
    let temperature = if raw_temperature & 0x8000 != 0 {
        -magnitude
    } else {
        magnitude
    };

    Ok((temperature, f32::from(humidity) / 10.0))
}
