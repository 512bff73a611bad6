//! Wire format of the Muse headset's GATT service. It defines the
//! characteristic UUIDs, the control command encoding, and decoders that turn
//! raw notification payloads into [`EegReading`] and [`AccelerometerData`].
//!
//! # Enums
//!
//! - `Electrode`: The EEG channel a reading was sampled from.
//!
//! # Structs
//!
//! - `EegReading`: One batch of EEG samples.
//! - `XyzSample`: One accelerometer sample in g.
//! - `AccelerometerData`: Accelerometer samples from one notification.
//!
//! # Example
//!
//! ```rust
//! use musecsv::comm::{Electrode, parse_eeg_packet};
//!
//! let mut packet = [0u8; 20];
//! packet[1] = 7;
//! let reading = parse_eeg_packet(Electrode::Tp9, &packet).unwrap();
//! assert_eq!(reading.index, 7);
//! assert_eq!(reading.samples.len(), 12);
//! ```

use bluer::Uuid;

/// Primary service advertised by every Muse headset.
pub const MUSE_SERVICE: Uuid = Uuid::from_u128(0x0000fe8d_0000_1000_8000_00805f9b34fb);
/// Commands are written to, and responses notified on, this characteristic.
pub const CONTROL_CHARACTERISTIC: Uuid = Uuid::from_u128(0x273e0001_4c4d_454d_96be_f03bac821358);
pub const ACCELEROMETER_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0x273e000a_4c4d_454d_96be_f03bac821358);

/// Sampling rate of every EEG channel (Hz).
pub const EEG_FREQUENCY: u32 = 256;
pub const EEG_SAMPLES_PER_READING: usize = 12;
/// Sequence index followed by twelve packed 12-bit samples.
pub const EEG_PACKET_LEN: usize = 2 + EEG_SAMPLES_PER_READING * 3 / 2;
/// Sequence index followed by three (x, y, z) triples of i16.
pub const ACCELEROMETER_PACKET_LEN: usize = 2 + 3 * 6;

/// Microvolts per 12-bit ADC step.
const EEG_SCALE: f64 = 0.48828125;
/// ADC value of 0 uV.
const EEG_OFFSET: f64 = 2048.0;
/// g per i16 step.
const ACCELEROMETER_SCALE: f64 = 0.0000610352;

/// Pauses the data stream.
pub const CMD_HALT: &str = "h";
/// Four EEG channels, no AUX.
pub const CMD_PRESET_EEG: &str = "p21";
/// Four EEG channels plus the AUX electrode.
pub const CMD_PRESET_EEG_AUX: &str = "p20";
pub const CMD_START: &str = "s";
pub const CMD_RESUME: &str = "d";

/// EEG electrodes in the order the headset exposes their characteristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Electrode {
    Tp9 = 0,
    Af7 = 1,
    Af8 = 2,
    Tp10 = 3,
    /// Right AUX; only populated with the `p20` preset
    Aux = 4,
}

impl Electrode {
    pub const ALL: [Electrode; 5] = [
        Electrode::Tp9,
        Electrode::Af7,
        Electrode::Af8,
        Electrode::Tp10,
        Electrode::Aux,
    ];

    /// GATT characteristic notifying this electrode's samples
    /// (`273e0003` for TP9 through `273e0007` for AUX).
    pub fn characteristic(self) -> Uuid {
        Uuid::from_u128(0x273e0003_4c4d_454d_96be_f03bac821358 + ((self as u128) << 96))
    }

    pub fn name(self) -> &'static str {
        match self {
            Electrode::Tp9 => "TP9",
            Electrode::Af7 => "AF7",
            Electrode::Af8 => "AF8",
            Electrode::Tp10 => "TP10",
            Electrode::Aux => "AUX",
        }
    }
}

/// One EEG event, in uV. Over GATT this is twelve consecutive samples of a
/// single electrode; over OSC it is one sample of every channel.
#[derive(Debug, Clone, PartialEq)]
pub struct EegReading {
    /// Sequence number assigned by the source (wraps at 65535)
    pub index: u16,
    /// `None` when the reading spans all channels
    pub electrode: Option<Electrode>,
    pub samples: Vec<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct XyzSample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// One accelerometer notification.
#[derive(Debug, Clone, PartialEq)]
pub struct AccelerometerData {
    pub index: u16,
    pub samples: Vec<XyzSample>,
}

/// Encodes a control command the way the headset expects it: a length byte
/// counting the command and its trailing newline, the ASCII command, `\n`.
pub fn encode_command(cmd: &str) -> Vec<u8> {
    let mut encoded = Vec::with_capacity(cmd.len() + 2);
    encoded.push((cmd.len() + 1) as u8);
    encoded.extend_from_slice(cmd.as_bytes());
    encoded.push(b'\n');
    encoded
}

/// Unpacks 12-bit samples (two per three bytes) and scales them to uV.
/// A trailing partial group is ignored.
pub fn decode_eeg_samples(payload: &[u8]) -> Vec<f64> {
    payload
        .chunks_exact(3)
        .flat_map(|c| {
            let first = ((c[0] as u16) << 4) | (c[1] as u16 >> 4);
            let second = (((c[1] & 0x0f) as u16) << 8) | c[2] as u16;
            [first, second]
        })
        .map(|raw| EEG_SCALE * (raw as f64 - EEG_OFFSET))
        .collect()
}

/// Parses an EEG notification. Returns `None` if the payload is truncated.
pub fn parse_eeg_packet(electrode: Electrode, data: &[u8]) -> Option<EegReading> {
    if data.len() < EEG_PACKET_LEN {
        return None;
    }
    Some(EegReading {
        index: u16::from_be_bytes([data[0], data[1]]),
        electrode: Some(electrode),
        samples: decode_eeg_samples(&data[2..EEG_PACKET_LEN]),
    })
}

/// Parses an accelerometer notification. Returns `None` if the payload is
/// truncated.
pub fn parse_accelerometer_packet(data: &[u8]) -> Option<AccelerometerData> {
    if data.len() < ACCELEROMETER_PACKET_LEN {
        return None;
    }
    let axis = |offset: usize| {
        ACCELEROMETER_SCALE * i16::from_be_bytes([data[offset], data[offset + 1]]) as f64
    };
    let samples = (0..3)
        .map(|i| 2 + i * 6)
        .map(|base| XyzSample {
            x: axis(base),
            y: axis(base + 2),
            z: axis(base + 4),
        })
        .collect();
    Some(AccelerometerData {
        index: u16::from_be_bytes([data[0], data[1]]),
        samples,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_is_length_prefixed_and_newline_terminated() {
        assert_eq!(encode_command(CMD_RESUME), vec![2, b'd', b'\n']);
        assert_eq!(encode_command(CMD_PRESET_EEG), vec![4, b'p', b'2', b'1', b'\n']);
    }

    #[test]
    fn electrode_characteristics_are_consecutive() {
        let uuids: Vec<String> = Electrode::ALL
            .iter()
            .map(|e| e.characteristic().to_string())
            .collect();
        assert_eq!(uuids[0], "273e0003-4c4d-454d-96be-f03bac821358");
        assert_eq!(uuids[3], "273e0006-4c4d-454d-96be-f03bac821358");
        assert_eq!(uuids[4], "273e0007-4c4d-454d-96be-f03bac821358");
    }

    #[test]
    fn twelve_bit_samples_are_centered_and_scaled() {
        // 0x800 | 0x800, 0x000 | 0xfff
        let samples = decode_eeg_samples(&[0x80, 0x08, 0x00, 0x00, 0x0f, 0xff]);
        assert_eq!(samples, vec![0.0, 0.0, -1000.0, 999.51171875]);
    }

    #[test]
    fn eeg_packet_carries_big_endian_index() {
        let mut data = [0x80u8; EEG_PACKET_LEN];
        data[0] = 0x01;
        data[1] = 0x02;
        let reading = parse_eeg_packet(Electrode::Af8, &data).unwrap();
        assert_eq!(reading.index, 0x0102);
        assert_eq!(reading.electrode, Some(Electrode::Af8));
        assert_eq!(reading.samples.len(), EEG_SAMPLES_PER_READING);
    }

    #[test]
    fn truncated_packets_are_rejected() {
        assert!(parse_eeg_packet(Electrode::Tp9, &[0u8; EEG_PACKET_LEN - 1]).is_none());
        assert!(parse_accelerometer_packet(&[0u8; ACCELEROMETER_PACKET_LEN - 1]).is_none());
    }

    #[test]
    fn accelerometer_axes_are_signed() {
        let mut data = [0u8; ACCELEROMETER_PACKET_LEN];
        data[1] = 9;
        // first sample: x = 16384, y = -16384, z = 0
        data[2..4].copy_from_slice(&16384i16.to_be_bytes());
        data[4..6].copy_from_slice(&(-16384i16).to_be_bytes());
        let acc = parse_accelerometer_packet(&data).unwrap();
        assert_eq!(acc.index, 9);
        assert!((acc.samples[0].x - 1.0).abs() < 1e-3);
        assert!((acc.samples[0].y + 1.0).abs() < 1e-3);
        assert_eq!(acc.samples[0].z, 0.0);
        assert_eq!(acc.samples[2], XyzSample::default());
    }
}
