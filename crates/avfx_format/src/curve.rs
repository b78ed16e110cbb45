// SPDX-License-Identifier: MIT OR Apache-2.0
//! Curve keys stored in `Keys` chunks.

use crate::chunk::{ChunkReader, ChunkWriter, Result};
use serde::{Deserialize, Serialize};

/// Bytes per encoded key
pub const CURVE_KEY_SIZE: usize = 16;

/// Interpolation mode between a key and the next one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[derive(Default)]
pub enum KeyType {
    /// Linear interpolation
    #[default]
    Linear,
    /// Hold the value until the next key
    Step,
    /// Smooth spline
    Spline,
    /// Value not known to this editor, kept as-is
    Other(i16),
}

impl KeyType {
    /// Decode from the on-disk value
    pub fn from_raw(raw: i16) -> Self {
        match raw {
            0 => Self::Linear,
            1 => Self::Step,
            2 => Self::Spline,
            other => Self::Other(other),
        }
    }

    /// On-disk value
    pub fn raw(self) -> i16 {
        match self {
            Self::Linear => 0,
            Self::Step => 1,
            Self::Spline => 2,
            Self::Other(raw) => raw,
        }
    }
}

/// A single curve key
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurveKey {
    /// Frame the key sits on
    pub time: i16,
    /// Interpolation to the next key
    pub key_type: KeyType,
    /// Key value
    pub value: [f32; 3],
}

impl CurveKey {
    /// Create a new key
    pub fn new(time: i16, key_type: KeyType, value: [f32; 3]) -> Self {
        Self {
            time,
            key_type,
            value,
        }
    }

    /// Decode one key
    pub fn read(reader: &mut ChunkReader<'_>) -> Result<Self> {
        let time = reader.read_i16()?;
        let key_type = KeyType::from_raw(reader.read_i16()?);
        let value = [reader.read_f32()?, reader.read_f32()?, reader.read_f32()?];
        Ok(Self {
            time,
            key_type,
            value,
        })
    }

    /// Encode one key
    pub fn write(&self, writer: &mut ChunkWriter) -> Result<()> {
        writer.write_i16(self.time)?;
        writer.write_i16(self.key_type.raw())?;
        for v in self.value {
            writer.write_f32(v)?;
        }
        Ok(())
    }
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

fn smoothstep(t: f32) -> f32 {
    t * t * (3.0 - 2.0 * t)
}

/// Sample a key list at `time`. Keys are expected in time order; times
/// before the first or after the last key clamp.
pub fn sample(keys: &[CurveKey], time: f32) -> Option<[f32; 3]> {
    let first = keys.first()?;
    if time <= f32::from(first.time) {
        return Some(first.value);
    }

    for pair in keys.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        let (ta, tb) = (f32::from(a.time), f32::from(b.time));
        if time > tb {
            continue;
        }
        if tb <= ta {
            return Some(b.value);
        }

        let t = (time - ta) / (tb - ta);
        let t = match a.key_type {
            KeyType::Step => return Some(a.value),
            KeyType::Spline => smoothstep(t),
            KeyType::Linear | KeyType::Other(_) => t,
        };
        return Some([
            lerp(a.value[0], b.value[0], t),
            lerp(a.value[1], b.value[1], t),
            lerp(a.value[2], b.value[2], t),
        ]);
    }

    keys.last().map(|k| k.value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_encoding() {
        let key = CurveKey::new(30, KeyType::Spline, [1.0, 0.5, -2.0]);
        let mut writer = ChunkWriter::new();
        key.write(&mut writer).unwrap();
        let bytes = writer.into_inner();
        assert_eq!(bytes.len(), CURVE_KEY_SIZE);
        assert_eq!(&bytes[..2], &30i16.to_le_bytes());

        let mut reader = ChunkReader::new(&bytes);
        assert_eq!(CurveKey::read(&mut reader).unwrap(), key);
    }

    #[test]
    fn test_unknown_key_type_preserved() {
        assert_eq!(KeyType::from_raw(7), KeyType::Other(7));
        assert_eq!(KeyType::Other(7).raw(), 7);
    }

    #[test]
    fn test_sample() {
        let keys = [
            CurveKey::new(0, KeyType::Linear, [0.0, 0.0, 0.0]),
            CurveKey::new(10, KeyType::Step, [10.0, 20.0, 30.0]),
            CurveKey::new(20, KeyType::Linear, [0.0, 0.0, 0.0]),
        ];
        assert_eq!(sample(&keys, -5.0), Some([0.0, 0.0, 0.0]));
        assert_eq!(sample(&keys, 5.0), Some([5.0, 10.0, 15.0]));
        assert_eq!(sample(&keys, 15.0), Some([10.0, 20.0, 30.0]));
        assert_eq!(sample(&keys, 50.0), Some([0.0, 0.0, 0.0]));
        assert_eq!(sample(&[], 1.0), None);
    }
}
