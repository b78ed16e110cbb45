// SPDX-License-Identifier: MIT OR Apache-2.0
//! Typed leaf and composite values.
//!
//! Decoding is strict: a payload that does not match the expected encoding
//! exactly (wrong width, non-zero padding, unknown flag byte) is kept as
//! [`Field::Raw`] so that writing it back reproduces the input.

use crate::block::Block;
use crate::chunk::{ChunkReader, ChunkWriter, Result};
use crate::curve::{CurveKey, CURVE_KEY_SIZE};
use crate::schema::{NodeKind, Spec, LIFE};
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

/// Index value written by a selector with no target
pub const NO_TARGET: i32 = -1;

/// Integer field with its on-disk width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntField {
    /// Value
    pub value: i32,
    /// Width in bytes (1, 2 or 4)
    pub width: u8,
}

impl IntField {
    /// Four-byte integer
    pub fn new(value: i32) -> Self {
        Self { value, width: 4 }
    }

    fn decode(payload: &[u8]) -> Option<Self> {
        let value = match payload.len() {
            1 => i32::from(payload[0]),
            2 => i32::from(LittleEndian::read_i16(payload)),
            4 => LittleEndian::read_i32(payload),
            _ => return None,
        };
        Some(Self {
            value,
            width: payload.len() as u8,
        })
    }

    fn write(&self, writer: &mut ChunkWriter) -> Result<()> {
        match self.width {
            1 => writer.write_u8(self.value as u8),
            2 => writer.write_i16(self.value as i16),
            _ => writer.write_i32(self.value),
        }
    }
}

/// Flag stored as one byte followed by zero padding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoolField {
    /// `None` is written as `0xFF`
    pub value: Option<bool>,
    /// Payload size including padding
    pub size: usize,
}

impl BoolField {
    /// Four-byte flag
    pub fn new(value: Option<bool>) -> Self {
        Self { value, size: 4 }
    }

    fn decode(payload: &[u8]) -> Option<Self> {
        let (first, pad) = payload.split_first()?;
        if pad.iter().any(|b| *b != 0) {
            return None;
        }
        let value = match first {
            0x00 => Some(false),
            0x01 => Some(true),
            0xFF => None,
            _ => return None,
        };
        Some(Self {
            value,
            size: payload.len(),
        })
    }

    fn write(&self, writer: &mut ChunkWriter) -> Result<()> {
        let byte = match self.value {
            Some(false) => 0x00,
            Some(true) => 0x01,
            None => 0xFF,
        };
        writer.write_u8(byte)?;
        writer.write_zeros(self.size.saturating_sub(1))
    }
}

/// NUL-terminated string, zero padded to its payload size
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextField {
    /// Text without terminator
    pub value: String,
    /// Payload size including terminator and padding
    pub size: usize,
}

impl TextField {
    /// Text sized to exactly fit its terminator
    pub fn new(value: impl Into<String>) -> Self {
        let value = value.into();
        let size = value.len() + 1;
        Self { value, size }
    }

    fn decode(payload: &[u8]) -> Option<Self> {
        let nul = payload.iter().position(|b| *b == 0)?;
        if payload[nul..].iter().any(|b| *b != 0) {
            return None;
        }
        let value = std::str::from_utf8(&payload[..nul]).ok()?.to_string();
        Some(Self {
            value,
            size: payload.len(),
        })
    }

    fn write(&self, writer: &mut ChunkWriter) -> Result<()> {
        writer.write_bytes(self.value.as_bytes())?;
        let size = self.size.max(self.value.len() + 1);
        writer.write_zeros(size - self.value.len())
    }
}

/// Lifetime: either disabled (`-1`) or a block of values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifeField {
    /// Whether values are written
    pub enabled: bool,
    /// `Val`, `ValR`, `Type`
    pub values: Block,
}

/// Reference to another node by its index in the target group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectField {
    /// Kind of node referenced
    pub kind: NodeKind,
    /// Index written to the file
    pub index: i32,
}

/// A typed chunk payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Field {
    /// Integer
    Int(IntField),
    /// Float
    Float(f32),
    /// Flag with sentinel absent value
    Bool(BoolField),
    /// String
    Text(TextField),
    /// Curve keys
    Curve(Vec<CurveKey>),
    /// Lifetime
    Life(LifeField),
    /// Cross-reference
    Select(SelectField),
    /// Nested chunks
    Block(Block),
    /// Bytes not interpreted by the editor
    Raw(Vec<u8>),
}

impl Field {
    /// Decode `payload` according to `spec`. Leaf payloads that do not fit
    /// fall back to raw bytes; nested payloads with broken framing are an
    /// error.
    pub fn decode(payload: &[u8], spec: Spec) -> Result<Self> {
        let raw = || Field::Raw(payload.to_vec());
        let field = match spec {
            Spec::Int => IntField::decode(payload).map_or_else(raw, Field::Int),
            Spec::Float => match payload.len() {
                4 => Field::Float(LittleEndian::read_f32(payload)),
                _ => raw(),
            },
            Spec::Bool => BoolField::decode(payload).map_or_else(raw, Field::Bool),
            Spec::Text => TextField::decode(payload).map_or_else(raw, Field::Text),
            Spec::Curve if payload.len() % CURVE_KEY_SIZE == 0 => {
                let mut reader = ChunkReader::new(payload);
                let mut keys = Vec::with_capacity(payload.len() / CURVE_KEY_SIZE);
                while reader.remaining() > 0 {
                    keys.push(CurveKey::read(&mut reader)?);
                }
                Field::Curve(keys)
            }
            Spec::Curve => raw(),
            Spec::Life => match payload.len() {
                4 if LittleEndian::read_i32(payload) == -1 => Field::Life(LifeField {
                    enabled: false,
                    values: Block::new(),
                }),
                0..=4 => raw(),
                _ => Field::Life(LifeField {
                    enabled: true,
                    values: Block::decode(payload, &LIFE)?,
                }),
            },
            Spec::Select(kind) => match payload.len() {
                4 => Field::Select(SelectField {
                    kind,
                    index: LittleEndian::read_i32(payload),
                }),
                _ => raw(),
            },
            Spec::Block(layout) => Field::Block(Block::decode(payload, layout)?),
            Spec::Raw => raw(),
        };
        Ok(field)
    }

    /// Default value for a newly added field of `spec`
    pub fn empty(spec: Spec) -> Self {
        match spec {
            Spec::Int => Field::Int(IntField::new(0)),
            Spec::Float => Field::Float(0.0),
            Spec::Bool => Field::Bool(BoolField::new(Some(false))),
            Spec::Text => Field::Text(TextField::new("")),
            Spec::Curve => Field::Curve(Vec::new()),
            Spec::Life => Field::Life(LifeField {
                enabled: false,
                values: Block::new(),
            }),
            Spec::Select(kind) => Field::Select(SelectField {
                kind,
                index: NO_TARGET,
            }),
            Spec::Block(_) => Field::Block(Block::new()),
            Spec::Raw => Field::Raw(Vec::new()),
        }
    }

    /// Encode the payload
    pub fn write(&self, writer: &mut ChunkWriter) -> Result<()> {
        match self {
            Field::Int(v) => v.write(writer),
            Field::Float(v) => writer.write_f32(*v),
            Field::Bool(v) => v.write(writer),
            Field::Text(v) => v.write(writer),
            Field::Curve(keys) => {
                for key in keys {
                    key.write(writer)?;
                }
                Ok(())
            }
            Field::Life(life) if !life.enabled => writer.write_i32(-1),
            Field::Life(life) => life.values.write(writer),
            Field::Select(select) => writer.write_i32(select.index),
            Field::Block(block) => block.write(writer),
            Field::Raw(bytes) => writer.write_bytes(bytes),
        }
    }

    /// Nested block, for `Block` and `Life` fields
    pub fn as_block(&self) -> Option<&Block> {
        match self {
            Field::Block(block) => Some(block),
            Field::Life(life) => Some(&life.values),
            _ => None,
        }
    }

    /// Mutable nested block, for `Block` and `Life` fields
    pub fn as_block_mut(&mut self) -> Option<&mut Block> {
        match self {
            Field::Block(block) => Some(block),
            Field::Life(life) => Some(&mut life.values),
            _ => None,
        }
    }

    /// Integer value
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Field::Int(v) => Some(v.value),
            _ => None,
        }
    }

    /// Float value
    pub fn as_float(&self) -> Option<f32> {
        match self {
            Field::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Flag value (`Some(None)` is the absent sentinel)
    pub fn as_bool(&self) -> Option<Option<bool>> {
        match self {
            Field::Bool(v) => Some(v.value),
            _ => None,
        }
    }

    /// Text value
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Field::Text(v) => Some(&v.value),
            _ => None,
        }
    }

    /// Selector value
    pub fn as_select(&self) -> Option<SelectField> {
        match self {
            Field::Select(v) => Some(*v),
            _ => None,
        }
    }

    /// Whether this field or anything nested in it is a selector
    pub fn contains_select(&self) -> bool {
        match self {
            Field::Select(_) => true,
            Field::Block(block) => block.entries().iter().any(|e| e.field.contains_select()),
            _ => false,
        }
    }

    /// Short type name for diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Field::Int(_) => "int",
            Field::Float(_) => "float",
            Field::Bool(_) => "bool",
            Field::Text(_) => "text",
            Field::Curve(_) => "curve",
            Field::Life(_) => "life",
            Field::Select(_) => "select",
            Field::Block(_) => "block",
            Field::Raw(_) => "raw",
        }
    }
}
