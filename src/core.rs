use std::fmt;
use std::ops::Range;

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Block {block}: expected {expected} payload bytes, got {actual}")]
    PayloadLength { block: &'static str, expected: usize, actual: usize },

    #[error("Block {block} has no field {field}")]
    MissingField { block: &'static str, field: String },

    #[error("Field {field} is not {expected}")]
    FieldType { field: String, expected: &'static str },

    #[error("Block {block} layout is invalid: {reason}")]
    InvalidLayout { block: &'static str, reason: String },
}

/// How the raw bytes of a field are interpreted.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FieldKind {
    Unsigned,
    Signed,
    /// Two ASCII characters per register, high byte first.
    Ascii,
    Bitmap,
    Enum,
}

/// Part of the register a field occupies. Split registers carry two
/// unrelated 8-bit values.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ByteLane {
    Word,
    High,
    Low,
}

/// Rational multiplier applied to a decoded integer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Scale {
    numerator: u32,
    denominator: u32,
}

impl Scale {
    pub const ONE: Scale = Scale::new(1, 1);
    pub const TENTH: Scale = Scale::new(1, 10);
    pub const HUNDREDTH: Scale = Scale::new(1, 100);
    pub const THOUSANDTH: Scale = Scale::new(1, 1000);

    pub const fn new(numerator: u32, denominator: u32) -> Self {
        Scale { numerator, denominator }
    }

    pub fn is_integer(&self) -> bool {
        self.denominator == 1
    }

    pub fn apply(&self, raw: i64) -> FieldValue {
        if self.is_integer() {
            FieldValue::Int(raw * self.numerator as i64)
        } else {
            FieldValue::Float(raw as f64 * self.numerator as f64 / self.denominator as f64)
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RegisterField {
    pub name: &'static str,
    /// Byte offset of the first register of the field inside the payload.
    pub offset: usize,
    /// Width in registers.
    pub width: u16,
    pub kind: FieldKind,
    pub lane: ByteLane,
    pub scale: Scale,
    pub unit: &'static str,
}

impl RegisterField {
    const fn new(name: &'static str, offset: usize, width: u16, kind: FieldKind) -> Self {
        RegisterField {
            name,
            offset,
            width,
            kind,
            lane: ByteLane::Word,
            scale: Scale::ONE,
            unit: "",
        }
    }

    pub const fn unsigned(name: &'static str, offset: usize) -> Self {
        Self::new(name, offset, 1, FieldKind::Unsigned)
    }

    pub const fn signed(name: &'static str, offset: usize) -> Self {
        Self::new(name, offset, 1, FieldKind::Signed)
    }

    pub const fn ascii(name: &'static str, offset: usize, width: u16) -> Self {
        Self::new(name, offset, width, FieldKind::Ascii)
    }

    pub const fn bitmap(name: &'static str, offset: usize) -> Self {
        Self::new(name, offset, 1, FieldKind::Bitmap)
    }

    pub const fn enumeration(name: &'static str, offset: usize) -> Self {
        Self::new(name, offset, 1, FieldKind::Enum)
    }

    /// Spans two registers (32-bit big-endian).
    pub const fn wide(self) -> Self {
        RegisterField { width: 2, ..self }
    }

    pub const fn high(self) -> Self {
        RegisterField { lane: ByteLane::High, ..self }
    }

    pub const fn low(self) -> Self {
        RegisterField { lane: ByteLane::Low, ..self }
    }

    pub const fn scaled(self, scale: Scale) -> Self {
        RegisterField { scale, ..self }
    }

    pub const fn with_unit(self, unit: &'static str) -> Self {
        RegisterField { unit, ..self }
    }

    /// Payload bytes this field reads.
    pub fn byte_range(&self) -> Range<usize> {
        match self.lane {
            ByteLane::High => self.offset..self.offset + 1,
            ByteLane::Low => self.offset + 1..self.offset + 2,
            ByteLane::Word => self.offset..self.offset + self.width as usize * 2,
        }
    }

    fn decode(&self, payload: &[u8]) -> FieldValue {
        let bytes = &payload[self.byte_range()];

        if self.kind == FieldKind::Ascii {
            let text: String = bytes.iter().filter(|b| b.is_ascii()).map(|&b| b as char).collect();
            return FieldValue::Text(text.trim_end_matches(['\0', ' ']).to_string());
        }

        let signed = self.kind == FieldKind::Signed;
        let raw = match (self.lane, self.width) {
            (ByteLane::High | ByteLane::Low, _) if signed => bytes[0] as i8 as i64,
            (ByteLane::High | ByteLane::Low, _) => bytes[0] as i64,
            (ByteLane::Word, 1) => {
                let word = u16::from_be_bytes([bytes[0], bytes[1]]);
                if signed { word as i16 as i64 } else { word as i64 }
            }
            (ByteLane::Word, _) => {
                let dword = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                if signed { dword as i32 as i64 } else { dword as i64 }
            }
        };

        match self.kind {
            FieldKind::Bitmap | FieldKind::Enum => FieldValue::Int(raw),
            _ => self.scale.apply(raw),
        }
    }
}

/// One read operation against the device and the fields it yields.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RegisterBlock {
    pub tag: &'static str,
    pub function_code: u8,
    pub start: u16,
    pub count: u16,
    pub fields: &'static [RegisterField],
}

impl RegisterBlock {
    pub fn payload_len(&self) -> usize {
        self.count as usize * 2
    }

    pub fn field(&self, name: &str) -> Option<&RegisterField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Checks field widths, bounds and that no two fields share a byte.
    pub fn validate(&self) -> Result<(), DecodeError> {
        let invalid = |reason: String| DecodeError::InvalidLayout { block: self.tag, reason };

        let mut used = vec![false; self.payload_len()];
        for field in self.fields {
            let width_ok = match (field.kind, field.lane) {
                (FieldKind::Ascii, ByteLane::Word) => field.width >= 1,
                (FieldKind::Ascii, _) => false,
                (_, ByteLane::Word) => field.width == 1 || field.width == 2,
                (_, _) => field.width == 1,
            };
            if !width_ok || field.offset % 2 != 0 {
                return Err(invalid(format!("field {} has an unsupported shape", field.name)));
            }

            let range = field.byte_range();
            if range.end > used.len() {
                return Err(invalid(format!("field {} ends past byte {}", field.name, used.len())));
            }
            for byte in range {
                if used[byte] {
                    return Err(invalid(format!("field {} overlaps byte {}", field.name, byte)));
                }
                used[byte] = true;
            }

            if self.fields.iter().filter(|f| f.name == field.name).count() > 1 {
                return Err(invalid(format!("field {} is defined twice", field.name)));
            }
        }
        Ok(())
    }

    /// Fails with [`DecodeError::InvalidLayout`] before touching the payload
    /// if the block itself is malformed.
    pub fn decode(&self, payload: &[u8]) -> Result<DecodedBlock, DecodeError> {
        self.validate()?;
        if payload.len() != self.payload_len() {
            return Err(DecodeError::PayloadLength {
                block: self.tag,
                expected: self.payload_len(),
                actual: payload.len(),
            });
        }

        let values = self.fields.iter().map(|f| (f.name, f.decode(payload))).collect();
        Ok(DecodedBlock { tag: self.tag, values })
    }
}

/// Decodes a response payload against `block`.
pub fn decode(block: &RegisterBlock, payload: &[u8]) -> Result<DecodedBlock, DecodeError> {
    block.decode(payload)
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Integers widen to floats.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(v) => Some(*v as f64),
            FieldValue::Float(v) => Some(*v),
            FieldValue::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Int(v) => write!(f, "{}", v),
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::Text(v) => write!(f, "{}", v),
        }
    }
}

/// Named values decoded from one block, in table order.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedBlock {
    tag: &'static str,
    values: Vec<(&'static str, FieldValue)>,
}

impl DecodedBlock {
    pub fn tag(&self) -> &'static str {
        self.tag
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.values.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &FieldValue)> {
        self.values.iter().map(|(n, v)| (*n, v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn int(&self, name: &str) -> Result<i64, DecodeError> {
        self.require(name)?.as_i64().ok_or_else(|| DecodeError::FieldType {
            field: name.to_string(),
            expected: "an integer",
        })
    }

    /// Integer field narrowed to `N`; fails if the value does not fit.
    pub fn int_as<N: TryFrom<i64>>(&self, name: &str) -> Result<N, DecodeError> {
        N::try_from(self.int(name)?).map_err(|_| DecodeError::FieldType {
            field: name.to_string(),
            expected: std::any::type_name::<N>(),
        })
    }

    pub fn float(&self, name: &str) -> Result<f64, DecodeError> {
        self.require(name)?.as_f64().ok_or_else(|| DecodeError::FieldType {
            field: name.to_string(),
            expected: "numeric",
        })
    }

    pub fn text(&self, name: &str) -> Result<&str, DecodeError> {
        self.require(name)?.as_str().ok_or_else(|| DecodeError::FieldType {
            field: name.to_string(),
            expected: "text",
        })
    }

    fn require(&self, name: &str) -> Result<&FieldValue, DecodeError> {
        self.get(name).ok_or_else(|| DecodeError::MissingField {
            block: self.tag,
            field: name.to_string(),
        })
    }
}
