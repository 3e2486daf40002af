//! Conversion semantics for `Variant`
//!
//! Conversions never raise: every case falls back to a documented
//! default. Numbers are double-precision floats throughout.

use super::{Variant, VariantData};
use std::fmt;

/// Render a double the way script output expects it, including the
/// legacy NaN/Infinity spellings.
pub(crate) fn render_number(value: f64) -> String {
    if value.is_nan() {
        "-1.#IND".to_string()
    } else if value == f64::INFINITY {
        "1.#INF".to_string()
    } else if value == f64::NEG_INFINITY {
        "-1.#INF".to_string()
    } else {
        format!("{value}")
    }
}

fn decode_hex(text: &str) -> Option<Vec<u8>> {
    if !text.is_ascii() || text.len() % 2 != 0 {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&text[i..i + 2], 16).ok())
        .collect()
}

impl Variant {
    /// Boolean coercion: `Null`/`Default` are false, numbers are false
    /// iff exactly zero, strings iff empty, binaries iff the first
    /// byte is zero or absent. Everything else is true.
    pub fn to_boolean(&self) -> bool {
        match &self.data {
            VariantData::Null | VariantData::Default => false,
            VariantData::Boolean(b) => *b,
            VariantData::Number(n) => *n != 0.0,
            VariantData::String(s) => !s.is_empty(),
            VariantData::Binary(bytes) => bytes.read().first().copied().unwrap_or(0) != 0,
            VariantData::Array(_)
            | VariantData::Map(_)
            | VariantData::Function(_)
            | VariantData::ComObject(_)
            | VariantData::Handle(_)
            | VariantData::Reference(_) => true,
        }
    }

    /// Numeric coercion. Strings starting with `0x` parse as
    /// hexadecimal integers, all other strings as decimal floats;
    /// parse failure yields zero. `Default` is −1. Handle and COM ids
    /// coerce to their numeric id.
    pub fn to_number(&self) -> f64 {
        match &self.data {
            VariantData::Default => -1.0,
            VariantData::Boolean(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            VariantData::Number(n) => *n,
            VariantData::String(s) => {
                let s = s.trim();
                if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                    i64::from_str_radix(hex, 16).map(|n| n as f64).unwrap_or(0.0)
                } else {
                    s.parse::<f64>().unwrap_or(0.0)
                }
            }
            VariantData::Handle(id) => *id as f64,
            VariantData::ComObject(id) => *id as f64,
            _ => 0.0,
        }
    }

    /// Numeric coercion clamped into `[min, max]`.
    pub fn to_number_clamped(&self, min: f64, max: f64) -> f64 {
        self.to_number().clamp(min, max)
    }

    /// Binary coercion: numbers serialize to their minimal-width
    /// native layout (32-bit integer, 64-bit integer, then float),
    /// `0x`-prefixed strings parse as hex bytes, other strings encode
    /// byte-wise, booleans become a single byte and `Default` the
    /// four-byte encoding of −1.
    pub fn to_binary(&self) -> Vec<u8> {
        match &self.data {
            VariantData::Boolean(b) => vec![*b as u8],
            VariantData::Default => (-1i32).to_le_bytes().to_vec(),
            VariantData::Null => 0i32.to_le_bytes().to_vec(),
            VariantData::Number(d) => {
                let d = *d;
                if d.fract() == 0.0 && d >= i32::MIN as f64 && d <= i32::MAX as f64 {
                    (d as i32).to_le_bytes().to_vec()
                } else if d.fract() == 0.0 && d >= i64::MIN as f64 && d <= i64::MAX as f64 {
                    (d as i64).to_le_bytes().to_vec()
                } else {
                    d.to_le_bytes().to_vec()
                }
            }
            VariantData::String(s) => {
                if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                    decode_hex(hex).unwrap_or_default()
                } else {
                    s.chars().map(|c| (c as u32 & 0xff) as u8).collect()
                }
            }
            VariantData::Binary(bytes) => bytes.read().clone(),
            _ => Vec::new(),
        }
    }
}

/// String coercion. `Default` renders its keyword, booleans render
/// `True`/`False`, references render their target's current value and
/// non-empty binaries render as uppercase hex. Arrays, maps, functions
/// and COM ids render empty.
impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.data {
            VariantData::Default => f.write_str("Default"),
            VariantData::Boolean(b) => f.write_str(if *b { "True" } else { "False" }),
            VariantData::Number(n) => f.write_str(&render_number(*n)),
            VariantData::String(s) => f.write_str(s),
            VariantData::Handle(id) => write!(f, "{id}"),
            VariantData::Reference(variable) => write!(f, "{}", variable.value()),
            VariantData::Binary(bytes) => {
                let bytes = bytes.read();
                if bytes.is_empty() {
                    Ok(())
                } else {
                    f.write_str("0x")?;
                    for byte in bytes.iter() {
                        write!(f, "{byte:02X}")?;
                    }
                    Ok(())
                }
            }
            _ => Ok(()),
        }
    }
}
