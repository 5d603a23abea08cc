//! Tagged value union and coercion rules (§3, §4.4).
//!
//! Every [`Value`] carries exactly one type tag. Numeric values convert
//! freely into one another and into `bool` (zero iff false) on read; string
//! and configuration-node values never cross into numeric or boolean space.

use std::sync::Arc;

use crate::config::ConfigNodeRef;
use crate::error::Error;

#[derive(Debug, Clone)]
pub enum Value {
    Bool(bool),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Char(char),
    /// Owned or borrowed (via `Arc`, so cheap to share) null-terminated
    /// string content.
    Str(Arc<str>),
    /// A reference into a parsed external configuration tree.
    Cfg(ConfigNodeRef),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::I8(a), Value::I8(b)) => a == b,
            (Value::U8(a), Value::U8(b)) => a == b,
            (Value::I16(a), Value::I16(b)) => a == b,
            (Value::U16(a), Value::U16(b)) => a == b,
            (Value::I32(a), Value::I32(b)) => a == b,
            (Value::U32(a), Value::U32(b)) => a == b,
            (Value::I64(a), Value::I64(b)) => a == b,
            (Value::U64(a), Value::U64(b)) => a == b,
            (Value::F32(a), Value::F32(b)) => a == b,
            (Value::F64(a), Value::F64(b)) => a == b,
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            // `dyn ConfigNode` has no structural equality; fall back to
            // reference identity of the shared node.
            (Value::Cfg(a), Value::Cfg(b)) => std::sync::Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::I8(_) => "i8",
            Value::U8(_) => "u8",
            Value::I16(_) => "i16",
            Value::U16(_) => "u16",
            Value::I32(_) => "i32",
            Value::U32(_) => "u32",
            Value::I64(_) => "i64",
            Value::U64(_) => "u64",
            Value::F32(_) => "f32",
            Value::F64(_) => "f64",
            Value::Char(_) => "char",
            Value::Str(_) => "string",
            Value::Cfg(_) => "cfg",
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Bool(b) => Some(if b { 1.0 } else { 0.0 }),
            Value::I8(v) => Some(v as f64),
            Value::U8(v) => Some(v as f64),
            Value::I16(v) => Some(v as f64),
            Value::U16(v) => Some(v as f64),
            Value::I32(v) => Some(v as f64),
            Value::U32(v) => Some(v as f64),
            Value::I64(v) => Some(v as f64),
            Value::U64(v) => Some(v as f64),
            Value::F32(v) => Some(v as f64),
            Value::F64(v) => Some(v),
            Value::Char(_) | Value::Str(_) | Value::Cfg(_) => None,
        }
    }

    /// Reads this value coerced to `f64`. Fails for string/cfg values.
    pub fn to_f64(&self) -> Result<f64, Error> {
        self.as_f64()
            .ok_or_else(|| incompatible(self.type_name(), "f64"))
    }

    /// Reads this value coerced to `i64`, truncating toward zero for
    /// floats. Fails for string/cfg values.
    pub fn to_i64(&self) -> Result<i64, Error> {
        self.as_f64()
            .map(|f| f as i64)
            .ok_or_else(|| incompatible(self.type_name(), "i64"))
    }

    /// Reads this value coerced to `bool`: any numeric zero is `false`,
    /// any nonzero numeric is `true`. Fails for string/cfg values.
    pub fn to_bool(&self) -> Result<bool, Error> {
        self.as_f64()
            .map(|f| f != 0.0)
            .ok_or_else(|| incompatible(self.type_name(), "bool"))
    }

    pub fn to_str(&self) -> Result<&str, Error> {
        match self {
            Value::Str(s) => Ok(s.as_ref()),
            other => Err(incompatible(other.type_name(), "string")),
        }
    }

    pub fn as_cfg(&self) -> Result<&ConfigNodeRef, Error> {
        match self {
            Value::Cfg(c) => Ok(c),
            other => Err(incompatible(other.type_name(), "cfg")),
        }
    }
}

fn incompatible(from: &str, to: &str) -> Error {
    Error::InvalidArgument(format!("cannot convert {from} to {to}"))
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::F32(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I32(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(Arc::from(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_coercion_round_trips() {
        let v = Value::I32(7);
        assert_eq!(v.to_f64().unwrap(), 7.0);
        assert!(v.to_bool().unwrap());
        assert!(!Value::U8(0).to_bool().unwrap());
    }

    #[test]
    fn string_does_not_coerce_to_numeric() {
        let v = Value::from("hello");
        assert!(v.to_f64().is_err());
        assert!(v.to_bool().is_err());
    }
}
