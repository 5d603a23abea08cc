//! Record types and record-array buffers (§3, §4.4).

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Bool,
    I32,
    U32,
    I64,
    F32,
    F64,
    Str,
}

#[derive(Debug, Clone)]
pub struct FieldDescr {
    pub name: String,
    pub ty: FieldType,
}

/// An ordered list of named typed fields, optionally extending a base type.
#[derive(Debug, Clone)]
pub struct RecordType {
    pub name: String,
    pub base: Option<Arc<RecordType>>,
    own_fields: Vec<FieldDescr>,
}

impl RecordType {
    pub fn new(name: impl Into<String>, base: Option<Arc<RecordType>>, fields: Vec<FieldDescr>) -> Arc<Self> {
        Arc::new(RecordType { name: name.into(), base, own_fields: fields })
    }

    /// All fields, base type's first, in declaration order.
    pub fn fields(&self) -> Vec<&FieldDescr> {
        let mut out = Vec::new();
        if let Some(base) = &self.base {
            out.extend(base.fields());
        }
        out.extend(self.own_fields.iter());
        out
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields().iter().position(|f| f.name == name)
    }
}

/// A tuple of values conforming to a [`RecordType`].
#[derive(Debug, Clone)]
pub struct Record {
    pub ty: Arc<RecordType>,
    pub values: Vec<Value>,
}

impl Record {
    pub fn field(&self, name: &str) -> Result<&Value> {
        let idx = self
            .ty
            .field_index(name)
            .ok_or_else(|| Error::ElementNotFound(format!("field {name}")))?;
        self.values
            .get(idx)
            .ok_or_else(|| Error::InvalidState("record/type field-count mismatch".into()))
    }
}

/// A ring-like, pre-allocated array of records. The producer owns `rbuf`
/// and mutates `recd_n` (never above the allocated capacity) each cycle;
/// consumers read `recd_n` records and must not retain borrows past the
/// next cycle.
pub struct RecordBuffer {
    pub ty: Arc<RecordType>,
    capacity: usize,
    recd_a: Vec<Record>,
    recd_n: usize,
}

impl RecordBuffer {
    pub fn new(ty: Arc<RecordType>, capacity: usize) -> Self {
        let default_values = |ty: &RecordType| -> Vec<Value> {
            ty.fields()
                .iter()
                .map(|f| match f.ty {
                    FieldType::Bool => Value::Bool(false),
                    FieldType::I32 => Value::I32(0),
                    FieldType::U32 => Value::U32(0),
                    FieldType::I64 => Value::I64(0),
                    FieldType::F32 => Value::F32(0.0),
                    FieldType::F64 => Value::F64(0.0),
                    FieldType::Str => Value::Str(Arc::from("")),
                })
                .collect()
        };
        let recd_a = (0..capacity)
            .map(|_| Record { ty: ty.clone(), values: default_values(&ty) })
            .collect();
        RecordBuffer { ty, capacity, recd_a, recd_n: 0 }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn recd_n(&self) -> usize {
        self.recd_n
    }

    /// Producer-side: sets the live record count for this cycle.
    pub fn set_recd_n(&mut self, n: usize) -> Result<()> {
        if n > self.capacity {
            return Err(Error::BufferTooSmall { needed: n, have: self.capacity });
        }
        self.recd_n = n;
        Ok(())
    }

    pub fn record_mut(&mut self, i: usize) -> Result<&mut Record> {
        self.recd_a.get_mut(i).ok_or_else(|| Error::InvalidId(format!("record index {i}")))
    }

    /// Consumer-side: the live records for this cycle.
    pub fn live(&self) -> &[Record] {
        &self.recd_a[..self.recd_n]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_recd_n_rejects_over_capacity() {
        let ty = RecordType::new("midi", None, vec![FieldDescr { name: "midi".into(), ty: FieldType::I32 }]);
        let mut rbuf = RecordBuffer::new(ty, 4);
        assert!(rbuf.set_recd_n(5).is_err());
        assert!(rbuf.set_recd_n(3).is_ok());
        assert_eq!(rbuf.live().len(), 3);
    }

    #[test]
    fn base_type_fields_come_first() {
        let base = RecordType::new("base", None, vec![FieldDescr { name: "a".into(), ty: FieldType::I32 }]);
        let derived = RecordType::new("derived", Some(base), vec![FieldDescr { name: "b".into(), ty: FieldType::F32 }]);
        let names: Vec<_> = derived.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
