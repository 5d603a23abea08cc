//! External configuration-object interface (§6).
//!
//! The configuration reader itself is an external collaborator out of
//! scope for this crate; what we specify is the read-only tree interface
//! the core consumes from it. [`JsonConfigNode`] is a `serde_json`-backed
//! default implementation so the crate has something concrete to build and
//! test against without requiring an embedder to supply their own reader.

use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::error::{Error, Result};

/// A read-only view into one node of a parsed configuration tree.
///
/// The core never writes back through this trait; `getv`-style variadic
/// reads are represented here as typed accessor methods rather than a
/// single variadic call, since Rust has no variadic functions — callers
/// compose several single-field reads instead.
pub trait ConfigNode: std::fmt::Debug {
    fn is_dict(&self) -> bool;
    fn is_list(&self) -> bool;
    fn is_pair(&self) -> bool;
    fn is_leaf(&self) -> bool {
        !self.is_dict() && !self.is_list() && !self.is_pair()
    }

    fn child_count(&self) -> usize;
    fn child_ele(&self, i: usize) -> Result<ConfigNodeRef>;

    fn pair_label(&self) -> Result<&str>;
    fn pair_value(&self) -> Result<ConfigNodeRef>;

    /// Finds a child by label, optionally recursing into nested dicts.
    fn find(&self, label: &str, recurse: bool) -> Option<ConfigNodeRef>;

    fn as_f64(&self) -> Result<f64>;
    fn as_i64(&self) -> Result<i64>;
    fn as_bool(&self) -> Result<bool>;
    fn as_str(&self) -> Result<String>;
}

pub type ConfigNodeRef = Arc<dyn ConfigNode + Send + Sync>;

/// A `serde_json`-backed [`ConfigNode`].
#[derive(Debug, Clone)]
pub struct JsonConfigNode {
    label: Option<String>,
    value: JsonValue,
}

impl JsonConfigNode {
    pub fn root(value: JsonValue) -> ConfigNodeRef {
        Arc::new(JsonConfigNode { label: None, value })
    }

    pub fn parse_str(text: &str) -> Result<ConfigNodeRef> {
        let value: JsonValue = serde_json::from_str(text)
            .map_err(|e| Error::SyntaxError { context: "config".into(), message: e.to_string() })?;
        Ok(Self::root(value))
    }
}

impl ConfigNode for JsonConfigNode {
    fn is_dict(&self) -> bool {
        self.value.is_object()
    }

    fn is_list(&self) -> bool {
        self.value.is_array()
    }

    fn is_pair(&self) -> bool {
        self.label.is_some() && !self.is_dict() && !self.is_list()
    }

    fn child_count(&self) -> usize {
        match &self.value {
            JsonValue::Object(m) => m.len(),
            JsonValue::Array(a) => a.len(),
            _ => 0,
        }
    }

    fn child_ele(&self, i: usize) -> Result<ConfigNodeRef> {
        match &self.value {
            JsonValue::Object(m) => m
                .iter()
                .nth(i)
                .map(|(k, v)| {
                    Arc::new(JsonConfigNode { label: Some(k.clone()), value: v.clone() }) as ConfigNodeRef
                })
                .ok_or_else(|| Error::ElementNotFound(format!("child {i}"))),
            JsonValue::Array(a) => a
                .get(i)
                .map(|v| Arc::new(JsonConfigNode { label: None, value: v.clone() }) as ConfigNodeRef)
                .ok_or_else(|| Error::ElementNotFound(format!("child {i}"))),
            _ => Err(Error::InvalidState("not a dict or list".into())),
        }
    }

    fn pair_label(&self) -> Result<&str> {
        self.label.as_deref().ok_or(Error::InvalidState("not a pair".into()))
    }

    fn pair_value(&self) -> Result<ConfigNodeRef> {
        Ok(Arc::new(JsonConfigNode { label: None, value: self.value.clone() }))
    }

    fn find(&self, label: &str, recurse: bool) -> Option<ConfigNodeRef> {
        if let JsonValue::Object(m) = &self.value {
            if let Some(v) = m.get(label) {
                return Some(Arc::new(JsonConfigNode { label: Some(label.to_string()), value: v.clone() }));
            }
            if recurse {
                for (_, v) in m.iter() {
                    let child = JsonConfigNode { label: None, value: v.clone() };
                    if let Some(found) = child.find(label, true) {
                        return Some(found);
                    }
                }
            }
        }
        None
    }

    fn as_f64(&self) -> Result<f64> {
        self.value.as_f64().ok_or(Error::InvalidArgument("not numeric".into()))
    }

    fn as_i64(&self) -> Result<i64> {
        self.value.as_i64().ok_or(Error::InvalidArgument("not integral".into()))
    }

    fn as_bool(&self) -> Result<bool> {
        self.value.as_bool().ok_or(Error::InvalidArgument("not bool".into()))
    }

    fn as_str(&self) -> Result<String> {
        self.value
            .as_str()
            .map(str::to_string)
            .ok_or(Error::InvalidArgument("not a string".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_nested_label_when_recursing() {
        let root = JsonConfigNode::parse_str(r#"{"a": {"b": 7}}"#).unwrap();
        assert!(root.find("b", false).is_none());
        let found = root.find("b", true).unwrap();
        assert_eq!(found.as_i64().unwrap(), 7);
    }
}
