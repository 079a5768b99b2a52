//! Positional-tuple event payload codec.
//!
//! Each event type owns a fixed field order ("the schema") and
//! serializes to a msgpack array of that order. Because the schema can
//! grow over time, decoding never requires an exact arity match:
//! trailing items beyond what a reader expects are ignored, and a
//! reader asking for an index past the end of a shorter-than-expected
//! array gets the default it explicitly asked for instead of an error.

use clusterbus_common::Error;
use rmpv::Value;

/// A decoded (or about-to-be-encoded) positional event payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventArgs(pub Vec<Value>);

impl EventArgs {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push_str(&mut self, value: impl Into<String>) -> &mut Self {
        self.0.push(Value::String(value.into().into()));
        self
    }

    pub fn push_opt_str(&mut self, value: Option<impl Into<String>>) -> &mut Self {
        self.0.push(match value {
            Some(v) => Value::String(v.into().into()),
            None => Value::Nil,
        });
        self
    }

    pub fn push_f64(&mut self, value: f64) -> &mut Self {
        self.0.push(Value::F64(value));
        self
    }

    pub fn push_str_list(&mut self, values: &[String]) -> &mut Self {
        self.0.push(Value::Array(
            values.iter().cloned().map(|s| Value::String(s.into())).collect(),
        ));
        self
    }

    /// Encodes the tuple as a msgpack array.
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let mut buf = Vec::new();
        rmpv::encode::write_value(&mut buf, &Value::Array(self.0.clone()))
            .map_err(|e| Error::Decode(format!("msgpack encode failed: {e}")))?;
        Ok(buf)
    }

    /// Decodes a msgpack array into a positional tuple. Any msgpack
    /// array value works; a non-array top-level value is a decode
    /// error since the wire contract always encodes tuples.
    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        let mut cursor = bytes;
        let value = rmpv::decode::read_value(&mut cursor)
            .map_err(|e| Error::Decode(format!("msgpack decode failed: {e}")))?;
        match value {
            Value::Array(items) => Ok(Self(items)),
            other => Err(Error::Decode(format!(
                "expected a msgpack array for event args, got {other:?}"
            ))),
        }
    }

    fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    /// Required string field at `index`; missing or wrong-typed is a
    /// decode error since required fields cannot be defaulted.
    pub fn require_str(&self, index: usize, field: &str) -> Result<String, Error> {
        match self.get(index) {
            Some(Value::String(s)) => s
                .as_str()
                .map(|s| s.to_owned())
                .ok_or_else(|| Error::Decode(format!("field {field} is not valid UTF-8"))),
            Some(other) => Err(Error::Decode(format!(
                "field {field} expected string, got {other:?}"
            ))),
            None => Err(Error::Decode(format!("missing required field {field}"))),
        }
    }

    /// Optional string field; absent tuple slot or an explicit nil
    /// both decode to `None`.
    pub fn opt_str(&self, index: usize, field: &str) -> Result<Option<String>, Error> {
        match self.get(index) {
            None | Some(Value::Nil) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str().map(|s| s.to_owned()).ok_or_else(
                || Error::Decode(format!("field {field} is not valid UTF-8")),
            )?)),
            Some(other) => Err(Error::Decode(format!(
                "field {field} expected string or nil, got {other:?}"
            ))),
        }
    }

    /// Required numeric field, with an explicit default used when the
    /// tuple is shorter than expected (forward-compat suffix default).
    pub fn f64_or(&self, index: usize, default: f64) -> f64 {
        match self.get(index) {
            Some(Value::F64(f)) => *f,
            Some(Value::F32(f)) => *f as f64,
            Some(v) => v.as_f64().unwrap_or(default),
            None => default,
        }
    }

    pub fn str_list_or_empty(&self, index: usize) -> Vec<String> {
        match self.get(index) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(|s| s.to_owned()))
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_msgpack() {
        let mut args = EventArgs::new();
        args.push_str("task-1").push_f64(10.0).push_opt_str(Some("hi"));
        let bytes = args.encode().unwrap();
        let decoded = EventArgs::decode(&bytes).unwrap();
        assert_eq!(args, decoded);
    }

    #[test]
    fn ignores_trailing_items() {
        let mut args = EventArgs::new();
        args.push_str("a").push_str("b").push_str("extra-future-field");
        let bytes = args.encode().unwrap();
        let decoded = EventArgs::decode(&bytes).unwrap();
        assert_eq!(decoded.require_str(0, "first").unwrap(), "a");
        assert_eq!(decoded.require_str(1, "second").unwrap(), "b");
    }

    #[test]
    fn fills_defaults_for_missing_suffix_fields() {
        let mut args = EventArgs::new();
        args.push_str("only-one-field");
        let bytes = args.encode().unwrap();
        let decoded = EventArgs::decode(&bytes).unwrap();
        assert_eq!(decoded.f64_or(5, 0.0), 0.0);
        assert_eq!(decoded.opt_str(5, "missing").unwrap(), None);
    }
}
