//! Backend-neutral script values.
//!
//! The policy engine speaks `ScriptValue` on both sides of a call so that the
//! scripting backend stays a pluggable detail. Tables mirror the usual
//! embeddable-language shape: an ordered sequence part plus named fields.

use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Default)]
pub enum ScriptValue {
    #[default]
    Nil,
    Boolean(bool),
    Integer(i64),
    Number(f64),
    String(String),
    Table(ScriptTable),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScriptTable {
    /// 1-based sequence part.
    pub sequence: Vec<ScriptValue>,
    /// String-keyed fields.
    pub fields: BTreeMap<String, ScriptValue>,
}

impl ScriptTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_sequence(sequence: Vec<ScriptValue>) -> Self {
        Self {
            sequence,
            fields: BTreeMap::new(),
        }
    }

    /// Set a field. Nil values are not stored, matching script semantics.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<ScriptValue>) {
        let value = value.into();
        let key = key.into();
        if value == ScriptValue::Nil {
            self.fields.remove(&key);
        } else {
            self.fields.insert(key, value);
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<ScriptValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&ScriptValue> {
        self.fields.get(key)
    }
}

impl ScriptValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScriptValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Integer view; integral floats are accepted since many scripts only
    /// produce numbers. Floats outside the `i64` range are rejected, not
    /// saturated.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ScriptValue::Integer(i) => Some(*i),
            ScriptValue::Number(n) if is_integral_in(*n, I64_MIN_F, I64_END_F) => Some(*n as i64),
            _ => None,
        }
    }

    /// Unsigned view, the inverse of `From<u64>`: non-negative integers,
    /// integral floats in range, or the decimal string used for values above
    /// `i64::MAX`.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            ScriptValue::Integer(i) => u64::try_from(*i).ok(),
            ScriptValue::Number(n) if is_integral_in(*n, 0.0, U64_END_F) => Some(*n as u64),
            ScriptValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ScriptValue::Integer(i) => Some(*i as f64),
            ScriptValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&ScriptTable> {
        match self {
            ScriptValue::Table(t) => Some(t),
            _ => None,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, ScriptValue::Nil)
    }

    /// Short type name for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            ScriptValue::Nil => "nil",
            ScriptValue::Boolean(_) => "boolean",
            ScriptValue::Integer(_) => "integer",
            ScriptValue::Number(_) => "number",
            ScriptValue::String(_) => "string",
            ScriptValue::Table(_) => "table",
        }
    }
}

/// -2^63, exactly representable.
const I64_MIN_F: f64 = -9_223_372_036_854_775_808.0;
/// 2^63, first float past `i64::MAX`.
const I64_END_F: f64 = 9_223_372_036_854_775_808.0;
/// 2^64, first float past `u64::MAX`.
const U64_END_F: f64 = 18_446_744_073_709_551_616.0;

fn is_integral_in(n: f64, min: f64, end: f64) -> bool {
    n.is_finite() && n.fract() == 0.0 && n >= min && n < end
}

impl From<bool> for ScriptValue {
    fn from(v: bool) -> Self {
        ScriptValue::Boolean(v)
    }
}

impl From<i64> for ScriptValue {
    fn from(v: i64) -> Self {
        ScriptValue::Integer(v)
    }
}

impl From<u32> for ScriptValue {
    fn from(v: u32) -> Self {
        ScriptValue::Integer(i64::from(v))
    }
}

/// Script integers are signed 64-bit. Values above `i64::MAX` travel as
/// their decimal string so `as_u64` gets them back exactly; arithmetic on
/// them in a script coerces to a float.
impl From<u64> for ScriptValue {
    fn from(v: u64) -> Self {
        match i64::try_from(v) {
            Ok(i) => ScriptValue::Integer(i),
            Err(_) => ScriptValue::String(v.to_string()),
        }
    }
}

impl From<f64> for ScriptValue {
    fn from(v: f64) -> Self {
        ScriptValue::Number(v)
    }
}

impl From<&str> for ScriptValue {
    fn from(v: &str) -> Self {
        ScriptValue::String(v.to_string())
    }
}

impl From<String> for ScriptValue {
    fn from(v: String) -> Self {
        ScriptValue::String(v)
    }
}

impl From<ScriptTable> for ScriptValue {
    fn from(v: ScriptTable) -> Self {
        ScriptValue::Table(v)
    }
}

impl<T: Into<ScriptValue>> From<Option<T>> for ScriptValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(ScriptValue::Nil)
    }
}

impl<T: Into<ScriptValue>> From<Vec<T>> for ScriptValue {
    fn from(v: Vec<T>) -> Self {
        ScriptValue::Table(ScriptTable::from_sequence(
            v.into_iter().map(Into::into).collect(),
        ))
    }
}

/// String maps become field-only tables (preferences).
impl From<&BTreeMap<String, String>> for ScriptValue {
    fn from(v: &BTreeMap<String, String>) -> Self {
        let mut t = ScriptTable::new();
        for (k, val) in v {
            t.set(k.clone(), val.as_str());
        }
        ScriptValue::Table(t)
    }
}
