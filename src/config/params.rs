//! Hierarchical string-keyed parameter lists.
//!
//! Keys are free-form strings such as `"smoother: sweeps"`; values are typed. Lookups of
//! a present key with the wrong type fail with [`MgError::InvalidParameter`].

use std::collections::BTreeMap;
use std::fmt;

use crate::error::MgError;

#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(String),
    List(ParameterList),
}

impl ParamValue {
    fn type_name(&self) -> &'static str {
        match self {
            ParamValue::Bool(_) => "bool",
            ParamValue::Int(_) => "int",
            ParamValue::Double(_) => "double",
            ParamValue::Str(_) => "string",
            ParamValue::List(_) => "sublist",
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(b) => write!(f, "{b}"),
            ParamValue::Int(i) => write!(f, "{i}"),
            ParamValue::Double(d) => write!(f, "{d}"),
            ParamValue::Str(s) => write!(f, "\"{s}\""),
            ParamValue::List(l) => write!(f, "[{} entries]", l.len()),
        }
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        ParamValue::Int(v.into())
    }
}

impl From<usize> for ParamValue {
    fn from(v: usize) -> Self {
        ParamValue::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Double(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Str(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Str(v)
    }
}

impl From<ParameterList> for ParamValue {
    fn from(v: ParameterList) -> Self {
        ParamValue::List(v)
    }
}

/// Types that can be read out of a [`ParamValue`].
pub trait ParamType: Sized {
    const NAME: &'static str;
    fn from_value(v: &ParamValue) -> Option<Self>;
}

impl ParamType for bool {
    const NAME: &'static str = "bool";
    fn from_value(v: &ParamValue) -> Option<Self> {
        match v {
            ParamValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl ParamType for i64 {
    const NAME: &'static str = "int";
    fn from_value(v: &ParamValue) -> Option<Self> {
        match v {
            ParamValue::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl ParamType for usize {
    const NAME: &'static str = "non-negative int";
    fn from_value(v: &ParamValue) -> Option<Self> {
        match v {
            ParamValue::Int(i) => usize::try_from(*i).ok(),
            _ => None,
        }
    }
}

impl ParamType for f64 {
    const NAME: &'static str = "double";
    fn from_value(v: &ParamValue) -> Option<Self> {
        match v {
            ParamValue::Double(d) => Some(*d),
            ParamValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }
}

impl ParamType for String {
    const NAME: &'static str = "string";
    fn from_value(v: &ParamValue) -> Option<Self> {
        match v {
            ParamValue::Str(s) => Some(s.clone()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterList {
    entries: BTreeMap<String, ParamValue>,
}

impl ParameterList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style `set`.
    pub fn with(mut self, key: &str, value: impl Into<ParamValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: impl Into<ParamValue>) -> &mut Self {
        self.entries.insert(key.to_string(), value.into());
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn raw(&self, key: &str) -> Option<&ParamValue> {
        self.entries.get(key)
    }

    /// `Ok(None)` if absent, `InvalidParameter` if present with another type.
    pub fn get<T: ParamType>(&self, key: &str) -> Result<Option<T>, MgError> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(v) => T::from_value(v).map(Some).ok_or_else(|| MgError::InvalidParameter {
                key: key.to_string(),
                reason: format!("expected {}, found {} {v}", T::NAME, v.type_name()),
            }),
        }
    }

    pub fn get_or<T: ParamType>(&self, key: &str, default: T) -> Result<T, MgError> {
        Ok(self.get(key)?.unwrap_or(default))
    }

    pub fn sublist(&self, key: &str) -> Option<&ParameterList> {
        match self.entries.get(key) {
            Some(ParamValue::List(l)) => Some(l),
            _ => None,
        }
    }

    /// Get or create the sublist `key`, replacing a non-list value.
    pub fn sublist_mut(&mut self, key: &str) -> &mut ParameterList {
        let slot = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| ParamValue::List(ParameterList::new()));
        if !matches!(slot, ParamValue::List(_)) {
            *slot = ParamValue::List(ParameterList::new());
        }
        match slot {
            ParamValue::List(l) => l,
            _ => unreachable!(),
        }
    }

    /// Keys not present in `known`.
    pub fn unrecognized<'a>(&'a self, known: &[&str]) -> Vec<&'a str> {
        self.keys().filter(|k| !known.contains(k)).collect()
    }
}
