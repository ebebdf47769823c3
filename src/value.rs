use std::collections::BTreeMap;
use std::fmt;

use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

/// Dynamically-typed value carried by every record.
///
/// A *record* is a `Value` whose top-level variant is [`Value::Map`]. Values
/// nest arbitrarily and every variant round-trips exactly through the codec.
///
/// # Examples
///
/// ```
/// use mpacklog::{record, Value};
///
/// let r = record! {
///     "foo" => 1,
///     "something" => "else",
///     "nested" => record! { "x" => 0.5 },
/// };
/// assert!(r.is_record());
/// assert_eq!(r.get("foo"), Some(&Value::from(1)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Integer(Integer),
    Float(Float),
    String(String),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// True when the value is Mapping-rooted, i.e. loggable as a record.
    pub fn is_record(&self) -> bool {
        matches!(self, Value::Map(_))
    }

    /// Looks up a key when the value is a mapping.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(map) => map.get(key),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => i.as_i64(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Integer(i) => i.as_u64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(f.as_f64()),
            _ => None,
        }
    }

    /// Short name of the variant, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
        }
    }
}

/// Integer in the range `i64::MIN..=u64::MAX`.
///
/// Negative numbers are stored signed and non-negative numbers unsigned, so
/// each number has exactly one representation and `Integer::from(5i8) ==
/// Integer::from(5u64)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Integer(IntRepr);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum IntRepr {
    // Always < 0.
    Negative(i64),
    NonNegative(u64),
}

impl Integer {
    pub fn as_i64(self) -> Option<i64> {
        match self.0 {
            IntRepr::Negative(v) => Some(v),
            IntRepr::NonNegative(v) => i64::try_from(v).ok(),
        }
    }

    pub fn as_u64(self) -> Option<u64> {
        match self.0 {
            IntRepr::Negative(_) => None,
            IntRepr::NonNegative(v) => Some(v),
        }
    }

    pub fn is_negative(self) -> bool {
        matches!(self.0, IntRepr::Negative(_))
    }
}

impl From<i64> for Integer {
    fn from(v: i64) -> Self {
        if v < 0 {
            Integer(IntRepr::Negative(v))
        } else {
            Integer(IntRepr::NonNegative(v as u64))
        }
    }
}

impl From<u64> for Integer {
    fn from(v: u64) -> Self {
        Integer(IntRepr::NonNegative(v))
    }
}

macro_rules! integer_from_signed {
    ($($t:ty),*) => {$(
        impl From<$t> for Integer {
            fn from(v: $t) -> Self {
                Integer::from(v as i64)
            }
        }
        impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::Integer(Integer::from(v))
            }
        }
    )*};
}

macro_rules! integer_from_unsigned {
    ($($t:ty),*) => {$(
        impl From<$t> for Integer {
            fn from(v: $t) -> Self {
                Integer::from(v as u64)
            }
        }
        impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::Integer(Integer::from(v))
            }
        }
    )*};
}

integer_from_signed!(i8, i16, i32, isize);
integer_from_unsigned!(u8, u16, u32, usize);

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(Integer::from(v))
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Integer(Integer::from(v))
    }
}

impl fmt::Display for Integer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            IntRepr::Negative(v) => write!(f, "{}", v),
            IntRepr::NonNegative(v) => write!(f, "{}", v),
        }
    }
}

/// Floating point number that remembers its width.
///
/// Equality compares bit patterns: a NaN equals a NaN with the same bits and
/// `-0.0` is distinct from `0.0`. This is what makes decode(encode(v)) == v
/// hold for every float.
#[derive(Debug, Clone, Copy)]
pub enum Float {
    F32(f32),
    F64(f64),
}

impl Float {
    pub fn as_f64(self) -> f64 {
        match self {
            Float::F32(v) => v as f64,
            Float::F64(v) => v,
        }
    }
}

impl PartialEq for Float {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Float::F32(a), Float::F32(b)) => a.to_bits() == b.to_bits(),
            (Float::F64(a), Float::F64(b)) => a.to_bits() == b.to_bits(),
            _ => false,
        }
    }
}

impl Eq for Float {}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(Float::F32(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(Float::F64(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<Integer> for Value {
    fn from(v: Integer) -> Self {
        Value::Integer(v)
    }
}

impl From<Float> for Value {
    fn from(v: Float) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(v: BTreeMap<String, Value>) -> Self {
        Value::Map(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Value {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Value::Map(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Integer(i) => match i.0 {
                IntRepr::Negative(v) => serializer.serialize_i64(v),
                IntRepr::NonNegative(v) => serializer.serialize_u64(v),
            },
            Value::Float(Float::F32(v)) => serializer.serialize_f32(*v),
            Value::Float(Float::F64(v)) => serializer.serialize_f64(*v),
            Value::String(s) => serializer.serialize_str(s),
            Value::Bytes(b) => serializer.serialize_bytes(b),
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map {
                    out.serialize_entry(k, v)?;
                }
                out.end()
            }
        }
    }
}

/// Builds a Mapping-rooted [`Value`].
///
/// Keys are anything convertible into `String`, values anything convertible
/// into [`Value`], including nested `record!` invocations.
///
/// ```
/// use mpacklog::record;
///
/// let r = record! { "foo" => 0, "something" => "else" };
/// assert!(r.is_record());
/// ```
#[macro_export]
macro_rules! record {
    () => {
        $crate::Value::Map(::std::collections::BTreeMap::new())
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = ::std::collections::BTreeMap::new();
        $(
            map.insert(::std::string::String::from($key), $crate::Value::from($value));
        )+
        $crate::Value::Map(map)
    }};
}
