use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::Error;

/// Declared type of a value, used by parameter descriptors and function
/// return types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Any,
    Boolean,
    Integer,
    Double,
    String,
}

/// A single cell flowing through row sources, accumulators and cubes.
///
/// Values are totally ordered so that they can key members and be sorted by
/// rank functions: `Null` sorts first, then booleans, then numbers (integers
/// and doubles compare numerically), then strings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum Value {
    #[default]
    Null,
    Boolean(bool),
    Integer(i64),
    Double(f64),
    String(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Value::Null => DataType::Any,
            Value::Boolean(_) => DataType::Boolean,
            Value::Integer(_) => DataType::Integer,
            Value::Double(_) => DataType::Double,
            Value::String(_) => DataType::String,
        }
    }

    /// Numeric view of the value, `None` for nulls and non numeric strings.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Double(d) => Some(*d),
            Value::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            Value::Null => None,
        }
    }

    /// Like `as_f64` but fails for anything that is not a number.
    pub fn to_f64(&self) -> Result<f64> {
        self.as_f64().ok_or_else(|| {
            Error::InvalidArgument(format!("expected a numeric value, got {}", self))
        })
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            Value::Integer(i) => Some(*i != 0),
            Value::Double(d) => Some(*d != 0.0),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            Value::Null => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::Integer(_) | Value::Double(_) => 2,
            Value::String(_) => 3,
        }
    }

    /// Numbers compare as doubles with `-0.0 == 0.0`.
    fn numeric_key(&self) -> f64 {
        let n = match self {
            Value::Integer(i) => *i as f64,
            Value::Double(d) => *d,
            _ => 0.0,
        };
        if n == 0.0 {
            0.0
        } else {
            n
        }
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Integer(i), Value::Double(d)) => cmp_integer_double(*i, *d),
            (Value::Double(d), Value::Integer(i)) => cmp_integer_double(*i, *d).reverse(),
            (a, b) if a.rank() == 2 && b.rank() == 2 => {
                a.numeric_key().total_cmp(&b.numeric_key())
            }
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

/// 2^63, the first double past `i64::MAX`.
const I64_LIMIT: f64 = 9_223_372_036_854_775_808.0;

/// Exact comparison of an integer with a double, without rounding the
/// integer to the nearest double. NaNs sort as `f64::total_cmp` places them.
fn cmp_integer_double(i: i64, d: f64) -> Ordering {
    if d.is_nan() {
        return (i as f64).total_cmp(&d);
    }
    if d >= I64_LIMIT {
        return Ordering::Less;
    }
    if d < -I64_LIMIT {
        return Ordering::Greater;
    }
    let whole = d.trunc();
    i.cmp(&(whole as i64)).then_with(|| whole.total_cmp(&d))
}

/// The integer a double equals exactly, if any.
fn integral(d: f64) -> Option<i64> {
    (d.fract() == 0.0 && (-I64_LIMIT..I64_LIMIT).contains(&d)).then(|| d as i64)
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Value::Null => {}
            Value::Boolean(b) => b.hash(state),
            // Integral doubles hash as the integer they equal, so 1 and 1.0
            // land in the same bucket.
            Value::Integer(i) => i.hash(state),
            Value::Double(d) => match integral(*d) {
                Some(i) => i.hash(state),
                None => d.to_bits().hash(state),
            },
            Value::String(s) => s.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Double(d) => write!(f, "{}", d),
            Value::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i as i64)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<usize> for Value {
    fn from(i: usize) -> Self {
        Value::Integer(i as i64)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeSet, HashSet};

    #[test]
    fn test_cross_type_ordering() {
        let mut values = vec![
            Value::from("b"),
            Value::from(2.5),
            Value::Null,
            Value::from(true),
            Value::from(1),
            Value::from("a"),
        ];
        values.sort();
        assert_eq!(
            values,
            vec![
                Value::Null,
                Value::from(true),
                Value::from(1),
                Value::from(2.5),
                Value::from("a"),
                Value::from("b"),
            ]
        );
    }

    #[test]
    fn test_numeric_equality_and_hash() {
        assert_eq!(Value::from(1), Value::from(1.0));
        assert_eq!(Value::from(0.0), Value::from(-0.0));

        let set: HashSet<Value> = [Value::from(3), Value::from(3.0)].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_large_integers_compare_exactly_with_doubles() {
        let big = 1i64 << 53;
        // 2^53 + 1 has no double; it rounds to 2^53 when converted.
        assert_eq!(Value::from(big), Value::from(big as f64));
        assert_ne!(Value::from(big + 1), Value::from(big as f64));
        assert!(Value::from(big + 1) > Value::from(big as f64));
        assert!(Value::from(big as f64) < Value::from(big + 1));

        let keys: BTreeSet<Value> = [Value::from(big), Value::from(big as f64), Value::from(big + 1)]
            .into_iter()
            .collect();
        assert_eq!(keys.len(), 2);
        let hashed: HashSet<Value> = keys.iter().cloned().chain([Value::from(big as f64)]).collect();
        assert_eq!(hashed.len(), 2);

        assert!(Value::from(2) < Value::from(2.5));
        assert!(Value::from(-2) > Value::from(-2.5));
        assert!(Value::from(i64::MAX) < Value::from(9.3e18));
        assert!(Value::from(i64::MIN) == Value::from(-9_223_372_036_854_775_808.0));
        assert!(Value::from(i64::MIN) > Value::from(f64::NEG_INFINITY));
        assert!(Value::from(0) == Value::from(-0.0));
    }

    #[test]
    fn test_numeric_conversion() {
        assert_eq!(Value::from("  4.5 ").to_f64().unwrap(), 4.5);
        assert_eq!(Value::from(7).as_f64(), Some(7.0));
        assert!(Value::Null.as_f64().is_none());
        assert!(matches!(
            Value::from("abc").to_f64(),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(Value::from(Option::<i64>::None), Value::Null);
    }
}
