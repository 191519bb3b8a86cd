//! Records, scalar values and primary keys shared by both storage backends

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// A single field value. Records hold no nested structures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl Scalar {
    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Integer(i) => Some(*i as f64),
            Scalar::Real(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Text(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Integer(value)
    }
}

impl From<i32> for Scalar {
    fn from(value: i32) -> Self {
        Scalar::Integer(value as i64)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Real(value)
    }
}

impl<T: Into<Scalar>> From<Option<T>> for Scalar {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Scalar::Null)
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => write!(f, "null"),
            Scalar::Integer(i) => write!(f, "{}", i),
            Scalar::Real(r) => write!(f, "{}", r),
            Scalar::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Primary-key value.
///
/// Keys are totally ordered: numbers sort before text, numbers compare
/// numerically (an integer and a real of equal value are the same key) and
/// text compares lexicographically.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    Integer(i64),
    Real(f64),
    Text(String),
}

impl Key {
    /// Build a key from a scalar. Null and NaN are not valid keys.
    pub fn from_scalar(value: &Scalar) -> Option<Key> {
        match value {
            Scalar::Null => None,
            Scalar::Integer(i) => Some(Key::Integer(*i)),
            Scalar::Real(f) if f.is_nan() => None,
            Scalar::Real(f) => Some(Key::Real(*f)),
            Scalar::Text(s) => Some(Key::Text(s.clone())),
        }
    }

    /// Key synthesized for stores without native auto-increment: the current
    /// millisecond epoch. Two inserts within the same millisecond collide.
    pub fn from_timestamp() -> Key {
        Key::Integer(chrono::Utc::now().timestamp_millis())
    }

    /// Integer value of the key, including reals with no fractional part
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Key::Integer(i) => Some(*i),
            Key::Real(f) if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64 => {
                Some(*f as i64)
            }
            _ => None,
        }
    }

    fn numeric(&self) -> Option<f64> {
        match self {
            Key::Integer(i) => Some(*i as f64),
            Key::Real(f) => Some(*f),
            Key::Text(_) => None,
        }
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Key::Integer(a), Key::Integer(b)) => a.cmp(b),
            (Key::Text(a), Key::Text(b)) => a.cmp(b),
            (Key::Text(_), _) => Ordering::Greater,
            (_, Key::Text(_)) => Ordering::Less,
            (a, b) => match (a.numeric(), b.numeric()) {
                (Some(x), Some(y)) => x.total_cmp(&y),
                _ => Ordering::Equal,
            },
        }
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl From<Key> for Scalar {
    fn from(key: Key) -> Self {
        match key {
            Key::Integer(i) => Scalar::Integer(i),
            Key::Real(f) => Scalar::Real(f),
            Key::Text(s) => Scalar::Text(s),
        }
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Key::Integer(value)
    }
}

impl From<i32> for Key {
    fn from(value: i32) -> Self {
        Key::Integer(value as i64)
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::Text(value.to_string())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::Text(value)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Integer(i) => write!(f, "{}", i),
            Key::Real(r) => write!(f, "{}", r),
            Key::Text(s) => write!(f, "{}", s),
        }
    }
}

/// A mapping from field name to scalar value
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(BTreeMap<String, Scalar>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<&Scalar> {
        self.0.get(field)
    }

    pub fn set(&mut self, field: &str, value: impl Into<Scalar>) {
        self.0.insert(field.to_string(), value.into());
    }

    /// Builder form of [`Record::set`]
    pub fn with(mut self, field: &str, value: impl Into<Scalar>) -> Self {
        self.set(field, value);
        self
    }

    pub fn remove(&mut self, field: &str) -> Option<Scalar> {
        self.0.remove(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Scalar)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Primary key stored under `key_path`, if present and valid
    pub fn key(&self, key_path: &str) -> Option<Key> {
        self.get(key_path).and_then(Key::from_scalar)
    }
}

impl<S: Into<String>, V: Into<Scalar>> FromIterator<(S, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (S, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl<const N: usize> From<[(&str, Scalar); N]> for Record {
    fn from(pairs: [(&str, Scalar); N]) -> Self {
        pairs.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_ordering() {
        let mut keys = vec![
            Key::Text("b".into()),
            Key::Integer(10),
            Key::Real(2.5),
            Key::Text("a".into()),
            Key::Integer(-1),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                Key::Integer(-1),
                Key::Real(2.5),
                Key::Integer(10),
                Key::Text("a".into()),
                Key::Text("b".into()),
            ]
        );
        assert_eq!(Key::Integer(3), Key::Real(3.0));
    }

    #[test]
    fn test_key_as_integer() {
        assert_eq!(Key::Integer(3).as_integer(), Some(3));
        assert_eq!(Key::Real(3.0).as_integer(), Some(3));
        assert_eq!(Key::Real(3.5).as_integer(), None);
        assert_eq!(Key::Real(f64::INFINITY).as_integer(), None);
        assert_eq!(Key::Real(1e19).as_integer(), None);
        assert_eq!(Key::from("3").as_integer(), None);
    }

    #[test]
    fn test_record_key() {
        let record = Record::new().with("id", 7).with("name", "render");
        assert_eq!(record.key("id"), Some(Key::Integer(7)));
        assert_eq!(record.key("missing"), None);

        let nullish = Record::new().with("id", Scalar::Null);
        assert_eq!(nullish.key("id"), None);
        assert_eq!(Key::from_scalar(&Scalar::Real(f64::NAN)), None);
    }

    #[test]
    fn test_record_json_shape() {
        let record = Record::from([("a", Scalar::from(1)), ("b", Scalar::from("x"))]);
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"a":1,"b":"x"}"#);
        let back: Record = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
