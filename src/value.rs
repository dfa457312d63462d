use crate::path::{Key, Path};
use anyhow::{anyhow, Result};
use std::collections::BTreeMap;
use std::iter::FromIterator;
use std::sync::Arc;

/// The shape of a [`Value`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ValueKind {
    /// Absent or explicitly empty.
    Null,
    /// Boolean leaf.
    Bool,
    /// Unsigned integer leaf.
    U64,
    /// Signed integer leaf.
    I64,
    /// Utf8 string leaf.
    Str,
    /// Ordered sequence of values.
    Seq,
    /// Mapping from field names to values.
    Map,
}

/// A tree-shaped value: a leaf, a sequence, or a map.
///
/// Container payloads are shared, so cloning a value is cheap and a
/// rewritten tree keeps untouched sub-trees pointer-identical with its
/// predecessor. [`Value::same`] exploits this to answer "did this location
/// change" without a deep comparison; `PartialEq` remains the structural
/// comparison.
#[derive(Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Value {
    /// Absent or explicitly empty.
    Null,
    /// Boolean leaf.
    Bool(bool),
    /// Unsigned integer leaf.
    U64(u64),
    /// Signed integer leaf.
    I64(i64),
    /// Utf8 string leaf.
    Str(Arc<str>),
    /// Ordered sequence of values.
    Seq(Arc<Vec<Value>>),
    /// Mapping from field names to values.
    Map(Arc<BTreeMap<String, Value>>),
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl Value {
    /// Builds a sequence value.
    pub fn seq<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Value>,
    {
        Value::Seq(Arc::new(items.into_iter().map(Into::into).collect()))
    }

    /// Builds a map value.
    pub fn map<'a, I, T>(fields: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, T)>,
        T: Into<Value>,
    {
        Value::Map(Arc::new(
            fields
                .into_iter()
                .map(|(name, value)| (name.to_string(), value.into()))
                .collect(),
        ))
    }

    /// Returns the kind of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::U64(_) => ValueKind::U64,
            Value::I64(_) => ValueKind::I64,
            Value::Str(_) => ValueKind::Str,
            Value::Seq(_) => ValueKind::Seq,
            Value::Map(_) => ValueKind::Map,
        }
    }

    /// Returns true if the value is [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the `bool`.
    pub fn as_bool(&self) -> Result<bool> {
        if let Value::Bool(b) = self {
            Ok(*b)
        } else {
            Err(anyhow!("{} is not a bool", self))
        }
    }

    /// Returns the `u64`.
    pub fn as_u64(&self) -> Result<u64> {
        if let Value::U64(u) = self {
            Ok(*u)
        } else {
            Err(anyhow!("{} is not a u64", self))
        }
    }

    /// Returns the `i64`.
    pub fn as_i64(&self) -> Result<i64> {
        if let Value::I64(i) = self {
            Ok(*i)
        } else {
            Err(anyhow!("{} is not an i64", self))
        }
    }

    /// Returns the `&str`.
    pub fn as_str(&self) -> Result<&str> {
        if let Value::Str(s) = self {
            Ok(s)
        } else {
            Err(anyhow!("{} is not a string", self))
        }
    }

    /// Returns the sequence items.
    pub fn items(&self) -> Option<&[Value]> {
        if let Value::Seq(items) = self {
            Some(items)
        } else {
            None
        }
    }

    /// Returns the map fields.
    pub fn fields(&self) -> Option<&BTreeMap<String, Value>> {
        if let Value::Map(fields) = self {
            Some(fields)
        } else {
            None
        }
    }

    /// Returns the child at `key`, or [`Value::Null`] if absent.
    pub fn get(&self, key: &Key) -> Value {
        match (self, key) {
            (Value::Map(fields), Key::Field(name)) => {
                fields.get(&**name).cloned().unwrap_or(Value::Null)
            }
            (Value::Seq(items), Key::Index(ix)) => items.get(*ix).cloned().unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }

    /// Reads the value at `path`, or [`Value::Null`] if the location is absent.
    pub fn pluck(&self, path: Path<'_>) -> Value {
        let mut value = self.clone();
        for key in path {
            value = value.get(key);
        }
        value
    }

    /// Returns a new tree with the location at `path` replaced by `to`.
    ///
    /// Every container on the spine is shallow-copied; all other sub-trees
    /// are shared with `self`. Writing a field that does not exist yet
    /// creates it (maps are grown, sequences are not).
    pub fn replace(&self, path: Path<'_>, to: Value) -> Result<Value> {
        let (key, rest) = match path.split_first() {
            Some(split) => split,
            None => return Ok(to),
        };
        match (self, key) {
            (Value::Map(fields), Key::Field(name)) => {
                let child = fields.get(&**name).cloned().unwrap_or(Value::Null);
                let mut fields = (**fields).clone();
                fields.insert(name.to_string(), child.replace(rest, to)?);
                Ok(Value::Map(Arc::new(fields)))
            }
            (Value::Null, Key::Field(name)) => {
                let mut fields = BTreeMap::new();
                fields.insert(name.to_string(), Value::Null.replace(rest, to)?);
                Ok(Value::Map(Arc::new(fields)))
            }
            (Value::Seq(items), Key::Index(ix)) => {
                if *ix >= items.len() {
                    return Err(anyhow!("index {} out of bounds (len {})", ix, items.len()));
                }
                let mut items = (**items).clone();
                items[*ix] = items[*ix].replace(rest, to)?;
                Ok(Value::Seq(Arc::new(items)))
            }
            _ => Err(anyhow!("cannot descend into {:?} with key {:?}", self.kind(), key)),
        }
    }

    /// Identity comparison: containers compare by pointer, leaves by value.
    ///
    /// Under the immutability contract a location only becomes a different
    /// pointer when something at or below it was rewritten, which makes this
    /// the cheap default for change suppression.
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::U64(a), Value::U64(b)) => a == b,
            (Value::I64(a), Value::I64(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => Arc::ptr_eq(a, b) || a == b,
            (Value::Seq(a), Value::Seq(b)) => Arc::ptr_eq(a, b),
            (Value::Map(a), Value::Map(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<u64> for Value {
    fn from(u: u64) -> Self {
        Value::U64(u)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::I64(i)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s.into())
    }
}

impl FromIterator<Value> for Value {
    fn from_iter<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        Value::Seq(Arc::new(iter.into_iter().collect()))
    }
}

impl FromIterator<(String, Value)> for Value {
    fn from_iter<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        Value::Map(Arc::new(iter.into_iter().collect()))
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::U64(u) => write!(f, "{}", u),
            Self::I64(i) => write!(f, "{}", i),
            Self::Str(s) => write!(f, "{:?}", s),
            Self::Seq(items) => f.debug_list().entries(items.iter()).finish(),
            Self::Map(fields) => f.debug_map().entries(fields.iter()).finish(),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::PathBuf;

    fn person(name: &str) -> Value {
        Value::map([("name", name)])
    }

    #[test]
    fn pluck() {
        let root = Value::map([("people", Value::seq([person("John"), person("Jack")]))]);
        let mut p = PathBuf::new();
        p.field("people");
        p.index(1);
        p.field("name");
        assert_eq!(root.pluck(p.as_path()), Value::from("Jack"));
        p.field("missing");
        assert!(root.pluck(p.as_path()).is_null());
    }

    #[test]
    fn replace_shares_siblings() {
        let root = Value::map([("people", Value::seq([person("John"), person("Jack")]))]);
        let mut p = PathBuf::new();
        p.field("people");
        p.index(1);
        p.field("name");
        let next = root.replace(p.as_path(), "Josef".into()).unwrap();

        assert_eq!(next.pluck(p.as_path()), Value::from("Josef"));
        // untouched sibling keeps its pointer
        let mut q = PathBuf::new();
        q.field("people");
        q.index(0);
        assert!(root.pluck(q.as_path()).same(&next.pluck(q.as_path())));
        // rewritten spine does not
        let mut people = PathBuf::new();
        people.field("people");
        assert!(!root.pluck(people.as_path()).same(&next.pluck(people.as_path())));
    }

    #[test]
    fn replace_creates_missing_fields() {
        let next = Value::Null
            .replace(
                [Key::from("a"), Key::from("b")]
                    .into_iter()
                    .collect::<PathBuf>()
                    .as_path(),
                42u64.into(),
            )
            .unwrap();
        assert_eq!(
            next,
            Value::map([("a", Value::map([("b", Value::from(42u64))]))])
        );
    }

    #[test]
    fn replace_rejects_bad_addressing() {
        let root = Value::seq([Value::from(1u64)]);
        let p: PathBuf = [Key::from(3usize)].into_iter().collect();
        assert!(root.replace(p.as_path(), Value::Null).is_err());
        let q: PathBuf = [Key::from("a")].into_iter().collect();
        assert!(root.replace(q.as_path(), Value::Null).is_err());
    }

    #[test]
    fn same_is_pointer_identity_on_containers() {
        let a = Value::seq([person("Jill")]);
        let b = a.clone();
        assert!(a.same(&b));
        let c = Value::seq([person("Jill")]);
        assert!(!a.same(&c));
        assert_eq!(a, c);
        assert!(Value::from(12u64).same(&Value::from(12u64)));
        assert!(!Value::from(12u64).same(&Value::from(13u64)));
    }
}
