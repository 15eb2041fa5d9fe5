// Trie of path segments built from flat slash-delimited keys
// Converts store listings into nested trees and pushes trees back as flat writes

use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Map, Number, Value};
use tracing::{debug, trace, warn};

use crate::errors::{KvTreeError, Result};
use crate::store::{FlatRecord, StoreWriter};

/// A stored value before it is coerced to bytes
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Bytes(Vec<u8>),
    Text(String),
    Int(i64),
    Float(f64),
}

/// A tree slot holds either a value or a subtree, never both
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Leaf(Scalar),
    Branch(Tree),
}

/// Nested mapping from path segment to node
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tree {
    entries: BTreeMap<String, Node>,
}

impl Scalar {
    /// Canonical byte form written to the store.
    ///
    /// Floats keep only their integer part (`3.9` becomes `"3"`), which
    /// matches what existing migrations produced. NaN becomes `"0"` and
    /// infinities saturate to the i64 bounds.
    pub fn coerce(&self) -> Vec<u8> {
        match self {
            Scalar::Bytes(b) => b.clone(),
            Scalar::Text(s) => s.as_bytes().to_vec(),
            Scalar::Int(i) => i.to_string().into_bytes(),
            Scalar::Float(f) => (*f as i64).to_string().into_bytes(),
        }
    }

    /// Converts a JSON value found at `path` into a scalar.
    ///
    /// Objects are handled by [`Tree::from_json`]; everything that is not a
    /// string or a number has no byte form and is rejected.
    pub fn from_json(value: &Value, path: &str) -> Result<Self> {
        match value {
            Value::String(s) => Ok(Scalar::Text(s.clone())),
            Value::Number(n) => match (n.as_i64(), n.as_u64()) {
                (Some(i), _) => Ok(Scalar::Int(i)),
                // past i64::MAX; keep the exact digits instead of saturating
                (None, Some(_)) => Ok(Scalar::Text(n.to_string())),
                (None, None) => n.as_f64().map(Scalar::Float).ok_or_else(|| unsupported(path, "number")),
            },
            Value::Bool(_) => Err(unsupported(path, "boolean")),
            Value::Null => Err(unsupported(path, "null")),
            Value::Array(_) => Err(unsupported(path, "array")),
            Value::Object(_) => Err(unsupported(path, "object")),
        }
    }

    fn to_json(&self) -> Value {
        match self {
            Scalar::Bytes(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
            Scalar::Text(s) => Value::String(s.clone()),
            Scalar::Int(i) => Value::Number((*i).into()),
            Scalar::Float(f) => match Number::from_f64(*f) {
                Some(n) => Value::Number(n),
                None => Value::String(String::from_utf8_lossy(&self.coerce()).into_owned()),
            },
        }
    }
}

fn unsupported(path: &str, kind: &'static str) -> KvTreeError {
    KvTreeError::UnsupportedValue {
        path: path.to_string(),
        kind,
    }
}

impl From<Vec<u8>> for Scalar {
    fn from(b: Vec<u8>) -> Self {
        Scalar::Bytes(b)
    }
}

impl From<&[u8]> for Scalar {
    fn from(b: &[u8]) -> Self {
        Scalar::Bytes(b.to_vec())
    }
}

impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Scalar::Text(s)
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::Text(s.to_string())
    }
}

impl From<i64> for Scalar {
    fn from(i: i64) -> Self {
        Scalar::Int(i)
    }
}

impl From<f64> for Scalar {
    fn from(f: f64) -> Self {
        Scalar::Float(f)
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bytes(b) => write!(f, "{}", String::from_utf8_lossy(b)),
            Scalar::Text(s) => write!(f, "{}", s),
            Scalar::Int(i) => write!(f, "{}", i),
            Scalar::Float(x) => write!(f, "{}", x),
        }
    }
}

impl Tree {
    pub fn new() -> Self {
        Tree::default()
    }

    /// Builds a tree from a store listing, dropping `skip` leading bytes of
    /// every key (the listed prefix plus its separator).
    pub fn from_records<I>(records: I, skip: usize) -> Self
    where
        I: IntoIterator<Item = FlatRecord>,
    {
        let mut tree = Tree::new();
        tree.build(records, skip);
        tree
    }

    /// Inserts records in order; a later record wins over an earlier one
    /// that lands on the same slot.
    pub fn build<I>(&mut self, records: I, skip: usize)
    where
        I: IntoIterator<Item = FlatRecord>,
    {
        let mut inserted = 0usize;
        for record in records {
            match record.key.get(skip..) {
                Some(relative) => {
                    self.insert(relative, record.value);
                    inserted += 1;
                }
                None => {
                    warn!(key = %record.key, skip, "key does not carry the listed prefix, skipping");
                }
            }
        }
        debug!(inserted, skip, "built tree from records");
    }

    /// Inserts `value` at the slash-delimited `key`, creating branches on
    /// the way down.
    ///
    /// An empty key does nothing. A leaf sitting where a branch is needed is
    /// discarded, and a terminal segment replaces whatever was at its slot.
    pub fn insert(&mut self, key: &str, value: Scalar) {
        if key.is_empty() {
            return;
        }

        match key.split_once('/') {
            None => {
                self.entries.insert(key.to_string(), Node::Leaf(value));
            }
            Some((head, rest)) => {
                let slot = self
                    .entries
                    .entry(head.to_string())
                    .or_insert_with(|| Node::Branch(Tree::new()));

                if let Node::Leaf(_) = slot {
                    *slot = Node::Branch(Tree::new());
                }

                if let Node::Branch(sub) = slot {
                    sub.insert(rest, value);
                }
            }
        }
    }

    /// Writes every leaf to `writer` under `base`, one put per leaf.
    ///
    /// Stops at the first failed write and returns its error. Writes that
    /// already went through are left in place. Returns the number of puts.
    pub fn update<W>(&self, base: &str, writer: &W) -> Result<usize>
    where
        W: StoreWriter + ?Sized,
    {
        let base = base.strip_suffix('/').unwrap_or(base);
        debug!(base, leaves = self.leaf_count(), "writing tree");
        let mut written = 0;
        self.update_at(base, writer, &mut written)?;
        Ok(written)
    }

    fn update_at<W>(&self, base: &str, writer: &W, written: &mut usize) -> Result<()>
    where
        W: StoreWriter + ?Sized,
    {
        for (segment, node) in &self.entries {
            let key = format!("{}/{}", base, segment);
            match node {
                Node::Branch(sub) => sub.update_at(&key, writer, written)?,
                Node::Leaf(value) => {
                    // an empty base leaves a leading slash behind
                    let key = key.strip_prefix('/').unwrap_or(key.as_str());
                    trace!(key, "put");
                    writer.put(key, &value.coerce())?;
                    *written += 1;
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, segment: &str) -> Option<&Node> {
        self.entries.get(segment)
    }

    /// Follows a slash-delimited path down the tree.
    pub fn lookup(&self, path: &str) -> Option<&Node> {
        let (head, rest) = match path.split_once('/') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };
        match (self.entries.get(head)?, rest) {
            (node, None) => Some(node),
            (Node::Branch(sub), Some(rest)) => sub.lookup(rest),
            (Node::Leaf(_), Some(_)) => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Node)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of levels below this one; an empty tree has depth 0.
    pub fn depth(&self) -> usize {
        self.entries
            .values()
            .map(|node| match node {
                Node::Leaf(_) => 1,
                Node::Branch(sub) => 1 + sub.depth(),
            })
            .max()
            .unwrap_or(0)
    }

    pub fn leaf_count(&self) -> usize {
        self.entries
            .values()
            .map(|node| match node {
                Node::Leaf(_) => 1,
                Node::Branch(sub) => sub.leaf_count(),
            })
            .sum()
    }

    /// Renders the tree as a JSON object. Raw byte values are shown as
    /// (lossy) UTF-8 strings.
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        for (segment, node) in &self.entries {
            let value = match node {
                Node::Leaf(scalar) => scalar.to_json(),
                Node::Branch(sub) => sub.to_json(),
            };
            map.insert(segment.clone(), value);
        }
        Value::Object(map)
    }

    /// Parses a JSON object into a tree. Nested objects become branches,
    /// strings and numbers become leaves.
    pub fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::Object(map) => Self::from_json_object(map, ""),
            _ => Err(unsupported("", "non-object document root")),
        }
    }

    fn from_json_object(map: &Map<String, Value>, path: &str) -> Result<Self> {
        let mut tree = Tree::new();
        for (segment, value) in map {
            let child = if path.is_empty() {
                segment.clone()
            } else {
                format!("{}/{}", path, segment)
            };
            let node = match value {
                Value::Object(sub) => Node::Branch(Self::from_json_object(sub, &child)?),
                other => Node::Leaf(Scalar::from_json(other, &child)?),
            };
            tree.entries.insert(segment.clone(), node);
        }
        Ok(tree)
    }
}

// key: value lines, branches wrapped in braces
impl fmt::Display for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (segment, node) in &self.entries {
            match node {
                Node::Branch(sub) => writeln!(f, "{}: {{{}}},", segment, sub)?,
                Node::Leaf(value) => writeln!(f, "{}: {}", segment, value)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn record(key: &str, value: &str) -> FlatRecord {
        FlatRecord::new(key, value.as_bytes().to_vec())
    }

    fn leaf(tree: &Tree, path: &str) -> Option<Scalar> {
        match tree.lookup(path)? {
            Node::Leaf(v) => Some(v.clone()),
            Node::Branch(_) => None,
        }
    }

    #[test]
    fn test_coerce_table() {
        assert_eq!(Scalar::Int(42).coerce(), b"42".to_vec());
        assert_eq!(Scalar::Int(-7).coerce(), b"-7".to_vec());
        assert_eq!(Scalar::from("hi").coerce(), b"hi".to_vec());
        assert_eq!(Scalar::Bytes(vec![1, 2]).coerce(), vec![1, 2]);
    }

    #[test]
    fn test_coerce_float_truncates() {
        // truncation, not rounding, is the established behavior
        assert_eq!(Scalar::Float(3.9).coerce(), b"3".to_vec());
        assert_eq!(Scalar::Float(-3.9).coerce(), b"-3".to_vec());
        assert_eq!(Scalar::Float(0.5).coerce(), b"0".to_vec());
        assert_eq!(Scalar::Float(f64::NAN).coerce(), b"0".to_vec());
    }

    #[test]
    fn test_empty_key_is_noop() {
        let mut tree = Tree::new();
        tree.insert("a", Scalar::from("1"));
        let before = tree.clone();

        tree.insert("", Scalar::from("ignored"));
        assert_eq!(tree, before);
    }

    #[test]
    fn test_insert_twice_is_idempotent() {
        let mut once = Tree::new();
        once.insert("x/y", Scalar::from("v"));

        let mut twice = Tree::new();
        twice.insert("x/y", Scalar::from("v"));
        twice.insert("x/y", Scalar::from("v"));

        assert_eq!(once, twice);
    }

    #[test]
    fn test_leaf_overwrites_branch() {
        // collisions overwrite silently instead of failing
        let mut tree = Tree::new();
        tree.insert("a/b", Scalar::from("deep"));
        tree.insert("a", Scalar::from("flat"));

        assert_eq!(tree.get("a"), Some(&Node::Leaf(Scalar::from("flat"))));
    }

    #[test]
    fn test_branch_overwrites_leaf() {
        let mut tree = Tree::new();
        tree.insert("a", Scalar::from("flat"));
        tree.insert("a/b", Scalar::from("deep"));

        assert_eq!(leaf(&tree, "a/b"), Some(Scalar::from("deep")));
        assert_eq!(tree.leaf_count(), 1);
    }

    #[test]
    fn test_trailing_slash_creates_empty_branch() {
        let mut tree = Tree::new();
        tree.insert("folder/", Scalar::from(""));

        assert_eq!(tree.get("folder"), Some(&Node::Branch(Tree::new())));
        assert_eq!(tree.leaf_count(), 0);
    }

    #[test]
    fn test_build_strips_prefix() {
        let records = vec![
            record("cfg/db/host", "db1"),
            record("cfg/db/port", "5432"),
            record("cfg/app/name", "svc"),
        ];
        let tree = Tree::from_records(records, "cfg/".len());

        assert_eq!(
            tree.to_json(),
            json!({"db": {"host": "db1", "port": "5432"}, "app": {"name": "svc"}})
        );
    }

    #[test]
    fn test_build_last_write_wins() {
        let records = vec![record("k", "first"), record("k", "second")];
        let tree = Tree::from_records(records, 0);

        assert_eq!(leaf(&tree, "k"), Some(Scalar::Bytes(b"second".to_vec())));
    }

    #[test]
    fn test_build_skips_short_keys() {
        let records = vec![record("cf", "short"), record("cfg/ok", "yes")];
        let tree = Tree::from_records(records, "cfg/".len());

        assert_eq!(tree.len(), 1);
        assert!(tree.get("ok").is_some());
    }

    #[test]
    fn test_depth() {
        let mut tree = Tree::new();
        assert_eq!(tree.depth(), 0);

        tree.insert("a/b/c/d", Scalar::from("bottom"));
        assert_eq!(tree.depth(), 4);
        assert_eq!(tree.leaf_count(), 1);
        assert_eq!(leaf(&tree, "a/b/c/d"), Some(Scalar::from("bottom")));
    }

    #[test]
    fn test_update_with_base() {
        let records = vec![
            record("cfg/db/host", "db1"),
            record("cfg/db/port", "5432"),
            record("cfg/app/name", "svc"),
        ];
        let tree = Tree::from_records(records, 4);
        let store = MemoryStore::new();

        let written = tree.update("cfg", &store).unwrap();
        assert_eq!(written, 3);
        assert_eq!(
            store.entries(),
            vec![
                ("cfg/app/name".to_string(), b"svc".to_vec()),
                ("cfg/db/host".to_string(), b"db1".to_vec()),
                ("cfg/db/port".to_string(), b"5432".to_vec()),
            ]
        );
    }

    #[test]
    fn test_update_empty_base() {
        let mut tree = Tree::new();
        tree.insert("a/b/c/d", Scalar::from("x"));
        let store = MemoryStore::new();

        tree.update("", &store).unwrap();
        assert_eq!(store.entries(), vec![("a/b/c/d".to_string(), b"x".to_vec())]);
    }

    #[test]
    fn test_update_trailing_slash_base() {
        let mut tree = Tree::new();
        tree.insert("n", Scalar::Int(5));
        let store = MemoryStore::new();

        tree.update("dest/", &store).unwrap();
        assert_eq!(store.entries(), vec![("dest/n".to_string(), b"5".to_vec())]);
    }

    #[test]
    fn test_update_trims_one_trailing_slash() {
        let mut tree = Tree::new();
        tree.insert("n", Scalar::Int(5));
        let store = MemoryStore::new();

        tree.update("dest//", &store).unwrap();
        assert_eq!(store.entries(), vec![("dest//n".to_string(), b"5".to_vec())]);
    }

    #[test]
    fn test_from_json() {
        let doc = json!({"svc": {"replicas": 3, "ratio": 0.75, "name": "api"}});
        let tree = Tree::from_json(&doc).unwrap();

        assert_eq!(leaf(&tree, "svc/replicas"), Some(Scalar::Int(3)));
        assert_eq!(leaf(&tree, "svc/ratio"), Some(Scalar::Float(0.75)));
        assert_eq!(leaf(&tree, "svc/name"), Some(Scalar::from("api")));
        assert_eq!(tree.to_json(), doc);
    }

    #[test]
    fn test_from_json_keeps_large_unsigned_digits() {
        let doc = json!({"big": 18446744073709551615u64, "edge": 9223372036854775807i64});
        let tree = Tree::from_json(&doc).unwrap();

        assert_eq!(leaf(&tree, "big"), Some(Scalar::from("18446744073709551615")));
        assert_eq!(leaf(&tree, "edge"), Some(Scalar::Int(i64::MAX)));

        let store = MemoryStore::new();
        tree.update("x", &store).unwrap();
        assert_eq!(store.get("x/big"), Some(b"18446744073709551615".to_vec()));
    }

    #[test]
    fn test_from_json_rejects_bool() {
        let doc = json!({"feature": {"enabled": true}});
        match Tree::from_json(&doc) {
            Err(KvTreeError::UnsupportedValue { path, kind }) => {
                assert_eq!(path, "feature/enabled");
                assert_eq!(kind, "boolean");
            }
            other => panic!("expected unsupported value, got {:?}", other),
        }
    }

    #[test]
    fn test_from_json_rejects_non_object_root() {
        assert!(Tree::from_json(&json!("plain")).is_err());
        assert!(Tree::from_json(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_display() {
        let mut tree = Tree::new();
        tree.insert("db/host", Scalar::from("db1"));
        tree.insert("name", Scalar::from("svc"));

        assert_eq!(tree.to_string(), "db: {host: db1\n},\nname: svc\n");
    }
}
