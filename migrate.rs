// Whole-prefix operations: read a subtree, write a tree, copy between prefixes

use serde_json::Value;
use tracing::info;

use crate::errors::Result;
use crate::store::{StoreReader, StoreWriter};
use crate::tree::Tree;

/// Listing prefix and skip length for a user-supplied prefix.
///
/// `"cfg"` and `"cfg/"` both list `"cfg/"` and skip its four bytes, so that
/// `"cfg/db/host"` becomes `"db/host"`. An empty prefix lists everything.
pub fn prefix_skip(prefix: &str) -> (String, usize) {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() {
        return (String::new(), 0);
    }
    let listing = format!("{}/", trimmed);
    let skip = listing.len();
    (listing, skip)
}

/// Lists `prefix` and builds the tree below it
pub fn read_prefix<R>(reader: &R, prefix: &str) -> Result<Tree>
where
    R: StoreReader + ?Sized,
{
    let (listing, skip) = prefix_skip(prefix);
    let records = reader.list(&listing)?;
    let count = records.len();
    let tree = Tree::from_records(records, skip);
    info!(prefix = %listing, records = count, leaves = tree.leaf_count(), "read prefix");
    Ok(tree)
}

/// Writes every leaf of `tree` below `base`
pub fn write_tree<W>(writer: &W, tree: &Tree, base: &str) -> Result<usize>
where
    W: StoreWriter + ?Sized,
{
    let written = tree.update(base, writer)?;
    info!(base, written, "wrote tree");
    Ok(written)
}

/// Copies the subtree at `from` to `to`. Values travel as raw bytes.
pub fn copy_prefix<R, W>(reader: &R, writer: &W, from: &str, to: &str) -> Result<usize>
where
    R: StoreReader + ?Sized,
    W: StoreWriter + ?Sized,
{
    let tree = read_prefix(reader, from)?;
    write_tree(writer, &tree, to)
}

/// Converts a JSON document to a tree and writes it below `base`.
///
/// The whole document is validated before the first write, so an unsupported
/// value anywhere leaves the store untouched.
pub fn import_json<W>(writer: &W, document: &Value, base: &str) -> Result<usize>
where
    W: StoreWriter + ?Sized,
{
    let tree = Tree::from_json(document)?;
    write_tree(writer, &tree, base)
}
