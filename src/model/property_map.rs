//! PropertyMap: the key-value store on nodes and relationships.

use std::collections::HashMap;
use super::Value;

/// A map of property names to values.
pub type PropertyMap = HashMap<String, Value>;

/// Build a [`PropertyMap`] from string pairs.
pub fn props<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> PropertyMap {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_owned(), Value::from(v)))
        .collect()
}
