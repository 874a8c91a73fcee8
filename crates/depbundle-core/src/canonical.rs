//! Deterministic ordering of resolver output.
//!
//! Resolvers and filesystem walks return packages in whatever order they
//! happen to produce them. Everything persisted for a request goes through
//! this module first so that two resolutions of the same inputs serialize to
//! the same bytes.
//!
//! Sorting and deduplication are deliberately separate steps:
//! [`unique_adjacent`] only drops *consecutive* duplicates and is only a
//! complete dedup when run on the output of [`sort_packages_and_deps`].

use crate::packages::{Dependency, Package};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::iter::FusedIterator;

/// List keys whose elements are unordered collections keyed by [`IDENTITY_KEY`].
pub const COLLECTION_KEYS: &[&str] = &["image_contents", "contents", "dependencies", "sources"];

/// Identity field of elements in a recognized collection.
pub const IDENTITY_KEY: &str = "purl";

/// Sort packages by `(type, dev, name, version)` and every package's
/// dependencies by `(name, version, type, dev)`.
///
/// Non-dev sorts before dev; an absent dev flag counts as non-dev. Versions
/// compare as plain strings. The sort is stable and removes nothing.
pub fn sort_packages_and_deps(packages: &mut [Package]) {
    packages.sort_by(compare_packages);
    for package in packages.iter_mut() {
        package.dependencies.sort_by(compare_dependencies);
    }
}

fn compare_packages(a: &Package, b: &Package) -> Ordering {
    a.kind
        .as_str()
        .cmp(b.kind.as_str())
        .then_with(|| a.is_dev().cmp(&b.is_dev()))
        .then_with(|| a.name.cmp(&b.name))
        .then_with(|| a.version.cmp(&b.version))
}

fn compare_dependencies(a: &Dependency, b: &Dependency) -> Ordering {
    a.name
        .cmp(&b.name)
        .then_with(|| a.version.cmp(&b.version))
        .then_with(|| a.kind.as_str().cmp(b.kind.as_str()))
        .then_with(|| a.is_dev().cmp(&b.is_dev()))
}

/// Iterator adapter returned by [`unique_adjacent`].
#[derive(Debug, Clone)]
pub struct UniqueAdjacent<I: Iterator> {
    iter: I,
    last: Option<I::Item>,
}

impl<I> Iterator for UniqueAdjacent<I>
where
    I: Iterator,
    I::Item: PartialEq + Clone,
{
    type Item = I::Item;

    fn next(&mut self) -> Option<Self::Item> {
        for item in self.iter.by_ref() {
            if self.last.as_ref() == Some(&item) {
                continue;
            }
            self.last = Some(item.clone());
            return Some(item);
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let (lower, upper) = self.iter.size_hint();
        (lower.min(1), upper)
    }
}

impl<I> FusedIterator for UniqueAdjacent<I>
where
    I: FusedIterator,
    I::Item: PartialEq + Clone,
{
}

/// Lazily yield every item except those equal to the item emitted just
/// before it.
///
/// Only consecutive duplicates are removed. Sort first for a full dedup.
pub fn unique_adjacent<I>(iter: I) -> UniqueAdjacent<I::IntoIter>
where
    I: IntoIterator,
    I::Item: PartialEq + Clone,
{
    UniqueAdjacent {
        iter: iter.into_iter(),
        last: None,
    }
}

/// Method form of [`unique_adjacent`].
pub trait UniqueAdjacentExt: Iterator + Sized {
    fn unique_adjacent(self) -> UniqueAdjacent<Self>
    where
        Self::Item: PartialEq + Clone,
    {
        UniqueAdjacent {
            iter: self,
            last: None,
        }
    }
}

impl<I: Iterator> UniqueAdjacentExt for I {}

/// Sort, then collapse exact duplicates among packages and within each
/// package's dependency list.
#[must_use]
pub fn canonical_packages(mut packages: Vec<Package>) -> Vec<Package> {
    sort_packages_and_deps(&mut packages);
    packages
        .into_iter()
        .unique_adjacent()
        .map(|mut package| {
            package.dependencies = std::mem::take(&mut package.dependencies)
                .into_iter()
                .unique_adjacent()
                .collect();
            package
        })
        .collect()
}

/// Recursively canonicalize a manifest-like document.
///
/// Object keys end up in alphabetical order. Lists stored under one of
/// [`COLLECTION_KEYS`] are stably sorted by the elements' [`IDENTITY_KEY`]
/// (missing identity sorts as the empty string). Any other list keeps its
/// order, since it may be meaningful (layer order, for instance), but its
/// elements are still canonicalized.
#[must_use]
pub fn deep_sort(document: Value) -> Value {
    match document {
        Value::Object(map) => Value::Object(sort_object(map)),
        Value::Array(items) => Value::Array(items.into_iter().map(deep_sort).collect()),
        other => other,
    }
}

fn sort_object(map: Map<String, Value>) -> Map<String, Value> {
    let mut entries: Vec<(String, Value)> = map.into_iter().collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    entries
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                Value::Array(items) if COLLECTION_KEYS.contains(&key.as_str()) => {
                    let mut items: Vec<Value> = items.into_iter().map(deep_sort).collect();
                    items.sort_by(|a, b| identity(a).cmp(identity(b)));
                    Value::Array(items)
                }
                other => deep_sort(other),
            };
            (key, value)
        })
        .collect()
}

fn identity(value: &Value) -> &str {
    value.get(IDENTITY_KEY).and_then(Value::as_str).unwrap_or("")
}
