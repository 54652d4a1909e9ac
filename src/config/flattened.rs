/**
 * Flattened configuration map
 *
 * The key/value tree handed to readers. Keys are folded to lowercase for
 * lookup while the spelling of the latest write is kept for output.
 * Entries live in one partition per tracked kind so a reload can swap a
 * single kind's keys. Serialises as a flat JSON object with the secret
 * partition taking precedence.
 */
use crate::k8s::cache::TrackedKind;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::BTreeMap;
use tracing::warn;

/// Flattened key/value view of every tracked resource.
///
/// Keys compare case-insensitively. Each [`TrackedKind`] owns one partition
/// that is replaced as a whole on reload, leaving the other partition
/// untouched. When both partitions hold the same key the secret value wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlattenedMap {
    partitions: BTreeMap<TrackedKind, Partition>,
}

/// Folded key -> (key as last written, value)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Partition {
    entries: BTreeMap<String, (String, String)>,
}

fn fold(key: &str) -> String {
    key.to_lowercase()
}

impl FlattenedMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every key owned by `kind` with `entries` and return the new
    /// partition size. A key repeated within `entries` keeps its last value.
    pub fn replace_partition<I>(&mut self, kind: TrackedKind, entries: I) -> usize
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut partition = Partition::default();
        for (key, value) in entries {
            if let Some((previous, _)) = partition.entries.insert(fold(&key), (key.clone(), value)) {
                warn!(
                    "Key {} in the {} partition collides with {}, keeping the later value",
                    key,
                    kind.partition(),
                    previous
                );
            }
        }

        let len = partition.entries.len();
        self.partitions.insert(kind, partition);
        len
    }

    pub fn clear_partition(&mut self, kind: TrackedKind) {
        self.partitions.remove(&kind);
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        let folded = fold(key);
        self.partitions
            .values()
            .rev()
            .find_map(|partition| partition.entries.get(&folded))
            .map(|(_, value)| value.as_str())
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Entries owned by `kind`, ordered by folded key
    pub fn partition(&self, kind: TrackedKind) -> impl Iterator<Item = (&str, &str)> {
        self.partitions
            .get(&kind)
            .into_iter()
            .flat_map(|partition| partition.entries.values())
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    #[must_use]
    pub fn partition_len(&self, kind: TrackedKind) -> usize {
        self.partitions
            .get(&kind)
            .map_or(0, |partition| partition.entries.len())
    }

    /// Merged view over both partitions, ordered by folded key
    #[must_use]
    pub fn entries(&self) -> Vec<(&str, &str)> {
        let mut merged: BTreeMap<&str, (&str, &str)> = BTreeMap::new();
        for partition in self.partitions.values() {
            for (folded, (key, value)) in &partition.entries {
                merged.insert(folded.as_str(), (key.as_str(), value.as_str()));
            }
        }
        merged.into_values().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.partitions
            .values()
            .all(|partition| partition.entries.is_empty())
    }

    /// Plain ordered dictionary handed to configuration consumers
    #[must_use]
    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.entries()
            .into_iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }
}

impl Serialize for FlattenedMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let entries = self.entries();
        let mut map = serializer.serialize_map(Some(entries.len()))?;
        for (key, value) in entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}
