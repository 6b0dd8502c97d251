//! The per-worker object model.
//!
//! Every worker owns a dense list of objects it may ever touch, keyed by a
//! fixed-layout name: a 6-character prefix (the `"ov"` tag, a 2-hex-digit
//! process tag, and a 2-hex-digit worker tag) followed by the low 6 hex
//! digits of the object ID, 12 characters in total. The key ID offset
//! `(process_id << 32) | (worker_index << 24)` makes every
//! (process, worker) pair own a disjoint slice of the 40-bit ID space, so
//! workers never contend on a key.
//!
//! [`ObjectMeta`] is single-threaded by design: exactly one worker mutates
//! one instance. Sharing an instance between tasks is a bug.

use std::collections::HashSet;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Fixed tag every ovid key starts with.
pub const KEY_SHORT_PREFIX: &str = "ov";

/// Length of the common key prefix: tag + process tag + worker tag.
pub const KEY_PREFIX_LENGTH: usize = 6;

/// Total key length: tag + 10 hex digits of object ID.
pub const MAX_KEY_LENGTH: usize = 12;

/// One object the workload may create, overwrite, and delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Object {
    /// Fixed-layout object key.
    pub key: String,
    /// Expected byte length, 0 while the object does not exist remotely.
    pub size: usize,
    /// Monotonic generation counter, incremented on every successful PUT.
    #[serde(rename = "writeCount")]
    pub write_count: u32,
}

impl Object {
    fn new(obj_id: u64) -> Self {
        Self {
            key: generate_key(obj_id),
            size: 0,
            write_count: 0,
        }
    }

    /// Resets the object to the non-existent state after a verified DELETE.
    pub fn clear(&mut self) {
        self.size = 0;
        self.write_count = 0;
    }
}

fn generate_key(obj_id: u64) -> String {
    format!("{KEY_SHORT_PREFIX}{obj_id:010x}")
}

/// The per-(worker, bucket) registry of objects and their expected state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// All objects this registry may ever touch, indexed by intra-worker
    /// object index.
    #[serde(rename = "objectList")]
    object_list: Vec<Object>,
    /// Ordered intra-worker indices known to exist remotely. No duplicates.
    #[serde(rename = "existingObjectIDs")]
    existing_object_ids: Vec<u64>,
    /// Membership mirror of `existing_object_ids` for O(1) lookups.
    ///
    /// Not persisted; rebuilt by [`ObjectMeta::tidy_up`] after load.
    #[serde(skip)]
    existing_object_id_set: HashSet<u64>,
    /// Base object ID of this registry: `(process_id << 32) | (worker << 24)`.
    #[serde(rename = "keyIDOffset")]
    key_id_offset: u64,
    /// Common 6-character prefix of every key in `object_list`.
    ///
    /// Not persisted; rebuilt by [`ObjectMeta::tidy_up`] after load.
    #[serde(skip)]
    key_prefix: String,
}

impl ObjectMeta {
    /// Creates a registry of `num_obj` objects starting at `key_id_offset`.
    ///
    /// `num_obj` must be at least 1; the runner validates worker counts
    /// before construction.
    #[must_use]
    pub fn new(num_obj: usize, key_id_offset: u64) -> Self {
        let object_list = (0..num_obj as u64)
            .map(|i| Object::new(key_id_offset + i))
            .collect();
        Self {
            object_list,
            existing_object_ids: Vec::new(),
            existing_object_id_set: HashSet::new(),
            key_id_offset,
            key_prefix: generate_key(key_id_offset)[..KEY_PREFIX_LENGTH].to_string(),
        }
    }

    /// Returns a uniformly random intra-worker object index.
    #[must_use]
    pub fn random_index(&self) -> usize {
        rand::thread_rng().gen_range(0..self.object_list.len())
    }

    /// Returns a uniformly random index among the objects known to exist,
    /// or `None` when nothing exists yet.
    #[must_use]
    pub fn random_existing_index(&self) -> Option<usize> {
        if self.existing_object_ids.is_empty() {
            return None;
        }
        let pos = rand::thread_rng().gen_range(0..self.existing_object_ids.len());
        Some(self.existing_object_ids[pos] as usize)
    }

    /// Removes and returns a uniformly random existing index.
    ///
    /// Removal is swap-with-last-then-truncate, so it is O(1) and does not
    /// preserve order. The membership set is updated in lockstep.
    pub fn pop_random_existing(&mut self) -> Result<Option<usize>> {
        if self.existing_object_ids.is_empty() {
            return Ok(None);
        }
        let pos = rand::thread_rng().gen_range(0..self.existing_object_ids.len());
        let index = self.existing_object_ids.swap_remove(pos);
        if !self.existing_object_id_set.remove(&index) {
            return Err(Error::internal(format!(
                "object index {index:#x} found in the existing list but not in the membership set"
            )));
        }
        Ok(Some(index as usize))
    }

    /// Registers a key as existing remotely. Idempotent.
    pub fn register_existing(&mut self, key: &str) -> Result<()> {
        let Some(index) = self.index_of(key) else {
            return Err(Error::internal(format!(
                "key {key} does not belong to this registry"
            )));
        };
        if self.existing_object_id_set.contains(&index) {
            return Ok(());
        }
        self.existing_object_ids.push(index);
        self.existing_object_id_set.insert(index);
        if self.object_list.len() < self.existing_object_ids.len() {
            return Err(Error::internal(
                "existing object list grew past the object list".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns true if the key is known to exist remotely.
    ///
    /// Keys that do not belong to this registry are reported as absent.
    #[must_use]
    pub fn exist(&self, key: &str) -> bool {
        self.index_of(key)
            .is_some_and(|index| self.existing_object_id_set.contains(&index))
    }

    /// Returns a shared reference to the object at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds; indices come from this
    /// registry's own selection methods.
    #[must_use]
    pub fn object(&self, index: usize) -> &Object {
        &self.object_list[index]
    }

    /// Returns an exclusive reference to the object at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds; indices come from this
    /// registry's own selection methods.
    #[must_use]
    pub fn object_mut(&mut self, index: usize) -> &mut Object {
        &mut self.object_list[index]
    }

    /// Returns the keys of the first and last object, for logging.
    #[must_use]
    pub fn head_tail_keys(&self) -> (&str, &str) {
        (
            &self.object_list[0].key,
            &self.object_list[self.object_list.len() - 1].key,
        )
    }

    /// Number of objects known to exist remotely.
    #[must_use]
    pub fn existing_count(&self) -> usize {
        self.existing_object_ids.len()
    }

    /// Total number of objects this registry may touch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.object_list.len()
    }

    /// Returns true if the registry owns no objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.object_list.is_empty()
    }

    /// Common 6-character prefix of every key, used as the LIST filter.
    #[must_use]
    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    /// Base object ID of this registry.
    #[must_use]
    pub fn key_id_offset(&self) -> u64 {
        self.key_id_offset
    }

    /// Rebuilds the derived state after deserialization: the membership
    /// set from the persisted index list, and the key prefix from the
    /// key ID offset.
    pub fn tidy_up(&mut self) {
        self.existing_object_id_set = self.existing_object_ids.iter().copied().collect();
        self.key_prefix = generate_key(self.key_id_offset)[..KEY_PREFIX_LENGTH].to_string();
    }

    /// Maps a key back to its intra-worker index, or `None` when the key is
    /// malformed or outside this registry's ID slice.
    fn index_of(&self, key: &str) -> Option<u64> {
        if key.len() != MAX_KEY_LENGTH || !key.starts_with(KEY_SHORT_PREFIX) {
            return None;
        }
        let obj_id = u64::from_str_radix(&key[KEY_SHORT_PREFIX.len()..], 16).ok()?;
        let index = obj_id.checked_sub(self.key_id_offset)?;
        (index < self.object_list.len() as u64).then_some(index)
    }
}
