//! Centroid-based grouping on top of a [`Collection`].
//!
//! A group is an item of kind [`ItemKind::Group`] whose identity is
//! derived from its definition: the parent key it lives under plus the
//! set of center keys that seed it. Creating the same definition twice
//! yields the same key, so group creation is idempotent.
//!
//! Membership is signed and bidirectional: the group's `members` map
//! and the member's `groups` map both record `+1` (active) or `-1`
//! (removed). A removal is an edit, not an erasure, so membership
//! history survives replays of the append log.
//!
//! The group's centroid is the element-wise median of its active
//! members' vectors, computed lazily and cached on the group item's own
//! `vec`. Any membership change drops the cache. Scores returned by
//! [`Groups::add_member`] are measured against the centroid as it stood
//! before the add; staleness is accepted.

use std::collections::BTreeSet;

use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::hash::hash32_str;
use crate::item::{Item, ItemKind};
use crate::store::Collection;
use crate::vector::{cosine_similarity, median_vector};

/// Seed for group-key derivation. Fixed so keys are stable across
/// processes and runs.
pub const GROUP_KEY_SEED: u32 = 0x6772_7570;

/// What identifies a group: its parent key and the ordered set of
/// center keys. Centers are a `BTreeSet`, so two definitions with the
/// same centers in different order derive the same key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupDefinition {
    pub parent: String,
    pub centers: BTreeSet<String>,
}

impl GroupDefinition {
    pub fn new<I, S>(parent: impl Into<String>, centers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            parent: parent.into(),
            centers: centers.into_iter().map(Into::into).collect(),
        }
    }

    /// Deterministic group key: `{parent}#{hex of definition hash}`.
    pub fn key(&self) -> String {
        let mut canonical = self.parent.clone();
        for center in &self.centers {
            canonical.push('\n');
            canonical.push_str(center);
        }
        format!(
            "{}#{:08x}",
            self.parent,
            hash32_str(&canonical, GROUP_KEY_SEED)
        )
    }

    /// The definition obtained by adding one more center.
    pub fn with_center(&self, center: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.centers.insert(center.into());
        next
    }
}

/// Grouping operations over a shared [`Collection`].
#[derive(Clone)]
pub struct Groups {
    collection: Collection,
}

impl Groups {
    pub fn new(collection: Collection) -> Self {
        Self { collection }
    }

    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    /// Create the group for `definition`, or return it unchanged if the
    /// derived key already exists.
    pub fn create_group(&self, definition: &GroupDefinition) -> Item {
        let key = definition.key();
        if let Some(existing) = self.collection.get(&key) {
            return existing;
        }
        let mut item = Item::new(&key, ItemKind::Group);
        item.data.insert("parent".into(), json!(definition.parent));
        item.data.insert(
            "centers".into(),
            json!(definition.centers.iter().collect::<Vec<_>>()),
        );
        item.data.insert("members".into(), json!({}));
        self.collection.create_or_update(item)
    }

    /// Mark `member_key` active in the group (and the group active on
    /// the member), invalidate the cached centroid, and return the
    /// member's similarity against the centroid as it stood before the
    /// add. `None` when either side has no vector yet.
    pub fn add_member(&self, group_key: &str, member_key: &str) -> Result<Option<f32>> {
        let member = self.collection.get(member_key).ok_or_else(|| Error::NotFound {
            key: member_key.to_string(),
        })?;

        let score = match (self.centroid(group_key)?, &member.vec) {
            (Some(centroid), Some(vec)) => Some(cosine_similarity(&centroid, vec)),
            _ => None,
        };

        self.set_membership(group_key, member_key, 1)?;
        Ok(score)
    }

    /// Mark `member_key` removed (`-1`) on both sides and invalidate
    /// the cached centroid.
    pub fn remove_member(&self, group_key: &str, member_key: &str) -> Result<()> {
        self.set_membership(group_key, member_key, -1)
    }

    fn set_membership(&self, group_key: &str, member_key: &str, state: i64) -> Result<()> {
        let mut group = self.collection.get(group_key).ok_or_else(|| Error::NotFound {
            key: group_key.to_string(),
        })?;
        group.set_member(member_key, state);
        group.vec = None;
        self.collection.create_or_update(group);
        // updates merge, so an absent vec on the draft would keep the
        // stale cache alive
        self.collection.clear_vec(group_key)?;

        if let Some(mut member) = self.collection.get(member_key) {
            member.set_group_link(group_key, state);
            self.collection.create_or_update(member);
        }
        Ok(())
    }

    /// Keys of the group's currently active members.
    pub fn active_members(&self, group_key: &str) -> Result<Vec<String>> {
        let group = self.collection.get(group_key).ok_or_else(|| Error::NotFound {
            key: group_key.to_string(),
        })?;
        Ok(group
            .members()
            .iter()
            .filter(|(_, state)| state.as_i64() == Some(1))
            .map(|(key, _)| key.clone())
            .collect())
    }

    /// Copy-on-write center addition: derives the key for the widened
    /// definition and creates a new group under it carrying the old
    /// group's membership, including the reciprocal `groups` links on
    /// every copied member. The original group is untouched.
    pub fn add_center(&self, group_key: &str, center_key: &str) -> Result<Item> {
        let group = self.collection.get(group_key).ok_or_else(|| Error::NotFound {
            key: group_key.to_string(),
        })?;
        let parent = group.data_str("parent").unwrap_or_default().to_string();
        let definition =
            GroupDefinition::new(parent, group.centers()).with_center(center_key);

        let key = definition.key();
        if let Some(existing) = self.collection.get(&key) {
            return Ok(existing);
        }

        let members = group.members();
        let mut next = Item::new(&key, ItemKind::Group);
        next.data
            .insert("parent".into(), json!(definition.parent));
        next.data.insert(
            "centers".into(),
            json!(definition.centers.iter().collect::<Vec<_>>()),
        );
        next.data
            .insert("members".into(), Value::Object(members.clone()));
        let created = self.collection.create_or_update(next);

        for (member_key, state) in &members {
            let Some(state) = state.as_i64() else { continue };
            if let Some(mut member) = self.collection.get(member_key) {
                member.set_group_link(&created.key, state);
                self.collection.create_or_update(member);
            }
        }
        Ok(created)
    }

    /// The group's centroid: the element-wise median of its active
    /// members' vectors. Served from the cache on the group item when
    /// present, otherwise computed and cached. `None` while no active
    /// member has a vector.
    pub fn centroid(&self, group_key: &str) -> Result<Option<Vec<f32>>> {
        let group = self.collection.get(group_key).ok_or_else(|| Error::NotFound {
            key: group_key.to_string(),
        })?;
        if let Some(cached) = group.vec {
            return Ok(Some(cached));
        }

        let vectors: Vec<Vec<f32>> = group
            .members()
            .iter()
            .filter(|(_, state)| state.as_i64() == Some(1))
            .filter_map(|(key, _)| self.collection.get(key).and_then(|item| item.vec))
            .collect();

        match median_vector(&vectors) {
            Some(centroid) => {
                self.collection.set_vec(group_key, centroid.clone())?;
                Ok(Some(centroid))
            }
            None => Ok(None),
        }
    }
}
