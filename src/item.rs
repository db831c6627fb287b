//! In-memory representation of collection members.
//!
//! Every member of a collection — a document source, a block within a
//! source, a cluster, or a group — is an [`Item`]: a stable key, a JSON
//! data payload, an optional embedding vector, and a transient dirty
//! flag. The persisted form is [`ItemRecord`], which
//! carries an explicit [`ItemKind`] discriminant so records can be
//! resolved statically at load time.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Persisted discriminant selecting the item variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Source,
    Block,
    Cluster,
    Group,
}

/// The durable portion of an [`Item`], one per shard fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub kind: ItemKind,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vec: Option<Vec<f32>>,
}

/// The portion of a key before the first `#`, or the whole key. Block
/// keys share their source's top key, which is what shard assignment
/// is based on.
pub fn top_key(key: &str) -> &str {
    match key.find('#') {
        Some(0) | None => key,
        Some(idx) => &key[..idx],
    }
}

/// A collection member.
///
/// `dirty` marks the item as pending persistence; the flag itself is
/// not persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub key: String,
    pub kind: ItemKind,
    pub data: Map<String, Value>,
    pub vec: Option<Vec<f32>>,
    pub dirty: bool,
}

impl Item {
    pub fn new(key: impl Into<String>, kind: ItemKind) -> Self {
        Self {
            key: key.into(),
            kind,
            data: Map::new(),
            vec: None,
            dirty: true,
        }
    }

    /// A source item for a document at `path`.
    pub fn source(path: impl Into<String>) -> Self {
        let path = path.into();
        let mut item = Self::new(path.clone(), ItemKind::Source);
        item.data.insert("path".into(), json!(path));
        item.data.insert("blocks".into(), json!({}));
        item.data.insert("outlinks".into(), json!([]));
        item.data.insert("inlinks".into(), json!([]));
        item
    }

    /// A block item within the source identified by the key's top
    /// segment. `range` is 1-indexed inclusive.
    pub fn block(key: impl Into<String>, range: (usize, usize), content_hash: &str) -> Self {
        let mut item = Self::new(key, ItemKind::Block);
        item.data
            .insert("lines".into(), json!([range.0, range.1]));
        item.data.insert("hash".into(), json!(content_hash));
        item
    }

    pub fn to_record(&self) -> ItemRecord {
        ItemRecord {
            kind: self.kind,
            data: self.data.clone(),
            vec: self.vec.clone(),
        }
    }

    pub fn from_record(key: impl Into<String>, record: ItemRecord) -> Self {
        Self {
            key: key.into(),
            kind: record.kind,
            data: record.data,
            vec: record.vec,
            dirty: false,
        }
    }

    pub fn data_str(&self, field: &str) -> Option<&str> {
        self.data.get(field).and_then(Value::as_str)
    }

    /// Block line range, 1-indexed inclusive.
    pub fn lines(&self) -> Option<(usize, usize)> {
        let arr = self.data.get("lines")?.as_array()?;
        let start = arr.first()?.as_u64()? as usize;
        let end = arr.get(1)?.as_u64()? as usize;
        Some((start, end))
    }

    pub fn content_hash(&self) -> Option<&str> {
        self.data_str("hash")
    }

    /// Signed membership map of a cluster/group item: member key to
    /// `+1` (active) or `-1` (removed).
    pub fn members(&self) -> Map<String, Value> {
        self.data
            .get("members")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_member(&mut self, member_key: &str, state: i64) {
        let members = self
            .data
            .entry("members".to_string())
            .or_insert_with(|| json!({}));
        if let Some(map) = members.as_object_mut() {
            map.insert(member_key.to_string(), json!(state));
        }
    }

    /// Keys of this group's defining center items.
    pub fn centers(&self) -> Vec<String> {
        self.data
            .get("centers")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Signed group-side links of a member item: group key to `+1`/`-1`.
    pub fn set_group_link(&mut self, group_key: &str, state: i64) {
        let groups = self
            .data
            .entry("groups".to_string())
            .or_insert_with(|| json!({}));
        if let Some(map) = groups.as_object_mut() {
            map.insert(group_key.to_string(), json!(state));
        }
    }

    pub fn add_outlink(&mut self, target: &str) {
        let links = self
            .data
            .entry("outlinks".to_string())
            .or_insert_with(|| json!([]));
        if let Some(arr) = links.as_array_mut() {
            if !arr.iter().any(|v| v.as_str() == Some(target)) {
                arr.push(json!(target));
            }
        }
    }

    pub fn add_inlink(&mut self, origin: &str) {
        let links = self
            .data
            .entry("inlinks".to_string())
            .or_insert_with(|| json!([]));
        if let Some(arr) = links.as_array_mut() {
            if !arr.iter().any(|v| v.as_str() == Some(origin)) {
                arr.push(json!(origin));
            }
        }
    }
}
