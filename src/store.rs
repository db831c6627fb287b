//! Append-only collection store.
//!
//! A [`Collection`] keeps its items in memory and persists them to one
//! or more append-only AJSON shard files through the [`FileSystem`]
//! collaborator. Writes go through a save queue: items are marked dirty,
//! a debounced batch flush appends one serialized fragment per dirty
//! item to the shard owning its key, and dirty flags are cleared once
//! the append lands. Deletions append `null` tombstones. Loading replays
//! each shard top to bottom, keeping only the latest fragment per key.
//!
//! # Shard format
//!
//! A shard is a sequence of `",\n"`-joined JSON object members
//! (`"key": {record}`), such that wrapping the file in `{ }` yields
//! valid JSON. A trailing comma is tolerated on read and not required
//! on write. A `null` value is a tombstone.
//!
//! # Flush discipline
//!
//! Only one save pass may run per shard at a time: a per-shard async
//! lock plus a cooldown window. Overlapping triggers coalesce
//! ([`FlushOutcome::Skipped`]) instead of queueing indefinitely;
//! [`Collection::flush_now`] bypasses the debounce and cooldown and
//! awaits any in-flight pass. Compaction of one shard blocks appends to
//! that shard only.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use crate::config::{ShardPolicy, StoreConfig};
use crate::embedding::{Embedder, Embedding};
use crate::error::{Error, Result};
use crate::fs::FileSystem;
use crate::item::{top_key, Item, ItemKind, ItemRecord};
use crate::vector::{self, Scored};

/// What happened to one shard during a flush pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Records appended and dirty flags cleared.
    Flushed { records: usize },
    /// Another pass held the shard (or its cooldown window); the
    /// trigger coalesced. Expected behavior, not an error.
    Skipped,
    /// The append failed; affected items stay dirty and retry on the
    /// next flush cycle.
    Failed(String),
}

/// Per-shard outcomes of one [`Collection::process_save_queue`] pass.
#[derive(Debug, Default)]
pub struct FlushReport {
    pub shards: Vec<(String, FlushOutcome)>,
}

impl FlushReport {
    pub fn flushed_records(&self) -> usize {
        self.shards
            .iter()
            .map(|(_, outcome)| match outcome {
                FlushOutcome::Flushed { records } => *records,
                _ => 0,
            })
            .sum()
    }

    pub fn any_skipped(&self) -> bool {
        self.shards
            .iter()
            .any(|(_, outcome)| *outcome == FlushOutcome::Skipped)
    }
}

/// Result of a load pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub shards: usize,
    pub items: usize,
    /// Fragments dropped because they failed to parse. Contained per
    /// line; the rest of the shard still loads.
    pub corrupt: usize,
}

/// Result of a compaction pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub shards: usize,
    pub records: usize,
}

struct ShardState {
    flush_lock: AsyncMutex<()>,
    last_flush: StdMutex<Option<Instant>>,
}

struct Inner {
    name: String,
    config: StoreConfig,
    fs: Arc<dyn FileSystem>,
    items: RwLock<BTreeMap<String, Item>>,
    save_queue: RwLock<HashSet<String>>,
    /// Shard ids queued for (re)load.
    load_queue: RwLock<HashSet<String>>,
    /// Deleted key → shard id captured at deletion time, so a rename
    /// across shards tombstones the *old* shard within the same flush.
    tombstones: RwLock<HashMap<String, String>>,
    shards: StdMutex<HashMap<String, Arc<ShardState>>>,
    debounce: StdMutex<Option<JoinHandle<()>>>,
}

/// An in-memory collection of items backed by append-only shards.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Collection {
    inner: Arc<Inner>,
}

impl Collection {
    pub fn new(name: impl Into<String>, fs: Arc<dyn FileSystem>, config: StoreConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                config,
                fs,
                items: RwLock::new(BTreeMap::new()),
                save_queue: RwLock::new(HashSet::new()),
                load_queue: RwLock::new(HashSet::new()),
                tombstones: RwLock::new(HashMap::new()),
                shards: StdMutex::new(HashMap::new()),
                debounce: StdMutex::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn len(&self) -> usize {
        self.inner.items.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.items.read().unwrap().is_empty()
    }

    /// Insert a new item or merge into an existing one. The result is
    /// marked dirty and queued; a debounced save is armed when called
    /// inside a runtime.
    ///
    /// Source link maps are maintained here: this source's outlinks
    /// become inlinks on targets that already exist, and sources
    /// already linking to this key seed its own inlinks.
    pub fn create_or_update(&self, draft: Item) -> Item {
        let (merged, mut touched) = {
            let mut items = self.inner.items.write().unwrap();
            let mut merged = match items.remove(&draft.key) {
                Some(mut existing) => {
                    existing.kind = draft.kind;
                    for (field, value) in draft.data {
                        existing.data.insert(field, value);
                    }
                    if draft.vec.is_some() {
                        existing.vec = draft.vec;
                    }
                    existing.dirty = true;
                    existing
                }
                None => {
                    let mut item = draft;
                    item.dirty = true;
                    item
                }
            };

            let mut touched = Vec::new();
            if merged.kind == ItemKind::Source {
                for target in outlinks_of(&merged) {
                    if target == merged.key {
                        continue;
                    }
                    if let Some(item) = items.get_mut(&target) {
                        item.add_inlink(&merged.key);
                        item.dirty = true;
                        touched.push(target);
                    }
                }
                let origins: Vec<String> = items
                    .values()
                    .filter(|other| {
                        other.kind == ItemKind::Source
                            && outlinks_of(other).iter().any(|t| *t == merged.key)
                    })
                    .map(|other| other.key.clone())
                    .collect();
                for origin in origins {
                    merged.add_inlink(&origin);
                }
            }

            items.insert(merged.key.clone(), merged.clone());
            (merged, touched)
        };

        touched.push(merged.key.clone());
        {
            let mut queue = self.inner.save_queue.write().unwrap();
            for key in touched {
                queue.insert(key);
            }
        }
        self.inner
            .tombstones
            .write()
            .unwrap()
            .remove(&merged.key);
        self.arm_debounce();
        merged
    }

    pub fn get(&self, key: &str) -> Option<Item> {
        self.inner.items.read().unwrap().get(key).cloned()
    }

    pub fn filter<P>(&self, predicate: P) -> Vec<Item>
    where
        P: Fn(&Item) -> bool,
    {
        self.inner
            .items
            .read()
            .unwrap()
            .values()
            .filter(|item| predicate(item))
            .cloned()
            .collect()
    }

    /// Remove keys from memory and queue tombstones for their shards.
    pub fn delete_many<I, S>(&self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut touched = false;
        for key in keys {
            let key = key.as_ref();
            let shard = self.shard_id(key);
            self.inner.items.write().unwrap().remove(key);
            self.inner.save_queue.write().unwrap().remove(key);
            self.inner
                .tombstones
                .write()
                .unwrap()
                .insert(key.to_string(), shard);
            touched = true;
        }
        if touched {
            self.arm_debounce();
        }
    }

    /// Move an item to a new key. Within one flush this emits a
    /// tombstone in the old key's shard and a create record in the new
    /// key's shard.
    pub fn rename(&self, old_key: &str, new_key: &str) -> Result<Item> {
        let mut item = {
            let mut items = self.inner.items.write().unwrap();
            items.remove(old_key).ok_or_else(|| Error::NotFound {
                key: old_key.to_string(),
            })?
        };
        let old_shard = self.shard_id(old_key);
        self.inner
            .tombstones
            .write()
            .unwrap()
            .insert(old_key.to_string(), old_shard);
        self.inner.save_queue.write().unwrap().remove(old_key);

        item.key = new_key.to_string();
        item.dirty = true;
        Ok(self.create_or_update(item))
    }

    /// Embed `text` through the collaborator and store the vector on
    /// the item. The store never computes embeddings itself.
    pub async fn embed_item(
        &self,
        key: &str,
        text: &str,
        embedder: &dyn Embedder,
    ) -> Result<Embedding> {
        let embedding = embedder.embed(text).await?;
        {
            let mut items = self.inner.items.write().unwrap();
            let item = items.get_mut(key).ok_or_else(|| Error::NotFound {
                key: key.to_string(),
            })?;
            item.vec = Some(embedding.vec.clone());
            item.dirty = true;
        }
        self.inner
            .save_queue
            .write()
            .unwrap()
            .insert(key.to_string());
        self.arm_debounce();
        Ok(embedding)
    }

    /// Store a vector on an existing item and queue it. Used both for
    /// externally computed embeddings and for cached centroids.
    pub fn set_vec(&self, key: &str, vec: Vec<f32>) -> Result<()> {
        {
            let mut items = self.inner.items.write().unwrap();
            let item = items.get_mut(key).ok_or_else(|| Error::NotFound {
                key: key.to_string(),
            })?;
            item.vec = Some(vec);
            item.dirty = true;
        }
        self.inner
            .save_queue
            .write()
            .unwrap()
            .insert(key.to_string());
        self.arm_debounce();
        Ok(())
    }

    /// Drop an item's stored vector (e.g. an invalidated cached
    /// centroid) and queue it.
    pub fn clear_vec(&self, key: &str) -> Result<()> {
        {
            let mut items = self.inner.items.write().unwrap();
            let item = items.get_mut(key).ok_or_else(|| Error::NotFound {
                key: key.to_string(),
            })?;
            item.vec = None;
            item.dirty = true;
        }
        self.inner
            .save_queue
            .write()
            .unwrap()
            .insert(key.to_string());
        self.arm_debounce();
        Ok(())
    }

    /// The `k` items most similar to `query`. Vector-less items never
    /// enter the accumulator.
    pub fn nearest(&self, query: &[f32], k: usize) -> Vec<Scored> {
        let items = self.inner.items.read().unwrap();
        vector::nearest(items.values(), query, k)
    }

    /// The `k` items least similar to `query`.
    pub fn furthest(&self, query: &[f32], k: usize) -> Vec<Scored> {
        let items = self.inner.items.read().unwrap();
        vector::furthest(items.values(), query, k)
    }

    /// Trailing-edge debounced save: each call re-arms the delay, so
    /// only the last trigger in a window fires a pass.
    pub fn save_debounced(&self) {
        let mut slot = self.inner.debounce.lock().unwrap();
        if let Some(handle) = slot.take() {
            handle.abort();
        }
        let this = self.clone();
        let delay = Duration::from_millis(self.inner.config.save_delay_ms);
        *slot = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(error) = this.process_save_queue().await {
                tracing::warn!(%error, "debounced save pass failed");
            }
        }));
    }

    fn arm_debounce(&self) {
        if tokio::runtime::Handle::try_current().is_ok() {
            self.save_debounced();
        }
    }

    /// Flush dirty items and pending tombstones, grouped by destination
    /// shard, one batched append per shard. Passes that find a shard
    /// busy or inside its cooldown coalesce to [`FlushOutcome::Skipped`].
    pub async fn process_save_queue(&self) -> Result<FlushReport> {
        self.flush(false).await
    }

    /// Explicit awaitable flush: cancels any pending debounce, bypasses
    /// the cooldown, and waits for in-flight passes before appending.
    pub async fn flush_now(&self) -> Result<FlushReport> {
        if let Some(handle) = self.inner.debounce.lock().unwrap().take() {
            handle.abort();
        }
        self.flush(true).await
    }

    async fn flush(&self, wait: bool) -> Result<FlushReport> {
        struct ShardWork {
            tombstones: Vec<String>,
            items: Vec<(String, ItemRecord)>,
        }

        let mut groups: BTreeMap<String, ShardWork> = BTreeMap::new();
        {
            let tombstones = self.inner.tombstones.read().unwrap();
            for (key, shard) in tombstones.iter() {
                groups
                    .entry(shard.clone())
                    .or_insert_with(|| ShardWork {
                        tombstones: Vec::new(),
                        items: Vec::new(),
                    })
                    .tombstones
                    .push(key.clone());
            }

            let queue = self.inner.save_queue.read().unwrap();
            let items = self.inner.items.read().unwrap();
            for key in queue.iter() {
                let Some(item) = items.get(key) else { continue };
                if !item.dirty {
                    continue;
                }
                groups
                    .entry(self.shard_id(key))
                    .or_insert_with(|| ShardWork {
                        tombstones: Vec::new(),
                        items: Vec::new(),
                    })
                    .items
                    .push((key.clone(), item.to_record()));
            }
        }

        let mut report = FlushReport::default();
        if groups.is_empty() {
            return Ok(report);
        }
        self.ensure_layout().await?;

        let cooldown = Duration::from_millis(self.inner.config.cooldown_ms);
        for (shard, mut work) in groups {
            // last-writer-wins ordering: tombstones first, then items
            // by key, one version per key per pass
            work.tombstones.sort();
            work.items.sort_by(|a, b| a.0.cmp(&b.0));

            let state = self.shard_state(&shard);
            let guard = if wait {
                Some(state.flush_lock.lock().await)
            } else {
                state.flush_lock.try_lock().ok()
            };
            let Some(_guard) = guard else {
                report.shards.push((shard, FlushOutcome::Skipped));
                continue;
            };
            if !wait {
                let within_cooldown = state
                    .last_flush
                    .lock()
                    .unwrap()
                    .is_some_and(|last| last.elapsed() < cooldown);
                if within_cooldown {
                    report.shards.push((shard, FlushOutcome::Skipped));
                    continue;
                }
            }

            let mut payload = String::new();
            for key in &work.tombstones {
                payload.push_str(&fragment(key, None)?);
                payload.push_str(",\n");
            }
            for (key, record) in &work.items {
                payload.push_str(&fragment(key, Some(record))?);
                payload.push_str(",\n");
            }

            let records = work.tombstones.len() + work.items.len();
            let path = self.shard_path(&shard);
            match self.inner.fs.append(&path, &payload).await {
                Ok(()) => {
                    let mut tombstones = self.inner.tombstones.write().unwrap();
                    let mut queue = self.inner.save_queue.write().unwrap();
                    let mut items = self.inner.items.write().unwrap();
                    for key in &work.tombstones {
                        tombstones.remove(key);
                    }
                    for (key, written) in &work.items {
                        // an item re-dirtied mid-append keeps its flag
                        if let Some(item) = items.get_mut(key) {
                            if item.to_record() == *written {
                                item.dirty = false;
                                queue.remove(key);
                            }
                        } else {
                            queue.remove(key);
                        }
                    }
                    *state.last_flush.lock().unwrap() = Some(Instant::now());
                    tracing::debug!(shard = %shard, records, "flushed shard");
                    report
                        .shards
                        .push((shard, FlushOutcome::Flushed { records }));
                }
                Err(error) => {
                    tracing::warn!(shard = %shard, %error, "append failed; items stay dirty");
                    report
                        .shards
                        .push((shard, FlushOutcome::Failed(error.to_string())));
                }
            }
        }

        Ok(report)
    }

    /// Queue a single shard for (re)load.
    pub fn queue_load(&self, shard: impl Into<String>) {
        self.inner.load_queue.write().unwrap().insert(shard.into());
    }

    /// Discover all shards on disk (bootstrapping the layout when the
    /// collection is brand new) and load them.
    pub async fn load_all_items(&self) -> Result<LoadReport> {
        for shard in self.discover_shards().await? {
            self.queue_load(shard);
        }
        self.process_load_queue().await
    }

    /// Load every queued shard. Later fragments for a key overwrite
    /// earlier ones; `null` fragments remove the key; corrupt lines are
    /// skipped and dropped for good on the next prune. Dirty in-memory
    /// items are never clobbered by a load.
    pub async fn process_load_queue(&self) -> Result<LoadReport> {
        let queued: Vec<String> = {
            let mut queue = self.inner.load_queue.write().unwrap();
            queue.drain().collect()
        };

        let mut report = LoadReport::default();
        for shard in queued {
            let path = self.shard_path(&shard);
            if !self.inner.fs.exists(&path).await? {
                self.ensure_layout().await?;
                self.inner.fs.write(&path, "").await?;
                report.shards += 1;
                continue;
            }

            let content = self.inner.fs.read(&path).await?;
            let (latest, corrupt) = parse_shard(&shard, &content);
            for error in &corrupt {
                tracing::warn!(%error, "fragment dropped");
            }
            report.corrupt += corrupt.len();
            report.shards += 1;

            let mut items = self.inner.items.write().unwrap();
            for (key, record) in latest {
                let keep_dirty = items.get(&key).is_some_and(|item| item.dirty);
                if keep_dirty {
                    continue;
                }
                match record {
                    Some(record) => {
                        items.insert(key.clone(), Item::from_record(key, record));
                        report.items += 1;
                    }
                    None => {
                        items.remove(&key);
                    }
                }
            }
        }
        Ok(report)
    }

    /// Rewrite every shard to hold exactly one current record per
    /// surviving key, dropping tombstones and superseded fragments.
    ///
    /// Each rewrite goes to a temp path first, is size-validated
    /// against the old file (`min_retention`, 0.5 by default), then
    /// atomically renamed into place. A rejected rewrite leaves the
    /// original untouched and preserves the attempt under a timestamped
    /// `.failed-` name; there is no automatic retry. A prune on shard A
    /// blocks appends to A only.
    pub async fn prune(&self) -> Result<PruneReport> {
        let mut groups: BTreeMap<String, Vec<(String, ItemRecord)>> = BTreeMap::new();
        {
            let items = self.inner.items.read().unwrap();
            for (key, item) in items.iter() {
                groups
                    .entry(self.shard_id(key))
                    .or_default()
                    .push((key.clone(), item.to_record()));
            }
        }
        // shards that exist on disk but whose keys were all deleted
        // still need compacting
        for shard in self.discover_shards().await? {
            groups.entry(shard).or_default();
        }

        let mut report = PruneReport::default();
        self.ensure_layout().await?;
        for (shard, records) in groups {
            let state = self.shard_state(&shard);
            let _guard = state.flush_lock.lock().await;

            let fragments: Vec<String> = records
                .iter()
                .map(|(key, record)| fragment(key, Some(record)))
                .collect::<Result<_>>()?;
            let content = if fragments.is_empty() {
                String::new()
            } else {
                format!("{}\n", fragments.join(",\n"))
            };

            let path = self.shard_path(&shard);
            let tmp = format!("{path}.tmp");
            self.inner.fs.write(&tmp, &content).await?;

            let old_size = if self.inner.fs.exists(&path).await? {
                self.inner.fs.stat(&path).await?.size
            } else {
                0
            };
            let new_size = self.inner.fs.stat(&tmp).await?.size;
            let floor = (old_size as f64) * self.inner.config.min_retention;
            if old_size > 0 && (new_size as f64) < floor {
                let preserved = format!(
                    "{path}.failed-{}",
                    chrono::Utc::now().format("%Y%m%d%H%M%S")
                );
                self.inner.fs.rename(&tmp, &preserved).await?;
                tracing::warn!(
                    shard = %shard,
                    old_size,
                    new_size,
                    preserved = %preserved,
                    "prune rewrite rejected by retention guard"
                );
                return Err(Error::ValidationFailed {
                    shard,
                    previous: old_size,
                    attempted: new_size,
                    preserved,
                });
            }

            self.inner.fs.rename(&tmp, &path).await?;
            *state.last_flush.lock().unwrap() = Some(Instant::now());

            // records just rewritten are durable; pending tombstones
            // for this shard are realized by their absence
            {
                let mut tombstones = self.inner.tombstones.write().unwrap();
                tombstones.retain(|_, s| *s != shard);
                let mut queue = self.inner.save_queue.write().unwrap();
                let mut items = self.inner.items.write().unwrap();
                for (key, written) in &records {
                    if let Some(item) = items.get_mut(key) {
                        if item.to_record() == *written {
                            item.dirty = false;
                            queue.remove(key);
                        }
                    }
                }
            }

            tracing::debug!(shard = %shard, records = records.len(), "pruned shard");
            report.shards += 1;
            report.records += records.len();
        }
        Ok(report)
    }

    /// Shard id owning `key` under the configured policy.
    fn shard_id(&self, key: &str) -> String {
        match self.inner.config.shard_policy {
            ShardPolicy::Single => self.inner.name.clone(),
            ShardPolicy::PerTopKey => sanitize(top_key(key)),
        }
    }

    /// Path (relative to the filesystem root) of a shard file.
    fn shard_path(&self, shard: &str) -> String {
        match self.inner.config.shard_policy {
            ShardPolicy::Single => format!("{}.ajson", self.inner.name),
            ShardPolicy::PerTopKey => format!("{}/{}.ajson", self.inner.name, shard),
        }
    }

    async fn ensure_layout(&self) -> Result<()> {
        if self.inner.config.shard_policy == ShardPolicy::PerTopKey
            && !self.inner.fs.exists(&self.inner.name).await?
        {
            self.inner.fs.mkdir(&self.inner.name).await?;
        }
        Ok(())
    }

    async fn discover_shards(&self) -> Result<Vec<String>> {
        match self.inner.config.shard_policy {
            ShardPolicy::Single => {
                let path = self.shard_path(&self.inner.name);
                if !self.inner.fs.exists(&path).await? {
                    self.inner.fs.write(&path, "").await?;
                }
                Ok(vec![self.inner.name.clone()])
            }
            ShardPolicy::PerTopKey => {
                if !self.inner.fs.exists(&self.inner.name).await? {
                    self.inner.fs.mkdir(&self.inner.name).await?;
                    return Ok(Vec::new());
                }
                Ok(self
                    .inner
                    .fs
                    .list(&self.inner.name)
                    .await?
                    .into_iter()
                    .filter_map(|name| {
                        name.strip_suffix(".ajson").map(str::to_string)
                    })
                    .collect())
            }
        }
    }

    fn shard_state(&self, shard: &str) -> Arc<ShardState> {
        let mut shards = self.inner.shards.lock().unwrap();
        shards
            .entry(shard.to_string())
            .or_insert_with(|| {
                Arc::new(ShardState {
                    flush_lock: AsyncMutex::new(()),
                    last_flush: StdMutex::new(None),
                })
            })
            .clone()
    }
}

/// One `"key": value` fragment; `None` serializes a tombstone.
fn fragment(key: &str, record: Option<&ItemRecord>) -> Result<String> {
    let key_json = serde_json::to_string(key)?;
    let value = match record {
        Some(record) => serde_json::to_string(record)?,
        None => "null".to_string(),
    };
    Ok(format!("{key_json}: {value}"))
}

/// Outlink targets of a source item.
fn outlinks_of(item: &Item) -> Vec<String> {
    item.data
        .get("outlinks")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Shard-safe file stem for a top-level key.
fn sanitize(top: &str) -> String {
    top.chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Parse a shard's contents into the latest record per key.
///
/// Later fragments overwrite earlier ones; a `null` value marks a
/// tombstone. A line that fails to parse becomes a
/// [`Error::CorruptFragment`] in the returned list without aborting its
/// siblings.
fn parse_shard(shard: &str, content: &str) -> (BTreeMap<String, Option<ItemRecord>>, Vec<Error>) {
    let mut latest: BTreeMap<String, Option<ItemRecord>> = BTreeMap::new();
    let mut corrupt = Vec::new();

    for (idx, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let line = line.strip_suffix(',').unwrap_or(line);
        let wrapped = format!("{{{line}}}");
        match serde_json::from_str::<serde_json::Map<String, Value>>(&wrapped) {
            Ok(map) => {
                for (key, value) in map {
                    if value.is_null() {
                        latest.insert(key, None);
                        continue;
                    }
                    match serde_json::from_value::<ItemRecord>(value) {
                        Ok(record) => {
                            latest.insert(key, Some(record));
                        }
                        Err(_) => corrupt.push(Error::CorruptFragment {
                            shard: shard.to_string(),
                            line: idx + 1,
                        }),
                    }
                }
            }
            Err(_) => corrupt.push(Error::CorruptFragment {
                shard: shard.to_string(),
                line: idx + 1,
            }),
        }
    }

    (latest, corrupt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ItemKind;

    #[test]
    fn test_fragment_shapes() {
        let record = Item::source("a.md").to_record();
        let line = fragment("a.md", Some(&record)).unwrap();
        assert!(line.starts_with("\"a.md\": {"));
        assert_eq!(fragment("a.md", None).unwrap(), "\"a.md\": null");
    }

    #[test]
    fn test_wrapping_a_shard_yields_valid_json() {
        let a = fragment("a.md", Some(&Item::source("a.md").to_record())).unwrap();
        let b = fragment("b.md", Some(&Item::source("b.md").to_record())).unwrap();
        let file = format!("{a},\n{b}\n");
        let wrapped = format!("{{{}}}", file.trim_end().trim_end_matches(','));
        let parsed: serde_json::Map<String, Value> = serde_json::from_str(&wrapped).unwrap();
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn test_parse_shard_last_fragment_wins() {
        let mut old = Item::source("a.md");
        old.data.insert("rev".into(), serde_json::json!(1));
        let mut new = Item::source("a.md");
        new.data.insert("rev".into(), serde_json::json!(2));
        let content = format!(
            "{},\n{},\n",
            fragment("a.md", Some(&old.to_record())).unwrap(),
            fragment("a.md", Some(&new.to_record())).unwrap(),
        );
        let (latest, corrupt) = parse_shard("test", &content);
        assert!(corrupt.is_empty());
        let record = latest.get("a.md").unwrap().as_ref().unwrap();
        assert_eq!(record.data.get("rev"), Some(&serde_json::json!(2)));
    }

    #[test]
    fn test_parse_shard_tombstone_removes_key() {
        let content = format!(
            "{},\n\"a.md\": null,\n",
            fragment("a.md", Some(&Item::source("a.md").to_record())).unwrap(),
        );
        let (latest, _) = parse_shard("test", &content);
        assert_eq!(latest.get("a.md"), Some(&None));
    }

    #[test]
    fn test_parse_shard_contains_corruption_to_one_line() {
        let good = fragment("a.md", Some(&Item::source("a.md").to_record())).unwrap();
        let content = format!("{good},\n\"b.md\": {{garbage,\n");
        let (latest, corrupt) = parse_shard("test", &content);
        assert!(matches!(
            corrupt.as_slice(),
            [Error::CorruptFragment { line: 2, .. }]
        ));
        assert!(latest.contains_key("a.md"));
        assert!(!latest.contains_key("b.md"));
    }

    #[test]
    fn test_parse_shard_tolerates_missing_trailing_comma() {
        let good = fragment("a.md", Some(&Item::source("a.md").to_record())).unwrap();
        let (latest, corrupt) = parse_shard("test", &good);
        assert!(corrupt.is_empty());
        assert!(latest.contains_key("a.md"));
    }

    #[test]
    fn test_sanitize_for_filenames() {
        assert_eq!(sanitize("notes/a.md"), "notes_a.md");
        assert_eq!(sanitize("a b.md"), "a_b.md");
    }

    #[test]
    fn test_parse_shard_accepts_every_kind_tag() {
        let content = "\"g\": {\"kind\": \"group\", \"data\": {}},\n\
                       \"c\": {\"kind\": \"cluster\", \"data\": {}},\n";
        let (latest, corrupt) = parse_shard("test", content);
        assert!(corrupt.is_empty());
        let cluster = latest.get("c").unwrap().as_ref().unwrap();
        assert_eq!(cluster.kind, ItemKind::Cluster);
        assert_eq!(
            latest.get("g").unwrap().as_ref().unwrap().kind,
            ItemKind::Group
        );
    }

    #[test]
    fn test_shard_id_policies() {
        let fs: Arc<dyn crate::fs::FileSystem> = Arc::new(crate::fs::MemFs::new());
        let single = Collection::new("col", fs.clone(), StoreConfig::default());
        assert_eq!(single.shard_id("notes/a.md#X"), "col");
        assert_eq!(single.shard_path("col"), "col.ajson");

        let config = StoreConfig {
            shard_policy: ShardPolicy::PerTopKey,
            ..StoreConfig::default()
        };
        let per_key = Collection::new("col", fs, config);
        assert_eq!(per_key.shard_id("notes/a.md#X"), "notes_a.md");
        assert_eq!(per_key.shard_path("notes_a.md"), "col/notes_a.md.ajson");
    }

    #[tokio::test]
    async fn test_create_get_filter_delete() {
        let fs: Arc<dyn crate::fs::FileSystem> = Arc::new(crate::fs::MemFs::new());
        let col = Collection::new("col", fs, StoreConfig::default());

        col.create_or_update(Item::source("a.md"));
        col.create_or_update(Item::block("a.md#X", (1, 2), "h"));
        assert_eq!(col.len(), 2);
        assert!(col.get("a.md").unwrap().dirty);

        let blocks = col.filter(|item| item.kind == ItemKind::Block);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].key, "a.md#X");

        col.delete_many(["a.md#X"]);
        assert!(col.get("a.md#X").is_none());
        assert_eq!(col.len(), 1);
    }

    #[tokio::test]
    async fn test_source_links_maintained_both_directions() {
        let fs: Arc<dyn crate::fs::FileSystem> = Arc::new(crate::fs::MemFs::new());
        let col = Collection::new("col", fs, StoreConfig::default());

        // target exists first: creating the origin writes the backlink
        col.create_or_update(Item::source("b.md"));
        let mut a = Item::source("a.md");
        a.add_outlink("b.md");
        col.create_or_update(a);
        let b = col.get("b.md").unwrap();
        assert_eq!(b.data["inlinks"], serde_json::json!(["a.md"]));
        assert!(b.dirty);

        // origin exists first: creating the target seeds its inlinks
        let mut c = Item::source("c.md");
        c.add_outlink("d.md");
        col.create_or_update(c);
        let d = col.create_or_update(Item::source("d.md"));
        assert_eq!(d.data["inlinks"], serde_json::json!(["c.md"]));

        // re-running the update does not duplicate the backlink
        let mut a = Item::source("a.md");
        a.add_outlink("b.md");
        col.create_or_update(a);
        let b = col.get("b.md").unwrap();
        assert_eq!(b.data["inlinks"], serde_json::json!(["a.md"]));
    }

    #[tokio::test]
    async fn test_embed_item_stores_vector_and_scores() {
        let fs: Arc<dyn crate::fs::FileSystem> = Arc::new(crate::fs::MemFs::new());
        let col = Collection::new("col", fs, StoreConfig::default());
        let embedder = crate::embedding::testing::StubEmbedder { dims: 4 };

        col.create_or_update(Item::block("a.md#X", (1, 2), "h"));
        let embedding = col.embed_item("a.md#X", "alpha beta", &embedder).await.unwrap();
        assert_eq!(embedding.tokens, 2);

        let item = col.get("a.md#X").unwrap();
        assert_eq!(item.vec.as_deref(), Some(embedding.vec.as_slice()));
        assert!(item.dirty);

        let hits = col.nearest(&embedding.vec, 1);
        assert_eq!(hits[0].key, "a.md#X");
        assert!((hits[0].score - 1.0).abs() < 1e-6);

        let missing = col.embed_item("nope", "text", &embedder).await;
        assert!(matches!(missing, Err(Error::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_update_merges_payload() {
        let fs: Arc<dyn crate::fs::FileSystem> = Arc::new(crate::fs::MemFs::new());
        let col = Collection::new("col", fs, StoreConfig::default());

        let mut first = Item::source("a.md");
        first.vec = Some(vec![1.0, 0.0]);
        col.create_or_update(first);

        let mut second = Item::source("a.md");
        second.data.insert("title".into(), serde_json::json!("A"));
        second.vec = None;
        col.create_or_update(second);

        let merged = col.get("a.md").unwrap();
        assert_eq!(merged.data_str("title"), Some("A"));
        // absent vec on the draft leaves the stored vector alone
        assert_eq!(merged.vec, Some(vec![1.0, 0.0]));
    }
}
