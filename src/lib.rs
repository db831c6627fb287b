//! # Corpus Store
//!
//! An embedded, append-only content store for document corpora.
//!
//! Corpus Store keeps a collection of addressable items — document
//! sources, the heading/declaration blocks inside them, and groups built
//! over them — in memory, and persists them to append-only AJSON shard
//! files through a pluggable filesystem. Vectors attached to items power
//! bounded top-k similarity search and centroid-based grouping; the
//! vectors themselves come from the host behind an embedding trait.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ Block Parse │──▶│  Collection  │──▶│ AJSON shards │
//! │ md / code   │   │ items+queues │   │ append-only  │
//! └─────────────┘   └──────┬───────┘   └──────────────┘
//!                          │
//!            ┌─────────────┼─────────────┐
//!            ▼             ▼             ▼
//!       ┌─────────┐   ┌─────────┐   ┌─────────┐
//!       │ nearest │   │ groups  │   │  prune  │
//!       │furthest │   │centroids│   │ compact │
//!       └─────────┘   └─────────┘   └─────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use corpus_store::config::StoreConfig;
//! use corpus_store::fs::{FileSystem, TokioFs};
//! use corpus_store::store::Collection;
//! use corpus_store::blocks::source_items;
//!
//! # async fn demo() -> corpus_store::Result<()> {
//! let fs: Arc<dyn FileSystem> = Arc::new(TokioFs::new("/var/data"));
//! let col = Collection::new("notes", fs, StoreConfig::default());
//! col.load_all_items().await?;
//!
//! let (source, blocks) = source_items("a.md", "# Intro\nhello\n");
//! col.create_or_update(source);
//! for block in blocks {
//!     col.create_or_update(block);
//! }
//! col.flush_now().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`item`] | Core item model and persisted records |
//! | [`blocks`] | Markdown heading-block parser and block CRUD |
//! | [`code_blocks`] | Brace-structure block parser for code |
//! | [`store`] | Append-only collection store |
//! | [`vector`] | Bounded top-k accumulators and similarity |
//! | [`group`] | Deterministic groups with median centroids |
//! | [`hash`] | Seeded 32-bit hashing and simhash |
//! | [`fs`] | Async filesystem collaborator |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |

pub mod blocks;
pub mod code_blocks;
pub mod config;
pub mod embedding;
pub mod error;
pub mod fs;
pub mod group;
pub mod hash;
pub mod item;
pub mod store;
pub mod vector;

pub use error::{Error, Result};
pub use item::{Item, ItemKind, ItemRecord};
pub use store::{Collection, FlushOutcome, FlushReport, LoadReport, PruneReport};
