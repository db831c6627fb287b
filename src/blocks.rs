//! Heading-based block decomposition of prose documents.
//!
//! [`parse_blocks`] maps a document's text to a flat map of stable block
//! keys → 1-indexed inclusive line ranges. Keys are `#`-joined heading
//! paths (`#Top#Sub`); duplicate sibling headings are suffixed `[2]`,
//! `[3]`, … per parent scope, so keys are deterministic functions of
//! heading path plus sibling occurrence index.
//!
//! Reserved keys:
//! - `#---frontmatter---` covers a leading `---` … `---` block.
//! - `#` covers unassigned lines before the first heading.
//!
//! CRUD helpers ([`read_block`], [`update_block`], [`destroy_block`])
//! re-derive the range map from scratch on every call; chained edits
//! must re-parse between calls. All three fail with
//! [`Error::NotFound`] when the key is absent.

use std::collections::{BTreeMap, HashMap};

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::item::Item;

/// 1-indexed inclusive `[start, end]` line range.
pub type LineRange = (usize, usize);

/// Reserved key for a leading `---` … `---` frontmatter block.
pub const FRONTMATTER_KEY: &str = "#---frontmatter---";

/// Reserved key for content before the first heading.
pub const ROOT_KEY: &str = "#";

struct OpenBlock {
    level: usize,
    key: String,
    start: usize, // 0-indexed
}

/// Decompose `text` into block keys and line ranges.
///
/// A heading of level N opens a block ending at the line before the
/// next heading of level ≤ N, or end of file; sub-heading blocks refine
/// their parent's range. Lines inside code fences are never treated as
/// headings.
pub fn parse_blocks(text: &str) -> BTreeMap<String, LineRange> {
    let lines: Vec<&str> = text.lines().collect();
    let total = lines.len();
    let mut blocks = BTreeMap::new();
    if total == 0 {
        return blocks;
    }

    let mut body_start = 0usize; // 0-indexed
    if lines[0].trim_end() == "---" {
        if let Some(offset) = lines[1..].iter().position(|l| l.trim_end() == "---") {
            let close = offset + 1;
            blocks.insert(FRONTMATTER_KEY.to_string(), (1, close + 1));
            body_start = close + 1;
        }
    }

    let mut stack: Vec<OpenBlock> = Vec::new();
    // (parent key, heading text) -> occurrence count
    let mut occurrences: HashMap<(String, String), usize> = HashMap::new();
    let mut in_fence = false;
    let mut first_heading: Option<usize> = None;

    for idx in body_start..total {
        let line = lines[idx];
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }

        let Some((level, heading)) = heading_of(line) else {
            continue;
        };
        if first_heading.is_none() {
            first_heading = Some(idx);
        }

        while stack.last().is_some_and(|open| open.level >= level) {
            let open = stack.pop().unwrap();
            blocks.insert(open.key, (open.start + 1, idx));
        }

        let parent_key = stack.last().map(|o| o.key.clone()).unwrap_or_default();
        let count = occurrences
            .entry((parent_key.clone(), heading.clone()))
            .and_modify(|c| *c += 1)
            .or_insert(1);
        let component = if *count > 1 {
            format!("{heading}[{count}]")
        } else {
            heading
        };
        stack.push(OpenBlock {
            level,
            key: format!("{parent_key}#{component}"),
            start: idx,
        });
    }

    while let Some(open) = stack.pop() {
        blocks.insert(open.key, (open.start + 1, total));
    }

    let root_end = first_heading.unwrap_or(total);
    if root_end > body_start {
        blocks.insert(ROOT_KEY.to_string(), (body_start + 1, root_end));
    }

    blocks
}

/// ATX heading at the start of a line: `(level, trimmed text)`.
fn heading_of(line: &str) -> Option<(usize, String)> {
    let hashes = line.bytes().take_while(|&b| b == b'#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &line[hashes..];
    if !(rest.is_empty() || rest.starts_with(' ') || rest.starts_with('\t')) {
        return None;
    }
    let text = rest.trim().trim_end_matches('#').trim_end();
    Some((hashes, text.to_string()))
}

fn range_of(text: &str, key: &str) -> Result<LineRange> {
    parse_blocks(text)
        .get(key)
        .copied()
        .ok_or_else(|| Error::NotFound {
            key: key.to_string(),
        })
}

/// The exact text of the block `key`, joined with `\n`.
pub fn read_block(text: &str, key: &str) -> Result<String> {
    let (start, end) = range_of(text, key)?;
    let lines: Vec<&str> = text.lines().collect();
    Ok(lines[start - 1..end].join("\n"))
}

/// Replace the block `key` with `new_text`, returning the full document.
pub fn update_block(text: &str, key: &str, new_text: &str) -> Result<String> {
    let (start, end) = range_of(text, key)?;
    let lines: Vec<&str> = text.lines().collect();
    let mut out: Vec<&str> = Vec::with_capacity(lines.len());
    out.extend_from_slice(&lines[..start - 1]);
    out.extend(new_text.lines());
    out.extend_from_slice(&lines[end..]);
    Ok(rejoin(out, text))
}

/// Remove the block `key`, returning the full document.
pub fn destroy_block(text: &str, key: &str) -> Result<String> {
    let (start, end) = range_of(text, key)?;
    let lines: Vec<&str> = text.lines().collect();
    let mut out: Vec<&str> = Vec::with_capacity(lines.len());
    out.extend_from_slice(&lines[..start - 1]);
    out.extend_from_slice(&lines[end..]);
    Ok(rejoin(out, text))
}

/// Join edited lines back into a document, keeping the original's
/// trailing newline if it had one.
pub(crate) fn rejoin(lines: Vec<&str>, original: &str) -> String {
    let mut out = lines.join("\n");
    if original.ends_with('\n') && !out.is_empty() {
        out.push('\n');
    }
    out
}

/// SHA-256 hex digest of a block's text, for staleness detection.
pub fn block_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Build the source item and its block items for a document.
///
/// Block items are keyed `{path}{block_key}`; the source's `blocks`
/// payload maps block keys to line ranges, and `[[wikilink]]` targets
/// are recorded as outlinks.
pub fn source_items(path: &str, text: &str) -> (Item, Vec<Item>) {
    let ranges = parse_blocks(text);
    let lines: Vec<&str> = text.lines().collect();

    let mut source = Item::source(path);
    for target in wikilink_targets(text) {
        source.add_outlink(&target);
    }

    let mut block_items = Vec::with_capacity(ranges.len());
    if let Some(map) = source
        .data
        .get_mut("blocks")
        .and_then(serde_json::Value::as_object_mut)
    {
        for (key, &(start, end)) in &ranges {
            map.insert(key.clone(), serde_json::json!([start, end]));
        }
    }
    for (key, (start, end)) in ranges {
        let content = lines[start - 1..end].join("\n");
        block_items.push(Item::block(
            format!("{path}{key}"),
            (start, end),
            &block_hash(&content),
        ));
    }

    (source, block_items)
}

fn wikilink_targets(text: &str) -> Vec<String> {
    let mut targets = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find("[[") {
        rest = &rest[open + 2..];
        let Some(close) = rest.find("]]") else { break };
        let inner = &rest[..close];
        let target = inner.split('|').next().unwrap_or(inner).trim();
        if !target.is_empty() {
            targets.push(target.to_string());
        }
        rest = &rest[close + 2..];
    }
    targets
}
