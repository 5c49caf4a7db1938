//! Index file format
//!
//! ```text
//! {
//!   "index": { "data": { "<field>": { "<key>": [[set...], [[start, end], ...]] } } },
//!   "offsets": [byte offsets...],
//!   "recordCount": n,
//!   "termMapping": { "<field>": ["term for id 0", "term for id 1", ...] },
//!   "version": 1
//! }
//! ```
//!
//! Line numbers and offsets may have been written as strings by other
//! writers; they are normalized to integers while deserializing, before any
//! comparison or set operation sees them.
//!
//! The payload is plain JSON or brotli-compressed JSON. `decode` detects
//! which from the bytes themselves.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};

use super::engine::IndexEngine;
use super::errors::{IndexError, IndexResult};
use super::key::IndexKey;
use super::postings::Postings;
use super::terms::TermDictionary;
use crate::observability::Logger;
use crate::schema::Schema;

pub const SNAPSHOT_VERSION: u32 = 1;

const BROTLI_BUFFER: usize = 4096;
const BROTLI_QUALITY: u32 = 9;
const BROTLI_WINDOW: u32 = 22;

/// Unsigned integer that also deserializes from a numeric string
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LenientUint(pub u64);

impl Serialize for LenientUint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.0)
    }
}

impl<'de> Deserialize<'de> for LenientUint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(u64),
            Float(f64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Int(n) => Ok(LenientUint(n)),
            Raw::Float(f) if f >= 0.0 && f.fract() == 0.0 => Ok(LenientUint(f as u64)),
            Raw::Float(f) => Err(de::Error::custom(format!("invalid line number {}", f))),
            Raw::Text(s) => s
                .trim()
                .parse::<u64>()
                .map(LenientUint)
                .map_err(|_| de::Error::custom(format!("invalid line number '{}'", s))),
        }
    }
}

/// One key's postings in file form: `[set, ranges]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostingsEntry(pub Vec<LenientUint>, pub Vec<(LenientUint, LenientUint)>);

impl PostingsEntry {
    fn from_postings(postings: &Postings) -> Self {
        PostingsEntry(
            postings.set_part().iter().map(|n| LenientUint(*n as u64)).collect(),
            postings
                .range_part()
                .iter()
                .map(|(s, e)| (LenientUint(*s as u64), LenientUint(*e as u64)))
                .collect(),
        )
    }

    fn to_postings(&self) -> Postings {
        Postings::from_parts(
            self.0.iter().map(|n| n.0 as usize),
            self.1.iter().map(|(s, e)| (s.0 as usize, e.0 as usize)).collect(),
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexData {
    #[serde(default)]
    pub data: BTreeMap<String, BTreeMap<String, PostingsEntry>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexSnapshot {
    #[serde(default)]
    pub index: IndexData,
    #[serde(default)]
    pub offsets: Vec<LenientUint>,
    #[serde(rename = "recordCount", default)]
    pub record_count: LenientUint,
    #[serde(rename = "termMapping", default)]
    pub term_mapping: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub version: u32,
}

/// Engine state restored from a snapshot
#[derive(Debug)]
pub struct LoadedIndex {
    pub engine: IndexEngine,
    pub offsets: Vec<u64>,
}

impl IndexEngine {
    pub fn to_snapshot(&self, offsets: &[u64]) -> IndexSnapshot {
        let mut data = BTreeMap::new();
        let mut term_mapping = BTreeMap::new();
        for field in self.fields_ref() {
            let entries: BTreeMap<String, PostingsEntry> = field
                .postings
                .iter()
                .map(|(key, postings)| (key.to_storage_key(), PostingsEntry::from_postings(postings)))
                .collect();
            data.insert(field.name.clone(), entries);
            if let Some(dict) = &field.terms {
                term_mapping.insert(field.name.clone(), dict.terms().to_vec());
            }
        }
        IndexSnapshot {
            index: IndexData { data },
            offsets: offsets.iter().map(|o| LenientUint(*o)).collect(),
            record_count: LenientUint(self.line_count() as u64),
            term_mapping,
            version: SNAPSHOT_VERSION,
        }
    }

    /// Rebuilds engine state from a snapshot.
    ///
    /// Fails with a rebuild-class error when the snapshot does not cover
    /// every configured index, disagrees with itself, or was written with
    /// term mapping configured differently.
    pub fn from_snapshot(
        schema: &Schema,
        indexes: &[String],
        term_mapping: bool,
        snapshot: &IndexSnapshot,
    ) -> IndexResult<LoadedIndex> {
        let mut engine = IndexEngine::new(schema, indexes, term_mapping)?;
        let record_count = snapshot.record_count.0 as usize;
        let offsets: Vec<u64> = snapshot.offsets.iter().map(|o| o.0).collect();

        if offsets.len() != record_count {
            return Err(IndexError::stale(format!(
                "Index holds {} offsets for {} records",
                offsets.len(),
                record_count
            )));
        }
        if offsets.windows(2).any(|w| w[0] >= w[1]) {
            return Err(IndexError::stale("Offsets are not strictly increasing"));
        }

        for field in engine.fields_mut() {
            let Some(entries) = snapshot.index.data.get(&field.name) else {
                if record_count == 0 {
                    continue;
                }
                return Err(IndexError::stale(format!(
                    "Index file has no postings for field '{}'",
                    field.name
                )));
            };

            let persisted_terms = snapshot.term_mapping.get(&field.name);
            if persisted_terms.is_some() != field.is_mapped() && !entries.is_empty() {
                return Err(IndexError::stale(format!(
                    "Term mapping setting changed for field '{}'",
                    field.name
                )));
            }
            if let (Some(dict), Some(terms)) = (field.terms.as_mut(), persisted_terms) {
                *dict = TermDictionary::from_terms(terms.clone());
            }

            let term_count = field.terms.as_ref().map(|d| d.len());
            for (raw, entry) in entries {
                let key = IndexKey::from_storage_key(raw, field.field_type, field.is_mapped())
                    .ok_or_else(|| {
                        IndexError::corrupt(format!("Invalid key '{}' for field '{}'", raw, field.name))
                    })?;
                if let (IndexKey::Term(id), Some(count)) = (&key, term_count) {
                    if *id as usize >= count {
                        return Err(IndexError::corrupt(format!(
                            "Term id {} for field '{}' has no dictionary entry",
                            id, field.name
                        )));
                    }
                }
                let postings = entry.to_postings();
                if !postings.is_empty() {
                    field.postings.insert(key, postings);
                }
            }
        }

        for name in snapshot.index.data.keys() {
            if !indexes.contains(name) {
                Logger::info("INDEX_FIELD_DROPPED", &[("field", name.as_str())]);
            }
        }

        engine.set_line_count(record_count);
        engine.validate()?;
        Ok(LoadedIndex { engine, offsets })
    }
}

/// Serializes a snapshot, optionally brotli-compressed.
pub fn encode(snapshot: &IndexSnapshot, compress: bool) -> IndexResult<Vec<u8>> {
    let json = serde_json::to_vec(snapshot).map_err(|e| IndexError::encode_failed(e.to_string()))?;
    if !compress {
        return Ok(json);
    }
    let mut out = Vec::with_capacity(json.len() / 4);
    {
        let mut writer = brotli::CompressorWriter::new(&mut out, BROTLI_BUFFER, BROTLI_QUALITY, BROTLI_WINDOW);
        writer
            .write_all(&json)
            .map_err(|e| IndexError::encode_failed(format!("brotli: {}", e)))?;
        writer
            .flush()
            .map_err(|e| IndexError::encode_failed(format!("brotli: {}", e)))?;
    }
    Ok(out)
}

/// Parses index file bytes, plain or compressed.
pub fn decode(bytes: &[u8]) -> IndexResult<IndexSnapshot> {
    let first = bytes.iter().find(|b| !b.is_ascii_whitespace());
    if first == Some(&b'{') {
        if let Ok(snapshot) = serde_json::from_slice::<IndexSnapshot>(bytes) {
            return Ok(snapshot);
        }
    }

    let mut json = Vec::new();
    let mut reader = brotli::Decompressor::new(bytes, BROTLI_BUFFER);
    if reader.read_to_end(&mut json).is_ok() {
        return serde_json::from_slice(&json)
            .map_err(|e| IndexError::corrupt(format!("Invalid index JSON: {}", e)));
    }

    serde_json::from_slice(bytes).map_err(|e| IndexError::corrupt(format!("Invalid index file: {}", e)))
}
