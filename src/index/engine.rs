//! Index engine: per-field postings tables
//!
//! Holds one `BTreeMap<IndexKey, Postings>` per indexed field. String and
//! string-array fields are term-mapped when enabled: their keys are term
//! ids from the field's `TermDictionary`.
//!
//! # Resolution
//!
//! `candidates` answers a criteria tree from postings alone. The answer is
//! either exact (no per-record check needed) or a superset to be filtered,
//! or `None` when the index cannot narrow the search at all.
//!
//! Line numbers in postings are always below `line_count`.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use super::errors::{IndexError, IndexResult};
use super::key::IndexKey;
use super::postings::Postings;
use super::terms::TermDictionary;
use crate::planner::{CompareOp, Condition, Criteria, Pattern};
use crate::schema::{FieldType, Schema};

pub type LineSet = BTreeSet<usize>;

/// Lines the index selected for a criteria tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidates {
    pub lines: LineSet,
    /// `true` when every line in `lines` is known to match
    pub exact: bool,
}

/// Options for the existence primitive
#[derive(Debug, Clone, Default)]
pub struct ExistsOptions {
    /// All values must co-occur on at least one record
    pub all: bool,
    /// Values whose records are removed from the candidates first
    pub excludes: Vec<Value>,
    /// Compare string values ignoring case
    pub case_insensitive: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct IndexedField {
    pub(crate) name: String,
    pub(crate) position: usize,
    pub(crate) field_type: FieldType,
    pub(crate) terms: Option<TermDictionary>,
    pub(crate) postings: BTreeMap<IndexKey, Postings>,
}

impl IndexedField {
    pub(crate) fn is_mapped(&self) -> bool {
        self.terms.is_some()
    }

    /// Scalar values of a row cell that receive postings
    fn cell_values<'a>(&self, cell: &'a Value) -> Vec<&'a Value> {
        let values: Vec<&Value> = match cell {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };
        values
            .into_iter()
            .filter(|v| matches!(v, Value::Bool(_) | Value::Number(_) | Value::String(_)))
            .collect()
    }

    fn assign_key(&mut self, value: &Value) -> Option<IndexKey> {
        match (&mut self.terms, value) {
            (Some(dict), Value::String(s)) => Some(IndexKey::Term(dict.map_term(s))),
            _ => IndexKey::from_scalar(value),
        }
    }

    fn lookup_key(&self, value: &Value) -> Option<IndexKey> {
        match (&self.terms, value) {
            (Some(dict), Value::String(s)) => dict.lookup(s).map(IndexKey::Term),
            _ => IndexKey::from_scalar(value),
        }
    }

    fn text_of<'a>(&'a self, key: &'a IndexKey) -> Option<&'a str> {
        match (key, &self.terms) {
            (IndexKey::Term(id), Some(dict)) => dict.term(*id),
            (IndexKey::Text(s), _) => Some(s),
            _ => None,
        }
    }

    /// Every (text, postings) pair of this field
    fn text_entries(&self) -> impl Iterator<Item = (&str, &Postings)> {
        self.postings
            .iter()
            .filter_map(move |(key, postings)| self.text_of(key).map(|t| (t, postings)))
    }

    fn lines_for_key(&self, key: Option<IndexKey>) -> LineSet {
        key.and_then(|k| self.postings.get(&k))
            .map(|p| p.to_set())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct IndexEngine {
    fields: Vec<IndexedField>,
    line_count: usize,
}

impl IndexEngine {
    /// Creates an empty engine for `indexes`, all of which must be declared.
    pub fn new(schema: &Schema, indexes: &[String], term_mapping: bool) -> IndexResult<Self> {
        let mut fields = Vec::with_capacity(indexes.len());
        for name in indexes {
            if fields.iter().any(|f: &IndexedField| &f.name == name) {
                continue;
            }
            let position = schema.position(name).ok_or_else(|| IndexError::unknown_field(name))?;
            let field_type = schema.fields()[position].field_type;
            let terms = (term_mapping && field_type.is_textual()).then(TermDictionary::new);
            fields.push(IndexedField {
                name: name.clone(),
                position,
                field_type,
                terms,
                postings: BTreeMap::new(),
            });
        }
        Ok(Self {
            fields,
            line_count: 0,
        })
    }

    pub fn indexed_fields(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    pub fn is_indexed(&self, field: &str) -> bool {
        self.field(field).is_some()
    }

    /// Number of line numbers the engine accounts for
    pub fn line_count(&self) -> usize {
        self.line_count
    }

    pub fn set_line_count(&mut self, count: usize) {
        self.line_count = count;
    }

    pub(crate) fn field(&self, name: &str) -> Option<&IndexedField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub(crate) fn fields_mut(&mut self) -> &mut [IndexedField] {
        &mut self.fields
    }

    pub(crate) fn fields_ref(&self) -> &[IndexedField] {
        &self.fields
    }

    /// Adds postings for every indexed value of `row` at `line`.
    pub fn add_record(&mut self, line: usize, row: &[Value]) {
        for field in &mut self.fields {
            let Some(cell) = row.get(field.position) else {
                continue;
            };
            let keys: Vec<IndexKey> = field
                .cell_values(cell)
                .into_iter()
                .filter_map(|v| field.assign_key(v))
                .collect();
            for key in keys {
                field.postings.entry(key).or_default().insert(line);
            }
        }
        self.line_count = self.line_count.max(line + 1);
    }

    /// Removes the postings `row` produced at `line`.
    pub fn remove_record(&mut self, line: usize, row: &[Value]) {
        for field in &mut self.fields {
            let Some(cell) = row.get(field.position) else {
                continue;
            };
            let keys: Vec<IndexKey> = field
                .cell_values(cell)
                .into_iter()
                .filter_map(|v| field.lookup_key(v))
                .collect();
            for key in keys {
                if let Some(postings) = field.postings.get_mut(&key) {
                    postings.remove(line);
                    if postings.is_empty() {
                        field.postings.remove(&key);
                    }
                }
            }
        }
    }

    /// Drops `deleted` lines and renumbers survivors to close the gaps.
    pub fn remove_lines(&mut self, deleted: &[usize]) {
        let mut deleted: Vec<usize> = deleted.to_vec();
        deleted.sort_unstable();
        deleted.dedup();
        if deleted.is_empty() {
            return;
        }
        for field in &mut self.fields {
            for postings in field.postings.values_mut() {
                postings.shift_out(&deleted);
            }
            field.postings.retain(|_, p| !p.is_empty());
        }
        let removed = deleted.iter().filter(|l| **l < self.line_count).count();
        self.line_count -= removed;
    }

    /// Compacts runs of consecutive lines into ranges.
    pub fn compact(&mut self, min_run: usize) {
        for field in &mut self.fields {
            for postings in field.postings.values_mut() {
                postings.compact(min_run);
            }
        }
    }

    /// Fails if any posting references a line at or past `line_count`.
    pub fn validate(&self) -> IndexResult<()> {
        for field in &self.fields {
            for (key, postings) in &field.postings {
                if let Some(max) = postings.max() {
                    if max >= self.line_count {
                        return Err(IndexError::stale(format!(
                            "Field '{}' key '{}' references line {} but only {} lines exist",
                            field.name,
                            key.to_storage_key(),
                            max,
                            self.line_count
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Exact match set, when the index alone can answer.
    pub fn query(&self, criteria: &Criteria) -> Option<LineSet> {
        self.candidates(criteria)
            .filter(|c| c.exact)
            .map(|c| c.lines)
    }

    /// Narrows `criteria` to candidate lines.
    pub fn candidates(&self, criteria: &Criteria) -> Option<Candidates> {
        match criteria {
            Criteria::All => Some(Candidates {
                lines: self.universe(),
                exact: true,
            }),
            Criteria::Nothing => Some(Candidates {
                lines: LineSet::new(),
                exact: true,
            }),
            Criteria::Field { field, conditions } => {
                let indexed = self.field(field)?;
                self.resolve_field(indexed, conditions)
            }
            Criteria::And(children) => {
                let mut acc: Option<LineSet> = None;
                let mut exact = true;
                for child in children {
                    match self.candidates(child) {
                        Some(c) => {
                            exact &= c.exact;
                            acc = Some(match acc {
                                None => c.lines,
                                Some(a) => a.intersection(&c.lines).copied().collect(),
                            });
                        }
                        None => exact = false,
                    }
                }
                match acc {
                    Some(lines) => Some(Candidates { lines, exact }),
                    None if children.is_empty() => Some(Candidates {
                        lines: self.universe(),
                        exact: true,
                    }),
                    None => None,
                }
            }
            Criteria::Or(children) => {
                let mut lines = LineSet::new();
                let mut exact = true;
                for child in children {
                    let c = self.candidates(child)?;
                    exact &= c.exact;
                    lines.extend(c.lines);
                }
                Some(Candidates { lines, exact })
            }
            Criteria::Not(child) => {
                let inner = self.candidates(child)?;
                if !inner.exact {
                    return None;
                }
                let lines = self.universe().difference(&inner.lines).copied().collect();
                Some(Candidates { lines, exact: true })
            }
        }
    }

    /// Index-only existence check.
    ///
    /// Returns `None` when the field is not indexed or a value cannot be
    /// looked up; the caller then falls back to a full query.
    pub fn exists(&self, field: &str, values: &[Value], options: &ExistsOptions) -> Option<bool> {
        let indexed = self.field(field)?;
        if values.is_empty() {
            return None;
        }

        let mut candidate: Option<LineSet> = None;
        for value in values {
            let lines = self.lookup_value(indexed, value, options.case_insensitive)?;
            candidate = Some(match candidate {
                None => lines,
                Some(acc) if options.all => acc.intersection(&lines).copied().collect(),
                Some(mut acc) => {
                    acc.extend(lines);
                    acc
                }
            });
        }
        let mut candidate = candidate.unwrap_or_default();

        for value in &options.excludes {
            let excluded = self.lookup_value(indexed, value, options.case_insensitive)?;
            candidate.retain(|l| !excluded.contains(l));
        }
        Some(!candidate.is_empty())
    }

    fn universe(&self) -> LineSet {
        (0..self.line_count).collect()
    }

    fn lookup_value(&self, field: &IndexedField, value: &Value, case_insensitive: bool) -> Option<LineSet> {
        match value {
            Value::String(s) if case_insensitive => {
                // Same matcher as the query path, so both agree on case folding.
                let pattern = Pattern::equals_ignore_case(s).ok()?;
                let mut lines = LineSet::new();
                for (text, postings) in field.text_entries() {
                    if pattern.is_match(text) {
                        postings.union_into(&mut lines);
                    }
                }
                Some(lines)
            }
            Value::Bool(_) | Value::Number(_) | Value::String(_) => {
                Some(field.lines_for_key(field.lookup_key(value)))
            }
            _ => None,
        }
    }

    fn resolve_field(&self, field: &IndexedField, conditions: &[Condition]) -> Option<Candidates> {
        let mut acc: Option<LineSet> = None;
        let mut exact = true;
        for condition in conditions {
            match self.resolve_condition(field, condition) {
                Some(lines) => {
                    acc = Some(match acc {
                        None => lines,
                        Some(a) => a.intersection(&lines).copied().collect(),
                    });
                }
                None => exact = false,
            }
        }
        match acc {
            Some(lines) => Some(Candidates { lines, exact }),
            None if conditions.is_empty() => Some(Candidates {
                lines: self.universe(),
                exact: true,
            }),
            None => None,
        }
    }

    fn resolve_condition(&self, field: &IndexedField, condition: &Condition) -> Option<LineSet> {
        match condition {
            Condition::Eq(value) => self.lookup_value(field, value, false),
            Condition::In(values) => {
                let mut lines = LineSet::new();
                for value in values {
                    lines.extend(self.lookup_value(field, value, false)?);
                }
                Some(lines)
            }
            Condition::Ne(value) => {
                let matched = self.lookup_value(field, value, false)?;
                Some(self.universe().difference(&matched).copied().collect())
            }
            Condition::Nin(values) => {
                let matched = self.resolve_condition(field, &Condition::In(values.clone()))?;
                Some(self.universe().difference(&matched).copied().collect())
            }
            Condition::All(values) => {
                let mut acc: Option<LineSet> = None;
                for value in values {
                    let lines = self.lookup_value(field, value, false)?;
                    acc = Some(match acc {
                        None => lines,
                        Some(a) => a.intersection(&lines).copied().collect(),
                    });
                }
                Some(acc.unwrap_or_default())
            }
            Condition::Compare(op, operand) => self.resolve_compare(field, *op, operand),
            Condition::Regex(pattern) => {
                let mut lines = LineSet::new();
                for (text, postings) in field.text_entries() {
                    if pattern.is_match(text) {
                        postings.union_into(&mut lines);
                    }
                }
                Some(lines)
            }
            Condition::Contains(Value::String(needle)) => {
                let mut lines = LineSet::new();
                for (text, postings) in field.text_entries() {
                    if text.contains(needle.as_str()) {
                        postings.union_into(&mut lines);
                    }
                }
                Some(lines)
            }
            Condition::Contains(value) => self.lookup_value(field, value, false),
            Condition::Exists(_) => None,
        }
    }

    fn resolve_compare(&self, field: &IndexedField, op: CompareOp, operand: &Value) -> Option<LineSet> {
        let mut lines = LineSet::new();
        match operand {
            Value::Number(n) => {
                let target = n.as_f64()?;
                let numbers = field
                    .postings
                    .range(IndexKey::Number(0)..=IndexKey::Number(u64::MAX));
                for (key, postings) in numbers {
                    let accepted = key
                        .as_number()
                        .and_then(|v| v.partial_cmp(&target))
                        .map(|ord| op.accepts(ord))
                        .unwrap_or(false);
                    if accepted {
                        postings.union_into(&mut lines);
                    }
                }
                Some(lines)
            }
            Value::String(target) => {
                for (text, postings) in field.text_entries() {
                    if op.accepts(text.cmp(target.as_str())) {
                        postings.union_into(&mut lines);
                    }
                }
                Some(lines)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldDef;
    use serde_json::json;

    fn schema() -> Schema {
        Schema::new(vec![
            FieldDef::string("name"),
            FieldDef::number("age"),
            FieldDef::new("tags", FieldType::StringArray),
            FieldDef::string("bio"),
        ])
        .unwrap()
    }

    fn engine() -> IndexEngine {
        let indexes = vec!["name".to_string(), "age".to_string(), "tags".to_string()];
        let mut engine = IndexEngine::new(&schema(), &indexes, true).unwrap();
        let rows = [
            json!(["alice", 30, ["rust", "go"], "x"]),
            json!(["bob", 25, ["go"], "y"]),
            json!(["Alice", 41, ["zig"], "z"]),
            json!(["carol", null, [], "w"]),
        ];
        for (line, row) in rows.iter().enumerate() {
            engine.add_record(line, row.as_array().unwrap());
        }
        engine
    }

    fn lines(v: &[usize]) -> LineSet {
        v.iter().copied().collect()
    }

    fn parse(v: serde_json::Value) -> Criteria {
        Criteria::parse(&v).unwrap()
    }

    #[test]
    fn test_unknown_index_field_rejected() {
        let err = IndexEngine::new(&schema(), &["nope".to_string()], true).unwrap_err();
        assert_eq!(err.code(), super::super::IndexErrorCode::EmberIndexUnknownField);
    }

    #[test]
    fn test_equality_and_membership() {
        let e = engine();
        assert_eq!(e.query(&parse(json!({"name": "bob"}))), Some(lines(&[1])));
        assert_eq!(e.query(&parse(json!({"name": ["bob", "carol"]}))), Some(lines(&[1, 3])));
        assert_eq!(e.query(&parse(json!({"tags": "go"}))), Some(lines(&[0, 1])));
        assert_eq!(e.query(&parse(json!({"name": "nobody"}))), Some(lines(&[])));
    }

    #[test]
    fn test_numeric_comparisons() {
        let e = engine();
        assert_eq!(e.query(&parse(json!({"age": {"$gt": 25}}))), Some(lines(&[0, 2])));
        assert_eq!(e.query(&parse(json!({"age": {">=": 25, "<": 41}}))), Some(lines(&[0, 1])));
        assert_eq!(e.query(&parse(json!({"age": {"$lte": 30.0}}))), Some(lines(&[0, 1])));
    }

    #[test]
    fn test_negation_uses_all_lines() {
        let e = engine();
        assert_eq!(e.query(&parse(json!({"name": {"$ne": "bob"}}))), Some(lines(&[0, 2, 3])));
        assert_eq!(e.query(&parse(json!({"$not": {"tags": "go"}}))), Some(lines(&[2, 3])));
        assert_eq!(e.query(&parse(json!({"$not": {}}))), Some(lines(&[0, 1, 2, 3])));
        assert_eq!(e.query(&parse(json!({"tags": {"$nin": ["go", "zig"]}}))), Some(lines(&[3])));
    }

    #[test]
    fn test_logic_composition() {
        let e = engine();
        let c = parse(json!({"$or": [{"name": "bob"}, {"age": {"$gt": 40}}]}));
        assert_eq!(e.query(&c), Some(lines(&[1, 2])));
        let c = parse(json!({"tags": "go", "age": {"$lt": 28}}));
        assert_eq!(e.query(&c), Some(lines(&[1])));
        assert_eq!(e.query(&parse(json!({"$or": []}))), Some(lines(&[])));
    }

    #[test]
    fn test_partial_resolution_is_superset() {
        let e = engine();
        let c = parse(json!({"tags": "go", "bio": "y"}));
        let candidates = e.candidates(&c).unwrap();
        assert!(!candidates.exact);
        assert_eq!(candidates.lines, lines(&[0, 1]));
        assert_eq!(e.query(&c), None);

        assert!(e.candidates(&parse(json!({"bio": "y"}))).is_none());
        assert!(e.candidates(&parse(json!({"$or": [{"bio": "y"}, {"name": "bob"}]}))).is_none());
        assert!(e.candidates(&parse(json!({"$not": {"name": {"$exists": true}}}))).is_none());
    }

    #[test]
    fn test_regex_and_contains_scan_terms() {
        let e = engine();
        let c = parse(json!({"name": {"$regex": "^al", "$options": "i"}}));
        assert_eq!(e.query(&c), Some(lines(&[0, 2])));
        assert_eq!(e.query(&parse(json!({"name": {"contains": "aro"}}))), Some(lines(&[3])));
        assert_eq!(e.query(&parse(json!({"name": {"$gt": "b"}}))), Some(lines(&[1, 3])));
    }

    #[test]
    fn test_all_requires_co_occurrence() {
        let e = engine();
        assert_eq!(e.query(&parse(json!({"tags": {"$all": ["rust", "go"]}}))), Some(lines(&[0])));
        assert_eq!(e.query(&parse(json!({"tags": {"$all": ["zig", "go"]}}))), Some(lines(&[])));
    }

    #[test]
    fn test_exists_options() {
        let e = engine();
        let opts = ExistsOptions::default();
        assert_eq!(e.exists("tags", &[json!("zig")], &opts), Some(true));
        assert_eq!(e.exists("tags", &[json!("java")], &opts), Some(false));

        let all = ExistsOptions { all: true, ..Default::default() };
        assert_eq!(e.exists("tags", &[json!("rust"), json!("go")], &all), Some(true));
        assert_eq!(e.exists("tags", &[json!("rust"), json!("zig")], &all), Some(false));

        let excluding = ExistsOptions {
            excludes: vec![json!("rust")],
            ..Default::default()
        };
        assert_eq!(e.exists("tags", &[json!("go")], &excluding), Some(true));
        let excluding_all = ExistsOptions {
            excludes: vec![json!("go")],
            ..Default::default()
        };
        assert_eq!(e.exists("tags", &[json!("rust")], &excluding_all), Some(false));

        let ci = ExistsOptions { case_insensitive: true, ..Default::default() };
        assert_eq!(e.exists("name", &[json!("BOB")], &ci), Some(true));
        assert_eq!(e.exists("name", &[json!("BOB")], &opts), Some(false));

        assert_eq!(e.exists("bio", &[json!("x")], &opts), None);
        assert_eq!(e.exists("name", &[json!({"a": 1})], &opts), None);
    }

    #[test]
    fn test_remove_record_and_lines() {
        let mut e = engine();
        e.remove_record(1, json!(["bob", 25, ["go"], "y"]).as_array().unwrap());
        assert_eq!(e.query(&parse(json!({"name": "bob"}))), Some(lines(&[])));
        assert_eq!(e.field("age").unwrap().postings.len(), 2);

        e.remove_lines(&[1]);
        assert_eq!(e.line_count(), 3);
        assert_eq!(e.query(&parse(json!({"name": "carol"}))), Some(lines(&[2])));
        assert_eq!(e.query(&parse(json!({"tags": "zig"}))), Some(lines(&[1])));
        e.validate().unwrap();
    }

    #[test]
    fn test_term_ids_survive_deletion() {
        let mut e = engine();
        let term = |e: &IndexEngine| e.field("name").unwrap().terms.as_ref().unwrap().lookup("bob");
        let before = term(&e);
        e.remove_lines(&[1]);
        assert_eq!(term(&e), before);
    }

    #[test]
    fn test_validate_detects_stale_postings() {
        let mut e = engine();
        e.set_line_count(2);
        assert!(e.validate().unwrap_err().needs_rebuild());
    }
}
