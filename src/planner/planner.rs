//! Query planner
//!
//! Classifies every field a criteria tree references as INDEXED or
//! STREAMING and enforces the configured indexed query mode. Under strict
//! mode a streaming field anywhere in the tree, including inside `$and`,
//! `$or` and `$not`, rejects the query before any file access.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ast::Criteria;
use super::errors::{PlannerError, PlannerResult};

/// Whether queries may fall back to streaming for non-indexed fields
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexedQueryMode {
    #[default]
    Permissive,
    Strict,
}

/// Index metadata provided to the planner
#[derive(Debug, Clone, Default)]
pub struct IndexMetadata {
    /// Indexed field names in configuration order
    pub indexed_fields: Vec<String>,
}

impl IndexMetadata {
    pub fn with_indexes(fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            indexed_fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_indexed(&self, field: &str) -> bool {
        self.indexed_fields.iter().any(|f| f == field)
    }
}

/// Immutable query plan
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub criteria: Criteria,
    /// Referenced fields that have an index
    pub indexed: Vec<String>,
    /// Referenced fields that need per-record evaluation
    pub streaming: Vec<String>,
}

impl QueryPlan {
    /// Whether the index may narrow the candidate set
    pub fn uses_index(&self) -> bool {
        !self.indexed.is_empty() || matches!(self.criteria, Criteria::Nothing)
    }
}

pub struct QueryPlanner<'a> {
    index_metadata: &'a IndexMetadata,
    mode: IndexedQueryMode,
}

impl<'a> QueryPlanner<'a> {
    pub fn new(index_metadata: &'a IndexMetadata, mode: IndexedQueryMode) -> Self {
        Self {
            index_metadata,
            mode,
        }
    }

    /// Normalizes and checks raw JSON criteria.
    pub fn plan_json(&self, criteria: &Value) -> PlannerResult<QueryPlan> {
        self.plan(Criteria::parse(criteria)?)
    }

    pub fn plan(&self, criteria: Criteria) -> PlannerResult<QueryPlan> {
        self.check(&criteria)?;
        let (indexed, streaming): (Vec<&str>, Vec<&str>) = criteria
            .fields()
            .into_iter()
            .partition(|f| self.index_metadata.is_indexed(f));
        let indexed = indexed.into_iter().map(String::from).collect();
        let streaming = streaming.into_iter().map(String::from).collect();
        Ok(QueryPlan {
            criteria,
            indexed,
            streaming,
        })
    }

    /// Rejects streaming fields under strict mode, naming all of them.
    pub fn check(&self, criteria: &Criteria) -> PlannerResult<()> {
        if self.mode == IndexedQueryMode::Permissive {
            return Ok(());
        }
        let offending: Vec<String> = criteria
            .fields()
            .into_iter()
            .filter(|f| !self.index_metadata.is_indexed(f))
            .map(String::from)
            .collect();
        if offending.is_empty() {
            Ok(())
        } else {
            Err(PlannerError::unindexed_fields(
                offending,
                &self.index_metadata.indexed_fields,
            ))
        }
    }
}
