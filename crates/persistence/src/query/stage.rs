//! Pipeline stages.

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

/// One stage of a compiled pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    /// `$match` filter document.
    Match(Value),
    /// `$project` document of `path: 0 | 1` entries.
    Project(Value),
    /// `$sort` document of `path: 1 | -1` entries, in priority order.
    Sort(Value),
    /// `$skip` count.
    Skip(u64),
    /// `$limit` count.
    Limit(u64),
}

impl Stage {
    /// Returns the pipeline operator of the stage.
    pub fn operator(&self) -> &'static str {
        match self {
            Stage::Match(_) => "$match",
            Stage::Project(_) => "$project",
            Stage::Sort(_) => "$sort",
            Stage::Skip(_) => "$skip",
            Stage::Limit(_) => "$limit",
        }
    }

    /// Renders the stage as a single-key document.
    pub fn to_document(&self) -> Value {
        let body = match self {
            Stage::Match(v) | Stage::Project(v) | Stage::Sort(v) => v.clone(),
            Stage::Skip(n) | Stage::Limit(n) => Value::from(*n),
        };
        document(self.operator(), body)
    }

    /// Parses a single-key stage document.
    pub fn from_document(doc: &Value) -> Option<Stage> {
        let map = doc.as_object()?;
        if map.len() != 1 {
            return None;
        }
        let (op, body) = map.iter().next()?;
        match op.as_str() {
            "$match" => Some(Stage::Match(body.clone())),
            "$project" => Some(Stage::Project(body.clone())),
            "$sort" => Some(Stage::Sort(body.clone())),
            "$skip" => body.as_u64().map(Stage::Skip),
            "$limit" => body.as_u64().map(Stage::Limit),
            _ => None,
        }
    }
}

/// An ordered list of stages ready for a document store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    /// Creates an empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a stage.
    pub fn push(&mut self, stage: Stage) {
        self.stages.push(stage);
    }

    /// Returns the stages in order.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Returns the number of stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if the pipeline has no stages.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Returns the filter of the first `$match` stage.
    pub fn match_filter(&self) -> Option<&Value> {
        self.stages.iter().find_map(|s| match s {
            Stage::Match(v) => Some(v),
            _ => None,
        })
    }

    /// Returns the `$skip` count, or 0.
    pub fn skip(&self) -> u64 {
        self.stages
            .iter()
            .find_map(|s| match s {
                Stage::Skip(n) => Some(*n),
                _ => None,
            })
            .unwrap_or(0)
    }

    /// Returns the `$limit` count, if any.
    pub fn limit(&self) -> Option<u64> {
        self.stages.iter().find_map(|s| match s {
            Stage::Limit(n) => Some(*n),
            _ => None,
        })
    }

    /// Replaces the `$match` filter, inserting a leading `$match` stage if
    /// there is none.
    pub fn with_match(mut self, filter: Value) -> Self {
        match self.stages.iter_mut().find(|s| matches!(s, Stage::Match(_))) {
            Some(stage) => *stage = Stage::Match(filter),
            None => self.stages.insert(0, Stage::Match(filter)),
        }
        self
    }

    /// Renders every stage as a document.
    pub fn to_documents(&self) -> Vec<Value> {
        self.stages.iter().map(Stage::to_document).collect()
    }
}

impl Serialize for Pipeline {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_documents().serialize(serializer)
    }
}

/// Builds a single-key document.
pub(crate) fn document(key: impl Into<String>, value: Value) -> Value {
    let mut map = Map::with_capacity(1);
    map.insert(key.into(), value);
    Value::Object(map)
}
