//! Search to pipeline compilation.

use chrono::SecondsFormat;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use super::operators;
use super::stage::{Pipeline, Stage, document};
use crate::config::{DepthOverflow, RepositoryConfig};
use crate::error::{SchemaError, SearchError, StorageResult};
use crate::schema::FieldAccessSchema;
use crate::types::{
    Search, SearchAggregation, SearchResultOptions, SearchableDateRange, SearchableDurationRange,
    SearchableValue, SortableField,
};

/// Compiles [`Search`] specifications into [`Pipeline`]s.
///
/// The compiler is pure: it reads the search and the schema and never
/// touches a store. Identical inputs produce identical pipelines. The
/// output carries no tenancy predicates yet; those are added by
/// [`TenancyGuard`](crate::tenant::TenancyGuard).
#[derive(Debug, Clone, Default)]
pub struct QueryCompiler {
    config: RepositoryConfig,
}

impl QueryCompiler {
    /// Creates a compiler with the given limits.
    pub fn new(config: RepositoryConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration in use.
    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    /// Compiles a search into `$match`, `$project`, `$sort`, `$skip` and
    /// `$limit` stages, in that order.
    ///
    /// `$project` is emitted only when pick or omit fields are given and
    /// `$sort` only when sort options are given.
    ///
    /// # Errors
    ///
    /// - [`SchemaError`] for fields that are unknown, not whitelisted, or for
    ///   pick and omit fields given together
    /// - [`SearchError`] for page sizes above the maximum, missing operands
    ///   and aggregations nested too deeply
    pub fn compile(&self, search: &Search, schema: &FieldAccessSchema) -> StorageResult<Pipeline> {
        let filter = self.compile_match(&search.search_params, schema)?;
        let projection = self.compile_projection(&search.result_options, schema)?;
        let sort = self.compile_sort(&search.sort_options, schema)?;
        let limit = self.effective_limit(search.result_options.limit)?;

        let mut pipeline = Pipeline::new();
        pipeline.push(Stage::Match(filter));
        if let Some(projection) = projection {
            pipeline.push(Stage::Project(projection));
        }
        if let Some(sort) = sort {
            pipeline.push(Stage::Sort(sort));
        }
        pipeline.push(Stage::Skip(search.result_options.skip));
        pipeline.push(Stage::Limit(limit));

        let rendered = Value::Array(pipeline.to_documents());
        debug!(
            entity_type = %schema.entity_type(),
            stages = pipeline.len(),
            pipeline = %rendered,
            "compiled search pipeline"
        );
        Ok(pipeline)
    }

    /// Runs every check [`compile`](Self::compile) runs and returns the
    /// first failure.
    pub fn validate_search(
        &self,
        search: &Search,
        schema: &FieldAccessSchema,
    ) -> StorageResult<()> {
        self.compile(search, schema).map(|_| ())
    }

    /// Compiles only the `$match` filter. Top-level aggregations are AND-ed.
    pub fn compile_match(
        &self,
        aggregations: &[SearchAggregation],
        schema: &FieldAccessSchema,
    ) -> StorageResult<Value> {
        let mut terms = Vec::with_capacity(aggregations.len());
        for aggregation in aggregations {
            if let Some(term) = self.compile_aggregation(aggregation, schema, 1)? {
                terms.push(term);
            }
        }

        Ok(match terms.len() {
            0 => json!({}),
            1 => terms.remove(0),
            _ => json!({ "$and": terms }),
        })
    }

    /// Resolves a page size request against the configured bounds.
    pub fn effective_limit(&self, requested: u64) -> Result<u64, SearchError> {
        if requested == 0 {
            return Ok(self.config.default_page_size);
        }
        if requested > self.config.max_page_size {
            warn!(
                requested,
                max = self.config.max_page_size,
                "page size rejected"
            );
            return Err(SearchError::PageSizeExceeded {
                requested,
                max: self.config.max_page_size,
            });
        }
        Ok(requested)
    }

    fn compile_aggregation(
        &self,
        aggregation: &SearchAggregation,
        schema: &FieldAccessSchema,
        depth: usize,
    ) -> StorageResult<Option<Value>> {
        if depth > self.config.max_recursion_depth {
            let max = self.config.max_recursion_depth;
            return match self.config.depth_overflow {
                DepthOverflow::Reject => Err(SearchError::MaxDepthExceeded { max }.into()),
                DepthOverflow::DropWithWarning => {
                    warn!(depth, max, "aggregation nested too deeply, subtree dropped");
                    Ok(None)
                }
            };
        }

        let mut clauses = Vec::new();
        for param in &aggregation.params {
            for value in &param.value_params {
                clauses.push(compile_value(value, schema)?);
            }
            for range in &param.date_params {
                clauses.extend(compile_date_range(range, schema)?);
            }
            for range in &param.duration_params {
                clauses.extend(compile_duration_range(range, schema)?);
            }
            for nested in &param.aggregation_params {
                clauses.extend(self.compile_aggregation(nested, schema, depth + 1)?);
            }
        }

        if clauses.is_empty() {
            return Ok(None);
        }
        Ok(Some(document(
            aggregation.clause.operator(),
            Value::Array(clauses),
        )))
    }

    fn compile_projection(
        &self,
        options: &SearchResultOptions,
        schema: &FieldAccessSchema,
    ) -> StorageResult<Option<Value>> {
        let (fields, flag) = match (
            options.pick_fields.is_empty(),
            options.omit_fields.is_empty(),
        ) {
            (false, false) => return Err(SchemaError::PickOmitConflict.into()),
            (true, true) => return Ok(None),
            (false, true) => (&options.pick_fields, 1),
            (true, false) => (&options.omit_fields, 0),
        };

        let mut projection = Map::new();
        for field in fields {
            // Omitting a denied field only hides it.
            let resolved = if flag == 1 {
                schema.resolve_unrestricted(field)?
            } else {
                schema.resolve(field)?
            };
            projection.insert(resolved.path, json!(flag));
        }
        Ok(Some(Value::Object(projection)))
    }

    fn compile_sort(
        &self,
        sort: &[SortableField],
        schema: &FieldAccessSchema,
    ) -> StorageResult<Option<Value>> {
        if sort.is_empty() {
            return Ok(None);
        }
        let mut spec = Map::new();
        for field in sort {
            let resolved = schema.resolve_unrestricted(&field.field)?;
            spec.entry(resolved.path)
                .or_insert_with(|| json!(field.direction.as_i8()));
        }
        Ok(Some(Value::Object(spec)))
    }
}

fn compile_value(value: &SearchableValue, schema: &FieldAccessSchema) -> StorageResult<Value> {
    let resolved = schema.resolve_queryable(&value.field)?;
    let predicate = operators::predicate(&value.field, value.operator, &value.values)?;
    let predicate = if resolved.element_match {
        json!({ "$elemMatch": predicate })
    } else {
        predicate
    };
    Ok(document(resolved.path, predicate))
}

fn compile_date_range(
    range: &SearchableDateRange,
    schema: &FieldAccessSchema,
) -> StorageResult<Option<Value>> {
    let resolved = schema.resolve_queryable(&range.field)?;
    let bounds = range_bounds(
        range
            .min
            .map(|d| json!(d.to_rfc3339_opts(SecondsFormat::AutoSi, true))),
        range
            .max
            .map(|d| json!(d.to_rfc3339_opts(SecondsFormat::AutoSi, true))),
    );
    Ok(bounds.map(|b| document(resolved.path, b)))
}

fn compile_duration_range(
    range: &SearchableDurationRange,
    schema: &FieldAccessSchema,
) -> StorageResult<Option<Value>> {
    let resolved = schema.resolve_queryable(&range.field)?;
    let millis = |d: std::time::Duration| json!(u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
    let bounds = range_bounds(range.min.map(millis), range.max.map(millis));
    Ok(bounds.map(|b| document(resolved.path, b)))
}

fn range_bounds(min: Option<Value>, max: Option<Value>) -> Option<Value> {
    let mut bounds = Map::new();
    if let Some(min) = min {
        bounds.insert("$gte".to_string(), min);
    }
    if let Some(max) = max {
        bounds.insert("$lte".to_string(), max);
    }
    (!bounds.is_empty()).then_some(Value::Object(bounds))
}
