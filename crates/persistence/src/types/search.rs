//! Search specification model.
//!
//! A [`Search`] describes *what* to query: a tree of predicates, sorting and
//! pagination options, and the visibility scope the caller declares. It holds
//! no execution logic; the [`QueryCompiler`](crate::query::QueryCompiler)
//! turns it into pipeline stages.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::SearchError;
use crate::tenant::{IntendedAudience, ResourceOwner, TenantContext};

/// Logical name of the primary key in every field access schema.
pub const ID_FIELD: &str = "ID";

/// Comparison applied by a [`SearchableValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SearchOperator {
    /// Exact match.
    #[serde(rename = "eq")]
    Equals,
    /// Not equal.
    #[serde(rename = "ne")]
    NotEquals,
    /// Greater than.
    #[serde(rename = "gt")]
    GreaterThan,
    /// Less than.
    #[serde(rename = "lt")]
    LessThan,
    /// Greater than or equal.
    #[serde(rename = "gte")]
    GreaterOrEqual,
    /// Less than or equal.
    #[serde(rename = "lte")]
    LessOrEqual,
    /// Case-insensitive substring match.
    #[serde(rename = "contains")]
    Contains,
    /// Case-insensitive prefix match.
    #[serde(rename = "startswith")]
    StartsWith,
    /// Case-insensitive suffix match.
    #[serde(rename = "endswith")]
    EndsWith,
    /// Matches any of the given values.
    #[default]
    #[serde(rename = "in")]
    In,
    /// Matches none of the given values.
    #[serde(rename = "nin")]
    NotIn,
}

impl SearchOperator {
    /// Returns the wire name of the operator.
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchOperator::Equals => "eq",
            SearchOperator::NotEquals => "ne",
            SearchOperator::GreaterThan => "gt",
            SearchOperator::LessThan => "lt",
            SearchOperator::GreaterOrEqual => "gte",
            SearchOperator::LessOrEqual => "lte",
            SearchOperator::Contains => "contains",
            SearchOperator::StartsWith => "startswith",
            SearchOperator::EndsWith => "endswith",
            SearchOperator::In => "in",
            SearchOperator::NotIn => "nin",
        }
    }
}

impl fmt::Display for SearchOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchOperator {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eq" => Ok(SearchOperator::Equals),
            "ne" => Ok(SearchOperator::NotEquals),
            "gt" => Ok(SearchOperator::GreaterThan),
            "lt" => Ok(SearchOperator::LessThan),
            "gte" => Ok(SearchOperator::GreaterOrEqual),
            "lte" => Ok(SearchOperator::LessOrEqual),
            "contains" => Ok(SearchOperator::Contains),
            "startswith" => Ok(SearchOperator::StartsWith),
            "endswith" => Ok(SearchOperator::EndsWith),
            "in" => Ok(SearchOperator::In),
            "nin" => Ok(SearchOperator::NotIn),
            other => Err(SearchError::UnsupportedOperator {
                operator: other.to_string(),
            }),
        }
    }
}

/// A predicate on a single logical field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchableValue {
    /// Logical field name, possibly dotted or ending in `.*`.
    pub field: String,
    /// The comparison to apply.
    #[serde(default)]
    pub operator: SearchOperator,
    /// Operands. Single-value operators use the first one.
    #[serde(default)]
    pub values: Vec<Value>,
}

impl SearchableValue {
    /// Creates a predicate.
    pub fn new(field: impl Into<String>, operator: SearchOperator, values: Vec<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            values,
        }
    }

    /// Creates an equality predicate.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, SearchOperator::Equals, vec![value.into()])
    }

    /// Creates a set-membership predicate.
    pub fn any_of<I, V>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::new(
            field,
            SearchOperator::In,
            values.into_iter().map(Into::into).collect(),
        )
    }
}

/// A date range on a single logical field. Either bound may be absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchableDateRange {
    /// Logical field name.
    pub field: String,
    /// Inclusive lower bound.
    #[serde(default)]
    pub min: Option<DateTime<Utc>>,
    /// Inclusive upper bound.
    #[serde(default)]
    pub max: Option<DateTime<Utc>>,
}

impl SearchableDateRange {
    /// Creates a date range.
    pub fn new(
        field: impl Into<String>,
        min: Option<DateTime<Utc>>,
        max: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            field: field.into(),
            min,
            max,
        }
    }
}

/// A duration range on a single logical field. Durations are stored as
/// whole milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchableDurationRange {
    /// Logical field name.
    pub field: String,
    /// Inclusive lower bound.
    #[serde(default)]
    pub min: Option<Duration>,
    /// Inclusive upper bound.
    #[serde(default)]
    pub max: Option<Duration>,
}

impl SearchableDurationRange {
    /// Creates a duration range.
    pub fn new(field: impl Into<String>, min: Option<Duration>, max: Option<Duration>) -> Self {
        Self {
            field: field.into(),
            min,
            max,
        }
    }
}

/// A group of predicates inside an aggregation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchParameter {
    /// Field value predicates.
    #[serde(default, rename = "values")]
    pub value_params: Vec<SearchableValue>,
    /// Date range predicates.
    #[serde(default, rename = "date")]
    pub date_params: Vec<SearchableDateRange>,
    /// Duration range predicates.
    #[serde(default, rename = "time")]
    pub duration_params: Vec<SearchableDurationRange>,
    /// Nested aggregations.
    #[serde(default, rename = "aggregate")]
    pub aggregation_params: Vec<SearchAggregation>,
}

impl SearchParameter {
    /// A parameter holding value predicates only.
    pub fn values(values: Vec<SearchableValue>) -> Self {
        Self {
            value_params: values,
            ..Default::default()
        }
    }

    /// A parameter holding date ranges only.
    pub fn dates(dates: Vec<SearchableDateRange>) -> Self {
        Self {
            date_params: dates,
            ..Default::default()
        }
    }

    /// A parameter holding duration ranges only.
    pub fn durations(durations: Vec<SearchableDurationRange>) -> Self {
        Self {
            duration_params: durations,
            ..Default::default()
        }
    }

    /// A parameter holding nested aggregations only.
    pub fn aggregations(aggregations: Vec<SearchAggregation>) -> Self {
        Self {
            aggregation_params: aggregations,
            ..Default::default()
        }
    }

    /// Returns `true` if the parameter holds no predicates.
    pub fn is_empty(&self) -> bool {
        self.value_params.is_empty()
            && self.date_params.is_empty()
            && self.duration_params.is_empty()
            && self.aggregation_params.is_empty()
    }
}

/// How the clauses of an aggregation are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AggregationClause {
    /// All clauses must hold.
    #[default]
    And,
    /// At least one clause must hold.
    Or,
}

impl AggregationClause {
    /// Returns the pipeline operator for the clause.
    pub fn operator(&self) -> &'static str {
        match self {
            AggregationClause::And => "$and",
            AggregationClause::Or => "$or",
        }
    }
}

/// A recursively composable group of predicates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchAggregation {
    /// The grouped parameters.
    #[serde(default)]
    pub params: Vec<SearchParameter>,
    /// How the parameters' clauses are combined.
    #[serde(default, rename = "type")]
    pub clause: AggregationClause,
}

impl SearchAggregation {
    /// Combines the parameters with AND.
    pub fn and(params: Vec<SearchParameter>) -> Self {
        Self {
            params,
            clause: AggregationClause::And,
        }
    }

    /// Combines the parameters with OR.
    pub fn or(params: Vec<SearchParameter>) -> Self {
        Self {
            params,
            clause: AggregationClause::Or,
        }
    }
}

/// Sort order of a [`SortableField`]. Serialized as `1` or `-1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(into = "i8", try_from = "i8")]
pub enum SortDirection {
    /// Smallest first.
    #[default]
    Ascending,
    /// Largest first.
    Descending,
}

impl SortDirection {
    /// Returns the pipeline value of the direction.
    pub fn as_i8(&self) -> i8 {
        match self {
            SortDirection::Ascending => 1,
            SortDirection::Descending => -1,
        }
    }
}

impl From<SortDirection> for i8 {
    fn from(direction: SortDirection) -> Self {
        direction.as_i8()
    }
}

impl TryFrom<i8> for SortDirection {
    type Error = String;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(SortDirection::Ascending),
            -1 => Ok(SortDirection::Descending),
            other => Err(format!("invalid sort direction {other}, expected 1 or -1")),
        }
    }
}

/// A field to sort by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortableField {
    /// Logical field name.
    pub field: String,
    /// Sort order.
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortableField {
    /// Sorts ascending by the field.
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Ascending,
        }
    }

    /// Sorts descending by the field.
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Descending,
        }
    }
}

/// Pagination and projection options.
///
/// `pick_fields` and `omit_fields` are mutually exclusive. A zero `limit`
/// means the configured default page size.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResultOptions {
    /// Number of records to skip.
    #[serde(default)]
    pub skip: u64,
    /// Maximum number of records to return.
    #[serde(default)]
    pub limit: u64,
    /// Fields to return. Empty means all.
    #[serde(default, rename = "pick")]
    pub pick_fields: Vec<String>,
    /// Fields to leave out.
    #[serde(default, rename = "omit")]
    pub omit_fields: Vec<String>,
}

impl SearchResultOptions {
    /// Creates options with the given page window.
    pub fn new(skip: u64, limit: u64) -> Self {
        Self {
            skip,
            limit,
            ..Default::default()
        }
    }
}

/// The visibility scope declared by a search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchVisibilityOptions {
    /// Who the search claims to run as.
    pub request_source: ResourceOwner,
    /// The scope the search is intended to cover.
    pub intended_audience: IntendedAudience,
}

/// A complete, immutable search specification.
///
/// Visibility options are never read from serialized input. They come from
/// the constructors, which derive the request source from a
/// [`TenantContext`]. A deserialized search carries a nil request source
/// and is rejected by tenancy enforcement until
/// [`with_visibility`](Self::with_visibility) is applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Search {
    /// Top-level aggregations, combined with AND.
    #[serde(default)]
    pub search_params: Vec<SearchAggregation>,
    /// Pagination and projection.
    #[serde(default)]
    pub result_options: SearchResultOptions,
    /// Sort order, in priority order.
    #[serde(default)]
    pub sort_options: Vec<SortableField>,
    /// Declared visibility scope.
    #[serde(skip)]
    pub visibility_options: SearchVisibilityOptions,
}

impl Search {
    /// An unfiltered search over the caller's visible records.
    pub fn new(ctx: &TenantContext, audience: IntendedAudience) -> Self {
        Self::by_aggregation(ctx, Vec::new(), SearchResultOptions::default(), audience)
    }

    /// A search for a single record by primary key.
    pub fn by_id(ctx: &TenantContext, id: Uuid, audience: IntendedAudience) -> Self {
        let params = vec![SearchAggregation::and(vec![SearchParameter::values(vec![
            SearchableValue::eq(ID_FIELD, id.to_string()),
        ])])];
        Self::by_aggregation(ctx, params, SearchResultOptions::new(0, 1), audience)
    }

    /// A search whose predicates are all AND-ed value predicates.
    pub fn by_values(
        ctx: &TenantContext,
        values: Vec<SearchableValue>,
        result_options: SearchResultOptions,
        audience: IntendedAudience,
    ) -> Self {
        let params = vec![SearchAggregation::and(vec![SearchParameter::values(values)])];
        Self::by_aggregation(ctx, params, result_options, audience)
    }

    /// A search whose predicates are all AND-ed date ranges.
    pub fn by_date_range(
        ctx: &TenantContext,
        dates: Vec<SearchableDateRange>,
        result_options: SearchResultOptions,
        audience: IntendedAudience,
    ) -> Self {
        let params = vec![SearchAggregation::and(vec![SearchParameter::dates(dates)])];
        Self::by_aggregation(ctx, params, result_options, audience)
    }

    /// A search over arbitrary aggregations.
    pub fn by_aggregation(
        ctx: &TenantContext,
        search_params: Vec<SearchAggregation>,
        result_options: SearchResultOptions,
        audience: IntendedAudience,
    ) -> Self {
        Self {
            search_params,
            result_options,
            sort_options: Vec::new(),
            visibility_options: SearchVisibilityOptions {
                request_source: ctx.request_source(),
                intended_audience: audience,
            },
        }
    }

    /// Replaces the declared visibility scope.
    pub fn with_visibility(mut self, visibility: SearchVisibilityOptions) -> Self {
        self.visibility_options = visibility;
        self
    }

    /// Appends a sort field.
    pub fn with_sort(mut self, sort: SortableField) -> Self {
        self.sort_options.push(sort);
        self
    }

    /// Sets the number of records to skip.
    pub fn with_skip(mut self, skip: u64) -> Self {
        self.result_options.skip = skip;
        self
    }

    /// Sets the page size.
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.result_options.limit = limit;
        self
    }

    /// Returns only the given fields.
    pub fn with_pick<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.result_options.pick_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Leaves out the given fields.
    pub fn with_omit<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.result_options.omit_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Returns the declared audience.
    pub fn audience(&self) -> IntendedAudience {
        self.visibility_options.intended_audience
    }

    /// Returns the declared request source.
    pub fn request_source(&self) -> &ResourceOwner {
        &self.visibility_options.request_source
    }
}
