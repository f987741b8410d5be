//! Operator table: search operators to pipeline predicates.

use serde_json::{Value, json};

use crate::error::SearchError;
use crate::types::SearchOperator;

/// Builds the predicate for one operator applied to caller values.
///
/// Comparison operators use the first value. Substring operators compile
/// to case-insensitive regular expressions over the escaped first value.
/// Set operators use every value.
pub(crate) fn predicate(
    field: &str,
    operator: SearchOperator,
    values: &[Value],
) -> Result<Value, SearchError> {
    let first = || {
        values.first().ok_or_else(|| SearchError::MissingOperand {
            field: field.to_string(),
            operator: operator.to_string(),
        })
    };

    let predicate = match operator {
        SearchOperator::Equals => json!({ "$eq": first()? }),
        SearchOperator::NotEquals => json!({ "$ne": first()? }),
        SearchOperator::GreaterThan => json!({ "$gt": first()? }),
        SearchOperator::LessThan => json!({ "$lt": first()? }),
        SearchOperator::GreaterOrEqual => json!({ "$gte": first()? }),
        SearchOperator::LessOrEqual => json!({ "$lte": first()? }),
        SearchOperator::Contains => regex_predicate(regex::escape(&text(first()?))),
        SearchOperator::StartsWith => {
            regex_predicate(format!("^{}", regex::escape(&text(first()?))))
        }
        SearchOperator::EndsWith => {
            regex_predicate(format!("{}$", regex::escape(&text(first()?))))
        }
        SearchOperator::In => json!({ "$in": values }),
        SearchOperator::NotIn => json!({ "$nin": values }),
    };
    Ok(predicate)
}

fn regex_predicate(pattern: String) -> Value {
    json!({ "$regex": pattern, "$options": "i" })
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
