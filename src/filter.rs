//! CQL2 JSON filter construction for faceted item searches.
//!
//! Each facet with selected values becomes an OR of equalities; active
//! facets are combined with AND. Facets without values are omitted, and a
//! search with no active facet sends no filter at all.

use serde_json::{json, Value};

pub const FILTER_LANG: &str = "cql2-json";

/// The facet values picked for one search.
#[derive(Debug, Clone, Default)]
pub struct FacetSelection {
    pub years: Vec<i64>,
    pub resolutions: Vec<String>,
    pub projects: Vec<String>,
}

impl FacetSelection {
    /// The combined filter expression, or `None` when no facet is active.
    pub fn to_cql2(&self) -> Option<Value> {
        let mut conditions = Vec::new();

        if !self.years.is_empty() {
            let values: Vec<Value> = self.years.iter().map(|y| json!(y)).collect();
            conditions.push(or_condition("year", values));
        }
        if !self.resolutions.is_empty() {
            let values: Vec<Value> = self.resolutions.iter().map(|r| json!(r)).collect();
            conditions.push(or_condition("resolution", values));
        }
        if !self.projects.is_empty() {
            let values: Vec<Value> = self.projects.iter().map(|p| json!(p)).collect();
            conditions.push(or_condition("project", values));
        }

        match conditions.len() {
            0 => None,
            1 => conditions.pop(),
            _ => Some(json!({"op": "and", "args": conditions})),
        }
    }
}

fn eq_condition(field: &str, value: Value) -> Value {
    json!({"op": "=", "args": [{"property": field}, value]})
}

fn or_condition(field: &str, values: Vec<Value>) -> Value {
    let mut conditions: Vec<Value> = values
        .into_iter()
        .map(|value| eq_condition(field, value))
        .collect();
    if conditions.len() == 1 {
        conditions.remove(0)
    } else {
        json!({"op": "or", "args": conditions})
    }
}
