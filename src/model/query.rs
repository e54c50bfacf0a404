use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::{AssocName, FieldName};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operator {
    Eq,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
}

impl Operator {
    /// Parse a range prefix (`lt`, `lte`, `gt`, `gte`, `in`), case-insensitively.
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix.to_ascii_lowercase().as_str() {
            "lt" => Some(Operator::Lt),
            "lte" => Some(Operator::Lte),
            "gt" => Some(Operator::Gt),
            "gte" => Some(Operator::Gte),
            "in" => Some(Operator::In),
            _ => None,
        }
    }

    pub fn sql(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::In => "IN",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Single(String),
    List(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub field: FieldName,
    pub op: Operator,
    pub value: FilterValue,
}

impl Filter {
    pub fn eq(field: &str, value: &str) -> Self {
        Self {
            field: field.to_string(),
            op: Operator::Eq,
            value: FilterValue::Single(value.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggFunc {
    Sum,
    Avg,
}

impl AggFunc {
    /// Query parameter names, in evaluation order.
    pub const ALL: [AggFunc; 2] = [AggFunc::Avg, AggFunc::Sum];

    pub fn param(&self) -> &'static str {
        match self {
            AggFunc::Sum => "sum",
            AggFunc::Avg => "avg",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregate {
    pub func: AggFunc,
    pub field: FieldName,
}

/// OR-search over a set of fields, either exact (`=`) or substring (`LIKE %term%`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchClause {
    pub term: String,
    pub fields: Vec<FieldName>,
    pub like: bool,
}

/// Node of an inclusion tree: one associated sub-resource to fetch along with its parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociationInclude {
    /// Name of the target model.
    pub model: String,
    pub alias: AssocName,
    pub attributes: Option<Vec<FieldName>>,
    #[serde(rename = "where")]
    pub where_clause: Option<BTreeMap<FieldName, String>>,
    /// `None` leaves the join type to the datastore (inner join iff `where` is set).
    pub required: Option<bool>,
    pub children: Vec<AssociationInclude>,
}

impl AssociationInclude {
    pub fn new(model: &str, alias: &str) -> Self {
        Self {
            model: model.to_string(),
            alias: alias.to_string(),
            attributes: None,
            where_clause: None,
            required: None,
            children: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_child(mut self, child: AssociationInclude) -> Self {
        self.children = merge_includes(self.children, child);
        self
    }

    /// Whether parents without a matching child are dropped.
    pub fn is_required(&self) -> bool {
        self.required.unwrap_or(self.where_clause.is_some())
    }

    /// Combine two nodes describing the same alias into a new node.
    ///
    /// `other` is the later (filter-derived) node: its `where` values win per key and
    /// its explicit `required` wins. Restricted attribute lists are unioned. A bare
    /// expansion of the alias asks for every field, so it lifts any restriction.
    #[must_use]
    pub fn merge(self, other: AssociationInclude) -> AssociationInclude {
        let whole = self.is_bare() || other.is_bare();
        let where_clause = match (self.where_clause, other.where_clause) {
            (None, None) => None,
            (Some(w), None) | (None, Some(w)) => Some(w),
            (Some(mut base), Some(later)) => {
                base.extend(later);
                Some(base)
            }
        };
        let attributes = match (self.attributes, other.attributes) {
            _ if whole => None,
            (None, None) => None,
            (Some(a), None) | (None, Some(a)) => Some(a),
            (Some(mut base), Some(later)) => {
                for attr in later {
                    if !base.contains(&attr) {
                        base.push(attr);
                    }
                }
                Some(base)
            }
        };
        let children = other
            .children
            .into_iter()
            .fold(self.children, merge_includes);

        AssociationInclude {
            model: self.model,
            alias: self.alias,
            attributes,
            where_clause,
            required: other.required.or(self.required),
            children,
        }
    }

    /// No projection, no constraint and nothing nested: a plain `expand=<alias>`.
    fn is_bare(&self) -> bool {
        self.attributes.is_none() && self.where_clause.is_none() && self.children.is_empty()
    }
}

/// Add `node` to a list of sibling includes, merging with an existing sibling of the
/// same alias and otherwise appending.
pub fn merge_includes(
    siblings: Vec<AssociationInclude>,
    node: AssociationInclude,
) -> Vec<AssociationInclude> {
    let mut pending = Some(node);
    let mut merged: Vec<AssociationInclude> = siblings
        .into_iter()
        .map(|existing| match pending.take() {
            Some(node) if node.alias == existing.alias => existing.merge(node),
            other => {
                pending = other;
                existing
            }
        })
        .collect();
    if let Some(node) = pending {
        merged.push(node);
    }
    merged
}

/// Validated, structured representation of one request's criteria.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QuerySpec {
    pub filters: Vec<Filter>,
    pub offset: Option<u32>,
    pub limit: Option<u32>,
    pub order: Vec<(FieldName, Direction)>,
    pub group: Option<FieldName>,
    pub selected_fields: Option<Vec<FieldName>>,
    pub aggregates: Vec<Aggregate>,
    pub search: Option<SearchClause>,
    pub expansions: Vec<AssociationInclude>,
}

impl QuerySpec {
    pub fn has_aggregates(&self) -> bool {
        !self.aggregates.is_empty()
    }

    /// Equality filters as a plain map, used for update/delete conditions.
    pub fn equality_conditions(&self) -> BTreeMap<FieldName, String> {
        self.filters
            .iter()
            .filter_map(|f| match (&f.op, &f.value) {
                (Operator::Eq, FilterValue::Single(v)) => Some((f.field.clone(), v.clone())),
                _ => None,
            })
            .collect()
    }
}
