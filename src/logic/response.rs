use axum::http::StatusCode;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashSet;

use crate::error::status_phrase;
use crate::logic::expand::AssociationResolver;
use crate::model::{AssociationKind, Criteria, ModelRegistry, Record, ResourceModel, ID_FIELD};
use crate::store::validate::display_value;
use crate::store::Page;

/// What the response builder needs to know about the incoming request.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestContext {
    /// `scheme://host` as seen by the client, plus the API prefix without its version segment.
    pub base_url: String,
    /// Base URL plus the request path and query, without the API version segment.
    pub full_url: String,
    /// The raw query parameters.
    pub criteria: Criteria,
}

impl RequestContext {
    pub fn new(base_url: impl Into<String>, full_url: impl Into<String>, criteria: Criteria) -> Self {
        Self {
            base_url: base_url.into(),
            full_url: full_url.into(),
            criteria,
        }
    }

    /// The full URL with its query string removed.
    pub fn url_without_query(&self) -> &str {
        self.full_url.split('?').next().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NavLink {
    pub href: String,
    pub limit: u32,
    pub offset: u64,
}

impl NavLink {
    fn new(url: &str, limit: u32, offset: u64) -> Self {
        Self {
            href: format!("{}?limit={}&offset={}", url, limit, offset),
            limit,
            offset,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NavLinks {
    pub first: NavLink,
    pub prev: Option<NavLink>,
    pub next: Option<NavLink>,
    pub last: NavLink,
}

/// Page navigation for a window of `limit` rows at `offset` out of `count`.
///
/// The first page always offers `next`, even when no further rows exist.
pub fn navigation_links(url: &str, offset: u64, limit: u32, count: u64) -> NavLinks {
    let limit = limit.max(1);
    let step = u64::from(limit);

    let (prev, next) = if offset == 0 {
        (None, Some(step))
    } else {
        let next = offset + step;
        (Some(offset.saturating_sub(step)), (next <= count).then_some(next))
    };

    NavLinks {
        first: NavLink::new(url, limit, 0),
        prev: prev.map(|o| NavLink::new(url, limit, o)),
        next: next.map(|o| NavLink::new(url, limit, o)),
        last: NavLink::new(url, limit, count / step * step),
    }
}

/// Uniform response body of every successful read and update.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseEnvelope {
    pub status: &'static str,
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub href: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub criteria: Option<serde_json::Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<Record>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub links: Option<NavLinks>,
    /// Values merged onto the root: a single resource's fields or an aggregate row.
    #[serde(flatten)]
    pub merged: Record,
}

const ENVELOPE_KEYS: [&str; 9] = [
    "status", "statusCode", "href", "total", "limit", "criteria", "items", "item", "links",
];

pub struct ResponseBuilder<'a> {
    registry: &'a ModelRegistry,
    model: &'a ResourceModel,
    request: &'a RequestContext,
    /// Dotted association paths the request expanded, each with all of its prefixes.
    expanded: HashSet<String>,
}

impl<'a> ResponseBuilder<'a> {
    pub fn new(registry: &'a ModelRegistry, model: &'a ResourceModel, request: &'a RequestContext) -> Self {
        let expanded = AssociationResolver::collect_paths(&request.criteria)
            .iter()
            .flat_map(|path| {
                path.match_indices('.')
                    .map(|(end, _)| path[..end].to_string())
                    .chain(std::iter::once(path.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();
        Self {
            registry,
            model,
            request,
            expanded,
        }
    }

    fn envelope(&self, code: StatusCode) -> ResponseEnvelope {
        let criteria = &self.request.criteria;
        ResponseEnvelope {
            status: status_phrase(code),
            status_code: code.as_u16(),
            href: self.request.full_url.clone(),
            total: None,
            limit: None,
            criteria: (!criteria.is_empty()).then(|| criteria.to_json_object()),
            items: None,
            item: None,
            links: None,
            merged: Record::new(),
        }
    }

    /// Collection envelope. An aggregated page merges its single row onto the root.
    pub fn collection(&self, page: Page) -> ResponseEnvelope {
        let mut envelope = self.envelope(StatusCode::OK);
        envelope.total = Some(page.count);
        envelope.limit = page.limit;

        let criteria = &self.request.criteria;
        if criteria.contains("offset") && criteria.contains("limit") {
            if let (Some(offset), Some(limit)) = (page.offset, page.limit) {
                envelope.links = Some(navigation_links(
                    self.request.url_without_query(),
                    u64::from(offset),
                    limit,
                    page.count,
                ));
            }
        }

        if page.aggregated {
            if let Some(row) = page.rows.into_iter().next() {
                envelope.merged = without_envelope_keys(row);
            }
        } else {
            envelope.items = Some(
                page.rows
                    .into_iter()
                    .map(|row| Value::Object(self.link_resource(self.model, row)))
                    .collect(),
            );
        }
        envelope
    }

    /// Single-resource envelope: the fields appear on the root and under `item`.
    pub fn single(&self, record: Record) -> ResponseEnvelope {
        let record = self.link_resource(self.model, record);
        self.single_plain(record)
    }

    pub fn count(&self, count: u64) -> ResponseEnvelope {
        let mut envelope = self.envelope(StatusCode::OK);
        envelope.total = Some(count);
        envelope
    }

    /// Envelope of an update whose resource was not requested back.
    pub fn affected(&self, affected_rows: u64) -> ResponseEnvelope {
        let mut record = Record::new();
        record.insert("affectedRows".to_string(), json!(affected_rows));
        self.single_plain(record)
    }

    fn single_plain(&self, record: Record) -> ResponseEnvelope {
        let mut envelope = self.envelope(StatusCode::OK);
        envelope.merged = without_envelope_keys(record.clone());
        envelope.item = Some(record);
        envelope
    }

    /// Add the self link and association links to a row, recursing into expanded
    /// associations.
    pub fn link_resource(&self, model: &ResourceModel, record: Record) -> Record {
        self.link_at(model, record, "")
    }

    /// `path` is the dotted association path leading to `record`, empty at the root.
    fn link_at(&self, model: &ResourceModel, mut record: Record, path: &str) -> Record {
        let base = &self.request.base_url;
        let self_href = record
            .get(ID_FIELD)
            .filter(|id| !id.is_null())
            .map(|id| format!("{}/{}/{}", base, model.plural_name, display_value(id)));

        if let Some(href) = &self_href {
            record.insert("link".to_string(), json!({"rel": "self", "href": href}));
        }

        for assoc in model.associations() {
            let Some(target) = self.registry.resolve(&assoc.target) else {
                continue;
            };
            let assoc_path = if path.is_empty() {
                assoc.name.clone()
            } else {
                format!("{}.{}", path, assoc.name)
            };

            match record.remove(&assoc.name) {
                Some(Value::Array(items)) => {
                    let items = items
                        .into_iter()
                        .map(|item| match item {
                            Value::Object(child) => {
                                Value::Object(self.link_at(target, child, &assoc_path))
                            }
                            other => other,
                        })
                        .collect();
                    record.insert(assoc.name.clone(), Value::Array(items));
                }
                Some(Value::Object(child)) => {
                    let child = self.link_at(target, child, &assoc_path);
                    record.insert(assoc.name.clone(), Value::Object(child));
                }
                Some(Value::Null) if self.expanded.contains(&assoc_path) => {
                    record.insert(assoc.name.clone(), Value::Null);
                }
                _ => {
                    let stub = match assoc.kind {
                        AssociationKind::Owning => record
                            .get(&assoc.foreign_key)
                            .filter(|fk| !fk.is_null())
                            .map(|fk| format!("{}/{}/{}", base, target.plural_name, display_value(fk))),
                        AssociationKind::Owned => {
                            self_href.as_ref().map(|href| format!("{}/{}", href, assoc.name))
                        }
                    };
                    if let Some(href) = stub {
                        record.insert(assoc.name.clone(), json!({ "href": href }));
                    }
                }
            }
        }
        record
    }
}

/// Envelope members win over merged values of the same name.
fn without_envelope_keys(mut record: Record) -> Record {
    record.retain(|key, _| !ENVELOPE_KEYS.contains(&key.as_str()));
    record
}
