use serde_json::Value;

use crate::error::{ApiError, ApiResult, ValidationItem, RESOURCE_PROPERTY};
use crate::logic::parse::{CriteriaParser, Defaults};
use crate::model::{
    AssociationDescriptor, AssociationKind, Criteria, Filter, ModelRegistry, QuerySpec, Record,
    ResourceModel, ID_FIELD,
};
use crate::store::validate::display_value;
use crate::store::{Page, ResourceStore};

/// Result of an update.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    /// The updated resource as stored.
    Resource(Record),
    /// The caller asked not to get the resource back.
    Suppressed { affected_rows: u64 },
}

type NestedChildren<'a> = Vec<(&'a AssociationDescriptor, Vec<Record>)>;

/// The resource operations of one model: parse the criteria, run them against the store.
pub struct ResourceService<'a, S: ResourceStore + ?Sized> {
    registry: &'a ModelRegistry,
    store: &'a S,
    model: &'a ResourceModel,
    default_limit: u32,
}

impl<'a, S: ResourceStore + ?Sized> ResourceService<'a, S> {
    pub fn new(
        registry: &'a ModelRegistry,
        store: &'a S,
        model: &'a ResourceModel,
        default_limit: u32,
    ) -> Self {
        Self {
            registry,
            store,
            model,
            default_limit,
        }
    }

    pub fn model(&self) -> &'a ResourceModel {
        self.model
    }

    fn parser(&self) -> CriteriaParser<'a> {
        CriteriaParser::new(self.registry, self.model, self.default_limit)
    }

    pub async fn count(&self, criteria: &Criteria, defaults: &Defaults) -> ApiResult<u64> {
        let spec = self.parser().parse_count(criteria, defaults)?;
        self.store.count(self.model, &spec).await
    }

    pub async fn search(&self, criteria: &Criteria, defaults: &Defaults) -> ApiResult<Page> {
        let spec = self.parser().parse_search(criteria, defaults)?;
        self.list(&spec).await
    }

    pub async fn index(&self, criteria: &Criteria, defaults: &Defaults) -> ApiResult<Page> {
        let spec = self.parser().parse_index(criteria, defaults)?;
        self.list(&spec).await
    }

    async fn list(&self, spec: &QuerySpec) -> ApiResult<Page> {
        let page = self.store.find_and_count_all(self.model, spec).await?;
        Ok(page.with_window(spec))
    }

    pub async fn show(&self, id: &str, criteria: &Criteria) -> ApiResult<Option<Record>> {
        let spec = self.parser().parse_show(id, criteria)?;
        self.store.find_one(self.model, &spec).await
    }

    /// Insert a resource, then persist any nested children of its owned associations.
    pub async fn create(&self, payload: Value) -> ApiResult<Record> {
        let (fields, nested) = self.split_payload(payload)?;

        let mut record = self.store.insert(self.model, fields).await?;
        let id = record_id(&record)?;
        for (assoc, children) in nested {
            let saved = self.store.replace_children(assoc, id, children).await?;
            record.insert(assoc.name.clone(), Value::Array(saved.into_iter().map(Value::Object).collect()));
        }

        log::info!("Created {} {}", self.model.name, id);
        Ok(record)
    }

    /// Update every resource matching the equality criteria. Matching nothing is NotFound.
    pub async fn update(
        &self,
        criteria: &Criteria,
        payload: Value,
        suppress_return: bool,
    ) -> ApiResult<UpdateOutcome> {
        let conditions = self.parser().parse_conditions(criteria)?.filters;
        let (fields, nested) = self.split_payload(payload)?;

        let ids = if suppress_return && nested.is_empty() {
            Vec::new()
        } else {
            self.matching_ids(&conditions).await?
        };

        let affected_rows = self
            .store
            .update_where(self.model, fields, &conditions)
            .await?;
        if affected_rows == 0 {
            return Err(ApiError::not_found());
        }

        let mut saved_children: Vec<(&AssociationDescriptor, Vec<Record>)> = Vec::new();
        for (idx, id) in ids.iter().enumerate() {
            for (assoc, children) in &nested {
                let saved = self
                    .store
                    .replace_children(assoc, *id, children.clone())
                    .await?;
                if idx == 0 {
                    saved_children.push((*assoc, saved));
                }
            }
        }
        log::info!("Updated {} {} row(s)", self.model.name, affected_rows);

        if suppress_return {
            return Ok(UpdateOutcome::Suppressed { affected_rows });
        }

        let id = ids.first().ok_or_else(ApiError::not_found)?;
        let spec = QuerySpec {
            filters: vec![Filter::eq(ID_FIELD, &id.to_string())],
            ..QuerySpec::default()
        };
        let mut record = self
            .store
            .find_one(self.model, &spec)
            .await?
            .ok_or_else(ApiError::not_found)?;
        for (assoc, saved) in saved_children {
            record.insert(assoc.name.clone(), Value::Array(saved.into_iter().map(Value::Object).collect()));
        }
        Ok(UpdateOutcome::Resource(record))
    }

    /// Delete every resource matching the equality criteria. Matching nothing is NotFound.
    pub async fn delete(&self, criteria: &Criteria) -> ApiResult<u64> {
        let conditions = self.parser().parse_conditions(criteria)?.filters;
        let deleted = self.store.destroy_where(self.model, &conditions).await?;
        if deleted == 0 {
            return Err(ApiError::not_found());
        }
        log::info!("Deleted {} {} row(s)", self.model.name, deleted);
        Ok(deleted)
    }

    async fn matching_ids(&self, conditions: &[Filter]) -> ApiResult<Vec<i64>> {
        let spec = QuerySpec {
            filters: conditions.to_vec(),
            ..QuerySpec::default()
        };
        let page = self.store.find_and_count_all(self.model, &spec).await?;
        Ok(page
            .rows
            .iter()
            .filter_map(|row| row.get(ID_FIELD).and_then(Value::as_i64))
            .collect())
    }

    /// Separate the resource's own values from arrays of children sent under an
    /// owned association's name.
    fn split_payload(&self, payload: Value) -> ApiResult<(Record, NestedChildren<'a>)> {
        let mut fields = match payload {
            Value::Object(fields) => fields,
            other => {
                return Err(ApiError::Validation {
                    errors: vec![ValidationItem::new(
                        "Request body must be a JSON object",
                        "Validation error",
                        RESOURCE_PROPERTY,
                        Some(display_value(&other)),
                    )],
                })
            }
        };

        let mut nested = Vec::new();
        for assoc in self.model.associations() {
            let Some(value) = fields.remove(&assoc.name) else {
                continue;
            };
            let (AssociationKind::Owned, Value::Array(items)) = (assoc.kind, value) else {
                continue;
            };

            let mut children = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::Object(child) => children.push(child),
                    other => {
                        return Err(ApiError::Validation {
                            errors: vec![ValidationItem::new(
                                format!("{} must contain objects", assoc.name),
                                "Validation error",
                                &assoc.name,
                                Some(display_value(&other)),
                            )],
                        })
                    }
                }
            }
            nested.push((assoc, children));
        }

        Ok((fields, nested))
    }
}

fn record_id(record: &Record) -> ApiResult<i64> {
    record
        .get(ID_FIELD)
        .and_then(Value::as_i64)
        .ok_or_else(|| ApiError::Server(anyhow::anyhow!("Stored row has no id")))
}
