use anyhow::anyhow;
use chrono::{DateTime, NaiveDate, SecondsFormat, TimeZone, Utc};
use parking_lot::RwLock;
use serde_json::{Number, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{ApiError, ApiResult};
use crate::model::{
    AggFunc, AssociationDescriptor, AssociationInclude, AssociationKind, Direction, FieldKind,
    Filter, FilterValue, ModelRegistry, Operator, QuerySpec, Record, ResourceModel, SearchClause,
    CREATED_AT_FIELD, ID_FIELD, UPDATED_AT_FIELD,
};
use crate::store::project;
use crate::store::traits::{Page, ResourceStore};
use crate::store::validate::{display_value, validate_payload, WriteMode};

#[derive(Debug, Default)]
struct Table {
    rows: Vec<Record>,
    next_id: i64,
}

/// Process-local store used by tests and by the default binary configuration.
/// Every query is evaluated in memory against the registered models.
#[derive(Debug)]
pub struct MemoryStore {
    registry: Arc<ModelRegistry>,
    tables: RwLock<HashMap<String, Table>>,
}

impl MemoryStore {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self {
            registry,
            tables: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Rows of `model` matching filters, search and required inclusions, with inclusions attached.
    fn select(&self, model: &ResourceModel, spec: &QuerySpec) -> Vec<Record> {
        let tables = self.tables.read();
        let Some(table) = tables.get(&model.table) else {
            return Vec::new();
        };

        table
            .rows
            .iter()
            .filter(|row| spec.filters.iter().all(|f| matches_filter(model, row, f)))
            .filter(|row| {
                spec.search
                    .as_ref()
                    .map_or(true, |clause| matches_search(row, clause))
            })
            .filter_map(|row| {
                let mut row = row.clone();
                self.attach_includes(&tables, model, &mut row, &spec.expansions)
                    .then_some(row)
            })
            .collect()
    }

    /// Attach each included association to `row`. Returns false when a required
    /// inclusion has no matching child, which drops the parent.
    fn attach_includes(
        &self,
        tables: &HashMap<String, Table>,
        model: &ResourceModel,
        row: &mut Record,
        includes: &[AssociationInclude],
    ) -> bool {
        for include in includes {
            let (Some(assoc), Some(target)) = (
                model.association(&include.alias),
                self.registry.resolve(&include.model),
            ) else {
                continue;
            };

            let candidates = tables
                .get(&target.table)
                .map(|t| t.rows.as_slice())
                .unwrap_or_default();

            let mut children = Vec::new();
            for child in candidates {
                if !is_linked(assoc, row, child) {
                    continue;
                }
                let matches_where = include.where_clause.as_ref().map_or(true, |clause| {
                    clause
                        .iter()
                        .all(|(field, value)| matches_filter(target, child, &Filter::eq(field, value)))
                });
                if !matches_where {
                    continue;
                }

                let mut child = child.clone();
                if !self.attach_includes(tables, target, &mut child, &include.children) {
                    continue;
                }
                if let Some(attributes) = &include.attributes {
                    project(&mut child, attributes, &include.children);
                }
                children.push(Value::Object(child));
            }

            if children.is_empty() && include.is_required() {
                return false;
            }

            let value = match assoc.kind {
                AssociationKind::Owning => children.into_iter().next().unwrap_or(Value::Null),
                AssociationKind::Owned => Value::Array(children),
            };
            row.insert(include.alias.clone(), value);
        }
        true
    }

    fn insert_locked(table: &mut Table, model: &ResourceModel, values: Record) -> ApiResult<Record> {
        check_unique(model, &table.rows, &values, &[])?;

        table.next_id += 1;
        let mut record = Record::new();
        record.insert(ID_FIELD.to_string(), Value::from(table.next_id));
        for field in model.fields() {
            if model.is_managed_field(&field.name) {
                continue;
            }
            let value = values.get(&field.name).cloned().unwrap_or(Value::Null);
            record.insert(field.name.clone(), value);
        }
        if model.timestamps {
            let now = Value::String(now());
            record.insert(CREATED_AT_FIELD.to_string(), now.clone());
            record.insert(UPDATED_AT_FIELD.to_string(), now);
        }

        table.rows.push(record.clone());
        Ok(record)
    }
}

#[async_trait::async_trait]
impl ResourceStore for MemoryStore {
    async fn count(&self, model: &ResourceModel, spec: &QuerySpec) -> ApiResult<u64> {
        Ok(self.select(model, spec).len() as u64)
    }

    async fn find_and_count_all(&self, model: &ResourceModel, spec: &QuerySpec) -> ApiResult<Page> {
        let matched = self.select(model, spec);

        if spec.has_aggregates() {
            let count = matched.len() as u64;
            return Ok(Page::new(aggregate(model, &matched, spec), count));
        }

        let mut rows = match &spec.group {
            Some(_) => aggregate(model, &matched, spec),
            None => matched,
        };
        let count = rows.len() as u64;

        order_rows(model, &mut rows, &spec.order);
        let offset = spec.offset.unwrap_or(0) as usize;
        let limit = spec.limit.map_or(usize::MAX, |l| l as usize);
        let mut rows: Vec<Record> = rows.into_iter().skip(offset).take(limit).collect();

        if let Some(selected) = &spec.selected_fields {
            for row in &mut rows {
                project(row, selected, &spec.expansions);
            }
        }

        Ok(Page::new(rows, count))
    }

    async fn find_one(&self, model: &ResourceModel, spec: &QuerySpec) -> ApiResult<Option<Record>> {
        let mut rows = self.select(model, spec);
        order_rows(model, &mut rows, &spec.order);

        Ok(rows.into_iter().next().map(|mut row| {
            if let Some(selected) = &spec.selected_fields {
                project(&mut row, selected, &spec.expansions);
            }
            row
        }))
    }

    async fn insert(&self, model: &ResourceModel, payload: Record) -> ApiResult<Record> {
        let values = validate_payload(model, payload, WriteMode::Insert)?;
        let mut tables = self.tables.write();
        let table = tables.entry(model.table.clone()).or_default();
        Self::insert_locked(table, model, values)
    }

    async fn update_where(
        &self,
        model: &ResourceModel,
        payload: Record,
        conditions: &[Filter],
    ) -> ApiResult<u64> {
        let values = validate_payload(model, payload, WriteMode::Update)?;
        let mut tables = self.tables.write();
        let Some(table) = tables.get_mut(&model.table) else {
            return Ok(0);
        };

        let matched: Vec<usize> = table
            .rows
            .iter()
            .enumerate()
            .filter(|(_, row)| conditions.iter().all(|f| matches_filter(model, row, f)))
            .map(|(idx, _)| idx)
            .collect();

        let matched_ids: Vec<Value> = matched
            .iter()
            .filter_map(|idx| table.rows[*idx].get(ID_FIELD).cloned())
            .collect();
        check_unique(model, &table.rows, &values, &matched_ids)?;

        let stamp = now();
        for idx in &matched {
            let row = &mut table.rows[*idx];
            for (field, value) in &values {
                row.insert(field.clone(), value.clone());
            }
            if model.timestamps {
                row.insert(UPDATED_AT_FIELD.to_string(), Value::String(stamp.clone()));
            }
        }

        Ok(matched.len() as u64)
    }

    async fn destroy_where(&self, model: &ResourceModel, conditions: &[Filter]) -> ApiResult<u64> {
        let mut tables = self.tables.write();
        let Some(table) = tables.get_mut(&model.table) else {
            return Ok(0);
        };

        let before = table.rows.len();
        table
            .rows
            .retain(|row| !conditions.iter().all(|f| matches_filter(model, row, f)));
        Ok((before - table.rows.len()) as u64)
    }

    async fn replace_children(
        &self,
        association: &AssociationDescriptor,
        parent_id: i64,
        children: Vec<Record>,
    ) -> ApiResult<Vec<Record>> {
        let target = self.registry.resolve(&association.target).ok_or_else(|| {
            ApiError::Server(anyhow!("Unknown association target '{}'", association.target))
        })?;

        let mut validated = Vec::with_capacity(children.len());
        for mut child in children {
            child.insert(association.foreign_key.clone(), Value::from(parent_id));
            validated.push(validate_payload(target, child, WriteMode::Insert)?);
        }

        let mut tables = self.tables.write();
        let table = tables.entry(target.table.clone()).or_default();
        let parent = Value::from(parent_id);
        table.rows.retain(|row| {
            !row.get(&association.foreign_key)
                .map_or(false, |fk| same_key(fk, &parent))
        });

        validated
            .into_iter()
            .map(|values| Self::insert_locked(table, target, values))
            .collect()
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Comparable form of a stored value under a field kind.
#[derive(Debug, PartialEq)]
enum SortKey {
    Number(f64),
    Bool(bool),
    Time(DateTime<Utc>),
    Text(String),
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn sort_key(kind: FieldKind, value: &Value) -> Option<SortKey> {
    let text = match value {
        Value::Null => return None,
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    match kind {
        FieldKind::Integer | FieldKind::Float => value
            .as_f64()
            .or_else(|| text.trim().parse().ok())
            .map(SortKey::Number),
        FieldKind::Boolean => value
            .as_bool()
            .or_else(|| kind.coerce(&text).and_then(|v| v.as_bool()))
            .map(SortKey::Bool),
        FieldKind::Timestamp => Some(
            parse_timestamp(&text)
                .map(SortKey::Time)
                .unwrap_or(SortKey::Text(text)),
        ),
        FieldKind::Text => Some(SortKey::Text(text)),
    }
}

/// Keys of different shapes (a timestamp against free text) are incomparable.
fn compare_keys(left: &SortKey, right: &SortKey) -> Option<Ordering> {
    match (left, right) {
        (SortKey::Number(l), SortKey::Number(r)) => l.partial_cmp(r),
        (SortKey::Bool(l), SortKey::Bool(r)) => Some(l.cmp(r)),
        (SortKey::Time(l), SortKey::Time(r)) => Some(l.cmp(r)),
        (SortKey::Text(l), SortKey::Text(r)) => Some(l.cmp(r)),
        _ => None,
    }
}

fn compare(kind: FieldKind, left: &Value, right: &Value) -> Option<Ordering> {
    compare_keys(&sort_key(kind, left)?, &sort_key(kind, right)?)
}

fn field_kind(model: &ResourceModel, field: &str) -> FieldKind {
    model.field(field).map_or(FieldKind::Text, |f| f.kind)
}

fn matches_filter(model: &ResourceModel, row: &Record, filter: &Filter) -> bool {
    let kind = field_kind(model, &filter.field);
    let stored = row.get(&filter.field).unwrap_or(&Value::Null);

    let ordering = |raw: &str| compare(kind, stored, &Value::String(raw.to_string()));
    match (&filter.op, &filter.value) {
        (Operator::In, FilterValue::List(items)) => items
            .iter()
            .any(|item| ordering(item) == Some(Ordering::Equal)),
        (op, FilterValue::Single(raw)) => match ordering(raw) {
            Some(ord) => match op {
                Operator::Eq | Operator::In => ord == Ordering::Equal,
                Operator::Lt => ord == Ordering::Less,
                Operator::Lte => ord != Ordering::Greater,
                Operator::Gt => ord == Ordering::Greater,
                Operator::Gte => ord != Ordering::Less,
            },
            None => false,
        },
        (_, FilterValue::List(_)) => false,
    }
}

fn matches_search(row: &Record, clause: &SearchClause) -> bool {
    clause.fields.iter().any(|field| match row.get(field) {
        None | Some(Value::Null) => false,
        Some(value) => {
            let text = display_value(value);
            if clause.like {
                text.contains(&clause.term)
            } else {
                text == clause.term
            }
        }
    })
}

fn same_key(left: &Value, right: &Value) -> bool {
    compare(FieldKind::Integer, left, right) == Some(Ordering::Equal)
}

fn is_linked(assoc: &AssociationDescriptor, parent: &Record, child: &Record) -> bool {
    let (parent_key, child_key) = match assoc.kind {
        AssociationKind::Owning => (parent.get(&assoc.foreign_key), child.get(ID_FIELD)),
        AssociationKind::Owned => (parent.get(ID_FIELD), child.get(&assoc.foreign_key)),
    };
    match (parent_key, child_key) {
        (Some(p), Some(c)) => same_key(p, c),
        _ => false,
    }
}

fn check_unique(
    model: &ResourceModel,
    rows: &[Record],
    values: &Record,
    updating: &[Value],
) -> ApiResult<()> {
    for field in model.fields().iter().filter(|f| f.unique) {
        let Some(value) = values.get(&field.name).filter(|v| !v.is_null()) else {
            continue;
        };
        let conflict = updating.len() > 1
            || rows.iter().any(|row| {
                let is_self = row
                    .get(ID_FIELD)
                    .map_or(false, |id| updating.iter().any(|u| same_key(u, id)));
                !is_self
                    && row.get(&field.name).map_or(false, |existing| {
                        compare(field.kind, existing, value) == Some(Ordering::Equal)
                    })
            });
        if conflict {
            return Err(ApiError::UniqueConstraint {
                field: field.name.clone(),
                value: display_value(value),
            });
        }
    }
    Ok(())
}

/// Stable multi-key sort; nulls sort first. Without an explicit order rows are sorted by id.
fn order_rows(model: &ResourceModel, rows: &mut [Record], order: &[(String, Direction)]) {
    let default_order = [(ID_FIELD.to_string(), Direction::Asc)];
    let order = if order.is_empty() { &default_order[..] } else { order };

    rows.sort_by(|a, b| {
        for (field, direction) in order {
            let kind = field_kind(model, field);
            let left = a.get(field).and_then(|v| sort_key(kind, v));
            let right = b.get(field).and_then(|v| sort_key(kind, v));
            let ord = match (left, right) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(l), Some(r)) => compare_keys(&l, &r).unwrap_or(Ordering::Equal),
            };
            let ord = match direction {
                Direction::Asc => ord,
                Direction::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

/// One row per group value (first-seen order), or a single row without grouping.
/// Aggregate columns are named after their field.
fn aggregate(model: &ResourceModel, rows: &[Record], spec: &QuerySpec) -> Vec<Record> {
    let mut groups: Vec<(Value, Vec<&Record>)> = Vec::new();
    match &spec.group {
        Some(field) => {
            for row in rows {
                let key = row.get(field).cloned().unwrap_or(Value::Null);
                match groups.iter_mut().find(|(k, _)| *k == key) {
                    Some((_, members)) => members.push(row),
                    None => groups.push((key, vec![row])),
                }
            }
        }
        None => groups.push((Value::Null, rows.iter().collect())),
    }

    groups
        .into_iter()
        .map(|(key, members)| {
            let mut out = Record::new();
            if let Some(field) = &spec.group {
                out.insert(field.clone(), key);
            }
            for agg in &spec.aggregates {
                let kind = field_kind(model, &agg.field);
                let values: Vec<f64> = members
                    .iter()
                    .filter_map(|row| row.get(&agg.field))
                    .filter_map(|v| match sort_key(kind, v) {
                        Some(SortKey::Number(n)) => Some(n),
                        _ => None,
                    })
                    .collect();
                out.insert(agg.field.clone(), compute(agg.func, kind, &values));
            }
            out
        })
        .collect()
}

fn compute(func: AggFunc, kind: FieldKind, values: &[f64]) -> Value {
    if values.is_empty() {
        return Value::Null;
    }
    let sum: f64 = values.iter().sum();
    match func {
        AggFunc::Sum if kind == FieldKind::Integer => Value::from(sum as i64),
        AggFunc::Sum => Number::from_f64(sum).map_or(Value::Null, Value::Number),
        AggFunc::Avg => Number::from_f64(sum / values.len() as f64).map_or(Value::Null, Value::Number),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Aggregate, FieldDef};
    use serde_json::json;

    fn registry() -> Arc<ModelRegistry> {
        Arc::new(
            ModelRegistry::builder()
                .register(
                    ResourceModel::new("User", "users", "user")
                        .field_def(FieldDef::new("email", FieldKind::Text).required().unique())
                        .has_many("tasks", "Task", "user_id")
                        .with_timestamps(),
                )
                .register(
                    ResourceModel::new("Task", "tasks", "task")
                        .field_def(FieldDef::new("name", FieldKind::Text).required())
                        .field_def(FieldDef::new("endDate", FieldKind::Timestamp))
                        .field_def(FieldDef::new("amount", FieldKind::Float))
                        .field_def(FieldDef::new("category", FieldKind::Text))
                        .field_def(FieldDef::new("user_id", FieldKind::Integer))
                        .belongs_to("user", "User", "user_id"),
                )
                .build()
                .unwrap(),
        )
    }

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    async fn seeded() -> (MemoryStore, Arc<ResourceModel>, Arc<ResourceModel>) {
        let registry = registry();
        let user = registry.resolve("User").unwrap().clone();
        let task = registry.resolve("Task").unwrap().clone();
        let store = MemoryStore::new(registry);

        store.insert(&user, record(json!({"email": "ann@example.com"}))).await.unwrap();
        store.insert(&user, record(json!({"email": "bob@example.com"}))).await.unwrap();
        for (name, end, amount, category, user_id) in [
            ("milk", "2024-02-01", 3.5, "food", 1),
            ("bread", "2024-06-15", 2.0, "food", 1),
            ("paint", "2025-01-10", 40.0, "home", 2),
        ] {
            store
                .insert(
                    &task,
                    record(json!({
                        "name": name, "endDate": end, "amount": amount,
                        "category": category, "user_id": user_id
                    })),
                )
                .await
                .unwrap();
        }
        (store, user, task)
    }

    fn names(rows: &[Record]) -> Vec<&str> {
        rows.iter().map(|r| r["name"].as_str().unwrap()).collect()
    }

    #[tokio::test]
    async fn test_insert_assigns_id_and_timestamps() {
        let (store, user, _) = seeded().await;
        let created = store
            .insert(&user, record(json!({"email": "cy@example.com"})))
            .await
            .unwrap();
        assert_eq!(created["id"], json!(3));
        assert!(created["createdAt"].is_string());
    }

    #[tokio::test]
    async fn test_range_filters_compare_timestamps() {
        let (store, _, task) = seeded().await;
        let spec = QuerySpec {
            filters: vec![
                Filter {
                    field: "endDate".into(),
                    op: Operator::Gte,
                    value: FilterValue::Single("2024-01-01".into()),
                },
                Filter {
                    field: "endDate".into(),
                    op: Operator::Lte,
                    value: FilterValue::Single("2024-12-31".into()),
                },
            ],
            ..QuerySpec::default()
        };
        let page = store.find_and_count_all(&task, &spec).await.unwrap();
        assert_eq!(page.count, 2);
        assert_eq!(names(&page.rows), vec!["milk", "bread"]);
    }

    #[tokio::test]
    async fn test_order_window_and_projection() {
        let (store, _, task) = seeded().await;
        let spec = QuerySpec {
            order: vec![("amount".into(), Direction::Desc)],
            offset: Some(1),
            limit: Some(1),
            selected_fields: Some(vec!["name".into()]),
            ..QuerySpec::default()
        };
        let page = store.find_and_count_all(&task, &spec).await.unwrap();
        assert_eq!(page.count, 3);
        assert_eq!(page.rows, vec![record(json!({"name": "milk"}))]);
    }

    #[tokio::test]
    async fn test_search_like() {
        let (store, _, task) = seeded().await;
        let spec = QuerySpec {
            search: Some(SearchClause {
                term: "ea".into(),
                fields: vec!["name".into()],
                like: true,
            }),
            ..QuerySpec::default()
        };
        let page = store.find_and_count_all(&task, &spec).await.unwrap();
        assert_eq!(names(&page.rows), vec!["bread"]);
    }

    #[tokio::test]
    async fn test_includes_attach_and_filter() {
        let (store, user, _) = seeded().await;

        let mut tasks = AssociationInclude::new("Task", "tasks");
        tasks.attributes = Some(vec!["name".into()]);
        let spec = QuerySpec {
            expansions: vec![tasks],
            ..QuerySpec::default()
        };
        let page = store.find_and_count_all(&user, &spec).await.unwrap();
        assert_eq!(page.rows[0]["tasks"], json!([{"name": "milk"}, {"name": "bread"}]));

        let mut filtered = AssociationInclude::new("Task", "tasks");
        filtered.where_clause = Some([("name".to_string(), "paint".to_string())].into());
        let spec = QuerySpec {
            expansions: vec![filtered.clone()],
            ..QuerySpec::default()
        };
        assert_eq!(store.count(&user, &spec).await.unwrap(), 1);

        filtered.required = Some(false);
        let spec = QuerySpec {
            expansions: vec![filtered],
            ..QuerySpec::default()
        };
        let page = store.find_and_count_all(&user, &spec).await.unwrap();
        assert_eq!(page.count, 2);
        assert_eq!(page.rows[0]["tasks"], json!([]));
    }

    #[tokio::test]
    async fn test_owning_include_is_an_object() {
        let (store, _, task) = seeded().await;
        let spec = QuerySpec {
            filters: vec![Filter::eq("id", "3")],
            expansions: vec![AssociationInclude::new("User", "user")],
            ..QuerySpec::default()
        };
        let row = store.find_one(&task, &spec).await.unwrap().unwrap();
        assert_eq!(row["user"]["email"], "bob@example.com");
    }

    #[tokio::test]
    async fn test_grouped_aggregates() {
        let (store, _, task) = seeded().await;
        let spec = QuerySpec {
            group: Some("category".into()),
            aggregates: vec![Aggregate {
                func: AggFunc::Sum,
                field: "amount".into(),
            }],
            ..QuerySpec::default()
        };
        let page = store.find_and_count_all(&task, &spec).await.unwrap();
        assert_eq!(page.count, 3);
        assert_eq!(
            page.rows,
            vec![
                record(json!({"category": "food", "amount": 5.5})),
                record(json!({"category": "home", "amount": 40.0})),
            ]
        );
    }

    #[tokio::test]
    async fn test_unique_violation() {
        let (store, user, _) = seeded().await;
        let err = store
            .insert(&user, record(json!({"email": "ann@example.com"})))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::UniqueConstraint { field, .. } if field == "email"));

        let err = store
            .update_where(&user, record(json!({"email": "bob@example.com"})), &[Filter::eq("id", "1")])
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::UniqueConstraint { .. }));

        let updated = store
            .update_where(&user, record(json!({"email": "ann@example.com"})), &[Filter::eq("id", "1")])
            .await
            .unwrap();
        assert_eq!(updated, 1);
    }

    #[tokio::test]
    async fn test_update_and_destroy() {
        let (store, _, task) = seeded().await;
        let affected = store
            .update_where(&task, record(json!({"category": "misc"})), &[Filter::eq("user_id", "1")])
            .await
            .unwrap();
        assert_eq!(affected, 2);

        let deleted = store
            .destroy_where(&task, &[Filter::eq("category", "misc")])
            .await
            .unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.count(&task, &QuerySpec::default()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_replace_children() {
        let (store, user, task) = seeded().await;
        let assoc = user.association("tasks").unwrap().clone();

        let children = store
            .replace_children(&assoc, 1, vec![record(json!({"name": "eggs"}))])
            .await
            .unwrap();
        assert_eq!(children[0]["user_id"], json!(1));

        let spec = QuerySpec {
            filters: vec![Filter::eq("user_id", "1")],
            ..QuerySpec::default()
        };
        let page = store.find_and_count_all(&task, &spec).await.unwrap();
        assert_eq!(names(&page.rows), vec!["eggs"]);
    }
}
