use anyhow::{anyhow, Context};
use serde_json::Value;
use sqlx::{
    postgres::{PgDatabaseError, PgPoolOptions},
    PgPool, Postgres, QueryBuilder,
};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::{ApiError, ApiResult, ValidationItem, RESOURCE_PROPERTY};
use crate::model::{
    AggFunc, AssociationDescriptor, AssociationInclude, AssociationKind, Direction, FieldKind,
    Filter, FilterValue, ModelRegistry, Operator, QuerySpec, Record, ResourceModel, SearchClause,
    CREATED_AT_FIELD, ID_FIELD, UPDATED_AT_FIELD,
};
use crate::store::project;
use crate::store::traits::{Page, ResourceStore};
use crate::store::validate::{display_value, validate_payload, WriteMode};

type Sql<'a> = QueryBuilder<'a, Postgres>;
type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
    registry: Arc<ModelRegistry>,
}

impl PostgresStore {
    /// Create a new PostgreSQL store with the given database URL
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        registry: Arc<ModelRegistry>,
    ) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to create PostgreSQL connection pool")?;

        Ok(Self { pool, registry })
    }

    /// Create the table of every registered model if it does not exist yet
    pub async fn migrate(&self) -> anyhow::Result<()> {
        for model in self.registry.models() {
            let ddl = create_table_sql(model);
            sqlx::query(&ddl)
                .execute(&self.pool)
                .await
                .with_context(|| format!("Failed to create table '{}'", model.table))?;
            log::info!("Table '{}' ready", model.table);
        }
        Ok(())
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_rows(&self, mut sql: Sql<'_>, context: &str) -> ApiResult<Vec<Record>> {
        let values: Vec<Value> = sql
            .build_query_scalar()
            .fetch_all(&self.pool)
            .await
            .map_err(|err| map_db_error(err, None, None, context))?;

        Ok(values
            .into_iter()
            .filter_map(|value| match value {
                Value::Object(row) => Some(row),
                _ => None,
            })
            .collect())
    }

    async fn fetch_count(&self, mut sql: Sql<'_>, context: &str) -> ApiResult<u64> {
        let count: i64 = sql
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(|err| map_db_error(err, None, None, context))?;
        Ok(count.max(0) as u64)
    }

    /// Load every inclusion of `rows` with one batched query per node.
    fn load_includes<'a>(
        &'a self,
        model: &'a ResourceModel,
        rows: &'a mut [Record],
        includes: &'a [AssociationInclude],
    ) -> BoxFuture<'a, ApiResult<()>> {
        Box::pin(async move {
            for include in includes {
                let (Some(assoc), Some(target)) = (
                    model.association(&include.alias),
                    self.registry.resolve(&include.model),
                ) else {
                    continue;
                };
                let (parent_key, child_key) = link_columns(assoc);

                let keys: Vec<i64> = rows
                    .iter()
                    .filter_map(|row| row.get(parent_key).and_then(Value::as_i64))
                    .collect();

                let mut children = if keys.is_empty() {
                    Vec::new()
                } else {
                    let mut sql = Sql::new("SELECT to_jsonb(c0) FROM ");
                    sql.push(ident(&target.table));
                    sql.push(" AS c0 WHERE c0.");
                    sql.push(ident(child_key));
                    sql.push(" = ANY(");
                    sql.push_bind(keys);
                    sql.push(")");
                    if let Some(clause) = &include.where_clause {
                        push_where_map(&mut sql, "c0", target, clause);
                    }
                    push_required_includes(&mut sql, &self.registry, "c0", target, &include.children, 1);
                    sql.push(" ORDER BY c0.\"id\" ASC");
                    self.fetch_rows(sql, "Failed to load association").await?
                };

                self.load_includes(target, &mut children, &include.children).await?;

                let mut by_key: HashMap<i64, Vec<Value>> = HashMap::new();
                for mut child in children {
                    let Some(key) = child.get(child_key).and_then(Value::as_i64) else {
                        continue;
                    };
                    if let Some(attributes) = &include.attributes {
                        project(&mut child, attributes, &include.children);
                    }
                    by_key.entry(key).or_default().push(Value::Object(child));
                }

                for row in rows.iter_mut() {
                    let linked = row
                        .get(parent_key)
                        .and_then(Value::as_i64)
                        .and_then(|key| by_key.get(&key))
                        .cloned()
                        .unwrap_or_default();
                    let value = match assoc.kind {
                        AssociationKind::Owning => linked.into_iter().next().unwrap_or(Value::Null),
                        AssociationKind::Owned => Value::Array(linked),
                    };
                    row.insert(include.alias.clone(), value);
                }
            }
            Ok(())
        })
    }

    fn insert_sql(model: &ResourceModel, values: &Record) -> Sql<'static> {
        let mut sql = Sql::new("INSERT INTO ");
        sql.push(ident(&model.table));
        sql.push(" AS t (");

        let mut columns: Vec<String> = values.keys().map(|k| ident(k)).collect();
        if model.timestamps {
            columns.push(ident(CREATED_AT_FIELD));
            columns.push(ident(UPDATED_AT_FIELD));
        }
        if columns.is_empty() {
            let mut sql = Sql::new("INSERT INTO ");
            sql.push(ident(&model.table));
            sql.push(" AS t DEFAULT VALUES RETURNING to_jsonb(t)");
            return sql;
        }
        sql.push(columns.join(", "));
        sql.push(") VALUES (");

        let mut separated = sql.separated(", ");
        for (field, value) in values {
            separated.push_bind(bind_text(value));
            separated.push_unseparated("::");
            separated.push_unseparated(kind_of(model, field).sql_type());
        }
        if model.timestamps {
            separated.push("NOW()");
            separated.push("NOW()");
        }
        sql.push(") RETURNING to_jsonb(t)");
        sql
    }

    async fn insert_row(&self, model: &ResourceModel, values: &Record) -> ApiResult<Record> {
        let row: Value = Self::insert_sql(model, values)
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(|err| map_db_error(err, Some(model), Some(values), "Failed to insert row"))?;

        match row {
            Value::Object(row) => Ok(row),
            other => Err(ApiError::Server(anyhow!("Unexpected insert result: {}", other))),
        }
    }
}

#[async_trait::async_trait]
impl ResourceStore for PostgresStore {
    async fn count(&self, model: &ResourceModel, spec: &QuerySpec) -> ApiResult<u64> {
        let mut sql = Sql::new("SELECT COUNT(*) FROM ");
        sql.push(ident(&model.table));
        sql.push(" AS t");
        push_conditions(&mut sql, &self.registry, model, spec);
        self.fetch_count(sql, "Failed to count rows").await
    }

    async fn find_and_count_all(&self, model: &ResourceModel, spec: &QuerySpec) -> ApiResult<Page> {
        if spec.has_aggregates() || spec.group.is_some() {
            return self.find_grouped(model, spec).await;
        }

        let count = self.count(model, spec).await?;

        let mut sql = Sql::new("SELECT to_jsonb(t) FROM ");
        sql.push(ident(&model.table));
        sql.push(" AS t");
        push_conditions(&mut sql, &self.registry, model, spec);
        push_order(&mut sql, &spec.order);
        push_window(&mut sql, spec);

        let mut rows = self.fetch_rows(sql, "Failed to list rows").await?;
        self.load_includes(model, &mut rows, &spec.expansions).await?;
        if let Some(selected) = &spec.selected_fields {
            for row in &mut rows {
                project(row, selected, &spec.expansions);
            }
        }

        Ok(Page::new(rows, count))
    }

    async fn find_one(&self, model: &ResourceModel, spec: &QuerySpec) -> ApiResult<Option<Record>> {
        let mut sql = Sql::new("SELECT to_jsonb(t) FROM ");
        sql.push(ident(&model.table));
        sql.push(" AS t");
        push_conditions(&mut sql, &self.registry, model, spec);
        push_order(&mut sql, &spec.order);
        sql.push(" LIMIT 1");

        let mut rows = self.fetch_rows(sql, "Failed to fetch row").await?;
        self.load_includes(model, &mut rows, &spec.expansions).await?;

        Ok(rows.into_iter().next().map(|mut row| {
            if let Some(selected) = &spec.selected_fields {
                project(&mut row, selected, &spec.expansions);
            }
            row
        }))
    }

    async fn insert(&self, model: &ResourceModel, payload: Record) -> ApiResult<Record> {
        let values = validate_payload(model, payload, WriteMode::Insert)?;
        self.insert_row(model, &values).await
    }

    async fn update_where(
        &self,
        model: &ResourceModel,
        payload: Record,
        conditions: &[Filter],
    ) -> ApiResult<u64> {
        let values = validate_payload(model, payload, WriteMode::Update)?;

        if values.is_empty() && !model.timestamps {
            let spec = QuerySpec {
                filters: conditions.to_vec(),
                ..QuerySpec::default()
            };
            return self.count(model, &spec).await;
        }

        let mut sql = Sql::new("UPDATE ");
        sql.push(ident(&model.table));
        sql.push(" AS t SET ");
        let mut separated = sql.separated(", ");
        for (field, value) in &values {
            separated.push(ident(field));
            separated.push_unseparated(" = ");
            separated.push_bind_unseparated(bind_text(value));
            separated.push_unseparated("::");
            separated.push_unseparated(kind_of(model, field).sql_type());
        }
        if model.timestamps {
            separated.push(format!("{} = NOW()", ident(UPDATED_AT_FIELD)));
        }
        sql.push(" WHERE TRUE");
        push_filters(&mut sql, "t", model, conditions);

        let result = sql
            .build()
            .execute(&self.pool)
            .await
            .map_err(|err| map_db_error(err, Some(model), Some(&values), "Failed to update rows"))?;
        Ok(result.rows_affected())
    }

    async fn destroy_where(&self, model: &ResourceModel, conditions: &[Filter]) -> ApiResult<u64> {
        let mut sql = Sql::new("DELETE FROM ");
        sql.push(ident(&model.table));
        sql.push(" AS t WHERE TRUE");
        push_filters(&mut sql, "t", model, conditions);

        let result = sql
            .build()
            .execute(&self.pool)
            .await
            .map_err(|err| map_db_error(err, Some(model), None, "Failed to delete rows"))?;
        Ok(result.rows_affected())
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

        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to start transaction")?;

        let mut sql = Sql::new("DELETE FROM ");
        sql.push(ident(&target.table));
        sql.push(" WHERE ");
        sql.push(ident(&association.foreign_key));
        sql.push(" = ");
        sql.push_bind(parent_id);
        sql.build()
            .execute(&mut *tx)
            .await
            .map_err(|err| map_db_error(err, Some(target), None, "Failed to remove children"))?;

        let mut inserted = Vec::with_capacity(validated.len());
        for values in &validated {
            let row: Value = Self::insert_sql(target, values)
                .build_query_scalar()
                .fetch_one(&mut *tx)
                .await
                .map_err(|err| {
                    map_db_error(err, Some(target), Some(values), "Failed to insert child")
                })?;
            if let Value::Object(row) = row {
                inserted.push(row);
            }
        }

        tx.commit().await.context("Failed to commit children")?;
        Ok(inserted)
    }
}

impl PostgresStore {
    /// Aggregates and/or grouping: one JSON object per group, or a single row.
    async fn find_grouped(&self, model: &ResourceModel, spec: &QuerySpec) -> ApiResult<Page> {
        let mut select = Vec::new();
        if let Some(group) = &spec.group {
            select.push(format!("{}, t.{}", literal(group), ident(group)));
        }
        for agg in &spec.aggregates {
            let func = match agg.func {
                AggFunc::Sum => "SUM",
                AggFunc::Avg => "AVG",
            };
            select.push(format!("{}, {}(t.{})", literal(&agg.field), func, ident(&agg.field)));
        }

        let mut sql = Sql::new("SELECT jsonb_build_object(");
        sql.push(select.join(", "));
        sql.push(") FROM ");
        sql.push(ident(&model.table));
        sql.push(" AS t");
        push_conditions(&mut sql, &self.registry, model, spec);
        if let Some(group) = &spec.group {
            sql.push(" GROUP BY t.");
            sql.push(ident(group));
        }

        if spec.has_aggregates() {
            let count = self.count(model, spec).await?;
            let rows = self.fetch_rows(sql, "Failed to aggregate rows").await?;
            return Ok(Page::new(rows, count));
        }

        let group_order: Vec<(String, Direction)> = spec
            .order
            .iter()
            .filter(|(field, _)| Some(field) == spec.group.as_ref())
            .cloned()
            .collect();
        if group_order.is_empty() {
            sql.push(" ORDER BY MIN(t.\"id\") ASC");
        } else {
            push_order(&mut sql, &group_order);
        }
        push_window(&mut sql, spec);

        let mut count_sql = Sql::new("SELECT COUNT(*) FROM (SELECT 1 FROM ");
        count_sql.push(ident(&model.table));
        count_sql.push(" AS t");
        push_conditions(&mut count_sql, &self.registry, model, spec);
        if let Some(group) = &spec.group {
            count_sql.push(" GROUP BY t.");
            count_sql.push(ident(group));
        }
        count_sql.push(") AS g");

        let count = self.fetch_count(count_sql, "Failed to count groups").await?;
        let rows = self.fetch_rows(sql, "Failed to group rows").await?;
        Ok(Page::new(rows, count))
    }
}

fn ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn kind_of(model: &ResourceModel, field: &str) -> FieldKind {
    model.field(field).map_or(FieldKind::Text, |f| f.kind)
}

fn bind_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        other => Some(display_value(other)),
    }
}

/// (column on the parent row, column on the child row) joining an association.
fn link_columns(assoc: &AssociationDescriptor) -> (&str, &str) {
    match assoc.kind {
        AssociationKind::Owning => (assoc.foreign_key.as_str(), ID_FIELD),
        AssociationKind::Owned => (ID_FIELD, assoc.foreign_key.as_str()),
    }
}

fn push_conditions(sql: &mut Sql<'_>, registry: &ModelRegistry, model: &ResourceModel, spec: &QuerySpec) {
    sql.push(" WHERE TRUE");
    push_filters(sql, "t", model, &spec.filters);
    if let Some(clause) = &spec.search {
        push_search(sql, "t", clause);
    }
    push_required_includes(sql, registry, "t", model, &spec.expansions, 1);
}

fn push_filters(sql: &mut Sql<'_>, alias: &str, model: &ResourceModel, filters: &[Filter]) {
    for filter in filters {
        let sql_type = kind_of(model, &filter.field).sql_type();
        sql.push(format!(" AND {}.{} ", alias, ident(&filter.field)));
        match (&filter.op, &filter.value) {
            (Operator::In, FilterValue::List(items)) => {
                sql.push("= ANY(");
                sql.push_bind(items.clone());
                sql.push(format!("::{}[])", sql_type));
            }
            (op, FilterValue::Single(value)) => {
                let op = if *op == Operator::In { "=" } else { op.sql() };
                sql.push(op);
                sql.push(" ");
                sql.push_bind(value.clone());
                sql.push(format!("::{}", sql_type));
            }
            (_, FilterValue::List(_)) => {
                sql.push("IS NULL AND FALSE");
            }
        }
    }
}

fn push_where_map(
    sql: &mut Sql<'_>,
    alias: &str,
    model: &ResourceModel,
    clause: &BTreeMap<String, String>,
) {
    let filters: Vec<Filter> = clause
        .iter()
        .map(|(field, value)| Filter::eq(field, value))
        .collect();
    push_filters(sql, alias, model, &filters);
}

fn push_search(sql: &mut Sql<'_>, alias: &str, clause: &SearchClause) {
    if clause.fields.is_empty() {
        sql.push(" AND FALSE");
        return;
    }
    sql.push(" AND (");
    for (idx, field) in clause.fields.iter().enumerate() {
        if idx > 0 {
            sql.push(" OR ");
        }
        sql.push(format!("{}.{}::text ", alias, ident(field)));
        if clause.like {
            sql.push("LIKE '%' || ");
            sql.push_bind(clause.term.clone());
            sql.push(" || '%'");
        } else {
            sql.push("= ");
            sql.push_bind(clause.term.clone());
        }
    }
    sql.push(")");
}

/// Inner-join semantics for required inclusions: the parent row only matches when a
/// linked child satisfying the node's `where` (and its own required children) exists.
fn push_required_includes(
    sql: &mut Sql<'_>,
    registry: &ModelRegistry,
    parent_alias: &str,
    model: &ResourceModel,
    includes: &[AssociationInclude],
    depth: usize,
) {
    for include in includes.iter().filter(|i| i.is_required()) {
        let (Some(assoc), Some(target)) = (
            model.association(&include.alias),
            registry.resolve(&include.model),
        ) else {
            continue;
        };
        let (parent_key, child_key) = link_columns(assoc);
        let alias = format!("c{}", depth);

        sql.push(format!(
            " AND EXISTS (SELECT 1 FROM {} AS {} WHERE {}.{} = {}.{}",
            ident(&target.table),
            alias,
            alias,
            ident(child_key),
            parent_alias,
            ident(parent_key)
        ));
        if let Some(clause) = &include.where_clause {
            push_where_map(sql, &alias, target, clause);
        }
        push_required_includes(sql, registry, &alias, target, &include.children, depth + 1);
        sql.push(")");
    }
}

fn push_order(sql: &mut Sql<'_>, order: &[(String, Direction)]) {
    if order.is_empty() {
        sql.push(" ORDER BY t.\"id\" ASC");
        return;
    }
    let clauses: Vec<String> = order
        .iter()
        .map(|(field, direction)| match direction {
            Direction::Asc => format!("t.{} ASC NULLS FIRST", ident(field)),
            Direction::Desc => format!("t.{} DESC NULLS LAST", ident(field)),
        })
        .collect();
    sql.push(" ORDER BY ");
    sql.push(clauses.join(", "));
}

fn push_window(sql: &mut Sql<'_>, spec: &QuerySpec) {
    if let Some(limit) = spec.limit {
        sql.push(" LIMIT ");
        sql.push_bind(i64::from(limit));
    }
    if let Some(offset) = spec.offset {
        sql.push(" OFFSET ");
        sql.push_bind(i64::from(offset));
    }
}

fn create_table_sql(model: &ResourceModel) -> String {
    let mut columns = vec![format!("{} BIGSERIAL PRIMARY KEY", ident(ID_FIELD))];
    for field in model.fields() {
        if field.name == ID_FIELD {
            continue;
        }
        let mut column = format!("{} {}", ident(&field.name), field.kind.sql_type());
        if field.required || model.is_managed_field(&field.name) {
            column.push_str(" NOT NULL");
        }
        if model.is_managed_field(&field.name) {
            column.push_str(" DEFAULT NOW()");
        }
        if field.unique {
            column.push_str(&format!(
                " CONSTRAINT {} UNIQUE",
                ident(&format!("{}_{}_key", model.table, field.name))
            ));
        }
        columns.push(column);
    }
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        ident(&model.table),
        columns.join(", ")
    )
}

/// Translate SQLSTATE codes into the typed errors of the API.
fn map_db_error(
    err: sqlx::Error,
    model: Option<&ResourceModel>,
    values: Option<&Record>,
    context: &str,
) -> ApiError {
    let sqlx::Error::Database(db) = &err else {
        return ApiError::Server(anyhow::Error::new(err).context(context.to_string()));
    };
    let code = db.code().map(|c| c.into_owned()).unwrap_or_default();
    let pg = db.try_downcast_ref::<PgDatabaseError>();

    match code.as_str() {
        "23505" => {
            let constraint = db.constraint().unwrap_or_default();
            let field = model
                .and_then(|m| {
                    m.fields()
                        .iter()
                        .find(|f| f.unique && constraint.contains(&format!("_{}_", f.name)))
                })
                .map(|f| f.name.clone())
                .unwrap_or_else(|| RESOURCE_PROPERTY.to_string());
            let value = values
                .and_then(|v| v.get(&field))
                .map(display_value)
                .unwrap_or_default();
            ApiError::UniqueConstraint { field, value }
        }
        "23502" => {
            let column = pg
                .and_then(|e| e.column())
                .unwrap_or(RESOURCE_PROPERTY)
                .to_string();
            ApiError::Validation {
                errors: vec![ValidationItem::new(
                    format!("{} cannot be null", column),
                    "notNull Violation",
                    &column,
                    None,
                )],
            }
        }
        code if code.starts_with("22") => ApiError::Validation {
            errors: vec![ValidationItem::new(
                db.message().to_string(),
                "Validation error",
                pg.and_then(|e| e.column()).unwrap_or(RESOURCE_PROPERTY),
                None,
            )],
        },
        _ => ApiError::Server(anyhow::Error::new(err).context(context.to_string())),
    }
}
