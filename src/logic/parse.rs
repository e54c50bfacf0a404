use itertools::Itertools;
use std::collections::BTreeMap;

use crate::error::{ApiError, ApiResult, EMPTY_VALUE, RESOURCE_PROPERTY};
use crate::logic::expand::AssociationResolver;
use crate::model::{
    AggFunc, Aggregate, AssociationKind, Criteria, Direction, FieldName, Filter, FilterValue,
    FieldDef, ModelRegistry, Operator, QuerySpec, ResourceModel, SearchClause, ID_FIELD,
};

/// Query parameters that are never treated as filter fields.
pub const RESERVED_PARAMETERS: [&str; 10] = [
    "limit", "offset", "order", "group", "fields", "expand", "avg", "sum", "q", "like",
];

/// Trusted, server-side equality constraints merged into the WHERE clause.
pub type Defaults = BTreeMap<FieldName, String>;

pub fn is_reserved(name: &str) -> bool {
    RESERVED_PARAMETERS.contains(&name)
}

/// Split `gte-endDate` into (`gte`, `endDate`). Any hyphenated name is treated as
/// carrying an operator prefix.
pub fn split_range_prefix(name: &str) -> Option<(&str, &str)> {
    name.split_once('-')
}

/// Whether the request asks for aggregate functions (and therefore a single synthetic row).
pub fn has_aggregate_functions(criteria: &Criteria) -> bool {
    AggFunc::ALL.iter().any(|func| criteria.contains(func.param()))
}

/// Parse an `offset` value: an integer >= 0.
pub fn parse_offset(raw: &str) -> ApiResult<u32> {
    let offset: i64 = raw.trim().parse().map_err(|_| {
        ApiError::parsing(
            "offset must be a valid number, greater than or equal to 0",
            "offset",
            raw,
        )
    })?;
    if offset < 0 {
        return Err(ApiError::parsing(
            "offset must be greater than or equal to 0",
            "offset",
            raw,
        ));
    }
    u32::try_from(offset).map_err(|_| ApiError::parsing("offset is too large", "offset", raw))
}

/// Parse a `limit` value: an integer >= 1.
pub fn parse_limit(raw: &str) -> ApiResult<u32> {
    let limit: i64 = raw.trim().parse().map_err(|_| {
        ApiError::parsing("limit must be a valid number, greater than 0", "limit", raw)
    })?;
    if limit < 1 {
        return Err(ApiError::parsing("limit must be greater than 0", "limit", raw));
    }
    u32::try_from(limit).map_err(|_| ApiError::parsing("limit is too large", "limit", raw))
}

/// Builds `QuerySpec`s for one resource model. Pure: the same inputs always
/// produce the same `QuerySpec` or the same error.
pub struct CriteriaParser<'a> {
    registry: &'a ModelRegistry,
    model: &'a ResourceModel,
    default_limit: u32,
}

impl<'a> CriteriaParser<'a> {
    pub fn new(registry: &'a ModelRegistry, model: &'a ResourceModel, default_limit: u32) -> Self {
        Self {
            registry,
            model,
            default_limit,
        }
    }

    pub fn default_limit(&self) -> u32 {
        self.default_limit
    }

    /// Criteria for `count`: filters, association constraints and defaults.
    pub fn parse_count(&self, criteria: &Criteria, defaults: &Defaults) -> ApiResult<QuerySpec> {
        let expansions = self.resolve_expansions(criteria)?;
        let filters = self.build_filters(criteria)?;
        let filters = self.apply_defaults(filters, defaults)?;

        Ok(QuerySpec {
            filters,
            expansions,
            ..QuerySpec::default()
        })
    }

    /// Criteria for `search`: `q` is required, `like` switches to substring matching and
    /// `fields` restricts the searched fields.
    pub fn parse_search(&self, criteria: &Criteria, defaults: &Defaults) -> ApiResult<QuerySpec> {
        let term = match criteria.get("q") {
            Some(q) if !q.is_empty() => q.to_string(),
            _ => {
                return Err(ApiError::parsing(
                    "search parameter 'q' cannot be empty",
                    "q",
                    EMPTY_VALUE,
                ))
            }
        };
        let like = matches!(criteria.get("like"), Some("1") | Some("true"));

        let fields = match criteria.get("fields") {
            Some(raw) if !raw.is_empty() => self.parse_fields(raw)?,
            _ => self.model.field_names(),
        };

        let expansions = self.resolve_expansions(criteria)?;
        let filters = self.build_filters(criteria)?;
        let offset = self.offset(criteria)?;
        let limit = self.limit(criteria)?;
        let filters = self.apply_defaults(filters, defaults)?;

        Ok(QuerySpec {
            filters,
            offset,
            limit: Some(limit),
            search: Some(SearchClause { term, fields, like }),
            expansions,
            ..QuerySpec::default()
        })
    }

    /// Criteria for `index`: the full set of collection options.
    pub fn parse_index(&self, criteria: &Criteria, defaults: &Defaults) -> ApiResult<QuerySpec> {
        let offset = self.offset(criteria)?;
        let limit = self.limit(criteria)?;
        let expansions = self.resolve_expansions(criteria)?;
        let filters = self.build_filters(criteria)?;
        let filters = self.apply_defaults(filters, defaults)?;

        let order = match criteria.get("order") {
            Some(raw) => self.parse_order(raw)?,
            None => Vec::new(),
        };
        let group = match criteria.get("group") {
            Some(raw) => Some(self.parse_group(raw)?),
            None => None,
        };
        let selected_fields = match criteria.get("fields") {
            Some(raw) => Some(self.parse_fields(raw)?),
            None => None,
        };
        let aggregates = self.parse_aggregates(criteria)?;

        Ok(QuerySpec {
            filters,
            offset,
            limit: Some(limit),
            order,
            group,
            selected_fields,
            aggregates,
            search: None,
            expansions,
        })
    }

    /// Criteria for `show`: the id condition comes first, then request filters,
    /// association constraints and an optional projection.
    pub fn parse_show(&self, id: &str, criteria: &Criteria) -> ApiResult<QuerySpec> {
        self.check_value(ID_FIELD, id)?;
        let expansions = self.resolve_expansions(criteria)?;

        let mut filters = vec![Filter::eq(ID_FIELD, id)];
        filters.extend(self.build_filters(criteria)?);

        let selected_fields = match criteria.get("fields") {
            Some(raw) => Some(self.parse_fields(raw)?),
            None => None,
        };

        Ok(QuerySpec {
            filters,
            selected_fields,
            expansions,
            ..QuerySpec::default()
        })
    }

    /// Conditions for `update`/`delete`: plain equality filters only.
    pub fn parse_conditions(&self, criteria: &Criteria) -> ApiResult<QuerySpec> {
        let filters = self.build_filters(criteria)?;
        if let Some(filter) = filters.iter().find(|f| f.op != Operator::Eq) {
            return Err(ApiError::field(RESOURCE_PROPERTY, &filter.field));
        }
        Ok(QuerySpec {
            filters,
            ..QuerySpec::default()
        })
    }

    pub fn resolve_expansions(
        &self,
        criteria: &Criteria,
    ) -> ApiResult<Vec<crate::model::AssociationInclude>> {
        AssociationResolver::new(self.registry).resolve(self.model, criteria)
    }

    fn offset(&self, criteria: &Criteria) -> ApiResult<Option<u32>> {
        criteria.get("offset").map(parse_offset).transpose()
    }

    fn limit(&self, criteria: &Criteria) -> ApiResult<u32> {
        Ok(criteria
            .get("limit")
            .map(parse_limit)
            .transpose()?
            .unwrap_or(self.default_limit))
    }

    /// Translate non-reserved parameters into filters, in request order.
    ///
    /// Dotted names are association constraints and are left to the resolver.
    pub fn build_filters(&self, criteria: &Criteria) -> ApiResult<Vec<Filter>> {
        let mut filters = Vec::new();

        for (name, value) in criteria.iter() {
            if is_reserved(name) {
                continue;
            }

            if let Some((prefix, field)) = split_range_prefix(name) {
                let op = Operator::from_prefix(prefix)
                    .ok_or_else(|| ApiError::field(RESOURCE_PROPERTY, name))?;
                if field.contains('.') {
                    return Err(ApiError::field(RESOURCE_PROPERTY, name));
                }
                if !self.model.has_field(field) {
                    return Err(ApiError::field(RESOURCE_PROPERTY, field));
                }

                let value = if op == Operator::In {
                    let items: Vec<String> = value.split(',').map(str::to_string).collect();
                    for item in &items {
                        self.check_value(field, item)?;
                    }
                    FilterValue::List(items)
                } else {
                    self.check_value(field, value)?;
                    FilterValue::Single(value.to_string())
                };
                filters.push(Filter {
                    field: field.to_string(),
                    op,
                    value,
                });
                continue;
            }

            if name.contains('.') {
                continue;
            }
            if !self.model.has_field(name) {
                return Err(ApiError::field(RESOURCE_PROPERTY, name));
            }
            self.check_value(name, value)?;
            filters.push(Filter::eq(name, value));
        }

        Ok(filters)
    }

    /// Merge caller defaults into the filters; a default replaces every request
    /// filter on the same field.
    pub fn apply_defaults(&self, filters: Vec<Filter>, defaults: &Defaults) -> ApiResult<Vec<Filter>> {
        let mut filters = filters;
        for (field, value) in defaults {
            if !self.model.has_field(field) {
                return Err(ApiError::field(RESOURCE_PROPERTY, field));
            }
            filters.retain(|f| &f.field != field);
            filters.push(Filter::eq(field, value));
        }
        Ok(filters)
    }

    /// `order=name,-endDate`: a leading `-` sorts descending.
    pub fn parse_order(&self, raw: &str) -> ApiResult<Vec<(FieldName, Direction)>> {
        if raw.is_empty() {
            return Err(ApiError::parsing("order cannot be empty", "order", EMPTY_VALUE));
        }

        let order: Vec<(FieldName, Direction)> = raw
            .split(',')
            .map(|entry| match entry.strip_prefix('-') {
                Some(field) => (field.to_string(), Direction::Desc),
                None => (entry.to_string(), Direction::Asc),
            })
            .collect();

        let unknown: Vec<&str> = order
            .iter()
            .map(|(field, _)| field.as_str())
            .filter(|field| !self.model.has_field(field))
            .collect();
        if !unknown.is_empty() {
            return Err(ApiError::field("order", &unknown.join(", ")));
        }

        Ok(order)
    }

    /// `fields=a,b`: projection (or, for search, the searched fields).
    pub fn parse_fields(&self, raw: &str) -> ApiResult<Vec<FieldName>> {
        if raw.is_empty() {
            return Err(ApiError::parsing("fields cannot be empty", "fields", EMPTY_VALUE));
        }

        let fields: Vec<FieldName> = raw.split(',').map(str::to_string).unique().collect();
        let unknown: Vec<&str> = fields
            .iter()
            .map(String::as_str)
            .filter(|field| !self.model.has_field(field))
            .collect();
        if !unknown.is_empty() {
            return Err(ApiError::field("fields", &unknown.join(", ")));
        }

        Ok(fields)
    }

    /// `group=category`: a field, or an owning association (grouped by its foreign key).
    pub fn parse_group(&self, raw: &str) -> ApiResult<FieldName> {
        self.column_for("group", raw, "grouped")
    }

    /// `sum=amount,hours&avg=hours`. The first unknown field is reported, named after
    /// its aggregate function.
    pub fn parse_aggregates(&self, criteria: &Criteria) -> ApiResult<Vec<Aggregate>> {
        let mut aggregates = Vec::new();
        for func in AggFunc::ALL {
            let Some(raw) = criteria.get(func.param()) else {
                continue;
            };
            for field in raw.split(',') {
                let column = self.column_for(func.param(), field, "aggregated")?;
                aggregates.push(Aggregate {
                    func,
                    field: column,
                });
            }
        }
        Ok(aggregates)
    }

    /// Map a field or owning association name onto the column that stores it.
    ///
    /// Owned associations exist but have no column on this model: they are a Parsing
    /// error rather than an unknown field.
    fn column_for(&self, param: &str, name: &str, usage: &str) -> ApiResult<FieldName> {
        if self.model.has_field(name) {
            return Ok(name.to_string());
        }
        match self.model.association(name) {
            Some(assoc) if assoc.kind == AssociationKind::Owning => Ok(assoc.foreign_key.clone()),
            Some(assoc) => Err(ApiError::parsing(
                format!("{} cannot be {}", assoc.name, usage),
                param,
                name,
            )),
            None => Err(ApiError::field(param, name)),
        }
    }

    /// Reject values the field's kind cannot hold, so they never reach the datastore.
    fn check_value(&self, field: &str, value: &str) -> ApiResult<()> {
        match self.model.field(field) {
            Some(def) => check_value_kind(def, field, value),
            None => Ok(()),
        }
    }
}

/// Fail with a Parsing error named after `param` when `value` does not fit `def`'s kind.
pub fn check_value_kind(def: &FieldDef, param: &str, value: &str) -> ApiResult<()> {
    if def.kind.coerce(value).is_some() {
        return Ok(());
    }
    Err(ApiError::parsing(
        format!(
            "{} must be a valid {} value",
            param,
            format!("{:?}", def.kind).to_lowercase()
        ),
        param,
        value,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FieldDef, FieldKind};

    fn registry() -> ModelRegistry {
        ModelRegistry::builder()
            .register(
                ResourceModel::new("User", "users", "user")
                    .field_def(FieldDef::new("email", FieldKind::Text))
                    .has_many("tasks", "Task", "user_id"),
            )
            .register(
                ResourceModel::new("Task", "tasks", "task")
                    .field_def(FieldDef::new("name", FieldKind::Text))
                    .field_def(FieldDef::new("endDate", FieldKind::Timestamp))
                    .field_def(FieldDef::new("amount", FieldKind::Float))
                    .field_def(FieldDef::new("category", FieldKind::Text))
                    .field_def(FieldDef::new("user_id", FieldKind::Integer))
                    .belongs_to("user", "User", "user_id"),
            )
            .build()
            .unwrap()
    }

    fn criteria(pairs: &[(&str, &str)]) -> Criteria {
        Criteria::from_iter(pairs.iter().copied())
    }

    fn index(pairs: &[(&str, &str)]) -> ApiResult<QuerySpec> {
        let registry = registry();
        let task = registry.resolve("Task").unwrap().clone();
        CriteriaParser::new(&registry, &task, 25).parse_index(&criteria(pairs), &Defaults::new())
    }

    fn assert_field_error(result: ApiResult<QuerySpec>, expected_field: &str, expected_value: &str) {
        match result {
            Err(ApiError::Field { field, value, .. }) => {
                assert_eq!(field, expected_field);
                assert_eq!(value, expected_value);
            }
            other => panic!("expected field error, got {:?}", other),
        }
    }

    #[test]
    fn test_range_filters() {
        let spec = index(&[("gte-endDate", "2024-01-01"), ("lte-endDate", "2024-12-31")]).unwrap();
        assert_eq!(
            spec.filters,
            vec![
                Filter {
                    field: "endDate".to_string(),
                    op: Operator::Gte,
                    value: FilterValue::Single("2024-01-01".to_string()),
                },
                Filter {
                    field: "endDate".to_string(),
                    op: Operator::Lte,
                    value: FilterValue::Single("2024-12-31".to_string()),
                },
            ]
        );
    }

    #[test]
    fn test_in_filter_splits_values() {
        let spec = index(&[("in-category", "a,b,c")]).unwrap();
        assert_eq!(spec.filters[0].op, Operator::In);
        assert_eq!(
            spec.filters[0].value,
            FilterValue::List(vec!["a".into(), "b".into(), "c".into()])
        );
    }

    #[test]
    fn test_unknown_operator_and_field() {
        assert_field_error(index(&[("ne-name", "x")]), RESOURCE_PROPERTY, "ne-name");
        assert_field_error(index(&[("gte-colour", "x")]), RESOURCE_PROPERTY, "colour");
        assert_field_error(index(&[("colour", "x")]), RESOURCE_PROPERTY, "colour");
        assert_field_error(index(&[("user", "1")]), RESOURCE_PROPERTY, "user");
        assert_field_error(
            index(&[("gte-user.id", "1")]),
            RESOURCE_PROPERTY,
            "gte-user.id",
        );
    }

    #[test]
    fn test_offset_and_limit() {
        let spec = index(&[("offset", "20"), ("limit", "10")]).unwrap();
        assert_eq!(spec.offset, Some(20));
        assert_eq!(spec.limit, Some(10));

        let spec = index(&[]).unwrap();
        assert_eq!(spec.offset, None);
        assert_eq!(spec.limit, Some(25));

        for bad in ["-1", "abc", ""] {
            match index(&[("offset", bad)]) {
                Err(ApiError::Parsing { field, value, .. }) => {
                    assert_eq!(field, "offset");
                    assert_eq!(value, bad);
                }
                other => panic!("expected parsing error, got {:?}", other),
            }
        }
        for bad in ["0", "-3", "ten"] {
            match index(&[("limit", bad)]) {
                Err(ApiError::Parsing { field, .. }) => assert_eq!(field, "limit"),
                other => panic!("expected parsing error, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_order() {
        let spec = index(&[("order", "name,-endDate")]).unwrap();
        assert_eq!(
            spec.order,
            vec![
                ("name".to_string(), Direction::Asc),
                ("endDate".to_string(), Direction::Desc)
            ]
        );
        assert_field_error(index(&[("order", "name,-colour")]), "order", "colour");
        assert!(matches!(
            index(&[("order", "")]),
            Err(ApiError::Parsing { .. })
        ));
    }

    #[test]
    fn test_fields_projection() {
        let spec = index(&[("fields", "name,endDate")]).unwrap();
        assert_eq!(
            spec.selected_fields,
            Some(vec!["name".to_string(), "endDate".to_string()])
        );
        assert_field_error(index(&[("fields", "name,colour")]), "fields", "colour");
    }

    #[test]
    fn test_empty_fields_is_parsing_error() {
        match index(&[("fields", "")]) {
            Err(ApiError::Parsing { field, value, .. }) => {
                assert_eq!(field, "fields");
                assert_eq!(value, "[empty]");
            }
            other => panic!("expected parsing error, got {:?}", other),
        }
    }

    #[test]
    fn test_group_and_aggregates() {
        let spec = index(&[("sum", "amount"), ("group", "category")]).unwrap();
        assert_eq!(spec.group, Some("category".to_string()));
        assert_eq!(
            spec.aggregates,
            vec![Aggregate {
                func: AggFunc::Sum,
                field: "amount".to_string()
            }]
        );
        assert!(spec.has_aggregates());

        let spec = index(&[("group", "user")]).unwrap();
        assert_eq!(spec.group, Some("user_id".to_string()));

        assert_field_error(index(&[("group", "colour")]), "group", "colour");
        assert_field_error(index(&[("avg", "amount,weight")]), "avg", "weight");
    }

    #[test]
    fn test_owned_association_cannot_be_grouped_or_aggregated() {
        let registry = registry();
        let user = registry.resolve("User").unwrap().clone();
        let parser = CriteriaParser::new(&registry, &user, 25);

        for (param, message) in [
            ("group", "tasks cannot be grouped"),
            ("sum", "tasks cannot be aggregated"),
            ("avg", "tasks cannot be aggregated"),
        ] {
            match parser.parse_index(&criteria(&[(param, "tasks")]), &Defaults::new()) {
                Err(ApiError::Parsing {
                    message: got,
                    field,
                    value,
                }) => {
                    assert_eq!(got, message);
                    assert_eq!(field, param);
                    assert_eq!(value, "tasks");
                }
                other => panic!("expected parsing error for {}, got {:?}", param, other),
            }
        }
    }

    #[test]
    fn test_dotted_filters_become_includes_not_filters() {
        let spec = index(&[("user.email", "a@b.c")]).unwrap();
        assert!(spec.filters.is_empty());
        assert_eq!(spec.expansions.len(), 1);
        assert_eq!(
            spec.expansions[0].where_clause.as_ref().unwrap()["email"],
            "a@b.c"
        );
    }

    #[test]
    fn test_defaults_override_request_filters() {
        let registry = registry();
        let task = registry.resolve("Task").unwrap().clone();
        let parser = CriteriaParser::new(&registry, &task, 25);
        let mut defaults = Defaults::new();
        defaults.insert("user_id".to_string(), "7".to_string());

        let spec = parser
            .parse_index(&criteria(&[("user_id", "9"), ("name", "x")]), &defaults)
            .unwrap();
        assert_eq!(
            spec.filters,
            vec![Filter::eq("name", "x"), Filter::eq("user_id", "7")]
        );

        let mut bad = Defaults::new();
        bad.insert("owner".to_string(), "7".to_string());
        assert_field_error(
            parser.parse_index(&criteria(&[]), &bad),
            RESOURCE_PROPERTY,
            "owner",
        );
    }

    #[test]
    fn test_search() {
        let registry = registry();
        let task = registry.resolve("Task").unwrap().clone();
        let parser = CriteriaParser::new(&registry, &task, 25);

        let spec = parser
            .parse_search(&criteria(&[("q", "milk"), ("like", "true"), ("fields", "name")]), &Defaults::new())
            .unwrap();
        let search = spec.search.unwrap();
        assert_eq!(search.term, "milk");
        assert!(search.like);
        assert_eq!(search.fields, vec!["name".to_string()]);
        assert_eq!(spec.limit, Some(25));

        let spec = parser
            .parse_search(&criteria(&[("q", "milk")]), &Defaults::new())
            .unwrap();
        let search = spec.search.unwrap();
        assert!(!search.like);
        assert_eq!(search.fields, task.field_names());

        match parser.parse_search(&criteria(&[("q", "")]), &Defaults::new()) {
            Err(ApiError::Parsing { field, .. }) => assert_eq!(field, "q"),
            other => panic!("expected parsing error, got {:?}", other),
        }
    }

    #[test]
    fn test_show_puts_id_first() {
        let registry = registry();
        let task = registry.resolve("Task").unwrap().clone();
        let parser = CriteriaParser::new(&registry, &task, 25);

        let spec = parser
            .parse_show("4", &criteria(&[("user_id", "1"), ("expand", "user")]))
            .unwrap();
        assert_eq!(spec.filters, vec![Filter::eq("id", "4"), Filter::eq("user_id", "1")]);
        assert_eq!(spec.expansions[0].alias, "user");

        assert!(matches!(
            parser.parse_show("abc", &criteria(&[])),
            Err(ApiError::Parsing { .. })
        ));
        assert!(matches!(
            parser.parse_show("4", &criteria(&[("fields", "")])),
            Err(ApiError::Parsing { .. })
        ));
    }

    #[test]
    fn test_value_kind_is_checked() {
        match index(&[("user_id", "seven")]) {
            Err(ApiError::Parsing { field, value, .. }) => {
                assert_eq!(field, "user_id");
                assert_eq!(value, "seven");
            }
            other => panic!("expected parsing error, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_timestamps_are_rejected() {
        for pairs in [
            [("gte-endDate", "yesterday")],
            [("endDate", "2024-13-45")],
            [("in-endDate", "2024-01-01,soon")],
        ] {
            match index(&pairs) {
                Err(ApiError::Parsing { field, message, .. }) => {
                    assert_eq!(field, "endDate");
                    assert_eq!(message, "endDate must be a valid timestamp value");
                }
                other => panic!("expected parsing error, got {:?}", other),
            }
        }

        let spec = index(&[("lt-endDate", "2024-01-01T10:00:00Z")]).unwrap();
        assert_eq!(spec.filters[0].op, Operator::Lt);
    }

    #[test]
    fn test_parsing_is_idempotent() {
        let pairs = [
            ("gte-endDate", "2024-01-01"),
            ("order", "-name"),
            ("expand", "user"),
            ("offset", "10"),
        ];
        assert_eq!(index(&pairs).unwrap(), index(&pairs).unwrap());
    }
}
