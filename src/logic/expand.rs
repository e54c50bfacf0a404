use itertools::Itertools;

use crate::error::{ApiError, ApiResult};
use crate::logic::parse::{check_value_kind, is_reserved, split_range_prefix};
use crate::model::{
    merge_includes, AssociationInclude, Criteria, FieldDef, ModelRegistry, ResourceModel,
};

/// Turns `expand` entries and dotted filter names into one inclusion tree.
pub struct AssociationResolver<'a> {
    registry: &'a ModelRegistry,
}

impl<'a> AssociationResolver<'a> {
    pub fn new(registry: &'a ModelRegistry) -> Self {
        Self { registry }
    }

    /// Paths named by the request: `expand` entries first, then dotted criteria keys.
    /// Range-prefixed keys are left to the filter builder, which rejects them.
    pub fn collect_paths(criteria: &Criteria) -> Vec<String> {
        let expand = criteria
            .get("expand")
            .into_iter()
            .flat_map(|value| value.split(','))
            .map(str::trim)
            .filter(|path| !path.is_empty());
        let dotted = criteria
            .names()
            .filter(|name| name.contains('.') && split_range_prefix(name).is_none());

        expand
            .chain(dotted)
            .map(str::to_string)
            .unique()
            .collect()
    }

    /// Resolve every path of the request against `model`.
    ///
    /// All unknown paths are reported together in one error against `expand`.
    pub fn resolve(
        &self,
        model: &ResourceModel,
        criteria: &Criteria,
    ) -> ApiResult<Vec<AssociationInclude>> {
        let paths = Self::collect_paths(criteria);

        let unknown: Vec<&String> = paths
            .iter()
            .filter(|path| !is_reserved(path) && !self.registry.has_association_path(model, path))
            .collect();
        if !unknown.is_empty() {
            return Err(ApiError::association(&unknown.iter().join(", ")));
        }

        let mut includes = Vec::new();
        for path in &paths {
            if let Some(node) = self.build_path(model, path, criteria)? {
                includes = merge_includes(includes, node);
            }
        }
        Ok(includes)
    }

    /// Build the chain of nodes for one validated path, innermost node first.
    ///
    /// A filter value on a sub-resource field must fit that field's kind.
    fn build_path(
        &self,
        model: &ResourceModel,
        path: &str,
        criteria: &Criteria,
    ) -> ApiResult<Option<AssociationInclude>> {
        let mut chain: Vec<AssociationInclude> = Vec::new();
        let mut terminal_field: Option<&FieldDef> = None;
        let mut current = model;

        for segment in path.split('.') {
            if let Some(target) = self.registry.association_target(current, segment) {
                chain.push(AssociationInclude::new(&target.name, segment));
                current = target;
            } else if let Some(field) = current.field(segment) {
                terminal_field = Some(field);
            }
        }

        let Some(mut node) = chain.pop() else {
            return Ok(None);
        };
        if let Some(field) = terminal_field {
            match criteria.get(path).filter(|value| !value.is_empty()) {
                Some(value) => {
                    check_value_kind(field, path, value)?;
                    let mut where_clause = std::collections::BTreeMap::new();
                    where_clause.insert(field.name.clone(), value.to_string());
                    node.where_clause = Some(where_clause);
                    node.required = Some(false);
                }
                None => node.attributes = Some(vec![field.name.clone()]),
            }
        }

        while let Some(parent) = chain.pop() {
            node = parent.with_child(node);
        }
        Ok(Some(node))
    }
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
                    .field_def(FieldDef::new("name", FieldKind::Text))
                    .has_many("tasks", "Task", "user_id")
                    .has_many("projects", "Project", "user_id"),
            )
            .register(
                ResourceModel::new("Task", "tasks", "task")
                    .field_def(FieldDef::new("name", FieldKind::Text))
                    .field_def(FieldDef::new("endDate", FieldKind::Timestamp))
                    .field_def(FieldDef::new("user_id", FieldKind::Integer))
                    .belongs_to("user", "User", "user_id")
                    .has_many("notes", "Note", "task_id"),
            )
            .register(
                ResourceModel::new("Note", "notes", "note")
                    .field_def(FieldDef::new("body", FieldKind::Text))
                    .field_def(FieldDef::new("task_id", FieldKind::Integer)),
            )
            .register(
                ResourceModel::new("Project", "projects", "project")
                    .field_def(FieldDef::new("title", FieldKind::Text))
                    .field_def(FieldDef::new("user_id", FieldKind::Integer)),
            )
            .build()
            .unwrap()
    }

    fn resolve(criteria: &[(&str, &str)]) -> ApiResult<Vec<AssociationInclude>> {
        let registry = registry();
        let user = registry.resolve("User").unwrap().clone();
        AssociationResolver::new(&registry).resolve(&user, &Criteria::from_iter(criteria.iter().copied()))
    }

    #[test]
    fn test_plain_expand() {
        let includes = resolve(&[("expand", "tasks")]).unwrap();
        assert_eq!(includes.len(), 1);
        assert_eq!(includes[0].alias, "tasks");
        assert_eq!(includes[0].model, "Task");
        assert_eq!(includes[0].attributes, None);
        assert_eq!(includes[0].where_clause, None);
        assert!(includes[0].children.is_empty());
    }

    #[test]
    fn test_expand_sub_field_is_projection() {
        let includes = resolve(&[("expand", "tasks.name")]).unwrap();
        assert_eq!(includes[0].attributes, Some(vec!["name".to_string()]));
        assert_eq!(includes[0].where_clause, None);
    }

    #[test]
    fn test_dotted_filter_becomes_where() {
        let includes = resolve(&[("tasks.name", "groceries")]).unwrap();
        let node = &includes[0];
        assert_eq!(node.where_clause.as_ref().unwrap()["name"], "groceries");
        assert_eq!(node.required, Some(false));
        assert_eq!(node.attributes, None);
    }

    #[test]
    fn test_nested_paths_share_prefix() {
        let includes = resolve(&[("expand", "tasks.notes,tasks.user,projects")]).unwrap();
        assert_eq!(includes.len(), 2);
        let tasks = &includes[0];
        assert_eq!(tasks.alias, "tasks");
        let children: Vec<&str> = tasks.children.iter().map(|c| c.alias.as_str()).collect();
        assert_eq!(children, vec!["notes", "user"]);
        assert_eq!(includes[1].alias, "projects");
    }

    #[test]
    fn test_nested_filter_lands_on_innermost_node() {
        let includes = resolve(&[("tasks.notes.body", "urgent")]).unwrap();
        let tasks = &includes[0];
        assert_eq!(tasks.where_clause, None);
        let notes = &tasks.children[0];
        assert_eq!(notes.where_clause.as_ref().unwrap()["body"], "urgent");
        assert_eq!(notes.required, Some(false));
    }

    #[test]
    fn test_expand_and_filter_are_combined() {
        let includes =
            resolve(&[("expand", "tasks.name"), ("tasks.endDate", "2024-01-01")]).unwrap();
        assert_eq!(includes.len(), 1);
        let tasks = &includes[0];
        assert_eq!(tasks.attributes, Some(vec!["name".to_string()]));
        assert_eq!(tasks.where_clause.as_ref().unwrap()["endDate"], "2024-01-01");
    }

    #[test]
    fn test_whole_expansion_overrides_sub_field_projection() {
        for expand in ["tasks,tasks.name", "tasks.name,tasks"] {
            let includes = resolve(&[("expand", expand)]).unwrap();
            assert_eq!(includes.len(), 1);
            assert_eq!(includes[0].attributes, None, "expand={}", expand);
        }

        let includes = resolve(&[("expand", "tasks.user,tasks.name")]).unwrap();
        assert_eq!(includes[0].attributes, Some(vec!["name".to_string()]));
        assert_eq!(includes[0].children.len(), 1);
    }

    #[test]
    fn test_sub_resource_filter_values_are_kind_checked() {
        match resolve(&[("tasks.user_id", "abc")]) {
            Err(ApiError::Parsing { field, value, message }) => {
                assert_eq!(field, "tasks.user_id");
                assert_eq!(value, "abc");
                assert_eq!(message, "tasks.user_id must be a valid integer value");
            }
            other => panic!("expected parsing error, got {:?}", other),
        }
        assert!(matches!(
            resolve(&[("tasks.endDate", "next week")]),
            Err(ApiError::Parsing { .. })
        ));
        assert!(resolve(&[("tasks.endDate", "2024-01-01")]).is_ok());
    }

    #[test]
    fn test_unknown_associations_are_batched() {
        let err = resolve(&[("expand", "tasks,colours,tasks.flavour"), ("pets.name", "x")])
            .unwrap_err();
        match err {
            ApiError::Field { field, value, message } => {
                assert_eq!(field, "expand");
                assert_eq!(value, "colours, tasks.flavour, pets.name");
                assert!(message.starts_with("Resource has no association(s)"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_paths_are_merged() {
        let includes = resolve(&[("expand", "tasks,tasks")]).unwrap();
        assert_eq!(includes.len(), 1);
    }

    #[test]
    fn test_range_prefixed_keys_are_not_collected() {
        let criteria = Criteria::from_iter([("gte-tasks.endDate", "2024-01-01")]);
        assert!(AssociationResolver::collect_paths(&criteria).is_empty());
    }
}
