use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::Arc;

use crate::model::{AssociationKind, ResourceModel};

/// Read-only catalogue of every resource model, built once at startup.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: Vec<Arc<ResourceModel>>,
    by_name: HashMap<String, usize>,
    by_plural: HashMap<String, usize>,
}

impl ModelRegistry {
    pub fn builder() -> ModelRegistryBuilder {
        ModelRegistryBuilder::default()
    }

    /// Find a model by its declared name (e.g. "Task")
    pub fn resolve(&self, name: &str) -> Option<&Arc<ResourceModel>> {
        self.by_name.get(name).map(|idx| &self.models[*idx])
    }

    /// Find a model by the plural name used in URLs (e.g. "tasks")
    pub fn resolve_plural(&self, plural_name: &str) -> Option<&Arc<ResourceModel>> {
        self.by_plural.get(plural_name).map(|idx| &self.models[*idx])
    }

    pub fn models(&self) -> impl Iterator<Item = &Arc<ResourceModel>> {
        self.models.iter()
    }

    /// Target model of an association declared on `model`.
    pub fn association_target(
        &self,
        model: &ResourceModel,
        association: &str,
    ) -> Option<&Arc<ResourceModel>> {
        model
            .association(association)
            .and_then(|assoc| self.resolve(&assoc.target))
    }

    /// Walk a dotted path (`tasks.user.email`) through the association graph.
    ///
    /// A segment naming an association descends into its target; a segment naming a
    /// field of the current target is only accepted as the last segment.
    pub fn has_association_path(&self, model: &ResourceModel, path: &str) -> bool {
        if !path.contains('.') {
            return model.has_association(path);
        }

        let segments: Vec<&str> = path.split('.').collect();
        let mut current = model;
        for (idx, segment) in segments.iter().enumerate() {
            if let Some(target) = self.association_target(current, segment) {
                current = target;
            } else if current.has_field(segment) && idx == segments.len() - 1 && idx > 0 {
                return true;
            } else {
                return false;
            }
        }
        true
    }

    pub fn has_field_or_association(&self, model: &ResourceModel, name: &str) -> bool {
        model.has_field(name) || self.has_association_path(model, name)
    }
}

#[derive(Debug, Default)]
pub struct ModelRegistryBuilder {
    models: Vec<ResourceModel>,
}

impl ModelRegistryBuilder {
    pub fn register(mut self, model: ResourceModel) -> Self {
        self.models.push(model);
        self
    }

    /// Validate the declarations and freeze them into a registry.
    pub fn build(self) -> Result<ModelRegistry> {
        let mut registry = ModelRegistry::default();

        for (idx, model) in self.models.into_iter().enumerate() {
            if registry.by_name.insert(model.name.clone(), idx).is_some() {
                return Err(anyhow!("Model '{}' registered twice", model.name));
            }
            if registry
                .by_plural
                .insert(model.plural_name.clone(), idx)
                .is_some()
            {
                return Err(anyhow!(
                    "Plural name '{}' is used by more than one model",
                    model.plural_name
                ));
            }
            registry.models.push(Arc::new(model));
        }

        for model in &registry.models {
            for assoc in model.associations() {
                if model.has_field(&assoc.name) {
                    return Err(anyhow!(
                        "Model '{}' declares '{}' both as field and association",
                        model.name,
                        assoc.name
                    ));
                }
                let target = registry.resolve(&assoc.target).ok_or_else(|| {
                    anyhow!(
                        "Association '{}.{}' targets unknown model '{}'",
                        model.name,
                        assoc.name,
                        assoc.target
                    )
                })?;
                let key_holder = match assoc.kind {
                    AssociationKind::Owning => model,
                    AssociationKind::Owned => target,
                };
                if !key_holder.has_field(&assoc.foreign_key) {
                    return Err(anyhow!(
                        "Foreign key '{}' of association '{}.{}' is not a field of '{}'",
                        assoc.foreign_key,
                        model.name,
                        assoc.name,
                        key_holder.name
                    ));
                }
            }
            if let Some(owner) = &model.owner_field {
                if !model.has_field(owner) {
                    return Err(anyhow!(
                        "Owner field '{}' is not a field of '{}'",
                        owner,
                        model.name
                    ));
                }
            }
        }

        Ok(registry)
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
                    .has_many("tasks", "Task", "user_id"),
            )
            .register(
                ResourceModel::new("Task", "tasks", "task")
                    .field_def(FieldDef::new("name", FieldKind::Text))
                    .field_def(FieldDef::new("user_id", FieldKind::Integer))
                    .belongs_to("user", "User", "user_id"),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_resolve_by_name_and_plural() {
        let registry = registry();
        assert_eq!(registry.resolve("Task").unwrap().table, "task");
        assert_eq!(registry.resolve_plural("users").unwrap().name, "User");
        assert!(registry.resolve("Project").is_none());
    }

    #[test]
    fn test_association_paths() {
        let registry = registry();
        let user = registry.resolve("User").unwrap();

        assert!(registry.has_association_path(user, "tasks"));
        assert!(registry.has_association_path(user, "tasks.name"));
        assert!(registry.has_association_path(user, "tasks.user.email"));
        assert!(!registry.has_association_path(user, "tasks.colour"));
        assert!(!registry.has_association_path(user, "tasks.name.user"));
        assert!(!registry.has_association_path(user, "email"));
        assert!(!registry.has_association_path(user, "email.x"));
        assert!(registry.has_field_or_association(user, "email"));
    }

    #[test]
    fn test_build_rejects_unknown_target() {
        let result = ModelRegistry::builder()
            .register(ResourceModel::new("User", "users", "user").has_many("tasks", "Task", "user_id"))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_build_rejects_missing_foreign_key() {
        let result = ModelRegistry::builder()
            .register(ResourceModel::new("User", "users", "user").has_many("tasks", "Task", "owner"))
            .register(ResourceModel::new("Task", "tasks", "task"))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_build_rejects_field_association_clash() {
        let result = ModelRegistry::builder()
            .register(
                ResourceModel::new("Task", "tasks", "task")
                    .field_def(FieldDef::new("user", FieldKind::Integer))
                    .belongs_to("user", "Task", "user"),
            )
            .build();
        assert!(result.is_err());
    }
}
