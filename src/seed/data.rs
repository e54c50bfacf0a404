use anyhow::Result;
use serde_json::json;

use crate::logic::ResourceService;
use crate::model::{FieldDef, FieldKind, Filter, ModelRegistry, QuerySpec, ResourceModel};
use crate::store::ResourceStore;

const DEMO_EMAIL: &str = "ada@example.com";

/// The application's model catalogue.
pub fn build_registry() -> Result<ModelRegistry> {
    let user = ResourceModel::new("User", "users", "users")
        .field_def(FieldDef::new("email", FieldKind::Text).required().unique())
        .field_def(FieldDef::new("name", FieldKind::Text).required())
        .field_def(FieldDef::new("level", FieldKind::Integer).required())
        .has_many("tasks", "Task", "user_id")
        .with_timestamps();

    let task = ResourceModel::new("Task", "tasks", "tasks")
        .field_def(FieldDef::new("name", FieldKind::Text).required().max_length(200))
        .field_def(FieldDef::new("endDate", FieldKind::Timestamp).required())
        .field_def(FieldDef::new("description", FieldKind::Text).required())
        .field_def(FieldDef::new("user_id", FieldKind::Integer).required())
        .belongs_to("user", "User", "user_id")
        .with_timestamps()
        .owned_by("user_id");

    ModelRegistry::builder().register(user).register(task).build()
}

/// Insert a demo user with a few tasks, unless it is already there.
pub async fn load_seed_data<S: ResourceStore>(store: &S, registry: &ModelRegistry) -> Result<()> {
    let users = registry
        .resolve("User")
        .ok_or_else(|| anyhow::anyhow!("User model is not registered"))?;

    let existing = QuerySpec {
        filters: vec![Filter::eq("email", DEMO_EMAIL)],
        ..QuerySpec::default()
    };
    if store.count(users, &existing).await? > 0 {
        log::info!("Seed data already present, skipping");
        return Ok(());
    }

    let payload = json!({
        "email": DEMO_EMAIL,
        "name": "Ada",
        "level": 3,
        "tasks": [
            {
                "name": "Write the quarterly report",
                "endDate": "2024-03-29T17:00:00.000Z",
                "description": "Numbers from finance are in the shared folder"
            },
            {
                "name": "Book the team offsite",
                "endDate": "2024-04-12T09:00:00.000Z",
                "description": "Somewhere reachable by train"
            },
            {
                "name": "Review pull requests",
                "endDate": "2024-04-02T12:00:00.000Z",
                "description": "Pagination and search changes"
            }
        ]
    });

    ResourceService::new(registry, store, users, 25)
        .create(payload)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AssociationKind;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    #[test]
    fn test_registry_catalogue() {
        let registry = build_registry().unwrap();

        let user = registry.resolve_plural("users").unwrap();
        assert!(user.field("email").unwrap().unique);
        assert_eq!(user.association("tasks").unwrap().kind, AssociationKind::Owned);

        let task = registry.resolve("Task").unwrap();
        assert_eq!(task.field("name").unwrap().max_length, Some(200));
        assert_eq!(task.association("user").unwrap().kind, AssociationKind::Owning);
        assert_eq!(task.owner_field.as_deref(), Some("user_id"));
        assert!(task.has_field("createdAt"));
    }

    #[tokio::test]
    async fn test_seed_is_loaded_once() {
        let registry = Arc::new(build_registry().unwrap());
        let store = MemoryStore::new(registry.clone());

        load_seed_data(&store, &registry).await.unwrap();
        load_seed_data(&store, &registry).await.unwrap();

        let tasks = registry.resolve("Task").unwrap();
        let count = store.count(tasks, &QuerySpec::default()).await.unwrap();
        assert_eq!(count, 3);
    }
}
