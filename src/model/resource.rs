use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type FieldName = String;
pub type AssocName = String;

/// Plain data of one resource row, keyed by field name.
pub type Record = serde_json::Map<String, Value>;

pub const ID_FIELD: &str = "id";
pub const CREATED_AT_FIELD: &str = "createdAt";
pub const UPDATED_AT_FIELD: &str = "updatedAt";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Integer,
    Float,
    Text,
    Boolean,
    Timestamp,
}

impl FieldKind {
    /// SQL type used when binding a string parameter against a column of this kind.
    pub fn sql_type(&self) -> &'static str {
        match self {
            FieldKind::Integer => "bigint",
            FieldKind::Float => "double precision",
            FieldKind::Text => "text",
            FieldKind::Boolean => "boolean",
            FieldKind::Timestamp => "timestamptz",
        }
    }

    /// Convert a raw query-string value into the JSON value a row of this kind would hold.
    /// Returns `None` when the text does not fit the kind.
    pub fn coerce(&self, raw: &str) -> Option<Value> {
        match self {
            FieldKind::Integer => raw.trim().parse::<i64>().ok().map(Value::from),
            FieldKind::Float => raw
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number),
            FieldKind::Boolean => match raw.trim() {
                "true" | "1" => Some(Value::Bool(true)),
                "false" | "0" => Some(Value::Bool(false)),
                _ => None,
            },
            FieldKind::Timestamp => {
                is_timestamp(raw.trim()).then(|| Value::String(raw.trim().to_string()))
            }
            FieldKind::Text => Some(Value::String(raw.to_string())),
        }
    }

    /// Check whether a JSON payload value can be stored in a column of this kind.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (FieldKind::Integer, Value::Number(n)) => n.is_i64() || n.is_u64(),
            (FieldKind::Integer, Value::String(s)) => s.trim().parse::<i64>().is_ok(),
            (FieldKind::Float, Value::Number(_)) => true,
            (FieldKind::Float, Value::String(s)) => s.trim().parse::<f64>().is_ok(),
            (FieldKind::Boolean, Value::Bool(_)) => true,
            (FieldKind::Text, Value::String(_)) => true,
            (FieldKind::Timestamp, Value::String(s)) => is_timestamp(s),
            _ => false,
        }
    }
}

/// RFC 3339 date-times and plain `YYYY-MM-DD` dates.
fn is_timestamp(raw: &str) -> bool {
    chrono::DateTime::parse_from_rfc3339(raw).is_ok()
        || chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d").is_ok()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: FieldName,
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
}

impl FieldDef {
    pub fn new(name: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: false,
            unique: false,
            max_length: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn max_length(mut self, len: usize) -> Self {
        self.max_length = Some(len);
        self
    }
}

/// Which side of a relation holds the foreign key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssociationKind {
    /// The current model holds the foreign key (belongs-to).
    Owning,
    /// The target model holds the foreign key back to the current model (has-many).
    Owned,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssociationDescriptor {
    pub name: AssocName,
    /// Name of the target model; resolved through the `ModelRegistry`.
    pub target: String,
    pub kind: AssociationKind,
    pub foreign_key: FieldName,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceModel {
    pub name: String,
    pub plural_name: String,
    pub table: String,
    pub fields: Vec<FieldDef>,
    pub associations: Vec<AssociationDescriptor>,
    #[serde(default)]
    pub timestamps: bool,
    /// Field forced to the calling user's id by the HTTP layer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_field: Option<FieldName>,
}

impl ResourceModel {
    /// Start a model declaration. The `id` primary key is always present.
    pub fn new(name: &str, plural_name: &str, table: &str) -> Self {
        Self {
            name: name.to_string(),
            plural_name: plural_name.to_string(),
            table: table.to_string(),
            fields: vec![FieldDef::new(ID_FIELD, FieldKind::Integer)],
            associations: Vec::new(),
            timestamps: false,
            owner_field: None,
        }
    }

    pub fn field_def(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_timestamps(mut self) -> Self {
        self.timestamps = true;
        self.fields
            .push(FieldDef::new(CREATED_AT_FIELD, FieldKind::Timestamp));
        self.fields
            .push(FieldDef::new(UPDATED_AT_FIELD, FieldKind::Timestamp));
        self
    }

    pub fn owned_by(mut self, field: &str) -> Self {
        self.owner_field = Some(field.to_string());
        self
    }

    pub fn has_many(mut self, name: &str, target: &str, foreign_key: &str) -> Self {
        self.associations.push(AssociationDescriptor {
            name: name.to_string(),
            target: target.to_string(),
            kind: AssociationKind::Owned,
            foreign_key: foreign_key.to_string(),
        });
        self
    }

    pub fn belongs_to(mut self, name: &str, target: &str, foreign_key: &str) -> Self {
        self.associations.push(AssociationDescriptor {
            name: name.to_string(),
            target: target.to_string(),
            kind: AssociationKind::Owning,
            foreign_key: foreign_key.to_string(),
        });
        self
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn field_names(&self) -> Vec<FieldName> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn associations(&self) -> &[AssociationDescriptor] {
        &self.associations
    }

    pub fn association(&self, name: &str) -> Option<&AssociationDescriptor> {
        self.associations.iter().find(|a| a.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Single-segment association check; dotted paths go through
    /// `ModelRegistry::has_association_path` since they cross models.
    pub fn has_association(&self, name: &str) -> bool {
        self.association(name).is_some()
    }

    pub fn has_associations(&self) -> bool {
        !self.associations.is_empty()
    }

    /// Fields that the server manages itself and never takes from a payload.
    pub fn is_managed_field(&self, name: &str) -> bool {
        name == ID_FIELD
            || (self.timestamps && (name == CREATED_AT_FIELD || name == UPDATED_AT_FIELD))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_declaration() {
        let model = ResourceModel::new("Task", "tasks", "task")
            .field_def(FieldDef::new("name", FieldKind::Text).required().max_length(200))
            .with_timestamps()
            .belongs_to("user", "User", "user_id");

        assert_eq!(
            model.field_names(),
            vec!["id", "name", "createdAt", "updatedAt"]
        );
        assert!(model.has_field("id"));
        assert!(!model.has_field("user"));
        assert_eq!(model.association("user").unwrap().kind, AssociationKind::Owning);
        assert!(model.is_managed_field("createdAt"));
        assert!(!model.is_managed_field("name"));
    }

    #[test]
    fn test_kind_coercion() {
        assert_eq!(FieldKind::Integer.coerce("42"), Some(Value::from(42)));
        assert_eq!(FieldKind::Integer.coerce("4x"), None);
        assert_eq!(FieldKind::Boolean.coerce("1"), Some(Value::Bool(true)));
        assert_eq!(
            FieldKind::Text.coerce("abc"),
            Some(Value::String("abc".to_string()))
        );
    }

    #[test]
    fn test_kind_accepts_payload_values() {
        assert!(FieldKind::Timestamp.accepts(&serde_json::json!("2024-01-01")));
        assert!(FieldKind::Timestamp.accepts(&serde_json::json!("2024-01-01T10:00:00Z")));
        assert!(!FieldKind::Timestamp.accepts(&serde_json::json!("yesterday")));
        assert_eq!(
            FieldKind::Timestamp.coerce("2024-01-01"),
            Some(Value::String("2024-01-01".to_string()))
        );
        assert!(FieldKind::Timestamp.coerce("2024-01-01T10:00:00.000Z").is_some());
        assert_eq!(FieldKind::Timestamp.coerce("yesterday"), None);
        assert!(FieldKind::Integer.accepts(&serde_json::json!(3)));
        assert!(!FieldKind::Integer.accepts(&serde_json::json!(3.5)));
        assert!(!FieldKind::Text.accepts(&serde_json::json!(3)));
    }
}
