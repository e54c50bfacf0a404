use axum::{
    async_trait,
    extract::{FromRequestParts, OriginalUri, Query},
    http::{request::Parts, HeaderMap},
};
use itertools::Itertools;
use serde_json::Value;
use std::convert::Infallible;

use crate::error::{ApiError, EMPTY_VALUE};
use crate::logic::{Defaults, RequestContext};
use crate::model::{Criteria, ResourceModel};

/// Builds the response context from the request line and headers.
///
/// When the router is nested under an API prefix, the prefix (minus its version segment)
/// becomes part of `base_url`, so resource links point at the same routes as `href`.
#[async_trait]
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Query(criteria) = Query::<Criteria>::try_from_uri(&parts.uri).map_err(|rejection| {
            ApiError::parsing(
                rejection.body_text(),
                "query",
                parts.uri.query().unwrap_or(EMPTY_VALUE),
            )
        })?;

        let original = parts
            .extensions
            .get::<OriginalUri>()
            .map(|uri| uri.0.clone())
            .unwrap_or_else(|| parts.uri.clone());

        let origin = origin(&parts.headers);
        let prefix = original
            .path()
            .strip_suffix(parts.uri.path())
            .unwrap_or_default();

        let base_url = format!("{}{}", origin, strip_version(prefix));
        let mut full_url = format!("{}{}", origin, strip_version(original.path()));
        if let Some(query) = original.query() {
            full_url.push('?');
            full_url.push_str(query);
        }

        Ok(RequestContext::new(base_url, full_url, criteria))
    }
}

/// Identity of the caller, taken from the `X-User-Id` header.
///
/// Authentication happens upstream; this only scopes owned resources to the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallerContext {
    pub user_id: Option<String>,
}

impl CallerContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
        }
    }

    /// The owner field of `model` paired with the caller's id, when both exist.
    pub fn owner_of<'m>(&self, model: &'m ResourceModel) -> Option<(&'m str, &str)> {
        let field = model.owner_field.as_deref()?;
        let user_id = self.user_id.as_deref()?;
        Some((field, user_id))
    }

    pub fn defaults_for(&self, model: &ResourceModel) -> Defaults {
        self.owner_of(model)
            .map(|(field, user_id)| (field.to_string(), user_id.to_string()))
            .into_iter()
            .collect()
    }

    pub fn scope_criteria(&self, model: &ResourceModel, criteria: &mut Criteria) {
        if let Some((field, user_id)) = self.owner_of(model) {
            criteria.insert(field, user_id);
        }
    }

    /// Force the owner field of a JSON object payload to the caller's id.
    pub fn scope_payload(&self, model: &ResourceModel, payload: &mut Value) {
        let Some((field, user_id)) = self.owner_of(model) else {
            return;
        };
        let Value::Object(object) = payload else {
            return;
        };
        let value = model
            .field(field)
            .and_then(|def| def.kind.coerce(user_id))
            .unwrap_or_else(|| Value::String(user_id.to_string()));
        object.insert(field.to_string(), value);
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CallerContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self {
            user_id: extract_header_value(&parts.headers, "x-user-id"),
        })
    }
}

fn origin(headers: &HeaderMap) -> String {
    match extract_header_value(headers, "x-forwarded-host") {
        Some(host) => {
            let proto = extract_header_value(headers, "x-forwarded-proto")
                .unwrap_or_else(|| "http".to_string());
            format!("{}://{}", proto, host)
        }
        None => {
            let host =
                extract_header_value(headers, "host").unwrap_or_else(|| "localhost".to_string());
            format!("http://{}", host)
        }
    }
}

/// Drop the first `v<digits>` path segment.
fn strip_version(path: &str) -> String {
    let mut stripped = false;
    path.split('/')
        .filter(|segment| {
            if !stripped && is_version_segment(segment) {
                stripped = true;
                false
            } else {
                true
            }
        })
        .join("/")
}

fn is_version_segment(segment: &str) -> bool {
    segment
        .strip_prefix('v')
        .map(|digits| !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(false)
}

fn extract_header_value(headers: &HeaderMap, header_name: &str) -> Option<String> {
    headers
        .get(header_name)
        .and_then(|value| value.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FieldDef, FieldKind};
    use axum::http::{Request, Uri};
    use serde_json::json;

    fn parts(uri: &str, headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_strip_version() {
        assert_eq!(strip_version("/api/v1/tasks/4"), "/api/tasks/4");
        assert_eq!(strip_version("/v2/users"), "/users");
        assert_eq!(strip_version("/api/tasks"), "/api/tasks");
        assert_eq!(strip_version("/api/v1/videos/v2"), "/api/videos/v2");
        assert_eq!(strip_version("/api/version/v"), "/api/version/v");
    }

    #[tokio::test]
    async fn test_request_context_uses_forwarded_headers() {
        let mut parts = parts(
            "/tasks?offset=0&limit=2",
            &[
                ("host", "internal:3001"),
                ("x-forwarded-host", "api.example.com"),
                ("x-forwarded-proto", "https"),
            ],
        );
        parts.extensions.insert(OriginalUri(Uri::from_static(
            "/api/v1/tasks?offset=0&limit=2",
        )));

        let context = RequestContext::from_request_parts(&mut parts, &()).await.unwrap();

        assert_eq!(context.base_url, "https://api.example.com/api");
        assert_eq!(context.full_url, "https://api.example.com/api/tasks?offset=0&limit=2");
        assert_eq!(context.criteria.get("limit"), Some("2"));
        assert_eq!(context.criteria.len(), 2);
    }

    #[tokio::test]
    async fn test_request_context_falls_back_to_host() {
        let mut parts = parts("/v1/users/3", &[("host", "localhost:3001")]);

        let context = RequestContext::from_request_parts(&mut parts, &()).await.unwrap();

        assert_eq!(context.base_url, "http://localhost:3001");
        assert_eq!(context.full_url, "http://localhost:3001/users/3");
        assert!(context.criteria.is_empty());
    }

    #[tokio::test]
    async fn test_caller_context_extraction() {
        let mut with_user = parts("/tasks", &[("x-user-id", "7")]);
        let mut anonymous = parts("/tasks", &[]);

        let caller = CallerContext::from_request_parts(&mut with_user, &()).await.unwrap();
        assert_eq!(caller.user_id.as_deref(), Some("7"));

        let caller = CallerContext::from_request_parts(&mut anonymous, &()).await.unwrap();
        assert_eq!(caller, CallerContext::default());
    }

    #[test]
    fn test_caller_scopes_owned_models_only() {
        let task = ResourceModel::new("Task", "tasks", "task")
            .field_def(FieldDef::new("user_id", FieldKind::Integer))
            .owned_by("user_id");
        let user = ResourceModel::new("User", "users", "user");
        let caller = CallerContext::new("7");

        assert_eq!(caller.defaults_for(&task).get("user_id").map(String::as_str), Some("7"));
        assert!(caller.defaults_for(&user).is_empty());

        let mut payload = json!({"name": "milk", "user_id": 99});
        caller.scope_payload(&task, &mut payload);
        assert_eq!(payload["user_id"], json!(7));

        let mut criteria = Criteria::from_iter([("id", "3")]);
        caller.scope_criteria(&task, &mut criteria);
        assert_eq!(criteria.get("user_id"), Some("7"));

        let mut criteria = Criteria::new();
        CallerContext::default().scope_criteria(&task, &mut criteria);
        assert!(criteria.is_empty());
    }
}
