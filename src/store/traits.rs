use serde::Serialize;

use crate::error::ApiResult;
use crate::model::{AssociationDescriptor, Filter, QuerySpec, Record, ResourceModel};

/// One window of a collection together with the total number of matching rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Page {
    pub rows: Vec<Record>,
    pub count: u64,
    /// Resolved page size; `None` for unbounded reads.
    #[serde(skip)]
    pub limit: Option<u32>,
    #[serde(skip)]
    pub offset: Option<u32>,
    /// `rows` holds a single synthetic aggregate row rather than resources.
    #[serde(skip)]
    pub aggregated: bool,
}

impl Page {
    pub fn new(rows: Vec<Record>, count: u64) -> Self {
        Self {
            rows,
            count,
            ..Self::default()
        }
    }

    /// Attach the pagination window that produced this page.
    pub fn with_window(mut self, spec: &QuerySpec) -> Self {
        self.limit = spec.limit;
        self.offset = spec.offset;
        self.aggregated = spec.has_aggregates();
        self
    }
}

/// Datastore seam for every resource operation. Implementations validate payloads
/// against the model and raise typed errors (unique constraint, validation).
#[async_trait::async_trait]
pub trait ResourceStore: Send + Sync {
    /// Number of rows matching the filters, search and required inclusions of `spec`.
    async fn count(&self, model: &ResourceModel, spec: &QuerySpec) -> ApiResult<u64>;

    /// Matching rows (windowed, ordered, projected, with inclusions) plus the unwindowed count.
    async fn find_and_count_all(&self, model: &ResourceModel, spec: &QuerySpec) -> ApiResult<Page>;

    /// First row matching `spec`.
    async fn find_one(&self, model: &ResourceModel, spec: &QuerySpec) -> ApiResult<Option<Record>>;

    /// Validate and insert one row, returning it as stored (with `id` and timestamps).
    async fn insert(&self, model: &ResourceModel, payload: Record) -> ApiResult<Record>;

    /// Apply `payload` to every row matching the equality `conditions`; returns the affected row count.
    async fn update_where(
        &self,
        model: &ResourceModel,
        payload: Record,
        conditions: &[Filter],
    ) -> ApiResult<u64>;

    /// Delete every row matching the equality `conditions`; returns the deleted row count.
    async fn destroy_where(&self, model: &ResourceModel, conditions: &[Filter]) -> ApiResult<u64>;

    /// Replace the children of an owned association: previous children of `parent_id`
    /// are removed and `children` are inserted with their foreign key set.
    async fn replace_children(
        &self,
        association: &AssociationDescriptor,
        parent_id: i64,
        children: Vec<Record>,
    ) -> ApiResult<Vec<Record>>;
}
