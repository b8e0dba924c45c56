use std::collections::BTreeMap;

use thiserror::Error;

use crate::model::{ModelSpec, Record, RecordValues};

/// Exact-equality filters taken from query parameters.
pub type Filters = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection or transaction level failure. Handlers surface these with a
    /// fixed "session error" message and the detail attached as diagnostics.
    #[error("invalid session: {0}")]
    Session(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// One request's unit of work against the persistence collaborator.
///
/// A session is consumed by exactly one of `commit` or `rollback`; dropping
/// it without either behaves like a rollback.
#[async_trait::async_trait]
pub trait Session: Send {
    /// Records matching every filter exactly, in the model's declared order.
    async fn select(
        &mut self,
        model: &ModelSpec,
        filters: &Filters,
    ) -> Result<Vec<Record>, StoreError>;

    async fn get(&mut self, model: &ModelSpec, id: i64) -> Result<Option<Record>, StoreError>;

    async fn insert(
        &mut self,
        model: &ModelSpec,
        values: RecordValues,
    ) -> Result<Record, StoreError>;

    /// Partial update by identity; returns the number of rows touched.
    /// Zero means "no such id" and is not an error.
    async fn update(
        &mut self,
        model: &ModelSpec,
        id: i64,
        values: RecordValues,
    ) -> Result<u64, StoreError>;

    /// Delete by identity; zero rows is not an error.
    async fn delete(&mut self, model: &ModelSpec, id: i64) -> Result<u64, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

#[async_trait::async_trait]
pub trait Store: Send + Sync {
    async fn session(&self) -> Result<Box<dyn Session>, StoreError>;
}
