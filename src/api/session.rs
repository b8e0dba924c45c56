use std::future::Future;
use std::pin::Pin;

use crate::api::error::ApiError;
use crate::store::{Session, Store};

pub type SessionFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ApiError>> + Send + 'a>>;

/// Runs one request's work inside a store session.
///
/// The session is acquired once, handed to the closure, and settled exactly
/// once: commit when the closure succeeds, rollback when it fails. A failed
/// rollback is logged and the original error kept.
pub async fn with_session<T, F>(store: &dyn Store, op: F) -> Result<T, ApiError>
where
    F: for<'a> FnOnce(&'a mut dyn Session) -> SessionFuture<'a, T>,
{
    let mut session = store.session().await?;

    let result = op(session.as_mut()).await;
    match result {
        Ok(value) => {
            session.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = session.rollback().await {
                log::error!("rollback failed: {rollback_err}");
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Field, ModelSpec, RecordValues};
    use crate::store::{Filters, MemoryStore};
    use serde_json::json;

    fn unittest_spec() -> ModelSpec {
        ModelSpec::new("unittest", "unittests").field(Field::named("name"))
    }

    #[tokio::test]
    async fn test_commit_on_success() {
        let store = MemoryStore::new();
        let spec = unittest_spec();

        let id = with_session(&store, |session| {
            let spec = spec.clone();
            Box::pin(async move {
                let record = session
                    .insert(
                        &spec,
                        RecordValues {
                            columns: [("name".to_string(), json!("unit"))].into_iter().collect(),
                            data: None,
                        },
                    )
                    .await?;
                Ok(record.id)
            })
        })
        .await
        .unwrap();

        let found = with_session(&store, |session| {
            let spec = spec.clone();
            Box::pin(async move { Ok(session.get(&spec, id).await?) })
        })
        .await
        .unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn test_rollback_on_failure() {
        let store = MemoryStore::new();
        let spec = unittest_spec();

        let result: Result<(), ApiError> = with_session(&store, |session| {
            let spec = spec.clone();
            Box::pin(async move {
                session
                    .insert(
                        &spec,
                        RecordValues {
                            columns: [("name".to_string(), json!("unit"))].into_iter().collect(),
                            data: None,
                        },
                    )
                    .await?;
                Err(ApiError::Internal("nope".to_string()))
            })
        })
        .await;
        assert!(result.is_err());

        let all = with_session(&store, |session| {
            let spec = spec.clone();
            Box::pin(async move { Ok(session.select(&spec, &Filters::new()).await?) })
        })
        .await
        .unwrap();
        assert!(all.is_empty());
    }
}
