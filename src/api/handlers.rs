use std::sync::Arc;

use axum::extract::{Json, Query, State};
use axum::http::StatusCode;
use serde_json::{json, Map, Value};

use crate::api::error::ApiError;
use crate::api::session::with_session;
use crate::config::AppConfig;
use crate::logic::{from_storage, from_storage_many, integration_names, to_storage, Resolver};
use crate::model::ModelSpec;
use crate::notify::Notify;
use crate::store::{Filters, Store};

/// Shared application state: the persistence collaborator, the integration
/// resolver, and the announcement sink.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: AppConfig,
    pub resolver: Resolver,
    pub notifier: Arc<dyn Notify>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        config: AppConfig,
        notifier: Arc<dyn Notify>,
    ) -> anyhow::Result<Self> {
        let resolver = Resolver::from_config(&config)?;
        Ok(AppState {
            store,
            config,
            resolver,
            notifier,
        })
    }

    fn notify(&self, model: &ModelSpec, action: &str, id: i64) {
        self.notifier.publish(
            &self.config.app.channel,
            json!({"kind": model.singular, "action": action, "id": id}),
        );
    }
}

pub async fn health() -> Json<Value> {
    Json(json!({"message": "OK"}))
}

/// Lists the members of this service's group as the registry reports them.
pub async fn group(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let members: Value = state
        .resolver
        .client()
        .get(state.config.member_url())
        .send()
        .await
        .map_err(upstream)?
        .error_for_status()
        .map_err(upstream)?
        .json()
        .await
        .map_err(upstream)?;

    Ok(Json(json!({"group": members})))
}

/// OPTIONS on the collection: the model's effective schema as wire dicts.
/// A submitted payload is validated in place; `errors` appears only when a
/// payload was submitted and failed.
pub async fn describe_collection(
    state: Arc<AppState>,
    model: Arc<ModelSpec>,
    body: Option<Value>,
) -> Result<Json<Value>, ApiError> {
    let integrations = state.resolver.integrations(&model.singular).await;
    let values = submitted(&model, body.as_ref());

    let mut fields = model.field_set(false, &integrations, values, None)?;

    let mut response = Map::new();
    if values.is_some() && !fields.validate() {
        response.insert("errors".to_string(), json!(fields.errors));
    }
    response.insert("fields".to_string(), Value::Array(fields.to_list()?));

    Ok(Json(Value::Object(response)))
}

/// OPTIONS on one record: the schema with identity, filled from the stored
/// record. Submitted values override the originals and are validated.
pub async fn describe_item(
    state: Arc<AppState>,
    model: Arc<ModelSpec>,
    id: i64,
    body: Option<Value>,
) -> Result<Json<Value>, ApiError> {
    let integrations = state.resolver.integrations(&model.singular).await;
    let names = integration_names(&integrations);

    let record = {
        let model = model.clone();
        with_session(state.store.as_ref(), move |session| {
            Box::pin(async move { Ok(session.get(&model, id).await?) })
        })
        .await?
    }
    .ok_or_else(|| ApiError::not_found(model.singular.clone()))?;

    let originals = from_storage(&names, &record)?;
    let values = submitted(&model, body.as_ref());

    let mut fields = model.field_set(true, &integrations, values, Some(&originals))?;

    let mut response = Map::new();
    if values.is_some() && !fields.validate() {
        response.insert("errors".to_string(), json!(fields.errors));
    }
    response.insert("fields".to_string(), Value::Array(fields.to_list()?));

    Ok(Json(Value::Object(response)))
}

pub async fn create(
    state: Arc<AppState>,
    model: Arc<ModelSpec>,
    body: Value,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let payload = required_payload(&model, &body)?;
    let integrations = state.resolver.integrations(&model.singular).await;
    let names = integration_names(&integrations);
    let values = to_storage(&names, payload)?;

    let record = {
        let model = model.clone();
        with_session(state.store.as_ref(), move |session| {
            Box::pin(async move { Ok(session.insert(&model, values).await?) })
        })
        .await?
    };

    state.notify(&model, "created", record.id);

    let flat = from_storage(&names, &record)?;
    Ok((
        StatusCode::CREATED,
        Json(wrap(&model.singular, Value::Object(flat))),
    ))
}

/// GET on the collection: every record matching the query-parameter filters
/// exactly, in the model's declared order.
pub async fn list(
    state: Arc<AppState>,
    model: Arc<ModelSpec>,
    Query(filters): Query<Filters>,
) -> Result<Json<Value>, ApiError> {
    let integrations = state.resolver.integrations(&model.singular).await;
    let names = integration_names(&integrations);

    let records = {
        let model = model.clone();
        with_session(state.store.as_ref(), move |session| {
            Box::pin(async move { Ok(session.select(&model, &filters).await?) })
        })
        .await?
    };

    let flats = from_storage_many(&names, &records)?;
    Ok(Json(wrap(
        &model.plural,
        Value::Array(flats.into_iter().map(Value::Object).collect()),
    )))
}

pub async fn retrieve(
    state: Arc<AppState>,
    model: Arc<ModelSpec>,
    id: i64,
) -> Result<Json<Value>, ApiError> {
    let integrations = state.resolver.integrations(&model.singular).await;
    let names = integration_names(&integrations);

    let record = {
        let model = model.clone();
        with_session(state.store.as_ref(), move |session| {
            Box::pin(async move { Ok(session.get(&model, id).await?) })
        })
        .await?
    }
    .ok_or_else(|| ApiError::not_found(model.singular.clone()))?;

    let flat = from_storage(&names, &record)?;
    Ok(Json(wrap(&model.singular, Value::Object(flat))))
}

/// PATCH on one record: partial update by identity. Zero rows touched is a
/// valid outcome, not an error.
pub async fn update(
    state: Arc<AppState>,
    model: Arc<ModelSpec>,
    id: i64,
    body: Value,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let payload = required_payload(&model, &body)?;
    let integrations = state.resolver.integrations(&model.singular).await;
    let names = integration_names(&integrations);
    let values = to_storage(&names, payload)?;

    let updated = {
        let model = model.clone();
        with_session(state.store.as_ref(), move |session| {
            Box::pin(async move { Ok(session.update(&model, id, values).await?) })
        })
        .await?
    };

    if updated > 0 {
        state.notify(&model, "updated", id);
    }

    Ok((StatusCode::ACCEPTED, Json(json!({"updated": updated}))))
}

pub async fn remove(
    state: Arc<AppState>,
    model: Arc<ModelSpec>,
    id: i64,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let deleted = {
        let model = model.clone();
        with_session(state.store.as_ref(), move |session| {
            Box::pin(async move { Ok(session.delete(&model, id).await?) })
        })
        .await?
    };

    if deleted > 0 {
        state.notify(&model, "deleted", id);
    }

    Ok((StatusCode::ACCEPTED, Json(json!({"deleted": deleted}))))
}

/// The model-named payload from a request body, when both are present.
fn submitted<'a>(model: &ModelSpec, body: Option<&'a Value>) -> Option<&'a Map<String, Value>> {
    body?.get(&model.singular)?.as_object()
}

fn required_payload<'a>(
    model: &ModelSpec,
    body: &'a Value,
) -> Result<&'a Map<String, Value>, ApiError> {
    submitted(model, Some(body))
        .ok_or_else(|| ApiError::Internal(format!("request body needs a {} mapping", model.singular)))
}

fn wrap(key: &str, value: Value) -> Value {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    Value::Object(map)
}

fn upstream(err: reqwest::Error) -> ApiError {
    ApiError::Internal(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Field;
    use serde_json::json;

    fn unittest_spec() -> ModelSpec {
        ModelSpec::new("unittest", "unittests").field(Field::named("name"))
    }

    #[test]
    fn test_submitted_requires_model_key() {
        let spec = unittest_spec();

        let body = json!({"unittest": {"name": "unit"}});
        assert_eq!(
            submitted(&spec, Some(&body)).unwrap(),
            json!({"name": "unit"}).as_object().unwrap()
        );

        let body = json!({"other": {"name": "unit"}});
        assert!(submitted(&spec, Some(&body)).is_none());
        assert!(submitted(&spec, None).is_none());
        assert!(required_payload(&spec, &body).is_err());
    }

    #[test]
    fn test_wrap() {
        assert_eq!(wrap("unittest", json!({"id": 1})), json!({"unittest": {"id": 1}}));
    }
}
