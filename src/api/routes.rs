use std::sync::Arc;

use axum::extract::{Json, Path, Query, State};
use axum::routing::{get, options};
use axum::Router;
use serde_json::Value;

use crate::api::handlers::{self, AppState};
use crate::model::ModelSpec;
use crate::store::Filters;

/// Builds the full application router: the service endpoints plus one
/// resource router per registered model.
pub fn create_router(models: Vec<ModelSpec>) -> Router<Arc<AppState>> {
    let mut router = Router::new()
        .route("/health", get(handlers::health))
        .route("/group", get(handlers::group));

    for model in models {
        router = router.merge(resource_router(model));
    }

    router
}

/// Routes for one model: the collection at `/<plural>` and single records
/// at `/<plural>/:id`, with OPTIONS describing the schema on both.
pub fn resource_router(model: ModelSpec) -> Router<Arc<AppState>> {
    let model = Arc::new(model);
    let collection_path = format!("/{}", model.plural);
    let item_path = format!("/{}/:id", model.plural);

    let collection = options({
        let model = model.clone();
        move |State(state): State<Arc<AppState>>, body: Option<Json<Value>>| {
            let model = model.clone();
            async move {
                handlers::describe_collection(state, model, body.map(|Json(body)| body)).await
            }
        }
    })
    .post({
        let model = model.clone();
        move |State(state): State<Arc<AppState>>, Json(body): Json<Value>| {
            let model = model.clone();
            async move { handlers::create(state, model, body).await }
        }
    })
    .get({
        let model = model.clone();
        move |State(state): State<Arc<AppState>>, filters: Query<Filters>| {
            let model = model.clone();
            async move { handlers::list(state, model, filters).await }
        }
    });

    let item = options({
        let model = model.clone();
        move |State(state): State<Arc<AppState>>,
              Path(id): Path<i64>,
              body: Option<Json<Value>>| {
            let model = model.clone();
            async move {
                handlers::describe_item(state, model, id, body.map(|Json(body)| body)).await
            }
        }
    })
    .get({
        let model = model.clone();
        move |State(state): State<Arc<AppState>>, Path(id): Path<i64>| {
            let model = model.clone();
            async move { handlers::retrieve(state, model, id).await }
        }
    })
    .patch({
        let model = model.clone();
        move |State(state): State<Arc<AppState>>, Path(id): Path<i64>, Json(body): Json<Value>| {
            let model = model.clone();
            async move { handlers::update(state, model, id, body).await }
        }
    })
    .delete({
        let model = model.clone();
        move |State(state): State<Arc<AppState>>, Path(id): Path<i64>| {
            let model = model.clone();
            async move { handlers::remove(state, model, id).await }
        }
    });

    Router::new()
        .route(&collection_path, collection)
        .route(&item_path, item)
}
