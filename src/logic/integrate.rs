use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::{Client, Method};
use serde_json::{Map, Value};

use crate::config::AppConfig;

/// Discovers integration descriptor files for a model and resolves their
/// `integrate` directives against live peers.
///
/// Descriptors are re-read and re-resolved on every call by design: stale
/// configuration is considered worse than the extra latency, so no cache
/// persists across requests.
#[derive(Debug, Clone)]
pub struct Resolver {
    client: Client,
    directory: PathBuf,
    registry: String,
}

impl Resolver {
    /// `registry` is the peer-registry base, e.g. `http://localhost:8083`.
    /// The timeout bounds every outbound call so one unreachable peer cannot
    /// stall a schema build.
    pub fn new(
        directory: impl Into<PathBuf>,
        registry: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build integration HTTP client")?;

        Ok(Resolver {
            client,
            directory: directory.into(),
            registry: registry.into(),
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Resolver::new(
            &config.integration.directory,
            config.registry_base(),
            config.integration.timeout(),
        )
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Discovers and fully resolves a model's integration descriptors.
    pub async fn integrations(&self, singular: &str) -> Vec<Map<String, Value>> {
        let mut descriptors = self.discover(singular);
        for descriptor in &mut descriptors {
            self.resolve(descriptor).await;
        }
        descriptors
    }

    /// Lists descriptor files matching `integration_*_<singular>.fields.yaml`
    /// under the configured directory, sorted by full path. The `*` segment
    /// becomes the descriptor's `name` unless the file content overrides it.
    /// A missing directory or zero matches yields an empty list.
    pub fn discover(&self, singular: &str) -> Vec<Map<String, Value>> {
        let pattern = self
            .directory
            .join(format!("integration_*_{singular}.fields.yaml"));

        let mut paths: Vec<PathBuf> = match glob::glob(&pattern.to_string_lossy()) {
            Ok(entries) => entries.flatten().collect(),
            Err(err) => {
                log::warn!("bad integration glob pattern: {err}");
                Vec::new()
            }
        };
        paths.sort();

        paths
            .iter()
            .map(|path| load_descriptor(path, singular))
            .collect()
    }

    /// Resolves one descriptor node in place, depth-first.
    ///
    /// A present `integrate` directive triggers one outbound call; the JSON
    /// object it returns is merged into the node, overwriting existing keys.
    /// Failures are captured on the failing node's `errors` list and never
    /// propagate to siblings. Nested `fields` entries (including ones the
    /// merge just introduced) are resolved recursively.
    pub fn resolve<'a>(
        &'a self,
        node: &'a mut Map<String, Value>,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            if let Some(directive) = node.get("integrate").cloned() {
                match self.derive(&directive).await {
                    Ok(merge) => {
                        for (key, value) in merge {
                            node.insert(key, value);
                        }
                    }
                    Err(err) => push_error(node, format!("failed to integrate: {err:#}")),
                }
            }

            if let Some(Value::Array(children)) = node.get_mut("fields") {
                for child in children {
                    if let Value::Object(child) = child {
                        self.resolve(child).await;
                    }
                }
            }
        })
    }

    /// Issues the capability-discovery call for one `integrate` directive:
    /// straight to `url` when given, otherwise to the registry's node lookup.
    async fn derive(&self, directive: &Value) -> Result<Map<String, Value>> {
        let request = if let Some(url) = directive.get("url").and_then(Value::as_str) {
            self.client.request(Method::OPTIONS, url)
        } else if let Some(node) = directive.get("node").and_then(Value::as_str) {
            self.client
                .request(Method::OPTIONS, format!("{}/node", self.registry))
                .query(&[("node", node)])
        } else {
            return Err(anyhow!("integrate directive needs a url or node"));
        };

        let body: Value = request
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("invalid integration response")?;

        match body {
            Value::Object(map) => Ok(map),
            other => Err(anyhow!("expected a JSON object, got {other}")),
        }
    }
}

/// Names of all resolved integration fields; these are the record attribute
/// keys promoted to the top level of responses.
pub fn integration_names(integrations: &[Map<String, Value>]) -> HashSet<String> {
    integrations
        .iter()
        .filter_map(|descriptor| descriptor.get("name").and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}

fn load_descriptor(path: &Path, singular: &str) -> Map<String, Value> {
    let mut descriptor = Map::new();
    descriptor.insert(
        "name".to_string(),
        Value::String(descriptor_name(path, singular)),
    );

    match read_descriptor(path) {
        Ok(content) => {
            for (key, value) in content {
                descriptor.insert(key, value);
            }
        }
        Err(err) => push_error(&mut descriptor, format!("failed to integrate: {err:#}")),
    }

    descriptor
}

/// Extracts the `*` segment between the `integration_` prefix and the
/// `_<singular>.fields.yaml` suffix of a descriptor filename.
fn descriptor_name(path: &Path, singular: &str) -> String {
    let file_name = path.file_name().and_then(|name| name.to_str()).unwrap_or("");
    file_name
        .strip_prefix("integration_")
        .and_then(|rest| rest.strip_suffix(&format!("_{singular}.fields.yaml")))
        .unwrap_or(file_name)
        .to_string()
}

fn read_descriptor(path: &Path) -> Result<Map<String, Value>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("unreadable descriptor {}", path.display()))?;
    let parsed: serde_yaml::Value = serde_yaml::from_str(&text)
        .with_context(|| format!("unparsable descriptor {}", path.display()))?;
    let parsed: Value = serde_json::to_value(&parsed)
        .with_context(|| format!("non-JSON descriptor {}", path.display()))?;

    match parsed {
        Value::Object(map) => Ok(map),
        _ => Err(anyhow!("descriptor {} must be a mapping", path.display())),
    }
}

fn push_error(node: &mut Map<String, Value>, message: String) {
    match node
        .entry("errors".to_string())
        .or_insert_with(|| Value::Array(Vec::new()))
    {
        Value::Array(errors) => errors.push(Value::String(message)),
        other => *other = Value::Array(vec![Value::String(message)]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Query;
    use axum::response::Json;
    use axum::routing::options;
    use axum::Router;
    use serde_json::json;
    use std::collections::HashMap;

    fn test_resolver(directory: &Path, registry: &str) -> Resolver {
        Resolver::new(directory, registry, Duration::from_secs(2)).unwrap()
    }

    async fn spawn(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn spawn_peer() -> String {
        let router = Router::new()
            .route(
                "/ok",
                options(|| async {
                    Json(json!({
                        "description": "from peer",
                        "fields": [{"name": "nested", "integrate": {"node": "yep"}}]
                    }))
                }),
            )
            .route(
                "/bad",
                options(|| async {
                    (
                        axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                        Json(json!({"message": "whoops"})),
                    )
                }),
            )
            .route(
                "/scalar",
                options(|| async { Json(json!("yep")) }),
            )
            .route(
                "/node",
                options(|Query(params): Query<HashMap<String, String>>| async move {
                    Json(json!({"name": params["node"], "description": "registry"}))
                }),
            );
        spawn(router).await
    }

    #[test]
    fn test_discover_sorted_with_captured_names() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("integration_unit.test_unittest.fields.yaml"),
            "description: integrate\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("integration_alpha_unittest.fields.yaml"),
            "description: first\n",
        )
        .unwrap();
        // different model, must not match
        std::fs::write(
            dir.path().join("integration_alpha_other.fields.yaml"),
            "description: other\n",
        )
        .unwrap();

        let resolver = test_resolver(dir.path(), "http://localhost:0");
        let descriptors = resolver.discover("unittest");

        assert_eq!(descriptors.len(), 2);
        assert_eq!(descriptors[0]["name"], json!("alpha"));
        assert_eq!(descriptors[0]["description"], json!("first"));
        assert_eq!(descriptors[1]["name"], json!("unit.test"));
        assert_eq!(descriptors[1]["description"], json!("integrate"));
    }

    #[test]
    fn test_discover_missing_directory_is_empty() {
        let resolver = test_resolver(Path::new("/nonexistent/config"), "http://localhost:0");
        assert!(resolver.discover("unittest").is_empty());
    }

    #[test]
    fn test_discover_unparsable_descriptor_records_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("integration_broken_unittest.fields.yaml"),
            "- not\n- a\n- mapping\n",
        )
        .unwrap();

        let resolver = test_resolver(dir.path(), "http://localhost:0");
        let descriptors = resolver.discover("unittest");

        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0]["name"], json!("broken"));
        let errors = descriptors[0]["errors"].as_array().unwrap();
        assert!(errors[0]
            .as_str()
            .unwrap()
            .starts_with("failed to integrate: "));
    }

    #[tokio::test]
    async fn test_resolve_merges_and_recurses() {
        let peer = spawn_peer().await;
        let dir = tempfile::tempdir().unwrap();
        let resolver = test_resolver(dir.path(), &peer);

        let mut node = json!({"integrate": {"url": format!("{peer}/ok")}});
        let node = node.as_object_mut().unwrap();
        resolver.resolve(node).await;

        assert_eq!(node["description"], json!("from peer"));
        // the merged-in nested field was itself resolved through the registry
        let nested = node["fields"][0].as_object().unwrap();
        assert_eq!(nested["name"], json!("nested"));
        assert_eq!(nested["description"], json!("registry"));
        assert!(nested.get("errors").is_none());
    }

    #[tokio::test]
    async fn test_resolve_failure_is_isolated_to_its_node() {
        let peer = spawn_peer().await;
        let dir = tempfile::tempdir().unwrap();
        let resolver = test_resolver(dir.path(), &peer);

        let mut node = json!({
            "fields": [
                {"name": "good", "integrate": {"url": format!("{peer}/ok")}},
                {"name": "bad", "integrate": {"url": format!("{peer}/bad")}}
            ]
        });
        let node = node.as_object_mut().unwrap();
        resolver.resolve(node).await;

        let good = node["fields"][0].as_object().unwrap();
        assert_eq!(good["description"], json!("from peer"));
        assert!(good.get("errors").is_none());

        let bad = node["fields"][1].as_object().unwrap();
        let errors = bad["errors"].as_array().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0]
            .as_str()
            .unwrap()
            .starts_with("failed to integrate: "));
        assert!(bad.get("description").is_none());
    }

    #[tokio::test]
    async fn test_resolve_non_object_response_is_a_failure() {
        let peer = spawn_peer().await;
        let dir = tempfile::tempdir().unwrap();
        let resolver = test_resolver(dir.path(), &peer);

        let mut node = json!({"integrate": {"url": format!("{peer}/scalar")}});
        let node = node.as_object_mut().unwrap();
        resolver.resolve(node).await;

        let errors = node["errors"].as_array().unwrap();
        assert!(errors[0]
            .as_str()
            .unwrap()
            .starts_with("failed to integrate: "));
    }

    #[tokio::test]
    async fn test_integrations_end_to_end() {
        let peer = spawn_peer().await;
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("integration_unit.test_unittest.fields.yaml"),
            format!("integrate:\n  url: {peer}/ok\n"),
        )
        .unwrap();

        let resolver = test_resolver(dir.path(), &peer);
        let descriptors = resolver.integrations("unittest").await;

        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0]["name"], json!("unit.test"));
        assert_eq!(descriptors[0]["description"], json!("from peer"));
        assert_eq!(
            integration_names(&descriptors),
            HashSet::from(["unit.test".to_string()])
        );
    }
}
