use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::model::{ModelSpec, Record, RecordValues};
use crate::store::traits::{Filters, Session, Store, StoreError};

#[derive(Debug, Clone, Default)]
struct Table {
    next_id: i64,
    rows: BTreeMap<i64, Record>,
}

type Tables = BTreeMap<String, Table>;

/// In-memory store with snapshot sessions: a session clones the current
/// state, works on the clone, and commit swaps it back in. Last commit wins
/// across concurrent sessions, which is enough for tests and demos.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    shared: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn session(&self) -> Result<Box<dyn Session>, StoreError> {
        let staged = self.shared.read().clone();
        Ok(Box::new(MemorySession {
            shared: self.shared.clone(),
            staged,
        }))
    }
}

pub struct MemorySession {
    shared: Arc<RwLock<Tables>>,
    staged: Tables,
}

#[async_trait::async_trait]
impl Session for MemorySession {
    async fn select(
        &mut self,
        model: &ModelSpec,
        filters: &Filters,
    ) -> Result<Vec<Record>, StoreError> {
        let mut records: Vec<Record> = self
            .staged
            .get(&model.table)
            .map(|table| {
                table
                    .rows
                    .values()
                    .filter(|record| matches_filters(record, filters))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        records.sort_by(|a, b| {
            for column in &model.order {
                let ordering = sort_key(a, column).cmp(&sort_key(b, column));
                if ordering != std::cmp::Ordering::Equal {
                    return ordering;
                }
            }
            a.id.cmp(&b.id)
        });

        Ok(records)
    }

    async fn get(&mut self, model: &ModelSpec, id: i64) -> Result<Option<Record>, StoreError> {
        Ok(self
            .staged
            .get(&model.table)
            .and_then(|table| table.rows.get(&id))
            .cloned())
    }

    async fn insert(
        &mut self,
        model: &ModelSpec,
        values: RecordValues,
    ) -> Result<Record, StoreError> {
        let table = self.staged.entry(model.table.clone()).or_default();
        table.next_id += 1;

        let mut columns = values.columns;
        for field in &model.fields {
            columns.entry(field.name.clone()).or_insert(Value::Null);
        }

        let record = Record {
            id: table.next_id,
            columns,
            data: values.data.unwrap_or_default(),
        };
        table.rows.insert(record.id, record.clone());

        Ok(record)
    }

    async fn update(
        &mut self,
        model: &ModelSpec,
        id: i64,
        values: RecordValues,
    ) -> Result<u64, StoreError> {
        let Some(record) = self
            .staged
            .get_mut(&model.table)
            .and_then(|table| table.rows.get_mut(&id))
        else {
            return Ok(0);
        };

        for (column, value) in values.columns {
            record.columns.insert(column, value);
        }
        if let Some(data) = values.data {
            record.data = data;
        }

        Ok(1)
    }

    async fn delete(&mut self, model: &ModelSpec, id: i64) -> Result<u64, StoreError> {
        let removed = self
            .staged
            .get_mut(&model.table)
            .and_then(|table| table.rows.remove(&id));
        Ok(removed.map_or(0, |_| 1))
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemorySession { shared, staged } = *self;
        *shared.write() = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

fn matches_filters(record: &Record, filters: &Filters) -> bool {
    filters.iter().all(|(column, raw)| {
        if column == "id" {
            return record.id.to_string() == *raw;
        }
        match record.columns.get(column) {
            Some(value) => value_matches(value, raw),
            None => false,
        }
    })
}

/// Query parameters arrive as text; compare against the textual face of the
/// stored value.
fn value_matches(value: &Value, raw: &str) -> bool {
    match value {
        Value::String(text) => text == raw,
        Value::Null => false,
        other => other.to_string() == raw,
    }
}

fn sort_key(record: &Record, column: &str) -> String {
    if column == "id" {
        return record.id.to_string();
    }
    match record.columns.get(column) {
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Attributes, Field};
    use serde_json::json;

    fn unittest_spec() -> ModelSpec {
        ModelSpec::new("unittest", "unittests")
            .field(Field::named("name"))
            .order_by("name")
    }

    fn values(name: &str) -> RecordValues {
        RecordValues {
            columns: [("name".to_string(), json!(name))].into_iter().collect(),
            data: None,
        }
    }

    #[tokio::test]
    async fn test_insert_assigns_increasing_ids() {
        let store = MemoryStore::new();
        let spec = unittest_spec();
        let mut session = store.session().await.unwrap();

        let first = session.insert(&spec, values("unit")).await.unwrap();
        let second = session.insert(&spec, values("test")).await.unwrap();
        session.commit().await.unwrap();

        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert_eq!(first.columns["name"], json!("unit"));
    }

    #[tokio::test]
    async fn test_select_filters_and_orders() {
        let store = MemoryStore::new();
        let spec = unittest_spec();
        let mut session = store.session().await.unwrap();
        session.insert(&spec, values("unit")).await.unwrap();
        session.insert(&spec, values("test")).await.unwrap();
        session.commit().await.unwrap();

        let mut session = store.session().await.unwrap();
        let all = session.select(&spec, &Filters::new()).await.unwrap();
        assert_eq!(all.len(), 2);
        // ordered by name: test before unit
        assert_eq!(all[0].columns["name"], json!("test"));
        assert_eq!(all[1].columns["name"], json!("unit"));

        let filtered = session
            .select(&spec, &[("name".to_string(), "unit".to_string())].into())
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].columns["name"], json!("unit"));
        session.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_update_and_delete_counts() {
        let store = MemoryStore::new();
        let spec = unittest_spec();
        let mut session = store.session().await.unwrap();
        let record = session.insert(&spec, values("unit")).await.unwrap();

        let updated = session
            .update(&spec, record.id, values("unity"))
            .await
            .unwrap();
        assert_eq!(updated, 1);
        assert_eq!(
            session.get(&spec, record.id).await.unwrap().unwrap().columns["name"],
            json!("unity")
        );

        assert_eq!(session.update(&spec, 999, values("nope")).await.unwrap(), 0);
        assert_eq!(session.delete(&spec, record.id).await.unwrap(), 1);
        assert_eq!(session.delete(&spec, record.id).await.unwrap(), 0);
        session.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_update_replaces_data_only_when_present() {
        let store = MemoryStore::new();
        let spec = unittest_spec();
        let mut session = store.session().await.unwrap();
        let record = session
            .insert(
                &spec,
                RecordValues {
                    columns: [("name".to_string(), json!("unit"))].into_iter().collect(),
                    data: Some([("a".to_string(), json!(1))].into_iter().collect()),
                },
            )
            .await
            .unwrap();

        // no data in the values: bag untouched
        session
            .update(&spec, record.id, values("unity"))
            .await
            .unwrap();
        let current = session.get(&spec, record.id).await.unwrap().unwrap();
        assert_eq!(current.data, attrs(json!({"a": 1})));

        // data present: bag replaced wholesale
        session
            .update(
                &spec,
                record.id,
                RecordValues {
                    columns: Attributes::new(),
                    data: Some([("b".to_string(), json!(2))].into_iter().collect()),
                },
            )
            .await
            .unwrap();
        let current = session.get(&spec, record.id).await.unwrap().unwrap();
        assert_eq!(current.data, attrs(json!({"b": 2})));
        session.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_rollback_discards_staged_changes() {
        let store = MemoryStore::new();
        let spec = unittest_spec();

        let mut session = store.session().await.unwrap();
        session.insert(&spec, values("unit")).await.unwrap();
        session.rollback().await.unwrap();

        let mut session = store.session().await.unwrap();
        let all = session.select(&spec, &Filters::new()).await.unwrap();
        assert!(all.is_empty());
        session.commit().await.unwrap();
    }

    fn attrs(value: serde_json::Value) -> Attributes {
        value.as_object().unwrap().clone().into_iter().collect()
    }
}
