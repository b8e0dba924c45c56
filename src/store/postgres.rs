use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::model::{Attributes, ModelSpec, Record, RecordValues};
use crate::store::traits::{Filters, Session, Store, StoreError};

/// PostgreSQL store: one table per model, identity as BIGSERIAL, declared
/// columns and the attribute bag stored as JSONB.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store with the given database URL
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to create PostgreSQL connection pool")?;

        Ok(Self { pool })
    }

    /// Creates the table for each registered model if it does not exist yet.
    pub async fn migrate(&self, models: &[ModelSpec]) -> Result<()> {
        for model in models {
            let columns: String = model
                .fields
                .iter()
                .map(|field| format!(", \"{}\" JSONB", field.name))
                .collect();
            let sql = format!(
                "CREATE TABLE IF NOT EXISTS \"{}\" (id BIGSERIAL PRIMARY KEY{columns}, data JSONB NOT NULL DEFAULT '{{}}'::jsonb)",
                model.table
            );
            sqlx::query(&sql)
                .execute(&self.pool)
                .await
                .with_context(|| format!("failed to create table {}", model.table))?;
        }
        Ok(())
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl Store for PostgresStore {
    async fn session(&self) -> Result<Box<dyn Session>, StoreError> {
        let tx = self.pool.begin().await.map_err(session_error)?;
        Ok(Box::new(PostgresSession { tx }))
    }
}

pub struct PostgresSession {
    tx: Transaction<'static, Postgres>,
}

#[async_trait::async_trait]
impl Session for PostgresSession {
    async fn select(
        &mut self,
        model: &ModelSpec,
        filters: &Filters,
    ) -> Result<Vec<Record>, StoreError> {
        let (sql, binds) = select_sql(model, filters)?;
        let mut query = sqlx::query(&sql);
        for bind in binds {
            query = query.bind(bind);
        }
        let rows = query
            .fetch_all(&mut *self.tx)
            .await
            .map_err(query_error)?;

        rows.iter().map(|row| read_record(model, row)).collect()
    }

    async fn get(&mut self, model: &ModelSpec, id: i64) -> Result<Option<Record>, StoreError> {
        let sql = format!(
            "SELECT id{}, data FROM \"{}\" WHERE id = $1",
            select_columns(model),
            model.table
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(query_error)?;

        row.map(|row| read_record(model, &row)).transpose()
    }

    async fn insert(
        &mut self,
        model: &ModelSpec,
        values: RecordValues,
    ) -> Result<Record, StoreError> {
        let mut names = Vec::new();
        let mut placeholders = Vec::new();
        let mut binds = Vec::new();

        for (column, value) in &values.columns {
            declared(model, column)?;
            binds.push(Json(value.clone()));
            names.push(format!("\"{column}\""));
            placeholders.push(format!("${}", binds.len()));
        }

        let data = values.data.unwrap_or_default();
        binds.push(Json(Value::Object(data.into_iter().collect())));
        names.push("data".to_string());
        placeholders.push(format!("${}", binds.len()));

        let sql = format!(
            "INSERT INTO \"{}\" ({}) VALUES ({}) RETURNING id{}, data",
            model.table,
            names.join(", "),
            placeholders.join(", "),
            select_columns(model)
        );
        let mut query = sqlx::query(&sql);
        for bind in binds {
            query = query.bind(bind);
        }
        let row = query
            .fetch_one(&mut *self.tx)
            .await
            .map_err(query_error)?;

        read_record(model, &row)
    }

    async fn update(
        &mut self,
        model: &ModelSpec,
        id: i64,
        values: RecordValues,
    ) -> Result<u64, StoreError> {
        let mut sets = Vec::new();
        let mut binds = Vec::new();

        for (column, value) in &values.columns {
            declared(model, column)?;
            binds.push(Json(value.clone()));
            sets.push(format!("\"{column}\" = ${}", binds.len()));
        }
        if let Some(data) = values.data {
            binds.push(Json(Value::Object(data.into_iter().collect())));
            sets.push(format!("data = ${}", binds.len()));
        }

        if sets.is_empty() {
            // nothing to write; report whether the identity exists at all
            let row = sqlx::query(&format!(
                "SELECT COUNT(*) AS matched FROM \"{}\" WHERE id = $1",
                model.table
            ))
            .bind(id)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(query_error)?;
            let matched: i64 = row.try_get("matched").map_err(query_error)?;
            return Ok(matched as u64);
        }

        let sql = format!(
            "UPDATE \"{}\" SET {} WHERE id = ${}",
            model.table,
            sets.join(", "),
            binds.len() + 1
        );
        let mut query = sqlx::query(&sql);
        for bind in binds {
            query = query.bind(bind);
        }
        let result = query
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(query_error)?;

        Ok(result.rows_affected())
    }

    async fn delete(&mut self, model: &ModelSpec, id: i64) -> Result<u64, StoreError> {
        let result = sqlx::query(&format!("DELETE FROM \"{}\" WHERE id = $1", model.table))
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(query_error)?;

        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(session_error)
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await.map_err(session_error)
    }
}

/// Builds the filtered, ordered SELECT for a model. Filter values are bound
/// as text and compared against the textual face of the JSONB columns, which
/// is how equality on query parameters is defined.
fn select_sql(model: &ModelSpec, filters: &Filters) -> Result<(String, Vec<String>), StoreError> {
    let mut sql = format!(
        "SELECT id{}, data FROM \"{}\"",
        select_columns(model),
        model.table
    );

    let mut binds = Vec::new();
    if !filters.is_empty() {
        let mut clauses = Vec::new();
        for (column, value) in filters {
            binds.push(value.clone());
            clauses.push(format!(
                "{} = ${}",
                column_as_text(model, column)?,
                binds.len()
            ));
        }
        sql.push_str(&format!(" WHERE {}", clauses.join(" AND ")));
    }

    if !model.order.is_empty() {
        let order = model
            .order
            .iter()
            .map(|column| column_as_text(model, column))
            .collect::<Result<Vec<_>, _>>()?;
        sql.push_str(&format!(" ORDER BY {}", order.join(", ")));
    }

    Ok((sql, binds))
}

/// Textual expression for a column, guarding against identifiers outside the
/// model's declared set.
fn column_as_text(model: &ModelSpec, column: &str) -> Result<String, StoreError> {
    if column == "id" {
        return Ok("id::text".to_string());
    }
    declared(model, column)?;
    Ok(format!("\"{column}\" #>> '{{}}'"))
}

fn declared(model: &ModelSpec, column: &str) -> Result<(), StoreError> {
    if model.has_column(column) {
        Ok(())
    } else {
        Err(StoreError::Other(anyhow!("unknown column '{column}'")))
    }
}

fn select_columns(model: &ModelSpec) -> String {
    model
        .fields
        .iter()
        .map(|field| format!(", \"{}\"", field.name))
        .collect()
}

fn read_record(model: &ModelSpec, row: &PgRow) -> Result<Record, StoreError> {
    let id: i64 = row.try_get("id").map_err(query_error)?;

    let mut columns = Attributes::new();
    for field in &model.fields {
        let value: Option<Json<Value>> = row.try_get(field.name.as_str()).map_err(query_error)?;
        columns.insert(
            field.name.clone(),
            value.map(|Json(value)| value).unwrap_or(Value::Null),
        );
    }

    let Json(data): Json<Value> = row.try_get("data").map_err(query_error)?;
    let data = match data {
        Value::Object(map) => map.into_iter().collect(),
        _ => Attributes::new(),
    };

    Ok(Record { id, columns, data })
}

fn session_error(err: sqlx::Error) -> StoreError {
    StoreError::Session(err.to_string())
}

/// Connection-level failures are session errors; everything else surfaces
/// with its own message.
fn query_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::PoolClosed
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::Io(_)
        | sqlx::Error::Protocol(_) => StoreError::Session(err.to_string()),
        other => StoreError::Other(anyhow!(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Field;

    fn unittest_spec() -> ModelSpec {
        ModelSpec::new("unittest", "unittests")
            .field(Field::named("name"))
            .order_by("name")
    }

    #[test]
    fn test_select_sql_plain() {
        let (sql, binds) = select_sql(&unittest_spec(), &Filters::new()).unwrap();
        assert_eq!(
            sql,
            "SELECT id, \"name\", data FROM \"unittests\" ORDER BY \"name\" #>> '{}'"
        );
        assert!(binds.is_empty());
    }

    #[test]
    fn test_select_sql_with_filters() {
        let filters: Filters = [
            ("id".to_string(), "1".to_string()),
            ("name".to_string(), "unit".to_string()),
        ]
        .into();

        let (sql, binds) = select_sql(&unittest_spec(), &filters).unwrap();
        assert_eq!(
            sql,
            "SELECT id, \"name\", data FROM \"unittests\" WHERE id::text = $1 AND \"name\" #>> '{}' = $2 ORDER BY \"name\" #>> '{}'"
        );
        assert_eq!(binds, vec!["1".to_string(), "unit".to_string()]);
    }

    #[test]
    fn test_select_sql_rejects_undeclared_filter_column() {
        let filters: Filters = [("nope".to_string(), "bad".to_string())].into();
        assert!(select_sql(&unittest_spec(), &filters).is_err());
    }
}
