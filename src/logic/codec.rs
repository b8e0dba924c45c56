use std::collections::HashSet;

use anyhow::{anyhow, Context, Result};
use serde_json::{Map, Value};

use crate::model::{Attributes, Record, RecordValues, CATCH_ALL};

/// Converts a submitted flat payload into the structured storage form.
///
/// Attribute data is merged from three sources with rising precedence:
/// integration-named keys, the parsed catch-all text, and the explicit
/// `data` mapping. Every other key is a column write. `data` stays `None`
/// when no source contributed, so partial updates leave the bag untouched.
pub fn to_storage(
    integration_names: &HashSet<String>,
    payload: &Map<String, Value>,
) -> Result<RecordValues> {
    let mut columns = Attributes::new();
    let mut data = Attributes::new();
    let mut data_present = false;

    for (key, value) in payload {
        if integration_names.contains(key) {
            data.insert(key.clone(), value.clone());
            data_present = true;
        } else if key != CATCH_ALL && key != "data" {
            columns.insert(key.clone(), value.clone());
        }
    }

    if let Some(text) = payload.get(CATCH_ALL) {
        let text = text
            .as_str()
            .ok_or_else(|| anyhow!("{CATCH_ALL} must be a string"))?;
        for (key, value) in parse_catch_all(text)? {
            data.insert(key, value);
        }
        data_present = true;
    }

    if let Some(explicit) = payload.get("data") {
        let explicit = explicit
            .as_object()
            .ok_or_else(|| anyhow!("data must be a mapping"))?;
        for (key, value) in explicit {
            data.insert(key.clone(), value.clone());
        }
        data_present = true;
    }

    Ok(RecordValues {
        columns,
        data: data_present.then_some(data),
    })
}

/// Parses catch-all text as a YAML mapping with JSON-compatible values.
pub fn parse_catch_all(text: &str) -> Result<Attributes> {
    let parsed: serde_yaml::Value = serde_yaml::from_str(text).context("unparsable yaml")?;
    let parsed: Value = serde_json::to_value(&parsed).context("non-JSON yaml")?;

    match parsed {
        Value::Object(map) => Ok(map.into_iter().collect()),
        _ => Err(anyhow!("{CATCH_ALL} must be a mapping")),
    }
}

/// Flattens a stored record into the response form: columns and identity at
/// the top level, attribute-bag keys promoted when they name a resolved
/// integration field, the remainder nested under `data` and re-serialized as
/// sorted block-form YAML for the catch-all field.
pub fn from_storage(
    integration_names: &HashSet<String>,
    record: &Record,
) -> Result<Map<String, Value>> {
    let mut flat = Map::new();
    flat.insert("id".to_string(), Value::from(record.id));
    for (column, value) in &record.columns {
        flat.insert(column.clone(), value.clone());
    }

    let mut nested = Attributes::new();
    for (key, value) in &record.data {
        if integration_names.contains(key) {
            flat.insert(key.clone(), value.clone());
        } else {
            nested.insert(key.clone(), value.clone());
        }
    }

    let dumped = serde_yaml::to_string(&nested).context("unserializable attribute bag")?;
    flat.insert(
        "data".to_string(),
        Value::Object(nested.into_iter().collect()),
    );
    flat.insert(CATCH_ALL.to_string(), Value::String(dumped));

    Ok(flat)
}

/// Pointwise lift of `from_storage`; callers discover integrations once and
/// reuse them across the whole batch.
pub fn from_storage_many(
    integration_names: &HashSet<String>,
    records: &[Record],
) -> Result<Vec<Map<String, Value>>> {
    records
        .iter()
        .map(|record| from_storage(integration_names, record))
        .collect()
}

/// Ordered ids plus an id-to-name label map, for callers rendering pick
/// lists from another model's records.
pub fn choices(records: &[Record]) -> (Vec<i64>, Map<String, Value>) {
    let mut ids = Vec::with_capacity(records.len());
    let mut labels = Map::new();

    for record in records {
        ids.push(record.id);
        labels.insert(
            record.id.to_string(),
            record.columns.get("name").cloned().unwrap_or(Value::Null),
        );
    }

    (ids, labels)
}
