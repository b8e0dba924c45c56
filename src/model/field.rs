use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Name of the trailing catch-all field that captures every attribute not
/// otherwise declared, carried on the wire as YAML text.
pub const CATCH_ALL: &str = "yaml";

/// Presentation hint for a field. Plain fields omit the hint entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldStyle {
    Plain,
    Textarea,
}

/// One named, validated unit of a model's editable schema.
///
/// Serialization mirrors the wire contract: defaults are skipped so a field
/// renders as the minimal dict callers expect. Any metadata beyond the known
/// attributes (nested `fields`, `integrate` directives, merged integration
/// keys) rides along in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<FieldStyle>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub readonly: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Field {
    pub fn named(name: impl Into<String>) -> Self {
        Field {
            name: name.into(),
            ..Field::default()
        }
    }

    /// Builds a field from a resolved integration descriptor. The descriptor
    /// is open-ended; unknown keys land in `extra`.
    pub fn from_descriptor(descriptor: &Map<String, Value>) -> anyhow::Result<Self> {
        let field = serde_json::from_value(Value::Object(descriptor.clone()))?;
        Ok(field)
    }

    fn has_value(&self) -> bool {
        matches!(&self.value, Some(value) if !value.is_null())
    }
}

/// The readonly identity field, present only in update contexts.
pub fn identity_field() -> Field {
    Field {
        name: "id".to_string(),
        readonly: true,
        ..Field::default()
    }
}

/// The trailing catch-all field: textarea, optional.
pub fn catch_all_field() -> Field {
    Field {
        name: CATCH_ALL.to_string(),
        style: Some(FieldStyle::Textarea),
        optional: true,
        ..Field::default()
    }
}

/// Ordered collection of fields forming one model's effective schema, plus
/// set-level errors (unknown submitted keys).
#[derive(Debug, Clone, Default)]
pub struct FieldSet {
    pub order: Vec<Field>,
    pub errors: Vec<String>,
}

impl FieldSet {
    /// Populates a field list with submitted and original values.
    ///
    /// Originals fill each field's `original`. When no submitted mapping is
    /// given the originals double as the value source (show-current-state
    /// mode). Submitted keys that name no field become set-level errors;
    /// readonly fields always take their value from the original.
    pub fn build(
        fields: Vec<Field>,
        submitted: Option<&Map<String, Value>>,
        originals: Option<&Map<String, Value>>,
    ) -> Self {
        let mut set = FieldSet {
            order: fields,
            errors: Vec::new(),
        };

        if let Some(originals) = originals {
            for field in &mut set.order {
                if let Some(value) = originals.get(&field.name) {
                    field.original = Some(value.clone());
                }
            }
        }

        if let Some(values) = submitted.or(originals) {
            for (key, value) in values {
                if let Some(field) = set.order.iter_mut().find(|field| &field.name == key) {
                    field.value = Some(value.clone());
                } else {
                    set.errors.push(format!("unknown field '{key}'"));
                }
            }
        }

        for field in &mut set.order {
            if field.readonly {
                field.value = field.original.clone();
            }
        }

        set
    }

    /// Checks every field, recording errors in place. Required fields without
    /// a value get `missing value`; a catch-all value that does not parse as
    /// a key-value mapping (including YAML syntax errors) gets `must be dict`.
    /// Returns true iff no field and no set-level error remains.
    pub fn validate(&mut self) -> bool {
        for field in &mut self.order {
            if field.readonly {
                continue;
            }

            if !field.has_value() {
                if !field.optional {
                    field.errors.push("missing value".to_string());
                }
                continue;
            }

            if field.name == CATCH_ALL && !value_is_mapping(field.value.as_ref()) {
                field.errors.push("must be dict".to_string());
            }
        }

        self.errors.is_empty() && self.order.iter().all(|field| field.errors.is_empty())
    }

    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(|field| field.name.as_str()).collect()
    }

    /// Renders the ordered field list as minimal wire dicts.
    pub fn to_list(&self) -> anyhow::Result<Vec<Value>> {
        let mut list = Vec::with_capacity(self.order.len());
        for field in &self.order {
            list.push(serde_json::to_value(field)?);
        }
        Ok(list)
    }
}

fn value_is_mapping(value: Option<&Value>) -> bool {
    match value {
        Some(Value::String(text)) => serde_yaml::from_str::<serde_yaml::Value>(text)
            .map(|parsed| parsed.is_mapping())
            .unwrap_or(false),
        _ => false,
    }
}
