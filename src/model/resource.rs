use serde_json::{Map, Value};

use crate::model::field::{catch_all_field, identity_field, Field, FieldSet};

/// Everything a generic resource needs to know about one model: its names,
/// the declared (column-backed) fields, and the listing order.
#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub singular: String,
    pub plural: String,
    pub table: String,
    pub fields: Vec<Field>,
    pub order: Vec<String>,
}

impl ModelSpec {
    pub fn new(singular: impl Into<String>, plural: impl Into<String>) -> Self {
        let plural = plural.into();
        ModelSpec {
            singular: singular.into(),
            table: plural.clone(),
            plural,
            fields: Vec::new(),
            order: Vec::new(),
        }
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn order_by(mut self, column: impl Into<String>) -> Self {
        self.order.push(column.into());
        self
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.fields.iter().any(|field| field.name == name)
    }

    /// Assembles the model's effective field set in the contract order:
    /// identity (update contexts only) → declared → integration → catch-all.
    pub fn field_set(
        &self,
        with_identity: bool,
        integrations: &[Map<String, Value>],
        submitted: Option<&Map<String, Value>>,
        originals: Option<&Map<String, Value>>,
    ) -> anyhow::Result<FieldSet> {
        let mut fields = Vec::with_capacity(self.fields.len() + integrations.len() + 2);
        if with_identity {
            fields.push(identity_field());
        }
        fields.extend(self.fields.iter().cloned());
        for descriptor in integrations {
            fields.push(Field::from_descriptor(descriptor)?);
        }
        fields.push(catch_all_field());

        Ok(FieldSet::build(fields, submitted, originals))
    }
}
