use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Open-ended attribute map. A BTreeMap keeps key order deterministic so the
/// catch-all YAML dump stays stable and diffable.
pub type Attributes = BTreeMap<String, Value>;

/// One persisted entity: identity, declared columns, and the attribute bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: i64,
    pub columns: Attributes,
    pub data: Attributes,
}

/// A partial write against a record. `data` absent means the attribute bag
/// column is left untouched on update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordValues {
    pub columns: Attributes,
    pub data: Option<Attributes>,
}
