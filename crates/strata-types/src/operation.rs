use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::object::OpObject;

/// Extension fields that are never hashed and are dropped once an operation
/// is frozen into an executed block.
pub const TRANSIENT_FIELDS: &[&str] = &["privatekey", "uid"];

/// One signature entry on an operation or block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpSignature {
    /// Signature algorithm, e.g. `"ed25519"`.
    pub algo: String,
    /// Hex-encoded raw signature bytes.
    pub digest: String,
}

impl OpSignature {
    pub fn new(algo: impl Into<String>, digest: impl Into<String>) -> Self {
        Self {
            algo: algo.into(),
            digest: digest.into(),
        }
    }
}

/// A change request against ledger state.
///
/// The fixed header fields are typed; anything else a client sends is kept
/// verbatim in [`fields`](Self::fields) so that unknown fields survive a
/// decode/encode cycle and stay part of the hash preimage.
///
/// `signature` and `signed_by` are parallel lists: entry `i` of `signature`
/// was produced by identity `signed_by[i]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(rename = "type")]
    pub op_type: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signed_by: Vec<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hash: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signature: Vec<OpSignature>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub new: Vec<OpObject>,

    #[serde(default, rename = "delete", skip_serializing_if = "Vec::is_empty")]
    pub deleted: Vec<Vec<String>>,

    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

impl Operation {
    /// Create an unsigned operation of the given type.
    pub fn new(op_type: impl Into<String>) -> Self {
        Self {
            op_type: op_type.into(),
            signed_by: Vec::new(),
            hash: String::new(),
            signature: Vec::new(),
            new: Vec::new(),
            deleted: Vec::new(),
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style: add an object to the `new` list.
    pub fn with_new(mut self, object: OpObject) -> Self {
        self.new.push(object);
        self
    }

    /// Builder-style: add an object id to the `delete` list.
    pub fn with_deleted<I, S>(mut self, id: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.deleted.push(id.into_iter().map(Into::into).collect());
        self
    }

    /// Builder-style extension field setter.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// A string-valued extension field, if present.
    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Whether a hash has been assigned.
    pub fn is_hashed(&self) -> bool {
        !self.hash.is_empty()
    }

    /// Drop transient extension fields.
    pub fn strip_transient_fields(&mut self) {
        for key in TRANSIENT_FIELDS {
            self.fields.remove(*key);
        }
    }

    /// Consume the operation, returning the immutable form stored in blocks.
    pub fn frozen(mut self) -> Self {
        self.strip_transient_fields();
        self
    }
}
