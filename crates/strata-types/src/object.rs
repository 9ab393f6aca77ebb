use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A ledger object: a composite string id plus arbitrary fields.
///
/// Objects are created by the `new` list of an [`Operation`] and become part
/// of ledger state once that operation executes. Identity objects use
/// `[nickname]` (signup) or `[nickname, site]` (login) as their id.
///
/// [`Operation`]: crate::Operation
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OpObject {
    #[serde(default)]
    pub id: Vec<String>,
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

impl OpObject {
    /// Create an object with the given composite id and no fields.
    pub fn new<I, S>(id: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into_iter().map(Into::into).collect(),
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field setter.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// First id component; the identity name for signup and login objects.
    pub fn name(&self) -> Option<&str> {
        self.id.first().map(String::as_str)
    }

    /// Second id component; the site of a login object.
    pub fn site(&self) -> Option<&str> {
        self.id.get(1).map(String::as_str)
    }

    /// A string-valued field, if present.
    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_and_site_come_from_id() {
        let login = OpObject::new(["alice", "web"]);
        assert_eq!(login.name(), Some("alice"));
        assert_eq!(login.site(), Some("web"));
        assert_eq!(OpObject::new(["bob"]).site(), None);
        assert_eq!(OpObject::default().name(), None);
    }

    #[test]
    fn fields_are_flattened_in_json() {
        let obj = OpObject::new(["alice"]).with_field("pubkey", "abcd");
        let json = serde_json::to_value(&obj).unwrap();
        assert_eq!(json["id"][0], "alice");
        assert_eq!(json["pubkey"], "abcd");

        let parsed: OpObject = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.field_str("pubkey"), Some("abcd"));
    }
}
