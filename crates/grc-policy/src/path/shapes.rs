//! [`Navigable`] implementations for the supported payload shapes.

use std::collections::{BTreeMap, HashMap, HashSet};

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{Member, Navigable, Shape};
use crate::error::PathError;

// =============================================================================
// Tree: serde_json::Value
// =============================================================================

impl Navigable for Value {
    fn type_name(&self) -> &str {
        "serde_json::Value"
    }

    fn shape(&self) -> Shape {
        Shape::Tree
    }

    fn member(&self, name: &str) -> Option<Member<'_>> {
        match self {
            Value::Object(map) => map.get(name).map(|v| Member::Node(v as &dyn Navigable)),
            Value::Array(items) => name
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get(i))
                .map(|v| Member::Node(v as &dyn Navigable)),
            _ => None,
        }
    }

    fn member_mut(&mut self, name: &str) -> Option<&mut dyn Navigable> {
        match self {
            Value::Object(map) => map.get_mut(name).map(|v| v as &mut dyn Navigable),
            Value::Array(items) => name
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get_mut(i))
                .map(|v| v as &mut dyn Navigable),
            _ => None,
        }
    }

    fn set_member(&mut self, name: &str, value: Value) -> Result<(), PathError> {
        match self {
            Value::Object(map) => {
                map.insert(name.to_string(), value);
                Ok(())
            }
            Value::Array(items) => {
                let slot = name
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| items.get_mut(i))
                    .ok_or_else(|| PathError::not_writable(name, name, "array index out of bounds"))?;
                *slot = value;
                Ok(())
            }
            _ => Err(PathError::not_writable(
                name,
                name,
                "parent is a scalar value",
            )),
        }
    }

    fn to_value(&self) -> Value {
        self.clone()
    }

    fn is_null(&self) -> bool {
        Value::is_null(self)
    }
}

// =============================================================================
// Map: keyed containers
// =============================================================================

macro_rules! impl_value_map {
    ($map:ident, $name:literal) => {
        impl Navigable for $map<String, Value> {
            fn type_name(&self) -> &str {
                $name
            }

            fn shape(&self) -> Shape {
                Shape::Map
            }

            fn member(&self, name: &str) -> Option<Member<'_>> {
                self.get(name).map(|v| Member::Node(v as &dyn Navigable))
            }

            fn member_mut(&mut self, name: &str) -> Option<&mut dyn Navigable> {
                self.get_mut(name).map(|v| v as &mut dyn Navigable)
            }

            fn set_member(&mut self, name: &str, value: Value) -> Result<(), PathError> {
                self.insert(name.to_string(), value);
                Ok(())
            }

            fn to_value(&self) -> Value {
                Value::Object(
                    self.iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect::<Map<String, Value>>(),
                )
            }
        }
    };
}

macro_rules! impl_label_map {
    ($map:ident, $name:literal) => {
        impl Navigable for $map<String, String> {
            fn type_name(&self) -> &str {
                $name
            }

            fn shape(&self) -> Shape {
                Shape::Map
            }

            fn member(&self, name: &str) -> Option<Member<'_>> {
                self.get(name).map(|v| Member::Value(Value::String(v.clone())))
            }

            fn member_mut(&mut self, _name: &str) -> Option<&mut dyn Navigable> {
                None
            }

            fn set_member(&mut self, name: &str, value: Value) -> Result<(), PathError> {
                match scalar_to_label(value) {
                    Ok(Some(label)) => {
                        self.insert(name.to_string(), label);
                        Ok(())
                    }
                    Ok(None) => {
                        self.remove(name);
                        Ok(())
                    }
                    Err(reason) => Err(PathError::not_writable(name, name, reason)),
                }
            }

            fn to_value(&self) -> Value {
                Value::Object(
                    self.iter()
                        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                        .collect::<Map<String, Value>>(),
                )
            }
        }
    };
}

impl_value_map!(HashMap, "HashMap<String, Value>");
impl_value_map!(BTreeMap, "BTreeMap<String, Value>");
impl_label_map!(HashMap, "HashMap<String, String>");
impl_label_map!(BTreeMap, "BTreeMap<String, String>");

/// Converts a JSON value into a label value. `Ok(None)` clears the label.
fn scalar_to_label(value: Value) -> Result<Option<String>, &'static str> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Bool(b) => Ok(Some(b.to_string())),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Array(_) | Value::Object(_) => Err("label values must be scalars"),
    }
}

// =============================================================================
// Wrapper: domain resource envelope
// =============================================================================

/// Envelope carried by business entities submitted for enforcement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceWrapper {
    /// Entity identity. Read-only through paths.
    #[serde(default)]
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(rename = "type", default)]
    pub resource_type: String,

    #[serde(default)]
    pub metadata: ResourceMetadata,

    /// The wrapped entity as a JSON tree.
    #[serde(default)]
    pub resource: Value,
}

/// Labels and free-form attributes of a [`ResourceWrapper`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceMetadata {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    #[serde(default)]
    pub additional: BTreeMap<String, Value>,
}

impl ResourceWrapper {
    pub fn new(id: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            resource_type: resource_type.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.labels.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_resource(mut self, resource: Value) -> Self {
        self.resource = resource;
        self
    }
}

const WRAPPER_MEMBERS: [&str; 5] = ["id", "title", "type", "metadata", "resource"];
const METADATA_MEMBERS: [&str; 2] = ["labels", "additional"];

impl Navigable for ResourceWrapper {
    fn type_name(&self) -> &str {
        "ResourceWrapper"
    }

    fn shape(&self) -> Shape {
        Shape::Wrapper
    }

    fn member_names(&self) -> Vec<&str> {
        WRAPPER_MEMBERS.to_vec()
    }

    fn member(&self, name: &str) -> Option<Member<'_>> {
        match name {
            "id" => Some(Member::Value(Value::String(self.id.clone()))),
            "title" => self
                .title
                .as_ref()
                .map(|t| Member::Value(Value::String(t.clone()))),
            "type" => Some(Member::Value(Value::String(self.resource_type.clone()))),
            "metadata" => Some(Member::Node(&self.metadata)),
            "resource" => Some(Member::Node(&self.resource)),
            _ => None,
        }
    }

    fn member_mut(&mut self, name: &str) -> Option<&mut dyn Navigable> {
        match name {
            "metadata" => Some(&mut self.metadata),
            "resource" => Some(&mut self.resource),
            _ => None,
        }
    }

    fn set_member(&mut self, name: &str, value: Value) -> Result<(), PathError> {
        match (name, value) {
            ("title", Value::Null) => self.title = None,
            ("title", Value::String(s)) => self.title = Some(s),
            ("type", Value::String(s)) => self.resource_type = s,
            ("resource", value) => self.resource = value,
            ("title" | "type", _) => {
                return Err(PathError::not_writable(name, name, "expected a string"));
            }
            ("id", _) => return Err(PathError::not_writable(name, name, "identity is read-only")),
            ("metadata", _) => {
                return Err(PathError::not_writable(
                    name,
                    name,
                    "write labels or additional entries instead",
                ));
            }
            _ => return Err(PathError::not_writable(name, name, "no such member")),
        }
        Ok(())
    }

    fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl Navigable for ResourceMetadata {
    fn type_name(&self) -> &str {
        "ResourceMetadata"
    }

    fn shape(&self) -> Shape {
        Shape::Wrapper
    }

    fn member_names(&self) -> Vec<&str> {
        METADATA_MEMBERS.to_vec()
    }

    fn member(&self, name: &str) -> Option<Member<'_>> {
        match name {
            "labels" => Some(Member::Node(&self.labels)),
            "additional" => Some(Member::Node(&self.additional)),
            _ => None,
        }
    }

    fn member_mut(&mut self, name: &str) -> Option<&mut dyn Navigable> {
        match name {
            "labels" => Some(&mut self.labels),
            "additional" => Some(&mut self.additional),
            _ => None,
        }
    }

    fn set_member(&mut self, name: &str, value: Value) -> Result<(), PathError> {
        match (name, value) {
            ("labels", Value::Null) => self.labels.clear(),
            ("labels", Value::Object(map)) => {
                let mut labels = BTreeMap::new();
                for (key, value) in map {
                    match scalar_to_label(value) {
                        Ok(Some(label)) => {
                            labels.insert(key, label);
                        }
                        Ok(None) => {}
                        Err(reason) => return Err(PathError::not_writable(name, name, reason)),
                    }
                }
                self.labels = labels;
            }
            ("additional", Value::Null) => self.additional.clear(),
            ("additional", Value::Object(map)) => self.additional = map.into_iter().collect(),
            ("labels" | "additional", _) => {
                return Err(PathError::not_writable(name, name, "expected an object"));
            }
            _ => return Err(PathError::not_writable(name, name, "no such member")),
        }
        Ok(())
    }

    fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

// =============================================================================
// Record: generic structured object
// =============================================================================

/// Generic structured object exposing named properties and fields.
///
/// Used for payloads that are neither JSON trees nor known wrappers. Lookup
/// is case-insensitive and checks properties before fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    type_name: String,
    properties: IndexMap<String, Value>,
    fields: IndexMap<String, Value>,
    read_only: HashSet<String>,
}

impl Record {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            ..Default::default()
        }
    }

    /// Builds a record whose properties are the serialized fields of `value`.
    pub fn from_serialize<T: Serialize>(
        type_name: impl Into<String>,
        value: &T,
    ) -> Result<Self, serde_json::Error> {
        let Value::Object(map) = serde_json::to_value(value)? else {
            return Err(<serde_json::Error as serde::ser::Error>::custom(
                "record source must serialize to an object",
            ));
        };
        let mut record = Self::new(type_name);
        record.properties = map.into_iter().collect();
        Ok(record)
    }

    /// Deserializes the record's members back into a typed value.
    pub fn deserialize_into<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.to_value())
    }

    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Marks a member as read-only for path writes.
    #[must_use]
    pub fn read_only(mut self, name: impl Into<String>) -> Self {
        self.read_only.insert(name.into());
        self
    }

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

impl Navigable for Record {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn shape(&self) -> Shape {
        Shape::Record
    }

    fn member_names(&self) -> Vec<&str> {
        self.properties
            .keys()
            .chain(self.fields.keys())
            .map(String::as_str)
            .collect()
    }

    fn member(&self, name: &str) -> Option<Member<'_>> {
        self.properties
            .get(name)
            .or_else(|| self.fields.get(name))
            .map(|v| Member::Node(v as &dyn Navigable))
    }

    fn member_mut(&mut self, name: &str) -> Option<&mut dyn Navigable> {
        if self.properties.contains_key(name) {
            return self.properties.get_mut(name).map(|v| v as &mut dyn Navigable);
        }
        self.fields.get_mut(name).map(|v| v as &mut dyn Navigable)
    }

    fn set_member(&mut self, name: &str, value: Value) -> Result<(), PathError> {
        if self.read_only.contains(name) {
            return Err(PathError::not_writable(name, name, "member is read-only"));
        }
        let slot = self
            .properties
            .get_mut(name)
            .or_else(|| self.fields.get_mut(name))
            .ok_or_else(|| PathError::not_writable(name, name, "no such member"))?;
        *slot = value;
        Ok(())
    }

    fn to_value(&self) -> Value {
        let mut map = Map::new();
        for (name, value) in self.fields.iter().chain(self.properties.iter()) {
            map.insert(name.clone(), value.clone());
        }
        Value::Object(map)
    }
}
