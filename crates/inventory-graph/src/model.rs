//! The typed model: `Kind`s with named `Property`s, used to validate
//! incoming node payloads during ingestion.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use inventory_core::Error;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// A reference to a property's type: a primitive, an array of some other
/// type reference, or the fully-qualified name of another kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypeRef {
    Primitive(Primitive),
    Array(Box<TypeRef>),
    Kind(String),
}

/// Primitive scalar types recognized by the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Primitive {
    String,
    Int32,
    Int64,
    Float,
    Double,
    Boolean,
    Date,
    DateTime,
    Any,
}

impl Primitive {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "string" => Primitive::String,
            "int32" => Primitive::Int32,
            "int64" => Primitive::Int64,
            "float" => Primitive::Float,
            "double" => Primitive::Double,
            "boolean" => Primitive::Boolean,
            "date" => Primitive::Date,
            "datetime" => Primitive::DateTime,
            "any" => Primitive::Any,
            _ => return None,
        })
    }
}

/// A single named, typed property of a [`ComplexKind`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    pub kind: TypeRef,
    pub required: bool,
}

/// A complex kind: a named bag of typed properties, optionally extending
/// another kind (not modeled here beyond flat property lists — validation
/// only needs "kind required and recognized", not multi-level inheritance
/// resolution).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplexKind {
    pub fqn: String,
    pub properties: Vec<Property>,
}

impl ComplexKind {
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }
}

/// The full set of known kinds.
#[derive(Debug, Clone, Default)]
pub struct Model {
    kinds: HashMap<String, ComplexKind>,
}

impl Model {
    pub fn new() -> Self {
        Self {
            kinds: HashMap::new(),
        }
    }

    pub fn with_kind(mut self, kind: ComplexKind) -> Self {
        self.kinds.insert(kind.fqn.clone(), kind);
        self
    }

    pub fn kind(&self, fqn: &str) -> Option<&ComplexKind> {
        self.kinds.get(fqn)
    }

    /// Validate (and, where needed, coerce) a reported payload against its
    /// declared kind.
    ///
    /// Required properties must be present; date/datetime-typed string
    /// values are coerced into their canonical form. Returns the
    /// (possibly rewritten) payload.
    pub fn validate(&self, kind_fqn: &str, payload: &Json) -> Result<Json, Error> {
        let kind = self
            .kind(kind_fqn)
            .ok_or_else(|| Error::ModelViolation(format!("unknown kind '{kind_fqn}'")))?;

        let obj = payload
            .as_object()
            .ok_or_else(|| Error::ModelViolation("reported payload must be a JSON object".into()))?;

        for prop in &kind.properties {
            if prop.required && !obj.contains_key(&prop.name) {
                return Err(Error::ModelViolation(format!(
                    "kind '{kind_fqn}' requires property '{}'",
                    prop.name
                )));
            }
        }

        let mut out = obj.clone();
        for prop in &kind.properties {
            if let Some(value) = out.get(&prop.name).cloned() {
                let coerced = coerce_value(&prop.name, &prop.kind, value)?;
                out.insert(prop.name.clone(), coerced);
            }
        }
        Ok(Json::Object(out))
    }
}

fn coerce_value(name: &str, type_ref: &TypeRef, value: Json) -> Result<Json, Error> {
    match type_ref {
        TypeRef::Primitive(Primitive::Date) => coerce_date(name, value),
        TypeRef::Primitive(Primitive::DateTime) => coerce_datetime(name, value),
        TypeRef::Array(inner) => match value {
            Json::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(coerce_value(name, inner, item)?);
                }
                Ok(Json::Array(out))
            }
            other => Ok(other),
        },
        _ => Ok(value),
    }
}

fn coerce_date(name: &str, value: Json) -> Result<Json, Error> {
    let s = match &value {
        Json::String(s) => s.clone(),
        other => {
            return Err(Error::ModelViolation(format!(
                "property '{name}' must be a date string, got {other}"
            )))
        }
    };
    let parsed = NaiveDate::parse_from_str(&s, "%Y-%m-%d")
        .map_err(|_| Error::ModelViolation(format!("property '{name}' is not a valid date: {s}")))?;
    Ok(Json::String(parsed.format("%Y-%m-%d").to_string()))
}

fn coerce_datetime(name: &str, value: Json) -> Result<Json, Error> {
    let s = match &value {
        Json::String(s) => s.clone(),
        other => {
            return Err(Error::ModelViolation(format!(
                "property '{name}' must be a datetime string, got {other}"
            )))
        }
    };
    let parsed: DateTime<Utc> = DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| Error::ModelViolation(format!("property '{name}' is not a valid datetime: {s}")))?;
    Ok(Json::String(parsed.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)))
}

/// Lifecycle flags carried by every node, separate from its reported and
/// desired payloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMetadata {
    pub protected: bool,
    pub phantom: bool,
    pub cleaned: bool,
}
