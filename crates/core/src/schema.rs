//! Declarative parameter schemas for tools.
//!
//! A [`ParamSchema`] lists the fields a tool accepts and checks incoming JSON
//! parameters against them before the capability runs.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;

/// JSON shape expected for a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
    Any,
}

impl FieldKind {
    fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::Any => true,
        }
    }

    fn json_type(&self) -> Option<&'static str> {
        match self {
            Self::String => Some("string"),
            Self::Integer => Some("integer"),
            Self::Number => Some("number"),
            Self::Boolean => Some("boolean"),
            Self::Object => Some("object"),
            Self::Array => Some("array"),
            Self::Any => None,
        }
    }
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Upper bound on string length in characters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    /// Closed set of accepted string values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<String>>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, kind: FieldKind, required: bool) -> Self {
        Self {
            name: name.into(),
            kind,
            required,
            description: None,
            max_length: None,
            allowed: None,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn max_length(mut self, max: usize) -> Self {
        self.max_length = Some(max);
        self
    }

    pub fn one_of<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed = Some(values.into_iter().map(Into::into).collect());
        self
    }
}

/// A single schema mismatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaViolation {
    pub field: String,
    pub message: String,
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Declarative validator for a tool's parameter object.
///
/// An empty schema accepts any object. Undeclared fields are accepted unless
/// the schema is marked [`strict`](ParamSchema::strict).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSchema {
    pub fields: Vec<FieldSpec>,
    pub allow_unknown: bool,
}

impl Default for ParamSchema {
    fn default() -> Self {
        Self::new()
    }
}

impl ParamSchema {
    pub fn new() -> Self {
        Self {
            fields: Vec::new(),
            allow_unknown: true,
        }
    }

    pub fn required(self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.field(FieldSpec::new(name, kind, true))
    }

    pub fn optional(self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.field(FieldSpec::new(name, kind, false))
    }

    pub fn field(mut self, spec: FieldSpec) -> Self {
        self.fields.retain(|f| f.name != spec.name);
        self.fields.push(spec);
        self
    }

    /// Reject fields that are not declared.
    pub fn strict(mut self) -> Self {
        self.allow_unknown = false;
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Check `params` against the schema, collecting every violation.
    ///
    /// `null` is treated as an empty object.
    pub fn validate(&self, params: &Value) -> std::result::Result<(), Vec<SchemaViolation>> {
        let empty = Map::new();
        let object = match params {
            Value::Object(map) => map,
            Value::Null => &empty,
            other => {
                return Err(vec![SchemaViolation {
                    field: "$".to_string(),
                    message: format!("expected object, got {}", type_name(other)),
                }])
            }
        };

        let mut violations = Vec::new();
        for spec in &self.fields {
            match object.get(&spec.name) {
                None | Some(Value::Null) => {
                    if spec.required {
                        violations.push(SchemaViolation {
                            field: spec.name.clone(),
                            message: "required field is missing".to_string(),
                        });
                    }
                }
                Some(value) => check_field(spec, value, &mut violations),
            }
        }

        if !self.allow_unknown {
            for key in object.keys() {
                if self.get(key).is_none() {
                    violations.push(SchemaViolation {
                        field: key.clone(),
                        message: "unknown field".to_string(),
                    });
                }
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }

    /// Render as a JSON Schema object, e.g. for tool listings.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for spec in &self.fields {
            let mut prop = Map::new();
            if let Some(ty) = spec.kind.json_type() {
                prop.insert("type".into(), json!(ty));
            }
            if let Some(ref desc) = spec.description {
                prop.insert("description".into(), json!(desc));
            }
            if let Some(max) = spec.max_length {
                prop.insert("maxLength".into(), json!(max));
            }
            if let Some(ref allowed) = spec.allowed {
                prop.insert("enum".into(), json!(allowed));
            }
            properties.insert(spec.name.clone(), Value::Object(prop));
            if spec.required {
                required.push(spec.name.clone());
            }
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": self.allow_unknown,
        })
    }
}

fn check_field(spec: &FieldSpec, value: &Value, violations: &mut Vec<SchemaViolation>) {
    if !spec.kind.matches(value) {
        violations.push(SchemaViolation {
            field: spec.name.clone(),
            message: format!(
                "expected {}, got {}",
                spec.kind.json_type().unwrap_or("any"),
                type_name(value)
            ),
        });
        return;
    }
    let Some(text) = value.as_str() else {
        return;
    };
    if let Some(max) = spec.max_length {
        let len = text.chars().count();
        if len > max {
            violations.push(SchemaViolation {
                field: spec.name.clone(),
                message: format!("length {} exceeds maximum {}", len, max),
            });
        }
    }
    if let Some(ref allowed) = spec.allowed {
        if !allowed.iter().any(|a| a == text) {
            violations.push(SchemaViolation {
                field: spec.name.clone(),
                message: format!("must be one of [{}]", allowed.join(", ")),
            });
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
