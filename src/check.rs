//! Request validation.
//!
//! A [`Check`] validates one part of the request against a JSON Schema and, on
//! failure, ends the request with a 400 before the service runs. Schema
//! evaluation is `jsonschema`'s; this module picks what to validate, coerces
//! text inputs, and names the error.
//!
//! | Target | Error name | Unknown fields |
//! |---|---|---|
//! | `params` | `InvalidUrlParameters` | rejected |
//! | `query` | `InvalidQueryParameters` | rejected |
//! | `headers` | `InvalidHeaders` | allowed |
//! | `body` | `InvalidBody` | rejected |
//! | `all` | `InvalidRequest` | allowed |
//!
//! Params, query and headers arrive as text. Before validation, string values
//! whose schema property is `integer`, `number` or `boolean` are converted, and
//! for params and query the converted values replace the originals.

use std::fmt;
use std::sync::Arc;

use jsonschema::Validator;
use serde_json::Value;

use crate::app_error::ApplicationError;
use crate::error::Error;
use crate::middleware::Twig;
use crate::request::Request;

const CHECK_FAILED: u16 = 400;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Target {
    Params,
    Query,
    Headers,
    Body,
    /// Params, headers, query and body merged (later wins). Read-only.
    All,
}

impl Target {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Params  => "params",
            Self::Query   => "query",
            Self::Headers => "headers",
            Self::Body    => "body",
            Self::All     => "all",
        }
    }

    pub fn error_name(self) -> &'static str {
        match self {
            Self::Params  => "InvalidUrlParameters",
            Self::Query   => "InvalidQueryParameters",
            Self::Headers => "InvalidHeaders",
            Self::Body    => "InvalidBody",
            Self::All     => "InvalidRequest",
        }
    }

    pub fn allows_unknown_by_default(self) -> bool {
        matches!(self, Self::Headers | Self::All)
    }

    fn arrives_as_text(self) -> bool {
        !matches!(self, Self::Body)
    }
}

#[derive(Clone)]
pub struct Check {
    target: Target,
    schema: Value,
    allow_unknown: bool,
    validator: Arc<Validator>,
}

impl fmt::Debug for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Check")
            .field("target", &self.target)
            .field("allow_unknown", &self.allow_unknown)
            .finish_non_exhaustive()
    }
}

impl Check {
    pub fn new(target: Target, schema: Value) -> Result<Self, Error> {
        Self::compile(target, schema, target.allows_unknown_by_default())
    }

    pub fn params(schema: Value) -> Result<Self, Error> { Self::new(Target::Params, schema) }
    pub fn query(schema: Value) -> Result<Self, Error> { Self::new(Target::Query, schema) }
    pub fn headers(schema: Value) -> Result<Self, Error> { Self::new(Target::Headers, schema) }
    pub fn body(schema: Value) -> Result<Self, Error> { Self::new(Target::Body, schema) }
    pub fn all(schema: Value) -> Result<Self, Error> { Self::new(Target::All, schema) }

    /// Overrides the target's default unknown-field policy. Only affects
    /// object schemas that do not set `additionalProperties` themselves.
    pub fn allow_unknown(self, allow: bool) -> Result<Self, Error> {
        Self::compile(self.target, self.schema, allow)
    }

    pub fn target(&self) -> Target { self.target }

    fn compile(target: Target, schema: Value, allow_unknown: bool) -> Result<Self, Error> {
        let effective = if allow_unknown { schema.clone() } else { closed(&schema) };
        let validator = jsonschema::validator_for(&effective)
            .map_err(|e| Error::Schema { target: target.as_str(), reason: e.to_string() })?;
        Ok(Self { target, schema, allow_unknown, validator: Arc::new(validator) })
    }

    /// Validates `instance` in place, coercing text first when the target
    /// arrives as text.
    pub fn validate(&self, instance: &mut Value) -> Result<(), ApplicationError> {
        if self.target.arrives_as_text() {
            coerce(instance, &self.schema);
        }
        let messages: Vec<String> = self
            .validator
            .iter_errors(instance)
            .map(|e| e.to_string())
            .collect();
        if messages.is_empty() {
            Ok(())
        } else {
            Err(ApplicationError::with_code(
                self.target.error_name(),
                messages.join("; "),
                CHECK_FAILED,
            ))
        }
    }
}

impl Twig for Check {
    fn apply(&self, req: &mut Request) -> Result<(), ApplicationError> {
        let mut instance = match self.target {
            Target::Params  => Value::Object(req.params.clone()),
            Target::Query   => Value::Object(req.query.clone()),
            Target::Headers => Value::Object(req.headers_json()),
            Target::Body    => req.body.clone(),
            Target::All     => {
                let mut all = req.params.clone();
                all.extend(req.headers_json());
                all.extend(req.query.iter().map(|(k, v)| (k.clone(), v.clone())));
                if let Value::Object(body) = &req.body {
                    all.extend(body.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
                Value::Object(all)
            }
        };

        self.validate(&mut instance)?;

        match (self.target, instance) {
            (Target::Params, Value::Object(map)) => req.params = map,
            (Target::Query, Value::Object(map)) => req.query = map,
            _ => {}
        }
        Ok(())
    }
}

/// Adds `"additionalProperties": false` to an object schema that is silent on it.
fn closed(schema: &Value) -> Value {
    let mut schema = schema.clone();
    if let Value::Object(map) = &mut schema {
        let is_object_schema = map.contains_key("properties")
            || map.get("type").and_then(Value::as_str) == Some("object");
        if is_object_schema && !map.contains_key("additionalProperties") {
            map.insert("additionalProperties".to_owned(), Value::Bool(false));
        }
    }
    schema
}

/// Converts string fields to the scalar type their schema property declares.
fn coerce(instance: &mut Value, schema: &Value) {
    let (Value::Object(fields), Some(Value::Object(props))) = (instance, schema.get("properties")) else {
        return;
    };
    for (name, value) in fields.iter_mut() {
        let Value::String(text) = value else { continue };
        let Some(prop) = props.get(name) else { continue };
        if let Some(converted) = convert(text, declared_types(prop)) {
            *value = converted;
        }
    }
}

fn declared_types(prop: &Value) -> Vec<&str> {
    match prop.get("type") {
        Some(Value::String(t)) => vec![t.as_str()],
        Some(Value::Array(ts)) => ts.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}

fn convert(text: &str, types: Vec<&str>) -> Option<Value> {
    if types.contains(&"string") {
        return None;
    }
    for ty in types {
        let converted = match ty {
            "integer" => text.trim().parse::<i64>().ok().map(Value::from),
            "number"  => text.trim().parse::<f64>().ok().and_then(|n| serde_json::Number::from_f64(n).map(Value::Number)),
            "boolean" => match text.trim() {
                "true"  => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            },
            _ => None,
        };
        if converted.is_some() {
            return converted;
        }
    }
    None
}
