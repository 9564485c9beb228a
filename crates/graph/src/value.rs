//! Input values and the expression encoding used in desired-state documents.
//!
//! A [`Value`] is either a literal or an expression over other resources'
//! outputs. In a document, expressions are single-key JSON objects:
//!
//! | expression | encoding |
//! |------------|----------|
//! | reference | `{"$ref": "vpc.id"}` |
//! | concatenation | `{"$concat": [..]}` |
//! | URL encoding | `{"$urlencode": v}` |
//! | prefix trimming | `{"$trimPrefix": {"value": v, "prefix": "https://"}}` |
//! | JSON stringify | `{"$json": v}` |
//!
//! Literal map keys that start with `$` are escaped as `$$key`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Serialize, Serializer};
use serde_json::{Map, Value as Json};

use crate::graph::ResourceId;

const REF: &str = "$ref";
const CONCAT: &str = "$concat";
const URL_ENCODE: &str = "$urlencode";
const TRIM_PREFIX: &str = "$trimPrefix";
const JSON: &str = "$json";

/// Reference to one output attribute of a declared resource.
///
/// Only [`Handle`](crate::Handle) can mint these, so every reference in a graph
/// was obtained from an actual declaration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputRef {
    resource: ResourceId,
    attr: String,
}

impl OutputRef {
    pub(crate) fn new(resource: ResourceId, attr: impl Into<String>) -> Self {
        Self {
            resource,
            attr: attr.into(),
        }
    }

    /// Resource that produces the output.
    #[must_use]
    pub fn resource(&self) -> &ResourceId {
        &self.resource
    }

    /// Output attribute name.
    #[must_use]
    pub fn attr(&self) -> &str {
        &self.attr
    }

    fn parse(token: &str) -> Result<Self, String> {
        let (resource, attr) = token
            .split_once('.')
            .ok_or_else(|| format!("reference '{token}' is not of the form resource.attr"))?;
        if attr.is_empty() {
            return Err(format!("reference '{token}' has an empty attribute"));
        }
        let resource = ResourceId::new(resource).map_err(|e| e.to_string())?;
        Ok(Self::new(resource, attr))
    }
}

impl fmt::Display for OutputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource, self.attr)
    }
}

/// A resource input: a literal or an expression over outputs.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    /// Output of another resource.
    Ref(OutputRef),
    /// String concatenation of the parts.
    Concat(Vec<Value>),
    /// Percent-encode the resolved string.
    UrlEncode(Box<Value>),
    /// Strip a prefix from the resolved string when present.
    TrimPrefix { value: Box<Value>, prefix: String },
    /// Serialize the resolved value as a JSON string.
    Json(Box<Value>),
}

impl Value {
    /// Build a map value from key/value pairs.
    pub fn object<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self::Map(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Build a list value.
    pub fn list<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::List(items.into_iter().map(Into::into).collect())
    }

    /// Concatenate the parts into one string once resolved.
    pub fn concat<I, V>(parts: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::Concat(parts.into_iter().map(Into::into).collect())
    }

    /// Percent-encode the value once resolved.
    pub fn url_encode(value: impl Into<Value>) -> Self {
        Self::UrlEncode(Box::new(value.into()))
    }

    /// Strip `prefix` from the value once resolved.
    pub fn trim_prefix(value: impl Into<Value>, prefix: impl Into<String>) -> Self {
        Self::TrimPrefix {
            value: Box::new(value.into()),
            prefix: prefix.into(),
        }
    }

    /// Serialize the value to a JSON string once resolved.
    pub fn json(value: impl Into<Value>) -> Self {
        Self::Json(Box::new(value.into()))
    }

    /// Whether the value contains any output reference.
    #[must_use]
    pub fn is_literal(&self) -> bool {
        match self {
            Self::Ref(_) => false,
            Self::List(items) | Self::Concat(items) => items.iter().all(Self::is_literal),
            Self::Map(map) => map.values().all(Self::is_literal),
            Self::UrlEncode(v) | Self::Json(v) | Self::TrimPrefix { value: v, .. } => {
                v.is_literal()
            }
            Self::Null | Self::Bool(_) | Self::Int(_) | Self::Str(_) => true,
        }
    }

    /// Encode the value in document form.
    #[must_use]
    pub fn to_json(&self) -> Json {
        match self {
            Self::Null => Json::Null,
            Self::Bool(b) => Json::Bool(*b),
            Self::Int(i) => Json::from(*i),
            Self::Str(s) => Json::String(s.clone()),
            Self::List(items) => Json::Array(items.iter().map(Self::to_json).collect()),
            Self::Map(map) => Json::Object(
                map.iter()
                    .map(|(k, v)| (escape_key(k), v.to_json()))
                    .collect(),
            ),
            Self::Ref(r) => single(REF, Json::String(r.to_string())),
            Self::Concat(parts) => {
                single(CONCAT, Json::Array(parts.iter().map(Self::to_json).collect()))
            }
            Self::UrlEncode(v) => single(URL_ENCODE, v.to_json()),
            Self::TrimPrefix { value, prefix } => {
                let mut body = Map::new();
                body.insert("value".into(), value.to_json());
                body.insert("prefix".into(), Json::String(prefix.clone()));
                single(TRIM_PREFIX, Json::Object(body))
            }
            Self::Json(v) => single(JSON, v.to_json()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Self::Str(s.clone())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<u16> for Value {
    fn from(i: u16) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<u8> for Value {
    fn from(i: u8) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<OutputRef> for Value {
    fn from(r: OutputRef) -> Self {
        Self::Ref(r)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

impl<T: Into<Value>> From<BTreeMap<String, T>> for Value {
    fn from(map: BTreeMap<String, T>) -> Self {
        Self::Map(map.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

fn single(key: &str, body: Json) -> Json {
    let mut map = Map::new();
    map.insert(key.to_string(), body);
    Json::Object(map)
}

fn escape_key(key: &str) -> String {
    if key.starts_with('$') {
        format!("${key}")
    } else {
        key.to_string()
    }
}

fn unescape_key(key: &str) -> Result<String, String> {
    match key.strip_prefix("$$") {
        Some(rest) => Ok(format!("${rest}")),
        None if key.starts_with('$') => Err(format!("unknown expression '{key}'")),
        None => Ok(key.to_string()),
    }
}

/// A decoded expression node.
enum Expr<'a> {
    Ref(&'a str),
    Concat(&'a [Json]),
    UrlEncode(&'a Json),
    TrimPrefix(&'a Json, &'a str),
    Json(&'a Json),
}

fn expr(map: &Map<String, Json>) -> Result<Option<Expr<'_>>, String> {
    if map.len() != 1 {
        return Ok(None);
    }
    let Some((key, body)) = map.iter().next() else {
        return Ok(None);
    };
    let decoded = match key.as_str() {
        REF => Expr::Ref(
            body.as_str()
                .ok_or_else(|| "$ref must be a string".to_string())?,
        ),
        CONCAT => Expr::Concat(
            body.as_array()
                .ok_or_else(|| "$concat must be an array".to_string())?,
        ),
        URL_ENCODE => Expr::UrlEncode(body),
        TRIM_PREFIX => {
            let value = body
                .get("value")
                .ok_or_else(|| "$trimPrefix requires value".to_string())?;
            let prefix = body
                .get("prefix")
                .and_then(Json::as_str)
                .ok_or_else(|| "$trimPrefix requires a string prefix".to_string())?;
            Expr::TrimPrefix(value, prefix)
        }
        JSON => Expr::Json(body),
        _ => return Ok(None),
    };
    Ok(Some(decoded))
}

/// Collect every output reference in a document-form value.
///
/// # Errors
/// Returns a description of the first malformed expression.
pub fn references(doc: &Json) -> Result<BTreeSet<OutputRef>, String> {
    let mut refs = BTreeSet::new();
    collect(doc, &mut refs)?;
    Ok(refs)
}

fn collect(doc: &Json, refs: &mut BTreeSet<OutputRef>) -> Result<(), String> {
    match doc {
        Json::Array(items) => items.iter().try_for_each(|item| collect(item, refs)),
        Json::Object(map) => match expr(map)? {
            Some(Expr::Ref(token)) => {
                refs.insert(OutputRef::parse(token)?);
                Ok(())
            }
            Some(Expr::Concat(parts)) => parts.iter().try_for_each(|p| collect(p, refs)),
            Some(Expr::UrlEncode(v) | Expr::TrimPrefix(v, _) | Expr::Json(v)) => collect(v, refs),
            None => map.iter().try_for_each(|(k, v)| {
                unescape_key(k)?;
                collect(v, refs)
            }),
        },
        _ => Ok(()),
    }
}

/// Resolve a document-form value against known outputs.
///
/// # Errors
/// Returns a description when a referenced output is unknown or an expression
/// is malformed.
pub fn resolve<F>(doc: &Json, lookup: &mut F) -> Result<Json, String>
where
    F: FnMut(&OutputRef) -> Option<Json>,
{
    render(doc, lookup, false)
}

/// Render a document-form value for display.
///
/// Outputs that `lookup` cannot supply are shown as `${resource.attr}`.
#[must_use]
pub fn preview<F>(doc: &Json, lookup: &mut F) -> Json
where
    F: FnMut(&OutputRef) -> Option<Json>,
{
    render(doc, lookup, true).unwrap_or_else(|e| Json::String(format!("<{e}>")))
}

fn render<F>(doc: &Json, lookup: &mut F, placeholder: bool) -> Result<Json, String>
where
    F: FnMut(&OutputRef) -> Option<Json>,
{
    match doc {
        Json::Array(items) => items
            .iter()
            .map(|item| render(item, lookup, placeholder))
            .collect::<Result<Vec<_>, _>>()
            .map(Json::Array),
        Json::Object(map) => match expr(map)? {
            Some(Expr::Ref(token)) => {
                let r = OutputRef::parse(token)?;
                match lookup(&r) {
                    Some(v) => Ok(v),
                    None if placeholder => Ok(Json::String(format!("${{{r}}}"))),
                    None => Err(format!("output {r} is not known")),
                }
            }
            Some(Expr::Concat(parts)) => {
                let mut out = String::new();
                for part in parts {
                    out.push_str(&scalar(&render(part, lookup, placeholder)?)?);
                }
                Ok(Json::String(out))
            }
            Some(Expr::UrlEncode(v)) => {
                let s = scalar(&render(v, lookup, placeholder)?)?;
                if placeholder && s.contains("${") {
                    Ok(Json::String(format!("${{urlencode({s})}}")))
                } else {
                    Ok(Json::String(urlencoding::encode(&s).into_owned()))
                }
            }
            Some(Expr::TrimPrefix(v, prefix)) => {
                let s = scalar(&render(v, lookup, placeholder)?)?;
                Ok(Json::String(
                    s.strip_prefix(prefix).unwrap_or(&s).to_string(),
                ))
            }
            Some(Expr::Json(v)) => {
                let resolved = render(v, lookup, placeholder)?;
                serde_json::to_string(&resolved)
                    .map(Json::String)
                    .map_err(|e| e.to_string())
            }
            None => {
                let mut out = Map::new();
                for (k, v) in map {
                    out.insert(unescape_key(k)?, render(v, lookup, placeholder)?);
                }
                Ok(Json::Object(out))
            }
        },
        other => Ok(other.clone()),
    }
}

fn scalar(v: &Json) -> Result<String, String> {
    match v {
        Json::String(s) => Ok(s.clone()),
        Json::Number(n) => Ok(n.to_string()),
        Json::Bool(b) => Ok(b.to_string()),
        other => Err(format!("expected a scalar in string expression, got {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vpc_id() -> OutputRef {
        OutputRef::new(ResourceId::new("vpc").unwrap(), "id")
    }

    #[test]
    fn test_ref_encoding() {
        let v = Value::from(vpc_id());
        assert_eq!(v.to_json(), json!({"$ref": "vpc.id"}));
        assert!(!v.is_literal());
    }

    #[test]
    fn test_references_nested() {
        let v = Value::object([
            ("vpc_id", Value::from(vpc_id())),
            (
                "name",
                Value::concat([Value::from("subnet-"), Value::from(vpc_id())]),
            ),
        ]);
        let refs = references(&v.to_json()).unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs.iter().next().unwrap().attr(), "id");
    }

    #[test]
    fn test_resolve_concat_and_json() {
        let v = Value::json(Value::object([(
            "arn",
            Value::concat([Value::from("arn:aws:ec2:::vpc/"), Value::from(vpc_id())]),
        )]));
        let mut lookup = |_: &OutputRef| Some(json!("vpc-123"));
        let resolved = resolve(&v.to_json(), &mut lookup).unwrap();
        assert_eq!(resolved, json!(r#"{"arn":"arn:aws:ec2:::vpc/vpc-123"}"#));
    }

    #[test]
    fn test_resolve_unknown_output_fails() {
        let mut lookup = |_: &OutputRef| None;
        let err = resolve(&Value::from(vpc_id()).to_json(), &mut lookup).unwrap_err();
        assert!(err.contains("vpc.id"));
    }

    #[test]
    fn test_url_encode_and_trim_prefix() {
        let v = Value::concat([
            Value::url_encode("p@ss:w/rd"),
            Value::from("|"),
            Value::trim_prefix("https://oidc.example/abc", "https://"),
        ]);
        let mut lookup = |_: &OutputRef| None;
        let resolved = resolve(&v.to_json(), &mut lookup).unwrap();
        assert_eq!(resolved, json!("p%40ss%3Aw%2Frd|oidc.example/abc"));
    }

    #[test]
    fn test_preview_placeholders() {
        let v = Value::concat([Value::from("postgresql://u:"), Value::url_encode(vpc_id())]);
        let mut lookup = |_: &OutputRef| None;
        assert_eq!(
            preview(&v.to_json(), &mut lookup),
            json!("postgresql://u:${urlencode(${vpc.id})}")
        );
    }

    #[test]
    fn test_dollar_keys_are_escaped() {
        let v = Value::object([("$schema", Value::from("x"))]);
        let doc = v.to_json();
        assert_eq!(doc, json!({"$$schema": "x"}));
        assert!(references(&doc).unwrap().is_empty());
        let mut lookup = |_: &OutputRef| None;
        assert_eq!(resolve(&doc, &mut lookup).unwrap(), json!({"$schema": "x"}));
    }

    #[test]
    fn test_malformed_reference() {
        let doc = json!({"$ref": "no-attribute"});
        assert!(references(&doc).is_err());
    }
}
