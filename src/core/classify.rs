//! Document classifier: turns a raw YAML blob into the valid/invalid split.
//!
//! Parsing and classification are pure functions over document values; they
//! never touch the filesystem. The reconciler feeds them file contents and
//! acts on the returned buckets.

use crate::core::error::HnpError;
use crate::core::layout::ManagedKind;
use serde::Deserialize;
use serde_yaml_ng::Value;

/// A document that passed every classification rule.
#[derive(Debug, Clone)]
pub struct ValidCr {
    pub kind: ManagedKind,
    pub name: String,
    pub namespace: String,
    pub api_version: String,
    pub body: Value,
}

/// A document that failed classification, with the first violated rule.
#[derive(Debug, Clone)]
pub struct InvalidDoc {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct ClassificationResult {
    pub valid_crs: Vec<ValidCr>,
    pub invalid_docs: Vec<InvalidDoc>,
}

/// Parse a possibly multi-document YAML stream. Malformed YAML is
/// `HnpError::YamlInvalid` with the parser's message; null/empty documents
/// inside the stream are dropped silently.
pub fn parse_documents(content: &str) -> Result<Vec<Value>, HnpError> {
    let mut docs = Vec::new();
    for de in serde_yaml_ng::Deserializer::from_str(content) {
        let value = Value::deserialize(de).map_err(|e| HnpError::YamlInvalid(e.to_string()))?;
        if !value.is_null() {
            docs.push(value);
        }
    }
    Ok(docs)
}

/// Apply the classification rules per document, in order; the first failing
/// rule wins and records its reason.
pub fn classify(docs: &[Value], api_group: &str) -> ClassificationResult {
    let mut result = ClassificationResult::default();
    for (index, doc) in docs.iter().enumerate() {
        match classify_one(doc, api_group) {
            Ok(cr) => result.valid_crs.push(cr),
            Err(reason) => result.invalid_docs.push(InvalidDoc { index, reason }),
        }
    }
    result
}

/// Parse + classify in one step, for callers holding raw file content.
pub fn classify_content(content: &str, api_group: &str) -> Result<ClassificationResult, HnpError> {
    let docs = parse_documents(content)?;
    Ok(classify(docs.as_slice(), api_group))
}

fn classify_one(doc: &Value, api_group: &str) -> Result<ValidCr, String> {
    if doc.as_mapping().is_none() {
        return Err("not a mapping".to_string());
    }

    let api_version = doc.get("apiVersion").and_then(Value::as_str);
    let kind = doc.get("kind").and_then(Value::as_str);
    let metadata = doc.get("metadata");
    let (Some(api_version), Some(kind), Some(metadata)) = (api_version, kind, metadata) else {
        return Err("missing required fields".to_string());
    };

    if !api_version.contains(api_group) {
        return Err(format!("not a fabric CR: {}", api_version));
    }

    let name = metadata
        .get("name")
        .and_then(Value::as_str)
        .filter(|n| !n.trim().is_empty())
        .ok_or("invalid metadata: missing name")?;

    let kind = ManagedKind::from_kind(kind).ok_or_else(|| {
        // In-group but outside the managed set: there is no managed/
        // bucket to file it under.
        format!("unknown managed kind: {}", kind)
    })?;

    let namespace = metadata
        .get("namespace")
        .and_then(Value::as_str)
        .filter(|n| !n.trim().is_empty())
        .unwrap_or("default");

    Ok(ValidCr {
        kind,
        name: name.to_string(),
        namespace: namespace.to_string(),
        api_version: api_version.to_string(),
        body: doc.clone(),
    })
}
