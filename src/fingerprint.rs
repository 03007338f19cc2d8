// Copyright 2025 RustFS Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Stable content hashes of the desired node specification.
//!
//! Values are hashed in a canonical JSON form: object keys sorted, lists treated as
//! sets, and null, empty-list and empty-object values dropped. Two specs that differ only
//! in storage order of maps or lists hash the same.

use crate::types::v1beta1::ec2nodeclass::EC2NodeClassSpec;
use crate::types::v1beta1::nodepool::NodeClaimTemplate;
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

pub const NODE_POOL_HASH_VERSION: &str = "v1";
pub const NODE_CLASS_HASH_VERSION: &str = "v1";

const HASH_LEN: usize = 16;

/// Combined fingerprint of everything a claim is launched from.
pub fn fingerprint(
    node_class: &EC2NodeClassSpec,
    template: &NodeClaimTemplate,
) -> Result<String, serde_json::Error> {
    let value = serde_json::json!({
        "nodeClass": node_class,
        "template": template,
    });
    Ok(digest(&value))
}

/// Hash of the pool template fields that require new capacity when changed.
///
/// Requirements are excluded; a claim stays valid as long as its labels still
/// satisfy them.
pub fn node_pool_hash(template: &NodeClaimTemplate) -> Result<String, serde_json::Error> {
    let mut template = template.clone();
    template.spec.requirements.clear();
    hash(&template)
}

/// Hash of the node class fields that are applied at launch and never re-resolved.
///
/// Selector terms are excluded; their resolved results are compared directly.
pub fn node_class_hash(spec: &EC2NodeClassSpec) -> Result<String, serde_json::Error> {
    let mut spec = spec.clone();
    spec.subnet_selector_terms.clear();
    spec.security_group_selector_terms.clear();
    spec.ami_selector_terms.clear();
    hash(&spec)
}

pub fn hash<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    Ok(digest(&serde_json::to_value(value)?))
}

fn digest(value: &Value) -> String {
    let canonical = canonicalize(value.clone()).unwrap_or(Value::Null);
    let bytes = canonical.to_string();

    let digest = Sha256::digest(bytes.as_bytes());
    digest
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<String>()
        .chars()
        .take(HASH_LEN)
        .collect()
}

/// Returns `None` for values that carry no information.
fn canonicalize(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Array(items) => {
            let mut items: Vec<Value> = items.into_iter().filter_map(canonicalize).collect();
            if items.is_empty() {
                return None;
            }
            items.sort_by_cached_key(Value::to_string);
            items.dedup();
            Some(Value::Array(items))
        }
        Value::Object(fields) => {
            // sorted explicitly; `preserve_order` may be enabled elsewhere in the graph
            let fields: BTreeMap<String, Value> = fields
                .into_iter()
                .filter_map(|(k, v)| canonicalize(v).map(|v| (k, v)))
                .collect();
            let fields: Map<String, Value> = fields.into_iter().collect();
            if fields.is_empty() {
                None
            } else {
                Some(Value::Object(fields))
            }
        }
        other => Some(other),
    }
}
