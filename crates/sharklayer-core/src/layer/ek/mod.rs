//! Layers decoded from the Elasticsearch bulk encoding (`-T ek`).
//!
//! EK flattens every field to one underscore-joined key (`ip_ip_src`,
//! `tcp_tcp_flags_syn`). Lookups rebuild the hierarchy by trying the layer's
//! prefix candidates; a key that has further `_`-suffixed siblings comes back
//! as an [`EkMultiField`] so its subfields stay reachable.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::{FieldValue, Layer};

pub mod mapping;

#[derive(Debug, Clone)]
pub struct EkLayer {
    name: String,
    fields: Arc<BTreeMap<String, Value>>,
}

impl EkLayer {
    pub fn new(name: impl Into<String>, fields: BTreeMap<String, Value>) -> Self {
        Self {
            name: name.into(),
            fields: Arc::new(fields),
        }
    }

    /// Undecoded keys and values.
    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    /// Prefixes tried during lookup, longest first.
    fn prefixes(&self) -> Vec<String> {
        let name = self.name.as_str();
        let mut prefixes = vec![format!("{name}_{name}"), name.to_string()];
        let aliases: &[&str] = match name {
            "ip" => &["ip_src", "ip_dst"],
            "tcp" => &["tcp_srcport", "tcp_dstport"],
            "udp" => &["udp_srcport", "udp_dstport"],
            "http" => &["http_request", "http_response"],
            "dns" => &["dns_query", "dns_response"],
            _ => &[],
        };
        prefixes.extend(aliases.iter().map(|alias| alias.to_string()));
        prefixes.sort_by_key(|prefix| std::cmp::Reverse(prefix.len()));
        prefixes
    }

    fn value_of(&self, key: &str) -> Option<FieldValue> {
        self.fields
            .get(key)
            .map(|value| mapping::cast_value(&self.name, key, value))
    }

    fn has_subfields(&self, key: &str) -> bool {
        let prefix = format!("{key}_");
        self.fields
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(candidate, _)| candidate.starts_with(&prefix))
    }

    fn nested_field(&self, prefix: &str, name: &str) -> Option<FieldValue> {
        let key = format!("{prefix}_{name}");
        if self.fields.contains_key(&key) {
            let value = self.value_of(&key);
            if self.has_subfields(&key) {
                return Some(FieldValue::MultiField(EkMultiField::new(
                    self.clone(),
                    name,
                    value,
                )));
            }
            return value;
        }
        if self.has_subfields(&key) {
            return Some(FieldValue::MultiField(EkMultiField::new(
                self.clone(),
                name,
                None,
            )));
        }
        None
    }

    /// Every key with its layer prefix removed, subfields included.
    pub fn all_field_names(&self) -> Vec<String> {
        let prefixes = self.prefixes();
        let mut seen = HashSet::new();
        let mut names = Vec::new();
        for key in self.fields.keys() {
            let name = prefixes
                .iter()
                .find_map(|prefix| key.strip_prefix(&format!("{prefix}_")))
                .unwrap_or(key);
            if seen.insert(name.to_string()) {
                names.push(name.to_string());
            }
        }
        names
    }
}

impl Layer for EkLayer {
    fn layer_name(&self) -> &str {
        &self.name
    }

    fn get_field(&self, name: &str) -> Option<FieldValue> {
        if self.fields.contains_key(name) {
            return self.value_of(name);
        }
        let name = name.replace('.', "_");
        if self.fields.contains_key(&name) {
            return self.value_of(&name);
        }
        self.prefixes()
            .iter()
            .find_map(|prefix| self.nested_field(prefix, &name))
    }

    /// Top-level names: the first `_` segment of each prefix-stripped key.
    fn field_names(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.all_field_names()
            .into_iter()
            .filter_map(|name| {
                let head = name.split('_').next().unwrap_or_default().to_string();
                seen.insert(head.clone()).then_some(head)
            })
            .collect()
    }

    fn has_field(&self, name: &str) -> bool {
        self.get_field(name).is_some()
    }
}

/// An EK field that also has underscore-joined subfields.
#[derive(Debug, Clone)]
pub struct EkMultiField {
    layer: EkLayer,
    full_name: String,
    value: Option<Box<FieldValue>>,
}

impl EkMultiField {
    fn new(layer: EkLayer, full_name: &str, value: Option<FieldValue>) -> Self {
        Self {
            layer,
            full_name: full_name.to_string(),
            value: value.map(Box::new),
        }
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Value of the field itself, when EK stored one next to the subfields.
    pub fn value(&self) -> Option<&FieldValue> {
        self.value.as_deref()
    }

    pub fn get_field(&self, name: &str) -> Option<FieldValue> {
        let name = name.replace('.', "_");
        self.layer.get_field(&format!("{}_{}", self.full_name, name))
    }

    /// Names one level below this field.
    pub fn subfields(&self) -> Vec<String> {
        let prefix = format!("{}_", self.full_name);
        self.layer
            .all_field_names()
            .into_iter()
            .filter_map(|name| name.strip_prefix(&prefix).map(str::to_string))
            .filter(|name| !name.contains('_'))
            .collect()
    }
}

impl fmt::Display for EkMultiField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{value}"),
            None => write!(f, "<EKMultiField {}>", self.full_name),
        }
    }
}
