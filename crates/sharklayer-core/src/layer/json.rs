//! Layers decoded from the `-T json` encoding.
//!
//! Keys are dotted (`ip.src`), values may be strings, nested objects
//! (`tcp.flags_tree`) or arrays when a protocol occurs more than once.
//! Nested objects come back as sub-layers and are memoized so repeated
//! lookups hand out the same `Arc`.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Map, Value};

use super::{FieldValue, Layer, sanitize_field_name};

pub struct JsonLayer {
    name: String,
    full_name: String,
    intermediate: bool,
    fields: Map<String, Value>,
    value: Option<Value>,
    duplicates: Vec<JsonLayer>,
    wrapped: RwLock<HashMap<String, FieldValue>>,
}

impl JsonLayer {
    /// Build a layer from its JSON value.
    ///
    /// An array means the protocol occurred several times: the first element
    /// becomes this layer and the rest are kept as duplicates.
    pub fn new(name: impl Into<String>, data: Value) -> Self {
        let name = name.into();
        let full_name = name.clone();
        Self::with_full_name(name, data, full_name, false)
    }

    pub(crate) fn with_full_name(
        name: String,
        data: Value,
        full_name: String,
        intermediate: bool,
    ) -> Self {
        let mut layer = Self {
            name,
            full_name,
            intermediate,
            fields: Map::new(),
            value: None,
            duplicates: Vec::new(),
            wrapped: RwLock::new(HashMap::new()),
        };
        match data {
            Value::Object(fields) => layer.fields = fields,
            Value::Array(items) => {
                let mut items = items.into_iter();
                match items.next() {
                    Some(Value::Object(fields)) => layer.fields = fields,
                    Some(Value::Null) | None => {}
                    Some(other) => layer.value = Some(other),
                }
                layer.duplicates = items
                    .map(|item| {
                        JsonLayer::with_full_name(
                            layer.name.clone(),
                            item,
                            layer.full_name.clone(),
                            intermediate,
                        )
                    })
                    .collect();
            }
            Value::Null => {}
            other => layer.value = Some(other),
        }
        layer
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Synthetic grouping layer built from a shared key prefix.
    pub fn is_intermediate(&self) -> bool {
        self.intermediate
    }

    /// Further occurrences of the same protocol in one packet.
    pub fn duplicates(&self) -> &[JsonLayer] {
        &self.duplicates
    }

    /// Scalar payload when the layer was not an object.
    pub fn value(&self) -> Option<FieldValue> {
        self.value.as_ref().map(FieldValue::from_json_scalar)
    }

    /// Undecoded key/value pairs.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    fn lookup(&self, name: &str) -> Option<(&String, &Value)> {
        if let Some(entry) = self.fields.get_key_value(name) {
            return Some(entry);
        }
        let qualified = format!("{}.{}", self.full_name, name);
        if let Some(entry) = self.fields.get_key_value(&qualified) {
            return Some(entry);
        }
        let prefix = format!("{}.", self.full_name);
        let wanted = name.replace(['.', '-'], "_");
        self.fields
            .iter()
            .find(|(key, _)| {
                let stripped = key.strip_prefix(&prefix).unwrap_or(key);
                stripped.eq_ignore_ascii_case(name)
                    || sanitize_field_name(key, &prefix).eq_ignore_ascii_case(&wanted)
            })
            .or_else(|| {
                // Nested trees keep the protocol prefix (`dns.qry.name` under `Queries`).
                self.fields.iter().find(|(key, _)| {
                    key.split_once('.').is_some_and(|(_, rest)| {
                        sanitize_field_name(rest, "").eq_ignore_ascii_case(&wanted)
                    })
                })
            })
    }

    /// Depth-first lookup through this layer and its nested sub-layers.
    pub fn find_field(&self, name: &str) -> Option<FieldValue> {
        if let Some(value) = self.get_field(name) {
            return Some(value);
        }
        self.fields
            .iter()
            .filter(|(_, value)| is_nested(value))
            .find_map(|(key, value)| match self.wrap(key, value) {
                FieldValue::Layer(nested) => nested.find_field(name),
                _ => None,
            })
    }

    fn wrap(&self, key: &str, value: &Value) -> FieldValue {
        match value {
            Value::Object(_) | Value::Array(_) if is_nested(value) => {
                let nested_full = key.strip_suffix("_tree").unwrap_or(key);
                let short = nested_full
                    .strip_prefix(&format!("{}.", self.full_name))
                    .unwrap_or(nested_full);
                FieldValue::Layer(Arc::new(JsonLayer::with_full_name(
                    short.to_string(),
                    value.clone(),
                    nested_full.to_string(),
                    false,
                )))
            }
            scalar => FieldValue::from_json_scalar(scalar),
        }
    }

    /// Group `prefix.*` keys into an intermediate layer.
    fn intermediate_for(&self, name: &str) -> Option<FieldValue> {
        let candidates = [format!("{}.{}", self.full_name, name), name.to_string()];
        for group in candidates {
            let prefix = format!("{group}.");
            let subset: Map<String, Value> = self
                .fields
                .iter()
                .filter(|(key, _)| key.starts_with(&prefix))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            if !subset.is_empty() {
                return Some(FieldValue::Layer(Arc::new(JsonLayer::with_full_name(
                    name.to_string(),
                    Value::Object(subset),
                    group,
                    true,
                ))));
            }
        }
        None
    }
}

/// Arrays of scalars are plain multi-valued fields, not sub-layers.
fn is_nested(value: &Value) -> bool {
    match value {
        Value::Object(_) => true,
        Value::Array(items) => items.iter().any(|item| item.is_object()),
        _ => false,
    }
}

impl Layer for JsonLayer {
    fn layer_name(&self) -> &str {
        &self.name
    }

    fn get_field(&self, name: &str) -> Option<FieldValue> {
        if let Some(cached) = self.wrapped.read().get(name) {
            return Some(cached.clone());
        }
        let resolved = match self.lookup(name) {
            Some((key, value)) => self.wrap(key, value),
            None => self.intermediate_for(name)?,
        };
        if !matches!(resolved, FieldValue::Layer(_)) {
            return Some(resolved);
        }
        let mut wrapped = self.wrapped.write();
        Some(wrapped.entry(name.to_string()).or_insert(resolved).clone())
    }

    fn field_names(&self) -> Vec<String> {
        let prefix = format!("{}.", self.full_name);
        let mut seen = HashSet::new();
        let mut names = Vec::new();
        let mut push = |name: String| {
            if seen.insert(name.clone()) {
                names.push(name);
            }
        };
        for key in self.fields.keys() {
            if key.starts_with(&prefix) {
                push(sanitize_field_name(key, &prefix));
            } else if let Some((_, last)) = key.rsplit_once('.') {
                push(sanitize_field_name(last, ""));
            } else {
                push(sanitize_field_name(key, ""));
            }
        }
        names
    }

    fn has_field(&self, name: &str) -> bool {
        if self
            .field_names()
            .iter()
            .any(|field| field.eq_ignore_ascii_case(name))
            || self.get_field(name).is_some()
        {
            return true;
        }
        let mut parts = name.split('.').peekable();
        let Some(first) = parts.next() else {
            return false;
        };
        let mut current = match self.get_field(first) {
            Some(FieldValue::Layer(layer)) => layer,
            Some(_) => return parts.peek().is_none(),
            None => return false,
        };
        while let Some(part) = parts.next() {
            match current.get_field(part) {
                Some(FieldValue::Layer(layer)) => current = layer,
                Some(_) => return parts.peek().is_none(),
                None => return false,
            }
        }
        true
    }
}

impl Clone for JsonLayer {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            full_name: self.full_name.clone(),
            intermediate: self.intermediate,
            fields: self.fields.clone(),
            value: self.value.clone(),
            duplicates: self.duplicates.clone(),
            wrapped: RwLock::new(HashMap::new()),
        }
    }
}

impl fmt::Debug for JsonLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonLayer")
            .field("name", &self.name)
            .field("full_name", &self.full_name)
            .field("intermediate", &self.intermediate)
            .field("fields", &self.fields.len())
            .field("duplicates", &self.duplicates.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::JsonLayer;
    use crate::layer::{FieldValue, Layer};

    fn tcp_layer() -> JsonLayer {
        JsonLayer::new(
            "tcp",
            json!({
                "tcp.srcport": "443",
                "tcp.dstport": "51000",
                "tcp.flags": "0x0012",
                "tcp.flags_tree": {
                    "tcp.flags.syn": "1",
                    "tcp.flags.ack": "1"
                },
                "tcp.analysis.initial_rtt": "0.01",
                "tcp.analysis.bytes_in_flight": "0"
            }),
        )
    }

    #[test]
    fn lookup_accepts_short_and_full_names() {
        let layer = tcp_layer();
        assert_eq!(layer.get_str("srcport").as_deref(), Some("443"));
        assert_eq!(layer.get_str("tcp.srcport").as_deref(), Some("443"));
        assert_eq!(layer.get_str("SRCPORT").as_deref(), Some("443"));
        assert!(layer.get_field("nope").is_none());
    }

    #[test]
    fn nested_objects_become_memoized_layers() {
        let layer = tcp_layer();
        let first = layer.get_field("flags_tree").unwrap();
        let second = layer.get_field("flags_tree").unwrap();
        let (FieldValue::Layer(a), FieldValue::Layer(b)) = (&first, &second) else {
            panic!("expected nested layers");
        };
        assert!(Arc::ptr_eq(a, b));
        assert_eq!(a.full_name(), "tcp.flags");
        assert_eq!(a.get_str("syn").as_deref(), Some("1"));
    }

    #[test]
    fn shared_prefix_builds_intermediate_layer() {
        let layer = tcp_layer();
        let analysis = layer.get_field("analysis").unwrap();
        let analysis = analysis.as_layer().unwrap();
        assert!(analysis.is_intermediate());
        assert_eq!(analysis.get_str("initial_rtt").as_deref(), Some("0.01"));
        assert_eq!(analysis.fields().len(), 2);
    }

    #[test]
    fn dotted_has_field_walks_nested_layers() {
        let layer = tcp_layer();
        assert!(layer.has_field("flags_tree.syn"));
        assert!(layer.has_field("analysis.initial_rtt"));
        assert!(!layer.has_field("flags_tree.urg"));
        assert!(!layer.has_field("srcport.extra"));
    }

    #[test]
    fn field_names_are_sanitized_and_unique() {
        let layer = JsonLayer::new(
            "ip",
            json!({"ip.src": "10.0.0.1", "ip.flags.df": "1", "ip.dst": "10.0.0.2"}),
        );
        assert_eq!(layer.field_names(), ["dst", "flags_df", "src"]);
    }

    #[test]
    fn arrays_split_into_duplicates() {
        let layer = JsonLayer::new(
            "ip",
            json!([{"ip.src": "10.0.0.1"}, {"ip.src": "192.168.0.1"}]),
        );
        assert_eq!(layer.get_str("src").as_deref(), Some("10.0.0.1"));
        assert_eq!(layer.duplicates().len(), 1);
        assert_eq!(layer.duplicates()[0].get_str("src").as_deref(), Some("192.168.0.1"));
    }

    #[test]
    fn scalar_arrays_stay_lists() {
        let layer = JsonLayer::new("dns", json!({"dns.a": ["1.1.1.1", "8.8.8.8"]}));
        assert_eq!(layer.get_str("a").as_deref(), Some("1.1.1.1, 8.8.8.8"));
    }

    #[test]
    fn find_field_descends_into_nested_trees() {
        let layer = JsonLayer::new(
            "dns",
            json!({
                "dns.id": "0x1234",
                "Queries": {
                    "example.com: type A, class IN": {
                        "dns.qry.name": "example.com",
                        "dns.qry.type": "1"
                    }
                }
            }),
        );
        assert!(layer.get_field("qry_name").is_none());
        assert_eq!(
            layer.find_field("qry_name").map(|value| value.to_string()).as_deref(),
            Some("example.com")
        );
    }

    #[test]
    fn get_falls_back_to_default() {
        let layer = tcp_layer();
        assert_eq!(layer.get("window_size", "0".into()), FieldValue::from("0"));
        assert_eq!(layer.get_int("srcport", 0), 443);
        assert_eq!(layer.get_int("flags", 0), 0x12);
    }
}
