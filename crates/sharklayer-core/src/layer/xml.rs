//! Layers decoded from PDML (`-T pdml`).

use std::collections::HashMap;

use super::{FieldValue, Layer, field_prefix, sanitize_field_name};
use crate::field::{Field, FieldContainer};

/// One `<proto>` element.
///
/// Fields are stored in encounter order with a lowercase index beside them;
/// nested `<field>` children are flattened into the same map so
/// `flags.syn` resolves without walking the tree.
#[derive(Debug, Clone, Default)]
pub struct XmlLayer {
    name: String,
    showname: String,
    raw_mode: bool,
    pos: Option<usize>,
    size: Option<usize>,
    entries: Vec<(String, FieldContainer)>,
    index: HashMap<String, usize>,
}

impl XmlLayer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_showname(mut self, showname: impl Into<String>) -> Self {
        self.showname = showname.into();
        self
    }

    /// Lookups return the raw value text instead of the container.
    pub fn with_raw_mode(mut self, raw_mode: bool) -> Self {
        self.raw_mode = raw_mode;
        self
    }

    pub fn with_span(mut self, pos: usize, size: usize) -> Self {
        self.pos = Some(pos);
        self.size = Some(size);
        self
    }

    pub fn showname(&self) -> &str {
        &self.showname
    }

    pub fn span(&self) -> Option<(usize, usize)> {
        self.pos.zip(self.size)
    }

    pub fn raw_mode(&self) -> bool {
        self.raw_mode
    }

    /// Add a field and, recursively, its children.
    pub fn add_field(&mut self, field: Field) {
        let children = field.children.clone();
        self.insert(field);
        for child in children {
            self.add_field(child);
        }
    }

    fn insert(&mut self, field: Field) {
        if field.name.is_empty() {
            return;
        }
        let key = sanitize_field_name(&field.name, &field_prefix(&self.name));
        let lookup = key.to_ascii_lowercase();
        match self.index.get(&lookup) {
            Some(&idx) => self.entries[idx].1.add_field(field),
            None => {
                self.index.insert(lookup, self.entries.len());
                self.entries.push((key, FieldContainer::new(field)));
            }
        }
    }

    pub fn container(&self, name: &str) -> Option<&FieldContainer> {
        let key = sanitize_field_name(name, &field_prefix(&self.name)).to_ascii_lowercase();
        self.index.get(&key).map(|&idx| &self.entries[idx].1)
    }

    /// Raw value of the main field, regardless of mode.
    pub fn raw_value(&self, name: &str) -> Option<&str> {
        self.container(name)
            .and_then(FieldContainer::main_field)
            .map(|field| field.raw_value.as_str())
    }

    /// Every stored field, flattened, in encounter order.
    pub fn all_fields(&self) -> impl Iterator<Item = &Field> {
        self.entries
            .iter()
            .flat_map(|(_, container)| container.all_fields())
    }
}

impl Layer for XmlLayer {
    fn layer_name(&self) -> &str {
        &self.name
    }

    fn get_field(&self, name: &str) -> Option<FieldValue> {
        let container = self.container(name)?;
        if self.raw_mode {
            let raw = container
                .main_field()
                .map(|field| field.raw_value.clone())
                .unwrap_or_default();
            return Some(FieldValue::Text(raw));
        }
        Some(FieldValue::Container(container.clone()))
    }

    fn field_names(&self) -> Vec<String> {
        self.entries.iter().map(|(key, _)| key.clone()).collect()
    }

    fn get_display_field(&self, name: &str) -> Option<FieldValue> {
        self.container(name).cloned().map(FieldValue::Container)
    }
}
