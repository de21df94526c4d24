use std::collections::{BTreeSet, HashMap, HashSet};

use crate::elements::{FieldElement, MethodElement};

/// Everything deleted so far from one archive. Shared by every class and
/// every pass so later classes see deletions made in earlier ones.
#[derive(Debug, Default)]
pub(crate) struct UnwantedCache {
    classes: BTreeSet<String>,
    methods: HashMap<String, HashSet<MethodElement>>,
    fields: HashMap<String, HashSet<FieldElement>>,
}

impl UnwantedCache {
    /// Record a wholly deleted class; its member entries become redundant.
    pub(crate) fn add_class(&mut self, class: &str) -> bool {
        if !self.classes.insert(class.to_string()) {
            return false;
        }
        self.methods.remove(class);
        self.fields.remove(class);
        true
    }

    pub(crate) fn add_method(&mut self, class: &str, method: MethodElement) {
        if !self.contains_class(class) {
            self.methods.entry(class.to_string()).or_default().insert(method);
        }
    }

    pub(crate) fn add_field(&mut self, class: &str, field: FieldElement) {
        if !self.contains_class(class) {
            self.fields.entry(class.to_string()).or_default().insert(field);
        }
    }

    pub(crate) fn contains_class(&self, class: &str) -> bool {
        self.classes.contains(class)
    }

    pub(crate) fn contains_method(&self, class: &str, name: &str, descriptor: &str) -> bool {
        self.contains_class(class)
            || self
                .methods
                .get(class)
                .is_some_and(|methods| methods.contains(&MethodElement::new(name, descriptor)))
    }

    pub(crate) fn contains_field(&self, class: &str, field: &FieldElement) -> bool {
        self.contains_class(class) || self.field(class, field).is_some()
    }

    /// The recorded field equal to `field`, carrying the descriptor it was deleted with.
    pub(crate) fn field(&self, class: &str, field: &FieldElement) -> Option<&FieldElement> {
        self.fields.get(class).and_then(|fields| fields.get(field))
    }

    pub(crate) fn class_count(&self) -> usize {
        self.classes.len()
    }
}
