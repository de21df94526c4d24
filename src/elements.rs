//! Identities of class members scheduled for, or recorded as, deletion.

use std::fmt;
use std::hash::{Hash, Hasher};

use crate::classfile::{ACC_STATIC, ACC_SYNTHETIC};
use crate::descriptor::method_shape;

/// Passes a speculatively scheduled element survives without being matched.
const DUMMY_PASSES: i32 = 1;

/// Descriptor recorded for fields known only by name.
pub(crate) const DUMMY_FIELD_DESCRIPTOR: &str = "?";

const DEFAULT_CONSTRUCTOR_MARKER: &str = "Lkotlin/jvm/internal/DefaultConstructorMarker;";

/// Something that can be dropped after a number of unproductive passes.
pub(crate) trait Expiring {
    /// Consume one pass; true once the element has outlived its lifetime.
    fn expire(&mut self) -> bool;
}

/// A method identified by name and descriptor. Access flags and lifetime do
/// not take part in equality.
#[derive(Clone, Debug)]
pub(crate) struct MethodElement {
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) access: u16,
    lifetime: i32,
}

impl MethodElement {
    pub(crate) fn new(name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self::with_access(name, descriptor, 0)
    }

    pub(crate) fn with_access(name: impl Into<String>, descriptor: impl Into<String>, access: u16) -> Self {
        Self {
            name: name.into(),
            descriptor: descriptor.into(),
            access,
            lifetime: DUMMY_PASSES,
        }
    }

    pub(crate) fn is_object_constructor(&self) -> bool {
        self.name == "<init>"
    }

    pub(crate) fn is_class_initializer(&self) -> bool {
        self.name == "<clinit>"
    }

    pub(crate) fn is_constructor(&self) -> bool {
        self.is_object_constructor() || self.is_class_initializer()
    }

    pub(crate) fn is_void_function(&self) -> bool {
        !self.is_constructor() && self.descriptor.ends_with(")V")
    }

    /// Source-level name, without any compiler-added `$` suffix.
    pub(crate) fn visible_name(&self) -> &str {
        self.name.split_once('$').map_or(&self.name, |(visible, _)| visible)
    }

    pub(crate) fn suffix(&self) -> &str {
        self.name.split_once('$').map_or("", |(_, suffix)| suffix)
    }

    /// The synthetic `name$default` method Kotlin emits for default arguments.
    ///
    /// Member functions take the owner instance first; top-level functions
    /// are already static and do not.
    pub(crate) fn default_function(&self, owner: Option<&str>, has_receiver: bool) -> Option<MethodElement> {
        if self.is_constructor() {
            return None;
        }
        let shape = method_shape(&self.descriptor).ok()?;
        let value_parameters = shape.parameter_count.saturating_sub(usize::from(has_receiver));
        let masks = "I".repeat(value_parameters.div_ceil(32).max(1));
        let owner = owner.map(|owner| format!("L{owner};")).unwrap_or_default();
        Some(MethodElement::with_access(
            format!("{}$default", self.name),
            format!("({owner}{}{masks}Ljava/lang/Object;){}", shape.parameters, shape.return_type),
            ACC_STATIC | ACC_SYNTHETIC,
        ))
    }

    /// The synthetic constructor Kotlin emits for default arguments.
    pub(crate) fn default_constructor(&self) -> Option<MethodElement> {
        if !self.is_object_constructor() {
            return None;
        }
        let shape = method_shape(&self.descriptor).ok()?;
        let masks = "I".repeat(shape.parameter_count.div_ceil(32).max(1));
        Some(MethodElement::with_access(
            "<init>",
            format!("({}{masks}{DEFAULT_CONSTRUCTOR_MARKER})V", shape.parameters),
            ACC_SYNTHETIC,
        ))
    }
}

impl PartialEq for MethodElement {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.descriptor == other.descriptor
    }
}

impl Eq for MethodElement {}

impl Hash for MethodElement {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.descriptor.hash(state);
    }
}

impl Expiring for MethodElement {
    fn expire(&mut self) -> bool {
        self.lifetime -= 1;
        self.lifetime < 0
    }
}

impl fmt::Display for MethodElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name, self.descriptor)
    }
}

/// A field identified by name and the receiver part of its accessor
/// descriptor (`()` for plain fields), so that an extension property never
/// matches a same-named field.
#[derive(Clone, Debug)]
pub(crate) struct FieldElement {
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) extension: String,
    lifetime: i32,
}

impl FieldElement {
    pub(crate) fn new(name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self::with_extension(name, descriptor, "()")
    }

    pub(crate) fn with_extension(
        name: impl Into<String>,
        descriptor: impl Into<String>,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            descriptor: descriptor.into(),
            extension: extension.into(),
            lifetime: DUMMY_PASSES,
        }
    }
}

/// Parameter list of a method descriptor, parentheses included.
pub(crate) fn extension_of(descriptor: &str) -> &str {
    match descriptor.find(')') {
        Some(close) => &descriptor[..=close],
        None => "()",
    }
}

impl PartialEq for FieldElement {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.extension == other.extension
    }
}

impl Eq for FieldElement {}

impl Hash for FieldElement {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.extension.hash(state);
    }
}

impl Expiring for FieldElement {
    fn expire(&mut self) -> bool {
        self.lifetime -= 1;
        self.lifetime < 0
    }
}

impl fmt::Display for FieldElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.descriptor)
    }
}

/// Small insertion-ordered set whose members can expire.
#[derive(Clone, Debug)]
pub(crate) struct ElementSet<E> {
    items: Vec<E>,
}

impl<E> Default for ElementSet<E> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<E: PartialEq + Expiring> ElementSet<E> {
    pub(crate) fn insert(&mut self, element: E) -> bool {
        if self.contains(&element) {
            return false;
        }
        self.items.push(element);
        true
    }

    pub(crate) fn contains(&self, element: &E) -> bool {
        self.items.contains(element)
    }

    pub(crate) fn remove(&mut self, element: &E) -> bool {
        let before = self.items.len();
        self.items.retain(|item| item != element);
        self.items.len() != before
    }

    /// Age every element by one pass, dropping those that expire.
    pub(crate) fn expire(&mut self) {
        self.items.retain_mut(|item| !item.expire());
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
