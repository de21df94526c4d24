//! Structural model of a single JVM class file.
//!
//! Attributes stay as raw `(name, bytes)` pairs until something needs to look
//! inside them, so a class that is parsed and written back without edits is
//! byte-for-byte identical to its input.

pub(crate) mod annotation;
pub(crate) mod code;
pub(crate) mod constant_pool;
pub(crate) mod opcodes;
pub(crate) mod reader;
pub(crate) mod visitor;
pub(crate) mod writer;

use crate::error::ClassResult;

use self::constant_pool::ConstantPool;

pub(crate) const ACC_STATIC: u16 = 0x0008;
pub(crate) const ACC_SYNTHETIC: u16 = 0x1000;

pub(crate) const CODE: &str = "Code";
pub(crate) const RUNTIME_VISIBLE_ANNOTATIONS: &str = "RuntimeVisibleAnnotations";
pub(crate) const RUNTIME_INVISIBLE_ANNOTATIONS: &str = "RuntimeInvisibleAnnotations";
pub(crate) const INNER_CLASSES: &str = "InnerClasses";
pub(crate) const ENCLOSING_METHOD: &str = "EnclosingMethod";
pub(crate) const NEST_HOST: &str = "NestHost";
pub(crate) const NEST_MEMBERS: &str = "NestMembers";
pub(crate) const PERMITTED_SUBCLASSES: &str = "PermittedSubclasses";
pub(crate) const BOOTSTRAP_METHODS: &str = "BootstrapMethods";

/// Parsed class file with the constant pool and raw attributes.
#[derive(Clone, Debug)]
pub(crate) struct ClassFile {
    pub(crate) minor_version: u16,
    pub(crate) major_version: u16,
    pub(crate) constant_pool: ConstantPool,
    pub(crate) access_flags: u16,
    pub(crate) this_class: u16,
    pub(crate) super_class: u16,
    pub(crate) interfaces: Vec<u16>,
    pub(crate) fields: Vec<MemberEntry>,
    pub(crate) methods: Vec<MemberEntry>,
    pub(crate) attributes: Vec<AttributeInfo>,
}

/// Field or method declaration.
#[derive(Clone, Debug)]
pub(crate) struct MemberEntry {
    pub(crate) access_flags: u16,
    pub(crate) name_index: u16,
    pub(crate) descriptor_index: u16,
    pub(crate) attributes: Vec<AttributeInfo>,
}

/// Attribute kept as its undecoded payload.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct AttributeInfo {
    pub(crate) name_index: u16,
    pub(crate) info: Vec<u8>,
}

impl ClassFile {
    /// Internal name of this class, e.g. `com/example/Foo`.
    pub(crate) fn name(&self) -> ClassResult<&str> {
        self.constant_pool.class_name(self.this_class)
    }

    pub(crate) fn attribute(&self, name: &str) -> Option<&AttributeInfo> {
        find_attribute(&self.constant_pool, &self.attributes, name)
    }
}

/// First attribute with the given name.
pub(crate) fn find_attribute<'a>(
    pool: &ConstantPool,
    attributes: &'a [AttributeInfo],
    name: &str,
) -> Option<&'a AttributeInfo> {
    attributes
        .iter()
        .find(|attribute| pool.utf8(attribute.name_index).ok() == Some(name))
}

/// Whether an attribute carries one of the two annotation tables.
pub(crate) fn is_annotations_attribute(pool: &ConstantPool, attribute: &AttributeInfo) -> bool {
    matches!(
        pool.utf8(attribute.name_index),
        Ok(RUNTIME_VISIBLE_ANNOTATIONS | RUNTIME_INVISIBLE_ANNOTATIONS)
    )
}
