//! Callback-driven walk over a parsed class.
//!
//! [`accept`] resolves every structural element to names, hands it to a
//! [`ClassVisitor`] and applies the returned decisions to the class. Anything
//! the visitor does not act on is written back untouched.

use anyhow::{Context, Result};

use crate::error::{ClassFormatError, ClassResult};

use super::annotation::{Annotation, parse_annotations, write_annotations};
use super::code::{parse_bootstrap_methods, parse_code, patch_code, scan_instructions, stub_code};
use super::constant_pool::{ConstantPool, HandleRef, MemberRef};
use super::opcodes;
use super::reader::ByteReader;
use super::writer::write_u16;
use super::{
    ACC_STATIC, AttributeInfo, BOOTSTRAP_METHODS, CODE, ClassFile, ENCLOSING_METHOD,
    INNER_CLASSES, MemberEntry, NEST_HOST, NEST_MEMBERS, PERMITTED_SUBCLASSES,
    is_annotations_attribute,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Disposition {
    Keep,
    Discard,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum MethodDisposition {
    Keep,
    Delete,
    Stub,
}

/// Class attribute that names another class by itself.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum ClassReference {
    NestHost,
    NestMember,
    PermittedSubclass,
}

pub(crate) struct ClassHeader<'a> {
    pub(crate) name: &'a str,
    pub(crate) super_name: Option<&'a str>,
    pub(crate) interfaces: Vec<&'a str>,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct Member<'a> {
    pub(crate) access_flags: u16,
    pub(crate) name: &'a str,
    pub(crate) descriptor: &'a str,
}

impl<'a> Member<'a> {
    fn resolve(pool: &'a ConstantPool, entry: &MemberEntry) -> ClassResult<Self> {
        Ok(Self {
            access_flags: entry.access_flags,
            name: pool.utf8(entry.name_index)?,
            descriptor: pool.utf8(entry.descriptor_index)?,
        })
    }

    pub(crate) fn is_static(&self) -> bool {
        self.access_flags & ACC_STATIC != 0
    }
}

/// `EnclosingMethod` attribute of a local or anonymous class.
pub(crate) struct OuterClassLink<'a> {
    pub(crate) owner: &'a str,
    pub(crate) method: Option<(&'a str, &'a str)>,
}

/// One `InnerClasses` entry.
pub(crate) struct InnerClassLink<'a> {
    pub(crate) inner: &'a str,
    pub(crate) outer: Option<&'a str>,
    pub(crate) inner_name: Option<&'a str>,
}

/// Receives a class's elements in declaration order: header, class
/// annotations, class links, fields, methods (with their instructions) and
/// finally `visit_end`.
pub(crate) trait ClassVisitor {
    fn visit_header(&mut self, _header: &ClassHeader<'_>) {}

    fn visit_class_annotation(&mut self, _descriptor: &str, _annotation: &Annotation) -> Disposition {
        Disposition::Keep
    }

    fn visit_outer_class(&mut self, _link: &OuterClassLink<'_>) {}

    fn visit_inner_class(&mut self, _link: &InnerClassLink<'_>) -> Disposition {
        Disposition::Keep
    }

    fn visit_class_reference(&mut self, _kind: ClassReference, _class_name: &str) -> Disposition {
        Disposition::Keep
    }

    /// Checked between phases; once true the walk stops and the class is dropped.
    fn is_discarded(&self) -> bool {
        false
    }

    fn visit_field(&mut self, _field: &Member<'_>) {}

    fn visit_field_annotation(&mut self, _field: &Member<'_>, _descriptor: &str) -> Disposition {
        Disposition::Keep
    }

    fn visit_field_end(&mut self, _field: &Member<'_>) -> Disposition {
        Disposition::Keep
    }

    fn visit_method(&mut self, _method: &Member<'_>) {}

    fn visit_method_annotation(&mut self, _method: &Member<'_>, _descriptor: &str) -> Disposition {
        Disposition::Keep
    }

    /// Whether the method body should be walked instruction by instruction.
    fn visit_code(&mut self, _method: &Member<'_>) -> bool {
        true
    }

    fn visit_method_insn(&mut self, _method: &Member<'_>, _opcode: u8, _target: &MemberRef<'_>) {}

    /// Returning bytes replaces the three-byte field instruction in place.
    fn visit_field_insn(
        &mut self,
        _method: &Member<'_>,
        _opcode: u8,
        _target: &MemberRef<'_>,
    ) -> Option<[u8; 3]> {
        None
    }

    fn visit_invoke_dynamic_insn(&mut self, _method: &Member<'_>, _handles: &[HandleRef<'_>]) {}

    fn visit_method_end(&mut self, _method: &Member<'_>) -> MethodDisposition {
        MethodDisposition::Keep
    }

    /// Returns class annotations that replace existing ones of the same type.
    fn visit_end(&mut self, _pool: &mut ConstantPool) -> Result<Vec<Annotation>> {
        Ok(Vec::new())
    }
}

pub(crate) enum Accepted {
    Discarded,
    Rewritten { class: ClassFile, changed: bool },
}

pub(crate) fn accept(mut class: ClassFile, visitor: &mut dyn ClassVisitor) -> Result<Accepted> {
    let class_name = class.name().map_err(|error| error.in_entry("<unknown>"))?.to_string();
    let malformed = |error: ClassFormatError| error.in_entry(&class_name);

    visit_header(&class, visitor).map_err(malformed)?;
    let mut changed = visit_class_annotations(&mut class, visitor).map_err(malformed)?;
    if visitor.is_discarded() {
        return Ok(Accepted::Discarded);
    }
    changed |= visit_class_links(&mut class, visitor).map_err(malformed)?;
    if visitor.is_discarded() {
        return Ok(Accepted::Discarded);
    }
    changed |= visit_fields(&mut class, visitor).map_err(malformed)?;
    let (methods_changed, stubs) = visit_methods(&mut class, visitor).map_err(malformed)?;
    changed |= methods_changed;
    for index in stubs {
        install_stub(&mut class, index).with_context(|| format!("stub method in {class_name}"))?;
    }

    let replacements = visitor.visit_end(&mut class.constant_pool)?;
    if visitor.is_discarded() {
        return Ok(Accepted::Discarded);
    }
    for replacement in replacements {
        changed |= replace_class_annotation(&mut class, replacement).map_err(malformed)?;
    }
    Ok(Accepted::Rewritten { class, changed })
}

fn visit_header(class: &ClassFile, visitor: &mut dyn ClassVisitor) -> ClassResult<()> {
    let pool = &class.constant_pool;
    let super_name = match class.super_class {
        0 => None,
        index => Some(pool.class_name(index)?),
    };
    let interfaces = class
        .interfaces
        .iter()
        .map(|index| pool.class_name(*index))
        .collect::<ClassResult<Vec<_>>>()?;
    visitor.visit_header(&ClassHeader {
        name: class.name()?,
        super_name,
        interfaces,
    });
    Ok(())
}

fn visit_class_annotations(class: &mut ClassFile, visitor: &mut dyn ClassVisitor) -> ClassResult<bool> {
    filter_annotations(&class.constant_pool, &mut class.attributes, |descriptor, annotation| {
        visitor.visit_class_annotation(descriptor, annotation)
    })
}

/// Drops annotations rejected by `decide`, removing tables that end up empty.
fn filter_annotations(
    pool: &ConstantPool,
    attributes: &mut Vec<AttributeInfo>,
    mut decide: impl FnMut(&str, &Annotation) -> Disposition,
) -> ClassResult<bool> {
    let mut changed = false;
    let mut emptied = Vec::new();
    for (position, attribute) in attributes.iter_mut().enumerate() {
        if !is_annotations_attribute(pool, attribute) {
            continue;
        }
        let annotations = parse_annotations(&attribute.info)?;
        let total = annotations.len();
        let mut kept = Vec::with_capacity(total);
        for annotation in annotations {
            if decide(annotation.descriptor(pool)?, &annotation) == Disposition::Keep {
                kept.push(annotation);
            }
        }
        if kept.len() == total {
            continue;
        }
        changed = true;
        if kept.is_empty() {
            emptied.push(position);
        } else {
            attribute.info = write_annotations(&kept);
        }
    }
    for position in emptied.into_iter().rev() {
        attributes.remove(position);
    }
    Ok(changed)
}

fn visit_class_links(class: &mut ClassFile, visitor: &mut dyn ClassVisitor) -> ClassResult<bool> {
    let pool = &class.constant_pool;
    let mut changed = false;
    for attribute in &mut class.attributes {
        match pool.utf8(attribute.name_index)? {
            ENCLOSING_METHOD => {
                let mut reader = ByteReader::new(&attribute.info);
                let owner = pool.class_name(reader.u16()?)?;
                let method = match reader.u16()? {
                    0 => None,
                    index => Some(pool.name_and_type(index)?),
                };
                visitor.visit_outer_class(&OuterClassLink { owner, method });
            }
            INNER_CLASSES => {
                let mut reader = ByteReader::new(&attribute.info);
                let count = reader.u16()?;
                let mut kept = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let entry = reader.bytes(8)?;
                    let index = |at: usize| u16::from_be_bytes([entry[at], entry[at + 1]]);
                    let link = InnerClassLink {
                        inner: pool.class_name(index(0))?,
                        outer: optional(index(2), |i| pool.class_name(i))?,
                        inner_name: optional(index(4), |i| pool.utf8(i))?,
                    };
                    if visitor.visit_inner_class(&link) == Disposition::Keep {
                        kept.push(entry);
                    }
                }
                if kept.len() != count as usize {
                    changed = true;
                    let mut info = Vec::with_capacity(2 + kept.len() * 8);
                    write_u16(&mut info, kept.len() as u16);
                    for entry in kept {
                        info.extend_from_slice(entry);
                    }
                    attribute.info = info;
                }
            }
            NEST_HOST => {
                let mut reader = ByteReader::new(&attribute.info);
                let host = pool.class_name(reader.u16()?)?;
                visitor.visit_class_reference(ClassReference::NestHost, host);
            }
            name @ (NEST_MEMBERS | PERMITTED_SUBCLASSES) => {
                let kind = if name == NEST_MEMBERS {
                    ClassReference::NestMember
                } else {
                    ClassReference::PermittedSubclass
                };
                let mut reader = ByteReader::new(&attribute.info);
                let count = reader.u16()?;
                let mut kept = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let index = reader.u16()?;
                    if visitor.visit_class_reference(kind, pool.class_name(index)?) == Disposition::Keep {
                        kept.push(index);
                    }
                }
                if kept.len() != count as usize {
                    changed = true;
                    let mut info = Vec::with_capacity(2 + kept.len() * 2);
                    write_u16(&mut info, kept.len() as u16);
                    for index in kept {
                        write_u16(&mut info, index);
                    }
                    attribute.info = info;
                }
            }
            _ => {}
        }
    }
    Ok(changed)
}

fn optional<'a>(index: u16, resolve: impl Fn(u16) -> ClassResult<&'a str>) -> ClassResult<Option<&'a str>> {
    match index {
        0 => Ok(None),
        index => resolve(index).map(Some),
    }
}

fn visit_fields(class: &mut ClassFile, visitor: &mut dyn ClassVisitor) -> ClassResult<bool> {
    let pool = &class.constant_pool;
    let fields = std::mem::take(&mut class.fields);
    let mut kept = Vec::with_capacity(fields.len());
    let mut changed = false;
    for mut field in fields {
        let member = Member::resolve(pool, &field)?;
        visitor.visit_field(&member);
        let stripped = filter_annotations(pool, &mut field.attributes, |descriptor, _| {
            visitor.visit_field_annotation(&member, descriptor)
        })?;
        match visitor.visit_field_end(&member) {
            Disposition::Keep => {
                changed |= stripped;
                kept.push(field);
            }
            Disposition::Discard => changed = true,
        }
    }
    class.fields = kept;
    Ok(changed)
}

/// Walks methods; returns whether anything changed plus the positions of
/// methods whose bodies must be replaced by stubs.
fn visit_methods(class: &mut ClassFile, visitor: &mut dyn ClassVisitor) -> ClassResult<(bool, Vec<usize>)> {
    let bootstrap_methods = match class.attribute(BOOTSTRAP_METHODS) {
        Some(attribute) => parse_bootstrap_methods(&attribute.info)?,
        None => Vec::new(),
    };
    let pool = &class.constant_pool;
    let methods = std::mem::take(&mut class.methods);
    let mut kept = Vec::with_capacity(methods.len());
    let mut stubs = Vec::new();
    let mut changed = false;
    for mut method in methods {
        let member = Member::resolve(pool, &method)?;
        visitor.visit_method(&member);
        let stripped = filter_annotations(pool, &mut method.attributes, |descriptor, _| {
            visitor.visit_method_annotation(&member, descriptor)
        })?;

        let code_position = method
            .attributes
            .iter()
            .position(|attribute| pool.utf8(attribute.name_index).ok() == Some(CODE));
        let mut patches = Vec::new();
        if let Some(position) = code_position {
            if visitor.visit_code(&member) {
                let code = parse_code(&method.attributes[position].info)?.code;
                for insn in scan_instructions(code)? {
                    match insn.opcode {
                        opcodes::GETSTATIC..=opcodes::PUTFIELD => {
                            let target = pool.member_ref(insn.operand_u16(code)?)?;
                            if let Some(replacement) = visitor.visit_field_insn(&member, insn.opcode, &target) {
                                patches.push((insn.offset, replacement));
                            }
                        }
                        opcodes::INVOKEVIRTUAL
                        | opcodes::INVOKESPECIAL
                        | opcodes::INVOKESTATIC
                        | opcodes::INVOKEINTERFACE => {
                            let target = pool.member_ref(insn.operand_u16(code)?)?;
                            visitor.visit_method_insn(&member, insn.opcode, &target);
                        }
                        opcodes::INVOKEDYNAMIC => {
                            let (bootstrap_index, _) = pool.invoke_dynamic(insn.operand_u16(code)?)?;
                            let bootstrap = bootstrap_methods.get(bootstrap_index as usize).ok_or_else(|| {
                                ClassFormatError::new(insn.offset, format!("missing bootstrap method {bootstrap_index}"))
                            })?;
                            let mut handles = Vec::new();
                            for index in std::iter::once(&bootstrap.method_ref).chain(&bootstrap.arguments) {
                                if let Some(handle) = pool.method_handle(*index)? {
                                    handles.push(handle);
                                }
                            }
                            visitor.visit_invoke_dynamic_insn(&member, &handles);
                        }
                        _ => {}
                    }
                }
            }
        }

        match visitor.visit_method_end(&member) {
            MethodDisposition::Keep => {
                if let Some(position) = code_position.filter(|_| !patches.is_empty()) {
                    changed = true;
                    for (offset, replacement) in &patches {
                        patch_code(&mut method.attributes[position].info, *offset, replacement);
                    }
                }
                changed |= stripped;
                kept.push(method);
            }
            MethodDisposition::Delete => changed = true,
            MethodDisposition::Stub => {
                if code_position.is_some() {
                    changed = true;
                    stubs.push(kept.len());
                } else {
                    changed |= stripped;
                }
                kept.push(method);
            }
        }
    }
    class.methods = kept;
    Ok((changed, stubs))
}

fn install_stub(class: &mut ClassFile, index: usize) -> Result<()> {
    let method = &class.methods[index];
    let descriptor = class.constant_pool.utf8(method.descriptor_index)?.to_string();
    let is_static = method.access_flags & ACC_STATIC != 0;
    let position = method
        .attributes
        .iter()
        .position(|attribute| class.constant_pool.utf8(attribute.name_index).ok() == Some(CODE))
        .context("stubbed method has no Code attribute")?;
    let info = stub_code(&mut class.constant_pool, &descriptor, is_static)?;
    class.methods[index].attributes[position].info = info;
    Ok(())
}

fn replace_class_annotation(class: &mut ClassFile, replacement: Annotation) -> ClassResult<bool> {
    let pool = &class.constant_pool;
    for attribute in &mut class.attributes {
        if !is_annotations_attribute(pool, attribute) {
            continue;
        }
        let mut annotations = parse_annotations(&attribute.info)?;
        if let Some(existing) = annotations
            .iter_mut()
            .find(|annotation| annotation.type_index == replacement.type_index)
        {
            if *existing == replacement {
                return Ok(false);
            }
            *existing = replacement;
            attribute.info = write_annotations(&annotations);
            return Ok(true);
        }
    }
    Ok(false)
}
