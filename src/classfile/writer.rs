use super::constant_pool::{Constant, ConstantPool};
use super::{AttributeInfo, ClassFile, MemberEntry};

pub(crate) fn write_class(class: &ClassFile) -> Vec<u8> {
    let mut out = Vec::new();
    write_u32(&mut out, 0xCAFE_BABE);
    write_u16(&mut out, class.minor_version);
    write_u16(&mut out, class.major_version);
    write_constant_pool(&mut out, &class.constant_pool);
    write_u16(&mut out, class.access_flags);
    write_u16(&mut out, class.this_class);
    write_u16(&mut out, class.super_class);
    write_u16(&mut out, class.interfaces.len() as u16);
    for interface in &class.interfaces {
        write_u16(&mut out, *interface);
    }
    write_members(&mut out, &class.fields);
    write_members(&mut out, &class.methods);
    write_attributes(&mut out, &class.attributes);
    out
}

fn write_constant_pool(out: &mut Vec<u8>, pool: &ConstantPool) {
    write_u16(out, pool.count());
    for constant in pool.entries() {
        match constant {
            Constant::Unusable => {}
            Constant::Utf8 { bytes, .. } => {
                out.push(1);
                write_u16(out, bytes.len() as u16);
                out.extend_from_slice(bytes);
            }
            Constant::Integer(value) => {
                out.push(3);
                write_u32(out, *value as u32);
            }
            Constant::Float(bits) => {
                out.push(4);
                write_u32(out, *bits);
            }
            Constant::Long(value) => {
                out.push(5);
                out.extend_from_slice(&value.to_be_bytes());
            }
            Constant::Double(bits) => {
                out.push(6);
                out.extend_from_slice(&bits.to_be_bytes());
            }
            Constant::Class { name_index } => {
                out.push(7);
                write_u16(out, *name_index);
            }
            Constant::String { string_index } => {
                out.push(8);
                write_u16(out, *string_index);
            }
            Constant::FieldRef {
                class_index,
                name_and_type_index,
            } => write_pair(out, 9, *class_index, *name_and_type_index),
            Constant::MethodRef {
                class_index,
                name_and_type_index,
            } => write_pair(out, 10, *class_index, *name_and_type_index),
            Constant::InterfaceMethodRef {
                class_index,
                name_and_type_index,
            } => write_pair(out, 11, *class_index, *name_and_type_index),
            Constant::NameAndType {
                name_index,
                descriptor_index,
            } => write_pair(out, 12, *name_index, *descriptor_index),
            Constant::MethodHandle {
                reference_kind,
                reference_index,
            } => {
                out.push(15);
                out.push(*reference_kind);
                write_u16(out, *reference_index);
            }
            Constant::MethodType { descriptor_index } => {
                out.push(16);
                write_u16(out, *descriptor_index);
            }
            Constant::Dynamic {
                bootstrap_method_attr_index,
                name_and_type_index,
            } => write_pair(out, 17, *bootstrap_method_attr_index, *name_and_type_index),
            Constant::InvokeDynamic {
                bootstrap_method_attr_index,
                name_and_type_index,
            } => write_pair(out, 18, *bootstrap_method_attr_index, *name_and_type_index),
            Constant::Module { name_index } => {
                out.push(19);
                write_u16(out, *name_index);
            }
            Constant::Package { name_index } => {
                out.push(20);
                write_u16(out, *name_index);
            }
        }
    }
}

fn write_pair(out: &mut Vec<u8>, tag: u8, first: u16, second: u16) {
    out.push(tag);
    write_u16(out, first);
    write_u16(out, second);
}

fn write_members(out: &mut Vec<u8>, members: &[MemberEntry]) {
    write_u16(out, members.len() as u16);
    for member in members {
        write_u16(out, member.access_flags);
        write_u16(out, member.name_index);
        write_u16(out, member.descriptor_index);
        write_attributes(out, &member.attributes);
    }
}

fn write_attributes(out: &mut Vec<u8>, attributes: &[AttributeInfo]) {
    write_u16(out, attributes.len() as u16);
    for attribute in attributes {
        write_u16(out, attribute.name_index);
        write_u32(out, attribute.info.len() as u32);
        out.extend_from_slice(&attribute.info);
    }
}

pub(crate) fn write_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

pub(crate) fn write_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}
