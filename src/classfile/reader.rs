use crate::error::{ClassFormatError, ClassResult};

use super::constant_pool::{Constant, ConstantPool, decode_modified_utf8};
use super::{AttributeInfo, ClassFile, MemberEntry};

const MAGIC: u32 = 0xCAFE_BABE;

/// Big-endian cursor over a byte slice that reports the failing offset.
pub(crate) struct ByteReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    pub(crate) fn offset(&self) -> usize {
        self.offset
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.offset >= self.data.len()
    }

    pub(crate) fn bytes(&mut self, len: usize) -> ClassResult<&'a [u8]> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                ClassFormatError::new(self.offset, format!("unexpected end of data reading {len} bytes"))
            })?;
        let slice = &self.data[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    pub(crate) fn u8(&mut self) -> ClassResult<u8> {
        Ok(self.bytes(1)?[0])
    }

    pub(crate) fn u16(&mut self) -> ClassResult<u16> {
        let bytes = self.bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub(crate) fn u32(&mut self) -> ClassResult<u32> {
        let bytes = self.bytes(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub(crate) fn error(&self, reason: impl Into<String>) -> ClassFormatError {
        ClassFormatError::new(self.offset, reason)
    }
}

pub(crate) fn parse_class(data: &[u8]) -> ClassResult<ClassFile> {
    let mut reader = ByteReader::new(data);
    let magic = reader.u32()?;
    if magic != MAGIC {
        return Err(ClassFormatError::new(
            0,
            format!("invalid class file magic 0x{magic:08x}"),
        ));
    }
    let minor_version = reader.u16()?;
    let major_version = reader.u16()?;
    let constant_pool = parse_constant_pool(&mut reader)?;
    let access_flags = reader.u16()?;
    let this_class = reader.u16()?;
    let super_class = reader.u16()?;
    let interface_count = reader.u16()?;
    let mut interfaces = Vec::with_capacity(interface_count as usize);
    for _ in 0..interface_count {
        interfaces.push(reader.u16()?);
    }
    let fields = parse_members(&mut reader)?;
    let methods = parse_members(&mut reader)?;
    let attributes = parse_attributes(&mut reader)?;
    if !reader.is_empty() {
        return Err(reader.error("trailing bytes after class file"));
    }

    let class = ClassFile {
        minor_version,
        major_version,
        constant_pool,
        access_flags,
        this_class,
        super_class,
        interfaces,
        fields,
        methods,
        attributes,
    };
    class.name()?;
    Ok(class)
}

fn parse_constant_pool(reader: &mut ByteReader<'_>) -> ClassResult<ConstantPool> {
    let count = reader.u16()?;
    let mut entries = Vec::with_capacity(count as usize);
    entries.push(Constant::Unusable);
    while entries.len() < count as usize {
        let tag_offset = reader.offset();
        let tag = reader.u8()?;
        let constant = match tag {
            1 => {
                let len = reader.u16()? as usize;
                let bytes = reader.bytes(len)?;
                let text = decode_modified_utf8(bytes)
                    .map_err(|reason| ClassFormatError::new(tag_offset, reason))?;
                Constant::Utf8 {
                    text,
                    bytes: bytes.to_vec(),
                }
            }
            3 => Constant::Integer(reader.u32()? as i32),
            4 => Constant::Float(reader.u32()?),
            5 => {
                let high = reader.u32()? as u64;
                let low = reader.u32()? as u64;
                Constant::Long(((high << 32) | low) as i64)
            }
            6 => {
                let high = reader.u32()? as u64;
                let low = reader.u32()? as u64;
                Constant::Double((high << 32) | low)
            }
            7 => Constant::Class {
                name_index: reader.u16()?,
            },
            8 => Constant::String {
                string_index: reader.u16()?,
            },
            9 => Constant::FieldRef {
                class_index: reader.u16()?,
                name_and_type_index: reader.u16()?,
            },
            10 => Constant::MethodRef {
                class_index: reader.u16()?,
                name_and_type_index: reader.u16()?,
            },
            11 => Constant::InterfaceMethodRef {
                class_index: reader.u16()?,
                name_and_type_index: reader.u16()?,
            },
            12 => Constant::NameAndType {
                name_index: reader.u16()?,
                descriptor_index: reader.u16()?,
            },
            15 => Constant::MethodHandle {
                reference_kind: reader.u8()?,
                reference_index: reader.u16()?,
            },
            16 => Constant::MethodType {
                descriptor_index: reader.u16()?,
            },
            17 => Constant::Dynamic {
                bootstrap_method_attr_index: reader.u16()?,
                name_and_type_index: reader.u16()?,
            },
            18 => Constant::InvokeDynamic {
                bootstrap_method_attr_index: reader.u16()?,
                name_and_type_index: reader.u16()?,
            },
            19 => Constant::Module {
                name_index: reader.u16()?,
            },
            20 => Constant::Package {
                name_index: reader.u16()?,
            },
            _ => {
                return Err(ClassFormatError::new(
                    tag_offset,
                    format!("invalid constant pool tag {tag}"),
                ));
            }
        };
        let wide = matches!(constant, Constant::Long(_) | Constant::Double(_));
        entries.push(constant);
        if wide {
            entries.push(Constant::Unusable);
        }
    }
    if entries.len() != count as usize {
        return Err(reader.error("wide constant overflows the constant pool"));
    }
    Ok(ConstantPool::new(entries))
}

fn parse_members(reader: &mut ByteReader<'_>) -> ClassResult<Vec<MemberEntry>> {
    let count = reader.u16()?;
    let mut members = Vec::with_capacity(count as usize);
    for _ in 0..count {
        members.push(MemberEntry {
            access_flags: reader.u16()?,
            name_index: reader.u16()?,
            descriptor_index: reader.u16()?,
            attributes: parse_attributes(reader)?,
        });
    }
    Ok(members)
}

fn parse_attributes(reader: &mut ByteReader<'_>) -> ClassResult<Vec<AttributeInfo>> {
    let count = reader.u16()?;
    let mut attributes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name_index = reader.u16()?;
        let len = reader.u32()? as usize;
        attributes.push(AttributeInfo {
            name_index,
            info: reader.bytes(len)?.to_vec(),
        });
    }
    Ok(attributes)
}
