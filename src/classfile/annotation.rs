use crate::error::{ClassFormatError, ClassResult};

use super::constant_pool::ConstantPool;
use super::reader::ByteReader;
use super::writer::write_u16;

/// One entry of a `Runtime(In)VisibleAnnotations` table.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Annotation {
    pub(crate) type_index: u16,
    pub(crate) elements: Vec<ElementValuePair>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct ElementValuePair {
    pub(crate) name_index: u16,
    pub(crate) value: ElementValue,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum ElementValue {
    /// Tags `B C D F I J S Z s`; the index points at the constant.
    Const { tag: u8, index: u16 },
    Enum {
        type_name_index: u16,
        const_name_index: u16,
    },
    Class(u16),
    Annotation(Annotation),
    Array(Vec<ElementValue>),
}

impl ElementValue {
    pub(crate) fn string_array(pool: &mut ConstantPool, values: &[String]) -> ClassResult<Self> {
        let mut items = Vec::with_capacity(values.len());
        for value in values {
            items.push(ElementValue::Const {
                tag: b's',
                index: pool.add_utf8(value)?,
            });
        }
        Ok(ElementValue::Array(items))
    }
}

impl Annotation {
    pub(crate) fn descriptor<'p>(&self, pool: &'p ConstantPool) -> ClassResult<&'p str> {
        pool.utf8(self.type_index)
    }

    pub(crate) fn element(&self, pool: &ConstantPool, name: &str) -> ClassResult<Option<&ElementValue>> {
        for pair in &self.elements {
            if pool.utf8(pair.name_index)? == name {
                return Ok(Some(&pair.value));
            }
        }
        Ok(None)
    }

    pub(crate) fn int_element(&self, pool: &ConstantPool, name: &str) -> ClassResult<Option<i32>> {
        match self.element(pool, name)? {
            None => Ok(None),
            Some(ElementValue::Const { tag: b'I', index }) => Ok(Some(pool.integer(*index)?)),
            Some(_) => Err(ClassFormatError::new(
                0,
                format!("annotation element {name} is not an int"),
            )),
        }
    }

    pub(crate) fn string_array_element(
        &self,
        pool: &ConstantPool,
        name: &str,
    ) -> ClassResult<Option<Vec<String>>> {
        let Some(value) = self.element(pool, name)? else {
            return Ok(None);
        };
        let ElementValue::Array(items) = value else {
            return Err(ClassFormatError::new(
                0,
                format!("annotation element {name} is not an array"),
            ));
        };
        let mut strings = Vec::with_capacity(items.len());
        for item in items {
            match item {
                ElementValue::Const { tag: b's', index } => strings.push(pool.utf8(*index)?.to_string()),
                _ => {
                    return Err(ClassFormatError::new(
                        0,
                        format!("annotation element {name} holds a non-string value"),
                    ));
                }
            }
        }
        Ok(Some(strings))
    }

    /// Replace the named element, appending it when absent.
    pub(crate) fn set_element(
        &mut self,
        pool: &mut ConstantPool,
        name: &str,
        value: ElementValue,
    ) -> ClassResult<()> {
        for pair in &mut self.elements {
            if pool.utf8(pair.name_index)? == name {
                pair.value = value;
                return Ok(());
            }
        }
        let name_index = pool.add_utf8(name)?;
        self.elements.push(ElementValuePair { name_index, value });
        Ok(())
    }
}

pub(crate) fn parse_annotations(info: &[u8]) -> ClassResult<Vec<Annotation>> {
    let mut reader = ByteReader::new(info);
    let count = reader.u16()?;
    let mut annotations = Vec::with_capacity(count as usize);
    for _ in 0..count {
        annotations.push(parse_annotation(&mut reader)?);
    }
    if !reader.is_empty() {
        return Err(reader.error("trailing bytes after annotations"));
    }
    Ok(annotations)
}

fn parse_annotation(reader: &mut ByteReader<'_>) -> ClassResult<Annotation> {
    let type_index = reader.u16()?;
    let count = reader.u16()?;
    let mut elements = Vec::with_capacity(count as usize);
    for _ in 0..count {
        elements.push(ElementValuePair {
            name_index: reader.u16()?,
            value: parse_element_value(reader)?,
        });
    }
    Ok(Annotation {
        type_index,
        elements,
    })
}

fn parse_element_value(reader: &mut ByteReader<'_>) -> ClassResult<ElementValue> {
    let tag = reader.u8()?;
    let value = match tag {
        b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' | b's' => ElementValue::Const {
            tag,
            index: reader.u16()?,
        },
        b'e' => ElementValue::Enum {
            type_name_index: reader.u16()?,
            const_name_index: reader.u16()?,
        },
        b'c' => ElementValue::Class(reader.u16()?),
        b'@' => ElementValue::Annotation(parse_annotation(reader)?),
        b'[' => {
            let count = reader.u16()?;
            let mut items = Vec::with_capacity(count as usize);
            for _ in 0..count {
                items.push(parse_element_value(reader)?);
            }
            ElementValue::Array(items)
        }
        _ => return Err(reader.error(format!("invalid element value tag 0x{tag:02x}"))),
    };
    Ok(value)
}

pub(crate) fn write_annotations(annotations: &[Annotation]) -> Vec<u8> {
    let mut out = Vec::new();
    write_u16(&mut out, annotations.len() as u16);
    for annotation in annotations {
        write_annotation(&mut out, annotation);
    }
    out
}

fn write_annotation(out: &mut Vec<u8>, annotation: &Annotation) {
    write_u16(out, annotation.type_index);
    write_u16(out, annotation.elements.len() as u16);
    for pair in &annotation.elements {
        write_u16(out, pair.name_index);
        write_element_value(out, &pair.value);
    }
}

fn write_element_value(out: &mut Vec<u8>, value: &ElementValue) {
    match value {
        ElementValue::Const { tag, index } => {
            out.push(*tag);
            write_u16(out, *index);
        }
        ElementValue::Enum {
            type_name_index,
            const_name_index,
        } => {
            out.push(b'e');
            write_u16(out, *type_name_index);
            write_u16(out, *const_name_index);
        }
        ElementValue::Class(index) => {
            out.push(b'c');
            write_u16(out, *index);
        }
        ElementValue::Annotation(annotation) => {
            out.push(b'@');
            write_annotation(out, annotation);
        }
        ElementValue::Array(items) => {
            out.push(b'[');
            write_u16(out, items.len() as u16);
            for item in items {
                write_element_value(out, item);
            }
        }
    }
}
