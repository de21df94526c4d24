use crate::error::{ClassFormatError, ClassResult};

/// Constant pool entry, mirroring the class-file tags.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Constant {
    /// Index 0 and the slot following a `Long` or `Double`.
    Unusable,
    Utf8 {
        text: String,
        bytes: Vec<u8>,
    },
    Integer(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    Class {
        name_index: u16,
    },
    String {
        string_index: u16,
    },
    FieldRef {
        class_index: u16,
        name_and_type_index: u16,
    },
    MethodRef {
        class_index: u16,
        name_and_type_index: u16,
    },
    InterfaceMethodRef {
        class_index: u16,
        name_and_type_index: u16,
    },
    NameAndType {
        name_index: u16,
        descriptor_index: u16,
    },
    MethodHandle {
        reference_kind: u8,
        reference_index: u16,
    },
    MethodType {
        descriptor_index: u16,
    },
    Dynamic {
        bootstrap_method_attr_index: u16,
        name_and_type_index: u16,
    },
    InvokeDynamic {
        bootstrap_method_attr_index: u16,
        name_and_type_index: u16,
    },
    Module {
        name_index: u16,
    },
    Package {
        name_index: u16,
    },
}

impl Constant {
    pub(crate) fn utf8(text: &str) -> Self {
        Constant::Utf8 {
            text: text.to_string(),
            bytes: encode_modified_utf8(text),
        }
    }
}

/// Field, method or interface-method reference resolved to strings.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct MemberRef<'a> {
    pub(crate) owner: &'a str,
    pub(crate) name: &'a str,
    pub(crate) descriptor: &'a str,
    pub(crate) is_interface: bool,
}

/// Method handle resolved to the member it points at.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct HandleRef<'a> {
    pub(crate) reference_kind: u8,
    pub(crate) member: MemberRef<'a>,
}

impl HandleRef<'_> {
    /// `REF_getField` through `REF_putStatic` address fields; the rest address methods.
    pub(crate) fn is_field(&self) -> bool {
        (1..=4).contains(&self.reference_kind)
    }
}

/// Append-only constant pool. Slot 0 is always [`Constant::Unusable`].
#[derive(Clone, Debug)]
pub(crate) struct ConstantPool {
    entries: Vec<Constant>,
}

impl ConstantPool {
    pub(crate) fn new(entries: Vec<Constant>) -> Self {
        Self { entries }
    }

    pub(crate) fn entries(&self) -> &[Constant] {
        &self.entries
    }

    /// The `constant_pool_count` value written to the class file.
    pub(crate) fn count(&self) -> u16 {
        self.entries.len() as u16
    }

    pub(crate) fn get(&self, index: u16) -> ClassResult<&Constant> {
        match self.entries.get(index as usize) {
            None | Some(Constant::Unusable) => Err(invalid_index(index)),
            Some(constant) => Ok(constant),
        }
    }

    pub(crate) fn utf8(&self, index: u16) -> ClassResult<&str> {
        match self.get(index)? {
            Constant::Utf8 { text, .. } => Ok(text),
            _ => Err(unexpected(index, "utf8")),
        }
    }

    pub(crate) fn integer(&self, index: u16) -> ClassResult<i32> {
        match self.get(index)? {
            Constant::Integer(value) => Ok(*value),
            _ => Err(unexpected(index, "integer")),
        }
    }

    pub(crate) fn class_name(&self, index: u16) -> ClassResult<&str> {
        match self.get(index)? {
            Constant::Class { name_index } => self.utf8(*name_index),
            _ => Err(unexpected(index, "class")),
        }
    }

    pub(crate) fn name_and_type(&self, index: u16) -> ClassResult<(&str, &str)> {
        match self.get(index)? {
            Constant::NameAndType {
                name_index,
                descriptor_index,
            } => Ok((self.utf8(*name_index)?, self.utf8(*descriptor_index)?)),
            _ => Err(unexpected(index, "name and type")),
        }
    }

    pub(crate) fn member_ref(&self, index: u16) -> ClassResult<MemberRef<'_>> {
        let (class_index, name_and_type_index, is_interface) = match self.get(index)? {
            Constant::FieldRef {
                class_index,
                name_and_type_index,
            }
            | Constant::MethodRef {
                class_index,
                name_and_type_index,
            } => (*class_index, *name_and_type_index, false),
            Constant::InterfaceMethodRef {
                class_index,
                name_and_type_index,
            } => (*class_index, *name_and_type_index, true),
            _ => return Err(unexpected(index, "member ref")),
        };
        let owner = self.class_name(class_index)?;
        let (name, descriptor) = self.name_and_type(name_and_type_index)?;
        Ok(MemberRef {
            owner,
            name,
            descriptor,
            is_interface,
        })
    }

    /// Resolve a `MethodHandle` entry; `None` when the index holds another constant kind.
    pub(crate) fn method_handle(&self, index: u16) -> ClassResult<Option<HandleRef<'_>>> {
        match self.get(index)? {
            Constant::MethodHandle {
                reference_kind,
                reference_index,
            } => Ok(Some(HandleRef {
                reference_kind: *reference_kind,
                member: self.member_ref(*reference_index)?,
            })),
            _ => Ok(None),
        }
    }

    /// Name-and-type index of an `InvokeDynamic` entry plus its bootstrap slot.
    pub(crate) fn invoke_dynamic(&self, index: u16) -> ClassResult<(u16, u16)> {
        match self.get(index)? {
            Constant::InvokeDynamic {
                bootstrap_method_attr_index,
                name_and_type_index,
            } => Ok((*bootstrap_method_attr_index, *name_and_type_index)),
            _ => Err(unexpected(index, "invokedynamic")),
        }
    }

    pub(crate) fn add_utf8(&mut self, value: &str) -> ClassResult<u16> {
        let existing = self.position(|_, constant| {
            matches!(constant, Constant::Utf8 { text, .. } if text == value)
        });
        match existing {
            Some(index) => Ok(index),
            None => self.push(Constant::utf8(value)),
        }
    }

    pub(crate) fn add_class(&mut self, name: &str) -> ClassResult<u16> {
        let existing = self.position(|pool, constant| {
            matches!(constant, Constant::Class { name_index } if pool.utf8(*name_index).ok() == Some(name))
        });
        if let Some(index) = existing {
            return Ok(index);
        }
        let name_index = self.add_utf8(name)?;
        self.push(Constant::Class { name_index })
    }

    pub(crate) fn add_string(&mut self, value: &str) -> ClassResult<u16> {
        let existing = self.position(|pool, constant| {
            matches!(constant, Constant::String { string_index } if pool.utf8(*string_index).ok() == Some(value))
        });
        if let Some(index) = existing {
            return Ok(index);
        }
        let string_index = self.add_utf8(value)?;
        self.push(Constant::String { string_index })
    }

    pub(crate) fn add_name_and_type(&mut self, name: &str, descriptor: &str) -> ClassResult<u16> {
        let existing = self.position(|pool, constant| {
            matches!(
                constant,
                Constant::NameAndType { name_index, descriptor_index }
                    if pool.utf8(*name_index).ok() == Some(name)
                        && pool.utf8(*descriptor_index).ok() == Some(descriptor)
            )
        });
        if let Some(index) = existing {
            return Ok(index);
        }
        let name_index = self.add_utf8(name)?;
        let descriptor_index = self.add_utf8(descriptor)?;
        self.push(Constant::NameAndType {
            name_index,
            descriptor_index,
        })
    }

    pub(crate) fn add_method_ref(
        &mut self,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> ClassResult<u16> {
        let existing = (0..self.entries.len()).find(|index| {
            matches!(self.entries[*index], Constant::MethodRef { .. })
                && self.member_ref(*index as u16).ok()
                    == Some(MemberRef {
                        owner,
                        name,
                        descriptor,
                        is_interface: false,
                    })
        });
        if let Some(index) = existing {
            return Ok(index as u16);
        }
        let class_index = self.add_class(owner)?;
        let name_and_type_index = self.add_name_and_type(name, descriptor)?;
        self.push(Constant::MethodRef {
            class_index,
            name_and_type_index,
        })
    }

    fn position(&self, predicate: impl Fn(&Self, &Constant) -> bool) -> Option<u16> {
        self.entries
            .iter()
            .position(|constant| predicate(self, constant))
            .map(|index| index as u16)
    }

    fn push(&mut self, constant: Constant) -> ClassResult<u16> {
        if self.entries.len() >= u16::MAX as usize {
            return Err(ClassFormatError::new(0, "constant pool overflow"));
        }
        self.entries.push(constant);
        Ok((self.entries.len() - 1) as u16)
    }
}

fn invalid_index(index: u16) -> ClassFormatError {
    ClassFormatError::new(0, format!("invalid constant pool index {index}"))
}

fn unexpected(index: u16, expected: &str) -> ClassFormatError {
    ClassFormatError::new(
        0,
        format!("constant pool entry {index} is not a {expected} entry"),
    )
}

/// Decode the JVM's modified UTF-8. Unpaired surrogates become U+FFFD; callers
/// that need the exact bytes keep them alongside.
pub(crate) fn decode_modified_utf8(bytes: &[u8]) -> Result<String, String> {
    let mut units = Vec::with_capacity(bytes.len());
    let mut index = 0usize;
    while index < bytes.len() {
        let first = bytes[index] as u16;
        if first & 0x80 == 0 {
            units.push(first);
            index += 1;
        } else if first & 0xE0 == 0xC0 {
            let second = continuation(bytes, index + 1)?;
            units.push(((first & 0x1F) << 6) | second);
            index += 2;
        } else if first & 0xF0 == 0xE0 {
            let second = continuation(bytes, index + 1)?;
            let third = continuation(bytes, index + 2)?;
            units.push(((first & 0x0F) << 12) | (second << 6) | third);
            index += 3;
        } else {
            return Err(format!("invalid modified utf8 lead byte 0x{first:02x}"));
        }
    }
    Ok(String::from_utf16_lossy(&units))
}

fn continuation(bytes: &[u8], index: usize) -> Result<u16, String> {
    match bytes.get(index) {
        Some(byte) if byte & 0xC0 == 0x80 => Ok((byte & 0x3F) as u16),
        Some(byte) => Err(format!("invalid modified utf8 continuation 0x{byte:02x}")),
        None => Err("truncated modified utf8 sequence".to_string()),
    }
}

pub(crate) fn encode_modified_utf8(value: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(value.len());
    for unit in value.encode_utf16() {
        match unit {
            0x0001..=0x007F => bytes.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                bytes.push(0xC0 | (unit >> 6) as u8);
                bytes.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                bytes.push(0xE0 | (unit >> 12) as u8);
                bytes.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                bytes.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    bytes
}

/// Length of `value` once encoded as modified UTF-8.
pub(crate) fn modified_utf8_len(value: &str) -> usize {
    value
        .encode_utf16()
        .map(|unit| match unit {
            0x0001..=0x007F => 1,
            0x0000 | 0x0080..=0x07FF => 2,
            _ => 3,
        })
        .sum()
}
