//! Field numbers of the Kotlin metadata messages this crate edits, and
//! derivation of JVM signatures from declaration records.

use crate::error::{MetadataFormatError, MetadataResult};

use super::class_mapper::map_class;
use super::protobuf::Message;
use super::string_table::StringTable;

pub(crate) mod class {
    pub(crate) const COMPANION_OBJECT_NAME: u32 = 4;
    pub(crate) const NESTED_CLASS_NAME: u32 = 7;
    pub(crate) const CONSTRUCTOR: u32 = 8;
    pub(crate) const FUNCTION: u32 = 9;
    pub(crate) const PROPERTY: u32 = 10;
    pub(crate) const ENUM_ENTRY: u32 = 13;
    pub(crate) const SEALED_SUBCLASS_FQ_NAME: u32 = 16;
    pub(crate) const TYPE_TABLE: u32 = 30;
}

pub(crate) mod package {
    pub(crate) const FUNCTION: u32 = 3;
    pub(crate) const PROPERTY: u32 = 4;
    pub(crate) const TYPE_TABLE: u32 = 30;
}

mod function {
    pub(super) const NAME: u32 = 2;
    pub(super) const RETURN_TYPE: u32 = 3;
    pub(super) const RECEIVER_TYPE: u32 = 5;
    pub(super) const VALUE_PARAMETER: u32 = 6;
    pub(super) const RETURN_TYPE_ID: u32 = 7;
    pub(super) const RECEIVER_TYPE_ID: u32 = 8;
    pub(super) const TYPE_TABLE: u32 = 30;
    pub(super) const METHOD_SIGNATURE: u32 = 100;
}

mod property {
    pub(super) const NAME: u32 = 2;
    pub(super) const RETURN_TYPE: u32 = 3;
    pub(super) const RECEIVER_TYPE: u32 = 5;
    pub(super) const RETURN_TYPE_ID: u32 = 9;
    pub(super) const RECEIVER_TYPE_ID: u32 = 10;
    pub(super) const PROPERTY_SIGNATURE: u32 = 100;
}

mod constructor {
    pub(super) const VALUE_PARAMETER: u32 = 2;
    pub(super) const CONSTRUCTOR_SIGNATURE: u32 = 100;
}

mod value_parameter {
    pub(super) const TYPE: u32 = 3;
    pub(super) const TYPE_ID: u32 = 5;
}

mod jvm_property_signature {
    pub(super) const FIELD: u32 = 1;
    pub(super) const SYNTHETIC_METHOD: u32 = 2;
    pub(super) const GETTER: u32 = 3;
    pub(super) const SETTER: u32 = 4;
    pub(super) const DELEGATE_METHOD: u32 = 5;
}

pub(crate) const ENUM_ENTRY_NAME: u32 = 1;

const JVM_MEMBER_NAME: u32 = 1;
const JVM_MEMBER_DESC: u32 = 2;
const TYPE_CLASS_NAME: u32 = 6;
const TYPE_TABLE_TYPE: u32 = 1;

/// Types referenced by id from declarations in the same container.
#[derive(Clone, Debug, Default)]
pub(crate) struct TypeTable {
    types: Vec<Message>,
}

impl TypeTable {
    pub(crate) fn from_container(container: &Message, number: u32) -> MetadataResult<Self> {
        match container.message(number)? {
            Some(table) => Ok(Self {
                types: table.messages(TYPE_TABLE_TYPE)?,
            }),
            None => Ok(Self::default()),
        }
    }

    fn get(&self, id: i32) -> MetadataResult<&Message> {
        usize::try_from(id)
            .ok()
            .and_then(|id| self.types.get(id))
            .ok_or_else(|| MetadataFormatError(format!("type id {id} out of range")))
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct JvmSignature {
    pub(crate) name: String,
    pub(crate) descriptor: String,
}

/// Every JVM member a property can own.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct PropertySignature {
    pub(crate) name: String,
    pub(crate) has_receiver: bool,
    pub(crate) field: Option<JvmSignature>,
    pub(crate) synthetic_method: Option<JvmSignature>,
    pub(crate) getter: Option<JvmSignature>,
    pub(crate) setter: Option<JvmSignature>,
    pub(crate) delegate_method: Option<JvmSignature>,
}

pub(crate) fn function_has_receiver(record: &Message) -> bool {
    record.has(function::RECEIVER_TYPE) || record.has(function::RECEIVER_TYPE_ID)
}

/// Resolves declaration records against a string table and type table.
pub(crate) struct SignatureResolver<'a> {
    pub(crate) strings: &'a StringTable,
    pub(crate) types: &'a TypeTable,
}

impl SignatureResolver<'_> {
    pub(crate) fn name(&self, record: &Message, number: u32) -> MetadataResult<String> {
        let index = record
            .int32(number)
            .ok_or_else(|| MetadataFormatError(format!("missing name field {number}")))?;
        self.strings.get(index)
    }

    /// `None` when a type in the signature has no class name, e.g. a type parameter.
    pub(crate) fn function(&self, record: &Message) -> MetadataResult<Option<JvmSignature>> {
        let local;
        let types = match TypeTable::from_container(record, function::TYPE_TABLE)? {
            table if table.types.is_empty() => self.types,
            table => {
                local = table;
                &local
            }
        };
        let resolver = SignatureResolver {
            strings: self.strings,
            types,
        };
        let signature = record.message(function::METHOD_SIGNATURE)?;
        let name = match signature.as_ref().and_then(|s| s.int32(JVM_MEMBER_NAME)) {
            Some(index) => self.strings.get(index)?,
            None => self.name(record, function::NAME)?,
        };
        if let Some(index) = signature.as_ref().and_then(|s| s.int32(JVM_MEMBER_DESC)) {
            return Ok(Some(JvmSignature {
                name,
                descriptor: self.strings.get(index)?,
            }));
        }

        let mut parameters = Vec::new();
        if let Some(receiver) =
            resolver.resolve_type(record, function::RECEIVER_TYPE, function::RECEIVER_TYPE_ID)?
        {
            parameters.push(Some(receiver));
        }
        for parameter in record.messages(function::VALUE_PARAMETER)? {
            parameters.push(resolver.resolve_type(
                &parameter,
                value_parameter::TYPE,
                value_parameter::TYPE_ID,
            )?);
        }
        let return_type =
            resolver.resolve_type(record, function::RETURN_TYPE, function::RETURN_TYPE_ID)?;
        Ok(resolver
            .descriptor(parameters, return_type)?
            .map(|descriptor| JvmSignature { name, descriptor }))
    }

    pub(crate) fn constructor(&self, record: &Message) -> MetadataResult<Option<JvmSignature>> {
        let name = "<init>".to_string();
        let signature = record.message(constructor::CONSTRUCTOR_SIGNATURE)?;
        if let Some(index) = signature.as_ref().and_then(|s| s.int32(JVM_MEMBER_DESC)) {
            return Ok(Some(JvmSignature {
                name,
                descriptor: self.strings.get(index)?,
            }));
        }
        let mut parameters = Vec::new();
        for parameter in record.messages(constructor::VALUE_PARAMETER)? {
            parameters.push(self.resolve_type(
                &parameter,
                value_parameter::TYPE,
                value_parameter::TYPE_ID,
            )?);
        }
        let descriptor = self
            .descriptor(parameters, Some(Some("V".to_string())))?
            .map(|descriptor| JvmSignature { name, descriptor });
        Ok(descriptor)
    }

    pub(crate) fn property(&self, record: &Message) -> MetadataResult<PropertySignature> {
        let name = self.name(record, property::NAME)?;
        let has_receiver =
            record.has(property::RECEIVER_TYPE) || record.has(property::RECEIVER_TYPE_ID);
        let mut signature = PropertySignature {
            name,
            has_receiver,
            ..PropertySignature::default()
        };
        let Some(jvm) = record.message(property::PROPERTY_SIGNATURE)? else {
            return Ok(signature);
        };

        if let Some(field) = jvm.message(jvm_property_signature::FIELD)? {
            let field_name = match field.int32(JVM_MEMBER_NAME) {
                Some(index) => self.strings.get(index)?,
                None => signature.name.clone(),
            };
            let descriptor = match field.int32(JVM_MEMBER_DESC) {
                Some(index) => Some(self.strings.get(index)?),
                None => self
                    .resolve_type(record, property::RETURN_TYPE, property::RETURN_TYPE_ID)?
                    .flatten(),
            };
            signature.field = descriptor.map(|descriptor| JvmSignature {
                name: field_name,
                descriptor,
            });
        }
        signature.synthetic_method = self.method(&jvm, jvm_property_signature::SYNTHETIC_METHOD)?;
        signature.getter = self.method(&jvm, jvm_property_signature::GETTER)?;
        signature.setter = self.method(&jvm, jvm_property_signature::SETTER)?;
        signature.delegate_method = self.method(&jvm, jvm_property_signature::DELEGATE_METHOD)?;
        Ok(signature)
    }

    /// Accessor signatures are always stored in full.
    fn method(&self, container: &Message, number: u32) -> MetadataResult<Option<JvmSignature>> {
        let Some(method) = container.message(number)? else {
            return Ok(None);
        };
        match (method.int32(JVM_MEMBER_NAME), method.int32(JVM_MEMBER_DESC)) {
            (Some(name), Some(descriptor)) => Ok(Some(JvmSignature {
                name: self.strings.get(name)?,
                descriptor: self.strings.get(descriptor)?,
            })),
            _ => Ok(None),
        }
    }

    /// Outer `None`: the record has no such type. Inner `None`: the type
    /// exists but has no JVM mapping.
    fn resolve_type(
        &self,
        record: &Message,
        direct: u32,
        by_id: u32,
    ) -> MetadataResult<Option<Option<String>>> {
        let resolved;
        let ty = if let Some(ty) = record.message(direct)? {
            resolved = ty;
            &resolved
        } else if let Some(id) = record.int32(by_id) {
            self.types.get(id)?
        } else {
            return Ok(None);
        };
        match ty.int32(TYPE_CLASS_NAME) {
            Some(index) => Ok(Some(Some(map_class(&self.strings.get(index)?)))),
            None => Ok(Some(None)),
        }
    }

    fn descriptor(
        &self,
        parameters: Vec<Option<Option<String>>>,
        return_type: Option<Option<String>>,
    ) -> MetadataResult<Option<String>> {
        let mut descriptor = String::from("(");
        for parameter in parameters {
            match parameter {
                Some(Some(mapped)) => descriptor.push_str(&mapped),
                Some(None) => return Ok(None),
                None => {
                    return Err(MetadataFormatError(
                        "value parameter without a type".to_string(),
                    ));
                }
            }
        }
        descriptor.push(')');
        match return_type {
            Some(Some(mapped)) => descriptor.push_str(&mapped),
            Some(None) => return Ok(None),
            None => return Err(MetadataFormatError("function without a return type".to_string())),
        }
        Ok(Some(descriptor))
    }
}
