//! Removal of metadata records whose JVM members have been deleted.
//!
//! Every record left behind must still map to members present in the class,
//! otherwise Kotlin reflection and the compiler fail on the filtered class.

use crate::elements::{FieldElement, MethodElement, extension_of};
use crate::error::MetadataResult;
use crate::unwanted::UnwantedCache;

use super::protobuf::Message;
use super::schema::{self, SignatureResolver, TypeTable, function_has_receiver};
use super::{KotlinMetadata, MetadataKind};

/// Outcome of filtering one metadata payload.
#[derive(Debug, Default)]
pub(crate) struct MetadataChanges {
    /// Human-readable descriptions of the removed records.
    pub(crate) removed: Vec<String>,
    /// Members that belonged to removed records and must go on the next pass.
    pub(crate) methods: Vec<MethodElement>,
    pub(crate) fields: Vec<FieldElement>,
    /// Properties whose backing field matched a deleted field only by name.
    pub(crate) mismatches: Vec<String>,
}

impl MetadataChanges {
    pub(crate) fn is_empty(&self) -> bool {
        self.removed.is_empty()
    }
}

pub(crate) fn filter_metadata(
    metadata: &mut KotlinMetadata,
    class_name: &str,
    tracker: &UnwantedCache,
) -> MetadataResult<MetadataChanges> {
    let mut changes = MetadataChanges::default();
    let is_class = metadata.kind == MetadataKind::Class;
    let type_table_field = if is_class {
        schema::class::TYPE_TABLE
    } else {
        schema::package::TYPE_TABLE
    };
    let types = TypeTable::from_container(&metadata.container, type_table_field)?;
    let filter = RecordFilter {
        class_name,
        tracker,
        resolver: SignatureResolver {
            strings: &metadata.strings,
            types: &types,
        },
    };
    let container = &mut metadata.container;

    if is_class {
        filter.constructors(container, &mut changes)?;
        filter.functions(container, schema::class::FUNCTION, Some(class_name), &mut changes)?;
        filter.properties(container, schema::class::PROPERTY, &mut changes)?;
        filter.enum_entries(container, &mut changes)?;
        filter.nested_classes(container, &mut changes)?;
        filter.sealed_subclasses(container, &mut changes)?;
        filter.companion(container, &mut changes)?;
    } else {
        filter.functions(container, schema::package::FUNCTION, None, &mut changes)?;
        filter.properties(container, schema::package::PROPERTY, &mut changes)?;
    }
    Ok(changes)
}

struct RecordFilter<'a> {
    class_name: &'a str,
    tracker: &'a UnwantedCache,
    resolver: SignatureResolver<'a>,
}

impl RecordFilter<'_> {
    fn is_deleted(&self, name: &str, descriptor: &str) -> bool {
        self.tracker.contains_method(self.class_name, name, descriptor)
    }

    fn functions(
        &self,
        container: &mut Message,
        number: u32,
        owner: Option<&str>,
        changes: &mut MetadataChanges,
    ) -> MetadataResult<()> {
        let mut keep = Vec::new();
        for record in container.messages(number)? {
            let deleted = match self.resolver.function(&record)? {
                Some(signature) if self.is_deleted(&signature.name, &signature.descriptor) => {
                    let method = MethodElement::new(signature.name, signature.descriptor);
                    changes
                        .methods
                        .extend(method.default_function(owner, function_has_receiver(&record)));
                    changes.removed.push(format!("function {method}"));
                    true
                }
                _ => false,
            };
            keep.push(!deleted);
        }
        container.retain_occurrences(number, &keep);
        Ok(())
    }

    fn constructors(&self, container: &mut Message, changes: &mut MetadataChanges) -> MetadataResult<()> {
        let mut keep = Vec::new();
        for record in container.messages(schema::class::CONSTRUCTOR)? {
            let deleted = match self.resolver.constructor(&record)? {
                Some(signature) if self.is_deleted(&signature.name, &signature.descriptor) => {
                    let constructor = MethodElement::new(signature.name, signature.descriptor);
                    changes.methods.extend(constructor.default_constructor());
                    changes.removed.push(format!("constructor {constructor}"));
                    true
                }
                _ => false,
            };
            keep.push(!deleted);
        }
        container.retain_occurrences(schema::class::CONSTRUCTOR, &keep);
        Ok(())
    }

    fn properties(
        &self,
        container: &mut Message,
        number: u32,
        changes: &mut MetadataChanges,
    ) -> MetadataResult<()> {
        let mut keep = Vec::new();
        for record in container.messages(number)? {
            let property = self.resolver.property(&record)?;
            let field = property.field.as_ref().map(|field| {
                let extension = match (&property.getter, property.has_receiver) {
                    (Some(getter), true) => extension_of(&getter.descriptor),
                    _ => "()",
                };
                FieldElement::with_extension(&field.name, &field.descriptor, extension)
            });

            let field_deleted = match &field {
                Some(field) => match self.tracker.field(self.class_name, field) {
                    Some(deleted) => {
                        if deleted.descriptor != field.descriptor {
                            changes.mismatches.push(format!(
                                "property {} expects field {} but {} was deleted",
                                property.name, field, deleted
                            ));
                        }
                        true
                    }
                    None => {
                        let plain = FieldElement::new(&field.name, &field.descriptor);
                        if field.extension != plain.extension
                            && self.tracker.contains_field(self.class_name, &plain)
                        {
                            changes.mismatches.push(format!(
                                "extension property {} shares its name with deleted field {}",
                                property.name, plain
                            ));
                        }
                        false
                    }
                },
                None => false,
            };
            let accessor_deleted = [&property.synthetic_method, &property.getter, &property.setter]
                .into_iter()
                .flatten()
                .any(|method| self.is_deleted(&method.name, &method.descriptor));

            let deleted = field_deleted || accessor_deleted;
            if deleted {
                changes.removed.push(format!("property {}", property.name));
                for method in [
                    property.getter,
                    property.setter,
                    property.synthetic_method,
                    property.delegate_method,
                ]
                .into_iter()
                .flatten()
                {
                    changes.methods.push(MethodElement::new(method.name, method.descriptor));
                }
                changes.fields.extend(field);
            }
            keep.push(!deleted);
        }
        container.retain_occurrences(number, &keep);
        Ok(())
    }

    fn enum_entries(&self, container: &mut Message, changes: &mut MetadataChanges) -> MetadataResult<()> {
        let mut keep = Vec::new();
        for record in container.messages(schema::class::ENUM_ENTRY)? {
            let deleted = match record.int32(schema::ENUM_ENTRY_NAME) {
                Some(index) => {
                    let name = self.resolver.strings.get(index)?;
                    let deleted = self.tracker.contains_field(
                        self.class_name,
                        &FieldElement::new(&name, crate::elements::DUMMY_FIELD_DESCRIPTOR),
                    );
                    if deleted {
                        changes.removed.push(format!("enum entry {name}"));
                    }
                    deleted
                }
                None => false,
            };
            keep.push(!deleted);
        }
        container.retain_occurrences(schema::class::ENUM_ENTRY, &keep);
        Ok(())
    }

    fn nested_classes(&self, container: &mut Message, changes: &mut MetadataChanges) -> MetadataResult<()> {
        let names = container.repeated_int32(schema::class::NESTED_CLASS_NAME)?;
        let mut kept = Vec::with_capacity(names.len());
        for index in &names {
            let simple_name = self.resolver.strings.get(*index)?;
            let nested = format!("{}${}", self.class_name, simple_name);
            if self.tracker.contains_class(&nested) {
                changes.removed.push(format!("nested class {nested}"));
            } else {
                kept.push(*index);
            }
        }
        if kept.len() != names.len() {
            container.set_packed_int32(schema::class::NESTED_CLASS_NAME, &kept);
        }
        Ok(())
    }

    fn sealed_subclasses(&self, container: &mut Message, changes: &mut MetadataChanges) -> MetadataResult<()> {
        let names = container.repeated_int32(schema::class::SEALED_SUBCLASS_FQ_NAME)?;
        let mut kept = Vec::with_capacity(names.len());
        for index in &names {
            let subclass = self.resolver.strings.get(*index)?.replace('.', "$");
            if self.tracker.contains_class(&subclass) {
                changes.removed.push(format!("sealed subclass {subclass}"));
            } else {
                kept.push(*index);
            }
        }
        if kept.len() != names.len() {
            container.set_packed_int32(schema::class::SEALED_SUBCLASS_FQ_NAME, &kept);
        }
        Ok(())
    }

    fn companion(&self, container: &mut Message, changes: &mut MetadataChanges) -> MetadataResult<()> {
        let Some(index) = container.int32(schema::class::COMPANION_OBJECT_NAME) else {
            return Ok(());
        };
        let companion = format!("{}${}", self.class_name, self.resolver.strings.get(index)?);
        if self.tracker.contains_class(&companion) {
            container.remove(schema::class::COMPANION_OBJECT_NAME);
            changes.removed.push(format!("companion object {companion}"));
        }
        Ok(())
    }
}
