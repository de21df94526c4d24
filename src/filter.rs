//! One filtering pass over one class.
//!
//! [`FilterTransformer`] is the single [`ClassVisitor`] that applies the
//! annotation policy, follows references into members that are already gone
//! and keeps the Kotlin metadata in step with the bytecode. Whatever one pass
//! cannot settle (members named only by removed metadata records, callers of
//! members deleted later in the same class) is carried in [`FilterState`] to
//! the next pass.

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::classfile::annotation::{Annotation, ElementValue};
use crate::classfile::code::neutralize_field_access;
use crate::classfile::constant_pool::{ConstantPool, HandleRef, MemberRef};
use crate::classfile::reader::parse_class;
use crate::classfile::visitor::{
    Accepted, ClassHeader, ClassReference, ClassVisitor, Disposition, InnerClassLink, Member,
    MethodDisposition, OuterClassLink, accept,
};
use crate::classfile::writer::write_class;
use crate::config::{AnnotationPolicy, AnnotationRole};
use crate::elements::{ElementSet, FieldElement, MethodElement};
use crate::error::FilterError;
use crate::metadata::filter::filter_metadata;
use crate::metadata::{KotlinMetadata, METADATA_DESCRIPTOR, MetadataKind};
use crate::unwanted::UnwantedCache;

/// Per-class work carried from one pass to the next.
#[derive(Debug, Default)]
pub(crate) struct FilterState {
    pub(crate) deleted_methods: ElementSet<MethodElement>,
    /// Methods whose bodies are already stubs; never expires.
    pub(crate) stubbed_methods: ElementSet<MethodElement>,
    pub(crate) unwanted_fields: ElementSet<FieldElement>,
}

impl FilterState {
    /// Start a pass: speculative entries nobody matched are dropped.
    pub(crate) fn expire(&mut self) {
        self.deleted_methods.expire();
        self.unwanted_fields.expire();
    }

}

#[derive(Debug)]
pub(crate) enum PassOutcome {
    Unwanted,
    Modified(Vec<u8>),
    Unchanged,
}

/// Parse `bytes`, run one filtering pass and report what became of the class.
pub(crate) fn transform_class(
    entry: &str,
    bytes: &[u8],
    state: &mut FilterState,
    tracker: &mut UnwantedCache,
    policy: &AnnotationPolicy,
) -> Result<PassOutcome> {
    let class = parse_class(bytes).map_err(|error| error.in_entry(entry))?;
    state.expire();
    let mut transformer = FilterTransformer::new(state, tracker, policy);
    let accepted = accept(class, &mut transformer)?;
    let class_name = transformer.class_name;
    match accepted {
        Accepted::Discarded => {
            if tracker.add_class(&class_name) {
                info!("- Deleted class {}", class_name);
            }
            Ok(PassOutcome::Unwanted)
        }
        Accepted::Rewritten { class, changed: true } => {
            let rewritten = write_class(&class);
            if rewritten == bytes {
                Ok(PassOutcome::Unchanged)
            } else {
                Ok(PassOutcome::Modified(rewritten))
            }
        }
        Accepted::Rewritten { changed: false, .. } => Ok(PassOutcome::Unchanged),
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum MethodAction {
    Keep,
    Delete,
    Stub,
    AlreadyStubbed,
}

struct FilterTransformer<'a> {
    state: &'a mut FilterState,
    tracker: &'a mut UnwantedCache,
    policy: &'a AnnotationPolicy,
    class_name: String,
    unwanted: bool,
    metadata: Option<Annotation>,
    delete_field: bool,
    method_action: MethodAction,
}

impl<'a> FilterTransformer<'a> {
    fn new(state: &'a mut FilterState, tracker: &'a mut UnwantedCache, policy: &'a AnnotationPolicy) -> Self {
        Self {
            state,
            tracker,
            policy,
            class_name: String::new(),
            unwanted: false,
            metadata: None,
            delete_field: false,
            method_action: MethodAction::Keep,
        }
    }

    fn is_unwanted_method(&self, owner: &str, name: &str, descriptor: &str) -> bool {
        self.tracker.contains_method(owner, name, descriptor)
            || (owner == self.class_name
                && self
                    .state
                    .deleted_methods
                    .contains(&MethodElement::new(name, descriptor)))
    }

    fn is_unwanted_field(&self, owner: &str, name: &str, descriptor: &str) -> bool {
        let field = FieldElement::new(name, descriptor);
        self.tracker.contains_field(owner, &field)
            || (owner == self.class_name && self.state.unwanted_fields.contains(&field))
    }

    fn delete_caller(&mut self, method: &Member<'_>, reason: std::fmt::Arguments<'_>) {
        if self.method_action == MethodAction::Keep {
            debug!("{}.{}{} {}", self.class_name, method.name, method.descriptor, reason);
            self.method_action = MethodAction::Delete;
        }
    }

    /// Queue the synthetic default-argument companion of a deleted method.
    fn schedule_companion(&mut self, deleted: &MethodElement, is_static: bool) {
        if !deleted.suffix().is_empty() {
            debug!("{} is synthetic for {}, no default companion", deleted, deleted.visible_name());
            return;
        }
        let companion = if deleted.is_object_constructor() {
            deleted.default_constructor()
        } else {
            let owner = (!is_static).then_some(self.class_name.as_str());
            deleted.default_function(owner, false)
        };
        if let Some(companion) = companion {
            self.state.deleted_methods.insert(companion);
        }
    }

    fn filter_kotlin_metadata(&mut self, pool: &mut ConstantPool, mut annotation: Annotation) -> Result<Vec<Annotation>> {
        let class = self.class_name.clone();
        let malformed = |error: crate::error::ClassFormatError| error.in_entry(&class);
        let kind = MetadataKind::from_code(annotation.int_element(pool, "k").map_err(malformed)?.unwrap_or(1));
        if !kind.is_supported() {
            match kind {
                MetadataKind::Unknown(code) => {
                    warn!("{}", FilterError::UnsupportedMetadataShape { class: class.clone(), kind: code });
                }
                _ => debug!("{} carries {:?} metadata (k={}), left as is", class, kind, kind.code()),
            }
            return Ok(Vec::new());
        }
        let d1 = annotation.string_array_element(pool, "d1").map_err(malformed)?.unwrap_or_default();
        let d2 = annotation.string_array_element(pool, "d2").map_err(malformed)?.unwrap_or_default();
        if d1.is_empty() {
            return Ok(Vec::new());
        }

        let mut metadata = KotlinMetadata::decode(kind, &d1, &d2).map_err(|error| error.in_class(&class))?;
        let changes =
            filter_metadata(&mut metadata, &class, &*self.tracker).map_err(|error| error.in_class(&class))?;
        for mismatch in &changes.mismatches {
            warn!("signature mismatch in {}: {}", class, mismatch);
        }
        if changes.is_empty() {
            return Ok(Vec::new());
        }
        for removed in &changes.removed {
            info!("- Removed metadata for {} from {}", removed, class);
        }
        for method in changes.methods {
            self.state.deleted_methods.insert(method);
        }
        for field in changes.fields {
            self.state.unwanted_fields.insert(field);
        }

        let d1 = ElementValue::string_array(pool, &metadata.encode()).map_err(malformed)?;
        annotation.set_element(pool, "d1", d1).map_err(malformed)?;
        Ok(vec![annotation])
    }
}

impl ClassVisitor for FilterTransformer<'_> {
    fn visit_header(&mut self, header: &ClassHeader<'_>) {
        self.class_name = header.name.to_string();
        if self.tracker.contains_class(header.name) {
            self.unwanted = true;
            return;
        }
        let unwanted_parent = header
            .super_name
            .into_iter()
            .chain(header.interfaces.iter().copied())
            .find(|parent| self.tracker.contains_class(parent));
        if let Some(parent) = unwanted_parent {
            debug!("{} extends unwanted {}", self.class_name, parent);
            self.unwanted = true;
        }
    }

    fn visit_class_annotation(&mut self, descriptor: &str, annotation: &Annotation) -> Disposition {
        if descriptor == METADATA_DESCRIPTOR {
            self.metadata = Some(annotation.clone());
            return Disposition::Keep;
        }
        match self.policy.role(descriptor) {
            Some(AnnotationRole::Delete) => {
                self.unwanted = true;
                Disposition::Keep
            }
            Some(AnnotationRole::Remove) => {
                info!("- Removed annotation {} from class {}", descriptor, self.class_name);
                Disposition::Discard
            }
            Some(AnnotationRole::Stub) => {
                warn!("classes cannot be stubbed, ignoring {} on {}", descriptor, self.class_name);
                Disposition::Keep
            }
            None => Disposition::Keep,
        }
    }

    fn visit_outer_class(&mut self, link: &OuterClassLink<'_>) {
        let enclosing_deleted = link
            .method
            .is_some_and(|(name, descriptor)| self.tracker.contains_method(link.owner, name, descriptor));
        if self.tracker.contains_class(link.owner) || enclosing_deleted {
            debug!("{} is enclosed by unwanted {}", self.class_name, link.owner);
            self.unwanted = true;
        }
    }

    fn visit_inner_class(&mut self, link: &InnerClassLink<'_>) -> Disposition {
        if link.inner == self.class_name {
            if link.outer.is_some_and(|outer| self.tracker.contains_class(outer)) {
                self.unwanted = true;
            }
            return Disposition::Keep;
        }
        if self.tracker.contains_class(link.inner) {
            debug!(
                "- Dropped inner class entry {} ({}) from {}",
                link.inner,
                link.inner_name.unwrap_or("anonymous"),
                self.class_name
            );
            return Disposition::Discard;
        }
        Disposition::Keep
    }

    fn visit_class_reference(&mut self, kind: ClassReference, class_name: &str) -> Disposition {
        if !self.tracker.contains_class(class_name) {
            return Disposition::Keep;
        }
        match kind {
            ClassReference::NestHost => {
                self.unwanted = true;
                Disposition::Keep
            }
            ClassReference::NestMember | ClassReference::PermittedSubclass => Disposition::Discard,
        }
    }

    fn is_discarded(&self) -> bool {
        self.unwanted
    }

    fn visit_field(&mut self, field: &Member<'_>) {
        self.delete_field = self.is_unwanted_field(&self.class_name, field.name, field.descriptor);
    }

    fn visit_field_annotation(&mut self, field: &Member<'_>, descriptor: &str) -> Disposition {
        match self.policy.role(descriptor) {
            Some(AnnotationRole::Delete) => {
                self.delete_field = true;
                Disposition::Keep
            }
            Some(AnnotationRole::Remove) => {
                info!("- Removed annotation {} from field {}.{}", descriptor, self.class_name, field.name);
                Disposition::Discard
            }
            Some(AnnotationRole::Stub) => {
                warn!("fields cannot be stubbed, ignoring {} on {}.{}", descriptor, self.class_name, field.name);
                Disposition::Keep
            }
            None => Disposition::Keep,
        }
    }

    fn visit_field_end(&mut self, field: &Member<'_>) -> Disposition {
        if !self.delete_field {
            return Disposition::Keep;
        }
        let element = FieldElement::new(field.name, field.descriptor);
        self.state.unwanted_fields.remove(&element);
        info!("- Deleted field {}.{}", self.class_name, element);
        self.tracker.add_field(&self.class_name, element);
        Disposition::Discard
    }

    fn visit_method(&mut self, method: &Member<'_>) {
        let element = MethodElement::new(method.name, method.descriptor);
        self.method_action = if self.is_unwanted_method(&self.class_name, method.name, method.descriptor) {
            MethodAction::Delete
        } else if self.state.stubbed_methods.contains(&element) {
            MethodAction::AlreadyStubbed
        } else {
            MethodAction::Keep
        };
    }

    fn visit_method_annotation(&mut self, method: &Member<'_>, descriptor: &str) -> Disposition {
        match self.policy.role(descriptor) {
            Some(AnnotationRole::Delete) => {
                self.method_action = MethodAction::Delete;
                Disposition::Keep
            }
            Some(AnnotationRole::Stub) => {
                if self.method_action == MethodAction::Keep {
                    if MethodElement::new(method.name, method.descriptor).is_constructor() {
                        warn!(
                            "constructors cannot be stubbed, keeping {}.{}{}",
                            self.class_name, method.name, method.descriptor
                        );
                    } else {
                        self.method_action = MethodAction::Stub;
                    }
                }
                Disposition::Keep
            }
            Some(AnnotationRole::Remove) => {
                info!(
                    "- Removed annotation {} from method {}.{}{}",
                    descriptor, self.class_name, method.name, method.descriptor
                );
                Disposition::Discard
            }
            None => Disposition::Keep,
        }
    }

    fn visit_code(&mut self, _method: &Member<'_>) -> bool {
        self.method_action == MethodAction::Keep
    }

    fn visit_method_insn(&mut self, method: &Member<'_>, _opcode: u8, target: &MemberRef<'_>) {
        if self.is_unwanted_method(target.owner, target.name, target.descriptor) {
            let kind = if target.is_interface { "interface method" } else { "method" };
            self.delete_caller(
                method,
                format_args!("invokes unwanted {} {}.{}{}", kind, target.owner, target.name, target.descriptor),
            );
        }
    }

    fn visit_field_insn(&mut self, method: &Member<'_>, opcode: u8, target: &MemberRef<'_>) -> Option<[u8; 3]> {
        if self.method_action != MethodAction::Keep
            || !self.is_unwanted_field(target.owner, target.name, target.descriptor)
        {
            return None;
        }
        if MethodElement::new(method.name, method.descriptor).is_constructor() {
            debug!(
                "- Neutralized access to {}.{} in {}.{}",
                target.owner, target.name, self.class_name, method.name
            );
            return neutralize_field_access(opcode, target.descriptor);
        }
        self.delete_caller(
            method,
            format_args!("accesses unwanted field {}.{}", target.owner, target.name),
        );
        None
    }

    fn visit_invoke_dynamic_insn(&mut self, method: &Member<'_>, handles: &[HandleRef<'_>]) {
        let unwanted = handles.iter().find(|handle| {
            let target = &handle.member;
            if handle.is_field() {
                self.is_unwanted_field(target.owner, target.name, target.descriptor)
            } else {
                self.is_unwanted_method(target.owner, target.name, target.descriptor)
            }
        });
        if let Some(handle) = unwanted {
            self.delete_caller(
                method,
                format_args!("binds unwanted {}.{}", handle.member.owner, handle.member.name),
            );
        }
    }

    fn visit_method_end(&mut self, method: &Member<'_>) -> MethodDisposition {
        let element = MethodElement::with_access(method.name, method.descriptor, method.access_flags);
        match self.method_action {
            MethodAction::Delete => {
                self.state.deleted_methods.remove(&element);
                self.schedule_companion(&element, method.is_static());
                info!("- Deleted method {}.{}", self.class_name, element);
                self.tracker.add_method(&self.class_name, element);
                MethodDisposition::Delete
            }
            MethodAction::Stub => {
                let kind = if element.is_void_function() { "empty" } else { "throwing" };
                info!("- Stubbed method {}.{} ({})", self.class_name, element, kind);
                self.state.stubbed_methods.insert(element);
                MethodDisposition::Stub
            }
            MethodAction::AlreadyStubbed | MethodAction::Keep => MethodDisposition::Keep,
        }
    }

    fn visit_end(&mut self, pool: &mut ConstantPool) -> Result<Vec<Annotation>> {
        match self.metadata.take() {
            Some(annotation) if !self.unwanted => self.filter_kotlin_metadata(pool, annotation),
            _ => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::code::parse_code;
    use crate::classfile::{CODE, ClassFile, find_attribute};
    use crate::classfile::opcodes;
    use crate::config::AnnotationNames;
    use crate::metadata::protobuf::Message;
    use crate::metadata::schema::{self, tests::RecordBuilder};
    use crate::metadata::tests::encode_d1;
    use crate::test_harness::{ClassFileBuilder, insn};

    const FOO: &str = "com/example/Foo";
    const DELETE: &str = "Lcom/example/Delete;";
    const STUB: &str = "Lcom/example/Stub;";
    const REMOVE: &str = "Lcom/example/Remove;";

    fn policy() -> AnnotationPolicy {
        AnnotationPolicy::new(&AnnotationNames {
            for_remove: vec!["com.example.Remove".to_string()],
            for_delete: vec!["com.example.Delete".to_string()],
            for_stub: vec!["com.example.Stub".to_string()],
        })
        .expect("policy")
    }

    /// Run passes until the class settles; returns final bytes (None when
    /// unwanted) and the number of passes that changed something.
    fn settle(bytes: Vec<u8>, tracker: &mut UnwantedCache) -> (Option<Vec<u8>>, usize) {
        let policy = policy();
        let mut state = FilterState::default();
        let mut current = bytes;
        for pass in 0..10 {
            match transform_class("Foo.class", &current, &mut state, tracker, &policy).expect("transform") {
                PassOutcome::Unwanted => return (None, pass + 1),
                PassOutcome::Modified(next) => current = next,
                PassOutcome::Unchanged => return (Some(current), pass),
            }
        }
        panic!("class did not settle");
    }

    fn parse(bytes: &[u8]) -> ClassFile {
        parse_class(bytes).expect("parse")
    }

    fn method_names(class: &ClassFile) -> Vec<String> {
        class
            .methods
            .iter()
            .map(|method| class.constant_pool.utf8(method.name_index).expect("name").to_string())
            .collect()
    }

    fn field_names(class: &ClassFile) -> Vec<String> {
        class
            .fields
            .iter()
            .map(|field| class.constant_pool.utf8(field.name_index).expect("name").to_string())
            .collect()
    }

    fn code_of(class: &ClassFile, name: &str) -> Vec<u8> {
        let method = class
            .methods
            .iter()
            .find(|method| class.constant_pool.utf8(method.name_index).ok() == Some(name))
            .expect("method");
        let info = &find_attribute(&class.constant_pool, &method.attributes, CODE)
            .expect("code")
            .info;
        parse_code(info).expect("parse code").code.to_vec()
    }

    fn invoke_virtual(builder: &mut ClassFileBuilder, name: &str) -> Vec<u8> {
        let index = builder.method_ref(FOO, name, "()V");
        let mut code = vec![0x2a];
        code.extend(insn(opcodes::INVOKEVIRTUAL, index));
        code.push(opcodes::RETURN);
        code
    }

    #[test]
    fn stable_class_is_unchanged() {
        let mut builder = ClassFileBuilder::new(FOO, "java/lang/Object");
        builder.add_field(0x0002, "count", "I", &[]);
        builder.add_method(0x0001, "bar", "()V", Some(vec![opcodes::RETURN]), &[]);
        let bytes = builder.finish();

        let (output, passes) = settle(bytes.clone(), &mut UnwantedCache::default());

        assert_eq!(output, Some(bytes));
        assert_eq!(passes, 0);
    }

    #[test]
    fn deleted_method_takes_its_callers_with_it() {
        let mut builder = ClassFileBuilder::new(FOO, "java/lang/Object");
        let baz_code = invoke_virtual(&mut builder, "bar");
        builder.add_method(0x0001, "baz", "()V", Some(baz_code), &[]);
        builder.add_method(0x0001, "bar", "()V", Some(vec![opcodes::RETURN]), &[DELETE]);
        builder.add_method(0x0001, "keep", "()V", Some(vec![opcodes::RETURN]), &[]);
        let mut tracker = UnwantedCache::default();

        let (output, passes) = settle(builder.finish(), &mut tracker);

        let class = parse(&output.expect("kept"));
        assert_eq!(method_names(&class), vec!["keep"]);
        assert_eq!(passes, 2);
        assert!(tracker.contains_method(FOO, "bar", "()V"));
        assert!(tracker.contains_method(FOO, "baz", "()V"));
    }

    #[test]
    fn deleted_methods_are_removed_from_metadata() {
        let mut records = RecordBuilder::default();
        let mut container = Message::default();
        let bar = records.function("bar", &[], "kotlin/Unit");
        let baz = records.function("baz", &[], "kotlin/Unit");
        container
            .push_message(schema::class::FUNCTION, &bar)
            .push_message(schema::class::FUNCTION, &baz);
        let mut builder = ClassFileBuilder::new(FOO, "java/lang/Object");
        builder.add_kotlin_metadata(1, &encode_d1(&container), &records.strings);
        builder.add_method(0x0001, "bar", "()V", Some(vec![opcodes::RETURN]), &[DELETE]);
        let baz_code = invoke_virtual(&mut builder, "bar");
        builder.add_method(0x0001, "baz", "()V", Some(baz_code), &[]);

        let (output, _) = settle(builder.finish(), &mut UnwantedCache::default());

        let class = parse(&output.expect("kept"));
        assert!(method_names(&class).is_empty());
        let annotation = metadata_annotation(&class);
        let d1 = annotation
            .string_array_element(&class.constant_pool, "d1")
            .expect("d1")
            .expect("present");
        let metadata = KotlinMetadata::decode(MetadataKind::Class, &d1, &records.strings).expect("decode");
        assert!(!metadata.container.has(schema::class::FUNCTION));
    }

    fn metadata_annotation(class: &ClassFile) -> Annotation {
        let attribute = class.attribute(crate::classfile::RUNTIME_VISIBLE_ANNOTATIONS).expect("annotations");
        crate::classfile::annotation::parse_annotations(&attribute.info)
            .expect("parse annotations")
            .into_iter()
            .find(|annotation| annotation.descriptor(&class.constant_pool).ok() == Some(METADATA_DESCRIPTOR))
            .expect("metadata")
    }

    #[test]
    fn property_removal_schedules_its_accessors() {
        let mut records = RecordBuilder::default();
        let mut container = Message::default();
        let name = records.property(
            "name",
            "kotlin/String",
            Some(("getName", "()Ljava/lang/String;")),
            None,
        );
        container.push_message(schema::class::PROPERTY, &name);
        let mut builder = ClassFileBuilder::new(FOO, "java/lang/Object");
        builder.add_kotlin_metadata(1, &encode_d1(&container), &records.strings);
        let field = builder.field_ref(FOO, "name", "Ljava/lang/String;");
        builder.add_field(0x0002, "name", "Ljava/lang/String;", &[]);
        builder.add_method(
            0x0001,
            "getName",
            "()Ljava/lang/String;",
            Some({
                let mut code = vec![0x2a];
                code.extend(insn(opcodes::GETFIELD, field));
                code.push(0xb0);
                code
            }),
            &[DELETE],
        );

        let (output, _) = settle(builder.finish(), &mut UnwantedCache::default());

        let class = parse(&output.expect("kept"));
        assert!(method_names(&class).is_empty());
        assert!(field_names(&class).is_empty());
    }

    #[test]
    fn field_writes_in_constructor_are_neutralized() {
        let mut builder = ClassFileBuilder::new(FOO, "java/lang/Object");
        let super_init = builder.method_ref("java/lang/Object", "<init>", "()V");
        let name = builder.field_ref(FOO, "name", "Ljava/lang/String;");
        let label = builder.string("x");
        builder.add_field(0x0002, "name", "Ljava/lang/String;", &[DELETE]);
        let mut code = vec![0x2a];
        code.extend(insn(opcodes::INVOKESPECIAL, super_init));
        code.extend([0x2a, opcodes::LDC, label as u8]);
        code.extend(insn(opcodes::PUTFIELD, name));
        code.push(opcodes::RETURN);
        builder.add_method(0x0001, "<init>", "()V", Some(code), &[]);
        let mut tracker = UnwantedCache::default();

        let (output, passes) = settle(builder.finish(), &mut tracker);

        let class = parse(&output.expect("kept"));
        assert_eq!(passes, 1);
        assert!(field_names(&class).is_empty());
        assert_eq!(method_names(&class), vec!["<init>"]);
        let code = code_of(&class, "<init>");
        assert_eq!(&code[4..], &[0x2a, opcodes::LDC, label as u8, opcodes::POP, opcodes::POP, opcodes::NOP, opcodes::RETURN]);
        assert!(tracker.contains_field(FOO, &FieldElement::new("name", "?")));
    }

    #[test]
    fn field_reads_outside_constructors_delete_the_reader() {
        let mut builder = ClassFileBuilder::new(FOO, "java/lang/Object");
        let count = builder.field_ref(FOO, "count", "I");
        builder.add_field(0x0002, "count", "I", &[DELETE]);
        let mut code = vec![0x2a];
        code.extend(insn(opcodes::GETFIELD, count));
        code.push(0xac);
        builder.add_method(0x0001, "count", "()I", Some(code), &[]);

        let (output, _) = settle(builder.finish(), &mut UnwantedCache::default());

        let class = parse(&output.expect("kept"));
        assert!(method_names(&class).is_empty());
    }

    #[test]
    fn stubbed_method_settles_after_one_pass() {
        let mut builder = ClassFileBuilder::new(FOO, "java/lang/Object");
        builder.add_method(0x0001, "answer", "()I", Some(vec![0x10, 42, 0xac]), &[STUB]);
        builder.add_method(0x0001, "log", "()V", Some(vec![opcodes::NOP, opcodes::RETURN]), &[STUB]);

        let (output, passes) = settle(builder.finish(), &mut UnwantedCache::default());

        let class = parse(&output.expect("kept"));
        assert_eq!(passes, 1);
        assert_eq!(method_names(&class), vec!["answer", "log"]);
        assert_eq!(code_of(&class, "answer").last(), Some(&opcodes::ATHROW));
        assert_eq!(code_of(&class, "log"), vec![opcodes::RETURN]);
    }

    #[test]
    fn constructors_are_never_stubbed() {
        let mut builder = ClassFileBuilder::new(FOO, "java/lang/Object");
        builder.add_method(0x0001, "<init>", "()V", Some(vec![opcodes::RETURN]), &[STUB]);
        let bytes = builder.finish();

        let (output, passes) = settle(bytes.clone(), &mut UnwantedCache::default());

        assert_eq!(output, Some(bytes));
        assert_eq!(passes, 0);
    }

    #[test]
    fn remove_annotations_are_stripped() {
        let mut builder = ClassFileBuilder::new(FOO, "java/lang/Object");
        builder.add_class_annotation(REMOVE);
        builder.add_field(0x0002, "count", "I", &[REMOVE]);
        builder.add_method(0x0001, "bar", "()V", Some(vec![opcodes::RETURN]), &[REMOVE]);

        let (output, passes) = settle(builder.finish(), &mut UnwantedCache::default());

        let class = parse(&output.expect("kept"));
        assert_eq!(passes, 1);
        assert_eq!(field_names(&class), vec!["count"]);
        assert_eq!(method_names(&class), vec!["bar"]);
        assert!(class.attributes.is_empty());
        assert!(class.fields[0].attributes.is_empty());
    }

    #[test]
    fn annotated_class_is_unwanted() {
        let mut builder = ClassFileBuilder::new(FOO, "java/lang/Object");
        builder.add_class_annotation(DELETE);
        let mut tracker = UnwantedCache::default();

        let (output, _) = settle(builder.finish(), &mut tracker);

        assert!(output.is_none());
        assert!(tracker.contains_class(FOO));
    }

    #[test]
    fn subclasses_and_inner_classes_of_unwanted_classes_follow() {
        let mut tracker = UnwantedCache::default();
        tracker.add_class(FOO);

        let subclass = ClassFileBuilder::new("com/example/Sub", FOO).finish();
        let mut implementor = ClassFileBuilder::new("com/example/Impl", "java/lang/Object");
        implementor.add_interface(FOO);
        let mut inner = ClassFileBuilder::new("com/example/Foo$Bar", "java/lang/Object");
        inner.add_inner_class("com/example/Foo$Bar", Some(FOO), Some("Bar"), 0x0009);
        let mut local = ClassFileBuilder::new("com/example/Outer$1", "java/lang/Object");
        local.set_enclosing_method(FOO, Some(("run", "()V")));

        assert!(settle(subclass, &mut tracker).0.is_none());
        assert!(settle(implementor.finish(), &mut tracker).0.is_none());
        assert!(settle(inner.finish(), &mut tracker).0.is_none());
        assert!(settle(local.finish(), &mut tracker).0.is_none());
        assert!(tracker.contains_class("com/example/Foo$Bar"));
    }

    #[test]
    fn inner_class_entries_of_unwanted_classes_are_dropped() {
        let mut tracker = UnwantedCache::default();
        tracker.add_class("com/example/Foo$Bar");
        let mut builder = ClassFileBuilder::new(FOO, "java/lang/Object");
        builder.add_inner_class("com/example/Foo$Bar", Some(FOO), Some("Bar"), 0x0009);
        builder.add_inner_class("com/example/Foo$Baz", Some(FOO), Some("Baz"), 0x0009);

        let (output, _) = settle(builder.finish(), &mut tracker);

        let class = parse(&output.expect("kept"));
        let info = &class.attribute(crate::classfile::INNER_CLASSES).expect("inner").info;
        assert_eq!(u16::from_be_bytes([info[0], info[1]]), 1);
    }

    #[test]
    fn lambda_bound_to_unwanted_method_deletes_caller() {
        let mut tracker = UnwantedCache::default();
        tracker.add_method("com/example/Other", MethodElement::new("gone", "()V"));
        let mut builder = ClassFileBuilder::new(FOO, "java/lang/Object");
        let site = builder.invoke_dynamic("com/example/Other", "gone", "()V");
        let mut code = insn(opcodes::INVOKEDYNAMIC, site);
        code.extend([0, 0, opcodes::POP, opcodes::RETURN]);
        builder.add_method(0x0009, "schedule", "()V", Some(code), &[]);

        let (output, _) = settle(builder.finish(), &mut tracker);

        let class = parse(&output.expect("kept"));
        assert!(method_names(&class).is_empty());
        assert!(tracker.contains_method(FOO, "schedule", "()V"));
    }

    #[test]
    fn calls_into_unwanted_classes_delete_the_caller() {
        let mut tracker = UnwantedCache::default();
        tracker.add_class("com/example/Gone");
        let mut builder = ClassFileBuilder::new(FOO, "java/lang/Object");
        let target = builder.method_ref("com/example/Gone", "make", "()V");
        let mut code = insn(opcodes::INVOKESTATIC, target);
        code.push(opcodes::RETURN);
        builder.add_method(0x0009, "build", "()V", Some(code), &[]);
        builder.add_method(0x0009, "other", "()V", Some(vec![opcodes::RETURN]), &[]);

        let (output, _) = settle(builder.finish(), &mut tracker);

        let class = parse(&output.expect("kept"));
        assert_eq!(method_names(&class), vec!["other"]);
    }

    #[test]
    fn unknown_metadata_kind_is_left_alone() {
        let mut builder = ClassFileBuilder::new(FOO, "java/lang/Object");
        builder.add_kotlin_metadata(99, &["garbage".to_string()], &[]);
        builder.add_method(0x0001, "bar", "()V", Some(vec![opcodes::RETURN]), &[DELETE]);

        let (output, passes) = settle(builder.finish(), &mut UnwantedCache::default());

        let class = parse(&output.expect("kept"));
        assert_eq!(passes, 1);
        assert!(method_names(&class).is_empty());
    }

    #[test]
    fn corrupt_metadata_is_fatal() {
        let mut builder = ClassFileBuilder::new(FOO, "java/lang/Object");
        builder.add_kotlin_metadata(1, &["\u{0}\u{5}".to_string()], &[]);
        let mut state = FilterState::default();

        let error = transform_class(
            "com/example/Foo.class",
            &builder.finish(),
            &mut state,
            &mut UnwantedCache::default(),
            &policy(),
        )
        .expect_err("corrupt");

        assert!(matches!(
            error.downcast_ref::<FilterError>(),
            Some(FilterError::CorruptMetadata { .. })
        ));
    }

    #[test]
    fn malformed_class_names_the_entry() {
        let mut state = FilterState::default();

        let error = transform_class(
            "broken/Thing.class",
            &[0xCA, 0xFE],
            &mut state,
            &mut UnwantedCache::default(),
            &policy(),
        )
        .expect_err("malformed");

        assert!(error.to_string().contains("broken/Thing.class"), "{error}");
    }
}
