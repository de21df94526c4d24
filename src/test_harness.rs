use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

use crate::metadata::METADATA_DESCRIPTOR;

/// Byte-level class file writer for tests. Constants are deduplicated and
/// every method body gets `max_stack = 4`, `max_locals = 4`.
pub(crate) struct ClassFileBuilder {
    cp: Vec<CpEntry>,
    lookup: HashMap<CpEntry, u16>,
    this_class: u16,
    super_class: u16,
    interfaces: Vec<u16>,
    fields: Vec<MemberDef>,
    methods: Vec<MemberDef>,
    class_annotations: Vec<u16>,
    metadata: Option<Vec<u8>>,
    inner_classes: Vec<[u16; 4]>,
    enclosing_method: Option<(u16, u16)>,
    bootstrap_methods: Vec<(u16, Vec<u16>)>,
}

/// Field or method definition for generated class files.
struct MemberDef {
    access: u16,
    name_index: u16,
    descriptor_index: u16,
    code: Option<Vec<u8>>,
    annotations: Vec<u16>,
}

/// Constant pool entries needed by generated class files.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
enum CpEntry {
    Utf8(String),
    Integer(i32),
    Long(i64),
    Class(u16),
    String(u16),
    FieldRef(u16, u16),
    MethodRef(u16, u16),
    NameAndType(u16, u16),
    MethodHandle(u8, u16),
    InvokeDynamic(u16, u16),
}

impl CpEntry {
    fn write(&self, bytes: &mut Vec<u8>) {
        match self {
            CpEntry::Utf8(value) => {
                bytes.push(1);
                write_u16(bytes, value.len() as u16);
                bytes.extend_from_slice(value.as_bytes());
            }
            CpEntry::Integer(value) => {
                bytes.push(3);
                bytes.extend_from_slice(&value.to_be_bytes());
            }
            CpEntry::Long(value) => {
                bytes.push(5);
                bytes.extend_from_slice(&value.to_be_bytes());
            }
            CpEntry::Class(name_index) => {
                bytes.push(7);
                write_u16(bytes, *name_index);
            }
            CpEntry::String(string_index) => {
                bytes.push(8);
                write_u16(bytes, *string_index);
            }
            CpEntry::FieldRef(class_index, name_and_type) => {
                bytes.push(9);
                write_u16(bytes, *class_index);
                write_u16(bytes, *name_and_type);
            }
            CpEntry::MethodRef(class_index, name_and_type) => {
                bytes.push(10);
                write_u16(bytes, *class_index);
                write_u16(bytes, *name_and_type);
            }
            CpEntry::NameAndType(name_index, descriptor_index) => {
                bytes.push(12);
                write_u16(bytes, *name_index);
                write_u16(bytes, *descriptor_index);
            }
            CpEntry::MethodHandle(kind, reference) => {
                bytes.push(15);
                bytes.push(*kind);
                write_u16(bytes, *reference);
            }
            CpEntry::InvokeDynamic(bootstrap, name_and_type) => {
                bytes.push(18);
                write_u16(bytes, *bootstrap);
                write_u16(bytes, *name_and_type);
            }
        }
    }

    fn slots(&self) -> usize {
        match self {
            CpEntry::Long(_) => 2,
            _ => 1,
        }
    }
}

impl ClassFileBuilder {
    pub(crate) fn new(class_name: &str, super_name: &str) -> Self {
        let mut builder = Self {
            cp: Vec::new(),
            lookup: HashMap::new(),
            this_class: 0,
            super_class: 0,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            class_annotations: Vec::new(),
            metadata: None,
            inner_classes: Vec::new(),
            enclosing_method: None,
            bootstrap_methods: Vec::new(),
        };
        builder.this_class = builder.class(class_name);
        builder.super_class = builder.class(super_name);
        builder
    }

    fn constant(&mut self, entry: CpEntry) -> u16 {
        if let Some(index) = self.lookup.get(&entry) {
            return *index;
        }
        let index = 1 + self.cp.iter().map(CpEntry::slots).sum::<usize>() as u16;
        self.lookup.insert(entry.clone(), index);
        self.cp.push(entry);
        index
    }

    pub(crate) fn utf8(&mut self, value: &str) -> u16 {
        self.constant(CpEntry::Utf8(value.to_string()))
    }

    pub(crate) fn class(&mut self, name: &str) -> u16 {
        let name_index = self.utf8(name);
        self.constant(CpEntry::Class(name_index))
    }

    pub(crate) fn string(&mut self, value: &str) -> u16 {
        let string_index = self.utf8(value);
        self.constant(CpEntry::String(string_index))
    }

    pub(crate) fn integer(&mut self, value: i32) -> u16 {
        self.constant(CpEntry::Integer(value))
    }

    pub(crate) fn add_long_constant(&mut self, value: i64) -> u16 {
        self.constant(CpEntry::Long(value))
    }

    fn name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        self.constant(CpEntry::NameAndType(name_index, descriptor_index))
    }

    pub(crate) fn field_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class(owner);
        let name_and_type = self.name_and_type(name, descriptor);
        self.constant(CpEntry::FieldRef(class_index, name_and_type))
    }

    pub(crate) fn method_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class(owner);
        let name_and_type = self.name_and_type(name, descriptor);
        self.constant(CpEntry::MethodRef(class_index, name_and_type))
    }

    /// `invokedynamic` whose bootstrap arguments hold a static method handle
    /// to `owner.name descriptor`, the way lambdas and method references do.
    pub(crate) fn invoke_dynamic(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        let factory = self.method_ref(
            "java/lang/invoke/LambdaMetafactory",
            "metafactory",
            "(Ljava/lang/invoke/MethodHandles$Lookup;Ljava/lang/String;Ljava/lang/invoke/MethodType;Ljava/lang/invoke/MethodType;Ljava/lang/invoke/MethodHandle;Ljava/lang/invoke/MethodType;)Ljava/lang/invoke/CallSite;",
        );
        let factory_handle = self.constant(CpEntry::MethodHandle(6, factory));
        let target = self.method_ref(owner, name, descriptor);
        let target_handle = self.constant(CpEntry::MethodHandle(6, target));
        let bootstrap = self.bootstrap_methods.len() as u16;
        self.bootstrap_methods.push((factory_handle, vec![target_handle]));
        let name_and_type = self.name_and_type("run", "()Ljava/lang/Runnable;");
        self.constant(CpEntry::InvokeDynamic(bootstrap, name_and_type))
    }

    pub(crate) fn add_interface(&mut self, name: &str) {
        let index = self.class(name);
        self.interfaces.push(index);
    }

    pub(crate) fn add_field(&mut self, access: u16, name: &str, descriptor: &str, annotations: &[&str]) {
        let member = self.member(access, name, descriptor, None, annotations);
        self.fields.push(member);
    }

    pub(crate) fn add_method(
        &mut self,
        access: u16,
        name: &str,
        descriptor: &str,
        code: Option<Vec<u8>>,
        annotations: &[&str],
    ) {
        let member = self.member(access, name, descriptor, code, annotations);
        self.methods.push(member);
    }

    fn member(
        &mut self,
        access: u16,
        name: &str,
        descriptor: &str,
        code: Option<Vec<u8>>,
        annotations: &[&str],
    ) -> MemberDef {
        MemberDef {
            access,
            name_index: self.utf8(name),
            descriptor_index: self.utf8(descriptor),
            code,
            annotations: annotations.iter().map(|descriptor| self.utf8(descriptor)).collect(),
        }
    }

    /// Marker annotation in the class's invisible annotation table.
    pub(crate) fn add_class_annotation(&mut self, descriptor: &str) {
        let index = self.utf8(descriptor);
        self.class_annotations.push(index);
    }

    /// Visible `kotlin.Metadata` annotation with `k`, `d1` and `d2`.
    pub(crate) fn add_kotlin_metadata(&mut self, kind: i32, d1: &[String], d2: &[String]) {
        let mut annotation = Vec::new();
        write_u16(&mut annotation, self.utf8(METADATA_DESCRIPTOR));
        write_u16(&mut annotation, 3);
        write_u16(&mut annotation, self.utf8("k"));
        annotation.push(b'I');
        write_u16(&mut annotation, self.integer(kind));
        for (name, values) in [("d1", d1), ("d2", d2)] {
            write_u16(&mut annotation, self.utf8(name));
            annotation.push(b'[');
            write_u16(&mut annotation, values.len() as u16);
            for value in values {
                annotation.push(b's');
                write_u16(&mut annotation, self.utf8(value));
            }
        }
        self.metadata = Some(annotation);
    }

    pub(crate) fn add_inner_class(&mut self, inner: &str, outer: Option<&str>, simple_name: Option<&str>, access: u16) {
        let inner = self.class(inner);
        let outer = outer.map_or(0, |outer| self.class(outer));
        let simple_name = simple_name.map_or(0, |name| self.utf8(name));
        self.inner_classes.push([inner, outer, simple_name, access]);
    }

    pub(crate) fn set_enclosing_method(&mut self, owner: &str, method: Option<(&str, &str)>) {
        let owner = self.class(owner);
        let method = method.map_or(0, |(name, descriptor)| self.name_and_type(name, descriptor));
        self.enclosing_method = Some((owner, method));
    }

    pub(crate) fn finish(mut self) -> Vec<u8> {
        // Attribute names go into the pool before it is written.
        let code_name = self.utf8("Code");
        let invisible_name = self.utf8("RuntimeInvisibleAnnotations");
        let visible_name = self.metadata.is_some().then(|| self.utf8("RuntimeVisibleAnnotations"));
        let inner_name = (!self.inner_classes.is_empty()).then(|| self.utf8("InnerClasses"));
        let enclosing_name = self.enclosing_method.is_some().then(|| self.utf8("EnclosingMethod"));
        let bootstrap_name = (!self.bootstrap_methods.is_empty()).then(|| self.utf8("BootstrapMethods"));

        let mut bytes = Vec::new();
        write_u32(&mut bytes, 0xCAFEBABE);
        write_u16(&mut bytes, 0);
        write_u16(&mut bytes, 52);
        write_u16(&mut bytes, 1 + self.cp.iter().map(CpEntry::slots).sum::<usize>() as u16);
        for entry in &self.cp {
            entry.write(&mut bytes);
        }
        write_u16(&mut bytes, 0x0021);
        write_u16(&mut bytes, self.this_class);
        write_u16(&mut bytes, self.super_class);
        write_u16(&mut bytes, self.interfaces.len() as u16);
        for interface in &self.interfaces {
            write_u16(&mut bytes, *interface);
        }
        for members in [&self.fields, &self.methods] {
            write_u16(&mut bytes, members.len() as u16);
            for member in members {
                write_u16(&mut bytes, member.access);
                write_u16(&mut bytes, member.name_index);
                write_u16(&mut bytes, member.descriptor_index);
                let count = usize::from(member.code.is_some()) + usize::from(!member.annotations.is_empty());
                write_u16(&mut bytes, count as u16);
                if let Some(code) = &member.code {
                    write_u16(&mut bytes, code_name);
                    write_u32(&mut bytes, 12 + code.len() as u32);
                    write_u16(&mut bytes, 4);
                    write_u16(&mut bytes, 4);
                    write_u32(&mut bytes, code.len() as u32);
                    bytes.extend_from_slice(code);
                    write_u16(&mut bytes, 0);
                    write_u16(&mut bytes, 0);
                }
                if !member.annotations.is_empty() {
                    write_attribute(&mut bytes, invisible_name, &marker_annotations(&member.annotations));
                }
            }
        }

        let mut attributes: Vec<(u16, Vec<u8>)> = Vec::new();
        if !self.class_annotations.is_empty() {
            attributes.push((invisible_name, marker_annotations(&self.class_annotations)));
        }
        if let (Some(name), Some(annotation)) = (visible_name, &self.metadata) {
            let mut info = Vec::new();
            write_u16(&mut info, 1);
            info.extend_from_slice(annotation);
            attributes.push((name, info));
        }
        if let Some(name) = inner_name {
            let mut info = Vec::new();
            write_u16(&mut info, self.inner_classes.len() as u16);
            for entry in &self.inner_classes {
                for value in entry {
                    write_u16(&mut info, *value);
                }
            }
            attributes.push((name, info));
        }
        if let (Some(name), Some((owner, method))) = (enclosing_name, self.enclosing_method) {
            let mut info = Vec::new();
            write_u16(&mut info, owner);
            write_u16(&mut info, method);
            attributes.push((name, info));
        }
        if let Some(name) = bootstrap_name {
            let mut info = Vec::new();
            write_u16(&mut info, self.bootstrap_methods.len() as u16);
            for (method_ref, arguments) in &self.bootstrap_methods {
                write_u16(&mut info, *method_ref);
                write_u16(&mut info, arguments.len() as u16);
                for argument in arguments {
                    write_u16(&mut info, *argument);
                }
            }
            attributes.push((name, info));
        }

        write_u16(&mut bytes, attributes.len() as u16);
        for (name, info) in attributes {
            write_attribute(&mut bytes, name, &info);
        }
        bytes
    }
}

/// Annotation table of element-less annotations.
fn marker_annotations(annotations: &[u16]) -> Vec<u8> {
    let mut info = Vec::with_capacity(2 + 4 * annotations.len());
    write_u16(&mut info, annotations.len() as u16);
    for annotation in annotations {
        write_u16(&mut info, *annotation);
        write_u16(&mut info, 0);
    }
    info
}

fn write_attribute(bytes: &mut Vec<u8>, name: u16, info: &[u8]) {
    write_u16(bytes, name);
    write_u32(bytes, info.len() as u32);
    bytes.extend_from_slice(info);
}

fn write_u16(bytes: &mut Vec<u8>, value: u16) {
    bytes.extend_from_slice(&value.to_be_bytes());
}

fn write_u32(bytes: &mut Vec<u8>, value: u32) {
    bytes.extend_from_slice(&value.to_be_bytes());
}

/// Operand bytes of a constant-pool instruction.
pub(crate) fn insn(opcode: u8, index: u16) -> Vec<u8> {
    let [high, low] = index.to_be_bytes();
    vec![opcode, high, low]
}

/// Write a JAR with deflated entries; names ending in `/` become directories.
pub(crate) fn write_jar<N: AsRef<str>, C: AsRef<[u8]>>(path: &Path, entries: &[(N, C)]) -> Result<()> {
    let file = fs::File::create(path).with_context(|| format!("create {}", path.display()))?;
    let mut writer = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    for (name, contents) in entries {
        let name = name.as_ref();
        if name.ends_with('/') {
            writer
                .add_directory(name, options)
                .with_context(|| format!("add directory {name}"))?;
            continue;
        }
        writer
            .start_file(name, options)
            .with_context(|| format!("start entry {name}"))?;
        writer
            .write_all(contents.as_ref())
            .with_context(|| format!("write entry {name}"))?;
    }
    writer.finish().context("finish jar")?;
    Ok(())
}

/// Entry names and contents of a JAR, in archive order.
pub(crate) fn read_jar(path: &Path) -> Result<Vec<(String, Vec<u8>)>> {
    use std::io::Read;

    let file = fs::File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut archive = zip::ZipArchive::new(file).with_context(|| format!("read {}", path.display()))?;
    let mut entries = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).with_context(|| format!("read entry {index}"))?;
        let mut contents = Vec::new();
        entry.read_to_end(&mut contents).context("read entry contents")?;
        entries.push((entry.name().to_string(), contents));
    }
    Ok(entries)
}

/// Source file definition for compilation.
pub(crate) struct SourceFile {
    pub(crate) path: String,
    pub(crate) contents: String,
}

/// Compiled output directories from the harness.
pub(crate) struct CompileOutput {
    temp_dir: TempDir,
    classes_dir: PathBuf,
}

impl CompileOutput {
    pub(crate) fn classes_dir(&self) -> &Path {
        &self.classes_dir
    }

    pub(crate) fn temp_dir(&self) -> &Path {
        self.temp_dir.path()
    }
}

/// Test harness that compiles Java sources, packs them into JARs and runs
/// them on a real JVM. Requires `JAVA_HOME`.
pub(crate) struct JvmTestHarness {
    java_home: PathBuf,
}

impl JvmTestHarness {
    /// `None` when no JDK is configured, so JVM-backed tests can skip.
    pub(crate) fn from_env() -> Option<Self> {
        let java_home = PathBuf::from(std::env::var_os("JAVA_HOME")?);
        let harness = Self { java_home };
        harness.tool("javac").exists().then_some(harness)
    }

    fn tool(&self, name: &str) -> PathBuf {
        let mut path = self.java_home.join("bin").join(name);
        if cfg!(windows) {
            path.set_extension("exe");
        }
        path
    }

    pub(crate) fn compile(&self, sources: &[SourceFile]) -> Result<CompileOutput> {
        let temp_dir = tempfile::tempdir().context("create temp dir")?;
        let src_dir = temp_dir.path().join("src");
        let classes_dir = temp_dir.path().join("classes");
        fs::create_dir_all(&src_dir).context("create src dir")?;
        fs::create_dir_all(&classes_dir).context("create classes dir")?;

        let mut source_paths = Vec::new();
        for source in sources {
            let path = src_dir.join(&source.path);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).context("create source parent dir")?;
            }
            fs::write(&path, source.contents.as_bytes()).context("write source file")?;
            source_paths.push(path);
        }

        let mut command = Command::new(self.tool("javac"));
        command.arg("-d").arg(&classes_dir).args(&source_paths);
        run_command(command, "javac")?;

        Ok(CompileOutput {
            temp_dir,
            classes_dir,
        })
    }

    /// Pack every file under `classes_dir` into a JAR.
    pub(crate) fn package(&self, classes_dir: &Path, jar: &Path) -> Result<()> {
        let mut files = Vec::new();
        collect_files(classes_dir, classes_dir, &mut files)?;
        files.sort();
        let mut entries = Vec::with_capacity(files.len());
        for (name, path) in files {
            let contents = fs::read(&path).with_context(|| format!("read {}", path.display()))?;
            entries.push((name, contents));
        }
        write_jar(jar, &entries)
    }

    /// Run `main_class` with the JAR on the classpath and return stdout.
    pub(crate) fn run(&self, jar: &Path, main_class: &str) -> Result<String> {
        let mut command = Command::new(self.tool("java"));
        command.arg("-Xverify:all").arg("-cp").arg(jar).arg(main_class);
        run_command(command, "java")
    }
}

fn collect_files(root: &Path, dir: &Path, files: &mut Vec<(String, PathBuf)>) -> Result<()> {
    for entry in fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
        let path = entry.context("read dir entry")?.path();
        if path.is_dir() {
            collect_files(root, &path, files)?;
        } else {
            let name = path
                .strip_prefix(root)
                .context("strip classes dir")?
                .to_string_lossy()
                .replace('\\', "/");
            files.push((name, path));
        }
    }
    Ok(())
}

fn run_command(mut command: Command, label: &str) -> Result<String> {
    let output = command.output().with_context(|| format!("run {label}"))?;
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("{label} failed: stdout={stdout} stderr={stderr}");
    }
    Ok(stdout)
}
