//! Reading, filtering and repackaging of one JAR.
//!
//! Class entries are loaded up front and filtered in archive-wide passes
//! that share one [`UnwantedCache`], so a deletion found late in the archive
//! still reaches classes that precede it. Every other entry is copied.

use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

use crate::config::FilterConfig;
use crate::driver::{ClassOutcome, filter_class};
use crate::error::FilterError;
use crate::filter::FilterState;
use crate::telemetry::{Telemetry, archive_span, class_span, current_trace_id, record};
use crate::unwanted::UnwantedCache;

/// Summary of one filtered archive.
#[derive(Debug)]
pub(crate) struct ArchiveReport {
    pub(crate) source: PathBuf,
    pub(crate) target: PathBuf,
    /// Entries written to the output archive.
    pub(crate) entries: usize,
    pub(crate) classes_rewritten: usize,
    pub(crate) classes_deleted: usize,
    pub(crate) archive_passes: usize,
}

/// `<output_dir>/<stem>-filtered.jar`.
pub(crate) fn filtered_path(input: &Path, output_dir: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archive".to_string());
    output_dir.join(format!("{stem}-filtered.jar"))
}

struct ClassEntry {
    name: String,
    bytes: Vec<u8>,
    state: FilterState,
    rewritten: bool,
    deleted: bool,
}

/// Filter `source` into `target`. Nothing is written to `target` unless the
/// whole archive succeeds.
pub(crate) fn filter_archive(
    source: &Path,
    target: &Path,
    config: &FilterConfig,
    telemetry: Option<&Telemetry>,
) -> Result<ArchiveReport> {
    archive_span(telemetry, source, || filter_archive_inner(source, target, config, telemetry))
}

fn filter_archive_inner(
    source: &Path,
    target: &Path,
    config: &FilterConfig,
    telemetry: Option<&Telemetry>,
) -> Result<ArchiveReport> {
    if let Some(trace_id) = current_trace_id() {
        debug!("filtering {} in trace {}", source.display(), trace_id);
    }
    let file = fs::File::open(source)
        .map_err(FilterError::Io)
        .with_context(|| format!("failed to open {}", source.display()))?;
    let mut archive =
        ZipArchive::new(file).with_context(|| format!("failed to read {}", source.display()))?;

    let mut classes = load_classes(&mut archive, source)?;
    let archive_passes = run_passes(&mut classes, config, telemetry)?;

    let output_dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let temp = NamedTempFile::new_in(output_dir)
        .with_context(|| format!("failed to create temporary file in {}", output_dir.display()))?;
    let mut writer = ZipWriter::new(temp);
    let mut entries = 0;
    for index in 0..archive.len() {
        match classes.get(&index) {
            Some(class) if class.deleted => continue,
            Some(class) if class.rewritten => {
                let entry = archive
                    .by_index(index)
                    .with_context(|| format!("failed to read {}", source.display()))?;
                let options = if config.preserve_timestamps {
                    preserved_options(entry.compression(), entry.last_modified(), entry.unix_mode())
                } else {
                    reproducible_options()
                };
                writer
                    .start_file(class.name.as_str(), options)
                    .with_context(|| format!("failed to write {}", class.name))?;
                writer
                    .write_all(&class.bytes)
                    .with_context(|| format!("failed to write {}", class.name))?;
            }
            _ => copy_entry(&mut archive, &mut writer, index, config.preserve_timestamps)
                .with_context(|| format!("failed to copy entry {index} of {}", source.display()))?,
        }
        entries += 1;
    }
    writer.set_raw_comment(archive.comment().into());
    let temp = writer
        .finish()
        .with_context(|| format!("failed to finish {}", target.display()))?;
    temp.persist(target)
        .with_context(|| format!("failed to write {}", target.display()))?;

    let report = ArchiveReport {
        source: source.to_path_buf(),
        target: target.to_path_buf(),
        entries,
        classes_rewritten: classes.values().filter(|class| class.rewritten && !class.deleted).count(),
        classes_deleted: classes.values().filter(|class| class.deleted).count(),
        archive_passes,
    };
    record("jarfilter.classes_rewritten", report.classes_rewritten);
    record("jarfilter.classes_deleted", report.classes_deleted);
    record("jarfilter.archive_passes", report.archive_passes);
    info!(
        "{} -> {}: {} entries, {} classes rewritten, {} deleted, {} passes",
        source.display(),
        target.display(),
        report.entries,
        report.classes_rewritten,
        report.classes_deleted,
        report.archive_passes
    );
    Ok(report)
}

/// Class entries by archive index. `module-info.class` is left alone.
fn load_classes(archive: &mut ZipArchive<fs::File>, source: &Path) -> Result<HashMap<usize, ClassEntry>> {
    let mut classes = HashMap::new();
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .with_context(|| format!("failed to read {}", source.display()))?;
        let name = entry.name().to_string();
        if entry.is_dir() || !name.ends_with(".class") || name.ends_with("module-info.class") {
            continue;
        }
        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut bytes)
            .with_context(|| format!("failed to read {name}"))?;
        classes.insert(
            index,
            ClassEntry {
                name,
                bytes,
                state: FilterState::default(),
                rewritten: false,
                deleted: false,
            },
        );
    }
    Ok(classes)
}

/// Filter every class until a whole pass over the archive changes nothing.
/// Returns the number of archive passes run.
fn run_passes(
    classes: &mut HashMap<usize, ClassEntry>,
    config: &FilterConfig,
    telemetry: Option<&Telemetry>,
) -> Result<usize> {
    let mut order: Vec<usize> = classes.keys().copied().collect();
    order.sort_unstable();
    let mut tracker = UnwantedCache::default();
    let mut passes = 0;
    let mut stable = false;
    while passes < config.max_passes {
        passes += 1;
        let mut changed = false;
        for index in &order {
            let Some(class) = classes.get_mut(index) else {
                continue;
            };
            if class.deleted {
                continue;
            }
            let outcome = class_span(telemetry, &class.name, passes, || {
                let outcome = filter_class(&class.name, &class.bytes, &mut class.state, &mut tracker, config);
                if let Ok(ClassOutcome::Rewritten { passes, .. }) = &outcome {
                    record("jarfilter.class_passes", *passes);
                }
                outcome
            })?;
            match outcome {
                ClassOutcome::Unchanged => {}
                ClassOutcome::Rewritten { bytes, .. } => {
                    class.bytes = bytes;
                    class.rewritten = true;
                    changed = true;
                }
                ClassOutcome::Unwanted => {
                    class.deleted = true;
                    changed = true;
                }
            }
        }
        if !changed {
            stable = true;
            break;
        }
    }
    if !stable {
        warn!(
            "classes still changing after {} archive passes ({} classes deleted so far)",
            config.max_passes,
            tracker.class_count()
        );
    }
    Ok(passes)
}

fn copy_entry(
    archive: &mut ZipArchive<fs::File>,
    writer: &mut ZipWriter<NamedTempFile>,
    index: usize,
    preserve_timestamps: bool,
) -> Result<()> {
    if preserve_timestamps {
        writer.raw_copy_file(archive.by_index_raw(index)?)?;
        return Ok(());
    }
    let mut entry = archive.by_index(index)?;
    let name = entry.name().to_string();
    if entry.is_dir() {
        writer.add_directory(name, reproducible_options())?;
        return Ok(());
    }
    let mut contents = Vec::with_capacity(entry.size() as usize);
    entry.read_to_end(&mut contents)?;
    writer.start_file(name, reproducible_options())?;
    writer.write_all(&contents)?;
    Ok(())
}

fn preserved_options(
    compression: CompressionMethod,
    modified: Option<DateTime>,
    mode: Option<u32>,
) -> SimpleFileOptions {
    let mut options = SimpleFileOptions::default()
        .compression_method(compression)
        .last_modified_time(modified.unwrap_or_default());
    if let Some(mode) = mode {
        options = options.unix_permissions(mode);
    }
    options
}

/// Deflated, stamped 1980-01-01 00:00, no permission bits.
fn reproducible_options() -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default())
}
