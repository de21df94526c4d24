use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::FilterError;

pub(crate) const DEFAULT_MAX_PASSES: usize = 5;

/// JSON configuration document accepted by `--config`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct ConfigFile {
    #[serde(default)]
    pub(crate) annotations: AnnotationNames,
    pub(crate) max_passes: Option<usize>,
    pub(crate) preserve_timestamps: Option<bool>,
}

/// Fully qualified annotation class names, grouped by role.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct AnnotationNames {
    #[serde(default)]
    pub(crate) for_remove: Vec<String>,
    #[serde(default)]
    pub(crate) for_delete: Vec<String>,
    #[serde(default)]
    pub(crate) for_stub: Vec<String>,
}

impl AnnotationNames {
    pub(crate) fn merge(&mut self, other: AnnotationNames) {
        self.for_remove.extend(other.for_remove);
        self.for_delete.extend(other.for_delete);
        self.for_stub.extend(other.for_stub);
    }
}

impl ConfigFile {
    pub(crate) fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    pub(crate) fn parse(text: &str) -> Result<Self> {
        let deserializer = &mut serde_json::Deserializer::from_str(text);
        serde_path_to_error::deserialize(deserializer).map_err(|error| {
            FilterError::Configuration(format!("{} at {}", error.inner(), error.path())).into()
        })
    }
}

/// What a configured annotation asks the filter to do.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum AnnotationRole {
    /// Strip the annotation, keep the element.
    Remove,
    Delete,
    Stub,
}

impl AnnotationRole {
    fn set_name(self) -> &'static str {
        match self {
            AnnotationRole::Remove => "forRemove",
            AnnotationRole::Delete => "forDelete",
            AnnotationRole::Stub => "forStub",
        }
    }
}

/// Annotation descriptors by role. The three sets never overlap.
#[derive(Clone, Debug, Default)]
pub(crate) struct AnnotationPolicy {
    remove: BTreeSet<String>,
    delete: BTreeSet<String>,
    stub: BTreeSet<String>,
}

impl AnnotationPolicy {
    pub(crate) fn new(names: &AnnotationNames) -> Result<Self, FilterError> {
        let mut policy = AnnotationPolicy::default();
        for (role, names) in [
            (AnnotationRole::Remove, &names.for_remove),
            (AnnotationRole::Delete, &names.for_delete),
            (AnnotationRole::Stub, &names.for_stub),
        ] {
            for name in names {
                let descriptor = to_descriptor(name)?;
                if let Some(existing) = policy.role(&descriptor).filter(|existing| *existing != role) {
                    return Err(FilterError::Configuration(format!(
                        "annotation {name} is listed in both {} and {}",
                        existing.set_name(),
                        role.set_name()
                    )));
                }
                policy.set_mut(role).insert(descriptor);
            }
        }
        Ok(policy)
    }

    fn set_mut(&mut self, role: AnnotationRole) -> &mut BTreeSet<String> {
        match role {
            AnnotationRole::Remove => &mut self.remove,
            AnnotationRole::Delete => &mut self.delete,
            AnnotationRole::Stub => &mut self.stub,
        }
    }

    pub(crate) fn role(&self, descriptor: &str) -> Option<AnnotationRole> {
        if self.delete.contains(descriptor) {
            Some(AnnotationRole::Delete)
        } else if self.stub.contains(descriptor) {
            Some(AnnotationRole::Stub)
        } else if self.remove.contains(descriptor) {
            Some(AnnotationRole::Remove)
        } else {
            None
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.remove.is_empty() && self.delete.is_empty() && self.stub.is_empty()
    }
}

/// `com.example.Delete` → `Lcom/example/Delete;`. Descriptors pass through.
pub(crate) fn to_descriptor(name: &str) -> Result<String, FilterError> {
    let name = name.trim();
    if name.starts_with('L') && name.ends_with(';') && name.len() > 2 {
        return Ok(name.to_string());
    }
    if name.is_empty() || name.contains(['/', ';', '[']) || name.split('.').any(str::is_empty) {
        return Err(FilterError::Configuration(format!(
            "invalid annotation class name '{name}'"
        )));
    }
    Ok(format!("L{};", name.replace('.', "/")))
}

/// Everything the filter needs for one run.
#[derive(Clone, Debug)]
pub(crate) struct FilterConfig {
    pub(crate) policy: AnnotationPolicy,
    pub(crate) max_passes: usize,
    pub(crate) preserve_timestamps: bool,
}

impl FilterConfig {
    pub(crate) fn new(
        policy: AnnotationPolicy,
        max_passes: usize,
        preserve_timestamps: bool,
    ) -> Result<Self, FilterError> {
        if max_passes == 0 {
            return Err(FilterError::Configuration(
                "maxPasses must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            policy,
            max_passes,
            preserve_timestamps,
        })
    }
}
