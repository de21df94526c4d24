use std::io::{Read, Seek, SeekFrom, Write};

use anyhow::{Context, Result};
use tempfile::{SpooledTempFile, spooled_tempfile};
use tracing::{debug, warn};

use crate::config::FilterConfig;
use crate::filter::{FilterState, PassOutcome, transform_class};
use crate::unwanted::UnwantedCache;

/// Classes larger than this spill from memory to disk between passes.
const SPOOL_THRESHOLD: usize = 1 << 20;

#[derive(Debug)]
pub(crate) enum ClassOutcome {
    Unchanged,
    Rewritten { bytes: Vec<u8>, passes: usize },
    Unwanted,
}

/// Run filtering passes over one class until a pass changes nothing or
/// `max_passes` is reached.
pub(crate) fn filter_class(
    entry: &str,
    original: &[u8],
    state: &mut FilterState,
    tracker: &mut UnwantedCache,
    config: &FilterConfig,
) -> Result<ClassOutcome> {
    let mut spool: Option<SpooledTempFile> = None;
    let mut passes = 0;
    let mut stable = false;
    while passes < config.max_passes {
        let current = match spool.as_mut() {
            Some(file) => read_spooled(file).with_context(|| format!("failed to read back {entry}"))?,
            None => original.to_vec(),
        };
        passes += 1;
        match transform_class(entry, &current, state, tracker, &config.policy)? {
            PassOutcome::Unwanted => return Ok(ClassOutcome::Unwanted),
            PassOutcome::Unchanged => {
                stable = true;
                break;
            }
            PassOutcome::Modified(bytes) => {
                let mut file = spooled_tempfile(SPOOL_THRESHOLD);
                file.write_all(&bytes)
                    .with_context(|| format!("failed to spool {entry}"))?;
                spool = Some(file);
            }
        }
    }
    if !stable {
        warn!(
            "{} still changing after {} passes, keeping the last result",
            entry, config.max_passes
        );
    }

    match spool {
        None => Ok(ClassOutcome::Unchanged),
        Some(mut file) => {
            let bytes = read_spooled(&mut file).with_context(|| format!("failed to read back {entry}"))?;
            debug!("{} rewritten in {} passes", entry, passes);
            Ok(ClassOutcome::Rewritten { bytes, passes })
        }
    }
}

fn read_spooled(file: &mut SpooledTempFile) -> std::io::Result<Vec<u8>> {
    file.seek(SeekFrom::Start(0))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    Ok(bytes)
}
