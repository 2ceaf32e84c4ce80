//! On-disk layout of a recording: metadata sidecar, manifest filenames and
//! dump directory versioning.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ReliveError, ReliveResult};

/// Sidecar stored next to the recording.
pub const STORAGE_META_FILENAME: &str = "meta.json";

/// Subdirectory holding the captured manifests.
pub const MANIFEST_DIR: &str = "manifests";

const MANIFEST_PREFIX: &str = "manifest-";
const MANIFEST_SUFFIX: &str = ".mpd";
const MANIFEST_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageMeta {
    /// Original manifest URL.
    #[serde(rename = "ManifestUrl")]
    pub manifest_url: String,
    /// Whether media segments were mirrored next to the manifests.
    #[serde(rename = "HaveMedia")]
    pub have_media: bool,
}

/// The manifest filename is load-bearing: replay reconstructs the capture
/// timeline from it, at second precision, in UTC.
pub fn manifest_filename(at: DateTime<Utc>) -> String {
    format!(
        "{MANIFEST_PREFIX}{}{MANIFEST_SUFFIX}",
        at.format(MANIFEST_TIME_FORMAT)
    )
}

/// Inverse of [`manifest_filename`]; `None` for files that do not belong to
/// the capture timeline.
pub fn parse_manifest_name(name: &str) -> Option<DateTime<Utc>> {
    let core = name
        .strip_prefix(MANIFEST_PREFIX)?
        .strip_suffix(MANIFEST_SUFFIX)?;
    NaiveDateTime::parse_from_str(core, MANIFEST_TIME_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Pick a fresh dump directory `<base>/<name>-<date>[.N]`, probing a bounded
/// number of numbered suffixes before giving up.
pub fn versioned_dump_dir(base: &Path, name: &str, date: NaiveDate) -> ReliveResult<PathBuf> {
    for version in 0..20 {
        let suffix = if version == 0 {
            String::new()
        } else {
            format!(".{version}")
        };
        let candidate = base.join(format!("{name}-{date}{suffix}"));
        if !candidate.exists() {
            return Ok(candidate);
        }
        tracing::debug!(dir = %candidate.display(), "directory exists");
    }
    Err(ReliveError::DumpDir(base.to_path_buf()))
}

pub fn write_meta(dump_dir: &Path, meta: &StorageMeta) -> ReliveResult<()> {
    let json = serde_json::to_vec(meta)?;
    fs::write(dump_dir.join(STORAGE_META_FILENAME), json)?;
    Ok(())
}

pub fn read_meta(dump_dir: &Path) -> ReliveResult<StorageMeta> {
    let raw = fs::read(dump_dir.join(STORAGE_META_FILENAME))?;
    Ok(serde_json::from_slice(&raw)?)
}
