use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Maximum allowed staleness between tiers before an immediate sync is forced
/// rather than deferred to a lazy background update.
pub const T_STALE_SECS: u64 = 24 * 60 * 60;

const LOCK_FILE: &str = ".lock";
const META_FILE: &str = "meta.json";

/// Header persisted at the root of each storage tier, used to decide
/// compatibility and freshness during reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TierHeader {
    pub schema_version: u32,
    pub provider_id: Option<String>,
    pub model_id: Option<String>,
    pub dimensions: usize,
    pub updated_at_unix: u64,
}

impl TierHeader {
    pub fn now(schema_version: u32, dimensions: usize, provider_id: Option<&str>, model_id: Option<&str>) -> Self {
        Self {
            schema_version,
            provider_id: provider_id.map(str::to_string),
            model_id: model_id.map(str::to_string),
            dimensions,
            updated_at_unix: now_unix(),
        }
    }

    fn is_compatible_with(&self, other: &TierHeader) -> bool {
        self.schema_version == other.schema_version
            && self.provider_id == other.provider_id
            && self.model_id == other.model_id
            && self.dimensions == other.dimensions
    }

    fn matches_config(&self, schema_version: u32, model_id: Option<&str>) -> bool {
        self.schema_version == schema_version && self.model_id.as_deref() == model_id
    }
}

/// Exclusive open-time locks on the tier directories involved in a
/// reconciliation pass. Held for as long as the owning `StorageManager` is
/// open; dropping releases them.
pub struct TierLocks {
    _local: File,
    _global: Option<File>,
}

/// Outcome of reconciling a repository-local tier against the user-global
/// tier for the same repository.
pub struct ReconcileOutcome {
    pub locks: TierLocks,
    pub global_root: Option<PathBuf>,
    /// Whether the global tier was brought up to date with the local one
    /// as part of this reconciliation pass (vs. left for a lazy update).
    pub synced_global: bool,
}

/// Resolve the user-global tier directory for a repository: a per-user
/// cache directory keyed by a stable hash of the repository's absolute path.
pub fn global_tier_root(project_root: &Path) -> Option<PathBuf> {
    let cache = dirs::cache_dir()?;
    let abs = fs::canonicalize(project_root).unwrap_or_else(|_| project_root.to_path_buf());
    let hash = xxhash_rust::xxh3::xxh3_64(abs.to_string_lossy().as_bytes());
    Some(cache.join("sift").join(format!("{hash:016x}")))
}

fn acquire_lock(tier_root: &Path) -> Result<File, StorageError> {
    fs::create_dir_all(tier_root)?;
    let lock_path = tier_root.join(LOCK_FILE);
    let file = File::create(&lock_path)?;
    file.lock_exclusive()
        .map_err(|e| StorageError::LockUnavailable {
            path: lock_path.display().to_string(),
            reason: e.to_string(),
        })?;
    Ok(file)
}

/// Read a tier's header, if present and well-formed.
pub fn read_header(tier_root: &Path) -> Option<TierHeader> {
    let data = fs::read_to_string(tier_root.join(META_FILE)).ok()?;
    serde_json::from_str(&data).ok()
}

/// Write a tier's header atomically via temp-file-and-rename, so a crash
/// mid-write never advances the visible tier version.
pub fn write_header(tier_root: &Path, header: &TierHeader) -> Result<(), StorageError> {
    let final_path = tier_root.join(META_FILE);
    let tmp_path = tier_root.join(".meta.json.tmp");
    let json = serde_json::to_string_pretty(header).unwrap_or_default();
    {
        let mut f = File::create(&tmp_path)?;
        f.write_all(json.as_bytes())?;
        f.sync_all()?;
    }
    fs::rename(&tmp_path, &final_path)?;
    Ok(())
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Copy one tier directory onto another, used both during reconciliation
/// and for the lazy/periodic sync of the local tier up to the global one.
pub fn sync_tier(src: &Path, dst: &Path) -> Result<(), StorageError> {
    copy_dir_all(src, dst).map_err(StorageError::Io)
}

/// Recursively copy a tier directory, skipping lock sentinels (each tier
/// takes out its own lock on the destination independently).
fn copy_dir_all(src: &Path, dst: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let dst_path = dst.join(entry.file_name());
        if file_type.is_dir() {
            copy_dir_all(&entry.path(), &dst_path)?;
        } else if entry.file_name() != LOCK_FILE && entry.file_name() != ".meta.json.tmp" {
            fs::copy(entry.path(), &dst_path)?;
        }
    }
    Ok(())
}

/// Run the two-tier reconciliation protocol: inspect the local and global
/// tiers, copy whichever is missing, and resolve staleness or schema/model
/// incompatibility before the caller opens its backends from `local_root`.
///
/// Locks on both tiers are taken before any inspection and returned in the
/// outcome so the caller can hold them for the lifetime of the open store,
/// preventing a second process from interleaving writes with this pass.
pub fn reconcile(
    local_root: &Path,
    project_root: &Path,
    schema_version: u32,
    dimension: usize,
    provider_id: Option<&str>,
    model_id: Option<&str>,
) -> Result<ReconcileOutcome, StorageError> {
    let global_root = global_tier_root(project_root);

    let local_lock = acquire_lock(local_root)?;
    let global_lock = match &global_root {
        Some(root) => Some(acquire_lock(root)?),
        None => None,
    };

    let local_header = read_header(local_root);
    let global_header = global_root.as_deref().and_then(read_header);

    let mut synced_global = false;

    match (&local_header, &global_header, &global_root) {
        (None, None, _) => {
            // Both absent: local is initialized lazily by the caller; the
            // global tier is created on the first sync (see `flush`).
        }
        (Some(_), None, Some(g)) => {
            copy_dir_all(local_root, g).map_err(StorageError::Io)?;
            synced_global = true;
        }
        (None, Some(_), Some(g)) => {
            copy_dir_all(g, local_root).map_err(StorageError::Io)?;
        }
        (Some(lh), Some(gh), Some(g)) => {
            if lh.is_compatible_with(gh) {
                let diff = lh.updated_at_unix.abs_diff(gh.updated_at_unix);
                if diff > T_STALE_SECS {
                    if gh.updated_at_unix > lh.updated_at_unix {
                        copy_dir_all(g, local_root).map_err(StorageError::Io)?;
                    } else {
                        copy_dir_all(local_root, g).map_err(StorageError::Io)?;
                        synced_global = true;
                    }
                }
                // Within T_stale: use the newer tier in memory (already
                // local by construction) and leave the older for a lazy
                // update on the next flush.
            } else {
                // Incompatible: keep both on disk, select whichever matches
                // the configured model/schema, never merge.
                let local_ok = lh.matches_config(schema_version, model_id);
                let global_ok = gh.matches_config(schema_version, model_id);
                if !local_ok && global_ok {
                    copy_dir_all(g, local_root).map_err(StorageError::Io)?;
                }
            }
        }
        _ => {}
    }

    let _ = dimension;

    Ok(ReconcileOutcome {
        locks: TierLocks {
            _local: local_lock,
            _global: global_lock,
        },
        global_root,
        synced_global,
    })
}
