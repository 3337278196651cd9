//! Export/import commands (§6): `orc export`, `orc import`. Thin over
//! the `archive` module; the only real decision made here is resolving
//! a default destination/source path under `<sentinel>/exports/` when
//! the operator doesn't name one.

use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::archive::{self, ArchiveFormat, ExportOptions, ImportSummary, MergePolicy};
use crate::config::OrcConfig;
use crate::errors::OrcError;
use crate::store::Store;

pub fn parse_format(s: &str) -> Result<ArchiveFormat, OrcError> {
    match s {
        "tar.gz" | "targz" => Ok(ArchiveFormat::TarGz),
        "zip" => Ok(ArchiveFormat::Zip),
        "dir" => Ok(ArchiveFormat::Dir),
        other => Err(OrcError::InvalidArgs(format!("unknown archive format '{other}'"))),
    }
}

#[derive(Debug, Default)]
pub struct ExportArgs {
    pub task_ids: Vec<String>,
    pub all_tasks: bool,
    pub format: ArchiveFormat,
    pub initiatives: bool,
    pub minimal: bool,
    pub output: Option<PathBuf>,
}

/// `orc export`: writes the archive under `<sentinel>/exports/` unless
/// `--output` names a destination explicitly.
pub fn export(store: &Store, config: &OrcConfig, args: ExportArgs) -> Result<PathBuf, OrcError> {
    if !args.all_tasks && args.task_ids.is_empty() {
        return Err(OrcError::InvalidArgs("export requires --all-tasks or at least one task id".to_string()));
    }

    let dest = args.output.unwrap_or_else(|| {
        let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
        let filename = format!("export-{stamp}.{}", args.format.extension());
        config.sentinel.exports_dir().join(filename)
    });
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(|e| OrcError::Other(e.into()))?;
    }

    let opts = ExportOptions {
        all_tasks: args.all_tasks,
        initiatives: args.initiatives,
        minimal: args.minimal,
    };
    archive::export(store, &dest, &args.task_ids, args.format, &opts).map_err(OrcError::from)
}

/// `orc import [path] [--dry-run]`: defaults to the most recently
/// written archive under `<sentinel>/exports/` when no path is given.
pub fn import(
    store: &Store,
    config: &OrcConfig,
    path: Option<PathBuf>,
    policy: MergePolicy,
    dry_run: bool,
) -> Result<ImportSummary, OrcError> {
    let src = match path {
        Some(p) => p,
        None => latest_export(&config.sentinel.exports_dir())
            .ok_or_else(|| OrcError::InvalidArgs("no archive path given and no exports found under .orc/exports".to_string()))?,
    };

    if dry_run {
        archive::preview_import(store, &src, policy).map_err(OrcError::from)
    } else {
        archive::import(store, &src, policy).map_err(OrcError::from)
    }
}

fn latest_export(exports_dir: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(exports_dir).ok()?;
    entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .max_by_key(|p| std::fs::metadata(p).and_then(|m| m.modified()).ok())
}
