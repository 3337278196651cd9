//! Export/import (§6): self-contained backups of the Store, encoded
//! as tar.gz, zip, or a plain directory tree (`tar::Builder` over a
//! `GzEncoder`, `zip::ZipWriter`, or a directory walk for `--format dir`).

use std::collections::HashSet;
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};

use crate::errors::ArchiveError;
use crate::store::Store;
use crate::store::models::{
    Attachment, GateDecisionRecord, Initiative, Task, TaskStatus, TranscriptMessage,
};

/// Archive-bomb defense: no single file inside an import archive may
/// exceed this, compressed or not.
const MAX_ENTRY_BYTES: u64 = 100 * 1024 * 1024;
const MANIFEST_VERSION: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    TarGz,
    Zip,
    Dir,
}

impl Default for ArchiveFormat {
    fn default() -> Self {
        ArchiveFormat::TarGz
    }
}

impl ArchiveFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveFormat::TarGz => "tar.gz",
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::Dir => "",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// Keep local unless the incoming record is at least as fresh.
    Default,
    Force,
    SkipExisting,
}

#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    pub all_tasks: bool,
    pub initiatives: bool,
    pub minimal: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    version: u32,
    exported_at: DateTime<Utc>,
    hostname: String,
    task_count: usize,
    initiative_count: usize,
    includes_state: bool,
    includes_transcripts: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct TaskBundle {
    task: Task,
    #[serde(default)]
    transcripts: Vec<TranscriptMessage>,
    #[serde(default)]
    gate_decisions: Vec<GateDecisionRecord>,
    #[serde(default)]
    attachments: Vec<Attachment>,
}

#[derive(Debug, Serialize, Deserialize)]
struct InitiativeBundle {
    #[serde(rename = "type")]
    kind: String,
    initiative: Initiative,
}

/// Writes an export archive for `task_ids` (or every task, if
/// `opts.all_tasks`) to `dest_path` in `format`, returning the path
/// actually written (a directory for `ArchiveFormat::Dir`, a file
/// otherwise).
pub fn export(
    store: &Store,
    dest_path: &Path,
    task_ids: &[String],
    format: ArchiveFormat,
    opts: &ExportOptions,
) -> Result<PathBuf, ArchiveError> {
    let tasks = if opts.all_tasks {
        store.load_all_tasks()?
    } else {
        let mut out = Vec::with_capacity(task_ids.len());
        for id in task_ids {
            out.push(store.load_task(id)?);
        }
        out
    };

    let initiatives = if opts.initiatives {
        store.load_all_initiatives()?
    } else {
        Vec::new()
    };

    let mut entries: Vec<(String, Vec<u8>)> = Vec::new();

    for task in &tasks {
        let bundle = if opts.minimal {
            TaskBundle {
                task: task.clone(),
                transcripts: Vec::new(),
                gate_decisions: Vec::new(),
                attachments: Vec::new(),
            }
        } else {
            TaskBundle {
                task: task.clone(),
                transcripts: store.get_transcripts(&task.id)?,
                gate_decisions: store.list_gate_decisions(&task.id)?,
                attachments: store.list_attachments(&task.id)?,
            }
        };
        let yaml = serde_yaml::to_string(&bundle)?;
        entries.push((format!("tasks/{}.yaml", task.id), yaml.into_bytes()));
    }

    for initiative in &initiatives {
        let bundle = InitiativeBundle {
            kind: "initiative".to_string(),
            initiative: initiative.clone(),
        };
        let yaml = serde_yaml::to_string(&bundle)?;
        entries.push((format!("initiatives/{}.yaml", initiative.id), yaml.into_bytes()));
    }

    let manifest = Manifest {
        version: MANIFEST_VERSION,
        exported_at: Utc::now(),
        hostname: crate::util::hostname(),
        task_count: tasks.len(),
        initiative_count: initiatives.len(),
        includes_state: true,
        includes_transcripts: !opts.minimal,
    };
    entries.insert(0, ("manifest.yaml".to_string(), serde_yaml::to_string(&manifest)?.into_bytes()));

    match format {
        ArchiveFormat::TarGz => write_tar_gz(dest_path, &entries)?,
        ArchiveFormat::Zip => write_zip(dest_path, &entries)?,
        ArchiveFormat::Dir => write_dir(dest_path, &entries)?,
    }

    Ok(dest_path.to_path_buf())
}

fn write_tar_gz(dest_path: &Path, entries: &[(String, Vec<u8>)]) -> Result<(), ArchiveError> {
    let file = std::fs::File::create(dest_path)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, bytes) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(bytes.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, bytes.as_slice())?;
    }
    builder.into_inner()?.finish()?;
    Ok(())
}

fn write_zip(dest_path: &Path, entries: &[(String, Vec<u8>)]) -> Result<(), ArchiveError> {
    let file = std::fs::File::create(dest_path)?;
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);
    for (name, bytes) in entries {
        writer
            .start_file(name, options)
            .map_err(|e| ArchiveError::Io(std::io::Error::other(e)))?;
        writer.write_all(bytes)?;
    }
    writer
        .finish()
        .map_err(|e| ArchiveError::Io(std::io::Error::other(e)))?;
    Ok(())
}

fn write_dir(dest_path: &Path, entries: &[(String, Vec<u8>)]) -> Result<(), ArchiveError> {
    std::fs::create_dir_all(dest_path)?;
    for (name, bytes) in entries {
        let path = dest_path.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, bytes)?;
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct ImportSummary {
    pub tasks_imported: usize,
    pub tasks_skipped: usize,
    pub tasks_deferred: usize,
    pub initiatives_imported: usize,
    pub initiatives_deferred: usize,
}

/// Auto-detects `src_path`'s encoding by extension, falling back to
/// the first four bytes (`0x1f 0x8b` gzip, `0x50 0x4b` zip), and
/// imports its tasks/initiatives into `store` under `policy`.
pub fn import(store: &Store, src_path: &Path, policy: MergePolicy) -> Result<ImportSummary, ArchiveError> {
    let entries = read_entries(src_path)?;

    let mut yaml_entries = entries.iter().filter(|(name, _)| name.ends_with(".yaml"));
    if yaml_entries.next().is_none() {
        return Err(ArchiveError::NoYamlFiles);
    }

    let mut summary = ImportSummary::default();
    let mut deferred_tasks = Vec::new();
    let mut deferred_initiatives = Vec::new();
    let known_task_ids = known_ids(&entries, "tasks/");
    let known_initiative_ids = known_ids(&entries, "initiatives/");

    for (name, bytes) in &entries {
        if name.starts_with("tasks/") && name.ends_with(".yaml") {
            let bundle: TaskBundle = serde_yaml::from_slice(bytes)?;
            if unresolved_task_refs(&bundle.task, &known_task_ids, &known_initiative_ids, store) {
                deferred_tasks.push(bundle);
                continue;
            }
            if import_task(store, bundle, policy)? {
                summary.tasks_imported += 1;
            } else {
                summary.tasks_skipped += 1;
            }
        } else if name.starts_with("initiatives/") && name.ends_with(".yaml") {
            let bundle: InitiativeBundle = serde_yaml::from_slice(bytes)?;
            if unresolved_blocked_by(&bundle.initiative, &known_initiative_ids, store) {
                deferred_initiatives.push(bundle);
                continue;
            }
            if import_initiative(store, bundle, policy)? {
                summary.initiatives_imported += 1;
            }
        }
    }

    // Second pass: retry initiatives whose `blocked_by` referenced
    // another initiative from the same archive, now that every
    // archive initiative has had a chance to land.
    for bundle in deferred_initiatives {
        let still_unresolved = unresolved_blocked_by(&bundle.initiative, &HashSet::new(), store);
        if still_unresolved {
            tracing::warn!(initiative_id = %bundle.initiative.id, "unresolved blocked_by reference after import retry pass");
            summary.initiatives_deferred += 1;
            continue;
        }
        if import_initiative(store, bundle, policy)? {
            summary.initiatives_imported += 1;
        }
    }

    // Same idea for tasks: a task's `blocked_by` or `initiative_id` may
    // have pointed at another archive entry that hadn't landed yet on
    // the first pass (export writes tasks before initiatives, so a
    // linked task is always seen before its initiative).
    for bundle in deferred_tasks {
        let still_unresolved = unresolved_task_refs(&bundle.task, &HashSet::new(), &HashSet::new(), store);
        if still_unresolved {
            tracing::warn!(task_id = %bundle.task.id, "unresolved blocked_by/initiative reference after import retry pass");
            summary.tasks_deferred += 1;
            continue;
        }
        if import_task(store, bundle, policy)? {
            summary.tasks_imported += 1;
        } else {
            summary.tasks_skipped += 1;
        }
    }

    Ok(summary)
}

fn known_ids(entries: &[(String, Vec<u8>)], prefix: &str) -> HashSet<String> {
    entries
        .iter()
        .filter(|(name, _)| name.starts_with(prefix) && name.ends_with(".yaml"))
        .map(|(name, _)| {
            name.trim_start_matches(prefix)
                .trim_end_matches(".yaml")
                .to_string()
        })
        .collect()
}

/// Read-only counterpart to [`import`] for `orc import --dry-run`:
/// reports what would happen without writing anything to `store`.
/// Skips the deferred retry passes since nothing actually lands in the
/// first pass to unblock them; a dry run over an archive with
/// cross-task or cross-initiative references undercounts those as
/// deferred, which is conservative rather than wrong.
pub fn preview_import(store: &Store, src_path: &Path, policy: MergePolicy) -> Result<ImportSummary, ArchiveError> {
    let entries = read_entries(src_path)?;

    let mut yaml_entries = entries.iter().filter(|(name, _)| name.ends_with(".yaml"));
    if yaml_entries.next().is_none() {
        return Err(ArchiveError::NoYamlFiles);
    }

    let mut summary = ImportSummary::default();
    let known_task_ids = known_ids(&entries, "tasks/");
    let known_initiative_ids = known_ids(&entries, "initiatives/");

    for (name, bytes) in &entries {
        if name.starts_with("tasks/") && name.ends_with(".yaml") {
            let bundle: TaskBundle = serde_yaml::from_slice(bytes)?;
            if unresolved_task_refs(&bundle.task, &known_task_ids, &known_initiative_ids, store) {
                summary.tasks_deferred += 1;
                continue;
            }
            if would_import_task(store, &bundle.task, policy) {
                summary.tasks_imported += 1;
            } else {
                summary.tasks_skipped += 1;
            }
        } else if name.starts_with("initiatives/") && name.ends_with(".yaml") {
            let bundle: InitiativeBundle = serde_yaml::from_slice(bytes)?;
            if unresolved_blocked_by(&bundle.initiative, &known_initiative_ids, store) {
                summary.initiatives_deferred += 1;
                continue;
            }
            if would_import_initiative(store, &bundle.initiative, policy) {
                summary.initiatives_imported += 1;
            }
        }
    }

    Ok(summary)
}

fn would_import_task(store: &Store, task: &Task, policy: MergePolicy) -> bool {
    match store.load_task(&task.id) {
        Ok(local) => match policy {
            MergePolicy::SkipExisting => false,
            MergePolicy::Force => true,
            MergePolicy::Default => local.updated_at < task.updated_at,
        },
        Err(_) => true,
    }
}

fn would_import_initiative(store: &Store, initiative: &Initiative, policy: MergePolicy) -> bool {
    match store.load_initiative(&initiative.id) {
        Ok(local) => match policy {
            MergePolicy::SkipExisting => false,
            MergePolicy::Force => true,
            MergePolicy::Default => local.updated_at < initiative.updated_at,
        },
        Err(_) => true,
    }
}

fn unresolved_blocked_by(initiative: &Initiative, known_in_archive: &HashSet<String>, store: &Store) -> bool {
    initiative.blocked_by.iter().any(|dep| {
        !known_in_archive.contains(dep) && !store.initiative_exists(dep).unwrap_or(false)
    })
}

/// Whether `task`'s `blocked_by` or `initiative_id` points at an
/// archive entry (or Store record) that doesn't exist yet — the same
/// "unmet, never silently satisfied" rule as the Dependency Graph, used
/// here to know when `Store::save_task`'s existence checks would
/// otherwise reject a legitimate forward reference within one archive.
fn unresolved_task_refs(
    task: &Task,
    known_tasks_in_archive: &HashSet<String>,
    known_initiatives_in_archive: &HashSet<String>,
    store: &Store,
) -> bool {
    let blocked_by_unresolved = task.blocked_by.iter().any(|dep| {
        !known_tasks_in_archive.contains(dep) && !store.task_exists(dep).unwrap_or(false)
    });
    let initiative_unresolved = task.initiative_id.as_ref().is_some_and(|id| {
        !known_initiatives_in_archive.contains(id) && !store.initiative_exists(id).unwrap_or(false)
    });
    blocked_by_unresolved || initiative_unresolved
}

fn import_task(store: &Store, bundle: TaskBundle, policy: MergePolicy) -> Result<bool, ArchiveError> {
    let TaskBundle { mut task, transcripts, gate_decisions, attachments } = bundle;

    if let Ok(local) = store.load_task(&task.id) {
        match policy {
            MergePolicy::SkipExisting => return Ok(false),
            MergePolicy::Force => {}
            MergePolicy::Default => {
                if local.updated_at >= task.updated_at {
                    return Ok(false);
                }
            }
        }
    }

    if task.status == TaskStatus::Running {
        task.status = TaskStatus::Interrupted;
        task.executor_pid = None;
        task.executor_hostname = None;
        task.executor_started_at = None;
        task.executor_start_time = None;
    }

    store.save_task(&task)?;
    for msg in transcripts {
        store.add_transcript_message(&msg)?;
    }
    for decision in gate_decisions {
        store.save_gate_decision(&decision)?;
    }
    for attachment in attachments {
        store.save_attachment(&attachment)?;
    }
    Ok(true)
}

fn import_initiative(store: &Store, bundle: InitiativeBundle, policy: MergePolicy) -> Result<bool, ArchiveError> {
    let initiative = bundle.initiative;
    if let Ok(local) = store.load_initiative(&initiative.id) {
        match policy {
            MergePolicy::SkipExisting => return Ok(false),
            MergePolicy::Force => {}
            MergePolicy::Default => {
                if local.updated_at >= initiative.updated_at {
                    return Ok(false);
                }
            }
        }
    }
    store.save_initiative(&initiative)?;
    Ok(true)
}

/// Reads every entry from an archive at `src_path`, detecting the
/// encoding by extension first and falling back to magic bytes.
fn read_entries(src_path: &Path) -> Result<Vec<(String, Vec<u8>)>, ArchiveError> {
    if src_path.is_dir() {
        return read_dir_entries(src_path);
    }

    let mut file = std::fs::File::open(src_path)?;
    let mut magic = [0u8; 4];
    let read = file.read(&mut magic)?;
    file.rewind()?;

    let name = src_path.to_string_lossy();
    let looks_gzip = read >= 2 && magic[0] == 0x1f && magic[1] == 0x8b;
    let looks_zip = read >= 2 && magic[0] == 0x50 && magic[1] == 0x4b;

    if name.ends_with(".tar.gz") || name.ends_with(".tgz") || (looks_gzip && !name.ends_with(".zip")) {
        read_tar_gz_entries(file)
    } else if name.ends_with(".zip") || looks_zip {
        read_zip_entries(file)
    } else {
        Err(ArchiveError::UnsupportedFormat)
    }
}

fn read_tar_gz_entries(file: std::fs::File) -> Result<Vec<(String, Vec<u8>)>, ArchiveError> {
    let decoder = GzDecoder::new(file);
    let mut archive = tar::Archive::new(decoder);
    let mut out = Vec::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        let size = entry.header().size()?;
        if size > MAX_ENTRY_BYTES {
            return Err(ArchiveError::FileTooLarge(entry.path()?.to_string_lossy().to_string()));
        }
        let name = entry.path()?.to_string_lossy().to_string();
        let mut bytes = Vec::with_capacity(size as usize);
        entry.read_to_end(&mut bytes)?;
        out.push((name, bytes));
    }
    Ok(out)
}

fn read_zip_entries(file: std::fs::File) -> Result<Vec<(String, Vec<u8>)>, ArchiveError> {
    let mut archive = zip::ZipArchive::new(file).map_err(|e| ArchiveError::Io(std::io::Error::other(e)))?;
    let mut out = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| ArchiveError::Io(std::io::Error::other(e)))?;
        if entry.size() > MAX_ENTRY_BYTES {
            return Err(ArchiveError::FileTooLarge(entry.name().to_string()));
        }
        let name = entry.name().to_string();
        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut bytes)?;
        out.push((name, bytes));
    }
    Ok(out)
}

fn read_dir_entries(root: &Path) -> Result<Vec<(String, Vec<u8>)>, ArchiveError> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
                continue;
            }
            let metadata = entry.metadata()?;
            if metadata.len() > MAX_ENTRY_BYTES {
                return Err(ArchiveError::FileTooLarge(path.to_string_lossy().to_string()));
            }
            let relative = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            out.push((relative, std::fs::read(&path)?));
        }
    }
    Ok(out)
}
