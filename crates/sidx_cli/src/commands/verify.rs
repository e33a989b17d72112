//! Verify command implementation.

use super::open_existing;
use serde::Serialize;
use sidx_core::{IndexDir, IndexState, Manifest};
use std::collections::BTreeSet;
use std::path::Path;

/// Verification result for one index snapshot.
#[derive(Debug, Serialize)]
pub struct IndexReport {
    /// Index name.
    pub name: String,
    /// Entries checked.
    pub entries: usize,
    /// Problems found.
    pub errors: Vec<String>,
}

/// Verification result.
#[derive(Debug, Default, Serialize)]
pub struct VerifyResult {
    /// Number of snapshots checked.
    pub snapshots_checked: usize,
    /// Per-index reports.
    pub indexes: Vec<IndexReport>,
    /// Problems not tied to a registered index.
    pub errors: Vec<String>,
}

impl VerifyResult {
    /// Returns true if no problem was found.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty() && self.indexes.iter().all(|r| r.errors.is_empty())
    }
}

/// Runs the verify command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let (dir, manifest) = open_existing(path)?;
    let result = verify(&dir, &manifest)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => {
            println!("Verifying index directory at {:?}", path);
            println!();
            for report in &result.indexes {
                print_report(report);
            }
            for error in &result.errors {
                println!("  ! {}", error);
            }
            println!();
        }
    }

    if result.is_ok() {
        println!("✓ Index verification passed");
        Ok(())
    } else {
        println!("✗ Index verification failed");
        Err("Verification failed".into())
    }
}

/// Checks every snapshot against the manifest and its own invariants.
///
/// A snapshot that is missing, stale or corrupt is reported even though
/// opening the directory would repair it with a rebuild.
pub fn verify(dir: &IndexDir, manifest: &Manifest) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    let mut result = VerifyResult::default();
    let mut registered = BTreeSet::new();

    for entry in &manifest.indexes {
        let def = &entry.definition;
        registered.insert(def.id);
        let mut report = IndexReport {
            name: def.name.clone(),
            entries: 0,
            errors: Vec::new(),
        };
        if entry.state != IndexState::Active {
            report
                .errors
                .push(format!("index is {} and will be rebuilt on open", entry.state));
        }

        match dir.load_index(def.id) {
            Ok(Some(file)) => {
                result.snapshots_checked += 1;
                report.entries = file.entries.len();
                if file.definition != *def {
                    report
                        .errors
                        .push("snapshot definition differs from the manifest".to_string());
                }
                if file.seq != manifest.committed_seq {
                    report.errors.push(format!(
                        "snapshot is at {} but the manifest is at {}",
                        file.seq, manifest.committed_seq
                    ));
                }
                report.errors.extend(file.verify());
            }
            Ok(None) => report.errors.push("snapshot file is missing".to_string()),
            Err(e) => report.errors.push(format!("snapshot unreadable: {e}")),
        }
        result.indexes.push(report);
    }

    for id in dir.index_files()? {
        if !registered.contains(&id) {
            result.errors.push(format!(
                "orphan snapshot {} is not registered",
                dir.index_path(id).display()
            ));
        }
    }

    Ok(result)
}

fn print_report(report: &IndexReport) {
    if report.errors.is_empty() {
        println!("  ✓ {} ({} entries)", report.name, report.entries);
    } else {
        println!("  ✗ {} ({} entries)", report.name, report.entries);
        for error in report.errors.iter().take(10) {
            println!("      - {}", error);
        }
        if report.errors.len() > 10 {
            println!("      ... and {} more errors", report.errors.len() - 10);
        }
    }
}
