//! Inspect command implementation.

use super::open_existing;
use serde::Serialize;
use sidx_core::{IndexDir, Manifest};
use std::path::Path;

/// Index directory inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Directory path.
    pub path: String,
    /// Manifest format version.
    pub format_version: String,
    /// Sequence of the last checkpointed commit.
    pub committed_seq: u64,
    /// Next index id to assign.
    pub next_index_id: u64,
    /// Registered indexes.
    pub indexes: Vec<IndexSummary>,
    /// Class declarations (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classes: Option<Vec<ClassSummary>>,
}

/// Summary of one registered index.
#[derive(Debug, Serialize)]
pub struct IndexSummary {
    /// Index id.
    pub id: u64,
    /// Index name.
    pub name: String,
    /// Owning class.
    pub class: String,
    /// Index type name.
    pub index_type: String,
    /// Field specs in declaration order.
    pub fields: Vec<String>,
    /// Whether null-bearing keys are skipped.
    pub ignore_nulls: bool,
    /// Lifecycle state recorded in the manifest.
    pub state: String,
    /// Entries in the snapshot file, if it could be read.
    pub entries: Option<usize>,
    /// Snapshot sequence, if it could be read.
    pub snapshot_seq: Option<u64>,
    /// Why the snapshot could not be read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_error: Option<String>,
}

/// Summary of one class.
#[derive(Debug, Serialize)]
pub struct ClassSummary {
    /// Class name.
    pub name: String,
    /// Direct superclasses.
    pub superclasses: Vec<String>,
    /// Own properties as `name: TYPE`.
    pub properties: Vec<String>,
}

/// Runs the inspect command.
pub fn run(path: &Path, show_schema: bool, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let (dir, manifest) = open_existing(path)?;
    let result = collect(&dir, &manifest, show_schema);

    // Output
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Gathers the inspection result.
pub fn collect(dir: &IndexDir, manifest: &Manifest, show_schema: bool) -> InspectResult {
    let indexes = manifest
        .indexes
        .iter()
        .map(|entry| {
            let def = &entry.definition;
            let mut summary = IndexSummary {
                id: def.id.as_u64(),
                name: def.name.clone(),
                class: def.class.clone(),
                index_type: def.index_type.to_string(),
                fields: def.fields.iter().map(|f| f.spec()).collect(),
                ignore_nulls: def.null_policy.ignores_nulls(),
                state: entry.state.to_string(),
                entries: None,
                snapshot_seq: None,
                snapshot_error: None,
            };
            match dir.load_index(def.id) {
                Ok(Some(file)) => {
                    summary.entries = Some(file.entries.len());
                    summary.snapshot_seq = Some(file.seq.as_u64());
                }
                Ok(None) => summary.snapshot_error = Some("missing".to_string()),
                Err(e) => summary.snapshot_error = Some(e.to_string()),
            }
            summary
        })
        .collect();

    let classes = show_schema.then(|| {
        manifest
            .classes
            .iter()
            .map(|class| ClassSummary {
                name: class.name().to_string(),
                superclasses: class.superclasses().to_vec(),
                properties: class
                    .own_properties()
                    .map(|p| match (p.linked_type, &p.linked_class) {
                        (Some(linked), _) => format!("{}: {}<{}>", p.name, p.property_type, linked),
                        (None, Some(class)) => format!("{}: {} -> {}", p.name, p.property_type, class),
                        (None, None) => format!("{}: {}", p.name, p.property_type),
                    })
                    .collect(),
            })
            .collect()
    });

    InspectResult {
        path: dir.path().display().to_string(),
        format_version: format!("{}.{}", manifest.format_version.0, manifest.format_version.1),
        committed_seq: manifest.committed_seq.as_u64(),
        next_index_id: manifest.next_index_id.as_u64(),
        indexes,
        classes,
    }
}

fn print_text_output(result: &InspectResult) {
    println!("Index directory: {}", result.path);
    println!("Format version:  {}", result.format_version);
    println!("Committed seq:   {}", result.committed_seq);
    println!("Next index id:   {}", result.next_index_id);
    println!();
    println!("Indexes ({}):", result.indexes.len());
    for index in &result.indexes {
        println!(
            "  [{}] {} on {} ({}) {} [{}]{}",
            index.id,
            index.name,
            index.class,
            index.fields.join(", "),
            index.index_type,
            index.state,
            if index.ignore_nulls { " ignore-nulls" } else { "" }
        );
        match (&index.entries, &index.snapshot_error) {
            (Some(entries), _) => println!(
                "      {} entries at seq {}",
                entries,
                index.snapshot_seq.unwrap_or_default()
            ),
            (None, Some(error)) => println!("      snapshot unreadable: {}", error),
            (None, None) => {}
        }
    }

    if let Some(classes) = &result.classes {
        println!();
        println!("Classes ({}):", classes.len());
        for class in classes {
            if class.superclasses.is_empty() {
                println!("  {}", class.name);
            } else {
                println!("  {} extends {}", class.name, class.superclasses.join(", "));
            }
            for property in &class.properties {
                println!("      {}", property);
            }
        }
    }
}
