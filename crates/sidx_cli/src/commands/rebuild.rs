//! Rebuild command implementation.

use sidx_core::{Config, Database};
use std::path::Path;
use tracing::info;

/// Rebuilds one or every index and writes a fresh checkpoint.
///
/// Returns `(index name, entry count)` per rebuilt index.
pub fn rebuild(path: &Path, index: Option<&str>) -> Result<Vec<(String, usize)>, Box<dyn std::error::Error>> {
    let db = Database::open(path, Config::default().create_if_missing(false))?;
    let names: Vec<String> = match index {
        Some(name) => vec![db.index(name)?.name().to_string()],
        None => db.indexes().indexes().iter().map(|h| h.name().to_string()).collect(),
    };

    let mut rebuilt = Vec::with_capacity(names.len());
    for name in names {
        let entries = db.rebuild_index(&name)?;
        info!(index = %name, entries, "rebuilt");
        rebuilt.push((name, entries));
    }
    db.close()?;
    Ok(rebuilt)
}

/// Runs the rebuild command.
pub fn run(path: &Path, index: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let rebuilt = rebuild(path, index)?;
    for (name, entries) in &rebuilt {
        println!("Rebuilt {} ({} entries)", name, entries);
    }
    println!("✓ {} index(es) rebuilt", rebuilt.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sidx_core::{Document, IndexMetadata, IndexType, Property, PropertyType};
    use tempfile::tempdir;

    #[test]
    fn rebuilds_every_index() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("db");
        {
            let db = Database::open(&path, Config::default()).unwrap();
            db.schema().create_class("User", &[]).unwrap();
            db.schema()
                .create_property("User", Property::new("age", PropertyType::Integer))
                .unwrap();
            db.create_property_index("User", "age", IndexType::NotUnique, IndexMetadata::new())
                .unwrap();
            db.insert(Document::new("User").with("age", 30)).unwrap();
        }

        let rebuilt = rebuild(&path, None).unwrap();
        assert_eq!(rebuilt, vec![("User.age".to_string(), 1)]);
        assert!(rebuild(&path, Some("User.nope")).is_err());
    }
}
