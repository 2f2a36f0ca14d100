//! Verify command implementation.

use shelfdb_core::{FileBackend, VerifyReport};
use std::path::Path;

/// Runs the verify command.
pub fn run(path: &Path, collection: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying database at {}", path.display());
    println!();

    let db = super::open_existing(path)?;
    let reports = verify(&db, collection)?;
    for report in &reports {
        print_report(report);
    }

    println!();
    if reports.iter().all(VerifyReport::is_ok) {
        println!("✓ Database verification passed");
        Ok(())
    } else {
        println!("✗ Database verification failed; run rebuild-index to repair");
        Err("Verification failed".into())
    }
}

fn verify(
    db: &FileBackend,
    collection: Option<&str>,
) -> Result<Vec<VerifyReport>, Box<dyn std::error::Error>> {
    let names = match collection {
        Some(name) => vec![name.to_string()],
        None => db.collection_names(),
    };
    let mut reports = Vec::with_capacity(names.len());
    for name in names {
        reports.push(db.verify(&name)?);
    }
    Ok(reports)
}

fn print_report(report: &VerifyReport) {
    println!("{}:", report.collection);
    println!("  Objects:   {}", report.documents);
    println!("  Dangling:  {}", report.dangling.len());
    println!("  Unindexed: {}", report.unindexed.len());
    for (field, key) in report.dangling.iter().take(10) {
        println!("    {field} -> {key} (no object)");
    }
    for key in report.unindexed.iter().take(10) {
        println!("    {key} (not in primary index)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shelfdb_codec::Value;
    use shelfdb_core::{Backend, Document};
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn detects_deleted_object() {
        let dir = tempdir().unwrap();
        {
            let db = FileBackend::open(dir.path()).unwrap();
            db.save(&mut Document::new("movie", [("title", Value::from("Heat"))]))
                .unwrap();
            db.commit().unwrap();
        }
        let objects = dir.path().join("movie").join("objects");
        for entry in fs::read_dir(&objects).unwrap() {
            fs::remove_file(entry.unwrap().path()).unwrap();
        }

        let db = super::super::open_existing(dir.path()).unwrap();
        let reports = verify(&db, None).unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].dangling.len(), 1);
        assert!(!reports[0].is_ok());

        db.rebuild_indexes("movie").unwrap();
        assert!(verify(&db, Some("movie")).unwrap()[0].is_ok());
    }
}
