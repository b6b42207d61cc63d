//! File set resolution.

use anyhow::Result;
use hypercopy::io::glob::validate_pattern;
use hypercopy::*;
use std::fs::{self, create_dir_all};
use tempfile::TempDir;

#[test]
fn matches_are_sorted_and_directories_skipped() -> Result<()> {
    let dir = TempDir::new()?;
    let base = dir.path();
    for name in ["b.csv", "a.csv", "c.csv", "notes.txt"] {
        fs::write(base.join(name), "x\n")?;
    }
    create_dir_all(base.join("dir.csv"))?;

    let set = resolve(&format!("{}/*.csv", base.display()))?;
    let names: Vec<_> = set
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, ["a.csv", "b.csv", "c.csv"]);
    assert_eq!(set.len(), 3);
    assert_eq!(set.get(1), Some(base.join("b.csv").as_path()));
    assert!(set.get(3).is_none());
    Ok(())
}

#[test]
fn recursive_and_class_patterns() -> Result<()> {
    let dir = TempDir::new()?;
    let base = dir.path();
    create_dir_all(base.join("2024/01"))?;
    create_dir_all(base.join("2024/02"))?;
    fs::write(base.join("2024/01/day1.csv"), "x\n")?;
    fs::write(base.join("2024/02/day2.csv"), "x\n")?;
    fs::write(base.join("2024/02/day3.csv"), "x\n")?;

    let all = resolve(&format!("{}/**/*.csv", base.display()))?;
    assert_eq!(all.len(), 3);

    let some = resolve(&format!("{}/2024/*/day[12].csv", base.display()))?;
    assert_eq!(some.len(), 2);
    assert!(some.paths()[0].ends_with("01/day1.csv"));
    Ok(())
}

#[test]
fn no_matches_is_an_empty_set() -> Result<()> {
    let dir = TempDir::new()?;
    let set = resolve(&format!("{}/nothing/*.csv", dir.path().display()))?;
    assert!(set.is_empty());
    Ok(())
}

#[test]
fn malformed_patterns_are_rejected() {
    assert_eq!(validate_pattern("").unwrap_err().code(), -1);
    assert_eq!(validate_pattern("   ").unwrap_err().code(), -1);
    assert_eq!(resolve("data/[abc").unwrap_err().code(), -1);
    assert_eq!(resolve("data/***.csv").unwrap_err().code(), -1);
    assert!(validate_pattern("data/*.csv").is_ok());
}

#[test]
fn file_set_dedups_explicit_paths() {
    let set = FileSet::from_paths(vec!["b.csv".into(), "a.csv".into(), "b.csv".into()]);
    assert_eq!(set.paths(), &[std::path::PathBuf::from("a.csv"), "b.csv".into()]);
}
