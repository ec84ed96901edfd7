/*!
 * Tests for document loading and file helpers
 */

use anyhow::Result;
use tinbox::document::Document;
use tinbox::file_utils::FileManager;
use tinbox::translation::unit::{UnitContent, UnitKind};
use crate::common;

/// Test that a text file splits into pages on form feeds
#[test]
fn test_load_textFileWithFormFeeds_shouldYieldOnePagePerSection() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let path = common::create_test_file(
        temp_dir.path(),
        "report.txt",
        "First page.\nStill first.\u{000C}Second page.\u{000C}Third page.\n",
    )?;

    let document = Document::load(&path)?;
    assert_eq!(document.name, "report.txt");
    assert_eq!(document.page_count(), 3);
    assert_eq!(document.units[0].as_text(), Some("First page.\nStill first."));
    assert_eq!(document.units[2].sequence_index(), 2);
    assert!(!document.has_images());
    Ok(())
}

/// Test that a single image becomes a one-page image document
#[test]
fn test_load_singleImage_shouldYieldImageUnit() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let path = temp_dir.path().join("scan.jpeg");
    std::fs::write(&path, [0xFFu8, 0xD8, 0xFF])?;

    let document = Document::load(&path)?;
    assert_eq!(document.page_count(), 1);
    assert_eq!(document.units[0].kind(), UnitKind::Image);
    match document.units[0].content() {
        UnitContent::Image { media_type, .. } => assert_eq!(media_type, "image/jpeg"),
        other => panic!("expected an image, got {:?}", other),
    }
    Ok(())
}

/// Test that an empty text file loads as a document without pages
#[test]
fn test_load_emptyTextFile_shouldHaveNoPages() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let path = common::create_test_file(temp_dir.path(), "empty.txt", "\n\n")?;
    assert!(Document::load(&path)?.is_empty());
    Ok(())
}

/// Test that a missing input is an error
#[test]
fn test_load_missingFile_shouldFail() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    assert!(Document::load(temp_dir.path().join("missing.txt")).is_err());
    Ok(())
}

/// Test output naming and writing into a new directory
#[test]
fn test_write_to_file_withNestedOutput_shouldCreateDirectories() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let output_dir = temp_dir.path().join("out").join("fr");
    let output = FileManager::generate_output_path("book.txt", &output_dir, "fr", "md");

    FileManager::write_to_file(&output, "# Livre")?;
    assert_eq!(output.file_name().and_then(|n| n.to_str()), Some("book.fr.md"));
    assert_eq!(FileManager::read_to_string(&output)?, "# Livre");
    Ok(())
}
