/*!
 * Source documents.
 *
 * A `Document` is an ordered list of translation units, one per page. Text files are
 * split into pages on form feed characters; image files become single-page documents
 * and a directory of images becomes one page per image, in file-name order.
 */

use anyhow::Result;
use log::debug;
use std::path::Path;

use crate::file_utils::{FileManager, FileType};
use crate::translation::unit::TranslationUnit;

/// Page break in plain-text input
pub const PAGE_BREAK: char = '\u{000C}';

/// A document ready for translation
#[derive(Debug, Clone)]
pub struct Document {
    pub name: String,
    pub units: Vec<TranslationUnit>,
}

impl Document {
    pub fn new(name: impl Into<String>, units: Vec<TranslationUnit>) -> Self {
        Self {
            name: name.into(),
            units,
        }
    }

    /// One text page per entry
    pub fn from_pages(name: impl Into<String>, pages: Vec<String>) -> Self {
        let units = pages
            .into_iter()
            .enumerate()
            .map(|(index, page)| TranslationUnit::text(index, page))
            .collect();
        Self::new(name, units)
    }

    /// Split plain text into pages on form feeds. Blank text yields no pages.
    pub fn from_text(name: impl Into<String>, text: &str) -> Self {
        if text.trim().is_empty() {
            return Self::new(name, Vec::new());
        }
        let mut pages: Vec<String> = text.split(PAGE_BREAK).map(str::to_string).collect();
        if pages.len() > 1 && pages.last().is_some_and(|p| p.trim().is_empty()) {
            pages.pop();
        }
        Self::from_pages(name, pages)
    }

    /// Load a text file, an image, or a directory of images
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());

        let document = match FileManager::detect_file_type(path)? {
            FileType::Text => Self::from_text(name, &FileManager::read_to_string(path)?),
            FileType::Image(media_type) => {
                let data = FileManager::read_bytes(path)?;
                Self::new(name, vec![TranslationUnit::image(0, data, media_type)])
            }
            FileType::ImageDirectory => {
                let mut units = Vec::new();
                for (index, image) in FileManager::find_images(path)?.iter().enumerate() {
                    let media_type = FileManager::image_media_type(image).unwrap_or("image/png");
                    units.push(TranslationUnit::image(index, FileManager::read_bytes(image)?, media_type));
                }
                Self::new(name, units)
            }
        };
        debug!("Loaded {:?}: {} page(s)", path, document.page_count());
        Ok(document)
    }

    pub fn page_count(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn has_images(&self) -> bool {
        self.units.iter().any(|unit| unit.as_text().is_none())
    }

    /// Total characters of text pages
    pub fn total_chars(&self) -> usize {
        self.units
            .iter()
            .filter_map(|unit| unit.as_text())
            .map(|text| text.chars().count())
            .sum()
    }
}
