/*!
 * Sliding-window algorithm.
 *
 * Flat text is cut into fixed-size windows that overlap their predecessor. After
 * translation, the duplicated overlap is removed from each window before it is
 * appended: first by an exact suffix/prefix match, then by an approximate word
 * match, and as a last resort by dropping a proportional prefix of the later window.
 */

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::app_config::{WindowConfig, WindowMeasure};
use crate::errors::TranslationError;
use crate::translation::page::PAGE_SEPARATOR;
use crate::translation::unit::{TranslationUnit, UnitContent, WindowSpec};

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\S+").expect("valid word regex"));
static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\p{L}\p{N}]+").expect("valid non-word regex"));

/// Window geometry in characters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowGeometry {
    pub size: usize,
    pub overlap: usize,
}

impl WindowGeometry {
    /// Resolve configured sizes to characters
    pub fn from_config(config: &WindowConfig, chars_per_token: usize) -> Self {
        let factor = match config.measure {
            WindowMeasure::Characters => 1,
            WindowMeasure::Tokens => chars_per_token.max(1),
        };
        Self {
            size: config.size.saturating_mul(factor),
            overlap: config.overlap.saturating_mul(factor),
        }
    }
}

/// Compute window boundaries over `total_chars` characters
pub fn window_specs(total_chars: usize, geometry: WindowGeometry) -> Result<Vec<WindowSpec>, TranslationError> {
    if geometry.size == 0 {
        return Err(TranslationError::Segmentation("Window size must be positive".to_string()));
    }
    if geometry.overlap >= geometry.size {
        return Err(TranslationError::Segmentation(format!(
            "Overlap ({}) must be less than window size ({})",
            geometry.overlap, geometry.size
        )));
    }
    if total_chars == 0 {
        return Err(TranslationError::Segmentation("Document has no text to translate".to_string()));
    }

    let mut specs = Vec::new();
    let mut start = 0;
    let mut previous_end: usize = 0;
    loop {
        let end = (start + geometry.size).min(total_chars);
        specs.push(WindowSpec {
            start_offset: start,
            end_offset: end,
            overlap_with_previous: previous_end.saturating_sub(start),
        });
        if end == total_chars {
            break;
        }
        previous_end = end;
        start = end - geometry.overlap;
    }
    Ok(specs)
}

/// Flat text of a document for windowing; image pages cannot be windowed
pub fn flatten_text(units: &[TranslationUnit]) -> Result<String, TranslationError> {
    let mut pages = Vec::with_capacity(units.len());
    for unit in units {
        match unit.content() {
            UnitContent::Text(text) => pages.push(text.as_str()),
            UnitContent::Image { .. } => {
                return Err(TranslationError::Segmentation(format!(
                    "Page {} is an image; the sliding-window algorithm needs text",
                    unit.sequence_index() + 1
                )));
            }
        }
    }
    let text = pages.join(PAGE_SEPARATOR);
    if text.trim().is_empty() {
        return Err(TranslationError::Segmentation("Document has no text to translate".to_string()));
    }
    Ok(text)
}

/// A document cut into windows
#[derive(Debug, Clone)]
pub struct WindowedDocument {
    pub text: String,
    pub units: Vec<TranslationUnit>,
    pub specs: Vec<WindowSpec>,
    /// Byte offset of every char boundary, plus the end of the text
    boundaries: Vec<usize>,
}

impl WindowedDocument {
    /// Segment flat text into windows
    pub fn new(text: String, geometry: WindowGeometry) -> Result<Self, TranslationError> {
        let mut boundaries: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
        boundaries.push(text.len());
        let specs = window_specs(boundaries.len() - 1, geometry)?;
        let units = specs
            .iter()
            .enumerate()
            .map(|(index, spec)| {
                TranslationUnit::text(index, &text[boundaries[spec.start_offset]..boundaries[spec.end_offset]])
            })
            .collect();
        Ok(Self {
            text,
            units,
            specs,
            boundaries,
        })
    }

    /// Segment a loaded document
    pub fn from_units(units: &[TranslationUnit], config: &WindowConfig, chars_per_token: usize) -> Result<Self, TranslationError> {
        let text = flatten_text(units)?;
        Self::new(text, WindowGeometry::from_config(config, chars_per_token))
    }

    /// Source text immediately preceding window `index`, at most `chars` long
    pub fn context_for(&self, index: usize, chars: usize) -> Option<String> {
        if index == 0 || chars == 0 {
            return None;
        }
        let spec = self.specs.get(index)?;
        let end = spec.start_offset;
        let start = end.saturating_sub(chars);
        let context = &self.text[self.boundaries[start]..self.boundaries[end]];
        (!context.trim().is_empty()).then(|| context.to_string())
    }
}

/// How an overlap was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapMatch {
    Exact,
    Approximate,
    Proportional,
    /// Nothing to reconcile
    None,
}

/// Result of reconciling one pair of windows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciliation {
    /// Bytes to drop from the start of the later translation
    pub drop_bytes: usize,
    pub method: OverlapMatch,
}

/// Overlap matching thresholds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchThresholds {
    pub min_match_chars: usize,
    pub approximate_ratio: f64,
}

impl From<&WindowConfig> for MatchThresholds {
    fn from(config: &WindowConfig) -> Self {
        Self {
            min_match_chars: config.min_match_chars,
            approximate_ratio: config.approximate_match_ratio,
        }
    }
}

/// Byte offset of the `n`-th char, or the end of the string
fn byte_offset(text: &str, n: usize) -> usize {
    text.char_indices().nth(n).map(|(i, _)| i).unwrap_or(text.len())
}

/// Prefix of `next` (in chars, between `min_chars` and `max_chars`) that `previous` ends with.
/// Repetitive text matches at several lengths; the one closest to `expected` wins, longer on ties.
fn exact_overlap(previous: &str, next: &str, expected: usize, min_chars: usize, max_chars: usize) -> Option<usize> {
    let next_chars = next.chars().count();
    let previous_chars = previous.chars().count();
    let limit = max_chars.min(next_chars).min(previous_chars);
    if min_chars > limit {
        return None;
    }
    let offsets: Vec<usize> = next.char_indices().map(|(i, _)| i).chain(std::iter::once(next.len())).collect();
    let matches = |k: usize| (min_chars..=limit).contains(&k) && previous.ends_with(&next[..offsets[k]]);

    let expected = expected.clamp(min_chars, limit);
    let reach = (expected - min_chars).max(limit - expected);
    (0..=reach).find_map(|distance| {
        let longer = expected + distance;
        if matches(longer) {
            return Some(longer);
        }
        expected.checked_sub(distance).filter(|&shorter| matches(shorter))
    })
}

fn normalize_word(word: &str) -> String {
    NON_WORD.replace_all(&word.to_lowercase(), "").into_owned()
}

/// Approximate word-level overlap; returns the byte end of the matched prefix of `next`
fn approximate_overlap(previous: &str, next: &str, max_chars: usize, thresholds: &MatchThresholds) -> Option<usize> {
    let tail_start = previous.len() - previous.chars().rev().take(max_chars).map(char::len_utf8).sum::<usize>();
    let previous_words: Vec<String> = WORD
        .find_iter(&previous[tail_start..])
        .map(|m| normalize_word(m.as_str()))
        .collect();
    let head_end = byte_offset(next, max_chars);
    let next_words: Vec<(String, usize)> = WORD
        .find_iter(&next[..head_end])
        .map(|m| (normalize_word(m.as_str()), m.end()))
        .collect();

    let max_words = previous_words.len().min(next_words.len());
    (1..=max_words).rev().find_map(|k| {
        let tail = &previous_words[previous_words.len() - k..];
        let head = &next_words[..k];
        let equal = tail.iter().zip(head).filter(|(a, (b, _))| *a == b).count();
        let span_end = head[k - 1].1;
        let span_chars = next[..span_end].chars().count();
        let ratio = equal as f64 / k as f64;
        (ratio >= thresholds.approximate_ratio && span_chars >= thresholds.min_match_chars).then_some(span_end)
    })
}

/// Drop a prefix proportional to the overlap share, snapped forward to whitespace
fn proportional_drop(next: &str, spec: &WindowSpec) -> usize {
    if spec.overlap_with_previous == 0 || spec.is_empty() {
        return 0;
    }
    let next_chars = next.chars().count();
    let share = spec.overlap_with_previous as f64 / spec.len() as f64;
    let estimate = ((next_chars as f64) * share).round() as usize;
    let mut offset = byte_offset(next, estimate.min(next_chars));

    if let Some(space) = next[offset..].find(char::is_whitespace) {
        offset += space;
    } else {
        offset = next.len();
    }
    offset + (next[offset..].len() - next[offset..].trim_start().len())
}

/// Resolve the overlap between two consecutive translated windows
pub fn reconcile(previous: &str, next: &str, spec: &WindowSpec, thresholds: &MatchThresholds) -> Reconciliation {
    if spec.overlap_with_previous == 0 || next.is_empty() {
        return Reconciliation {
            drop_bytes: 0,
            method: OverlapMatch::None,
        };
    }

    // Translations can be longer than their source
    let search_chars = spec.overlap_with_previous.saturating_mul(2).max(thresholds.min_match_chars);
    let required = thresholds.min_match_chars.min(spec.overlap_with_previous).max(1);

    if let Some(exact) = exact_overlap(previous, next, spec.overlap_with_previous, required, search_chars) {
        return Reconciliation {
            drop_bytes: byte_offset(next, exact),
            method: OverlapMatch::Exact,
        };
    }

    let approximate_thresholds = MatchThresholds {
        min_match_chars: required,
        ..*thresholds
    };
    if let Some(end) = approximate_overlap(previous, next, search_chars, &approximate_thresholds) {
        let end = end + (next[end..].len() - next[end..].trim_start().len());
        return Reconciliation {
            drop_bytes: end,
            method: OverlapMatch::Approximate,
        };
    }

    Reconciliation {
        drop_bytes: proportional_drop(next, spec),
        method: OverlapMatch::Proportional,
    }
}

/// Stitch translated windows together; returns the text and how each junction was resolved
pub fn assemble_windows(
    translations: &[String],
    specs: &[WindowSpec],
    thresholds: &MatchThresholds,
) -> (String, Vec<OverlapMatch>) {
    let mut output = String::new();
    let mut methods = Vec::with_capacity(translations.len());

    for (index, (text, spec)) in translations.iter().zip(specs).enumerate() {
        if index == 0 {
            output.push_str(text);
            methods.push(OverlapMatch::None);
            continue;
        }
        let reconciliation = reconcile(&translations[index - 1], text, spec, thresholds);
        let remainder = &text[reconciliation.drop_bytes..];
        if reconciliation.method != OverlapMatch::Exact
            && !remainder.is_empty()
            && !output.ends_with(char::is_whitespace)
            && !remainder.starts_with(char::is_whitespace)
        {
            output.push(' ');
        }
        output.push_str(remainder);
        methods.push(reconciliation.method);
    }

    (output, methods)
}
