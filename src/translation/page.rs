/*!
 * Page-by-page algorithm.
 *
 * Pages are translated independently. Once two neighbouring pages are both complete,
 * the junction between them is re-sent to the model so a sentence split by the page
 * break reads naturally. Assembly is always in `sequence_index` order.
 */

use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::app_config::SeamConfig;
use crate::errors::{ProviderError, TranslationError};
use crate::providers::{ModelInterface, ModelParams};
use crate::translation::prompts::{parse_seam_response, seam_repair_prompt};
use crate::translation::unit::{FinishReason, TokenUsage, TranslationUnit, UnitContent, UnitKind, UnitResult};

/// Separator between assembled pages
pub const PAGE_SEPARATOR: &str = "\n\n";

// Sentence punctuation, optionally followed by closing quotes or brackets
static SENTENCE_END: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[.!?…。！？]["'”’»)\]」』]*$"#).expect("valid sentence-end regex"));

/// Check that page units are usable as-is
pub fn validate_pages(units: &[TranslationUnit]) -> Result<(), TranslationError> {
    if units.is_empty() {
        return Err(TranslationError::Segmentation("Document has no pages".to_string()));
    }
    for (position, unit) in units.iter().enumerate() {
        if unit.sequence_index() != position {
            return Err(TranslationError::Segmentation(format!(
                "Page at position {} has sequence index {}",
                position,
                unit.sequence_index()
            )));
        }
    }
    Ok(())
}

/// Whether a line ends a sentence
pub fn ends_sentence(line: &str) -> bool {
    SENTENCE_END.is_match(line.trim_end())
}

/// Byte offsets where each non-empty line starts, and where it ends
fn non_empty_lines(text: &str) -> Vec<(usize, usize)> {
    let mut offset = 0;
    let mut lines = Vec::new();
    for line in text.split_inclusive('\n') {
        let content = line.trim_end_matches(['\n', '\r']);
        if !content.trim().is_empty() {
            lines.push((offset, offset + content.len()));
        }
        offset += line.len();
    }
    lines
}

/// Split off the last `lines` non-empty lines: `(body, tail)`
pub fn split_tail(text: &str, lines: usize) -> Option<(&str, &str)> {
    let text = text.trim_end();
    let spans = non_empty_lines(text);
    if lines == 0 || spans.len() < lines {
        return None;
    }
    let start = spans[spans.len() - lines].0;
    Some((&text[..start], &text[start..]))
}

/// Split off the first `lines` non-empty lines: `(head, rest)`
pub fn split_head(text: &str, lines: usize) -> Option<(&str, &str)> {
    let text = text.trim_start();
    let spans = non_empty_lines(text);
    if lines == 0 || spans.len() < lines {
        return None;
    }
    let end = spans[lines - 1].1;
    Some((&text[..end], &text[end..]))
}

/// A junction between two pages worth repairing
#[derive(Debug, Clone, PartialEq)]
pub struct SeamCandidate {
    pub left_index: usize,
    pub left_tail: String,
    pub right_head: String,
}

/// A persisted seam repair; `repaired` is false when the model answer could not be used
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeamRepair {
    pub left_index: usize,
    pub original_tail: String,
    pub original_head: String,
    pub left_tail: String,
    pub right_head: String,
    pub tokens_used: TokenUsage,
    pub repaired: bool,
}

/// Decide whether the junction between two completed neighbours should be repaired
pub fn seam_candidate(left: &UnitResult, right: &UnitResult, config: &SeamConfig) -> Option<SeamCandidate> {
    if !config.enabled || right.sequence_index != left.sequence_index + 1 {
        return None;
    }
    if !left.is_complete() || !right.is_complete() {
        return None;
    }
    if left.unit_kind != UnitKind::Text || right.unit_kind != UnitKind::Text {
        return None;
    }

    let lines = config.context_lines.max(1);
    if non_empty_lines(left.translated_text.trim()).len() < 2 * lines
        || non_empty_lines(right.translated_text.trim()).len() < 2 * lines
    {
        return None;
    }

    let (_, tail) = split_tail(&left.translated_text, lines)?;
    let (head, _) = split_head(&right.translated_text, lines)?;

    if config.only_broken_boundaries {
        let last_line = tail.lines().last().unwrap_or(tail);
        if ends_sentence(last_line) {
            return None;
        }
    }

    Some(SeamCandidate {
        left_index: left.sequence_index,
        left_tail: tail.to_string(),
        right_head: head.to_string(),
    })
}

/// Ask the model to reconcile a junction; an unusable answer yields an unapplied repair
pub async fn repair_seam(
    translator: &dyn ModelInterface,
    candidate: &SeamCandidate,
    target_language: &str,
    params: &ModelParams,
) -> Result<SeamRepair, ProviderError> {
    let (system, prompt) = seam_repair_prompt(&candidate.left_tail, &candidate.right_head, target_language);
    let completion = translator.complete_text(&system, &prompt, params).await?;

    let parsed = if completion.finish_reason == FinishReason::Complete {
        parse_seam_response(&completion.text)
    } else {
        None
    };

    let repair = match parsed {
        Some((left_tail, right_head)) => {
            debug!("Seam {}/{} repaired", candidate.left_index, candidate.left_index + 1);
            SeamRepair {
                left_index: candidate.left_index,
                original_tail: candidate.left_tail.clone(),
                original_head: candidate.right_head.clone(),
                left_tail,
                right_head,
                tokens_used: completion.tokens,
                repaired: true,
            }
        }
        None => {
            warn!(
                "Seam {}/{}: unusable repair response, keeping original boundary",
                candidate.left_index,
                candidate.left_index + 1
            );
            SeamRepair {
                left_index: candidate.left_index,
                original_tail: candidate.left_tail.clone(),
                original_head: candidate.right_head.clone(),
                left_tail: candidate.left_tail.clone(),
                right_head: candidate.right_head.clone(),
                tokens_used: completion.tokens,
                repaired: false,
            }
        }
    };
    Ok(repair)
}

/// Text substituted for a page without a translation
pub fn placeholder(unit: &TranslationUnit) -> String {
    match unit.content() {
        UnitContent::Text(text) => text.clone(),
        UnitContent::Image { .. } => format!("[untranslated page {}]", unit.sequence_index() + 1),
    }
}

/// Concatenate pages in order, substituting repaired seams and placeholders
pub fn assemble_pages(
    units: &[TranslationUnit],
    completed: &BTreeMap<usize, UnitResult>,
    seams: &BTreeMap<usize, SeamRepair>,
) -> String {
    let mut pages: Vec<String> = units
        .iter()
        .map(|unit| match completed.get(&unit.sequence_index()) {
            Some(result) => result.translated_text.clone(),
            None => placeholder(unit),
        })
        .collect();

    for repair in seams.values().filter(|r| r.repaired) {
        let left = repair.left_index;
        let right = left + 1;
        if right >= pages.len() || !completed.contains_key(&left) || !completed.contains_key(&right) {
            continue;
        }

        let left_split = pages[left]
            .trim_end()
            .strip_suffix(repair.original_tail.as_str())
            .map(|body| format!("{}{}", body, repair.left_tail));
        let right_split = pages[right]
            .trim_start()
            .strip_prefix(repair.original_head.as_str())
            .map(|rest| format!("{}{}", repair.right_head, rest));

        match (left_split, right_split) {
            (Some(new_left), Some(new_right)) => {
                pages[left] = new_left;
                pages[right] = new_right;
            }
            _ => warn!("Seam {}/{} no longer matches the page text, skipped", left, right),
        }
    }

    pages.join(PAGE_SEPARATOR)
}
