/*!
 * Per-unit translation work.
 *
 * Workers only talk to the model. They never touch the checkpoint: every outcome goes
 * back to the engine's bookkeeping loop, which is the single writer.
 *
 * A unit goes through:
 * 1. the retry policy for transient provider errors,
 * 2. one bypass attempt with a reinforced prompt if the model refused,
 * 3. re-segmentation into smaller pieces if the output was truncated.
 */

use futures::future::{BoxFuture, FutureExt};
use log::{debug, info, warn};
use std::sync::Arc;

use crate::checkpoint::FailureRecord;
use crate::errors::{ErrorKind, ProviderError};
use crate::providers::{ModelInterface, ModelParams, UnitRequest};
use crate::translation::page::{repair_seam, SeamCandidate, SeamRepair};
use crate::translation::retry::RetryPolicy;
use crate::translation::unit::{FinishReason, TokenUsage, TranslationUnit, UnitResult};

/// Shared, read-only state every worker needs
#[derive(Debug)]
pub(crate) struct WorkerContext {
    pub translator: Arc<dyn ModelInterface>,
    pub retry: RetryPolicy,
    pub source_lang: String,
    pub target_lang: String,
    pub system_prompt: String,
    pub reinforced_prompt: String,
    pub params: ModelParams,
    pub refusal_retry: bool,
    pub resegment_on_truncation: bool,
    pub max_resegment_depth: u32,
    /// Window translations keep their edge whitespace for overlap reconciliation
    pub preserve_whitespace: bool,
}

/// Result of translating one unit
#[derive(Debug)]
pub(crate) enum UnitOutcome {
    Completed(UnitResult),
    /// Per-unit failure; the job goes on
    Failed(FailureRecord),
    /// Provider error that makes every further call pointless
    Terminal(ProviderError, FailureRecord),
}

/// Translated text of a unit or of a re-segmented piece
struct Piece {
    text: String,
    finish_reason: FinishReason,
    usage: TokenUsage,
    attempts: u32,
}

struct PieceFailure {
    record: FailureRecord,
    terminal: Option<ProviderError>,
}

impl PieceFailure {
    fn provider(error: ProviderError, usage: TokenUsage, attempts: u32) -> Self {
        let record = FailureRecord {
            kind: error.kind(),
            message: error.to_string(),
            attempts,
            tokens_used: usage,
        };
        let terminal = error.is_terminal().then_some(error);
        Self { record, terminal }
    }

    fn refused(index: usize, usage: TokenUsage, attempts: u32) -> Self {
        Self {
            record: FailureRecord {
                kind: ErrorKind::ProviderRefusal,
                message: format!("Model refused to translate unit {}", index),
                attempts,
                tokens_used: usage,
            },
            terminal: None,
        }
    }

    /// Fold in usage spent by the enclosing attempt before it split
    fn with_parent(mut self, usage: TokenUsage, attempts: u32) -> Self {
        self.record.tokens_used += usage;
        self.record.attempts += attempts;
        self
    }
}

impl WorkerContext {
    async fn call(
        &self,
        unit: &TranslationUnit,
        context: Option<&str>,
        system_prompt: &str,
        usage: &mut TokenUsage,
        attempts: &mut u32,
    ) -> Result<UnitResult, PieceFailure> {
        let request = UnitRequest {
            unit: unit.clone(),
            source_lang: self.source_lang.clone(),
            target_lang: self.target_lang.clone(),
            context: context.map(str::to_string),
            system_prompt: system_prompt.to_string(),
            params: self.params.clone(),
            preserve_whitespace: self.preserve_whitespace,
        };
        let label = format!("Unit {}", unit.sequence_index());
        let outcome = self.retry.run(&label, || self.translator.translate(&request)).await;
        *attempts += outcome.attempts;

        match outcome.result {
            Ok(result) => {
                *usage += result.tokens_used;
                Ok(result)
            }
            Err(error) => Err(PieceFailure::provider(error, *usage, *attempts)),
        }
    }

    fn translate_piece<'a>(
        &'a self,
        unit: TranslationUnit,
        context: Option<String>,
        depth: u32,
    ) -> BoxFuture<'a, Result<Piece, PieceFailure>> {
        async move {
            let index = unit.sequence_index();
            let mut usage = TokenUsage::default();
            let mut attempts = 0;

            let mut result = self
                .call(&unit, context.as_deref(), &self.system_prompt, &mut usage, &mut attempts)
                .await?;

            if result.finish_reason == FinishReason::Refused && self.refusal_retry {
                warn!("Unit {}: model refused, retrying with reinforced instructions", index);
                result = self
                    .call(&unit, context.as_deref(), &self.reinforced_prompt, &mut usage, &mut attempts)
                    .await?;
            }

            if result.finish_reason == FinishReason::Refused {
                return Err(PieceFailure::refused(index, usage, attempts));
            }

            if result.finish_reason == FinishReason::Truncated
                && self.resegment_on_truncation
                && depth < self.max_resegment_depth
            {
                if let Some((left, separator, right)) = unit.as_text().and_then(split_near_middle) {
                    info!(
                        "Unit {}: output truncated, re-segmenting ({} + {} chars)",
                        index,
                        left.chars().count(),
                        right.chars().count()
                    );
                    let first = self
                        .translate_piece(TranslationUnit::text(index, left), context.clone(), depth + 1)
                        .await
                        .map_err(|f| f.with_parent(usage, attempts))?;
                    let second = self
                        .translate_piece(TranslationUnit::text(index, right), None, depth + 1)
                        .await
                        .map_err(|f| f.with_parent(usage + first.usage, attempts + first.attempts))?;

                    let finish_reason = if first.finish_reason == FinishReason::Complete
                        && second.finish_reason == FinishReason::Complete
                    {
                        FinishReason::Complete
                    } else {
                        FinishReason::Truncated
                    };
                    return Ok(Piece {
                        text: format!("{}{}{}", first.text, separator, second.text),
                        finish_reason,
                        usage: usage + first.usage + second.usage,
                        attempts: attempts + first.attempts + second.attempts,
                    });
                }
            }

            Ok(Piece {
                text: result.translated_text,
                finish_reason: result.finish_reason,
                usage,
                attempts,
            })
        }
        .boxed()
    }
}

/// Split text near its middle, preferring paragraph breaks, then line breaks, then spaces.
/// Returns `(left, separator, right)`, or `None` when the text has nowhere to split.
pub(crate) fn split_near_middle(text: &str) -> Option<(String, String, String)> {
    let len = text.len();
    let mid = len / 2;

    for separator in ["\n\n", "\n", " "] {
        let anywhere = separator == " ";
        let best = text
            .match_indices(separator)
            .map(|(i, _)| i)
            .filter(|&i| i > 0 && i + separator.len() < len)
            .filter(|&i| anywhere || (i >= len / 4 && i <= len - len / 4))
            .min_by_key(|&i| i.abs_diff(mid));

        if let Some(i) = best {
            let left = &text[..i];
            let right = &text[i + separator.len()..];
            if !left.trim().is_empty() && !right.trim().is_empty() {
                return Some((left.to_string(), separator.to_string(), right.to_string()));
            }
        }
    }
    None
}

/// Translate one unit to completion or failure
pub(crate) async fn translate_unit(
    ctx: Arc<WorkerContext>,
    unit: TranslationUnit,
    context: Option<String>,
) -> UnitOutcome {
    let index = unit.sequence_index();
    let kind = unit.kind();
    debug!("Translating unit {}", index);

    match ctx.translate_piece(unit, context, 0).await {
        Ok(piece) => {
            if piece.finish_reason == FinishReason::Truncated {
                warn!("Unit {}: output still truncated, keeping partial translation", index);
            }
            UnitOutcome::Completed(UnitResult {
                sequence_index: index,
                translated_text: piece.text,
                tokens_used: piece.usage,
                model_used: ctx.translator.model_name().to_string(),
                finish_reason: piece.finish_reason,
                unit_kind: kind,
            })
        }
        Err(PieceFailure {
            record,
            terminal: Some(error),
        }) => UnitOutcome::Terminal(error, record),
        Err(PieceFailure { record, terminal: None }) => UnitOutcome::Failed(record),
    }
}

/// Repair one page junction, retrying transient errors
pub(crate) async fn repair_junction(
    ctx: Arc<WorkerContext>,
    candidate: SeamCandidate,
) -> Result<SeamRepair, ProviderError> {
    let label = format!("Seam {}/{}", candidate.left_index, candidate.left_index + 1);
    ctx.retry
        .run(&label, || {
            repair_seam(ctx.translator.as_ref(), &candidate, &ctx.target_lang, &ctx.params)
        })
        .await
        .result
}
