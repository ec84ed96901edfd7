/*!
 * Document translation.
 *
 * - `unit`: translation units, results and window specs
 * - `cost`: price table, pre-flight estimates and the running cost ledger
 * - `prompts`: system, user, refusal-bypass and seam-repair prompts
 * - `retry`: bounded exponential backoff for provider calls
 * - `page`: page-by-page segmentation, seam repair and assembly
 * - `window`: sliding-window segmentation, overlap reconciliation and assembly
 * - `worker`: translation of a single unit (retry, refusal bypass, re-segmentation)
 * - `engine`: jobs, progress, cancellation and checkpoint bookkeeping
 */

pub mod cost;
pub mod engine;
pub mod page;
pub mod prompts;
pub mod retry;
pub mod unit;
pub mod window;
mod worker;

pub use self::cost::{CostEstimate, CostEstimator, CostLedger, CostLevel, ModelPrice, PriceTable};
pub use self::engine::{CancelSignal, JobHandle, JobProgress, JobReport, JobRequest, TranslationEngine};
pub use self::unit::{FinishReason, TokenUsage, TranslationUnit, UnitContent, UnitKind, UnitResult, WindowSpec};
