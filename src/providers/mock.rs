/*!
 * Mock translator for testing.
 *
 * The translator "translates" by prefixing the target language, and can be scripted to:
 * - refuse given units (always, or only on the first attempt)
 * - truncate long units
 * - fail transiently on every Nth call
 * - fail terminally
 * - respond slowly
 *
 * Every dispatched unit is recorded so tests can assert what was (not) sent.
 */

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::errors::ProviderError;
use crate::providers::{Completion, ModelInterface, ModelParams, UnitRequest, UserContent};
use crate::translation::prompts::{parse_seam_response, SEAM_MARKER};
use crate::translation::unit::{FinishReason, TokenUsage, UnitContent, UnitResult};

/// Behavior mode for the mock translator
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MockBehavior {
    /// Always succeeds with a prefixed translation
    Working,
    /// Fails with a rate limit on every Nth call
    Intermittent { fail_every: usize },
    /// Always fails with an authentication error
    Failing,
    /// Sleeps before answering
    Slow { delay_ms: u64 },
}

type CallHook = Arc<dyn Fn(usize) + Send + Sync>;

/// Mock translator for testing engine behavior
#[derive(Clone)]
pub struct MockTranslator {
    behavior: MockBehavior,
    model: String,
    refuse_always: HashSet<usize>,
    refuse_once: HashSet<usize>,
    truncate_longer_than: Option<usize>,
    seam_replies: Option<String>,
    on_call: Option<CallHook>,
    /// Every call, translation and seam repair alike
    request_count: Arc<AtomicUsize>,
    seam_count: Arc<AtomicUsize>,
    dispatched: Arc<Mutex<Vec<usize>>>,
    attempts: Arc<Mutex<HashMap<usize, usize>>>,
    contexts: Arc<Mutex<Vec<Option<String>>>>,
}

impl std::fmt::Debug for MockTranslator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTranslator")
            .field("behavior", &self.behavior)
            .field("model", &self.model)
            .field("requests", &self.request_count.load(Ordering::SeqCst))
            .finish()
    }
}

impl MockTranslator {
    /// Create a new mock translator with the specified behavior
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            model: "mock-model".to_string(),
            refuse_always: HashSet::new(),
            refuse_once: HashSet::new(),
            truncate_longer_than: None,
            seam_replies: None,
            on_call: None,
            request_count: Arc::new(AtomicUsize::new(0)),
            seam_count: Arc::new(AtomicUsize::new(0)),
            dispatched: Arc::new(Mutex::new(Vec::new())),
            attempts: Arc::new(Mutex::new(HashMap::new())),
            contexts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a working mock translator that always succeeds
    pub fn working() -> Self {
        Self::new(MockBehavior::Working)
    }

    /// Create an intermittently failing mock translator
    pub fn intermittent(fail_every: usize) -> Self {
        Self::new(MockBehavior::Intermittent {
            fail_every: fail_every.max(1),
        })
    }

    /// Create a failing mock translator that always errors terminally
    pub fn failing() -> Self {
        Self::new(MockBehavior::Failing)
    }

    /// Create a mock translator that waits before every answer
    pub fn slow(delay_ms: u64) -> Self {
        Self::new(MockBehavior::Slow { delay_ms })
    }

    /// Refuse these units on every attempt
    pub fn refusing(mut self, indices: impl IntoIterator<Item = usize>) -> Self {
        self.refuse_always.extend(indices);
        self
    }

    /// Refuse these units on their first attempt only
    pub fn refusing_once(mut self, indices: impl IntoIterator<Item = usize>) -> Self {
        self.refuse_once.extend(indices);
        self
    }

    /// Report truncation for text longer than `chars`
    pub fn truncating_longer_than(mut self, chars: usize) -> Self {
        self.truncate_longer_than = Some(chars);
        self
    }

    /// Answer seam repairs with this fixed text instead of echoing
    pub fn with_seam_reply(mut self, reply: impl Into<String>) -> Self {
        self.seam_replies = Some(reply.into());
        self
    }

    /// Run `hook` with the unit index at the start of every translation call
    pub fn with_call_hook(mut self, hook: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.on_call = Some(Arc::new(hook));
        self
    }

    /// Total number of calls made
    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::SeqCst)
    }

    /// Number of seam repair calls made
    pub fn seam_count(&self) -> usize {
        self.seam_count.load(Ordering::SeqCst)
    }

    /// Unit indices in the order they were dispatched, one entry per attempt
    pub fn dispatched(&self) -> Vec<usize> {
        self.dispatched.lock().clone()
    }

    /// Distinct unit indices that were dispatched
    pub fn dispatched_set(&self) -> HashSet<usize> {
        self.dispatched.lock().iter().copied().collect()
    }

    /// Context strings passed with each translation call, in call order
    pub fn contexts(&self) -> Vec<Option<String>> {
        self.contexts.lock().clone()
    }

    /// Translation of `text` as produced by this mock
    pub fn translation_of(text: &str, target_language: &str) -> String {
        text.lines()
            .map(|line| {
                if line.trim().is_empty() {
                    String::new()
                } else {
                    format!("[{}] {}", target_language, line)
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    async fn before_call(&self) -> Result<(), ProviderError> {
        let count = self.request_count.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            MockBehavior::Working => Ok(()),
            MockBehavior::Slow { delay_ms } => {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                Ok(())
            }
            MockBehavior::Failing => Err(ProviderError::Authentication("Invalid API key".to_string())),
            MockBehavior::Intermittent { fail_every } => {
                if count % fail_every == fail_every - 1 {
                    Err(ProviderError::RateLimited {
                        message: "Simulated rate limit".to_string(),
                        retry_after_secs: None,
                    })
                } else {
                    Ok(())
                }
            }
        }
    }

    fn usage_for(text: &str) -> TokenUsage {
        let tokens = (text.chars().count() as u64).div_ceil(4).max(1);
        TokenUsage::new(tokens, tokens)
    }
}

#[async_trait]
impl ModelInterface for MockTranslator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, _system: &str, content: UserContent, _params: &ModelParams) -> Result<Completion, ProviderError> {
        self.before_call().await?;

        let prompt = match content {
            UserContent::Text(text) => text,
            UserContent::Image { instruction, .. } => instruction,
        };

        if prompt.contains(SEAM_MARKER) {
            self.seam_count.fetch_add(1, Ordering::SeqCst);
            let text = match &self.seam_replies {
                Some(reply) => reply.clone(),
                None => match parse_seam_response(&prompt) {
                    Some((tail, head)) => format!("{} {}\n{}\n{}", tail, "~", SEAM_MARKER, head),
                    None => prompt.clone(),
                },
            };
            return Ok(Completion {
                tokens: Self::usage_for(&prompt),
                text,
                finish_reason: FinishReason::Complete,
            });
        }

        Ok(Completion {
            tokens: Self::usage_for(&prompt),
            text: prompt,
            finish_reason: FinishReason::Complete,
        })
    }

    async fn translate(&self, request: &UnitRequest) -> Result<UnitResult, ProviderError> {
        let index = request.unit.sequence_index();
        if let Some(hook) = &self.on_call {
            hook(index);
        }
        self.dispatched.lock().push(index);
        self.contexts.lock().push(request.context.clone());
        let attempt = {
            let mut attempts = self.attempts.lock();
            let entry = attempts.entry(index).or_insert(0);
            *entry += 1;
            *entry
        };

        self.before_call().await?;

        let source = match request.unit.content() {
            UnitContent::Text(text) => text.clone(),
            UnitContent::Image { .. } => format!("image page {}", index + 1),
        };
        let usage = Self::usage_for(&source);

        let refused = self.refuse_always.contains(&index) || (self.refuse_once.contains(&index) && attempt == 1);
        if refused {
            return Ok(UnitResult {
                sequence_index: index,
                translated_text: "I'm sorry, I can't help with that.".to_string(),
                tokens_used: TokenUsage::new(usage.input, 1),
                model_used: self.model.clone(),
                finish_reason: FinishReason::Refused,
                unit_kind: request.unit.kind(),
            });
        }

        let translated = Self::translation_of(&source, &request.target_lang);
        let (translated_text, finish_reason) = match self.truncate_longer_than {
            Some(limit) if source.chars().count() > limit => {
                let cut: String = translated.chars().take(limit).collect();
                (cut, FinishReason::Truncated)
            }
            _ => (translated, FinishReason::Complete),
        };

        Ok(UnitResult {
            sequence_index: index,
            translated_text,
            tokens_used: usage,
            model_used: self.model.clone(),
            finish_reason,
            unit_kind: request.unit.kind(),
        })
    }
}
