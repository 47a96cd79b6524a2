//! The conversation-model engine: training, generation, loading,
//! statistics. Composes the chain cache, the context buffer, and the
//! message store.

use std::sync::Arc;

use futures::StreamExt;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::ChainCache;
use crate::chain::{Chain, ChainStats};
use crate::context::{ContextBuffer, CONTEXT_CAPACITY};
use crate::error::ParrotError;
use crate::store::MessageStore;
use crate::token::{self, Token};
use crate::ConversationId;

/// Newest messages fetched on load.
const RECENT_FETCH_LIMIT: usize = 100;
/// Below this many recent messages, the older tier is fetched too.
const RECENT_FULL_THRESHOLD: usize = 50;
/// Older messages fetched past the recent tier.
const OLDER_FETCH_LIMIT: usize = 1000;
/// Training weight for the recent tier; the older tier gets 1.
const RECENT_WEIGHT: u32 = 2;

/// Words taken from the context buffer to seed an unprompted generation.
const SEED_CONTEXT_WORDS: usize = 5;
/// Soft sentence break after this many words without a terminator.
const MAX_SENTENCE_WORDS: usize = 12;
/// Bound on re-rolling an End marker while sampling a seed token.
const START_SAMPLE_RETRIES: usize = 8;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Markov chain order, `>= 1`.
    pub order: usize,
    /// In-flight store loads during `load_all`.
    pub load_concurrency: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            order: 2,
            load_concurrency: 8,
        }
    }
}

/// One engine per process. Exclusively owns the chain cache and context
/// buffers; nothing outside mutates a chain directly.
pub struct Engine {
    cache: ChainCache,
    context: ContextBuffer,
    store: Arc<dyn MessageStore>,
    load_concurrency: usize,
}

impl Engine {
    pub fn new(cfg: EngineConfig, store: Arc<dyn MessageStore>) -> Self {
        Self {
            cache: ChainCache::new(cfg.order.max(1)),
            context: ContextBuffer::new(),
            store,
            load_concurrency: cfg.load_concurrency.max(1),
        }
    }

    /// Number of conversations with a cached model.
    pub fn cached_models(&self) -> usize {
        self.cache.len()
    }

    /// Train the conversation's chain on one message and remember the
    /// raw text for context seeding. Messages of fewer than two tokens
    /// are too short to model and change nothing. Never fails; the
    /// caller persists the raw message separately, and a persistence
    /// failure does not undo this in-memory update.
    pub fn train(&self, id: ConversationId, text: &str) {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        if tokens.len() < 2 {
            return;
        }
        let chain = self.cache.get_or_create(id);
        chain.write().add(&tokens);
        self.context.push(id, text);
    }

    /// Generate a continuation using the process-wide random source.
    pub fn generate(
        &self,
        id: ConversationId,
        prefix: &str,
        max_len: usize,
    ) -> Result<String, ParrotError> {
        self.generate_with_rng(id, prefix, max_len, &mut rand::rng())
    }

    /// Generation core with an injectable random source, reproducible
    /// for a fixed seed.
    pub fn generate_with_rng<R: Rng + ?Sized>(
        &self,
        id: ConversationId,
        prefix: &str,
        max_len: usize,
        rng: &mut R,
    ) -> Result<String, ParrotError> {
        debug!(conversation = id, prefix, max_len, "generating");

        let shared = self.cache.get(id).ok_or(ParrotError::NoModel)?;
        let chain = shared.read();
        if chain.is_empty() {
            return Err(ParrotError::NoModel);
        }

        // Seed: explicit prefix, else the tail of the recent context,
        // else a random sequence-initial token.
        let mut seed: Vec<String> = prefix.split_whitespace().map(str::to_string).collect();
        if seed.is_empty() {
            seed = self.context.tail_words(id, SEED_CONTEXT_WORDS);
        }
        if seed.is_empty() {
            match random_text_token(&chain, rng) {
                Some(t) => seed.push(t),
                None => return Err(ParrotError::NoModel),
            }
        }
        while seed.len() < chain.order() {
            match random_text_token(&chain, rng) {
                Some(t) => seed.push(t),
                None => break,
            }
        }

        let mut out = String::new();
        for word in &seed {
            if !out.is_empty() && !token::is_punctuation(word) {
                out.push(' ');
            }
            out.push_str(word);
        }

        let mut window: Vec<Token> = seed.into_iter().map(Token::Text).collect();
        let mut word_count = window.len();

        for _ in 0..max_len {
            let state_start = window.len().saturating_sub(chain.order());
            let next = match chain.generate(&window[state_start..], rng) {
                Some(Token::Text(t)) => t,
                // end marker, sampling failure or unknown state
                _ => break,
            };

            let next = next.trim();
            if next.is_empty() || (!token::is_word(next) && !token::is_punctuation(next)) {
                continue;
            }

            if !token::is_punctuation(next) && !out.is_empty() {
                out.push(' ');
            }
            out.push_str(next);
            window.push(Token::text(next));
            word_count += 1;

            if token::is_sentence_end(next) {
                word_count = 0;
            } else if word_count >= MAX_SENTENCE_WORDS {
                if !token::is_punctuation(next) {
                    out.push('.');
                }
                word_count = 0;
            }
        }

        Ok(finish_sentence(out))
    }

    /// Evict the conversation's chain and context. Idempotent.
    pub fn clear(&self, id: ConversationId) {
        self.cache.evict(id);
        self.context.reset(id);
    }

    /// Zero-value stats when no chain is cached.
    pub fn stats(&self, id: ConversationId) -> ChainStats {
        match self.cache.get(id) {
            Some(chain) => chain.read().stats(),
            None => ChainStats::default(),
        }
    }

    /// Rebuild the conversation's model from stored history.
    ///
    /// Two fetch tiers: the newest 100 messages, plus up to 1000 older
    /// ones when fewer than 50 came back. Recent-tier transitions are
    /// trained with double weight. The fresh chain is built aside and
    /// swapped in whole, so a failed fetch leaves the prior state
    /// untouched and repeated loads are idempotent.
    pub async fn load(&self, id: ConversationId) -> Result<(), ParrotError> {
        let recent = self
            .store
            .fetch_by_conversation(id, RECENT_FETCH_LIMIT, 0)
            .await?;

        let older = if recent.len() < RECENT_FULL_THRESHOLD {
            match self
                .store
                .fetch_by_conversation(id, OLDER_FETCH_LIMIT, RECENT_FETCH_LIMIT)
                .await
            {
                Ok(msgs) => msgs,
                Err(e) => {
                    warn!(
                        conversation = id,
                        error = %e,
                        "older history fetch failed, training on recent tier only"
                    );
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let recent_count = recent.len();
        let older_count = older.len();

        let mut chain = Chain::new(self.cache.order());
        let mut buffered = Vec::with_capacity(CONTEXT_CAPACITY);
        for (i, msg) in recent.iter().chain(older.iter()).enumerate() {
            let tokens: Vec<&str> = msg.text.split_whitespace().collect();
            if tokens.len() < 2 {
                continue;
            }
            let weight = if i < recent_count { RECENT_WEIGHT } else { 1 };
            chain.add_weighted(&tokens, weight);
            if buffered.len() < CONTEXT_CAPACITY {
                buffered.push(msg.text.clone());
            }
        }

        let stats = chain.stats();
        self.cache.insert(id, chain);
        self.context.replace(id, buffered);

        info!(
            conversation = id,
            recent = recent_count,
            older = older_count,
            transitions = stats.total_transitions,
            ngrams = stats.unique_ngrams,
            "conversation model loaded"
        );
        Ok(())
    }

    /// Load every known conversation, fanning out through a bounded
    /// worker pool. A single conversation's failure never aborts or
    /// rolls back the others; failures are aggregated into one error.
    /// Once `cancel` fires, no new store loads are issued; loads already
    /// in flight complete normally.
    pub async fn load_all(&self, cancel: &CancellationToken) -> Result<usize, ParrotError> {
        if cancel.is_cancelled() {
            return Err(ParrotError::Canceled);
        }

        let ids = self.store.list_conversation_ids().await?;
        info!(total = ids.len(), "loading all conversations");

        let results: Vec<(ConversationId, Result<(), ParrotError>)> =
            futures::stream::iter(ids)
                .map(|id| {
                    let cancel = cancel.clone();
                    async move {
                        if cancel.is_cancelled() {
                            return (id, Err(ParrotError::Canceled));
                        }
                        (id, self.load(id).await)
                    }
                })
                .buffer_unordered(self.load_concurrency)
                .collect()
                .await;

        let mut loaded = 0_usize;
        let mut failed = 0_usize;
        let mut first: Option<ParrotError> = None;
        for (id, result) in results {
            match result {
                Ok(()) => loaded += 1,
                Err(e) => {
                    warn!(conversation = id, error = %e, "failed to load conversation");
                    failed += 1;
                    if first.is_none() {
                        first = Some(e);
                    }
                }
            }
        }

        match first {
            Some(first) => Err(ParrotError::AggregateLoad {
                count: failed,
                first: Box::new(first),
            }),
            None => Ok(loaded),
        }
    }
}

fn random_text_token<R: Rng + ?Sized>(chain: &Chain, rng: &mut R) -> Option<String> {
    for _ in 0..START_SAMPLE_RETRIES {
        match chain.random_start(rng)? {
            Token::Text(t) => return Some(t),
            _ => continue,
        }
    }
    None
}

/// Tidy the tail: drop a dangling non-terminal punctuation mark, make
/// sure non-empty output ends a sentence.
fn finish_sentence(mut s: String) -> String {
    match s.chars().last() {
        None => s,
        Some(c) if token::is_sentence_end_char(c) => s,
        Some(c) => {
            if token::is_punctuation_char(c) {
                s.pop();
            }
            s.push('.');
            s
        }
    }
}
