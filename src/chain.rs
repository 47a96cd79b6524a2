//! A single fixed-order Markov chain and its derived statistics.

use std::collections::{BTreeMap, HashMap};

use rand::Rng;
use serde::Serialize;

use crate::token::Token;

/// Read-only view over a chain's frequency table. Computed on demand,
/// never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChainStats {
    pub order: usize,
    pub total_transitions: u64,
    pub unique_ngrams: usize,
}

/// A Markov chain for one conversation.
///
/// The frequency table maps a window of `order` prior tokens to the
/// observed next tokens and their counts. Invariants: `order >= 1`;
/// a chain with no transitions is "empty" and must not be generated
/// from. The inner map is ordered so that sampling is deterministic
/// for a fixed random source.
#[derive(Debug, Clone)]
pub struct Chain {
    order: usize,
    freq: HashMap<Vec<Token>, BTreeMap<Token, u32>>,
}

impl Chain {
    /// `order` must be at least 1; validated at configuration parse time.
    pub fn new(order: usize) -> Self {
        debug_assert!(order >= 1);
        Self {
            order,
            freq: HashMap::new(),
        }
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn is_empty(&self) -> bool {
        self.freq.is_empty()
    }

    /// Record one observation of every transition in `tokens`.
    pub fn add(&mut self, tokens: &[&str]) {
        self.add_weighted(tokens, 1);
    }

    /// Record `weight` observations of every transition in `tokens`.
    ///
    /// The sequence is padded with `order` start markers in front and an
    /// end marker behind, then every window of `order + 1` consecutive
    /// tokens increments `(state) -> next` by `weight`. Sequences
    /// shorter than `order + 1` tokens are a no-op, as is weight 0.
    pub fn add_weighted(&mut self, tokens: &[&str], weight: u32) {
        if tokens.len() < self.order + 1 || weight == 0 {
            return;
        }

        let mut seq: Vec<Token> = Vec::with_capacity(tokens.len() + self.order + 1);
        seq.resize(self.order, Token::Start);
        seq.extend(tokens.iter().map(|t| Token::text(*t)));
        seq.push(Token::End);

        for window in seq.windows(self.order + 1) {
            let (state, next) = window.split_at(self.order);
            *self
                .freq
                .entry(state.to_vec())
                .or_default()
                .entry(next[0].clone())
                .or_insert(0) += weight;
        }
    }

    /// Sample the next token for `state`, with probability proportional
    /// to observed counts. Returns `None` for a never-observed state;
    /// may return [`Token::End`].
    pub fn generate<R: Rng + ?Sized>(&self, state: &[Token], rng: &mut R) -> Option<Token> {
        let transitions = self.freq.get(state)?;
        let total: u64 = transitions.values().map(|&c| u64::from(c)).sum();
        if total == 0 {
            return None;
        }

        let mut r = rng.random_range(0..total);
        for (next, &count) in transitions {
            let count = u64::from(count);
            if r < count {
                return Some(next.clone());
            }
            r -= count;
        }
        None
    }

    /// Sample a successor of the all-start state, i.e. a token that
    /// began a trained sequence. `None` on an empty chain.
    pub fn random_start<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Token> {
        let start = vec![Token::Start; self.order];
        self.generate(&start, rng)
    }

    /// Transition counts observed for `state`, for introspection.
    pub fn transitions(&self, state: &[Token]) -> Option<&BTreeMap<Token, u32>> {
        self.freq.get(state)
    }

    pub fn stats(&self) -> ChainStats {
        let mut total = 0_u64;
        for transitions in self.freq.values() {
            total += transitions.values().map(|&c| u64::from(c)).sum::<u64>();
        }
        ChainStats {
            order: self.order,
            total_transitions: total,
            unique_ngrams: self.freq.len(),
        }
    }
}
