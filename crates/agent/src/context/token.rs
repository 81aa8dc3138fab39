//! Token estimation and history trimming.
//!
//! The estimate is a model-aware heuristic, not a tokenizer:
//!
//! - each run of word characters costs 1 token up to a family-specific
//!   length, and `ceil(len / chars_per_subword)` beyond it;
//! - every other non-whitespace character costs 1 token;
//! - each run of whitespace earns a fractional credit.
//!
//! The fractional total is rounded up once, so the estimate is 0 for empty
//! text, at least 1 otherwise, and never decreases as text is appended.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use stridechat_config::TokenConfig;
use stridechat_core::{Message, TokenEstimator};
use tracing::debug;

/// Tokenizer family a model name maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFamily {
    Gpt,
    Claude,
    Llama,
    Generic,
}

#[derive(Debug, Clone, Copy)]
struct Coefficients {
    short_word_max: usize,
    chars_per_subword: f64,
    whitespace_credit: f64,
}

impl ModelFamily {
    /// Classify a model name. Unknown models fall back to `Generic`.
    pub fn from_model(model: &str) -> Self {
        let model = model.to_ascii_lowercase();
        if model.contains("gpt") || model.starts_with("o1") || model.starts_with("o3") {
            ModelFamily::Gpt
        } else if model.contains("claude") {
            ModelFamily::Claude
        } else if model.contains("llama") || model.contains("mistral") {
            ModelFamily::Llama
        } else {
            ModelFamily::Generic
        }
    }

    fn coefficients(&self) -> Coefficients {
        match self {
            ModelFamily::Gpt => Coefficients {
                short_word_max: 6,
                chars_per_subword: 4.0,
                whitespace_credit: 0.25,
            },
            ModelFamily::Claude => Coefficients {
                short_word_max: 5,
                chars_per_subword: 3.5,
                whitespace_credit: 0.25,
            },
            ModelFamily::Llama => Coefficients {
                short_word_max: 4,
                chars_per_subword: 3.0,
                whitespace_credit: 0.3,
            },
            // Highest estimate of the four.
            ModelFamily::Generic => Coefficients {
                short_word_max: 4,
                chars_per_subword: 3.0,
                whitespace_credit: 0.5,
            },
        }
    }
}

fn run_cost(len: usize, c: &Coefficients) -> f64 {
    match len {
        0 => 0.0,
        n if n <= c.short_word_max => 1.0,
        n => (n as f64 / c.chars_per_subword).ceil(),
    }
}

/// Uncached estimate for one text.
pub fn estimate_tokens(text: &str, family: ModelFamily) -> usize {
    if text.is_empty() {
        return 0;
    }
    let c = family.coefficients();
    let mut total = 0.0;
    let mut run = 0usize;
    let mut in_whitespace = false;

    for ch in text.chars() {
        if ch.is_alphanumeric() || ch == '_' {
            run += 1;
            in_whitespace = false;
            continue;
        }
        total += run_cost(run, &c);
        run = 0;
        if ch.is_whitespace() {
            if !in_whitespace {
                total += c.whitespace_credit;
                in_whitespace = true;
            }
        } else {
            total += 1.0;
            in_whitespace = false;
        }
    }
    total += run_cost(run, &c);

    (total.ceil() as usize).max(1)
}

/// Limits used when fitting history into a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBudget {
    pub context_limit: usize,
    pub safety_margin: usize,
    pub per_message_overhead: usize,
}

impl TokenBudget {
    pub fn from_config(config: &TokenConfig) -> Self {
        Self {
            context_limit: config.context_limit,
            safety_margin: config.safety_margin,
            per_message_overhead: config.per_message_overhead,
        }
    }

    /// Tokens a request may actually use.
    pub fn available(&self) -> usize {
        self.context_limit.saturating_sub(self.safety_margin)
    }
}

impl Default for TokenBudget {
    fn default() -> Self {
        Self::from_config(&TokenConfig::default())
    }
}

/// Cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub capacity: usize,
}

type CacheKey = (ModelFamily, String);

/// Bounded LRU map. Each entry carries a recency stamp; `recency` orders
/// keys by stamp so the least recently used key is its first entry.
struct LruCache {
    capacity: usize,
    map: HashMap<CacheKey, (usize, u64)>,
    recency: BTreeMap<u64, CacheKey>,
    next_stamp: u64,
}

impl LruCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            map: HashMap::with_capacity(capacity),
            recency: BTreeMap::new(),
            next_stamp: 0,
        }
    }

    fn stamp(&mut self) -> u64 {
        self.next_stamp += 1;
        self.next_stamp
    }

    fn get(&mut self, key: &CacheKey) -> Option<usize> {
        let (value, old) = *self.map.get(key)?;
        let stamp = self.stamp();
        if let Some(k) = self.recency.remove(&old) {
            self.recency.insert(stamp, k);
        }
        if let Some(entry) = self.map.get_mut(key) {
            entry.1 = stamp;
        }
        Some(value)
    }

    fn insert(&mut self, key: CacheKey, value: usize) {
        if self.capacity == 0 || self.map.contains_key(&key) {
            return;
        }
        let stamp = self.stamp();
        self.map.insert(key.clone(), (value, stamp));
        self.recency.insert(stamp, key);
        while self.map.len() > self.capacity {
            let Some((_, evicted)) = self.recency.pop_first() else {
                break;
            };
            self.map.remove(&evicted);
        }
    }

    fn len(&self) -> usize {
        self.map.len()
    }
}

/// Model-aware token counter with a shared LRU cache.
pub struct TokenCounter {
    family: ModelFamily,
    budget: TokenBudget,
    cache: Mutex<LruCache>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl std::fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCounter")
            .field("family", &self.family)
            .field("budget", &self.budget)
            .field("cache", &self.cache_stats())
            .finish()
    }
}

impl TokenCounter {
    /// A counter for `model` using the configured budget and cache size.
    pub fn new(config: &TokenConfig, model: &str) -> Self {
        Self {
            family: ModelFamily::from_model(model),
            budget: TokenBudget::from_config(config),
            cache: Mutex::new(LruCache::new(config.cache_capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn family(&self) -> ModelFamily {
        self.family
    }

    pub fn budget(&self) -> TokenBudget {
        self.budget
    }

    fn cache(&self) -> MutexGuard<'_, LruCache> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Estimate tokens of `text` for an explicit model.
    pub fn count_tokens_for(&self, text: &str, model: &str) -> usize {
        self.count_family(text, ModelFamily::from_model(model))
    }

    /// Estimate tokens of `text` for this counter's model.
    pub fn count_tokens(&self, text: &str) -> usize {
        self.count_family(text, self.family)
    }

    fn count_family(&self, text: &str, family: ModelFamily) -> usize {
        if text.is_empty() {
            return 0;
        }
        let key = (family, text.to_string());
        if let Some(hit) = self.cache().get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return hit;
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let count = estimate_tokens(text, family);
        self.cache().insert(key, count);
        count
    }

    fn message_cost(&self, message: &Message, overhead: usize) -> usize {
        self.count_tokens(&message.text) + overhead
    }

    /// `system_prompt_tokens + Σ(tokens(m) + per_message_overhead)`.
    pub fn count_conversation_tokens(&self, messages: &[Message], system_prompt_tokens: usize) -> usize {
        let overhead = self.budget.per_message_overhead;
        system_prompt_tokens
            + messages
                .iter()
                .map(|m| self.message_cost(m, overhead))
                .sum::<usize>()
    }

    /// Keep the newest contiguous run of messages that fits in
    /// `budget.available()` together with the system prompt.
    ///
    /// When not even the newest message fits, the most recent user message
    /// is returned alone (or the most recent message if there is no user
    /// message). Empty input yields empty output.
    pub fn trim_to_fit(
        &self,
        messages: &[Message],
        system_prompt_tokens: usize,
        budget: &TokenBudget,
    ) -> Vec<Message> {
        if messages.is_empty() {
            return Vec::new();
        }
        let limit = budget.available();
        let mut used = system_prompt_tokens;
        let mut start = messages.len();

        for (idx, message) in messages.iter().enumerate().rev() {
            let cost = self.message_cost(message, budget.per_message_overhead);
            if used + cost > limit {
                break;
            }
            used += cost;
            start = idx;
        }

        if start == messages.len() {
            let floor = messages
                .iter()
                .rev()
                .find(|m| m.is_user())
                .or_else(|| messages.last());
            debug!(limit, system_prompt_tokens, "History exceeds budget; keeping a single message");
            return floor.cloned().into_iter().collect();
        }

        if start > 0 {
            debug!(dropped = start, kept = messages.len() - start, used, limit, "Trimmed history to budget");
        }
        messages[start..].to_vec()
    }

    pub fn cache_stats(&self) -> CacheStats {
        let cache = self.cache();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: cache.len(),
            capacity: cache.capacity,
        }
    }
}

impl TokenEstimator for TokenCounter {
    fn estimate(&self, text: &str) -> usize {
        self.count_tokens(text)
    }
}
