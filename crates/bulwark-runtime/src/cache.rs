//! Response cache: a bounded, time-expiring store of prior successful
//! responses.
//!
//! Two lookup modes: exact key (the fast path, checked before any provider
//! call) and token-overlap similarity (a last-resort fallback once every
//! live call has failed). Eviction is strict FIFO by insertion; recency of
//! use does not extend an entry's life.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use bulwark_core::{AiResponse, Message, Role};

/// Separator joining history turns into a cache key.
const KEY_SEPARATOR: &str = "||";

/// How many trailing history turns participate in the key.
const KEY_HISTORY_TURNS: usize = 2;

/// Cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of live entries before FIFO eviction kicks in.
    pub max_entries: usize,

    /// Lifetime for entries cached off the primary provider.
    #[serde(with = "crate::config::duration_str")]
    pub ttl: Duration,

    /// Shorter lifetime for entries cached off the fallback provider.
    #[serde(with = "crate::config::duration_str")]
    pub fallback_ttl: Duration,

    /// Minimum token-overlap score for a similarity hit, in (0, 1].
    pub similarity_threshold: f64,

    /// Whether assistant turns participate in key derivation. Off by
    /// default: user turns alone keep similar conversational contexts
    /// collapsing to the same key.
    pub include_assistant_context: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 100,
            ttl: Duration::from_secs(3600),
            fallback_ttl: Duration::from_secs(300),
            similarity_threshold: 0.35,
            include_assistant_context: false,
        }
    }
}

struct CacheEntry {
    value: AiResponse,
    expires_at: Instant,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    insertion_order: VecDeque<String>,
}

/// Bounded FIFO cache with TTL expiry and fuzzy lookup.
pub struct ResponseCache {
    inner: RwLock<CacheInner>,
    config: CacheConfig,
}

impl ResponseCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: RwLock::new(CacheInner::default()),
            config,
        }
    }

    /// Exact lookup. An expired entry is purged on read and reported absent.
    pub fn get(&self, key: &str) -> Option<AiResponse> {
        {
            let inner = self.inner.read();
            match inner.entries.get(key) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    return Some(entry.value.clone())
                }
                Some(_) => {}
                None => return None,
            }
        }

        // Lazy purge; re-check under the write lock in case the entry was
        // refreshed since the read lock dropped.
        let mut inner = self.inner.write();
        let expired = inner
            .entries
            .get(key)
            .is_some_and(|entry| entry.expires_at <= Instant::now());
        if expired {
            inner.entries.remove(key);
            inner.insertion_order.retain(|k| k != key);
            tracing::debug!(key, "expired entry purged on read");
            return None;
        }
        inner.entries.get(key).map(|entry| entry.value.clone())
    }

    /// Insert with the default TTL.
    pub fn set(&self, key: impl Into<String>, value: AiResponse) {
        self.set_with_ttl(key, value, self.config.ttl);
    }

    /// Insert with an explicit TTL. Overwriting an existing key re-inserts
    /// it at the back of the eviction order (its lifetime was just renewed).
    pub fn set_with_ttl(&self, key: impl Into<String>, value: AiResponse, ttl: Duration) {
        let key = key.into();
        let mut inner = self.inner.write();

        if inner.entries.contains_key(&key) {
            inner.insertion_order.retain(|k| k != &key);
        } else if inner.entries.len() >= self.config.max_entries {
            while let Some(oldest) = inner.insertion_order.pop_front() {
                if inner.entries.remove(&oldest).is_some() {
                    tracing::debug!(evicted = %oldest, "capacity reached, oldest entry evicted");
                    break;
                }
            }
        }

        inner.insertion_order.push_back(key.clone());
        inner.entries.insert(
            key,
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Fuzzy lookup: the live entry whose key best overlaps `message`,
    /// if it clears the similarity threshold.
    ///
    /// Last-resort path only; never consulted before the providers.
    pub fn find_similar(&self, message: &str) -> Option<AiResponse> {
        let probe = token_set(message);
        if probe.is_empty() {
            return None;
        }

        let now = Instant::now();
        let inner = self.inner.read();
        let mut best: Option<(f64, &CacheEntry)> = None;
        for (key, entry) in &inner.entries {
            if entry.expires_at <= now {
                continue;
            }
            let score = token_overlap(&probe, &token_set(key));
            if score >= self.config.similarity_threshold
                && best.map_or(true, |(top, _)| score > top)
            {
                best = Some((score, entry));
            }
        }

        best.map(|(score, entry)| {
            tracing::debug!(score, "similar cached response found");
            entry.value.clone()
        })
    }

    /// Derive the cache key for a request: the current message plus up to
    /// the last two matching history turns, oldest first.
    pub fn conversation_key(&self, message: &str, history: &[Message]) -> String {
        let mut recent: Vec<&str> = history
            .iter()
            .rev()
            .filter(|m| {
                m.role == Role::User
                    || (self.config.include_assistant_context && m.role == Role::Assistant)
            })
            .take(KEY_HISTORY_TURNS)
            .map(|m| m.content.as_str())
            .collect();
        recent.reverse();

        if recent.is_empty() {
            message.to_owned()
        } else {
            format!("{}{}{}", recent.join(KEY_SEPARATOR), KEY_SEPARATOR, message)
        }
    }

    /// Number of entries currently stored, expired or not.
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.write();
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| entry.expires_at > now);
        let removed = before - inner.entries.len();
        if removed > 0 {
            let live: HashSet<&String> = inner.entries.keys().collect();
            let order: VecDeque<String> = inner
                .insertion_order
                .iter()
                .filter(|k| live.contains(k))
                .cloned()
                .collect();
            inner.insertion_order = order;
            tracing::debug!(removed, "expired entries purged");
        }
        removed
    }
}

/// Lowercased word tokens of a text.
fn token_set(text: &str) -> HashSet<String> {
    static WORD: OnceLock<regex::Regex> = OnceLock::new();
    let pattern = WORD.get_or_init(|| regex::Regex::new(r"[a-z0-9']+").expect("valid pattern"));
    pattern
        .find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_owned())
        .collect()
}

/// Jaccard similarity of two token sets.
fn token_overlap(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(b).count();
    if shared == 0 {
        return 0.0;
    }
    shared as f64 / (a.len() + b.len() - shared) as f64
}
