//! Stateful front door for hosts: result cache, single-flight guard,
//! preview-line lock and completion observers around the layout executor.

use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};

use lru::LruCache;
use rustc_hash::FxHasher;

use crate::config::LayoutConfig;
use crate::ir::{GraphInput, InputEdge, InputNode};
use crate::layout::{LayoutError, LayoutExecutor, LayoutResult, PositionMap, Rect, ValidationIssue};

/// Anything that can hand the engine its current nodes and edges.
pub trait GraphSource {
    fn nodes(&self) -> Vec<InputNode>;
    fn edges(&self) -> Vec<InputEdge>;
}

impl GraphSource for GraphInput {
    fn nodes(&self) -> Vec<InputNode> {
        self.nodes.clone()
    }

    fn edges(&self) -> Vec<InputEdge> {
        self.edges.clone()
    }
}

/// Notified after every layout that actually ran or was served from cache.
pub trait LayoutObserver: Send + Sync {
    fn on_complete(&self, result: &LayoutResult);
    fn on_error(&self, error: &LayoutError);
}

#[derive(Debug, Clone, PartialEq)]
pub enum LayoutEvent {
    Complete {
        positions: PositionMap,
        score: f32,
        cached: bool,
    },
    Error(LayoutError),
}

/// Forwards notifications into an mpsc channel.
pub struct ChannelObserver {
    tx: Sender<LayoutEvent>,
}

impl ChannelObserver {
    pub fn channel() -> (Self, Receiver<LayoutEvent>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }
}

impl LayoutObserver for ChannelObserver {
    fn on_complete(&self, result: &LayoutResult) {
        let _ = self.tx.send(LayoutEvent::Complete {
            positions: result.positions.clone(),
            score: result.score,
            cached: result.cached,
        });
    }

    fn on_error(&self, error: &LayoutError) {
        let _ = self.tx.send(LayoutEvent::Error(error.clone()));
    }
}

/// Advisory lock a preview renderer holds while layout must not run.
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct PreviewLineLock {
    held: Arc<AtomicBool>,
}

impl PreviewLineLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Holds the lock until the guard drops.
    pub fn acquire(&self) -> PreviewLineGuard {
        self.held.store(true, Ordering::SeqCst);
        PreviewLineGuard {
            held: Arc::clone(&self.held),
        }
    }

    pub fn is_locked(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }
}

#[must_use = "the preview lock is released when the guard drops"]
pub struct PreviewLineGuard {
    held: Arc<AtomicBool>,
}

impl Drop for PreviewLineGuard {
    fn drop(&mut self) {
        self.held.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub capacity: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct ResultCache {
    entries: LruCache<u64, LayoutResult>,
    hits: u64,
    misses: u64,
}

impl ResultCache {
    fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            hits: 0,
            misses: 0,
        }
    }
}

struct InProgress<'a>(&'a AtomicBool);

impl Drop for InProgress<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct LayoutEngine {
    config: LayoutConfig,
    bounds: Rect,
    cache: Mutex<ResultCache>,
    in_progress: AtomicBool,
    preview_lock: PreviewLineLock,
    observers: Vec<Box<dyn LayoutObserver>>,
}

impl LayoutEngine {
    pub fn new(config: LayoutConfig) -> Self {
        let capacity = config.cache.capacity;
        Self {
            config,
            bounds: Rect::default(),
            cache: Mutex::new(ResultCache::new(capacity)),
            in_progress: AtomicBool::new(false),
            preview_lock: PreviewLineLock::new(),
            observers: Vec::new(),
        }
    }

    pub fn with_bounds(mut self, bounds: Rect) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn with_observer(mut self, observer: impl LayoutObserver + 'static) -> Self {
        self.observers.push(Box::new(observer));
        self
    }

    /// Shares an existing lock, e.g. one owned by the preview renderer.
    pub fn with_preview_lock(mut self, lock: PreviewLineLock) -> Self {
        self.preview_lock = lock;
        self
    }

    pub fn config(&self) -> &LayoutConfig {
        &self.config
    }

    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    pub fn preview_lock(&self) -> PreviewLineLock {
        self.preview_lock.clone()
    }

    pub fn is_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    pub fn layout(&self, input: &GraphInput) -> LayoutResult {
        self.run(input, None, &[])
    }

    /// Lays out with layer order seeded from a previous layout's positions.
    pub fn layout_with_prior(&self, input: &GraphInput, prior: &PositionMap) -> LayoutResult {
        self.run(input, Some(prior), &[])
    }

    /// Lays out a graph decoded from a host document, carrying the decode
    /// issues into validation.
    pub fn layout_decoded(&self, input: &GraphInput, decode_issues: &[ValidationIssue]) -> LayoutResult {
        self.run(input, None, decode_issues)
    }

    pub fn layout_source(&self, source: &dyn GraphSource) -> LayoutResult {
        let input = GraphInput {
            nodes: source.nodes(),
            edges: source.edges(),
        };
        self.run(&input, None, &[])
    }

    pub fn cache_stats(&self) -> CacheStats {
        let cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        CacheStats {
            hits: cache.hits,
            misses: cache.misses,
            size: cache.entries.len(),
            capacity: cache.entries.cap().get(),
        }
    }

    pub fn clear_cache(&self) {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache.entries.clear();
        cache.hits = 0;
        cache.misses = 0;
    }

    fn run(
        &self,
        input: &GraphInput,
        prior: Option<&PositionMap>,
        decode_issues: &[ValidationIssue],
    ) -> LayoutResult {
        if self.preview_lock.is_locked() {
            tracing::debug!("preview line lock held; skipping layout");
            return LayoutResult::skipped();
        }
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("rejecting layout request; another layout is running");
            return LayoutResult::failure(LayoutError::InProgress, Vec::new());
        }
        let _running = InProgress(&self.in_progress);

        let key = self
            .config
            .cache
            .enabled
            .then(|| fingerprint(input, prior, decode_issues, self.bounds, &self.config));
        if let Some(key) = key {
            let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(hit) = cache.entries.get(&key).cloned() {
                cache.hits += 1;
                drop(cache);
                tracing::debug!(key, "layout served from cache");
                let result = LayoutResult { cached: true, ..hit };
                self.notify(&result);
                return result;
            }
            cache.misses += 1;
        }

        let mut executor =
            LayoutExecutor::new(&self.config, self.bounds).with_issues(decode_issues.to_vec());
        if let Some(prior) = prior {
            executor = executor.with_prior_positions(prior);
        }
        let result = executor.run(input);

        if let Some(key) = key
            && result.success
            && !result.skipped
        {
            let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
            cache.entries.put(key, result.clone());
        }
        self.notify(&result);
        result
    }

    fn notify(&self, result: &LayoutResult) {
        match &result.error {
            Some(error) => self.observers.iter().for_each(|o| o.on_error(error)),
            None => self.observers.iter().for_each(|o| o.on_complete(result)),
        }
    }
}

impl Default for LayoutEngine {
    fn default() -> Self {
        Self::new(LayoutConfig::default())
    }
}

/// Structural hash of everything that influences the output.
fn fingerprint(
    input: &GraphInput,
    prior: Option<&PositionMap>,
    decode_issues: &[ValidationIssue],
    bounds: Rect,
    config: &LayoutConfig,
) -> u64 {
    let mut hasher = FxHasher::default();
    let bits = |value: Option<f32>| value.map(f32::to_bits);
    // Label and data come back inside the cached hierarchy.
    for node in &input.nodes {
        node.id.hash(&mut hasher);
        node.node_type.hash(&mut hasher);
        node.label.hash(&mut hasher);
        node.data.to_string().hash(&mut hasher);
        bits(node.width).hash(&mut hasher);
        bits(node.height).hash(&mut hasher);
        bits(node.x).hash(&mut hasher);
        bits(node.y).hash(&mut hasher);
    }
    input.nodes.len().hash(&mut hasher);
    for edge in &input.edges {
        edge.id.hash(&mut hasher);
        edge.source.hash(&mut hasher);
        edge.target.hash(&mut hasher);
        bits(edge.weight).hash(&mut hasher);
    }
    input.edges.len().hash(&mut hasher);
    for issue in decode_issues {
        issue.to_string().hash(&mut hasher);
    }
    for value in [bounds.x, bounds.y, bounds.width, bounds.height] {
        value.to_bits().hash(&mut hasher);
    }
    if let Some(prior) = prior {
        for (id, point) in prior {
            id.hash(&mut hasher);
            point.x.to_bits().hash(&mut hasher);
            point.y.to_bits().hash(&mut hasher);
        }
    }
    if let Ok(serialized) = serde_json::to_string(config) {
        serialized.hash(&mut hasher);
    }
    hasher.finish()
}
