use std::collections::HashMap;
use std::sync::Arc;
use std::sync::LazyLock;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use serde::Deserialize;
use serde::Serialize;

use crate::ast::Node;
use crate::lexer::tokenize;
use crate::parser::parse;

pub const DEFAULT_CACHE_CAPACITY: usize = 512;

static GLOBAL_CACHE: LazyLock<Arc<AstCache>> =
	LazyLock::new(|| Arc::new(AstCache::new(DEFAULT_CACHE_CAPACITY)));

/// Counters describing how a cache has been used since it was created.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct CacheStats {
	/// Lookups served from the cache.
	pub hits: u64,
	/// Lookups that tokenized and parsed the source.
	pub misses: u64,
	/// Times the cache was emptied because it reached capacity.
	pub resets: u64,
	/// Entries currently held.
	pub entries: usize,
}

/// A bounded map from expression source text to its parsed tree.
///
/// The cache is a pure optimization: the key is the source text itself, so a
/// lookup can never return a tree for different text. When it reaches
/// capacity it is cleared wholesale rather than evicted piecewise. Concurrent
/// sessions may race to populate the same entry; the last write wins and both
/// writers hold an identical tree.
#[derive(Debug)]
pub struct AstCache {
	entries: RwLock<HashMap<String, Arc<Node>>>,
	capacity: usize,
	hits: AtomicU64,
	misses: AtomicU64,
	resets: AtomicU64,
}

impl AstCache {
	pub fn new(capacity: usize) -> Self {
		Self {
			entries: RwLock::new(HashMap::new()),
			capacity: capacity.max(1),
			hits: AtomicU64::new(0),
			misses: AtomicU64::new(0),
			resets: AtomicU64::new(0),
		}
	}

	/// The process-wide cache shared by engines that are not given their own.
	pub fn global() -> Arc<AstCache> {
		Arc::clone(&GLOBAL_CACHE)
	}

	pub fn capacity(&self) -> usize {
		self.capacity
	}

	/// Return the tree for `source`, tokenizing and parsing it on a miss.
	///
	/// Returns `None` when the source contains no tokens at all. Such sources
	/// are not cached.
	pub fn get_or_parse(&self, source: &str) -> Option<Arc<Node>> {
		let cached = self
			.entries
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.get(source)
			.cloned();

		if let Some(node) = cached {
			self.hits.fetch_add(1, Ordering::Relaxed);
			return Some(node);
		}

		self.misses.fetch_add(1, Ordering::Relaxed);
		tracing::trace!(source, "ast cache miss");

		let tokens = tokenize(source);
		if tokens.is_empty() {
			return None;
		}

		let node = Arc::new(parse(&tokens));
		let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);

		if entries.len() >= self.capacity {
			tracing::debug!(capacity = self.capacity, "ast cache full, clearing");
			entries.clear();
			self.resets.fetch_add(1, Ordering::Relaxed);
		}

		entries.insert(source.to_string(), Arc::clone(&node));

		Some(node)
	}

	pub fn stats(&self) -> CacheStats {
		CacheStats {
			hits: self.hits.load(Ordering::Relaxed),
			misses: self.misses.load(Ordering::Relaxed),
			resets: self.resets.load(Ordering::Relaxed),
			entries: self.len(),
		}
	}

	pub fn len(&self) -> usize {
		self.entries
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Drop every cached tree. Counters are kept.
	pub fn clear(&self) {
		self.entries
			.write()
			.unwrap_or_else(PoisonError::into_inner)
			.clear();
	}
}

impl Default for AstCache {
	fn default() -> Self {
		Self::new(DEFAULT_CACHE_CAPACITY)
	}
}
