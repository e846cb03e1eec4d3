//! Index configuration options.

use std::sync::Arc;
use std::time::Duration;

/// Function returning the current wall time in epoch milliseconds.
///
/// Swappable so tests can drive timestamps deterministically.
pub type NowProvider = Arc<dyn Fn() -> i64 + Send + Sync>;

/// How pagination cursors are carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CursorMode {
    /// Self-contained base64url tokens; no server-side state.
    #[default]
    Full,
    /// Server-side payload rows addressed by a random handle (`c:<hex>`).
    Short,
}

/// Options recognized by the core.
#[derive(Clone)]
pub struct IndexOptions {
    /// Lifetime of short cursors.
    pub cursor_ttl: Duration,
    /// Cursor carrier mode.
    pub cursor_mode: CursorMode,
    /// Minimum literal length for prefix and glob keyword patterns.
    pub min_prefix_len: usize,
    /// Minimum inner length for contains keyword patterns.
    pub min_contains_len: usize,
    /// Ceiling on dictionary rows a pattern predicate may expand to.
    pub max_prefix_expansion: usize,
    /// Wall-clock source.
    pub now_provider: NowProvider,
}

impl IndexOptions {
    /// Current time in epoch milliseconds, per the configured provider.
    pub fn now_ms(&self) -> i64 {
        (self.now_provider)()
    }

    /// Replaces the wall-clock source. Test hook.
    pub fn with_now_provider(mut self, now: NowProvider) -> Self {
        self.now_provider = now;
        self
    }
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            cursor_ttl: Duration::from_secs(3600),
            cursor_mode: CursorMode::Full,
            min_prefix_len: 2,
            min_contains_len: 3,
            max_prefix_expansion: 20_000,
            now_provider: Arc::new(|| chrono::Utc::now().timestamp_millis()),
        }
    }
}

impl std::fmt::Debug for IndexOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexOptions")
            .field("cursor_ttl", &self.cursor_ttl)
            .field("cursor_mode", &self.cursor_mode)
            .field("min_prefix_len", &self.min_prefix_len)
            .field("min_contains_len", &self.min_contains_len)
            .field("max_prefix_expansion", &self.max_prefix_expansion)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let opts = IndexOptions::default();
        assert_eq!(opts.cursor_ttl, Duration::from_secs(3600));
        assert_eq!(opts.cursor_mode, CursorMode::Full);
        assert_eq!(opts.min_prefix_len, 2);
        assert_eq!(opts.min_contains_len, 3);
        assert_eq!(opts.max_prefix_expansion, 20_000);
        assert!(opts.now_ms() > 0);
    }

    #[test]
    fn now_provider_is_swappable() {
        let opts = IndexOptions::default().with_now_provider(Arc::new(|| 42));
        assert_eq!(opts.now_ms(), 42);
    }
}
