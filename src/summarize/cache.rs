// src/summarize/cache.rs
//! File cache + daily call limit around any backend.
//!
//! Cache hits do not count against the limit. Cache and counter writes are
//! best-effort (tmp file + rename); a failed write never fails the call.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{DynBackend, SummarizationBackend};
use crate::error::BackendError;

pub fn default_cache_dir() -> PathBuf {
    PathBuf::from("cache/ai")
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum CachedReply {
    Summary { text: String },
    Verdict { yes: bool },
}

pub struct CachingBackend {
    inner: DynBackend,
    cache_dir: PathBuf,
    daily_limit: Option<u32>,
    counter: Mutex<DailyCounter>,
}

impl CachingBackend {
    pub fn new(inner: DynBackend, cache_dir: PathBuf, daily_limit: Option<u32>) -> Self {
        let _ = fs::create_dir_all(&cache_dir);
        let counter = Mutex::new(load_daily_counter(&cache_dir).unwrap_or_default());
        Self {
            inner,
            cache_dir,
            daily_limit,
            counter,
        }
    }

    /// Real calls made today.
    pub fn calls_today(&self) -> u32 {
        self.counter.lock().map(|g| g.count).unwrap_or(0)
    }

    /// Claim one call slot for today, or refuse once the limit is reached.
    /// Check and increment happen under one lock so concurrent callers cannot overshoot.
    fn reserve_call(&self) -> Result<(), BackendError> {
        let mut g = self
            .counter
            .lock()
            .map_err(|_| BackendError::Malformed("daily counter lock poisoned".into()))?;
        if g.is_expired() {
            g.reset_to_today();
        }
        if let Some(max) = self.daily_limit {
            if g.count >= max {
                metrics::counter!("summarize_rate_limited_total").increment(1);
                return Err(BackendError::RateLimited(max));
            }
        }
        g.count = g.count.saturating_add(1);
        let _ = save_daily_counter(&self.cache_dir, &g);
        Ok(())
    }
}

#[async_trait]
impl SummarizationBackend for CachingBackend {
    async fn summarize(&self, text: &str) -> Result<String, BackendError> {
        let key = cache_key("summarize", self.inner.name(), text);
        if let Some(CachedReply::Summary { text }) = read_cache_file(&self.cache_dir, &key) {
            return Ok(text);
        }
        self.reserve_call()?;
        let out = self.inner.summarize(text).await?;
        let _ = write_cache_file(
            &self.cache_dir,
            &key,
            &CachedReply::Summary { text: out.clone() },
        );
        Ok(out)
    }

    async fn classify(&self, text: &str, question: &str) -> Result<bool, BackendError> {
        let key = cache_key("classify", self.inner.name(), &format!("{question}\n{text}"));
        if let Some(CachedReply::Verdict { yes }) = read_cache_file(&self.cache_dir, &key) {
            return Ok(yes);
        }
        self.reserve_call()?;
        let yes = self.inner.classify(text, question).await?;
        let _ = write_cache_file(&self.cache_dir, &key, &CachedReply::Verdict { yes });
        Ok(yes)
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}

// ------------------------------------------------------------
// File cache helpers
// ------------------------------------------------------------

fn cache_key(op: &str, backend: &str, input: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(op.as_bytes());
    hasher.update([0u8]);
    hasher.update(backend.as_bytes());
    hasher.update([0u8]);
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(32);
    for b in digest.iter().take(16) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

fn cache_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{key}.json"))
}

fn read_cache_file(dir: &Path, key: &str) -> Option<CachedReply> {
    let s = fs::read_to_string(cache_path(dir, key)).ok()?;
    serde_json::from_str(&s).ok()
}

fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(tmp, path)
}

fn write_cache_file(dir: &Path, key: &str, value: &CachedReply) -> io::Result<()> {
    let json = serde_json::to_vec(value).map_err(io::Error::other)?;
    write_atomic(&cache_path(dir, key), &json)
}

// ------------------------------------------------------------
// Daily counter helpers
// ------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DailyCounter {
    date: String,
    count: u32,
}

impl Default for DailyCounter {
    fn default() -> Self {
        Self {
            date: today(),
            count: 0,
        }
    }
}

impl DailyCounter {
    fn is_expired(&self) -> bool {
        self.date != today()
    }
    fn reset_to_today(&mut self) {
        self.date = today();
        self.count = 0;
    }
}

fn today() -> String {
    chrono::Utc::now().date_naive().to_string()
}

fn counter_path(dir: &Path) -> PathBuf {
    dir.join("daily_count.json")
}

fn load_daily_counter(dir: &Path) -> io::Result<DailyCounter> {
    let s = fs::read_to_string(counter_path(dir))?;
    serde_json::from_str(&s).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn save_daily_counter(dir: &Path, dc: &DailyCounter) -> io::Result<()> {
    let json = serde_json::to_vec(dc).map_err(io::Error::other)?;
    write_atomic(&counter_path(dir), &json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct Counting {
        calls: AtomicU32,
    }

    #[async_trait]
    impl SummarizationBackend for Counting {
        async fn summarize(&self, text: &str) -> Result<String, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("sum:{}", text.len()))
        }
        async fn classify(&self, _text: &str, _q: &str) -> Result<bool, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(false)
        }
        fn name(&self) -> &'static str {
            "counting"
        }
    }

    #[tokio::test]
    async fn hits_are_free_and_limit_applies_to_misses() {
        let dir = tempfile::tempdir().unwrap();
        let inner = Arc::new(Counting {
            calls: AtomicU32::new(0),
        });
        let cb = CachingBackend::new(inner.clone(), dir.path().to_path_buf(), Some(2));

        assert_eq!(cb.summarize("alpha").await.unwrap(), "sum:5");
        assert_eq!(cb.summarize("alpha").await.unwrap(), "sum:5");
        assert!(!cb.classify("alpha", "AI?").await.unwrap());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cb.calls_today(), 2);

        assert_eq!(
            cb.summarize("beta").await,
            Err(BackendError::RateLimited(2))
        );
        // cached entries still served past the limit
        assert!(!cb.classify("alpha", "AI?").await.unwrap());
    }

    struct Slow {
        calls: AtomicU32,
    }

    #[async_trait]
    impl SummarizationBackend for Slow {
        async fn summarize(&self, text: &str) -> Result<String, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            Ok(text.to_uppercase())
        }
        async fn classify(&self, _text: &str, _q: &str) -> Result<bool, BackendError> {
            Ok(true)
        }
        fn name(&self) -> &'static str {
            "slow"
        }
    }

    #[tokio::test]
    async fn concurrent_calls_never_exceed_the_limit() {
        let dir = tempfile::tempdir().unwrap();
        let inner = Arc::new(Slow {
            calls: AtomicU32::new(0),
        });
        let cb = CachingBackend::new(inner.clone(), dir.path().to_path_buf(), Some(2));

        let texts: Vec<String> = (0..5).map(|i| format!("text {i}")).collect();
        let results =
            futures::future::join_all(texts.iter().map(|t| cb.summarize(t))).await;

        let ok = results.iter().filter(|r| r.is_ok()).count();
        let limited = results
            .iter()
            .filter(|r| matches!(r, Err(BackendError::RateLimited(2))))
            .count();
        assert_eq!((ok, limited), (2, 3));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cb.calls_today(), 2);
    }

    #[tokio::test]
    async fn counter_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let inner: DynBackend = Arc::new(Counting {
            calls: AtomicU32::new(0),
        });
        {
            let cb = CachingBackend::new(inner.clone(), dir.path().to_path_buf(), Some(5));
            cb.summarize("one").await.unwrap();
        }
        let cb = CachingBackend::new(inner, dir.path().to_path_buf(), Some(5));
        assert_eq!(cb.calls_today(), 1);
    }
}
