//! Rolling per-key edge history with percentile rank lookups.
//!
//! Each key is a (symbol, direction, timeframe) triple; its window holds the
//! same multiset of net-edge values twice: a chronological `VecDeque` of
//! records for recency queries, and a sorted `Vec<f64>` for O(log n)
//! percentile lookups. Inserts and evictions touch both in lockstep, so the
//! two views never drift apart. Eviction removes the *exact value* of the
//! oldest record from the sorted side, never merely the smallest element.

use std::collections::VecDeque;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use ahash::AHashMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use tc_core::config::EdgeConfig;
use tc_core::types::TradeDirection;

// ---------------------------------------------------------------------------
// Key and record
// ---------------------------------------------------------------------------

/// Identity of one edge-history window.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EdgeKey {
    pub symbol: String,
    pub direction: TradeDirection,
    pub timeframe: String,
}

impl EdgeKey {
    pub fn new(symbol: &str, direction: TradeDirection, timeframe: &str) -> Self {
        Self { symbol: symbol.to_string(), direction, timeframe: timeframe.to_string() }
    }
}

impl std::fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.symbol, self.direction, self.timeframe)
    }
}

/// One observed net-edge value.
///
/// Recorded at decision time, never at outcome time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub timestamp: DateTime<Utc>,
    pub net_edge: f64,
    #[serde(default)]
    pub signal_type: Option<String>,
    /// Free-form decision context (confidence, gate state, multiplier, ...).
    /// Carried with the record and through snapshots; never interpreted here.
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// Optional context attached to a recorded observation.
#[derive(Debug, Clone, Default)]
pub struct EdgeContext {
    pub signal_type: Option<String>,
    pub metadata: Option<serde_json::Value>,
    /// Observation time; the current time when unset.
    pub timestamp: Option<DateTime<Utc>>,
}

/// Distribution summary for one key (or the aggregate across keys).
#[derive(Debug, Clone, Serialize)]
pub struct EdgeSummary {
    pub count: usize,
    pub sufficient_samples: bool,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    pub p25: f64,
    pub p75: f64,
    pub p90: f64,
}

#[derive(Default)]
struct KeyWindow {
    history: VecDeque<EdgeRecord>,
    sorted: Vec<f64>,
}

// ---------------------------------------------------------------------------
// EdgeStats
// ---------------------------------------------------------------------------

/// Historical net-edge tracker with per-key rolling windows.
pub struct EdgeStats {
    max_window: usize,
    min_sample: usize,
    snapshot_path: Option<PathBuf>,
    windows: AHashMap<EdgeKey, KeyWindow>,
}

impl EdgeStats {
    /// Build from config; warm-loads the snapshot file when one is configured
    /// and present. A corrupt snapshot is logged and discarded, never fatal.
    pub fn new(cfg: &EdgeConfig) -> Self {
        let mut stats = Self {
            max_window: cfg.max_window,
            min_sample: cfg.min_sample,
            snapshot_path: cfg.snapshot_path.as_ref().map(PathBuf::from),
            windows: AHashMap::new(),
        };
        if let Some(path) = stats.snapshot_path.clone() {
            if path.exists() {
                stats.load_snapshot(&path);
            }
        }
        stats
    }

    /// Record a net-edge observation for a key.
    ///
    /// Must be called after the decision is made but before the trade outcome
    /// is known. When the window exceeds capacity, the oldest chronological
    /// record is evicted and its exact value removed from the sorted view.
    pub fn record_edge(&mut self, key: &EdgeKey, net_edge: f64, ctx: EdgeContext) {
        let window = self.windows.entry(key.clone()).or_default();

        window.history.push_back(EdgeRecord {
            timestamp: ctx.timestamp.unwrap_or_else(Utc::now),
            net_edge,
            signal_type: ctx.signal_type,
            metadata: ctx.metadata,
        });
        let idx = window.sorted.partition_point(|v| *v < net_edge);
        window.sorted.insert(idx, net_edge);

        while window.history.len() > self.max_window {
            if let Some(evicted) = window.history.pop_front() {
                remove_exact(&mut window.sorted, evicted.net_edge);
            }
        }

        if self.snapshot_path.is_some() {
            self.save_snapshot();
        }
    }

    /// Percentile rank of `net_edge` within the key's history: the fraction
    /// of recorded values strictly below it, in [0, 1].
    ///
    /// Returns `None` when the key holds fewer than `min_sample` observations.
    /// Callers must treat `None` as "unknown", never as the 0th percentile.
    pub fn get_edge_percentile(&self, key: &EdgeKey, net_edge: f64) -> Option<f64> {
        let sorted = &self.windows.get(key)?.sorted;
        if sorted.len() < self.min_sample {
            return None;
        }
        let idx = sorted.partition_point(|v| *v < net_edge);
        Some(idx as f64 / sorted.len() as f64)
    }

    /// Observation count for a key.
    pub fn sample_count(&self, key: &EdgeKey) -> usize {
        self.windows.get(key).map_or(0, |w| w.sorted.len())
    }

    /// Distribution summary for one key; `None` when it has no records.
    pub fn statistics(&self, key: &EdgeKey) -> Option<EdgeSummary> {
        let window = self.windows.get(key)?;
        summarize(&window.sorted, self.min_sample)
    }

    /// Distribution summary across every key; `None` when nothing has been
    /// recorded at all.
    pub fn aggregate_statistics(&self) -> Option<EdgeSummary> {
        let mut all: Vec<f64> = self.windows.values().flat_map(|w| w.sorted.iter().copied()).collect();
        all.sort_by(f64::total_cmp);
        summarize(&all, self.min_sample)
    }

    /// The most recent `limit` records for a key, oldest first.
    pub fn recent_records(&self, key: &EdgeKey, limit: usize) -> Vec<EdgeRecord> {
        let Some(window) = self.windows.get(key) else {
            return Vec::new();
        };
        let skip = window.history.len().saturating_sub(limit);
        window.history.iter().skip(skip).cloned().collect()
    }

    /// Drop one key's history.
    pub fn clear_key(&mut self, key: &EdgeKey) {
        self.windows.remove(key);
    }

    /// Drop all history and the snapshot file, if any.
    pub fn clear_all(&mut self) {
        self.windows.clear();
        if let Some(path) = &self.snapshot_path {
            if path.exists() {
                let _ = fs::remove_file(path);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Snapshot persistence
    // -----------------------------------------------------------------------

    /// Persist all windows to the configured snapshot path, atomically
    /// (temp file + rename).
    ///
    /// Best-effort: the snapshot is a warm-restart optimization, not ledger
    /// data, so failures are logged and swallowed rather than surfaced into
    /// the trading path.
    pub fn save_snapshot(&self) {
        let Some(path) = &self.snapshot_path else {
            return;
        };
        let snapshot = Snapshot {
            max_window: self.max_window,
            min_sample: self.min_sample,
            windows: self
                .windows
                .iter()
                .map(|(key, w)| SnapshotWindow {
                    key: key.clone(),
                    records: w.history.iter().cloned().collect(),
                })
                .collect(),
        };
        if let Err(e) = write_snapshot(path, &snapshot) {
            warn!(path = %path.display(), %e, "edge snapshot write failed");
        }
    }

    fn load_snapshot(&mut self, path: &Path) {
        let snapshot: Snapshot = match fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|s| serde_json::from_str(&s).map_err(|e| e.to_string()))
        {
            Ok(snap) => snap,
            Err(e) => {
                warn!(path = %path.display(), %e, "edge snapshot unreadable; starting empty");
                return;
            }
        };

        self.max_window = snapshot.max_window;
        self.min_sample = snapshot.min_sample;
        self.windows.clear();

        let mut total = 0usize;
        for entry in snapshot.windows {
            let mut sorted: Vec<f64> = entry.records.iter().map(|r| r.net_edge).collect();
            sorted.sort_by(f64::total_cmp);
            total += sorted.len();
            self.windows.insert(entry.key, KeyWindow { history: entry.records.into(), sorted });
        }
        info!(records = total, keys = self.windows.len(), path = %path.display(), "edge history loaded");
    }
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    max_window: usize,
    min_sample: usize,
    windows: Vec<SnapshotWindow>,
}

#[derive(Serialize, Deserialize)]
struct SnapshotWindow {
    key: EdgeKey,
    records: Vec<EdgeRecord>,
}

fn write_snapshot(path: &Path, snapshot: &Snapshot) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = serde_json::to_vec(snapshot)?;
    let tmp = path.with_extension("tmp");
    let mut f = fs::File::create(&tmp)?;
    f.write_all(&body)?;
    f.sync_all()?;
    fs::rename(&tmp, path)
}

/// Remove one occurrence of `value` from a sorted vec, if present.
fn remove_exact(sorted: &mut Vec<f64>, value: f64) {
    let idx = sorted.partition_point(|v| *v < value);
    if idx < sorted.len() && sorted[idx] == value {
        sorted.remove(idx);
    }
}

fn summarize(sorted: &[f64], min_sample: usize) -> Option<EdgeSummary> {
    if sorted.is_empty() {
        return None;
    }
    let n = sorted.len();
    let at = |p: f64| sorted[((n as f64 * p) as usize).min(n - 1)];
    Some(EdgeSummary {
        count: n,
        sufficient_samples: n >= min_sample,
        min: sorted[0],
        max: sorted[n - 1],
        mean: sorted.iter().sum::<f64>() / n as f64,
        median: at(0.5),
        p25: at(0.25),
        p75: at(0.75),
        p90: at(0.90),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn small_stats(max_window: usize, min_sample: usize) -> EdgeStats {
        let cfg = EdgeConfig { max_window, min_sample, ..Default::default() };
        EdgeStats::new(&cfg)
    }

    fn key() -> EdgeKey {
        EdgeKey::new("BTCUSDT", TradeDirection::Long, "15m")
    }

    fn record(stats: &mut EdgeStats, key: &EdgeKey, v: f64) {
        stats.record_edge(key, v, EdgeContext::default());
    }

    #[test]
    fn percentile_absent_below_min_sample() {
        let mut stats = small_stats(100, 5);
        for i in 0..4 {
            record(&mut stats, &key(), i as f64 * 0.001);
        }
        // 4 < min_sample: unknown, not 0th percentile.
        assert!(stats.get_edge_percentile(&key(), 0.002).is_none());

        record(&mut stats, &key(), 0.004);
        assert!(stats.get_edge_percentile(&key(), 0.002).is_some());
    }

    #[test]
    fn percentile_counts_strictly_smaller_values() {
        let mut stats = small_stats(100, 1);
        for v in [0.001, 0.002, 0.002, 0.003] {
            record(&mut stats, &key(), v);
        }
        // Rank of a value equal to existing entries counts only those
        // strictly below it.
        assert_eq!(stats.get_edge_percentile(&key(), 0.002), Some(0.25));
        assert_eq!(stats.get_edge_percentile(&key(), 0.0), Some(0.0));
        assert_eq!(stats.get_edge_percentile(&key(), 0.01), Some(1.0));
        assert_eq!(stats.get_edge_percentile(&key(), 0.0025), Some(0.75));
    }

    #[test]
    fn percentile_is_non_decreasing_in_the_query_value() {
        let mut stats = small_stats(100, 1);
        for v in [0.004, 0.001, 0.003, 0.001, 0.002, 0.005, 0.002] {
            record(&mut stats, &key(), v);
        }

        let mut last = 0.0;
        for step in 0..=60 {
            let q = step as f64 * 0.0001;
            let p = stats.get_edge_percentile(&key(), q).unwrap();
            assert!(p >= last, "percentile dropped from {last} to {p} at query {q}");
            assert!((0.0..=1.0).contains(&p));
            last = p;
        }
        assert_eq!(last, 1.0);
    }

    #[test]
    fn keys_are_independent() {
        let mut stats = small_stats(100, 1);
        let long = EdgeKey::new("BTCUSDT", TradeDirection::Long, "15m");
        let short = EdgeKey::new("BTCUSDT", TradeDirection::Short, "15m");
        let other_tf = EdgeKey::new("BTCUSDT", TradeDirection::Long, "1h");

        record(&mut stats, &long, 0.001);
        assert_eq!(stats.sample_count(&long), 1);
        assert_eq!(stats.sample_count(&short), 0);
        assert_eq!(stats.sample_count(&other_tf), 0);
        assert!(stats.get_edge_percentile(&short, 0.001).is_none());
    }

    #[test]
    fn eviction_removes_the_exact_oldest_value() {
        let mut stats = small_stats(3, 1);
        // Oldest chronologically is 0.005, which is the LARGEST value. A
        // naive "pop smallest" would corrupt the distribution.
        record(&mut stats, &key(), 0.005);
        record(&mut stats, &key(), 0.001);
        record(&mut stats, &key(), 0.002);
        record(&mut stats, &key(), 0.003); // evicts 0.005

        assert_eq!(stats.sample_count(&key()), 3);
        // 0.004 ranks above everything left: 0.005 must be gone.
        assert_eq!(stats.get_edge_percentile(&key(), 0.004), Some(1.0));

        let recent = stats.recent_records(&key(), 10);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].net_edge, 0.001);
        assert_eq!(recent[2].net_edge, 0.003);
    }

    #[test]
    fn eviction_with_duplicate_values_keeps_views_in_lockstep() {
        let mut stats = small_stats(2, 1);
        record(&mut stats, &key(), 0.002);
        record(&mut stats, &key(), 0.002);
        record(&mut stats, &key(), 0.001); // evicts one 0.002

        assert_eq!(stats.sample_count(&key()), 2);
        assert_eq!(stats.recent_records(&key(), 10).len(), 2);
        // One 0.002 must remain.
        assert_eq!(stats.get_edge_percentile(&key(), 0.0015), Some(0.5));
        assert_eq!(stats.get_edge_percentile(&key(), 0.003), Some(1.0));
    }

    #[test]
    fn statistics_summary() {
        let mut stats = small_stats(100, 3);
        assert!(stats.statistics(&key()).is_none());

        for v in [0.001, 0.002, 0.003, 0.004] {
            stats.record_edge(
                &key(),
                v,
                EdgeContext { signal_type: Some("momentum".to_string()), ..Default::default() },
            );
        }
        let summary = stats.statistics(&key()).unwrap();
        assert_eq!(summary.count, 4);
        assert!(summary.sufficient_samples);
        assert_eq!(summary.min, 0.001);
        assert_eq!(summary.max, 0.004);
        assert!((summary.mean - 0.0025).abs() < 1e-12);
        assert_eq!(summary.median, 0.003);
    }

    #[test]
    fn snapshot_round_trip_preserves_percentiles() {
        let path = std::env::temp_dir()
            .join("tc-edge-tests")
            .join(format!("snap_{}.json", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let cfg = EdgeConfig {
            max_window: 100,
            min_sample: 2,
            snapshot_path: Some(path.to_string_lossy().into_owned()),
            ..Default::default()
        };

        let ts = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let mut stats = EdgeStats::new(&cfg);
        record(&mut stats, &key(), 0.001);
        stats.record_edge(
            &key(),
            0.003,
            EdgeContext {
                signal_type: Some("momentum".to_string()),
                metadata: Some(serde_json::json!({"confidence": 0.7, "gate_state": "PROBE"})),
                timestamp: Some(ts),
            },
        );
        let before = stats.get_edge_percentile(&key(), 0.002);

        // Warm restart.
        let reloaded = EdgeStats::new(&cfg);
        assert_eq!(reloaded.sample_count(&key()), 2);
        assert_eq!(reloaded.get_edge_percentile(&key(), 0.002), before);

        // The decision context survives the round trip intact.
        let recent = reloaded.recent_records(&key(), 10);
        assert_eq!(recent[1].timestamp, ts);
        assert_eq!(recent[1].signal_type.as_deref(), Some("momentum"));
        assert_eq!(recent[1].metadata.as_ref().unwrap()["confidence"], 0.7);
        assert!(recent[0].metadata.is_none());

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn clear_key_and_clear_all() {
        let mut stats = small_stats(100, 1);
        let a = EdgeKey::new("AAA", TradeDirection::Long, "15m");
        let b = EdgeKey::new("BBB", TradeDirection::Short, "15m");
        record(&mut stats, &a, 0.001);
        record(&mut stats, &b, 0.002);

        stats.clear_key(&a);
        assert_eq!(stats.sample_count(&a), 0);
        assert_eq!(stats.sample_count(&b), 1);

        stats.clear_all();
        assert_eq!(stats.sample_count(&b), 0);
        assert!(stats.aggregate_statistics().is_none());
    }
}
