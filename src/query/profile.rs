use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

/// A snapshot of compile and search profiling metrics.
///
/// Profiling is enabled via the `SIFT_PROFILE` environment variable and
/// tracks time spent in the compilation passes and in per-schema record
/// evaluation.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryProfileSnapshot {
    /// Total nanoseconds spent normalizing queries.
    pub normalize_ns: u64,
    /// Number of normalization passes.
    pub normalize_count: u64,
    /// Total nanoseconds spent narrowing types and converting existence tests.
    pub narrow_ns: u64,
    /// Number of narrowing passes.
    pub narrow_count: u64,
    /// Total nanoseconds spent pruning against archive indexes.
    pub prune_ns: u64,
    /// Number of pruning passes.
    pub prune_count: u64,
    /// Total nanoseconds spent splitting queries by schema.
    pub schema_match_ns: u64,
    /// Number of schema splits.
    pub schema_match_count: u64,
    /// Total nanoseconds spent evaluating records.
    pub evaluate_ns: u64,
    /// Number of schema tables scanned.
    pub evaluate_count: u64,
}

#[derive(Default)]
struct QueryProfileCounters {
    normalize_ns: AtomicU64,
    normalize_count: AtomicU64,
    narrow_ns: AtomicU64,
    narrow_count: AtomicU64,
    prune_ns: AtomicU64,
    prune_count: AtomicU64,
    schema_match_ns: AtomicU64,
    schema_match_count: AtomicU64,
    evaluate_ns: AtomicU64,
    evaluate_count: AtomicU64,
}

static PROFILE_ENABLED: OnceLock<bool> = OnceLock::new();
static PROFILE_COUNTERS: OnceLock<QueryProfileCounters> = OnceLock::new();

fn profiling_enabled() -> bool {
    *PROFILE_ENABLED.get_or_init(|| std::env::var_os("SIFT_PROFILE").is_some())
}

fn counters() -> Option<&'static QueryProfileCounters> {
    profiling_enabled().then(|| PROFILE_COUNTERS.get_or_init(QueryProfileCounters::default))
}

pub(crate) fn profile_timer() -> Option<Instant> {
    profiling_enabled().then(Instant::now)
}

pub(crate) enum QueryProfileKind {
    /// Or-of-And normalization.
    Normalize,
    /// Type narrowing and existence conversion.
    Narrow,
    /// Range-index and timestamp-index pruning.
    Prune,
    /// Schema matching and splitting.
    SchemaMatch,
    /// Scanning one schema table.
    Evaluate,
}

pub(crate) fn record_profile_timer(kind: QueryProfileKind, start: Option<Instant>) {
    let Some(start) = start else {
        return;
    };
    let Some(counters) = counters() else {
        return;
    };
    let nanos = start.elapsed().as_nanos().min(u64::MAX as u128) as u64;
    let (ns, count) = match kind {
        QueryProfileKind::Normalize => (&counters.normalize_ns, &counters.normalize_count),
        QueryProfileKind::Narrow => (&counters.narrow_ns, &counters.narrow_count),
        QueryProfileKind::Prune => (&counters.prune_ns, &counters.prune_count),
        QueryProfileKind::SchemaMatch => (&counters.schema_match_ns, &counters.schema_match_count),
        QueryProfileKind::Evaluate => (&counters.evaluate_ns, &counters.evaluate_count),
    };
    ns.fetch_add(nanos, Ordering::Relaxed);
    count.fetch_add(1, Ordering::Relaxed);
}

/// Retrieves a snapshot of current profiling metrics.
///
/// # Arguments
///
/// * `reset` - If `true`, resets all counters to zero after reading them.
///
/// # Returns
///
/// Returns `Some(QueryProfileSnapshot)` if profiling is enabled via the
/// `SIFT_PROFILE` environment variable, or `None` if profiling is disabled.
///
/// # Example
///
/// ```no_run
/// use sift::query::profile::profile_snapshot;
///
/// if let Some(snapshot) = profile_snapshot(true) {
///     println!("schema splits: {}", snapshot.schema_match_count);
/// }
/// ```
pub fn profile_snapshot(reset: bool) -> Option<QueryProfileSnapshot> {
    let counters = counters()?;
    let load = |counter: &AtomicU64| {
        if reset {
            counter.swap(0, Ordering::Relaxed)
        } else {
            counter.load(Ordering::Relaxed)
        }
    };
    Some(QueryProfileSnapshot {
        normalize_ns: load(&counters.normalize_ns),
        normalize_count: load(&counters.normalize_count),
        narrow_ns: load(&counters.narrow_ns),
        narrow_count: load(&counters.narrow_count),
        prune_ns: load(&counters.prune_ns),
        prune_count: load(&counters.prune_count),
        schema_match_ns: load(&counters.schema_match_ns),
        schema_match_count: load(&counters.schema_match_count),
        evaluate_ns: load(&counters.evaluate_ns),
        evaluate_count: load(&counters.evaluate_count),
    })
}
