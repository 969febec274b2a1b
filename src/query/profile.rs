use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

/// A snapshot of query execution profiling metrics.
///
/// Profiling is enabled via the `LURQL_PROFILE` environment variable. Counters
/// are process-wide and accumulate across executions until read with `reset`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryProfileSnapshot {
    /// Total nanoseconds spent scanning class extents and dereferencing seeds.
    pub scan_ns: u64,
    /// Number of root scans.
    pub scan_count: u64,
    /// Total nanoseconds spent navigating associations.
    pub navigate_ns: u64,
    /// Number of edge propagations.
    pub navigate_count: u64,
    /// Total nanoseconds spent evaluating filters.
    pub filter_ns: u64,
    /// Number of filter passes over candidate batches.
    pub filter_count: u64,
    /// Total nanoseconds spent inside recursion rounds.
    pub recursion_ns: u64,
    /// Number of recursion rounds.
    pub recursion_count: u64,
    /// Total nanoseconds spent running SQL subqueries.
    pub sql_ns: u64,
    /// Number of SQL subqueries actually sent to the connection.
    pub sql_count: u64,
    /// Total nanoseconds spent evaluating exists sub-queries.
    pub exists_ns: u64,
    /// Number of exists sub-queries evaluated (cache misses only).
    pub exists_count: u64,
}

#[derive(Default)]
struct QueryProfileCounters {
    scan_ns: AtomicU64,
    scan_count: AtomicU64,
    navigate_ns: AtomicU64,
    navigate_count: AtomicU64,
    filter_ns: AtomicU64,
    filter_count: AtomicU64,
    recursion_ns: AtomicU64,
    recursion_count: AtomicU64,
    sql_ns: AtomicU64,
    sql_count: AtomicU64,
    exists_ns: AtomicU64,
    exists_count: AtomicU64,
}

static PROFILE_ENABLED: OnceLock<bool> = OnceLock::new();
static PROFILE_COUNTERS: OnceLock<QueryProfileCounters> = OnceLock::new();

fn profiling_enabled() -> bool {
    *PROFILE_ENABLED.get_or_init(|| std::env::var_os("LURQL_PROFILE").is_some())
}

fn counters() -> Option<&'static QueryProfileCounters> {
    profiling_enabled().then(|| PROFILE_COUNTERS.get_or_init(QueryProfileCounters::default))
}

pub(crate) fn profile_timer() -> Option<Instant> {
    profiling_enabled().then(Instant::now)
}

pub(crate) enum QueryProfileKind {
    /// Root scans.
    Scan,
    /// Association navigation for one edge.
    Navigate,
    /// Filter evaluation for one candidate batch.
    Filter,
    /// One seminaive recursion round.
    Recursion,
    /// One SQL subquery.
    Sql,
    /// One exists sub-query evaluation.
    Exists,
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
        QueryProfileKind::Scan => (&counters.scan_ns, &counters.scan_count),
        QueryProfileKind::Navigate => (&counters.navigate_ns, &counters.navigate_count),
        QueryProfileKind::Filter => (&counters.filter_ns, &counters.filter_count),
        QueryProfileKind::Recursion => (&counters.recursion_ns, &counters.recursion_count),
        QueryProfileKind::Sql => (&counters.sql_ns, &counters.sql_count),
        QueryProfileKind::Exists => (&counters.exists_ns, &counters.exists_count),
    };
    ns.fetch_add(nanos, Ordering::Relaxed);
    count.fetch_add(1, Ordering::Relaxed);
}

/// Retrieves a snapshot of current query profiling metrics.
///
/// Returns `None` unless `LURQL_PROFILE` was set when the process first
/// checked it. With `reset`, counters are zeroed as they are read.
///
/// ```no_run
/// use lurql::query::profile::profile_snapshot;
///
/// if let Some(snapshot) = profile_snapshot(true) {
///     println!("recursion rounds: {}", snapshot.recursion_count);
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
        scan_ns: load(&counters.scan_ns),
        scan_count: load(&counters.scan_count),
        navigate_ns: load(&counters.navigate_ns),
        navigate_count: load(&counters.navigate_count),
        filter_ns: load(&counters.filter_ns),
        filter_count: load(&counters.filter_count),
        recursion_ns: load(&counters.recursion_ns),
        recursion_count: load(&counters.recursion_count),
        sql_ns: load(&counters.sql_ns),
        sql_count: load(&counters.sql_count),
        exists_ns: load(&counters.exists_ns),
        exists_count: load(&counters.exists_count),
    })
}
