//! Prometheus export of template cache, query and pool figures.
//!
//! Counters for cache hits, misses and evictions are bumped by the cache
//! itself; this module holds the gauges and histograms published by the
//! executor and the [`Stratum`](crate::Stratum) service.

use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;
pub use metrics_exporter_prometheus::PrometheusHandle;

use crate::sql_cache::CacheStats;

/// Installs the global Prometheus recorder; the handle renders the scrape body.
pub fn install_prometheus_recorder() -> Result<PrometheusHandle, Box<dyn std::error::Error>> {
    Ok(PrometheusBuilder::new().install_recorder()?)
}

/// Publishes a template cache snapshot. Called after every compile.
pub fn record_cache_stats(stats: &CacheStats) {
    metrics::gauge!("stratum.template_cache.len").set(stats.len as f64);
    metrics::gauge!("stratum.template_cache.capacity").set(stats.capacity as f64);
    metrics::gauge!("stratum.template_cache.hit_ratio").set(stats.hit_ratio());
}

pub(crate) fn record_query(
    operation: &'static str,
    dialect: &'static str,
    record: &'static str,
    elapsed: Duration,
) {
    let labels = [
        ("operation", operation),
        ("dialect", dialect),
        ("record", record),
    ];
    metrics::histogram!("stratum.query.duration_ms", &labels[..])
        .record(elapsed.as_secs_f64() * 1000.0);
    metrics::counter!("stratum.query.count", &labels[..]).increment(1);
}

/// Connection usage of the pool a statement just ran on.
pub(crate) fn record_pool<DB: sqlx::Database>(pool: &sqlx::Pool<DB>, dialect: &'static str) {
    metrics::gauge!("stratum.pool.connections", "dialect" => dialect).set(f64::from(pool.size()));
    metrics::gauge!("stratum.pool.idle_connections", "dialect" => dialect)
        .set(pool.num_idle() as f64);
}
