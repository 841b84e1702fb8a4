use crate::engine::Decision;
use crate::state::State;
use prometheus::core::Collector;
use prometheus::{opts, Counter, CounterVec, Encoder, Gauge, Registry, TextEncoder};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub standby_suppressed: Gauge,
    pub monitoring_cycles_total: Counter,
    pub suppressions_total: CounterVec,
    pub settings_reload_errors_total: Counter,
    pub cycle_duration_seconds: Gauge,
    pub last_cycle_timestamp_seconds: Gauge,
    pub active_plugins: Gauge,
    pub uptime_seconds: Gauge,
    pub scrape_count_total: Counter,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let standby_suppressed = Gauge::with_opts(opts!(
            "standbyd_standby_suppressed",
            "1 while some policy suppresses standby, 0 otherwise"
        ))?;
        let monitoring_cycles_total = Counter::with_opts(opts!(
            "standbyd_monitoring_cycles_total",
            "Completed monitoring cycles"
        ))?;
        let suppressions_total = CounterVec::new(
            opts!(
                "standbyd_suppressions_total",
                "Cycles in which a policy suppressed standby, by policy"
            ),
            &["source"],
        )?;
        let settings_reload_errors_total = Counter::with_opts(opts!(
            "standbyd_settings_reload_errors_total",
            "Cycles that had to fall back to the previous settings"
        ))?;
        let cycle_duration_seconds = Gauge::with_opts(opts!(
            "standbyd_cycle_duration_seconds",
            "Wall-clock duration of the last monitoring cycle"
        ))?;
        let last_cycle_timestamp_seconds = Gauge::with_opts(opts!(
            "standbyd_last_cycle_timestamp_seconds",
            "Unix timestamp of the last monitoring cycle"
        ))?;
        let active_plugins = Gauge::with_opts(opts!(
            "standbyd_active_plugins",
            "Plugins currently participating in the decision"
        ))?;
        let uptime_seconds = Gauge::with_opts(opts!(
            "standbyd_uptime_seconds",
            "Seconds since the daemon started"
        ))?;
        let scrape_count_total = Counter::with_opts(opts!(
            "standbyd_scrape_count_total",
            "Number of /metrics scrapes"
        ))?;

        register(&registry, &standby_suppressed)?;
        register(&registry, &monitoring_cycles_total)?;
        register(&registry, &suppressions_total)?;
        register(&registry, &settings_reload_errors_total)?;
        register(&registry, &cycle_duration_seconds)?;
        register(&registry, &last_cycle_timestamp_seconds)?;
        register(&registry, &active_plugins)?;
        register(&registry, &uptime_seconds)?;
        register(&registry, &scrape_count_total)?;

        Ok(Arc::new(Self {
            registry,
            standby_suppressed,
            monitoring_cycles_total,
            suppressions_total,
            settings_reload_errors_total,
            cycle_duration_seconds,
            last_cycle_timestamp_seconds,
            active_plugins,
            uptime_seconds,
            scrape_count_total,
        }))
    }

    pub fn record_cycle(&self, state: &State, decision: &Decision, duration_seconds: f64) {
        self.monitoring_cycles_total.inc();
        self.cycle_duration_seconds.set(duration_seconds);
        self.last_cycle_timestamp_seconds
            .set(state.last_cycle_unix as f64);
        self.active_plugins.set(state.active_plugins.len() as f64);

        if decision.suspend_standby {
            self.standby_suppressed.set(1.0);
            if let Some(source) = &decision.source {
                self.suppressions_total.with_label_values(&[source]).inc();
            }
        } else {
            self.standby_suppressed.set(0.0);
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        self.uptime_seconds
            .set(now.saturating_sub(state.started_at_unix) as f64);
    }

    pub fn inc_settings_reload_error(&self) {
        self.settings_reload_errors_total.inc();
    }

    pub fn inc_scrape_count(&self) {
        self.scrape_count_total.inc();
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}
