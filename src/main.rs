mod checks;
mod config;
mod engine;
mod http;
mod logsink;
mod metrics;
mod plugin;
mod power;
mod provider;
mod sampler;
mod state;
#[cfg(test)]
mod testutil;

use axum::serve;
use checks::uptime::TemporaryUptime;
use checks::CheckError;
use chrono::Utc;
use clap::Parser;
use config::{FileSettingsStore, Settings, SettingsStore};
use engine::StandbyDecisionEngine;
use logsink::{FileLogSink, LogSink, NullLogSink, Verbosity};
use metrics::Metrics;
use plugin::{FilePluginSettingsStore, PluginRegistry};
use power::{LogStandbyController, LogWakeTimer, StandbyController, WakeTimer};
use provider::SysinfoProvider;
use sampler::SharedProvider;
use state::State;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::net::TcpListener;
use tokio::sync::{watch, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "standbyd")]
#[command(version)]
struct Cli {
    #[arg(long, default_value = "./config.yaml")]
    config: String,
    #[arg(long)]
    print_default_config: bool,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Settings::example_yaml());
        return;
    }

    let settings = match Settings::load_from_file(&cli.config) {
        Ok(settings) => settings,
        Err(err) => {
            error!(error = %err, "could not load settings");
            std::process::exit(1);
        }
    };

    info!(
        listen = %settings.listen,
        interval = %humantime::format_duration(Duration::from_secs(settings.monitor_interval_secs)),
        "starting standbyd"
    );

    let now = now_unix();
    let shared_state = Arc::new(RwLock::new(State::new(now)));
    let metrics = match Metrics::new() {
        Ok(metrics) => metrics,
        Err(err) => {
            error!(error = %err, "could not initialize metrics");
            std::process::exit(1);
        }
    };
    let temporary_uptime = TemporaryUptime::new();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let http_task = {
        let listen = settings.listen.clone();
        let metrics = metrics.clone();
        let http_state = shared_state.clone();
        let temporary_uptime = temporary_uptime.clone();
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let app = http::build_router(metrics, http_state, temporary_uptime);
            let addr: SocketAddr = match listen.parse() {
                Ok(addr) => addr,
                Err(err) => {
                    error!(error = %err, listen = %listen, "invalid listen address");
                    return;
                }
            };

            let listener = match TcpListener::bind(addr).await {
                Ok(listener) => listener,
                Err(err) => {
                    error!(error = %err, "could not start the HTTP server");
                    return;
                }
            };

            let server = serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });

            if let Err(err) = server.await {
                error!(error = %err, "HTTP server error");
            }
        })
    };

    let monitor_task = {
        let metrics = metrics.clone();
        let shared_state = shared_state.clone();
        let temporary_uptime = temporary_uptime.clone();
        let mut shutdown = shutdown_rx.clone();
        let settings_store = FileSettingsStore::new(cli.config.clone());
        tokio::spawn(async move {
            let log_sink: Arc<dyn LogSink> = match &settings.log_file {
                Some(path) => Arc::new(FileLogSink::new(path.clone(), settings.log_verbosity)),
                None => Arc::new(NullLogSink),
            };

            let provider: SharedProvider = Arc::new(Mutex::new(SysinfoProvider::new()));
            let checks = engine::standard_checks(
                provider,
                settings.sample_probe_count,
                Duration::from_millis(settings.sample_probe_interval_ms),
                temporary_uptime.clone(),
            );

            // The plugin discovery collaborator contributes registrations
            // here; the daemon itself ships no built-in plugins.
            let registry = PluginRegistry::new(Arc::new(FilePluginSettingsStore::new(
                settings.plugin_settings_dir.clone(),
            )));

            let mut engine = StandbyDecisionEngine::new(checks, registry.into_instances());
            engine.initialize_plugins();

            let mut wake_timer = LogWakeTimer::new();
            let mut controller = LogStandbyController::new();
            let mut current = settings;
            let mut ticker =
                tokio::time::interval(Duration::from_secs(current.monitor_interval_secs));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        info!("shutdown signal received, stopping the monitoring loop");
                        break;
                    }
                    _ = ticker.tick() => {
                        match settings_store.load() {
                            Ok(fresh) => current = fresh,
                            Err(err) => {
                                metrics.inc_settings_reload_error();
                                warn!(error = %err, "could not reload settings, using the previous ones");
                                log_sink.write_error("could not reload settings", &err);
                            }
                        }

                        let started = Instant::now();
                        let mut cancel = shutdown.clone();
                        let decision = match engine.evaluate(&current, &mut cancel).await {
                            Ok(decision) => decision,
                            Err(CheckError::Cancelled) => {
                                info!("monitoring cycle cancelled during shutdown");
                                break;
                            }
                        };

                        let now_utc = Utc::now();
                        let next_wake = power::next_wake_due(&current, now_utc);
                        let wake_result = match next_wake {
                            Some(at) => wake_timer.program(at),
                            None => wake_timer.cancel(),
                        };
                        if let Err(err) = wake_result {
                            warn!(error = %err, "could not update the wake timer");
                        }
                        if let Err(err) = controller
                            .set_standby_suppressed(decision.suspend_standby, &decision.reason)
                        {
                            warn!(error = %err, "could not apply the standby state");
                        }

                        let snapshot = {
                            let mut guard = shared_state.write().await;
                            guard.update_cycle(
                                now_unix(),
                                &decision,
                                next_wake,
                                temporary_uptime.active_until(now_utc),
                            );
                            guard.set_active_plugins(&engine.active_plugins());
                            guard.clone()
                        };
                        metrics.record_cycle(&snapshot, &decision, started.elapsed().as_secs_f64());

                        match &decision.source {
                            Some(source) => log_sink.write_line(
                                &format!("Standby suppressed by {source}: {}", decision.reason),
                                Verbosity::Normal,
                            ),
                            None => log_sink.write_line(
                                "Standby permitted, no policy requested uptime",
                                Verbosity::Verbose,
                            ),
                        }
                    }
                }
            }

            engine.shutdown();
        })
    };

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "could not wait for Ctrl+C");
    }
    info!("Ctrl+C received, shutting down");

    let _ = shutdown_tx.send(true);

    let _ = monitor_task.await;
    let _ = http_task.await;
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
