//! Kiosk/fleet binary — thin CLI shell over the [`kiosk_fleet`] library crate.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use kiosk_fleet::api::{admin, standard};
use kiosk_fleet::audit::AuditLogger;
use kiosk_fleet::auth::BasicAuthProvider;
use kiosk_fleet::config::{ConfigManager, Mode};
use kiosk_fleet::paths::DataPaths;
use kiosk_fleet::pipeline;
use kiosk_fleet::registry::RegistryManager;
use kiosk_fleet::remote_client::InstanceClient;
use kiosk_fleet::state::{AdminState, KioskState};

/// QR-addressed PDF ingestion kiosk agent and fleet control plane.
#[derive(Parser)]
#[command(name = "kiosk-fleet", version, about, long_about = None)]
struct Cli {
    /// Role this process runs as; overrides `system.mode` in the config file.
    #[arg(long, value_enum)]
    mode: Option<CliMode>,

    /// Path to the YAML config file.
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Override the configured listen port.
    #[arg(long)]
    port: Option<u16>,

    /// Listen address.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Instance registry URL; overrides `system.instance_registry_url`.
    #[arg(long)]
    registry: Option<String>,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum CliMode {
    Kiosk,
    Admin,
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("received SIGINT, shutting down"),
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for Ctrl+C");
        info!("received Ctrl+C, shutting down");
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("kiosk_fleet=info".parse().unwrap()))
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let config_manager = match ConfigManager::load(&cli.config) {
        Ok(m) => m,
        Err(e) => {
            error!(error = %e, path = %cli.config.display(), "failed to load config");
            std::process::exit(1);
        }
    };

    let mode = match cli.mode {
        Some(CliMode::Kiosk) => Mode::Kiosk,
        Some(CliMode::Admin) => Mode::Admin,
        None => config_manager.config.mode(),
    };
    let port = cli.port.unwrap_or_else(|| config_manager.config.web_port());

    let app = match mode {
        Mode::Kiosk => build_kiosk_app(config_manager).await,
        Mode::Admin => build_admin_app(config_manager, cli.registry).await,
    };

    let addr = format!("{}:{}", cli.host, port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, addr, "failed to bind listen address");
            std::process::exit(1);
        }
    };
    info!(addr, mode = ?cli.mode.map(|_| "cli").unwrap_or("config"), "kiosk-fleet listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();
}

async fn build_kiosk_app(config_manager: ConfigManager) -> Router {
    let data_root = config_manager.config.raw.paths.data_root.clone();
    let scanner_output = config_manager.config.raw.paths.scanner_output.clone();
    let qr_debug = config_manager.config.raw.qr.failed_images_path.clone();
    let paths = DataPaths::new(data_root.clone(), scanner_output.clone(), qr_debug);
    if let Err(e) = paths.ensure_all() {
        error!(error = %e, "failed to create data directories");
        std::process::exit(1);
    }

    let auth = Arc::new(BasicAuthProvider::new(config_manager.config.admin_password.clone()));
    let audit = Arc::new(AuditLogger::new(paths.logs.join("admin_actions.log")));
    let worker_count = config_manager.config.raw.system.worker_count;
    let watcher_cfg = config_manager.config.raw.watcher.clone();

    let kiosk = Arc::new(KioskState {
        config: RwLock::new(config_manager),
        paths: paths.clone(),
        auth,
        audit,
        recent: Default::default(),
        paused: AtomicBool::new(false),
        last_batch_at: Mutex::new(None),
        merge_in_flight: AtomicBool::new(false),
        started_at: Instant::now(),
        last_arrival: Mutex::new(Instant::now()),
    });

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<PathBuf>();
    let _watch_guard = kiosk_fleet::watch::start_detector(
        paths.inbox.clone(),
        watcher_cfg.mode,
        std::time::Duration::from_secs(watcher_cfg.polling_interval),
        std::time::Duration::from_secs(watcher_cfg.stability_wait),
        watcher_cfg.stability_checks,
        tx,
    );
    std::mem::forget(_watch_guard);

    {
        let kiosk = kiosk.clone();
        tokio::spawn(async move {
            let mut batch = Vec::new();
            loop {
                tokio::select! {
                    Some(path) = rx.recv() => {
                        batch.push(path);
                        while let Ok(path) = rx.try_recv() {
                            batch.push(path);
                        }
                    }
                    _ = tokio::time::sleep(std::time::Duration::from_millis(500)), if !batch.is_empty() => {}
                }
                if !batch.is_empty() {
                    let drained = std::mem::take(&mut batch);
                    let kiosk = kiosk.clone();
                    tokio::task::spawn_blocking(move || pipeline::classify_batch(&kiosk, drained, worker_count));
                }
            }
        });
    }

    {
        let kiosk = kiosk.clone();
        tokio::spawn(async move { pipeline::run_batch_scheduler(kiosk).await });
    }

    Router::new()
        .route("/api/status", get(standard::status))
        .route("/api/command", post(standard::command))
        .route("/api/recent", get(standard::recent))
        .route("/api/admin/password", post(standard::change_password))
        .route("/api/reprocess", post(standard::reprocess))
        .layer(middleware::from_fn_with_state(kiosk.clone(), kiosk_fleet::auth::require_basic_auth::<KioskState>))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(kiosk)
}

async fn build_admin_app(config_manager: ConfigManager, registry_override: Option<String>) -> Router {
    let registry_url = registry_override.or_else(|| config_manager.config.raw.system.instance_registry_url.clone());
    let local_registry_path = config_manager.config.raw.paths.data_root.join("instances.local.json");

    let mut registry = RegistryManager::new(registry_url, local_registry_path.clone());
    if let Err(e) = registry.load().await {
        error!(error = %e, "failed to load instance registry");
    }

    let auth = Arc::new(BasicAuthProvider::new(config_manager.config.admin_password.clone()));
    let admin = Arc::new(AdminState { registry: RwLock::new(registry), client: InstanceClient::new(), local_registry_path, auth });

    Router::new()
        .route("/api/admin/instances", get(admin::list_instances).put(admin::replace_instances))
        .route("/api/admin/instances/health", get(admin::health))
        .route("/api/admin/instances/export", get(admin::export_instances))
        .route("/api/admin/instances/{id}/status", get(admin::instance_status))
        .route("/api/admin/instances/{id}/recent", get(admin::instance_recent))
        .route("/api/admin/instances/{id}/command", post(admin::instance_command))
        .route("/api/admin/test-instance", post(admin::test_instance))
        .layer(middleware::from_fn_with_state(admin.clone(), kiosk_fleet::auth::require_basic_auth::<AdminState>))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(admin)
}
