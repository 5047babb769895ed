use std::sync::Arc;

use anyhow::Context;

use order_assist::api::{AppState, api_routes};
use order_assist::backend::{
    BackendRegistry, DryRunBackend, SelfFulfillmentBackend, StorePlatformConfig, ThreePlBackend,
    ThreePlConfig, WarehouseEmailBackend,
};
use order_assist::config::EngineConfig;
use order_assist::intake::{ExtractorConfig, HttpIntentExtractor, IntakeProcessor, IntakeRules};
use order_assist::notify::{NotificationDispatcher, SmtpConfig, SmtpDispatcher};
use order_assist::order::{FulfillmentMethod, OrderDirectory};
use order_assist::store::{LibSqlStore, WorkflowStore};
use order_assist::workflow::engine::{AutoApprove, EngineDeps, WorkflowEngine};
use order_assist::workflow::spawn_escalation_task;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Initialize tracing, with optional file output
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _file_guard = match std::env::var("ORDER_ASSIST_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "order-assist.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false)
                .init();
            Some(guard)
        }
        Err(_) => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
            None
        }
    };

    let config = EngineConfig::from_env().context("invalid configuration")?;

    let port: u16 = std::env::var("ORDER_ASSIST_PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse()
        .unwrap_or(8080);

    eprintln!("📦 Order Assist v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   API: http://0.0.0.0:{port}");
    eprintln!(
        "   Reply timeout: {}s, sweep every {}s",
        config.escalation.reply_timeout.as_secs(),
        config.escalation.sweep_interval.as_secs()
    );

    // ── Database ─────────────────────────────────────────────────────────
    let db_path = std::env::var("ORDER_ASSIST_DB_PATH")
        .unwrap_or_else(|_| "./data/order-assist.db".to_string());
    let store: Arc<dyn WorkflowStore> = Arc::new(
        LibSqlStore::new_local(std::path::Path::new(&db_path))
            .await
            .with_context(|| format!("failed to open database at {db_path}"))?,
    );
    eprintln!("   Database: {db_path}");

    // ── Notifications ────────────────────────────────────────────────────
    let smtp_config = SmtpConfig::from_env().unwrap_or_else(|| {
        eprintln!("Error: ORDER_ASSIST_SMTP_HOST not set");
        eprintln!("  The engine cannot run without outbound email.");
        std::process::exit(1);
    });
    eprintln!("   SMTP: {}:{}", smtp_config.host, smtp_config.port);
    let dispatcher: Arc<dyn NotificationDispatcher> = Arc::new(SmtpDispatcher::new(smtp_config));

    // ── Store platform (order directory + self-fulfillment backend) ─────
    let platform_config = StorePlatformConfig::from_env().unwrap_or_else(|| {
        eprintln!("Error: ORDER_ASSIST_STORE_BASE_URL not set");
        eprintln!("  The store platform is the system of record for orders.");
        std::process::exit(1);
    });
    eprintln!("   Store platform: {}", platform_config.base_url);
    let self_fulfillment = Arc::new(SelfFulfillmentBackend::new(platform_config));
    let orders: Arc<dyn OrderDirectory> = self_fulfillment.clone();

    // ── Backends ─────────────────────────────────────────────────────────
    let mut backends = BackendRegistry::new().register(self_fulfillment);
    let mut active_backends = vec!["self_fulfillment"];

    if let Some(three_pl_config) = ThreePlConfig::from_env() {
        backends = backends.register(Arc::new(ThreePlBackend::new(
            three_pl_config,
            config.eligibility.clone(),
        )));
        active_backends.push("third_party_logistics_api");
    }

    if let Ok(warehouse_address) = std::env::var("ORDER_ASSIST_WAREHOUSE_EMAIL") {
        backends = backends.register(Arc::new(WarehouseEmailBackend::new(
            Arc::clone(&dispatcher),
            warehouse_address,
            config.eligibility.clone(),
        )));
        active_backends.push("warehouse_email");
    }
    eprintln!("   Backends: {}", active_backends.join(", "));

    let operator_address = std::env::var("ORDER_ASSIST_OPERATOR_EMAIL").ok();
    match operator_address {
        Some(ref addr) => eprintln!("   Operator alerts: {addr}"),
        None => eprintln!("   Operator alerts: disabled"),
    }

    // ── Engine ───────────────────────────────────────────────────────────
    let engine = Arc::new(WorkflowEngine::new(
        EngineDeps {
            store: Arc::clone(&store),
            backends,
            dispatcher: Arc::clone(&dispatcher),
            gate: Arc::new(AutoApprove),
            operator_address: operator_address.clone(),
        },
        config.clone(),
    ));

    // Dry-run twin for the operator test trigger: same store and
    // notifications, no real backend mutations.
    let dry_run_backends = BackendRegistry::new()
        .register(Arc::new(DryRunBackend::new(FulfillmentMethod::SelfFulfillment)))
        .register(Arc::new(DryRunBackend::new(
            FulfillmentMethod::ThirdPartyLogisticsApi,
        )))
        .register(Arc::new(DryRunBackend::new(FulfillmentMethod::WarehouseEmail)));
    let test_engine = Arc::new(WorkflowEngine::new(
        EngineDeps {
            store: Arc::clone(&store),
            backends: dry_run_backends,
            dispatcher: Arc::clone(&dispatcher),
            gate: Arc::new(AutoApprove),
            operator_address,
        },
        config.clone(),
    ));

    // ── Startup recovery ─────────────────────────────────────────────────
    match engine.recover().await {
        Ok(0) => {}
        Ok(count) => eprintln!("   Recovered {count} in-flight workflows"),
        Err(e) => tracing::error!(error = %e, "Startup recovery failed"),
    }

    // ── Escalation sweep ─────────────────────────────────────────────────
    let _escalation_handle = spawn_escalation_task(Arc::clone(&engine));

    // ── Intake ───────────────────────────────────────────────────────────
    let extractor_config = ExtractorConfig::from_env().unwrap_or_else(|| {
        eprintln!("Error: ORDER_ASSIST_EXTRACTOR_URL not set");
        eprintln!("  Intent extraction is required to classify inbound email.");
        std::process::exit(1);
    });
    eprintln!("   Extractor: {}", extractor_config.base_url);
    let extractor: Arc<dyn order_assist::intake::IntentExtractor> =
        Arc::new(HttpIntentExtractor::new(extractor_config));

    let intake = Arc::new(IntakeProcessor::new(
        IntakeRules::default_rules(),
        Arc::clone(&extractor),
        orders,
        Arc::clone(&engine),
    ));

    // ── HTTP server ──────────────────────────────────────────────────────
    let app = api_routes(AppState {
        intake,
        engine,
        test_engine,
        extractor,
        store,
    });

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .with_context(|| format!("failed to bind port {port}"))?;
    tracing::info!(port, "Order Assist listening");
    axum::serve(listener, app).await?;

    Ok(())
}
