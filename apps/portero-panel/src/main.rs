mod bot_manager;
mod handlers;
mod services;
mod settings;

use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use clap::{Parser, Subcommand};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bot_manager::BotManager;
use portero_db::repositories::plan_repo::PlanRepository;
use services::billing_service::BillingService;
use services::idempotency::TxCache;
use services::notification_service::NotificationService;
use services::pay_service::{PayService, ProviderKeys};
use services::promo_service::PromoService;
use services::referral_service::ReferralService;
use services::settlement_service::SettlementService;
use services::subscription_service::SubscriptionService;
use settings::SettingsService;

#[derive(Clone)]
pub struct AppState {
    pub pool: sqlx::PgPool,
    pub settings: Arc<SettingsService>,
    pub bot_manager: Arc<BotManager>,
    pub pay_service: Arc<PayService>,
    pub billing_service: Arc<BillingService>,
    pub referral_service: Arc<ReferralService>,
    pub subscription_service: Arc<SubscriptionService>,
    pub plan_repo: Arc<PlanRepository>,
}

#[derive(Parser)]
#[command(name = "portero")]
#[command(about = "Telegram channel membership panel", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the web server and background workers
    Serve,
    /// Override a fee/config value (e.g. platform_fee 0.10)
    SetFee { key: String, value: f64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let _guard = init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve => serve().await,
        Commands::SetFee { key, value } => set_fee(key, value).await,
    }
}

fn init_tracing() -> tracing_appender::non_blocking::WorkerGuard {
    let file_appender = tracing_appender::rolling::daily("logs", "portero.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stdout))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
        .init();

    guard
}

async fn set_fee(key: String, value: f64) -> Result<()> {
    let pool = portero_db::init_db().await?;
    let settings = SettingsService::new(pool).await?;
    settings.set(&key, value, None).await?;
    println!("{} = {}", key, value);
    Ok(())
}

async fn serve() -> Result<()> {
    let pool = portero_db::init_db().await?;
    let settings = Arc::new(SettingsService::new(pool.clone()).await?);
    let bot_manager = Arc::new(BotManager::new(env::var("TELEGRAM_BOT_TOKEN").ok()));
    let notifier = Arc::new(NotificationService::new(pool.clone(), bot_manager.clone()));

    let tx_cache = match env::var("REDIS_URL") {
        Ok(url) => match TxCache::connect(&url).await {
            Ok(cache) => {
                info!("Idempotency cache connected");
                Some(cache)
            }
            Err(e) => {
                warn!("Redis unavailable ({}), relying on DB checks only", e);
                None
            }
        },
        Err(_) => None,
    };

    let settlement = Arc::new(SettlementService::new(
        pool.clone(),
        settings.clone(),
        notifier.clone(),
        tx_cache,
    ));
    let promos = Arc::new(PromoService::new(pool.clone()));

    let keys = ProviderKeys {
        stripe_secret_key: env::var("STRIPE_SECRET_KEY").unwrap_or_default(),
        stripe_webhook_secret: env::var("STRIPE_WEBHOOK_SECRET").unwrap_or_default(),
        wompi_public_key: env::var("WOMPI_PUBLIC_KEY").unwrap_or_default(),
        wompi_events_secret: env::var("WOMPI_EVENTS_SECRET").unwrap_or_default(),
        wompi_api_base: env::var("WOMPI_API_BASE")
            .unwrap_or_else(|_| "https://sandbox.wompi.co/v1".to_string()),
        dashboard_url: env::var("DASHBOARD_URL")
            .unwrap_or_else(|_| "http://localhost:3000".to_string()),
        crypto_wallet_address: env::var("CRYPTO_WALLET_ADDRESS").unwrap_or_default(),
        crypto_network: env::var("CRYPTO_NETWORK").unwrap_or_else(|_| "TRC20 (USDT)".to_string()),
    };
    let pay_service = Arc::new(PayService::new(
        pool.clone(),
        promos.clone(),
        settlement.clone(),
        settings.clone(),
        keys,
    ));

    let billing_service = Arc::new(BillingService::new(pool.clone()));
    let referral_service = Arc::new(ReferralService::new(pool.clone()));
    let subscription_service = Arc::new(SubscriptionService::new(pool.clone()));
    let plan_repo = Arc::new(PlanRepository::new(pool.clone()));

    tokio::spawn(notifier.clone().run_loop(Duration::from_secs(30)));

    let sweeper = subscription_service.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            if let Err(e) = sweeper.deactivate_expired().await {
                warn!("Expiry sweep failed: {}", e);
            }
        }
    });

    let state = AppState {
        pool,
        settings,
        bot_manager,
        pay_service,
        billing_service,
        referral_service,
        subscription_service,
        plan_repo,
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/api/payments/create-link", post(handlers::payments::create_payment_link))
        .route("/webhook/stripe", post(handlers::payments::stripe_webhook))
        .route("/webhook/wompi", post(handlers::payments::wompi_webhook))
        .route("/api/affiliate/leaderboard", get(handlers::affiliate::leaderboard))
        .route("/api/affiliate/{user_id}/network", get(handlers::affiliate::network))
        .route("/api/affiliate/{user_id}/stats", get(handlers::affiliate::stats))
        .route(
            "/api/affiliate/{user_id}/referral-code",
            post(handlers::affiliate::update_referral_code),
        )
        .route("/api/users/{user_id}/subscriptions", get(handlers::owner::subscriptions))
        .route("/api/channels/{channel_id}/plans", get(handlers::owner::channel_plans))
        .route("/api/owner/{user_id}/summary", get(handlers::owner::summary))
        .route("/admin/payments/pending", get(handlers::payments::pending_payments))
        .route("/admin/payments/recent", get(handlers::payments::recent_payments))
        .route(
            "/admin/payments/{payment_id}/verify",
            post(handlers::payments::verify_crypto_payment),
        )
        .route("/admin/ledger", get(handlers::payments::earnings_ledger))
        .route(
            "/admin/payments/{payment_id}/earnings",
            get(handlers::payments::payment_earnings),
        )
        .route("/admin/users/{user_id}/referrer", post(handlers::affiliate::attach_referrer))
        .route(
            "/admin/config",
            get(handlers::config::list_config).post(handlers::config::set_config),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(1024 * 1024));

    let port: u16 = env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("portero-panel listening on port {}", port);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let db_ok = sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(&state.pool)
        .await
        .is_ok();
    Json(json!({
        "status": "ok",
        "db": db_ok,
        "bot": state.bot_manager.is_enabled(),
    }))
}
