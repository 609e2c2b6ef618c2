use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod auth;
mod config;
mod error;
mod extract;
mod llm;
mod middleware;
mod routes;
mod state;

use middleware::rate_limit;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Covrabl API",
        version = "0.1.0",
        description = "Insurance policy tracking: change detection between extractions, plain-language explanations, coverage scores, premium history, premium payments and renewal reminders."
    ),
    paths(
        routes::health::health_check,
        routes::auth::register,
        routes::policies::create_policy,
        routes::policies::list_policies,
        routes::policies::get_policy,
        routes::policies::delete_policy,
        routes::policies::apply_extraction,
        routes::deltas::list_deltas,
        routes::deltas::list_policy_deltas,
        routes::deltas::acknowledge_delta,
        routes::deltas::acknowledge_all,
        routes::deltas::explain_delta,
        routes::scores::get_scores,
        routes::scores::recalculate_scores,
        routes::premium_history::list_premium_history,
        routes::premium_history::add_premium_entry,
        routes::premium_history::delete_premium_entry,
        routes::payments::list_payments,
        routes::payments::add_payment,
        routes::payments::mark_payment_paid,
        routes::payments::delete_payment,
        routes::reminders::active_reminders,
        routes::reminders::dismiss_reminder,
        routes::reminders::smart_reminders,
    ),
    components(schemas(
        covrabl_core::error::ApiError,
        covrabl_core::policy::TrackedField,
        covrabl_core::policy::PolicySnapshot,
        covrabl_core::deltas::DeltaType,
        covrabl_core::deltas::Severity,
        covrabl_core::deltas::PolicyDelta,
        covrabl_core::explain::Explanation,
        covrabl_core::explain::DeltaExplanation,
        covrabl_core::scores::Category,
        covrabl_core::scores::Criterion,
        covrabl_core::scores::ScoreResult,
        covrabl_core::scores::PortfolioScores,
        covrabl_core::premiums::PremiumSource,
        covrabl_core::premiums::PremiumEntry,
        covrabl_core::premiums::PremiumTrendEntry,
        covrabl_core::premiums::PremiumTrend,
        covrabl_core::premiums::PaymentFrequency,
        covrabl_core::premiums::PremiumPayment,
        covrabl_core::reminders::AlertKind,
        covrabl_core::reminders::AlertSeverity,
        covrabl_core::reminders::SmartAlert,
        routes::health::HealthResponse,
        routes::auth::RegisterRequest,
        routes::auth::RegisterResponse,
        routes::policies::PolicyDetail,
        routes::policies::PolicyResponse,
        routes::policies::CreatePolicyRequest,
        routes::policies::ExtractionRequest,
        routes::policies::ExtractionResponse,
        routes::deltas::DeltaListItem,
        routes::deltas::DeltaListResponse,
        routes::deltas::AcknowledgeAllResponse,
        routes::premium_history::AddPremiumRequest,
        routes::payments::AddPaymentRequest,
        routes::payments::MarkPaidRequest,
        routes::reminders::ActiveReminder,
        routes::reminders::DismissResponse,
    )),
    modifiers(&SecurityAddon)
)]
struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            utoipa::openapi::security::SecurityScheme::Http(
                utoipa::openapi::security::Http::new(
                    utoipa::openapi::security::HttpAuthScheme::Bearer,
                ),
            ),
        );
    }
}

fn app(state: state::AppState, cors_origins: &[String]) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .merge(routes::health::router())
        .merge(routes::auth::register_router().layer(rate_limit::register_layer()))
        .merge(routes::policies::read_router().layer(rate_limit::read_layer()))
        .merge(routes::policies::write_router().layer(rate_limit::write_layer()))
        .merge(routes::deltas::read_router().layer(rate_limit::read_layer()))
        .merge(routes::deltas::write_router().layer(rate_limit::write_layer()))
        .merge(routes::deltas::explain_router().layer(rate_limit::explain_layer()))
        .merge(routes::scores::read_router().layer(rate_limit::read_layer()))
        .merge(routes::scores::write_router().layer(rate_limit::write_layer()))
        .merge(routes::premium_history::read_router().layer(rate_limit::read_layer()))
        .merge(routes::premium_history::write_router().layer(rate_limit::write_layer()))
        .merge(routes::payments::read_router().layer(rate_limit::read_layer()))
        .merge(routes::payments::write_router().layer(rate_limit::write_layer()))
        .merge(routes::reminders::read_router().layer(rate_limit::read_layer()))
        .merge(routes::reminders::write_router().layer(rate_limit::write_layer()))
        .layer(auth::InjectAuthLayer::new(state.db.clone()))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::cors::build_cors_layer(cors_origins)),
        )
        .with_state(state)
}

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "covrabl_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = match config::Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "invalid configuration");
            std::process::exit(1);
        }
    };

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to database");

    sqlx::migrate!("../migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    let llm_provider = config.llm.provider;
    let llm = llm::LlmClient::new(config.llm).expect("Failed to build HTTP client");
    tracing::info!(provider = llm_provider.as_str(), "explanation provider configured");

    let app_state = state::AppState {
        db: pool,
        llm: Arc::new(llm),
        thresholds: Arc::new(config.thresholds),
    };

    let app = app(app_state, &config.cors_origins);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Covrabl API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listener");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Server error");
}
