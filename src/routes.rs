use crate::handlers::{self, AppState};
use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};

/// Builds the application router.
///
/// Internal routes live under `/api/v1`. The public landing-page routes are
/// additionally rate limited per client IP; the health checks bypass every
/// limit.
///
/// # Arguments
///
/// * `state` - Shared application state.
///
/// # Returns
///
/// * `anyhow::Result<Router>` - The router, or an error when the rate limiter
///   settings are rejected.
pub fn router(state: Arc<AppState>) -> anyhow::Result<Router> {
    let config = &state.config;

    // Rate limiting for public routes (per client IP)
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(config.public_rate_per_second)
            .burst_size(config.public_rate_burst)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("invalid public rate limit configuration"))?,
    );

    let public_routes = Router::new()
        .route("/public/leads", post(handlers::submit_lead_form))
        .route("/public/campaigns/:id", get(handlers::public_campaign))
        .layer(GovernorLayer {
            config: governor_conf,
        });

    let api_routes = Router::new()
        // Leads
        .route("/leads", get(handlers::list_leads).post(handlers::create_lead))
        .route("/leads/import", post(handlers::import_leads))
        .route("/leads/:id", get(handlers::get_lead).put(handlers::update_lead))
        .route("/leads/:id/convert", post(handlers::convert_lead))
        // Tasks
        .route("/tasks", get(handlers::list_tasks).post(handlers::create_task))
        .route("/tasks/my", get(handlers::list_my_tasks))
        .route(
            "/tasks/:id",
            get(handlers::get_task)
                .put(handlers::update_task)
                .delete(handlers::delete_task),
        )
        .route("/tasks/:id/complete", post(handlers::complete_task))
        .route("/tasks/:id/follow-ups", get(handlers::list_follow_ups))
        // Opportunities
        .route(
            "/opportunities",
            get(handlers::list_opportunities).post(handlers::create_opportunity),
        )
        .route("/opportunities/stats", get(handlers::pipeline_stats))
        .route(
            "/opportunities/:id",
            get(handlers::get_opportunity)
                .put(handlers::update_opportunity)
                .delete(handlers::delete_opportunity),
        )
        .route("/opportunities/:id/close", post(handlers::close_opportunity))
        // Contacts and their timeline
        .route(
            "/contacts",
            get(handlers::list_contacts).post(handlers::create_contact),
        )
        .route("/contacts/search", get(handlers::search_contacts))
        .route(
            "/contacts/:id",
            get(handlers::get_contact)
                .put(handlers::update_contact)
                .delete(handlers::delete_contact),
        )
        .route("/contacts/:id/history", get(handlers::contact_history))
        .route("/contacts/:id/notes", post(handlers::add_note))
        .route("/contacts/:id/calls", post(handlers::add_call))
        .route(
            "/contacts/history/:id",
            put(handlers::update_history_entry).delete(handlers::delete_history_entry),
        )
        // Companies
        .route(
            "/companies",
            get(handlers::list_companies).post(handlers::create_company),
        )
        .route(
            "/companies/:id",
            get(handlers::get_company)
                .put(handlers::update_company)
                .delete(handlers::delete_company),
        )
        // Campaigns
        .route(
            "/campaigns",
            get(handlers::list_campaigns).post(handlers::create_campaign),
        )
        .route(
            "/campaigns/:id",
            get(handlers::get_campaign).put(handlers::update_campaign),
        )
        // Email templates
        .route(
            "/email-templates",
            get(handlers::list_templates).post(handlers::create_template),
        )
        .route("/email-templates/preview", post(handlers::preview_email))
        .route("/email-templates/send", post(handlers::send_email))
        .route(
            "/email-templates/:id",
            get(handlers::get_template).put(handlers::update_template),
        )
        // Settings and lookups
        .route(
            "/settings",
            get(handlers::list_settings).post(handlers::create_setting),
        )
        .route("/settings/lookups", post(handlers::create_lookup))
        .route(
            "/settings/lookups/categories",
            get(handlers::lookup_categories),
        )
        .route(
            "/settings/lookups/id/:id",
            put(handlers::update_lookup).delete(handlers::delete_lookup),
        )
        .route("/settings/lookups/:category", get(handlers::list_lookups))
        .route(
            "/settings/lookups/:category/reorder",
            post(handlers::reorder_lookups),
        )
        .route(
            "/settings/:key",
            get(handlers::get_setting)
                .put(handlers::update_setting)
                .delete(handlers::delete_setting),
        )
        .merge(public_routes)
        .layer(
            ServiceBuilder::new()
                // Uploads are bounded by the configured limit, not axum's default
                .layer(DefaultBodyLimit::disable())
                .layer(RequestBodyLimitLayer::new(config.max_upload_bytes)),
        );

    let app = Router::new()
        .route("/health", get(handlers::health))
        .route("/health/db", get(handlers::health_db))
        .nest("/api/v1", api_routes)
        .with_state(state.clone())
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config.cors_origins));

    Ok(app)
}

/// Permissive CORS without configured origins, otherwise an allow list.
fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods(Any)
        .allow_headers(Any)
}
