use axum::{
    extract::Request,
    http::{header, HeaderValue, Method},
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod services;

pub use config::Config;
pub use services::AppState;

/// CSP middleware adds Content-Security-Policy header to all responses
async fn csp_middleware(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    response.headers_mut().insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static(
            "default-src 'self'; \
             script-src 'self' 'unsafe-inline'; \
             style-src 'self' 'unsafe-inline'; \
             img-src 'self' data: https:; \
             connect-src 'self'",
        ),
    );
    response
}

pub fn create_router(app_state: std::sync::Arc<services::AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_origin(tower_http::cors::Any);

    Router::new()
        // Public endpoints (no auth required)
        .route("/health", get(handlers::health_check))
        // Metrics endpoint with Basic Auth protection
        .route(
            "/metrics",
            get(handlers::metrics_handler)
                .layer(middleware::from_fn(handlers::metrics_auth_middleware)),
        )
        .nest("/api/v1/auth", auth_routes(app_state.clone()))
        .nest(
            "/api/v1/quiz",
            quiz_routes().layer(middleware::from_fn_with_state(
                app_state.clone(),
                middlewares::auth::auth_middleware,
            )),
        )
        .nest(
            "/api/v1/questions",
            question_routes().layer(middleware::from_fn_with_state(
                app_state.clone(),
                middlewares::auth::auth_middleware,
            )),
        )
        .nest(
            "/api/v1/payments",
            payment_routes().layer(middleware::from_fn_with_state(
                app_state.clone(),
                middlewares::auth::auth_middleware,
            )),
        )
        .with_state(app_state)
        .layer(cors)
        .layer(middleware::from_fn(csp_middleware))
        .layer(middleware::from_fn(
            middlewares::metrics::metrics_middleware,
        ))
        .layer(TraceLayer::new_for_http())
}

fn quiz_routes() -> Router<std::sync::Arc<services::AppState>> {
    Router::new()
        // Flag routes are registered before the {mode} wildcard so
        // "flags" never parses as a mode.
        .route("/flags", post(handlers::sessions::flag_question))
        .route(
            "/flags/{question_id}",
            delete(handlers::sessions::unflag_question),
        )
        .route(
            "/{mode}/sessions",
            post(handlers::sessions::generate_session).get(handlers::sessions::get_session),
        )
        .route("/{mode}/answers", post(handlers::sessions::submit_answer))
}

fn question_routes() -> Router<std::sync::Arc<services::AppState>> {
    // Lookups are available to any authenticated user; authoring is
    // admin-gated per route.
    let admin_routes = Router::new()
        .route("/", post(handlers::questions::create_question))
        .route("/bulk", post(handlers::questions::bulk_create_questions))
        .route("/papers", post(handlers::questions::create_paper))
        .route_layer(middleware::from_fn(
            middlewares::auth::admin_guard_middleware,
        ));

    Router::new()
        .route("/topics", get(handlers::questions::list_topics))
        .route("/years", get(handlers::questions::list_years))
        .route("/units", get(handlers::questions::list_units))
        .merge(admin_routes)
}

fn payment_routes() -> Router<std::sync::Arc<services::AppState>> {
    Router::new()
        .route("/orders", post(handlers::payments::create_order))
        .route(
            "/orders/{order_id}",
            get(handlers::payments::get_payment_status),
        )
        .route("/verify", post(handlers::payments::verify_payment))
}

fn auth_routes(
    app_state: std::sync::Arc<services::AppState>,
) -> Router<std::sync::Arc<services::AppState>> {
    let public_routes = Router::new()
        .route("/register", post(handlers::auth::register))
        .route("/verify-otp", post(handlers::auth::verify_otp))
        .route("/login", post(handlers::auth::login))
        .route("/admin/register", post(handlers::auth::admin_register));

    let protected_routes = Router::new()
        .route("/me", get(handlers::auth::get_current_user))
        .route("/profile", axum::routing::patch(handlers::auth::update_profile))
        .route_layer(middleware::from_fn_with_state(
            app_state,
            middlewares::auth::auth_middleware,
        ));

    public_routes.merge(protected_routes)
}
