// File: services/appointments_backend/src/main.rs
use appointments_backend::service_factory::{
    build_calendar, build_notifier, build_state, spawn_background_tasks,
};
use appointments_common::{config_error, internal_error, logging, AppointmentsError};
use appointments_config::load_config;
use appointments_engine::routes::{routes, API_PREFIX};
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    logging::init();
    if let Err(e) = run().await {
        error!("Appointments backend stopped: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppointmentsError> {
    let config = Arc::new(
        load_config().map_err(|e| config_error(e.to_string()))?,
    );

    let calendar = build_calendar(&config).await?;
    let notifier = build_notifier(&config)?;
    let state = build_state(config.clone(), calendar, notifier)?;
    let _background = spawn_background_tasks(state.engine.clone(), &config);

    let api_router = Router::new()
        .route("/", get(|| async { "Welcome to the Appointments API!" }))
        .merge(routes(state));

    #[allow(unused_mut)] // mutated only with the openapi feature
    let mut app = Router::new().nest(API_PREFIX, api_router);

    #[cfg(feature = "openapi")]
    {
        use appointments_engine::doc::BookingApiDoc;
        use utoipa::OpenApi;
        use utoipa_swagger_ui::SwaggerUi;

        #[derive(OpenApi)]
        #[openapi(
            info(
                title = "Appointments API",
                version = "0.1.0",
                description = "Slot listing, booking and reminder endpoints",
                license(name = "MIT", url = "https://opensource.org/licenses/MIT")
            ),
            servers((url = "/api", description = "Main API Prefix")),
        )]
        struct ApiDoc;

        let mut openapi_doc = ApiDoc::openapi();
        openapi_doc.merge(BookingApiDoc::openapi());
        info!("Adding Swagger UI at {}/docs", API_PREFIX);
        let swagger_ui = SwaggerUi::new("/api/docs").url("/api/docs/openapi.json", openapi_doc);
        app = app.merge(swagger_ui);
    }

    let app = app.layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| internal_error(format!("cannot bind {}: {}", addr, e)))?;
    info!("Starting server at http://{}", addr);
    info!("API endpoints available at http://{}{}", addr, API_PREFIX);

    axum::serve(listener, app.into_make_service())
        .await
        .map_err(|e| internal_error(format!("server error: {}", e)))
}
