use dotenv::dotenv;
use review_responder::api;
use review_responder::config::Settings;
use review_responder::responder::Responder;
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(api::index, api::health, api::analyse, api::stats, api::debug_text),
    components(
        schemas(
            api::AnalyseRequest,
            api::AnalyseResponse,
            api::Confidence,
            api::HealthResponse,
            api::IndexResponse,
            api::StatsResponse,
            api::DebugTextRequest,
            api::DebugTextResponse,
            api::ErrorBody,
            review_responder::sentiment::Sentiment,
            review_responder::responder::ReplySource
        )
    ),
    tags(
        (name = "reviews", description = "Review analysis and replies"),
        (name = "debug", description = "Development-only helpers")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt::init();

    let settings = Settings::from_env();
    tracing::info!(
        "🚀 Starting {} v{} ({})",
        settings.api.title,
        settings.api.version,
        settings.deployment.env
    );

    let responder = Responder::from_config(&settings.ai)?;
    let addr = format!("{}:{}", settings.api.host, settings.api.port);
    let state = Arc::new(api::AppState { settings, responder });

    let app = api::router(state)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("📡 Listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
