//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{
        tts::parse_voice, DbAdapter, LocalPhotoStore, OpenAiCompanionAdapter, OpenAiReportAdapter,
        OpenAiSstAdapter, OpenAiTtsAdapter,
    },
    config::Config,
    error::ApiError,
    web::{
        auth::{login_handler, logout_handler, signup_handler},
        photos::{download_photo_handler, upload_photo_handler},
        phrase_cards::{
            create_phrase_card_handler, delete_phrase_card_handler, list_phrase_cards_handler,
            use_phrase_card_handler,
        },
        reports::weekly_report_handler,
        require_auth,
        rest::{
            create_child_handler, create_conversation_session_handler,
            end_conversation_session_handler, list_children_handler,
            list_conversation_sessions_handler, list_turns_handler, ApiDoc,
        },
        state::AppState,
        ws_handler,
    },
};
use async_openai::{config::OpenAIConfig, types::audio::SpeechModel, Client};
use axum::{
    extract::DefaultBodyLimit,
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware as axum_middleware,
    routing::{delete, get, post, put},
    Router,
};
use companion_core::photos::MAX_PHOTO_BYTES;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Config::from_env()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let db_adapter = Arc::new(DbAdapter::new(db_pool));
    info!("Running database migrations...");
    db_adapter.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Initialize Service Adapters ---
    let openai_config = OpenAIConfig::new().with_api_key(
        config
            .openai_api_key
            .as_ref()
            .ok_or_else(|| ApiError::Internal("OPENAI_API_KEY is required".to_string()))?,
    );
    let openai_client = Client::with_config(openai_config);

    let sst_adapter = Arc::new(OpenAiSstAdapter::new(
        openai_client.clone(),
        config.sst_model.clone(),
    ));

    let tts_voice = parse_voice(&config.tts_voice).ok_or_else(|| {
        ApiError::Internal(format!(
            "Invalid TTS voice specified in config: '{}'",
            config.tts_voice
        ))
    })?;
    let tts_adapter = Arc::new(OpenAiTtsAdapter::new(
        openai_client.clone(),
        SpeechModel::Tts1Hd,
        tts_voice,
    ));

    let companion_adapter = Arc::new(OpenAiCompanionAdapter::new(
        openai_client.clone(),
        config.companion_model.clone(),
    ));
    let report_adapter = Arc::new(OpenAiReportAdapter::new(
        openai_client,
        config.report_model.clone(),
    ));

    tokio::fs::create_dir_all(&config.photos_path).await?;
    let photo_store = Arc::new(LocalPhotoStore::new(config.photos_path.clone()));

    // --- 4. Build the Shared AppState ---
    let app_state = Arc::new(AppState {
        db: db_adapter,
        sst_adapter,
        tts_adapter,
        companion_adapter,
        report_adapter,
        photo_store,
    });

    // --- 5. CORS ---
    let origin = config.allowed_origin.parse::<HeaderValue>().map_err(|e| {
        ApiError::Internal(format!(
            "Invalid ALLOWED_ORIGIN '{}': {}",
            config.allowed_origin, e
        ))
    })?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]);

    // --- 6. Create the Web Router ---
    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/auth/signup", post(signup_handler))
        .route("/auth/login", post(login_handler))
        .route("/auth/logout", post(logout_handler));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/children", post(create_child_handler).get(list_children_handler))
        .route(
            "/children/{child_id}/photo",
            put(upload_photo_handler).get(download_photo_handler),
        )
        .route(
            "/children/{child_id}/sessions",
            post(create_conversation_session_handler).get(list_conversation_sessions_handler),
        )
        .route("/children/{child_id}/weekly-report", get(weekly_report_handler))
        .route("/sessions/{session_id}/end", post(end_conversation_session_handler))
        .route("/sessions/{session_id}/turns", get(list_turns_handler))
        .route(
            "/phrase-cards",
            post(create_phrase_card_handler).get(list_phrase_cards_handler),
        )
        .route("/phrase-cards/{card_id}/use", post(use_phrase_card_handler))
        .route("/phrase-cards/{card_id}", delete(delete_phrase_card_handler))
        .route("/ws", get(ws_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ));

    // Combine API routes. Multipart framing needs a little room above the photo cap.
    let api_router = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(MAX_PHOTO_BYTES + 1024 * 1024))
        .layer(cors)
        .with_state(app_state);

    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 7. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
