use axum::{
    extract::DefaultBodyLimit,
    routing::{get, patch, post},
    Router,
};
use acegrader_backend::{
    config::{get_config, init_config},
    database::pool::create_pool,
    middleware::rate_limit::{rps_middleware, RateLimiter},
    routes, AppState,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    init_config()?;
    let config = get_config();

    let pool = create_pool().await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let app_state = AppState::new(pool);

    {
        let state = app_state.clone();
        tokio::spawn(async move {
            loop {
                match state.grading_queue.run_once(&state.grading_service).await {
                    Ok(true) => {}
                    Ok(false) => {
                        tokio::time::sleep(Duration::from_millis(750)).await;
                    }
                    Err(e) => {
                        tracing::error!(error = ?e, "Grading queue worker error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });
    }

    {
        let state = app_state.clone();
        tokio::spawn(async move {
            loop {
                match state.notification_service.run_once().await {
                    Ok(true) => {}
                    Ok(false) => {
                        tokio::time::sleep(Duration::from_millis(1000)).await;
                    }
                    Err(e) => {
                        tracing::error!(error = ?e, "Email worker error");
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        });
    }

    let base_routes = Router::new().route("/health", get(routes::health::health));

    let teacher_api = Router::new()
        .route(
            "/api/teacher/worksheets",
            get(routes::worksheet::list_worksheets).post(routes::worksheet::create_worksheet),
        )
        .route(
            "/api/teacher/worksheets/:id",
            get(routes::worksheet::get_worksheet)
                .patch(routes::worksheet::update_worksheet)
                .delete(routes::worksheet::delete_worksheet),
        )
        .route(
            "/api/teacher/worksheets/:id/questions",
            post(routes::worksheet::insert_question),
        )
        .route(
            "/api/teacher/worksheets/:id/questions/reorder",
            post(routes::worksheet::reorder_questions),
        )
        .route(
            "/api/teacher/worksheets/:id/questions/:order",
            axum::routing::delete(routes::worksheet::remove_question),
        )
        .route(
            "/api/teacher/worksheets/:id/publish",
            post(routes::worksheet::publish_worksheet),
        )
        .route(
            "/api/teacher/published/:id/answer-sheets",
            get(routes::worksheet::list_answer_sheets),
        )
        .route(
            "/api/teacher/answer-sheets/:id/check",
            post(routes::worksheet::check_answer_sheet),
        )
        .layer(axum::middleware::from_fn_with_state(
            RateLimiter::new(config.teacher_rps),
            rps_middleware,
        ));

    let student_api = Router::new()
        .route(
            "/api/student/worksheets/:code",
            get(routes::student::get_worksheet_by_code),
        )
        .route(
            "/api/student/worksheets/:code/attempts",
            post(routes::student::start_attempt),
        )
        .route(
            "/api/student/answer-sheets/:id",
            get(routes::student::get_answer_sheet),
        )
        .route(
            "/api/student/answer-sheets/:id/answers",
            patch(routes::student::save_answer),
        )
        .route(
            "/api/student/answer-sheets/:id/submit",
            post(routes::student::submit_answer_sheet),
        )
        .layer(axum::middleware::from_fn_with_state(
            RateLimiter::new(config.public_rps),
            rps_middleware,
        ));

    let app = base_routes
        .merge(teacher_api)
        .merge(student_api)
        .with_state(app_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(2 * 1024 * 1024));

    let addr: SocketAddr = config.server_address.parse()?;
    info!("Listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
