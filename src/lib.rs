pub mod config;
pub mod database;
pub mod dto;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;

use crate::services::{
    grading_queue::GradingQueueService, grading_service::GradingService,
    notification_service::NotificationService, oracle_service::OracleService,
    sheet_service::SheetService, worksheet_service::WorksheetService,
};
use reqwest::Client;
use sqlx::PgPool;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub worksheet_service: WorksheetService,
    pub sheet_service: SheetService,
    pub grading_service: GradingService,
    pub grading_queue: GradingQueueService,
    pub notification_service: NotificationService,
}

impl AppState {
    pub fn new(pool: PgPool) -> Self {
        let config = crate::config::get_config();
        let http_client = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .unwrap();

        let oracle = OracleService::new(
            config.openai_api_key.clone(),
            config.openai_model.clone(),
            http_client,
        );
        let worksheet_service = WorksheetService::new(pool.clone());
        let sheet_service = SheetService::new(pool.clone());
        let grading_service = GradingService::new(pool.clone(), oracle);
        let grading_queue = GradingQueueService::new(pool.clone());
        let notification_service = NotificationService::new(pool.clone());

        Self {
            pool,
            worksheet_service,
            sheet_service,
            grading_service,
            grading_queue,
            notification_service,
        }
    }
}
