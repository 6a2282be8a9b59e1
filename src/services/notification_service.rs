use crate::error::Result;
use crate::models::answer_sheet::AnswerSheet;
use crate::models::email_log::EmailLog;
use reqwest::Client;
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use url::Url;
use uuid::Uuid;

/// DB-backed outbound email queue. Grading enqueues and moves on; the
/// background worker delivers with bounded retries and backoff.
#[derive(Clone)]
pub struct NotificationService {
    pool: PgPool,
    client: Client,
}

impl NotificationService {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            client: Client::new(),
        }
    }

    pub async fn enqueue_email(
        &self,
        recipient: &str,
        subject: &str,
        body_html: &str,
    ) -> Result<EmailLog> {
        let row = sqlx::query_as::<_, EmailLog>(
            r#"
            INSERT INTO email_logs (recipient, subject, body_html, status)
            VALUES ($1, $2, $3, 'pending')
            RETURNING *
            "#,
        )
        .bind(recipient)
        .bind(subject)
        .bind(body_html)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    /// Queues the "worksheet graded" email with a deep link back to the
    /// student's answer sheet.
    pub async fn enqueue_graded_email(
        &self,
        sheet: &AnswerSheet,
        worksheet_title: &str,
        total: Decimal,
        max_marks: i32,
    ) -> Result<EmailLog> {
        let config = crate::config::get_config();
        let link = Url::parse(&config.webapp_url)
            .and_then(|base| base.join(&format!("answer-sheets/{}", sheet.id)))
            .map_err(|e| {
                crate::error::Error::Config(format!("Invalid WEBAPP_URL: {}", e))
            })?;

        let subject = format!("Your worksheet \"{}\" has been graded", worksheet_title);
        let body = format!(
            "<p>Hi {},</p>\
             <p>Your answers for <strong>{}</strong> have been checked. \
             You scored <strong>{} / {}</strong>.</p>\
             <p><a href=\"{}\">View your full results</a></p>",
            sheet.student_name, worksheet_title, total, max_marks, link
        );
        self.enqueue_email(&sheet.student_email, &subject, &body).await
    }

    pub async fn deliver_once(&self, log_id: Uuid) -> Result<()> {
        let log = sqlx::query_as::<_, EmailLog>(r#"SELECT * FROM email_logs WHERE id = $1"#)
            .bind(log_id)
            .fetch_one(&self.pool)
            .await?;

        let config = crate::config::get_config();
        let payload = serde_json::json!({
            "from": config.email_from,
            "to": [log.recipient],
            "subject": log.subject,
            "html": log.body_html,
        });

        let res = self
            .client
            .post(&config.email_api_url)
            .bearer_auth(&config.email_api_key)
            .json(&payload)
            .send()
            .await;
        match res {
            Ok(resp) => {
                let status = resp.status().as_u16() as i32;
                let body = resp.text().await.unwrap_or_default();
                sqlx::query(
                    r#"UPDATE email_logs
                       SET http_status = $1, response_body = $2,
                           status = CASE WHEN $1 BETWEEN 200 AND 299 THEN 'sent' ELSE 'failed' END,
                           attempts = COALESCE(attempts, 0) + 1, updated_at = NOW()
                       WHERE id = $3"#,
                )
                .bind(status)
                .bind(body)
                .bind(log.id)
                .execute(&self.pool)
                .await?;
            }
            Err(err) => {
                sqlx::query(
                    r#"UPDATE email_logs
                       SET response_body = $1, status = 'failed',
                           attempts = COALESCE(attempts, 0) + 1, updated_at = NOW()
                       WHERE id = $2"#,
                )
                .bind(format!("{}", err))
                .bind(log.id)
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(())
    }

    /// Claims and delivers one pending email. Returns false when the queue
    /// is idle so the worker can sleep.
    pub async fn run_once(&self) -> Result<bool> {
        let row_opt = sqlx::query(
            r#"SELECT id FROM email_logs
               WHERE status = 'pending' AND (next_retry_at IS NULL OR next_retry_at <= NOW())
               ORDER BY created_at ASC
               FOR UPDATE SKIP LOCKED
               LIMIT 1"#,
        )
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row_opt else { return Ok(false) };
        let id: Uuid = row.try_get("id")?;

        let _ = self.deliver_once(id).await;

        let row2 =
            sqlx::query(r#"SELECT attempts, max_attempts, status FROM email_logs WHERE id = $1"#)
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        let attempts: i32 = row2.try_get("attempts")?;
        let max_attempts: i32 = row2.try_get::<Option<i32>, _>("max_attempts")?.unwrap_or(3);
        let status: String = row2.try_get("status")?;

        if status == "failed" && attempts < max_attempts {
            sqlx::query(
                r#"UPDATE email_logs
                   SET status = 'pending',
                       next_retry_at = NOW() + make_interval(secs => LEAST(3600, 30 * power(2::float, GREATEST(0, attempts - 1))::int))
                   WHERE id = $1"#,
            )
            .bind(id)
            .execute(&self.pool)
            .await?;
        }

        Ok(true)
    }
}
