use crate::state::AppState;
use chrono::Utc;
use uuid::Uuid;

/// Writes one in-app message for a rider. This is the whole outbound
/// notification surface; delivery transport beyond the message store is
/// someone else's problem.
pub async fn send(
    state: &AppState,
    rider_id: &str,
    title: &str,
    body: &str,
) -> Result<(), sqlx::Error> {
    let messages = state.table("messages");
    sqlx::query(&format!(
        "INSERT INTO {messages} (id,rider_id,title,body,created_at) VALUES ($1,$2,$3,$4,$5)"
    ))
    .bind(Uuid::new_v4().to_string())
    .bind(rider_id)
    .bind(title)
    .bind(body)
    .bind(Utc::now().to_rfc3339())
    .execute(&state.pool)
    .await?;
    Ok(())
}

/// Best-effort variant for messages that must never fail the operation that
/// produced them.
pub async fn send_best_effort(state: &AppState, rider_id: &str, title: &str, body: &str) {
    if let Err(e) = send(state, rider_id, title, body).await {
        tracing::warn!(error = %e, rider_id = %rider_id, title = %title, "message delivery failed");
    }
}
