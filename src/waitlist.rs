use crate::notify;
use crate::state::AppState;
use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;

fn enqueue_sql(waitlist: &str) -> String {
    format!(
        "INSERT INTO {waitlist} (id,route_id,rider_id,enqueued_at) VALUES ($1,$2,$3,$4) \
         ON CONFLICT (route_id,rider_id) DO NOTHING"
    )
}

/// Adds a rider to the tail of a route's waitlist. Joining twice is a no-op;
/// the unique (route_id, rider_id) index keeps the queue duplicate-free.
pub async fn enqueue(state: &AppState, route_id: &str, rider_id: &str) -> Result<(), sqlx::Error> {
    let waitlist = state.table("waitlist");
    sqlx::query(&enqueue_sql(&waitlist))
        .bind(Uuid::new_v4().to_string())
        .bind(route_id)
        .bind(rider_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&state.pool)
        .await?;
    Ok(())
}

fn pop_head_sql(waitlist: &str) -> String {
    // SKIP LOCKED: a plain FOR UPDATE here would let a concurrent drain
    // select the same head row, block, and come up empty after the first
    // drain deletes it (the LIMIT is already spent), losing a pop. Skipping
    // locked rows makes each drain take the next free head entry instead.
    format!(
        "DELETE FROM {waitlist} WHERE id IN (\
         SELECT id FROM {waitlist} WHERE route_id=$1 ORDER BY enqueued_at ASC, id ASC LIMIT $2 FOR UPDATE SKIP LOCKED\
         ) RETURNING rider_id"
    )
}

/// Pops up to `limit` entries from the head of the route's queue, oldest
/// first. The DELETE and the ordered selection run as one statement, and
/// concurrent drains for the same route take distinct head entries, so each
/// entry is handed out at most once and none is silently dropped.
async fn pop_head(
    state: &AppState,
    route_id: &str,
    limit: i64,
) -> Result<Vec<String>, sqlx::Error> {
    let waitlist = state.table("waitlist");
    let rows = sqlx::query(&pop_head_sql(&waitlist))
        .bind(route_id)
        .bind(limit)
        .fetch_all(&state.pool)
        .await?;
    Ok(rows
        .iter()
        .map(|r| r.try_get("rider_id").unwrap_or_default())
        .collect())
}

/// How many waiters a drain may notify: one per freed seat, nothing for a
/// zero or negative count.
fn drain_limit(seats_freed: i64) -> Option<i64> {
    (seats_freed > 0).then_some(seats_freed)
}

pub fn seat_freed_title() -> &'static str {
    "Seat available"
}

pub fn seat_freed_body(route_name: &str) -> String {
    format!("A seat opened up on [{route_name}]. Reserve now if you still want it.")
}

/// Invoked after a cancellation commits. Notifies as many waiting riders as
/// seats actually freed, popping from the head and leaving the rest queued.
///
/// Runs detached from the cancellation request: every failure is logged and
/// swallowed. A rider whose notification fails has already left the queue
/// (at-most-once delivery per drain).
pub async fn on_seats_freed(state: AppState, route_id: String, seats_freed: i64) {
    let Some(limit) = drain_limit(seats_freed) else {
        return;
    };

    let riders = match pop_head(&state, &route_id, limit).await {
        Ok(v) => v,
        Err(e) => {
            tracing::error!(error = %e, route_id = %route_id, "waitlist drain failed");
            return;
        }
    };
    if riders.is_empty() {
        return;
    }

    let routes = state.table("routes");
    let route_name = sqlx::query(&format!("SELECT name FROM {routes} WHERE id=$1"))
        .bind(&route_id)
        .fetch_optional(&state.pool)
        .await
        .ok()
        .flatten()
        .and_then(|r| r.try_get::<String, _>("name").ok())
        .unwrap_or_else(|| route_id.clone());

    let body = seat_freed_body(&route_name);
    for rider_id in riders {
        if let Err(e) = notify::send(&state, &rider_id, seat_freed_title(), &body).await {
            tracing::warn!(
                error = %e,
                rider_id = %rider_id,
                route_id = %route_id,
                "waitlist notification failed; entry stays dequeued"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seat_freed_message_names_the_route() {
        let body = seat_freed_body("Hayang Station Express");
        assert!(body.contains("[Hayang Station Express]"));
        assert_eq!(seat_freed_title(), "Seat available");
    }

    #[test]
    fn drain_notifies_one_waiter_per_freed_seat() {
        assert_eq!(drain_limit(1), Some(1));
        assert_eq!(drain_limit(3), Some(3));
        assert_eq!(drain_limit(0), None);
        assert_eq!(drain_limit(-2), None);
    }

    #[test]
    fn pop_takes_distinct_head_entries_across_concurrent_drains() {
        let sql = pop_head_sql("shuttle.waitlist");
        // Oldest entry first with a stable tie-break, never more rows than
        // the drain's limit, and locked head rows are stepped past so two
        // simultaneous drains pop different waiters instead of one of them
        // re-selecting a just-deleted row and coming up short.
        assert!(sql.starts_with("DELETE FROM shuttle.waitlist"));
        assert!(sql.contains("ORDER BY enqueued_at ASC, id ASC"));
        assert!(sql.contains("LIMIT $2 FOR UPDATE SKIP LOCKED"));
        assert!(sql.ends_with("RETURNING rider_id"));
    }

    #[test]
    fn joining_twice_leaves_a_single_queue_entry() {
        let sql = enqueue_sql("shuttle.waitlist");
        assert!(sql.contains("ON CONFLICT (route_id,rider_id) DO NOTHING"));
    }
}
