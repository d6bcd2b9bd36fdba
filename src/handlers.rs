use crate::error::{ApiError, ApiResult};
use crate::eta::{self, Coord};
use crate::fare::{refund_points, Zone};
use crate::models::*;
use crate::state::AppState;
use crate::wallet::{self, LedgerError};
use crate::{notify, waitlist};
use axum::extract::{Path, Query, State};
use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;

const TX_RETRY_ATTEMPTS: u32 = 3;
const MAX_TOPUP_POINTS: i64 = 1_000_000;

#[derive(Debug, serde::Serialize)]
pub struct HealthOut {
    pub status: &'static str,
    pub env: String,
    pub service: &'static str,
    pub version: &'static str,
}

pub async fn health(State(state): State<AppState>) -> axum::Json<HealthOut> {
    axum::Json(HealthOut {
        status: "ok",
        env: state.env_name.clone(),
        service: "Shuttle API",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Outcome of one transaction attempt. Retryable covers serialization
/// failures and deadlocks reported by Postgres; everything else is final.
enum OpError {
    Retryable,
    Fatal(ApiError),
}

fn is_retryable(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => {
            matches!(db.code().as_deref(), Some("40001") | Some("40P01"))
        }
        _ => false,
    }
}

fn classify_db_error(e: sqlx::Error, what: &str) -> OpError {
    if is_retryable(&e) {
        tracing::warn!(error = %e, what, "transaction conflict");
        OpError::Retryable
    } else {
        tracing::error!(error = %e, what, "db operation failed");
        OpError::Fatal(ApiError::internal("database error"))
    }
}

fn ledger_error(e: LedgerError) -> OpError {
    match e {
        LedgerError::WalletNotFound => OpError::Fatal(ApiError::not_found("wallet not found")),
        LedgerError::InsufficientFunds => {
            OpError::Fatal(ApiError::bad_request("insufficient points"))
        }
        LedgerError::InvalidAmount => OpError::Fatal(ApiError::internal("invalid ledger amount")),
        LedgerError::Db(e) => classify_db_error(e, "wallet update"),
    }
}

fn for_update_suffix() -> &'static str {
    " FOR UPDATE"
}

fn require_id(raw: &str, field: &str) -> Result<String, ApiError> {
    let v = raw.trim().to_string();
    if v.is_empty() {
        return Err(ApiError::bad_request(format!("{field} required")));
    }
    Ok(v)
}

pub async fn create_rider(
    State(state): State<AppState>,
    axum::Json(body): axum::Json<RiderIn>,
) -> ApiResult<axum::Json<RiderOut>> {
    let name = body.name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::bad_request("name required"));
    }
    if name.len() > 120 {
        return Err(ApiError::bad_request("name too long"));
    }

    let riders = state.table("riders");
    let wallets = state.table("wallets");
    let rider_id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();

    // Rider and zero-balance wallet are created together; a rider without a
    // wallet must not be observable.
    let mut tx = state.pool.begin().await.map_err(|e| {
        tracing::error!(error = %e, "db begin create_rider failed");
        ApiError::internal("database error")
    })?;
    sqlx::query(&format!(
        "INSERT INTO {riders} (id,name,created_at) VALUES ($1,$2,$3)"
    ))
    .bind(&rider_id)
    .bind(&name)
    .bind(&now)
    .execute(&mut *tx)
    .await
    .map_err(|e| {
        tracing::error!(error = %e, "db create_rider insert failed");
        ApiError::internal("database error")
    })?;
    sqlx::query(&format!(
        "INSERT INTO {wallets} (id,rider_id,balance_points) VALUES ($1,$2,$3)"
    ))
    .bind(Uuid::new_v4().to_string())
    .bind(&rider_id)
    .bind(0i64)
    .execute(&mut *tx)
    .await
    .map_err(|e| {
        tracing::error!(error = %e, "db create_rider wallet insert failed");
        ApiError::internal("database error")
    })?;
    tx.commit().await.map_err(|e| {
        tracing::error!(error = %e, "db create_rider commit failed");
        ApiError::internal("database error")
    })?;

    Ok(axum::Json(RiderOut {
        id: rider_id,
        name,
        balance: 0,
    }))
}

pub async fn create_route(
    State(state): State<AppState>,
    axum::Json(body): axum::Json<RouteIn>,
) -> ApiResult<axum::Json<RouteOut>> {
    let name = body.name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::bad_request("name required"));
    }
    if name.len() > 120 {
        return Err(ApiError::bad_request("name too long"));
    }
    let origin = body.origin.trim().to_string();
    let destination = body.destination.trim().to_string();
    if origin.is_empty() || destination.is_empty() {
        return Err(ApiError::bad_request("origin and destination required"));
    }
    let Some(zone) = Zone::parse(&body.zone) else {
        return Err(ApiError::bad_request(
            "zone must be intra_city, suburban or inter_city",
        ));
    };
    if !(1..=200).contains(&body.total_seats) {
        return Err(ApiError::bad_request("total_seats must be 1..=200"));
    }

    let routes = state.table("routes");
    let id = Uuid::new_v4().to_string();
    sqlx::query(&format!(
        "INSERT INTO {routes} (id,name,origin,destination,zone,total_seats,seats_available) VALUES ($1,$2,$3,$4,$5,$6,$7)"
    ))
    .bind(&id)
    .bind(&name)
    .bind(&origin)
    .bind(&destination)
    .bind(zone.as_str())
    .bind(body.total_seats)
    .bind(body.total_seats)
    .execute(&state.pool)
    .await
    .map_err(|e| {
        tracing::error!(error = %e, "db create_route failed");
        ApiError::internal("database error")
    })?;

    Ok(axum::Json(RouteOut {
        id,
        name,
        origin,
        destination,
        zone,
        total_seats: body.total_seats,
        seats_available: body.total_seats,
        fare_points: state.fares.classify(zone),
    }))
}

pub async fn list_routes(State(state): State<AppState>) -> ApiResult<axum::Json<Vec<RouteOut>>> {
    let routes = state.table("routes");
    let sql = format!(
        "SELECT id,name,origin,destination,zone,total_seats,seats_available FROM {routes} ORDER BY name ASC"
    );
    let rows = sqlx::query(&sql).fetch_all(&state.pool).await.map_err(|e| {
        tracing::error!(error = %e, "db list_routes failed");
        ApiError::internal("database error")
    })?;

    let mut out = Vec::with_capacity(rows.len());
    for r in rows {
        let zone_raw: String = r.try_get("zone").unwrap_or_default();
        let Some(zone) = Zone::parse(&zone_raw) else {
            tracing::warn!(zone = %zone_raw, "route with unknown zone tag skipped");
            continue;
        };
        out.push(RouteOut {
            id: r.try_get("id").unwrap_or_default(),
            name: r.try_get("name").unwrap_or_default(),
            origin: r.try_get("origin").unwrap_or_default(),
            destination: r.try_get("destination").unwrap_or_default(),
            zone,
            total_seats: r.try_get("total_seats").unwrap_or(0),
            seats_available: r.try_get("seats_available").unwrap_or(0),
            fare_points: state.fares.classify(zone),
        });
    }
    Ok(axum::Json(out))
}

struct Reserved {
    receipt: ReceiptOut,
    route_name: String,
}

pub async fn reserve(
    State(state): State<AppState>,
    axum::Json(body): axum::Json<ReserveReq>,
) -> ApiResult<axum::Json<ReceiptOut>> {
    let rider_id = require_id(&body.rider_id, "rider_id")?;
    let route_id = require_id(&body.route_id, "route_id")?;

    for attempt in 1..=TX_RETRY_ATTEMPTS {
        match try_reserve(&state, &rider_id, &route_id).await {
            Ok(reserved) => {
                notify::send_best_effort(
                    &state,
                    &rider_id,
                    "Reservation confirmed",
                    &format!(
                        "[{}] reservation confirmed. {} points charged.",
                        reserved.route_name, reserved.receipt.fare_charged
                    ),
                )
                .await;
                return Ok(axum::Json(reserved.receipt));
            }
            Err(OpError::Retryable) => {
                tracing::warn!(attempt, rider_id = %rider_id, "reserve conflict; retrying");
            }
            Err(OpError::Fatal(e)) => return Err(e),
        }
    }
    Err(ApiError::unavailable("temporary contention; try again"))
}

async fn try_reserve(
    state: &AppState,
    rider_id: &str,
    route_id: &str,
) -> Result<Reserved, OpError> {
    let riders = state.table("riders");
    let routes = state.table("routes");
    let bookings = state.table("bookings");
    let wallets = state.table("wallets");

    let mut tx = state
        .pool
        .begin()
        .await
        .map_err(|e| classify_db_error(e, "begin reserve tx"))?;

    let rider_exists = sqlx::query(&format!("SELECT 1 FROM {riders} WHERE id=$1"))
        .bind(rider_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| classify_db_error(e, "reserve rider lookup"))?
        .is_some();
    if !rider_exists {
        return Err(OpError::Fatal(ApiError::not_found("rider not found")));
    }

    // Route row is locked for the capacity check; the wallet row lock below
    // makes the balance check and debit one unit. Both release on commit.
    let route_row = sqlx::query(&format!(
        "SELECT name,zone,seats_available FROM {routes} WHERE id=$1{}",
        for_update_suffix()
    ))
    .bind(route_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(|e| classify_db_error(e, "reserve route lock"))?
    .ok_or_else(|| OpError::Fatal(ApiError::not_found("route not found")))?;

    let seats_available: i32 = route_row.try_get("seats_available").unwrap_or(0);
    if seats_available <= 0 {
        return Err(OpError::Fatal(ApiError::conflict("route full")));
    }
    let route_name: String = route_row.try_get("name").unwrap_or_default();
    let zone_raw: String = route_row.try_get("zone").unwrap_or_default();
    let Some(zone) = Zone::parse(&zone_raw) else {
        tracing::error!(route_id, zone = %zone_raw, "route has invalid zone tag");
        return Err(OpError::Fatal(ApiError::internal("route misconfigured")));
    };
    let fare = state.fares.classify(zone);

    let remaining_balance = wallet::debit(&mut tx, &wallets, rider_id, fare)
        .await
        .map_err(ledger_error)?;

    sqlx::query(&format!(
        "UPDATE {routes} SET seats_available=seats_available-1 WHERE id=$1"
    ))
    .bind(route_id)
    .execute(&mut *tx)
    .await
    .map_err(|e| classify_db_error(e, "reserve seat decrement"))?;

    let booking_id = Uuid::new_v4().to_string();
    sqlx::query(&format!(
        "INSERT INTO {bookings} (id,rider_id,route_id,status,fare_charged,created_at) VALUES ($1,$2,$3,$4,$5,$6)"
    ))
    .bind(&booking_id)
    .bind(rider_id)
    .bind(route_id)
    .bind("reserved")
    .bind(fare)
    .bind(Utc::now().to_rfc3339())
    .execute(&mut *tx)
    .await
    .map_err(|e| classify_db_error(e, "reserve booking insert"))?;

    tx.commit()
        .await
        .map_err(|e| classify_db_error(e, "reserve commit"))?;

    Ok(Reserved {
        receipt: ReceiptOut {
            booking_id,
            fare_charged: fare,
            remaining_balance,
        },
        route_name,
    })
}

struct Cancelled {
    out: CancelOut,
    route_id: String,
    route_name: String,
}

pub async fn cancel(
    Path(booking_id): Path<String>,
    State(state): State<AppState>,
    axum::Json(body): axum::Json<CancelReq>,
) -> ApiResult<axum::Json<CancelOut>> {
    let booking_id = require_id(&booking_id, "booking_id")?;
    let rider_id = require_id(&body.rider_id, "rider_id")?;

    for attempt in 1..=TX_RETRY_ATTEMPTS {
        match try_cancel(&state, &rider_id, &booking_id).await {
            Ok(cancelled) => {
                // Freed capacity is redistributed off the request path; a
                // dispatch failure must never fail the cancellation.
                tokio::spawn(waitlist::on_seats_freed(
                    state.clone(),
                    cancelled.route_id.clone(),
                    1,
                ));
                notify::send_best_effort(
                    &state,
                    &rider_id,
                    "Refund issued",
                    &format!(
                        "[{}] reservation cancelled. {} points refunded.",
                        cancelled.route_name, cancelled.out.refund_points
                    ),
                )
                .await;
                return Ok(axum::Json(cancelled.out));
            }
            Err(OpError::Retryable) => {
                tracing::warn!(attempt, booking_id = %booking_id, "cancel conflict; retrying");
            }
            Err(OpError::Fatal(e)) => return Err(e),
        }
    }
    Err(ApiError::unavailable("temporary contention; try again"))
}

async fn try_cancel(
    state: &AppState,
    rider_id: &str,
    booking_id: &str,
) -> Result<Cancelled, OpError> {
    let bookings = state.table("bookings");
    let routes = state.table("routes");
    let wallets = state.table("wallets");

    let mut tx = state
        .pool
        .begin()
        .await
        .map_err(|e| classify_db_error(e, "begin cancel tx"))?;

    let b = sqlx::query(&format!(
        "SELECT rider_id,route_id,status,fare_charged FROM {bookings} WHERE id=$1{}",
        for_update_suffix()
    ))
    .bind(booking_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(|e| classify_db_error(e, "cancel booking lock"))?
    .ok_or_else(|| OpError::Fatal(ApiError::not_found("booking not found")))?;

    let owner: String = b.try_get("rider_id").unwrap_or_default();
    if owner != rider_id {
        return Err(OpError::Fatal(ApiError::forbidden("not booking owner")));
    }
    let status: String = b.try_get("status").unwrap_or_default();
    if status != "reserved" {
        return Err(OpError::Fatal(ApiError::conflict(
            "booking already cancelled",
        )));
    }
    let route_id: String = b.try_get("route_id").unwrap_or_default();
    let fare_charged: i64 = b.try_get("fare_charged").unwrap_or(0);

    sqlx::query(&format!(
        "UPDATE {bookings} SET status='cancelled' WHERE id=$1"
    ))
    .bind(booking_id)
    .execute(&mut *tx)
    .await
    .map_err(|e| classify_db_error(e, "cancel booking update"))?;

    let refund = refund_points(fare_charged, state.cancel_fee_points);
    let remaining_balance = wallet::credit(&mut tx, &wallets, rider_id, refund)
        .await
        .map_err(ledger_error)?;

    let route_row = sqlx::query(&format!(
        "UPDATE {routes} SET seats_available=LEAST(seats_available+1,total_seats) WHERE id=$1 RETURNING name"
    ))
    .bind(&route_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(|e| classify_db_error(e, "cancel seat release"))?;
    let route_name = route_row
        .and_then(|r| r.try_get::<String, _>("name").ok())
        .unwrap_or_else(|| route_id.clone());

    tx.commit()
        .await
        .map_err(|e| classify_db_error(e, "cancel commit"))?;

    Ok(Cancelled {
        out: CancelOut {
            remaining_balance,
            refund_points: refund,
        },
        route_id,
        route_name,
    })
}

pub async fn waitlist_join(
    State(state): State<AppState>,
    axum::Json(body): axum::Json<WaitlistJoinReq>,
) -> ApiResult<axum::Json<OkOut>> {
    let rider_id = require_id(&body.rider_id, "rider_id")?;
    let route_id = require_id(&body.route_id, "route_id")?;

    let riders = state.table("riders");
    let routes = state.table("routes");
    let rider_exists = sqlx::query(&format!("SELECT 1 FROM {riders} WHERE id=$1"))
        .bind(&rider_id)
        .fetch_optional(&state.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "db waitlist rider lookup failed");
            ApiError::internal("database error")
        })?
        .is_some();
    if !rider_exists {
        return Err(ApiError::not_found("rider not found"));
    }
    let route_exists = sqlx::query(&format!("SELECT 1 FROM {routes} WHERE id=$1"))
        .bind(&route_id)
        .fetch_optional(&state.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "db waitlist route lookup failed");
            ApiError::internal("database error")
        })?
        .is_some();
    if !route_exists {
        return Err(ApiError::not_found("route not found"));
    }

    waitlist::enqueue(&state, &route_id, &rider_id)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "db waitlist enqueue failed");
            ApiError::internal("database error")
        })?;

    Ok(axum::Json(OkOut { ok: true }))
}

pub async fn wallet_balance(
    State(state): State<AppState>,
    Query(params): Query<BalanceParams>,
) -> ApiResult<axum::Json<BalanceOut>> {
    let rider_id = require_id(&params.rider_id, "rider_id")?;
    let wallets = state.table("wallets");
    let row = sqlx::query(&format!(
        "SELECT balance_points FROM {wallets} WHERE rider_id=$1"
    ))
    .bind(&rider_id)
    .fetch_optional(&state.pool)
    .await
    .map_err(|e| {
        tracing::error!(error = %e, "db wallet_balance failed");
        ApiError::internal("database error")
    })?
    .ok_or_else(|| ApiError::not_found("wallet not found"))?;

    Ok(axum::Json(BalanceOut {
        balance: row.try_get("balance_points").unwrap_or(0),
    }))
}

pub async fn wallet_topup(
    State(state): State<AppState>,
    axum::Json(body): axum::Json<TopUpReq>,
) -> ApiResult<axum::Json<BalanceOut>> {
    let rider_id = require_id(&body.rider_id, "rider_id")?;
    if !(1..=MAX_TOPUP_POINTS).contains(&body.amount) {
        return Err(ApiError::bad_request("invalid amount"));
    }

    let wallets = state.table("wallets");
    let mut tx = state.pool.begin().await.map_err(|e| {
        tracing::error!(error = %e, "db begin topup failed");
        ApiError::internal("database error")
    })?;
    let balance = wallet::credit(&mut tx, &wallets, &rider_id, body.amount)
        .await
        .map_err(|e| match e {
            LedgerError::WalletNotFound => ApiError::not_found("wallet not found"),
            LedgerError::InvalidAmount => ApiError::bad_request("invalid amount"),
            LedgerError::InsufficientFunds => ApiError::internal("ledger error"),
            LedgerError::Db(e) => {
                tracing::error!(error = %e, "db topup credit failed");
                ApiError::internal("database error")
            }
        })?;
    tx.commit().await.map_err(|e| {
        tracing::error!(error = %e, "db topup commit failed");
        ApiError::internal("database error")
    })?;

    Ok(axum::Json(BalanceOut { balance }))
}

pub async fn list_messages(
    Path(rider_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<axum::Json<Vec<MessageOut>>> {
    let rider_id = require_id(&rider_id, "rider_id")?;
    let messages = state.table("messages");
    let rows = sqlx::query(&format!(
        "SELECT id,title,body,created_at FROM {messages} WHERE rider_id=$1 ORDER BY created_at DESC LIMIT 100"
    ))
    .bind(&rider_id)
    .fetch_all(&state.pool)
    .await
    .map_err(|e| {
        tracing::error!(error = %e, "db list_messages failed");
        ApiError::internal("database error")
    })?;

    let mut out = Vec::with_capacity(rows.len());
    for r in rows {
        out.push(MessageOut {
            id: r.try_get("id").unwrap_or_default(),
            title: r.try_get("title").unwrap_or_default(),
            body: r.try_get("body").unwrap_or_default(),
            created_at: r.try_get("created_at").unwrap_or(None),
        });
    }
    Ok(axum::Json(out))
}

pub async fn eta_estimate(
    State(state): State<AppState>,
    Query(params): Query<EtaParams>,
) -> ApiResult<axum::Json<crate::eta::EtaEstimate>> {
    let origin = Coord {
        lat: params.origin_lat,
        lng: params.origin_lng,
    };
    let dest = Coord {
        lat: params.dest_lat,
        lng: params.dest_lng,
    };
    if !origin.valid() || !dest.valid() {
        return Err(ApiError::bad_request("invalid coordinates"));
    }
    let est = eta::estimate(&state.http, &state.eta, origin, dest).await;
    Ok(axum::Json(est))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn ledger_errors_map_to_caller_visible_statuses() {
        let e = match ledger_error(LedgerError::InsufficientFunds) {
            OpError::Fatal(e) => e,
            OpError::Retryable => panic!("insufficient funds is not retryable"),
        };
        assert_eq!(e.status, StatusCode::BAD_REQUEST);

        let e = match ledger_error(LedgerError::WalletNotFound) {
            OpError::Fatal(e) => e,
            OpError::Retryable => panic!("missing wallet is not retryable"),
        };
        assert_eq!(e.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn blank_ids_are_rejected_before_any_db_work() {
        assert!(require_id("  ", "rider_id").is_err());
        assert_eq!(require_id(" r1 ", "rider_id").unwrap(), "r1");
    }
}
