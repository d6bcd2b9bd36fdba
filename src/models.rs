use crate::fare::Zone;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct RiderIn {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct RiderOut {
    pub id: String,
    pub name: String,
    pub balance: i64,
}

#[derive(Debug, Deserialize)]
pub struct RouteIn {
    pub name: String,
    pub origin: String,
    pub destination: String,
    pub zone: String,
    #[serde(default = "default_total_seats")]
    pub total_seats: i32,
}

fn default_total_seats() -> i32 {
    45
}

#[derive(Debug, Serialize, Clone)]
pub struct RouteOut {
    pub id: String,
    pub name: String,
    pub origin: String,
    pub destination: String,
    pub zone: Zone,
    pub total_seats: i32,
    pub seats_available: i32,
    pub fare_points: i64,
}

#[derive(Debug, Deserialize)]
pub struct ReserveReq {
    pub rider_id: String,
    pub route_id: String,
}

#[derive(Debug, Serialize)]
pub struct ReceiptOut {
    pub booking_id: String,
    pub fare_charged: i64,
    pub remaining_balance: i64,
}

#[derive(Debug, Deserialize)]
pub struct CancelReq {
    pub rider_id: String,
}

#[derive(Debug, Serialize)]
pub struct CancelOut {
    pub remaining_balance: i64,
    pub refund_points: i64,
}

#[derive(Debug, Deserialize)]
pub struct WaitlistJoinReq {
    pub rider_id: String,
    pub route_id: String,
}

#[derive(Debug, Serialize)]
pub struct OkOut {
    pub ok: bool,
}

#[derive(Debug, Deserialize)]
pub struct BalanceParams {
    pub rider_id: String,
}

#[derive(Debug, Serialize)]
pub struct BalanceOut {
    pub balance: i64,
}

#[derive(Debug, Deserialize)]
pub struct TopUpReq {
    pub rider_id: String,
    pub amount: i64,
}

#[derive(Debug, Deserialize)]
pub struct EtaParams {
    pub origin_lat: f64,
    pub origin_lng: f64,
    pub dest_lat: f64,
    pub dest_lng: f64,
}

#[derive(Debug, Serialize)]
pub struct MessageOut {
    pub id: String,
    pub title: String,
    pub body: String,
    pub created_at: Option<String>,
}
