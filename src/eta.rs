use serde::{Deserialize, Serialize};
use std::time::Duration;

const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Debug, Clone, Copy)]
pub struct Coord {
    pub lat: f64,
    pub lng: f64,
}

impl Coord {
    pub fn valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lng)
    }
}

#[derive(Debug, Clone)]
pub struct EtaConfig {
    /// OSRM-compatible routing endpoint. When unset every estimate is local.
    pub routing_base_url: Option<String>,
    pub routing_timeout: Duration,
    pub speed_kmh: f64,
    pub buffer_min: i64,
}

impl Default for EtaConfig {
    fn default() -> Self {
        Self {
            routing_base_url: None,
            routing_timeout: Duration::from_millis(3000),
            speed_kmh: 35.0,
            buffer_min: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EtaSource {
    Provider,
    Fallback,
}

#[derive(Debug, Clone, Serialize)]
pub struct EtaEstimate {
    pub distance_km: f64,
    pub duration_min: i64,
    pub source: EtaSource,
}

/// Great-circle distance in kilometers.
pub fn haversine_km(a: Coord, b: Coord) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlng = (b.lng - a.lng).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    EARTH_RADIUS_KM * 2.0 * h.sqrt().asin()
}

fn round_one_decimal(km: f64) -> f64 {
    (km * 10.0).round() / 10.0
}

fn minutes_ceil(seconds: f64) -> i64 {
    (seconds / 60.0).ceil() as i64
}

/// Local estimate with no network dependency. Duration assumes a flat average
/// travel speed plus a fixed boarding/stop buffer.
pub fn fallback_estimate(cfg: &EtaConfig, origin: Coord, dest: Coord) -> EtaEstimate {
    let km = haversine_km(origin, dest);
    let travel_min = (km / cfg.speed_kmh * 60.0).ceil() as i64;
    EtaEstimate {
        distance_km: round_one_decimal(km),
        duration_min: travel_min + cfg.buffer_min,
        source: EtaSource::Fallback,
    }
}

#[derive(Debug, Deserialize)]
struct ProviderRoute {
    distance: f64,
    duration: f64,
}

#[derive(Debug, Deserialize)]
struct ProviderResponse {
    #[serde(default)]
    routes: Vec<ProviderRoute>,
}

fn parse_provider_body(body: &str) -> Result<EtaEstimate, String> {
    let parsed: ProviderResponse =
        serde_json::from_str(body).map_err(|e| format!("invalid provider response: {e}"))?;
    let Some(route) = parsed.routes.first() else {
        return Err("provider returned no routes".to_string());
    };
    if !route.distance.is_finite()
        || !route.duration.is_finite()
        || route.distance < 0.0
        || route.duration < 0.0
    {
        return Err("provider returned out-of-range values".to_string());
    }
    Ok(EtaEstimate {
        distance_km: round_one_decimal(route.distance / 1000.0),
        duration_min: minutes_ceil(route.duration),
        source: EtaSource::Provider,
    })
}

async fn provider_estimate(
    http: &reqwest::Client,
    cfg: &EtaConfig,
    base: &str,
    origin: Coord,
    dest: Coord,
) -> Result<EtaEstimate, String> {
    let url = format!(
        "{}/route/v1/driving/{},{};{},{}?overview=false",
        base.trim_end_matches('/'),
        origin.lng,
        origin.lat,
        dest.lng,
        dest.lat
    );
    let resp = http
        .get(url)
        .timeout(cfg.routing_timeout)
        .send()
        .await
        .map_err(|e| format!("provider request failed: {e}"))?;
    let status = resp.status();
    if !status.is_success() {
        return Err(format!("provider returned status {status}"));
    }
    let body = resp
        .text()
        .await
        .map_err(|e| format!("provider body read failed: {e}"))?;
    parse_provider_body(&body)
}

/// Best-effort estimate. The provider path is bounded by the configured
/// timeout; any provider failure degrades to the local fallback and is never
/// surfaced to the caller.
pub async fn estimate(
    http: &reqwest::Client,
    cfg: &EtaConfig,
    origin: Coord,
    dest: Coord,
) -> EtaEstimate {
    if let Some(base) = cfg.routing_base_url.as_deref() {
        match provider_estimate(http, cfg, base, origin, dest).await {
            Ok(est) => return est,
            Err(e) => {
                tracing::warn!(error = %e, "routing provider unavailable; using local fallback");
            }
        }
    }
    fallback_estimate(cfg, origin, dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn daegu_pair() -> (Coord, Coord) {
        (
            Coord {
                lat: 35.91,
                lng: 128.80,
            },
            Coord {
                lat: 35.85,
                lng: 128.56,
            },
        )
    }

    #[test]
    fn haversine_matches_known_distance() {
        let (origin, dest) = daegu_pair();
        let km = haversine_km(origin, dest);
        assert!((km - 22.63).abs() < 0.05, "got {km}");
        // Symmetric and zero on identical points.
        assert!((haversine_km(dest, origin) - km).abs() < 1e-9);
        assert_eq!(haversine_km(origin, origin), 0.0);
    }

    #[test]
    fn fallback_is_deterministic() {
        let cfg = EtaConfig::default();
        let (origin, dest) = daegu_pair();
        let est = fallback_estimate(&cfg, origin, dest);
        assert_eq!(est.source, EtaSource::Fallback);
        assert_eq!(est.distance_km, 22.6);
        // ceil(22.63 / 35 * 60) + 5
        assert_eq!(est.duration_min, 44);
    }

    #[test]
    fn duration_rounds_up_to_next_minute() {
        assert_eq!(minutes_ceil(0.0), 0);
        assert_eq!(minutes_ceil(59.0), 1);
        assert_eq!(minutes_ceil(60.0), 1);
        assert_eq!(minutes_ceil(61.0), 2);
        assert_eq!(minutes_ceil(1805.0), 31);
    }

    #[test]
    fn distance_reports_one_decimal() {
        assert_eq!(round_one_decimal(24.1199), 24.1);
        assert_eq!(round_one_decimal(24.15), 24.2);
        assert_eq!(round_one_decimal(0.0), 0.0);
    }

    #[test]
    fn provider_body_parses_first_route() {
        let body = r#"{"code":"Ok","routes":[{"distance":24120.0,"duration":1805.0},{"distance":99999.0,"duration":9999.0}]}"#;
        let est = parse_provider_body(body).expect("parse");
        assert_eq!(est.source, EtaSource::Provider);
        assert_eq!(est.distance_km, 24.1);
        assert_eq!(est.duration_min, 31);
    }

    #[test]
    fn provider_body_without_routes_is_rejected() {
        assert!(parse_provider_body(r#"{"code":"Ok","routes":[]}"#).is_err());
        assert!(parse_provider_body(r#"{"code":"NoRoute"}"#).is_err());
        assert!(parse_provider_body("not json").is_err());
        assert!(
            parse_provider_body(r#"{"routes":[{"distance":-5.0,"duration":10.0}]}"#).is_err()
        );
    }

    async fn spawn_provider(status_line: &str, body: &str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let status_line = status_line.to_string();
        let body = body.to_string();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accept");
            let mut buf = [0u8; 4096];
            // Drain the request head; a single read is enough for a GET.
            let _ = stream.read(&mut buf).await;
            let resp = format!(
                "{status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = stream.write_all(resp.as_bytes()).await;
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn estimate_prefers_provider_when_it_answers() {
        let base = spawn_provider(
            "HTTP/1.1 200 OK",
            r#"{"code":"Ok","routes":[{"distance":24120.0,"duration":1805.0}]}"#,
        )
        .await;
        let cfg = EtaConfig {
            routing_base_url: Some(base),
            ..EtaConfig::default()
        };
        let http = reqwest::Client::new();
        let (origin, dest) = daegu_pair();
        let est = estimate(&http, &cfg, origin, dest).await;
        assert_eq!(est.source, EtaSource::Provider);
        assert_eq!(est.distance_km, 24.1);
        assert_eq!(est.duration_min, 31);
    }

    #[tokio::test]
    async fn estimate_falls_back_on_provider_error_status() {
        let base = spawn_provider("HTTP/1.1 503 Service Unavailable", "{}").await;
        let cfg = EtaConfig {
            routing_base_url: Some(base),
            ..EtaConfig::default()
        };
        let http = reqwest::Client::new();
        let (origin, dest) = daegu_pair();
        let est = estimate(&http, &cfg, origin, dest).await;
        assert_eq!(est.source, EtaSource::Fallback);
        assert_eq!(est.distance_km, 22.6);
    }

    #[tokio::test]
    async fn estimate_falls_back_on_empty_route_set() {
        let base = spawn_provider("HTTP/1.1 200 OK", r#"{"code":"Ok","routes":[]}"#).await;
        let cfg = EtaConfig {
            routing_base_url: Some(base),
            ..EtaConfig::default()
        };
        let http = reqwest::Client::new();
        let (origin, dest) = daegu_pair();
        let est = estimate(&http, &cfg, origin, dest).await;
        assert_eq!(est.source, EtaSource::Fallback);
    }

    #[tokio::test]
    async fn estimate_falls_back_when_provider_is_unreachable() {
        let cfg = EtaConfig {
            // Nothing listens here; connection is refused immediately.
            routing_base_url: Some("http://127.0.0.1:9".to_string()),
            routing_timeout: Duration::from_millis(500),
            ..EtaConfig::default()
        };
        let http = reqwest::Client::new();
        let (origin, dest) = daegu_pair();
        let est = estimate(&http, &cfg, origin, dest).await;
        assert_eq!(est.source, EtaSource::Fallback);
        assert_eq!(est.duration_min, 44);
    }
}
