use crate::eta::EtaConfig;
use crate::fare::FareTable;
use regex::Regex;
use std::env;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Config {
    pub env_name: String,

    pub host: String,
    pub port: u16,
    pub max_body_bytes: usize,

    pub db_url: String,
    pub db_schema: Option<String>,

    pub allowed_origins: Vec<String>,

    pub fares: FareTable,
    pub cancel_fee_points: i64,
    pub eta: EtaConfig,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(v) => {
            let v = v.trim().to_string();
            if v.is_empty() {
                None
            } else {
                Some(v)
            }
        }
        Err(_) => None,
    }
}

fn env_i64(key: &str, default: i64) -> Result<i64, String> {
    env_or(key, &default.to_string())
        .trim()
        .parse()
        .map_err(|_| format!("{key} must be an integer"))
}

fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn normalize_db_url(raw: &str) -> String {
    // Accept SQLAlchemy-style URLs like "postgresql+psycopg://..." by dropping
    // the "+driver" portion.
    if let Some(colon) = raw.find(':') {
        let (scheme, rest) = raw.split_at(colon);
        if let Some(plus) = scheme.find('+') {
            return format!("{}{}", &scheme[..plus], rest);
        }
    }
    raw.to_string()
}

fn validate_postgres_url(url: &str) -> Result<(), String> {
    let scheme = url
        .split_once(':')
        .map(|(s, _)| s.trim().to_lowercase())
        .unwrap_or_default();
    match scheme.as_str() {
        "postgres" | "postgresql" => Ok(()),
        _ => Err("SHUTTLE_DB_URL (or DB_URL) must be a postgres URL".to_string()),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let env_name = env_or("ENV", "dev");
        let env_lower = env_name.trim().to_lowercase();
        let prod_like = matches!(env_lower.as_str(), "prod" | "production" | "staging");

        let host = env_or("APP_HOST", "0.0.0.0");
        let port: u16 = env_or("APP_PORT", "8084")
            .parse()
            .map_err(|_| "APP_PORT must be a valid u16".to_string())?;

        let db_raw = env_opt("SHUTTLE_DB_URL")
            .or_else(|| env_opt("DB_URL"))
            .unwrap_or_else(|| "postgresql://shuttle:shuttle@db:5432/shuttle".to_string());
        let db_url = normalize_db_url(&db_raw);
        validate_postgres_url(&db_url)?;

        let db_schema = env_opt("DB_SCHEMA");
        if let Some(s) = &db_schema {
            let re = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").map_err(|e| e.to_string())?;
            if !re.is_match(s) {
                return Err("DB_SCHEMA must match ^[A-Za-z_][A-Za-z0-9_]*$".to_string());
            }
        }

        let mut allowed_origins = parse_csv(&env_or("ALLOWED_ORIGINS", ""));
        if allowed_origins.is_empty() {
            // Safe local default for development.
            allowed_origins = vec![
                "http://localhost:5173".to_string(),
                "http://127.0.0.1:5173".to_string(),
            ];
        }
        if prod_like && allowed_origins.iter().any(|o| o.trim() == "*") {
            return Err("ALLOWED_ORIGINS must not contain '*' in prod/staging".to_string());
        }
        if prod_like
            && allowed_origins
                .iter()
                .any(|o| !o.trim().starts_with("https://"))
        {
            return Err("ALLOWED_ORIGINS must use https:// origins in prod/staging".to_string());
        }

        let max_body_bytes: usize = env_or("SHUTTLE_MAX_BODY_BYTES", "1048576")
            .parse()
            .map_err(|_| "SHUTTLE_MAX_BODY_BYTES must be an integer".to_string())?;
        let max_body_bytes = max_body_bytes.clamp(16 * 1024, 10 * 1024 * 1024);

        let fares = FareTable {
            intra_city: env_i64("FARE_INTRA_CITY_POINTS", 0)?,
            suburban: env_i64("FARE_SUBURBAN_POINTS", 500)?,
            inter_city: env_i64("FARE_INTER_CITY_POINTS", 3000)?,
        };
        if fares.intra_city < 0 || fares.suburban < 0 || fares.inter_city < 0 {
            return Err("fare tiers must be non-negative".to_string());
        }

        let cancel_fee_points = env_i64("CANCEL_FEE_POINTS", 0)?;
        if cancel_fee_points < 0 {
            return Err("CANCEL_FEE_POINTS must be non-negative".to_string());
        }

        let routing_base_url = env_opt("ROUTING_BASE_URL");
        let routing_timeout_ms = env_i64("ROUTING_TIMEOUT_MS", 3000)?.clamp(250, 10_000) as u64;
        let speed_kmh: f64 = env_or("ETA_SPEED_KMH", "35")
            .trim()
            .parse()
            .map_err(|_| "ETA_SPEED_KMH must be a number".to_string())?;
        if !(speed_kmh > 0.0) {
            return Err("ETA_SPEED_KMH must be positive".to_string());
        }
        let buffer_min = env_i64("ETA_BUFFER_MIN", 5)?;
        if buffer_min < 0 {
            return Err("ETA_BUFFER_MIN must be non-negative".to_string());
        }
        let eta = EtaConfig {
            routing_base_url,
            routing_timeout: Duration::from_millis(routing_timeout_ms),
            speed_kmh,
            buffer_min,
        };

        Ok(Self {
            env_name,
            host,
            port,
            max_body_bytes,
            db_url,
            db_schema,
            allowed_origins,
            fares,
            cancel_fee_points,
            eta,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    const ALL_KEYS: &[&str] = &[
        "ENV",
        "APP_HOST",
        "APP_PORT",
        "SHUTTLE_DB_URL",
        "DB_URL",
        "DB_SCHEMA",
        "ALLOWED_ORIGINS",
        "SHUTTLE_MAX_BODY_BYTES",
        "FARE_INTRA_CITY_POINTS",
        "FARE_SUBURBAN_POINTS",
        "FARE_INTER_CITY_POINTS",
        "CANCEL_FEE_POINTS",
        "ROUTING_BASE_URL",
        "ROUTING_TIMEOUT_MS",
        "ETA_SPEED_KMH",
        "ETA_BUFFER_MIN",
    ];

    struct EnvGuard {
        saved: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            let mut saved = Vec::with_capacity(ALL_KEYS.len());
            for k in ALL_KEYS {
                saved.push((k.to_string(), env::var(k).ok()));
                env::remove_var(k);
            }
            env::set_var("SHUTTLE_DB_URL", "postgresql://u:p@localhost:5432/shuttle");
            Self { saved }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (k, v) in self.saved.drain(..) {
                match v {
                    Some(val) => env::set_var(k, val),
                    None => env::remove_var(k),
                }
            }
        }
    }

    #[test]
    fn rejects_non_postgres_url() {
        let _g = ENV_LOCK.get_or_init(|| Mutex::new(())).lock().unwrap();
        let _env = EnvGuard::new();

        env::set_var("SHUTTLE_DB_URL", "sqlite:////tmp/shuttle.db");
        assert!(Config::from_env().is_err());
    }

    #[test]
    fn tolerates_sqlalchemy_driver_suffix() {
        let _g = ENV_LOCK.get_or_init(|| Mutex::new(())).lock().unwrap();
        let _env = EnvGuard::new();

        env::set_var(
            "SHUTTLE_DB_URL",
            "postgresql+psycopg://u:p@localhost:5432/shuttle",
        );
        let cfg = Config::from_env().expect("config");
        assert_eq!(cfg.db_url, "postgresql://u:p@localhost:5432/shuttle");
    }

    #[test]
    fn prod_rejects_wildcard_origins() {
        let _g = ENV_LOCK.get_or_init(|| Mutex::new(())).lock().unwrap();
        let _env = EnvGuard::new();

        env::set_var("ENV", "prod");
        env::set_var("ALLOWED_ORIGINS", "*");
        let err = Config::from_env().expect_err("wildcard origins must be rejected in prod");
        assert!(err.contains("ALLOWED_ORIGINS"));
    }

    #[test]
    fn prod_rejects_non_https_origins() {
        let _g = ENV_LOCK.get_or_init(|| Mutex::new(())).lock().unwrap();
        let _env = EnvGuard::new();

        env::set_var("ENV", "prod");
        env::set_var("ALLOWED_ORIGINS", "http://shuttle.example.com");
        let err = Config::from_env().expect_err("non-https origins must be rejected in prod");
        assert!(err.contains("https://"));
    }

    #[test]
    fn body_limit_is_clamped_to_safe_bounds() {
        let _g = ENV_LOCK.get_or_init(|| Mutex::new(())).lock().unwrap();
        let _env = EnvGuard::new();

        env::set_var("SHUTTLE_MAX_BODY_BYTES", "1");
        let cfg = Config::from_env().expect("config");
        assert_eq!(cfg.max_body_bytes, 16 * 1024);

        env::set_var("SHUTTLE_MAX_BODY_BYTES", "999999999");
        let cfg = Config::from_env().expect("config");
        assert_eq!(cfg.max_body_bytes, 10 * 1024 * 1024);
    }

    #[test]
    fn fare_tiers_default_to_observed_values() {
        let _g = ENV_LOCK.get_or_init(|| Mutex::new(())).lock().unwrap();
        let _env = EnvGuard::new();

        let cfg = Config::from_env().expect("config");
        assert_eq!(cfg.fares.intra_city, 0);
        assert_eq!(cfg.fares.suburban, 500);
        assert_eq!(cfg.fares.inter_city, 3000);
        assert_eq!(cfg.cancel_fee_points, 0);
    }

    #[test]
    fn rejects_negative_cancel_fee() {
        let _g = ENV_LOCK.get_or_init(|| Mutex::new(())).lock().unwrap();
        let _env = EnvGuard::new();

        env::set_var("CANCEL_FEE_POINTS", "-100");
        let err = Config::from_env().expect_err("negative fee must be rejected");
        assert!(err.contains("CANCEL_FEE_POINTS"));
    }

    #[test]
    fn routing_timeout_is_clamped() {
        let _g = ENV_LOCK.get_or_init(|| Mutex::new(())).lock().unwrap();
        let _env = EnvGuard::new();

        env::set_var("ROUTING_TIMEOUT_MS", "5");
        let cfg = Config::from_env().expect("config");
        assert_eq!(cfg.eta.routing_timeout, Duration::from_millis(250));

        env::set_var("ROUTING_TIMEOUT_MS", "600000");
        let cfg = Config::from_env().expect("config");
        assert_eq!(cfg.eta.routing_timeout, Duration::from_millis(10_000));
    }
}
