use sqlx::postgres::{PgPool, PgPoolOptions};

fn table_name(schema: &Option<String>, name: &str) -> String {
    match schema {
        Some(s) => format!("{s}.{name}"),
        None => name.to_string(),
    }
}

pub async fn connect(db_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(db_url)
        .await
}

pub async fn ensure_schema(pool: &PgPool, db_schema: &Option<String>) -> Result<(), sqlx::Error> {
    if let Some(schema) = db_schema {
        let ddl = format!("CREATE SCHEMA IF NOT EXISTS {schema}");
        let _ = sqlx::query(&ddl).execute(pool).await;
    }

    let riders = table_name(db_schema, "riders");
    let wallets = table_name(db_schema, "wallets");
    let routes = table_name(db_schema, "routes");
    let bookings = table_name(db_schema, "bookings");
    let waitlist = table_name(db_schema, "waitlist");
    let messages = table_name(db_schema, "messages");

    let ddls = [
        format!(
            "CREATE TABLE IF NOT EXISTS {riders} (\
             id VARCHAR(36) PRIMARY KEY,\
             name VARCHAR(120) NOT NULL,\
             created_at TEXT\
             )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {wallets} (\
             id VARCHAR(36) PRIMARY KEY,\
             rider_id VARCHAR(36) NOT NULL UNIQUE,\
             balance_points BIGINT NOT NULL DEFAULT 0\
             )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {routes} (\
             id VARCHAR(36) PRIMARY KEY,\
             name VARCHAR(120) NOT NULL,\
             origin VARCHAR(120) NOT NULL,\
             destination VARCHAR(120) NOT NULL,\
             zone VARCHAR(16) NOT NULL,\
             total_seats INTEGER NOT NULL DEFAULT 45,\
             seats_available INTEGER NOT NULL DEFAULT 45\
             )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {bookings} (\
             id VARCHAR(36) PRIMARY KEY,\
             rider_id VARCHAR(36) NOT NULL,\
             route_id VARCHAR(36) NOT NULL,\
             status VARCHAR(16) NOT NULL DEFAULT 'reserved',\
             fare_charged BIGINT NOT NULL DEFAULT 0,\
             created_at TEXT\
             )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {waitlist} (\
             id VARCHAR(36) PRIMARY KEY,\
             route_id VARCHAR(36) NOT NULL,\
             rider_id VARCHAR(36) NOT NULL,\
             enqueued_at TEXT\
             )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {messages} (\
             id VARCHAR(36) PRIMARY KEY,\
             rider_id VARCHAR(36) NOT NULL,\
             title VARCHAR(200) NOT NULL,\
             body TEXT NOT NULL,\
             created_at TEXT\
             )"
        ),
        format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_waitlist_route_rider ON {waitlist}(route_id, rider_id)"
        ),
        format!("CREATE INDEX IF NOT EXISTS idx_waitlist_route ON {waitlist}(route_id)"),
        format!("CREATE INDEX IF NOT EXISTS idx_bookings_rider ON {bookings}(rider_id)"),
        format!("CREATE INDEX IF NOT EXISTS idx_bookings_route ON {bookings}(route_id)"),
        format!("CREATE INDEX IF NOT EXISTS idx_messages_rider ON {messages}(rider_id)"),
    ];

    for ddl in ddls {
        let _ = sqlx::query(&ddl).execute(pool).await;
    }

    Ok(())
}
