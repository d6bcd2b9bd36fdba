use serde::{Deserialize, Serialize};

/// Fare zone of a route, fixed at data-entry time. Fares are resolved from
/// this tag, never from the route's display name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Zone {
    IntraCity,
    Suburban,
    InterCity,
}

impl Zone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Zone::IntraCity => "intra_city",
            Zone::Suburban => "suburban",
            Zone::InterCity => "inter_city",
        }
    }

    pub fn parse(raw: &str) -> Option<Zone> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "intra_city" => Some(Zone::IntraCity),
            "suburban" => Some(Zone::Suburban),
            "inter_city" => Some(Zone::InterCity),
            _ => None,
        }
    }
}

/// Zone -> point cost table, loaded from env at startup.
#[derive(Debug, Clone)]
pub struct FareTable {
    pub intra_city: i64,
    pub suburban: i64,
    pub inter_city: i64,
}

impl FareTable {
    pub fn classify(&self, zone: Zone) -> i64 {
        match zone {
            Zone::IntraCity => self.intra_city,
            Zone::Suburban => self.suburban,
            Zone::InterCity => self.inter_city,
        }
    }
}

impl Default for FareTable {
    fn default() -> Self {
        Self {
            intra_city: 0,
            suburban: 500,
            inter_city: 3000,
        }
    }
}

/// Refund owed when a booking is cancelled. The cancellation fee is policy,
/// not fixed behavior; a fee larger than the fare never produces a negative
/// refund.
pub fn refund_points(fare_charged: i64, cancel_fee: i64) -> i64 {
    (fare_charged - cancel_fee.max(0)).max(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_is_zone_driven_not_name_driven() {
        let fares = FareTable::default();
        // Any route tagged intra_city rides free, whatever it is called.
        assert_eq!(fares.classify(Zone::IntraCity), 0);
        assert_eq!(fares.classify(Zone::Suburban), 500);
        assert_eq!(fares.classify(Zone::InterCity), 3000);
    }

    #[test]
    fn zone_round_trips_through_strings() {
        for z in [Zone::IntraCity, Zone::Suburban, Zone::InterCity] {
            assert_eq!(Zone::parse(z.as_str()), Some(z));
        }
        assert_eq!(Zone::parse("  INTER_CITY "), Some(Zone::InterCity));
        assert_eq!(Zone::parse("downtown"), None);
        assert_eq!(Zone::parse(""), None);
    }

    #[test]
    fn refund_is_fare_minus_fee_clamped() {
        assert_eq!(refund_points(3000, 0), 3000);
        assert_eq!(refund_points(3000, 500), 2500);
        assert_eq!(refund_points(500, 3000), 0);
        assert_eq!(refund_points(0, 0), 0);
        // Negative fees never inflate the refund.
        assert_eq!(refund_points(3000, -100), 3000);
    }
}
