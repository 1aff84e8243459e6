//! Uplink payload decoding
//!
//! Payload shapes:
//! - Structured: `mac_1/rssi_1 .. mac_3/rssi_3` from the network server's formatter
//! - Raw: base64 FRMPayload of packed 7-byte records (6 bytes MAC + 1 byte RSSI)
//!
//! Decoding never fails. Anything that could not be used is reported as a
//! `DecodeDiagnostic` next to the observations that were recovered.

use crate::domain::mac::format_mac;
use crate::domain::types::{Observation, Payload};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::{Map, Value};
use smallvec::SmallVec;

/// Size of one raw record: 6 MAC bytes + 1 RSSI byte
pub const RAW_RECORD_LEN: usize = 7;

/// Number of `mac_N/rssi_N` slots in the structured schema
pub const STRUCTURED_SLOTS: usize = 3;

/// RSSI assumed when a structured slot carries a MAC but no usable strength
pub const DEFAULT_RSSI_DBM: f64 = -100.0;

/// Why part (or all) of a payload was not turned into observations
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeDiagnostic {
    /// FRMPayload was not valid base64; nothing decoded
    InvalidBase64(String),
    /// Trailing bytes that do not fill a whole record were discarded
    TrailingBytes(usize),
    /// Structured slots that had fields but no usable MAC
    SlotsDropped(usize),
    /// Structured slots whose RSSI was missing or not numeric
    RssiDefaulted(usize),
    /// Structured payload uses `APn_MAC/APn_RSSI` keys instead of `mac_N/rssi_N`
    LegacySchema,
}

impl DecodeDiagnostic {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecodeDiagnostic::InvalidBase64(_) => "invalid_base64",
            DecodeDiagnostic::TrailingBytes(_) => "trailing_bytes",
            DecodeDiagnostic::SlotsDropped(_) => "slots_dropped",
            DecodeDiagnostic::RssiDefaulted(_) => "rssi_defaulted",
            DecodeDiagnostic::LegacySchema => "legacy_schema",
        }
    }
}

impl std::fmt::Display for DecodeDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeDiagnostic::InvalidBase64(e) => write!(f, "invalid base64: {e}"),
            DecodeDiagnostic::TrailingBytes(n) => write!(f, "{n} trailing bytes discarded"),
            DecodeDiagnostic::SlotsDropped(n) => write!(f, "{n} slots without a MAC dropped"),
            DecodeDiagnostic::RssiDefaulted(n) => {
                write!(f, "{n} slots defaulted to {DEFAULT_RSSI_DBM} dBm")
            }
            DecodeDiagnostic::LegacySchema => {
                write!(f, "APn_MAC/APn_RSSI schema is not supported, expected mac_N/rssi_N")
            }
        }
    }
}

/// Result of decoding one payload
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Decoded {
    /// Observations in payload order
    pub observations: Vec<Observation>,
    pub diagnostics: SmallVec<[DecodeDiagnostic; 2]>,
}

/// Decode a payload into its ordered observations
pub fn decode(payload: &Payload) -> Decoded {
    match payload {
        Payload::Structured(fields) => decode_structured(fields),
        Payload::Raw(encoded) => decode_raw(encoded),
    }
}

/// Decode base64 packed records
pub fn decode_raw(encoded: &str) -> Decoded {
    let mut decoded = Decoded::default();

    let bytes = match STANDARD.decode(encoded.trim()) {
        Ok(bytes) => bytes,
        Err(e) => {
            decoded.diagnostics.push(DecodeDiagnostic::InvalidBase64(e.to_string()));
            return decoded;
        }
    };

    let records = bytes.chunks_exact(RAW_RECORD_LEN);
    let trailing = records.remainder().len();

    decoded.observations = records
        .map(|record| {
            let mut octets = [0u8; 6];
            octets.copy_from_slice(&record[..6]);
            // Reinterpret as two's complement: 0xC4 -> -60
            let rssi = f64::from(record[6] as i8);
            Observation::new(format_mac(&octets), rssi)
        })
        .collect();

    if trailing > 0 {
        decoded.diagnostics.push(DecodeDiagnostic::TrailingBytes(trailing));
    }

    decoded
}

/// Decode the `mac_N/rssi_N` schema
pub fn decode_structured(fields: &Map<String, Value>) -> Decoded {
    let mut decoded = Decoded::default();
    let mut dropped = 0usize;
    let mut defaulted = 0usize;
    let mut saw_slot_key = false;

    for slot in 1..=STRUCTURED_SLOTS {
        let mac_field = fields.get(&format!("mac_{slot}")).filter(|v| !v.is_null());
        let rssi_field = fields.get(&format!("rssi_{slot}")).filter(|v| !v.is_null());
        if mac_field.is_some() || rssi_field.is_some() {
            saw_slot_key = true;
        }

        let Some(mac) = mac_field.and_then(Value::as_str).filter(|m| !m.trim().is_empty()) else {
            if mac_field.is_some() || rssi_field.is_some() {
                dropped += 1;
            }
            continue;
        };

        let rssi = match rssi_field.and_then(rssi_from_value) {
            Some(rssi) => rssi,
            None => {
                defaulted += 1;
                DEFAULT_RSSI_DBM
            }
        };

        decoded.observations.push(Observation::new(mac, rssi));
    }

    if dropped > 0 {
        decoded.diagnostics.push(DecodeDiagnostic::SlotsDropped(dropped));
    }
    if defaulted > 0 {
        decoded.diagnostics.push(DecodeDiagnostic::RssiDefaulted(defaulted));
    }
    if !saw_slot_key && has_legacy_keys(fields) {
        decoded.diagnostics.push(DecodeDiagnostic::LegacySchema);
    }

    decoded
}

/// Accept integers, floats and numeric strings; fractions are kept for weighting
fn rssi_from_value(value: &Value) -> Option<f64> {
    let rssi = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    rssi.filter(|r| r.is_finite())
}

fn has_legacy_keys(fields: &Map<String, Value>) -> bool {
    fields.keys().any(|k| k.starts_with("AP") && k.ends_with("_MAC"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn structured(value: Value) -> Payload {
        match value {
            Value::Object(map) => Payload::Structured(map),
            other => panic!("expected object, got {other}"),
        }
    }

    fn raw(bytes: &[u8]) -> Payload {
        Payload::Raw(STANDARD.encode(bytes))
    }

    #[test]
    fn test_raw_single_record() {
        let bytes = [0xDE, 0x34, 0xAB, 0x01, 0xFF, 0x9C, 0xC4];
        let decoded = decode(&raw(&bytes));

        assert_eq!(decoded.observations, vec![Observation::new("de:34:ab:01:ff:9c", -60)]);
        assert!(decoded.diagnostics.is_empty());
    }

    #[test]
    fn test_raw_rssi_sign_conversion() {
        let mut bytes = Vec::new();
        for rssi_byte in [0x00u8, 0x7F, 0x80, 0xFF] {
            bytes.extend_from_slice(&[1, 2, 3, 4, 5, 6, rssi_byte]);
        }
        let decoded = decode(&raw(&bytes));
        let rssis: Vec<f64> = decoded.observations.iter().map(|o| o.rssi).collect();
        assert_eq!(rssis, vec![0.0, 127.0, -128.0, -1.0]);
    }

    #[test]
    fn test_raw_record_count_is_floor_of_length() {
        for len in 0..=40usize {
            let bytes: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let decoded = decode(&raw(&bytes));
            assert_eq!(decoded.observations.len(), len / RAW_RECORD_LEN, "len={len}");

            let trailing = len % RAW_RECORD_LEN;
            if trailing == 0 {
                assert!(decoded.diagnostics.is_empty(), "len={len}");
            } else {
                assert_eq!(
                    decoded.diagnostics.as_slice(),
                    &[DecodeDiagnostic::TrailingBytes(trailing)]
                );
            }
        }
    }

    #[test]
    fn test_raw_preserves_transmission_order() {
        let bytes = [
            0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0xB0, //
            0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF, 0xA6,
        ];
        let decoded = decode(&raw(&bytes));
        assert_eq!(decoded.observations[0], Observation::new("00:11:22:33:44:55", -80));
        assert_eq!(decoded.observations[1], Observation::new("aa:bb:cc:dd:ee:ff", -90));
    }

    #[test]
    fn test_raw_invalid_base64_degrades_to_empty() {
        let decoded = decode(&Payload::Raw("not*base64!".to_string()));
        assert!(decoded.observations.is_empty());
        assert!(matches!(decoded.diagnostics[0], DecodeDiagnostic::InvalidBase64(_)));
    }

    #[test]
    fn test_structured_full_payload() {
        let payload = structured(json!({
            "mac_1": "AA:BB:CC:DD:EE:01", "rssi_1": -55,
            "mac_2": "aa:bb:cc:dd:ee:02", "rssi_2": -70,
            "mac_3": "aa:bb:cc:dd:ee:03", "rssi_3": -88
        }));
        let decoded = decode(&payload);

        assert_eq!(
            decoded.observations,
            vec![
                Observation::new("AA:BB:CC:DD:EE:01", -55),
                Observation::new("aa:bb:cc:dd:ee:02", -70),
                Observation::new("aa:bb:cc:dd:ee:03", -88),
            ]
        );
        assert!(decoded.diagnostics.is_empty());
    }

    #[test]
    fn test_structured_missing_mac_dropped_and_rssi_defaulted() {
        let payload = structured(json!({
            "mac_1": "aa:bb:cc:dd:ee:01",
            "rssi_2": -70,
            "mac_3": "aa:bb:cc:dd:ee:03", "rssi_3": -61.6
        }));
        let decoded = decode(&payload);

        assert_eq!(
            decoded.observations,
            vec![
                Observation::new("aa:bb:cc:dd:ee:01", DEFAULT_RSSI_DBM),
                Observation::new("aa:bb:cc:dd:ee:03", -61.6),
            ]
        );
        assert!(decoded.diagnostics.contains(&DecodeDiagnostic::SlotsDropped(1)));
        assert!(decoded.diagnostics.contains(&DecodeDiagnostic::RssiDefaulted(1)));
    }

    #[test]
    fn test_structured_null_and_blank_macs_dropped() {
        let payload = structured(json!({
            "mac_1": null, "rssi_1": -40,
            "mac_2": "   ", "rssi_2": -50,
            "mac_3": 42
        }));
        let decoded = decode(&payload);
        assert!(decoded.observations.is_empty());
        assert_eq!(decoded.diagnostics.as_slice(), &[DecodeDiagnostic::SlotsDropped(3)]);
    }

    #[test]
    fn test_structured_numeric_string_rssi() {
        let payload = structured(json!({"mac_1": "aa:bb:cc:dd:ee:01", "rssi_1": " -73 "}));
        let decoded = decode(&payload);
        assert_eq!(decoded.observations[0].rssi, -73.0);
    }

    #[test]
    fn test_structured_fractional_rssi_not_rounded() {
        let payload = structured(json!({"mac_1": "aa:bb:cc:dd:ee:01", "rssi_1": -119.6}));
        let decoded = decode(&payload);
        assert_eq!(decoded.observations[0].rssi, -119.6);
        assert!(decoded.diagnostics.is_empty());
    }

    #[test]
    fn test_structured_non_finite_string_rssi_defaulted() {
        let payload = structured(json!({"mac_1": "aa:bb:cc:dd:ee:01", "rssi_1": "NaN"}));
        let decoded = decode(&payload);
        assert_eq!(decoded.observations[0].rssi, DEFAULT_RSSI_DBM);
        assert_eq!(decoded.diagnostics.as_slice(), &[DecodeDiagnostic::RssiDefaulted(1)]);
    }

    #[test]
    fn test_structured_legacy_schema_flagged() {
        let payload = structured(json!({
            "AP1_MAC": "aa:bb:cc:dd:ee:01", "AP1_RSSI": -60,
            "AP2_MAC": "aa:bb:cc:dd:ee:02", "AP2_RSSI": -65
        }));
        let decoded = decode(&payload);
        assert!(decoded.observations.is_empty());
        assert_eq!(decoded.diagnostics.as_slice(), &[DecodeDiagnostic::LegacySchema]);
    }

    #[test]
    fn test_decode_is_deterministic() {
        let payload = raw(&[1, 2, 3, 4, 5, 6, 0xC4, 9, 9]);
        assert_eq!(decode(&payload), decode(&payload));
    }
}
