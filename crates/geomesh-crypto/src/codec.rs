//! Signed report codec
//!
//! The signature of a report covers a canonical JSON string:
//!
//! ```text
//! {"type":T,"location":{"lat":N,"lng":N,"ts":N},"data":D,"timestamp":N}
//! ```
//!
//! Fields appear in exactly that order, without whitespace. `data` keeps the
//! payload's declared field order and drops absent optionals. Numbers are
//! written the way ECMAScript formats them (`1` not `1.0`, exponent form
//! outside `[1e-6, 1e21)`), so peers that sign `JSON.stringify` output
//! produce identical bytes.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use geomesh_core::{
    generate_report_id, GeoError, GeoLocation, GeoResult, ReportData, ReportType,
    SignedGeoReport, Timestamp,
};

use crate::{Identity, PublicIdentity};

/// Version of the canonical payload layout
pub const CANONICAL_VERSION: u32 = 1;

/// Build the canonical signing payload
pub fn canonical_payload<T: Serialize>(
    report_type: ReportType,
    location: &GeoLocation,
    data: &T,
    timestamp: Timestamp,
) -> GeoResult<String> {
    let data = serde_json::to_value(data)
        .map_err(|e| GeoError::MalformedPayload(e.to_string()))?;

    let mut out = String::with_capacity(256);
    out.push_str("{\"type\":");
    write_string(&mut out, report_type.as_str());
    out.push_str(",\"location\":{\"lat\":");
    write_f64(&mut out, location.latitude, "location.lat")?;
    out.push_str(",\"lng\":");
    write_f64(&mut out, location.longitude, "location.lng")?;
    out.push_str(",\"ts\":");
    out.push_str(&location.timestamp.as_millis().to_string());
    out.push_str("},\"data\":");
    write_value(&mut out, &data);
    out.push_str(",\"timestamp\":");
    out.push_str(&timestamp.as_millis().to_string());
    out.push('}');
    Ok(out)
}

/// Format a finite number the way ECMAScript's `Number#toString` does
pub fn js_number(value: f64) -> Option<String> {
    if !value.is_finite() {
        return None;
    }
    if value == 0.0 {
        // Also covers -0
        return Some("0".to_string());
    }
    let abs = value.abs();
    if (1e-6..1e21).contains(&abs) {
        return Some(format!("{}", value));
    }
    let formatted = format!("{:e}", value);
    match formatted.split_once('e') {
        Some((mantissa, exponent)) if !exponent.starts_with('-') => {
            Some(format!("{}e+{}", mantissa, exponent))
        }
        _ => Some(formatted),
    }
}

fn write_f64(out: &mut String, value: f64, field: &str) -> GeoResult<()> {
    let formatted = js_number(value)
        .ok_or_else(|| GeoError::MalformedPayload(format!("non-finite number in {}", field)))?;
    out.push_str(&formatted);
    Ok(())
}

fn write_string(out: &mut String, value: &str) {
    // serde_json escapes exactly the characters JSON requires
    match serde_json::to_string(value) {
        Ok(escaped) => out.push_str(&escaped),
        Err(_) => out.push_str("\"\""),
    }
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                out.push_str(&i.to_string());
            } else if let Some(u) = n.as_u64() {
                out.push_str(&u.to_string());
            } else {
                // serde_json never stores non-finite floats
                let f = n.as_f64().unwrap_or(0.0);
                out.push_str(&js_number(f).unwrap_or_else(|| "null".to_string()));
            }
        }
        Value::String(s) => write_string(out, s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            out.push('{');
            for (i, (key, item)) in map.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(out, key);
                out.push(':');
                write_value(out, item);
            }
            out.push('}');
        }
    }
}

/// Sign a payload with the default TTL for its report kind
pub fn sign<T>(
    data: T,
    location: GeoLocation,
    identity: &Identity,
    now: Timestamp,
) -> GeoResult<SignedGeoReport<T>>
where
    T: ReportData + Serialize,
{
    let ttl = data.report_type().ttl();
    sign_with_ttl(data, location, identity, now, ttl)
}

/// Sign a payload with a report-level TTL override.
///
/// `expiresAt` is not covered by the signature, so the override does not
/// affect verification.
pub fn sign_with_ttl<T>(
    data: T,
    location: GeoLocation,
    identity: &Identity,
    now: Timestamp,
    ttl: Duration,
) -> GeoResult<SignedGeoReport<T>>
where
    T: ReportData + Serialize,
{
    let report_type = data.report_type();
    let payload = canonical_payload(report_type, &location, &data, now)?;
    let signature = identity.sign_base64(payload.as_bytes());

    Ok(SignedGeoReport {
        id: generate_report_id(report_type.id_prefix(), now),
        report_type,
        location,
        timestamp: now,
        expires_at: now + ttl,
        data,
        signature,
        public_key: identity.public_key_base64(),
        version: CANONICAL_VERSION,
    })
}

/// Check a report's signature against its embedded public key.
///
/// Never fails loudly: malformed keys or signatures, a `type` that does not
/// match the payload, or an unknown canonical version all yield `false`.
pub fn verify<T>(report: &SignedGeoReport<T>) -> bool
where
    T: ReportData + Serialize,
{
    if report.version != CANONICAL_VERSION {
        return false;
    }
    if report.data.report_type() != report.report_type {
        return false;
    }
    let Some(public) = PublicIdentity::from_base64(&report.public_key) else {
        return false;
    };
    let Ok(payload) = canonical_payload(
        report.report_type,
        &report.location,
        &report.data,
        report.timestamp,
    ) else {
        return false;
    };
    public.verify_base64(payload.as_bytes(), &report.signature)
}

/// Verify a detached base64 signature over `message` with a base64 key
pub fn verify_detached(public_key: &str, message: &[u8], signature: &str) -> bool {
    PublicIdentity::from_base64(public_key)
        .is_some_and(|public| public.verify_base64(message, signature))
}

/// Decode a report received from the network without checking it
pub fn decode_report<T: DeserializeOwned>(bytes: &[u8]) -> GeoResult<SignedGeoReport<T>> {
    serde_json::from_slice(bytes).map_err(|e| GeoError::MalformedPayload(e.to_string()))
}

/// Decode, verify and check the expiry of an inbound report
pub fn decode_verified<T>(bytes: &[u8], now: Timestamp) -> GeoResult<SignedGeoReport<T>>
where
    T: ReportData + Serialize + DeserializeOwned,
{
    let report: SignedGeoReport<T> = decode_report(bytes)?;
    if !verify(&report) {
        return Err(GeoError::SignatureInvalid);
    }
    if report.is_expired(now) {
        return Err(GeoError::ReportExpired);
    }
    Ok(report)
}

/// Encode a report for the network
pub fn encode_report<T: Serialize>(report: &SignedGeoReport<T>) -> GeoResult<Vec<u8>> {
    serde_json::to_vec(report).map_err(|e| GeoError::MalformedPayload(e.to_string()))
}
