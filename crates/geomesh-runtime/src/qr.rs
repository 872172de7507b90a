//! Proof-of-presence reviews
//!
//! A business signs a short-lived QR code; a visitor who scans it on site
//! turns it into a review signed with their own key, with the business
//! proof embedded. Each QR code backs one review only.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use geomesh_core::{
    random_base36, BusinessQrData, Clock, GeoError, GeoLocation, GeoResult, QrStamp, ReviewData,
    SignedGeoReport,
};
use geomesh_crypto::codec::{decode_verified, encode_report, sign, verify_detached};
use geomesh_crypto::{Identity, ReplayGuard};
use geomesh_spatial::distance_meters;
use geomesh_transport::{BestEffort, P2pTransport, REVIEW_TOPIC};

use crate::config::{QrCodeConfig, QrConfig};

const NONCE_LEN: usize = 16;

struct RegisteredBusiness {
    name: String,
    location: GeoLocation,
    identity: Identity,
}

/// Issues and redeems business QR codes
pub struct QrProofService {
    businesses: HashMap<String, RegisteredBusiness>,
    replay: ReplayGuard,
    /// Accepted reviews by business id
    reviews: HashMap<String, Vec<SignedGeoReport<ReviewData>>>,
    p2p: Arc<dyn P2pTransport>,
    clock: Arc<dyn Clock>,
    config: QrConfig,
}

impl QrProofService {
    pub fn new(p2p: Arc<dyn P2pTransport>, clock: Arc<dyn Clock>) -> Self {
        p2p.subscribe(REVIEW_TOPIC).best_effort("subscribe");
        let config = QrConfig::default();
        QrProofService {
            businesses: HashMap::new(),
            replay: ReplayGuard::with_retention(config.replay_retention),
            reviews: HashMap::new(),
            p2p,
            clock,
            config,
        }
    }

    pub fn with_config(mut self, config: QrConfig) -> Self {
        self.replay = ReplayGuard::with_retention(config.replay_retention);
        self.config = config;
        self
    }

    /// Create a signing key for a business. Registering an id again
    /// rotates its key; codes signed with the old key stay verifiable
    /// since they embed it.
    pub fn register_business(&mut self, business_id: &str, name: &str, location: GeoLocation) -> Identity {
        let identity = Identity::generate();
        let previous = self.businesses.insert(
            business_id.to_string(),
            RegisteredBusiness {
                name: name.to_string(),
                location,
                identity: identity.clone(),
            },
        );
        if previous.is_some() {
            info!(business_id, "business key rotated");
        } else {
            info!(business_id, key = %identity.fingerprint(), "business registered");
        }
        identity
    }

    /// Issue a QR code for a registered business
    pub fn generate_signed_qr_code(
        &self,
        business_id: &str,
        config: &QrCodeConfig,
    ) -> GeoResult<BusinessQrData> {
        let business = self
            .businesses
            .get(business_id)
            .ok_or_else(|| GeoError::UnknownBusiness(business_id.to_string()))?;

        let now = self.clock.now();
        let stamp = QrStamp {
            business_id: business_id.to_string(),
            timestamp: now,
            valid_until: now + config.validity,
            nonce: random_base36(NONCE_LEN),
        };
        let signed_timestamp =
            serde_json::to_string(&stamp).map_err(|e| GeoError::MalformedPayload(e.to_string()))?;
        let signature = business.identity.sign_base64(signed_timestamp.as_bytes());

        Ok(BusinessQrData {
            business_id: business_id.to_string(),
            business_name: business.name.clone(),
            business_public_key: business.identity.public_key_base64(),
            signed_timestamp,
            signature,
            valid_until: stamp.valid_until,
            location: business.location.clone(),
        })
    }

    /// Redeem a scanned QR code for a signed review.
    ///
    /// Every check runs before the code is consumed, so a failed attempt
    /// leaves it usable.
    pub fn validate_qr_code_and_create_review(
        &mut self,
        qr: &BusinessQrData,
        rating: u8,
        comment: Option<String>,
        user_location: &GeoLocation,
        user: &Identity,
    ) -> GeoResult<SignedGeoReport<ReviewData>> {
        check_required(qr)?;
        check_rating(rating)?;
        if !user_location.coordinate().is_valid() || !qr.location.coordinate().is_valid() {
            return Err(GeoError::MalformedPayload("invalid coordinate".to_string()));
        }

        let now = self.clock.now();
        if now > qr.valid_until {
            return Err(GeoError::ReportExpired);
        }

        if !verify_detached(
            &qr.business_public_key,
            qr.signed_timestamp.as_bytes(),
            &qr.signature,
        ) {
            return Err(GeoError::SignatureInvalid);
        }
        let stamp: QrStamp = serde_json::from_str(&qr.signed_timestamp)
            .map_err(|e| GeoError::MalformedPayload(format!("QR stamp: {}", e)))?;
        if stamp.business_id != qr.business_id || stamp.valid_until != qr.valid_until {
            return Err(GeoError::SignatureInvalid);
        }

        let distance = distance_meters(user_location.coordinate(), qr.location.coordinate());
        let max = self.config.max_review_distance_meters;
        if distance > max {
            return Err(GeoError::OutOfProximityRange { distance, max });
        }

        let replay_key = qr.replay_key();
        if self.replay.is_consumed(&replay_key) {
            return Err(GeoError::ProofAlreadyUsed);
        }

        let review = ReviewData {
            business_id: qr.business_id.clone(),
            business_name: qr.business_name.clone(),
            rating,
            comment,
            qr_proof: qr.proof(),
            categories: None,
            photos: None,
        };
        let report = sign(review, user_location.clone(), user, now)?;

        // Held until the code itself has expired, whatever the retention
        self.replay.consume(&replay_key, now.max(qr.valid_until));
        self.remember(report.clone());
        info!(
            id = %report.id,
            business_id = %qr.business_id,
            distance,
            "review created"
        );
        Ok(report)
    }

    /// Publish a review. False when the network is down or publishing fails.
    pub fn broadcast_review(&self, report: &SignedGeoReport<ReviewData>) -> bool {
        if !self.p2p.is_initialized() {
            debug!(id = %report.id, "transport not ready, review not broadcast");
            return false;
        }
        match encode_report(report) {
            Ok(bytes) => self
                .p2p
                .publish(REVIEW_TOPIC, &bytes)
                .best_effort("publish review"),
            Err(e) => {
                warn!(error = %e, "review not encodable");
                false
            }
        }
    }

    /// Check and keep a review received from another peer.
    ///
    /// Both the reviewer's signature and the business proof must verify.
    /// Receiving the same review twice is harmless; a second review backed
    /// by the same QR code is rejected.
    pub fn accept_remote_review(&mut self, bytes: &[u8]) -> GeoResult<SignedGeoReport<ReviewData>> {
        let report = decode_verified::<ReviewData>(bytes, self.clock.now())?;
        check_rating(report.data.rating)?;

        let proof = &report.data.qr_proof;
        if !verify_detached(
            &proof.business_public_key,
            proof.signed_timestamp.as_bytes(),
            &proof.signature,
        ) {
            return Err(GeoError::SignatureInvalid);
        }
        let stamp: QrStamp = serde_json::from_str(&proof.signed_timestamp)
            .map_err(|e| GeoError::MalformedPayload(format!("QR stamp: {}", e)))?;
        if stamp.business_id != report.data.business_id || stamp.valid_until != proof.valid_until {
            return Err(GeoError::SignatureInvalid);
        }
        // The review must have been signed while the code was redeemable
        if report.timestamp < stamp.timestamp || report.timestamp > proof.valid_until {
            return Err(GeoError::ReportExpired);
        }

        let known = self.reviews.get(&report.data.business_id);
        if let Some(existing) = known.and_then(|list| list.iter().find(|r| r.id == report.id)) {
            return Ok(existing.clone());
        }
        let reused = known.is_some_and(|list| {
            list.iter()
                .any(|r| r.data.qr_proof.signed_timestamp == proof.signed_timestamp)
        });
        if reused {
            return Err(GeoError::ProofAlreadyUsed);
        }

        debug!(id = %report.id, business_id = %report.data.business_id, "remote review accepted");
        self.remember(report.clone());
        Ok(report)
    }

    /// Accepted reviews for a business, oldest first
    pub fn reviews_for(&self, business_id: &str) -> &[SignedGeoReport<ReviewData>] {
        self.reviews
            .get(business_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Purge old replay entries and expired reviews
    pub fn sweep(&mut self) -> usize {
        let now = self.clock.now();
        let mut removed = self.replay.sweep(now);
        for list in self.reviews.values_mut() {
            let before = list.len();
            list.retain(|r| !r.is_expired(now));
            removed += before - list.len();
        }
        self.reviews.retain(|_, list| !list.is_empty());
        removed
    }

    fn remember(&mut self, report: SignedGeoReport<ReviewData>) {
        let list = self.reviews.entry(report.data.business_id.clone()).or_default();
        list.push(report);
        list.sort_by_key(|r| r.timestamp);
    }
}

fn check_required(qr: &BusinessQrData) -> GeoResult<()> {
    let fields = [
        ("businessId", &qr.business_id),
        ("businessPublicKey", &qr.business_public_key),
        ("signedTimestamp", &qr.signed_timestamp),
        ("signature", &qr.signature),
    ];
    match fields.iter().find(|(_, value)| value.trim().is_empty()) {
        Some((name, _)) => Err(GeoError::MalformedPayload(format!("missing {}", name))),
        None => Ok(()),
    }
}

fn check_rating(rating: u8) -> GeoResult<()> {
    if (1..=5).contains(&rating) {
        Ok(())
    } else {
        Err(GeoError::MalformedPayload(format!("rating {} outside 1..=5", rating)))
    }
}
