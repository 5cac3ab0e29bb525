//! # Event Validation
//!
//! Staged checks for single events and for complete transaction chains.
//! Each stage short-circuits and reports its own error type:
//!
//! 1. structural: fields present and well-formed
//! 2. schema: content is a JSON object matching the kind schema
//! 3. content: kind-specific business rules
//! 4. anti-spam: exactly one valid `anti_spam_proof` tag
//! 5. signature: id recomputed over the final tags, then Schnorr-verified

use serde_json::Value;
use tracing::debug;

use crate::{
    config::ValidationConfig,
    content::{EventContent, PaymentMethod, ReceiptStatus, INVOICE_PREFIXES},
    error::{
        ConfigError, ContentError, SchemaError, SequenceError, SignatureError, StructuralError,
        ValidationError,
    },
    event::{Event, Kind, Tag},
    keys::verify_signature,
    pow::verify_anti_spam,
    schema::SchemaSet,
    utils::{is_hex_of_len, now_unix},
};

/// Tunable business rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationRules {
    pub max_product_name_len: usize,
    pub bid_tolerance_percent: u32,
    pub max_clock_skew_secs: Option<u64>,
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self::from(&ValidationConfig::default())
    }
}

impl From<&ValidationConfig> for ValidationRules {
    fn from(config: &ValidationConfig) -> Self {
        Self {
            max_product_name_len: config.max_product_name_len,
            bid_tolerance_percent: config.bid_tolerance_percent,
            max_clock_skew_secs: config.max_clock_skew_secs,
        }
    }
}

/// Validates events against a fixed schema set and rule set.
#[derive(Debug, Clone, Default)]
pub struct EventValidator {
    schemas: SchemaSet,
    rules: ValidationRules,
}

impl EventValidator {
    pub fn new(schemas: SchemaSet, rules: ValidationRules) -> Self {
        Self { schemas, rules }
    }

    pub fn from_config(config: &ValidationConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(config.schema_set()?, ValidationRules::from(config)))
    }

    pub fn rules(&self) -> &ValidationRules {
        &self.rules
    }

    pub fn schemas(&self) -> &SchemaSet {
        &self.schemas
    }

    /// Validate an event given as raw JSON.
    ///
    /// Missing or mistyped top-level fields are reported before any other
    /// check runs. Returns the typed event together with its parsed content.
    pub fn validate_value(
        &self,
        value: &Value,
        check_signature: bool,
    ) -> Result<(Event, EventContent), ValidationError> {
        let event = event_from_value(value)?;
        let content = self.validate_event(&event, check_signature)?;
        Ok((event, content))
    }

    /// Run the full pipeline over one event.
    pub fn validate_event(
        &self,
        event: &Event,
        check_signature: bool,
    ) -> Result<EventContent, ValidationError> {
        debug!(id = %event.id, kind = event.kind, "validating event");

        check_structure(event)?;
        debug!(id = %event.id, "structure ok");

        let content = self.check_schema(event)?;
        debug!(id = %event.id, "schema ok");

        self.check_content(&content)?;
        if let Some(tolerance) = self.rules.max_clock_skew_secs {
            validate_timestamp(event.created_at, tolerance, now_unix())?;
        }
        debug!(id = %event.id, "content ok");

        let proof = verify_anti_spam(event)?;
        debug!(id = %event.id, proof = proof.proof_type(), "anti-spam ok");

        if check_signature {
            check_signature_of(event)?;
            debug!(id = %event.id, "signature ok");
        }

        Ok(content)
    }

    /// Validate a complete transaction: listing, bid, acceptance, payment,
    /// receipt.
    ///
    /// Every event is validated with its signature; failures carry the index
    /// of the offending event. Each later event must reference the id of the
    /// one before it, and the bid may not exceed the listing price by more
    /// than the configured tolerance.
    pub fn validate_chain(&self, events: &[Event]) -> Result<Vec<EventContent>, ValidationError> {
        if events.is_empty() {
            return Err(SequenceError::Empty.into());
        }

        let contents = events
            .iter()
            .enumerate()
            .map(|(index, event)| {
                self.validate_event(event, true)
                    .map_err(|e| ValidationError::AtIndex {
                        index,
                        source: Box::new(e),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let actual: Vec<u32> = events.iter().map(|e| e.kind).collect();
        let expected: Vec<u32> = Kind::TRANSACTION_SEQUENCE.iter().map(Kind::as_u32).collect();
        if actual != expected {
            let index = actual
                .iter()
                .zip(&expected)
                .position(|(a, e)| a != e)
                .unwrap_or_else(|| actual.len().min(expected.len()));
            return Err(SequenceError::WrongKinds {
                index,
                actual,
                expected,
            }
            .into());
        }

        for (index, content) in contents.iter().enumerate().skip(1) {
            let kind = content.kind();
            let field = kind.reference_field().unwrap_or_default();
            let reference = match content.reference() {
                Some(reference) if !reference.is_empty() => reference,
                _ => {
                    return Err(SequenceError::MissingReference {
                        index,
                        kind: kind.as_u32(),
                        field,
                    }
                    .into())
                }
            };
            let expected = &events[index - 1].id;
            if reference != expected {
                return Err(SequenceError::ReferenceMismatch {
                    index,
                    field,
                    expected: expected.clone(),
                    actual: reference.to_string(),
                }
                .into());
            }
        }

        if let (EventContent::ProductListing(listing), EventContent::BidSubmission(bid)) =
            (&contents[0], &contents[1])
        {
            check_bid_tolerance(
                bid.bid_amount_satoshis,
                listing.price_satoshis,
                self.rules.bid_tolerance_percent,
            )?;
        }

        debug!(listing = %events[0].id, "transaction chain ok");
        Ok(contents)
    }

    fn check_schema(&self, event: &Event) -> Result<EventContent, ValidationError> {
        let kind = Kind::from_u32(event.kind).ok_or(SchemaError::UnsupportedKind(event.kind))?;
        let value: Value = serde_json::from_str(&event.content)
            .map_err(|e| SchemaError::ContentNotJson(e.to_string()))?;
        self.schemas.validate(event.kind, &value)?;
        EventContent::from_value(kind, value)
    }

    /// Kind-specific business rules on parsed content.
    pub fn check_content(&self, content: &EventContent) -> Result<(), ContentError> {
        match content {
            EventContent::ProductListing(listing) => {
                require_positive("price_satoshis", listing.price_satoshis)?;
                let name_len = listing.product_name.chars().count();
                if name_len > self.rules.max_product_name_len {
                    return Err(ContentError::TooLong {
                        field: "product_name",
                        max: self.rules.max_product_name_len,
                        actual: name_len,
                    });
                }
                if let Some(collateral) = listing.seller_collateral_satoshis {
                    require_non_negative("seller_collateral_satoshis", collateral)?;
                }
            }
            EventContent::BidSubmission(bid) => {
                require_positive("bid_amount_satoshis", bid.bid_amount_satoshis)?;
                require_non_negative("buyer_collateral_satoshis", bid.buyer_collateral_satoshis)?;
            }
            EventContent::BidAcceptance(acceptance) => {
                let invoice = acceptance.ln_invoice.to_lowercase();
                if !INVOICE_PREFIXES.iter().any(|p| invoice.starts_with(p)) {
                    return Err(ContentError::InvalidInvoice(acceptance.ln_invoice.clone()));
                }
            }
            EventContent::PaymentConfirmation(payment) => {
                payment.payment_method.parse::<PaymentMethod>()?;
            }
            EventContent::ReceiptConfirmation(receipt) => {
                let status: ReceiptStatus = receipt.status.parse()?;
                let has_reason = receipt
                    .dispute_reason
                    .as_deref()
                    .is_some_and(|r| !r.trim().is_empty());
                if status != ReceiptStatus::Received && !has_reason {
                    return Err(ContentError::MissingDisputeReason(receipt.status.clone()));
                }
                for (field, rating) in [
                    ("rating", receipt.rating),
                    ("shipping_rating", receipt.shipping_rating),
                    ("communication_rating", receipt.communication_rating),
                ] {
                    if let Some(value) = rating {
                        if !(1..=5).contains(&value) {
                            return Err(ContentError::RatingOutOfRange { field, value });
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Reject a `created_at` further than `tolerance` seconds from `now`.
pub fn validate_timestamp(created_at: u64, tolerance: u64, now: u64) -> Result<(), ContentError> {
    if created_at.abs_diff(now) > tolerance {
        return Err(ContentError::TimestampOutOfRange {
            created_at,
            now,
            tolerance,
        });
    }
    Ok(())
}

/// Reject a bid above `tolerance_percent` of the listing price.
pub fn check_bid_tolerance(bid: i64, price: i64, tolerance_percent: u32) -> Result<(), ContentError> {
    if i128::from(bid) * 100 > i128::from(price) * i128::from(tolerance_percent) {
        return Err(ContentError::BidExceedsListing {
            bid,
            price,
            tolerance_percent,
        });
    }
    Ok(())
}

fn require_positive(field: &'static str, value: i64) -> Result<(), ContentError> {
    if value <= 0 {
        return Err(ContentError::NotPositive { field, value });
    }
    Ok(())
}

fn require_non_negative(field: &'static str, value: i64) -> Result<(), ContentError> {
    if value < 0 {
        return Err(ContentError::Negative { field, value });
    }
    Ok(())
}

fn check_structure(event: &Event) -> Result<(), StructuralError> {
    check_hex("id", &event.id, 64)?;
    check_hex("pubkey", &event.pubkey, 64)?;
    check_hex("sig", &event.sig, 128)?;
    if let Some(index) = event.tags.iter().position(Tag::is_empty) {
        return Err(StructuralError::EmptyTag { index });
    }
    Ok(())
}

fn check_hex(field: &'static str, value: &str, len: usize) -> Result<(), StructuralError> {
    if value.len() != len {
        return Err(StructuralError::BadLength {
            field,
            expected: len,
            actual: value.len(),
        });
    }
    if !is_hex_of_len(value, len) {
        return Err(StructuralError::NotHex(field));
    }
    Ok(())
}

fn check_signature_of(event: &Event) -> Result<(), SignatureError> {
    let computed = event.compute_id();
    if computed != event.id {
        return Err(SignatureError::IdMismatch {
            stored: event.id.clone(),
            computed,
        });
    }
    verify_signature(&event.id, &event.sig, &event.pubkey)
}

fn event_from_value(value: &Value) -> Result<Event, StructuralError> {
    let object = value.as_object().ok_or(StructuralError::NotAnObject)?;

    let field = |name: &'static str| object.get(name).ok_or(StructuralError::MissingField(name));
    let string = |name: &'static str| -> Result<String, StructuralError> {
        field(name)?
            .as_str()
            .map(str::to_string)
            .ok_or(StructuralError::WrongType {
                field: name,
                expected: "a string",
            })
    };
    let integer = |name: &'static str| -> Result<u64, StructuralError> {
        field(name)?.as_u64().ok_or(StructuralError::WrongType {
            field: name,
            expected: "a non-negative integer",
        })
    };

    let id = string("id")?;
    let pubkey = string("pubkey")?;
    let created_at = integer("created_at")?;
    let kind = u32::try_from(integer("kind")?).map_err(|_| StructuralError::WrongType {
        field: "kind",
        expected: "a 32-bit integer",
    })?;

    let tags_type = StructuralError::WrongType {
        field: "tags",
        expected: "an array of string arrays",
    };
    let tags = field("tags")?
        .as_array()
        .ok_or_else(|| tags_type.clone())?
        .iter()
        .map(|tag| {
            tag.as_array()
                .and_then(|items| {
                    items
                        .iter()
                        .map(|item| item.as_str().map(str::to_string))
                        .collect::<Option<Vec<_>>>()
                })
                .map(Tag)
                .ok_or_else(|| tags_type.clone())
        })
        .collect::<Result<Vec<_>, _>>()?;

    let content = string("content")?;
    let sig = string("sig")?;

    Ok(Event {
        id,
        pubkey,
        created_at,
        kind,
        tags,
        content,
        sig,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{BidSubmission, ProductListing, ReceiptConfirmation};
    use crate::error::AntiSpamError;
    use crate::keys::Keys;
    use crate::test_utils::{sign_with_ln_proof, transaction_chain};

    fn validator() -> EventValidator {
        EventValidator::default()
    }

    fn listing(price: i64) -> EventContent {
        EventContent::ProductListing(ProductListing::new("Widget", "A widget", price))
    }

    #[test]
    fn test_valid_listing_passes() {
        let keys = Keys::generate();
        let event = sign_with_ln_proof(&keys, &listing(1000));
        let content = validator().validate_event(&event, true).unwrap();
        assert_eq!(content, listing(1000));
    }

    #[test]
    fn test_rejects_zero_price() {
        let keys = Keys::generate();
        let event = sign_with_ln_proof(&keys, &listing(0));
        assert_eq!(
            validator().validate_event(&event, true),
            Err(ValidationError::Content(ContentError::NotPositive {
                field: "price_satoshis",
                value: 0
            }))
        );
    }

    #[test]
    fn test_rejects_negative_collateral() {
        let keys = Keys::generate();
        let bid = EventContent::BidSubmission(BidSubmission::new(&"ab".repeat(32), 500, -1));
        let event = sign_with_ln_proof(&keys, &bid);
        assert_eq!(
            validator().validate_event(&event, true),
            Err(ValidationError::Content(ContentError::Negative {
                field: "buyer_collateral_satoshis",
                value: -1
            }))
        );
    }

    #[test]
    fn test_rejects_damaged_without_reason() {
        let keys = Keys::generate();
        let receipt = ReceiptConfirmation::new(&"ab".repeat(32), ReceiptStatus::Damaged);
        let event = sign_with_ln_proof(&keys, &EventContent::ReceiptConfirmation(receipt.clone()));
        assert_eq!(
            validator().validate_event(&event, true),
            Err(ValidationError::Content(ContentError::MissingDisputeReason(
                "damaged".into()
            )))
        );

        let explained = receipt.with_dispute_reason("box crushed");
        let event = sign_with_ln_proof(&keys, &EventContent::ReceiptConfirmation(explained));
        assert!(validator().validate_event(&event, true).is_ok());
    }

    #[test]
    fn test_rejects_rating_out_of_range() {
        let keys = Keys::generate();
        let receipt =
            ReceiptConfirmation::new(&"ab".repeat(32), ReceiptStatus::Received).with_rating(6);
        let event = sign_with_ln_proof(&keys, &EventContent::ReceiptConfirmation(receipt));
        assert!(matches!(
            validator().validate_event(&event, true),
            Err(ValidationError::Content(ContentError::RatingOutOfRange { value: 6, .. }))
        ));
    }

    #[test]
    fn test_rejects_long_product_name() {
        let keys = Keys::generate();
        let long = EventContent::ProductListing(ProductListing::new(&"x".repeat(101), "d", 1));
        let event = sign_with_ln_proof(&keys, &long);
        assert!(matches!(
            validator().validate_event(&event, true),
            Err(ValidationError::Content(ContentError::TooLong { actual: 101, .. }))
        ));
    }

    #[test]
    fn test_rejects_missing_proof() {
        let keys = Keys::generate();
        let event = crate::event::UnsignedEvent::new(keys.public_key_hex(), &listing(1000))
            .unwrap()
            .sign(&keys)
            .unwrap();
        assert_eq!(
            validator().validate_event(&event, true),
            Err(ValidationError::AntiSpam(AntiSpamError::MissingProof))
        );
    }

    #[test]
    fn test_rejects_tampered_id_and_signature() {
        let keys = Keys::generate();
        let mut event = sign_with_ln_proof(&keys, &listing(1000));
        event.created_at += 1;
        assert!(matches!(
            validator().validate_event(&event, true),
            Err(ValidationError::Signature(SignatureError::IdMismatch { .. }))
        ));
        // signature stage is skipped on request
        assert!(validator().validate_event(&event, false).is_ok());

        let mut event = sign_with_ln_proof(&keys, &listing(1000));
        event.sig = sign_with_ln_proof(&keys, &listing(2000)).sig;
        assert_eq!(
            validator().validate_event(&event, true),
            Err(ValidationError::Signature(SignatureError::VerificationFailed))
        );
    }

    #[test]
    fn test_structural_checks_on_raw_json() {
        let keys = Keys::generate();
        let event = sign_with_ln_proof(&keys, &listing(1000));
        let mut value = serde_json::to_value(&event).unwrap();
        assert!(validator().validate_value(&value, true).is_ok());

        value.as_object_mut().unwrap().remove("sig");
        assert_eq!(
            validator().validate_value(&value, true).unwrap_err(),
            ValidationError::Structural(StructuralError::MissingField("sig"))
        );

        value["sig"] = serde_json::json!(5);
        assert!(matches!(
            validator().validate_value(&value, true),
            Err(ValidationError::Structural(StructuralError::WrongType { field: "sig", .. }))
        ));

        let mut short = event.clone();
        short.pubkey.truncate(10);
        assert_eq!(
            validator().validate_event(&short, true),
            Err(ValidationError::Structural(StructuralError::BadLength {
                field: "pubkey",
                expected: 64,
                actual: 10
            }))
        );
    }

    #[test]
    fn test_unknown_kind_is_schema_error() {
        let keys = Keys::generate();
        let mut event = sign_with_ln_proof(&keys, &listing(1000));
        event.kind = 302;
        assert_eq!(
            validator().validate_event(&event, false).unwrap_err().stage(),
            "schema"
        );
    }

    #[test]
    fn test_clock_skew_rule() {
        let rules = ValidationRules {
            max_clock_skew_secs: Some(60),
            ..ValidationRules::default()
        };
        let strict = EventValidator::new(SchemaSet::embedded(), rules);
        let keys = Keys::generate();
        let draft = crate::event::UnsignedEvent::new_at(keys.public_key_hex(), &listing(5), 1000)
            .unwrap()
            .with_proof(&crate::pow::AntiSpamProof::Lightning {
                payment_hash: "ab".repeat(32),
            });
        let stale = draft.sign(&keys).unwrap();
        assert!(matches!(
            strict.validate_event(&stale, true),
            Err(ValidationError::Content(ContentError::TimestampOutOfRange { .. }))
        ));
        assert!(validate_timestamp(100, 10, 105).is_ok());
        assert!(validate_timestamp(120, 10, 105).is_err());
    }

    #[test]
    fn test_valid_chain() {
        let chain = transaction_chain(80_000_000, 80_000_000);
        let contents = validator().validate_chain(&chain.events).unwrap();
        assert_eq!(contents.len(), 5);
    }

    #[test]
    fn test_chain_missing_receipt() {
        let chain = transaction_chain(80_000_000, 80_000_000);
        assert_eq!(
            validator().validate_chain(&chain.events[..4]),
            Err(ValidationError::Sequence(SequenceError::WrongKinds {
                index: 4,
                actual: vec![300, 301, 303, 311],
                expected: vec![300, 301, 303, 311, 313]
            }))
        );
        assert_eq!(
            validator().validate_chain(&[]),
            Err(ValidationError::Sequence(SequenceError::Empty))
        );
    }

    #[test]
    fn test_chain_out_of_order_names_position() {
        let mut chain = transaction_chain(80_000_000, 80_000_000);
        chain.events.swap(2, 3);
        assert_eq!(
            validator().validate_chain(&chain.events),
            Err(ValidationError::Sequence(SequenceError::WrongKinds {
                index: 2,
                actual: vec![300, 301, 311, 303, 313],
                expected: vec![300, 301, 303, 311, 313]
            }))
        );
    }

    #[test]
    fn test_chain_wrong_product_ref() {
        let mut chain = transaction_chain(80_000_000, 80_000_000);
        let keys = &chain.buyer;
        let bid = EventContent::BidSubmission(BidSubmission::new(&"cd".repeat(32), 80_000_000, 0));
        chain.events[1] = sign_with_ln_proof(keys, &bid);
        assert!(matches!(
            validator().validate_chain(&chain.events),
            Err(ValidationError::Sequence(SequenceError::ReferenceMismatch {
                index: 1,
                field: "product_ref",
                ..
            }))
        ));
    }

    #[test]
    fn test_chain_wraps_event_errors_with_index() {
        let mut chain = transaction_chain(80_000_000, 80_000_000);
        chain.events[2].sig = "00".repeat(64);
        let err = validator().validate_chain(&chain.events).unwrap_err();
        assert!(matches!(err, ValidationError::AtIndex { index: 2, .. }));
        assert_eq!(err.stage(), "signature");
    }

    #[test]
    fn test_chain_bid_tolerance() {
        let within = transaction_chain(1_000, 1_100);
        assert!(validator().validate_chain(&within.events).is_ok());

        let over = transaction_chain(1_000, 1_101);
        assert_eq!(
            validator().validate_chain(&over.events),
            Err(ValidationError::Content(ContentError::BidExceedsListing {
                bid: 1_101,
                price: 1_000,
                tolerance_percent: 110
            }))
        );
    }

    #[test]
    fn test_invoice_prefixes() {
        let v = validator();
        for invoice in ["lnbc1abc", "lntb1abc", "lnbcrt1abc", "LNBC1ABC"] {
            let acceptance = EventContent::BidAcceptance(crate::content::BidAcceptance::new("x", invoice));
            assert!(v.check_content(&acceptance).is_ok(), "{invoice}");
        }
        let bogus = EventContent::BidAcceptance(crate::content::BidAcceptance::new("x", "bitcoin:1abc"));
        assert!(matches!(v.check_content(&bogus), Err(ContentError::InvalidInvoice(_))));
    }
}
