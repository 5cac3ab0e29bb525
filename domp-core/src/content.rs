//! # Event Payloads
//!
//! Typed content for each DOMP kind. The content of an event is a compact JSON
//! object; [`EventContent`] selects the payload struct from the event kind.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{
    error::{ContentError, SchemaError, ValidationError},
    event::{Kind, RefMarker, Tag},
};

/// Default HTLC timeout, in blocks, for accepted bids.
pub const DEFAULT_HTLC_TIMEOUT_BLOCKS: u32 = 144;

/// Lightning invoice prefixes accepted in bid acceptances.
pub const INVOICE_PREFIXES: [&str; 3] = ["lnbc", "lntb", "lnbcrt"];

/// Kind 300.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductListing {
    pub product_name: String,
    pub description: String,
    pub price_satoshis: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seller_collateral_satoshis: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipping_info: Option<serde_json::Value>,
}

impl ProductListing {
    pub fn new(product_name: &str, description: &str, price_satoshis: i64) -> Self {
        Self {
            product_name: product_name.to_string(),
            description: description.to_string(),
            price_satoshis,
            category: None,
            storage_link: None,
            seller_collateral_satoshis: None,
            shipping_info: None,
        }
    }
}

/// Kind 301.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BidSubmission {
    pub product_ref: String,
    pub bid_amount_satoshis: i64,
    pub buyer_collateral_satoshis: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipping_address_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_timeout_hours: Option<u32>,
}

impl BidSubmission {
    pub fn new(product_ref: &str, bid_amount_satoshis: i64, buyer_collateral_satoshis: i64) -> Self {
        Self {
            product_ref: product_ref.to_string(),
            bid_amount_satoshis,
            buyer_collateral_satoshis,
            message: None,
            shipping_address_hash: None,
            payment_timeout_hours: None,
        }
    }
}

/// Kind 303.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BidAcceptance {
    pub bid_ref: String,
    pub ln_invoice: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collateral_invoice: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_shipping_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipping_time_days: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terms: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoice_expiry_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub htlc_timeout_blocks: Option<u32>,
}

impl BidAcceptance {
    pub fn new(bid_ref: &str, ln_invoice: &str) -> Self {
        Self {
            bid_ref: bid_ref.to_string(),
            ln_invoice: ln_invoice.to_string(),
            collateral_invoice: None,
            estimated_shipping_time: None,
            shipping_time_days: None,
            terms: None,
            invoice_expiry_seconds: None,
            htlc_timeout_blocks: None,
        }
    }

    pub fn timeout_blocks(&self) -> u32 {
        self.htlc_timeout_blocks
            .unwrap_or(DEFAULT_HTLC_TIMEOUT_BLOCKS)
    }
}

/// Kind 311.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentConfirmation {
    pub bid_ref: String,
    pub payment_proof: String,
    pub payment_method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collateral_proof: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escrow_timeout_blocks: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_shipping_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipping_instructions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_timestamp: Option<u64>,
}

impl PaymentConfirmation {
    pub fn new(bid_ref: &str, payment_proof: &str, method: PaymentMethod) -> Self {
        Self {
            bid_ref: bid_ref.to_string(),
            payment_proof: payment_proof.to_string(),
            payment_method: method.as_str().to_string(),
            collateral_proof: None,
            escrow_timeout_blocks: None,
            encrypted_shipping_address: None,
            shipping_instructions: None,
            payment_timestamp: None,
        }
    }
}

/// Kind 313.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReceiptConfirmation {
    pub payment_ref: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_confirmation_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipping_rating: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub communication_rating: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub would_buy_again: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispute_reason: Option<String>,
}

impl ReceiptConfirmation {
    pub fn new(payment_ref: &str, status: ReceiptStatus) -> Self {
        Self {
            payment_ref: payment_ref.to_string(),
            status: status.as_str().to_string(),
            rating: None,
            feedback: None,
            delivery_confirmation_time: None,
            item_condition: None,
            shipping_rating: None,
            communication_rating: None,
            would_buy_again: None,
            dispute_reason: None,
        }
    }

    pub fn with_rating(mut self, rating: i64) -> Self {
        self.rating = Some(rating);
        self
    }

    pub fn with_dispute_reason(mut self, reason: &str) -> Self {
        self.dispute_reason = Some(reason.to_string());
        self
    }
}

/// How the buyer paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentMethod {
    LightningHtlc,
    LightningKeysend,
    Onchain,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LightningHtlc => "lightning_htlc",
            Self::LightningKeysend => "lightning_keysend",
            Self::Onchain => "onchain",
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = ContentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lightning_htlc" => Ok(Self::LightningHtlc),
            "lightning_keysend" => Ok(Self::LightningKeysend),
            "onchain" => Ok(Self::Onchain),
            other => Err(ContentError::InvalidPaymentMethod(other.to_string())),
        }
    }
}

/// Outcome reported by the buyer on receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptStatus {
    Received,
    PartiallyReceived,
    NotReceived,
    Damaged,
}

impl ReceiptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::PartiallyReceived => "partially_received",
            Self::NotReceived => "not_received",
            Self::Damaged => "damaged",
        }
    }
}

impl FromStr for ReceiptStatus {
    type Err = ContentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "received" => Ok(Self::Received),
            "partially_received" => Ok(Self::PartiallyReceived),
            "not_received" => Ok(Self::NotReceived),
            "damaged" => Ok(Self::Damaged),
            other => Err(ContentError::InvalidStatus(other.to_string())),
        }
    }
}

impl fmt::Display for ReceiptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content of a DOMP event, one variant per kind.
#[derive(Debug, Clone, PartialEq)]
pub enum EventContent {
    ProductListing(ProductListing),
    BidSubmission(BidSubmission),
    BidAcceptance(BidAcceptance),
    PaymentConfirmation(PaymentConfirmation),
    ReceiptConfirmation(ReceiptConfirmation),
}

impl EventContent {
    /// Parse `content` as the payload of `kind`.
    pub fn parse(kind: u32, content: &str) -> Result<Self, ValidationError> {
        let kind = Kind::from_u32(kind).ok_or(SchemaError::UnsupportedKind(kind))?;
        let value: serde_json::Value = serde_json::from_str(content)
            .map_err(|e| SchemaError::ContentNotJson(e.to_string()))?;
        Self::from_value(kind, value)
    }

    /// Deserialize an already parsed JSON object as the payload of `kind`.
    pub fn from_value(kind: Kind, value: serde_json::Value) -> Result<Self, ValidationError> {
        if !value.is_object() {
            return Err(SchemaError::ContentNotObject.into());
        }
        Ok(match kind {
            Kind::ProductListing => Self::ProductListing(typed(kind, value)?),
            Kind::BidSubmission => Self::BidSubmission(typed(kind, value)?),
            Kind::BidAcceptance => Self::BidAcceptance(typed(kind, value)?),
            Kind::PaymentConfirmation => Self::PaymentConfirmation(typed(kind, value)?),
            Kind::ReceiptConfirmation => Self::ReceiptConfirmation(typed(kind, value)?),
        })
    }

    pub fn kind(&self) -> Kind {
        match self {
            Self::ProductListing(_) => Kind::ProductListing,
            Self::BidSubmission(_) => Kind::BidSubmission,
            Self::BidAcceptance(_) => Kind::BidAcceptance,
            Self::PaymentConfirmation(_) => Kind::PaymentConfirmation,
            Self::ReceiptConfirmation(_) => Kind::ReceiptConfirmation,
        }
    }

    /// Id of the preceding event this payload points at.
    pub fn reference(&self) -> Option<&str> {
        match self {
            Self::ProductListing(_) => None,
            Self::BidSubmission(bid) => Some(&bid.product_ref),
            Self::BidAcceptance(acceptance) => Some(&acceptance.bid_ref),
            Self::PaymentConfirmation(payment) => Some(&payment.bid_ref),
            Self::ReceiptConfirmation(receipt) => Some(&receipt.payment_ref),
        }
    }

    /// `ref` tags mirroring the content reference.
    pub fn reference_tags(&self, relay_hint: &str) -> Vec<Tag> {
        let marker = match self {
            Self::BidSubmission(_) => RefMarker::Root,
            _ => RefMarker::Reply,
        };
        match self.reference() {
            Some(reference) if !reference.is_empty() => {
                vec![Tag::reference(reference, relay_hint, marker)]
            }
            _ => Vec::new(),
        }
    }

    /// Compact JSON encoding used as event content.
    pub fn to_json(&self) -> serde_json::Result<String> {
        match self {
            Self::ProductListing(c) => serde_json::to_string(c),
            Self::BidSubmission(c) => serde_json::to_string(c),
            Self::BidAcceptance(c) => serde_json::to_string(c),
            Self::PaymentConfirmation(c) => serde_json::to_string(c),
            Self::ReceiptConfirmation(c) => serde_json::to_string(c),
        }
    }
}

fn typed<T: DeserializeOwned>(kind: Kind, value: serde_json::Value) -> Result<T, SchemaError> {
    serde_json::from_value(value).map_err(|e| SchemaError::Malformed {
        kind: kind.as_u32(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_content_skips_empty_optionals() {
        let content = EventContent::ProductListing(ProductListing::new("Widget", "Nice", 1000));
        assert_eq!(
            content.to_json().unwrap(),
            r#"{"product_name":"Widget","description":"Nice","price_satoshis":1000}"#
        );
        assert!(content.reference_tags("").is_empty());
    }

    #[test]
    fn test_parse_dispatches_on_kind() {
        let parsed = EventContent::parse(
            301,
            r#"{"product_ref":"aa","bid_amount_satoshis":5,"buyer_collateral_satoshis":0}"#,
        )
        .unwrap();
        assert_eq!(parsed.kind(), Kind::BidSubmission);
        assert_eq!(parsed.reference(), Some("aa"));
    }

    #[test]
    fn test_parse_rejects_unknown_kind_and_bad_json() {
        assert_eq!(
            EventContent::parse(1, "{}"),
            Err(ValidationError::Schema(SchemaError::UnsupportedKind(1)))
        );
        assert!(matches!(
            EventContent::parse(300, "not json"),
            Err(ValidationError::Schema(SchemaError::ContentNotJson(_)))
        ));
        assert_eq!(
            EventContent::parse(300, "[1]"),
            Err(ValidationError::Schema(SchemaError::ContentNotObject))
        );
    }

    #[test]
    fn test_parse_reports_type_mismatch_at_schema_stage() {
        let err = EventContent::parse(
            300,
            r#"{"product_name":"x","description":"y","price_satoshis":"lots"}"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ValidationError::Schema(SchemaError::Malformed { kind: 300, .. })
        ));
        assert_eq!(err.stage(), "schema");
    }

    #[test]
    fn test_reference_tag_markers() {
        let bid = EventContent::BidSubmission(BidSubmission::new("listing", 1, 0));
        assert_eq!(bid.reference_tags("wss://relay")[0].get(3), Some("root"));

        let receipt =
            EventContent::ReceiptConfirmation(ReceiptConfirmation::new("payment", ReceiptStatus::Received));
        let tags = receipt.reference_tags("");
        assert_eq!(tags[0].as_slice(), &["ref", "payment", "", "reply"]);
    }

    #[test]
    fn test_enumerations_parse() {
        assert_eq!("onchain".parse::<PaymentMethod>(), Ok(PaymentMethod::Onchain));
        assert!("paypal".parse::<PaymentMethod>().is_err());
        assert_eq!("damaged".parse::<ReceiptStatus>(), Ok(ReceiptStatus::Damaged));
        assert!("lost".parse::<ReceiptStatus>().is_err());
    }

    #[test]
    fn test_acceptance_timeout_default() {
        let acceptance = BidAcceptance::new("bid", "lnbc1");
        assert_eq!(acceptance.timeout_blocks(), DEFAULT_HTLC_TIMEOUT_BLOCKS);
    }
}
