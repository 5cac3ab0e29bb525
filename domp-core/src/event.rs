//! # DOMP Events
//!
//! Signed, immutable records of marketplace actions. An [`UnsignedEvent`] is the
//! only mutable form: callers append the anti-spam tag to a draft and then sign
//! it, which fixes the id over the final tag set and yields an [`Event`].

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::{
    content::EventContent,
    error::{Result, SignatureError},
    keys::Keys,
    pow::{AntiSpamProof, ANTI_SPAM_TAG},
    utils::{compute_event_id, now_unix},
};

/// A tag: an ordered list of strings whose first element is the tag name.
///
/// Tags are positional, so `["ref", id, relay, "root"]` and the same strings in
/// another order are different tags and hash to different event ids.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tag(pub Vec<String>);

impl Tag {
    /// Build a tag from any sequence of string-like values.
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(values.into_iter().map(Into::into).collect())
    }

    /// `["d", listing_id]`
    pub fn identifier(listing_id: &str) -> Self {
        Self::new(["d", listing_id])
    }

    /// `["ref", event_id, relay_hint, marker]`
    pub fn reference(event_id: &str, relay_hint: &str, marker: RefMarker) -> Self {
        Self::new(["ref", event_id, relay_hint, marker.as_str()])
    }

    /// Tag name (first element), if any.
    pub fn name(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// Element at `index`.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.0.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

/// Marker carried in the fourth position of a `ref` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefMarker {
    /// The referenced event starts the thread (bids reference listings).
    Root,
    /// The referenced event is the direct predecessor.
    Reply,
}

impl RefMarker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::Reply => "reply",
        }
    }
}

/// The five DOMP event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u32", try_from = "u32")]
pub enum Kind {
    ProductListing,
    BidSubmission,
    BidAcceptance,
    PaymentConfirmation,
    ReceiptConfirmation,
}

impl Kind {
    /// Kinds of a complete transaction, in protocol order.
    pub const TRANSACTION_SEQUENCE: [Kind; 5] = [
        Kind::ProductListing,
        Kind::BidSubmission,
        Kind::BidAcceptance,
        Kind::PaymentConfirmation,
        Kind::ReceiptConfirmation,
    ];

    pub const fn as_u32(&self) -> u32 {
        match self {
            Self::ProductListing => 300,
            Self::BidSubmission => 301,
            Self::BidAcceptance => 303,
            Self::PaymentConfirmation => 311,
            Self::ReceiptConfirmation => 313,
        }
    }

    pub const fn from_u32(kind: u32) -> Option<Self> {
        match kind {
            300 => Some(Self::ProductListing),
            301 => Some(Self::BidSubmission),
            303 => Some(Self::BidAcceptance),
            311 => Some(Self::PaymentConfirmation),
            313 => Some(Self::ReceiptConfirmation),
            _ => None,
        }
    }

    /// Content field holding the id of the preceding event in a transaction.
    pub const fn reference_field(&self) -> Option<&'static str> {
        match self {
            Self::ProductListing => None,
            Self::BidSubmission => Some("product_ref"),
            Self::BidAcceptance | Self::PaymentConfirmation => Some("bid_ref"),
            Self::ReceiptConfirmation => Some("payment_ref"),
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::ProductListing => "ProductListing",
            Self::BidSubmission => "BidSubmission",
            Self::BidAcceptance => "BidAcceptance",
            Self::PaymentConfirmation => "PaymentConfirmation",
            Self::ReceiptConfirmation => "ReceiptConfirmation",
        }
    }
}

impl From<Kind> for u32 {
    fn from(kind: Kind) -> Self {
        kind.as_u32()
    }
}

impl TryFrom<u32> for Kind {
    type Error = String;

    fn try_from(kind: u32) -> std::result::Result<Self, Self::Error> {
        Self::from_u32(kind).ok_or_else(|| format!("unknown DOMP kind {kind}"))
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.as_u32())
    }
}

/// A published DOMP event.
///
/// ```json
/// {
///   "id": "00a1...",
///   "pubkey": "ee96...",
///   "created_at": 1735689600,
///   "kind": 300,
///   "tags": [["d", "listing-1"], ["anti_spam_proof", "pow", "17", "8"]],
///   "content": "{\"product_name\":\"Widget\",...}",
///   "sig": "9c1f..."
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    /// Event identifier (hex of SHA-256 hash).
    pub id: String,
    /// Author x-only public key (hex).
    pub pubkey: String,
    /// Unix timestamp of creation.
    pub created_at: u64,
    /// Kind number, e.g. `300`.
    pub kind: u32,
    /// Tags, including exactly one `anti_spam_proof` tag.
    pub tags: Vec<Tag>,
    /// Compact JSON payload.
    pub content: String,
    /// Schnorr signature over the id.
    pub sig: String,
}

impl Event {
    /// Recompute the id from the event's signable fields.
    pub fn compute_id(&self) -> String {
        compute_event_id(
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        )
    }

    /// The typed kind, if this is a DOMP kind.
    pub fn domp_kind(&self) -> Option<Kind> {
        Kind::from_u32(self.kind)
    }

    /// Parse the content as the typed payload of this event's kind.
    pub fn parse_content(&self) -> Result<EventContent> {
        Ok(EventContent::parse(self.kind, &self.content)?)
    }

    /// All `anti_spam_proof` tags.
    pub fn anti_spam_tags(&self) -> impl Iterator<Item = &Tag> {
        self.tags
            .iter()
            .filter(|tag| tag.len() >= 2 && tag.name() == Some(ANTI_SPAM_TAG))
    }

    /// First tag with the given name.
    pub fn find_tag(&self, name: &str) -> Option<&Tag> {
        self.tags.iter().find(|tag| tag.name() == Some(name))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// A draft event: everything except `id` and `sig`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnsignedEvent {
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u32,
    pub tags: Vec<Tag>,
    pub content: String,
}

impl UnsignedEvent {
    /// Draft an event from a typed payload, stamped with the current time.
    ///
    /// Reference tags for the payload are added automatically; the anti-spam
    /// tag is not.
    pub fn new(pubkey: impl Into<String>, content: &EventContent) -> Result<Self> {
        Self::new_at(pubkey, content, now_unix())
    }

    /// Same as [`UnsignedEvent::new`] with an explicit `created_at`.
    pub fn new_at(
        pubkey: impl Into<String>,
        content: &EventContent,
        created_at: u64,
    ) -> Result<Self> {
        let mut tags = content.reference_tags("");
        if content.kind() == Kind::ProductListing {
            tags.push(Tag::identifier(&Uuid::new_v4().to_string()));
        }

        Ok(Self {
            pubkey: pubkey.into(),
            created_at,
            kind: content.kind().as_u32(),
            tags,
            content: content.to_json()?,
        })
    }

    /// Append an extra tag.
    pub fn with_tag(mut self, tag: Tag) -> Self {
        self.tags.push(tag);
        self
    }

    /// Append the anti-spam proof tag.
    pub fn with_proof(self, proof: &AntiSpamProof) -> Self {
        self.with_tag(proof.to_tag())
    }

    /// Id over the current fields.
    pub fn compute_id(&self) -> String {
        compute_event_id(
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        )
    }

    /// Sign the draft, fixing the id over the final tag set.
    ///
    /// The draft must have been created for `keys`' public key: the public key
    /// is part of the hashed fields, so a pow nonce mined for one key is worthless
    /// for another.
    pub fn sign(self, keys: &Keys) -> Result<Event> {
        let pubkey = keys.public_key_hex();
        if self.pubkey != pubkey {
            return Err(SignatureError::InvalidPublicKey(format!(
                "draft pubkey {} does not match signing key {}",
                self.pubkey, pubkey
            ))
            .into());
        }

        let id = self.compute_id();
        let sig = keys.sign_id(&id)?;

        Ok(Event {
            id,
            pubkey: self.pubkey,
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags,
            content: self.content,
            sig,
        })
    }
}

impl From<&Event> for UnsignedEvent {
    fn from(event: &Event) -> Self {
        Self {
            pubkey: event.pubkey.clone(),
            created_at: event.created_at,
            kind: event.kind,
            tags: event.tags.clone(),
            content: event.content.clone(),
        }
    }
}
