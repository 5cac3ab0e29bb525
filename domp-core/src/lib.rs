//! # DOMP Core
//!
//! Core Rust library for the Decentralized Open Marketplace Protocol: signed,
//! chained events for listing, bidding, paying for and reviewing goods, with
//! HTLC escrow and reputation on top.
//!
//! This library provides the fundamental building blocks where:
//! - Every marketplace action is a signed event whose id is the SHA-256 of its
//!   canonical serialization
//! - Every event carries an anti-spam proof (proof-of-work, Lightning payment
//!   hash or a reference to a prior event)
//! - A transaction is the chain listing → bid → acceptance → payment → receipt
//!
//! ## Features
//!
//! - **Events**: Typed payloads per kind, canonical ids and Schnorr signatures
//! - **Anti-Spam**: Bounded, cancellable and parallel proof-of-work mining
//! - **Validation**: Staged checks for single events and whole transactions
//! - **Escrow**: HTLC escrow lifecycle keyed by transaction
//! - **Reputation**: Time-decayed, volume-weighted scores and a trust score
//!
//! ## Examples
//!
//! ```rust
//! use domp_core::{
//!     mine_pow, CancelToken, EventContent, EventValidator, Keys, MiningLimits, ProductListing,
//!     UnsignedEvent,
//! };
//!
//! let keys = Keys::generate();
//! let listing = EventContent::ProductListing(ProductListing::new(
//!     "Vintage Camera",
//!     "Film camera in working condition",
//!     80_000_000,
//! ));
//!
//! // Mine a proof-of-work tag, then sign over the final tag set
//! let draft = UnsignedEvent::new(keys.public_key_hex(), &listing)?;
//! let mined = mine_pow(&draft, 8, &MiningLimits::default(), &CancelToken::new())?;
//! let event = mined.draft.sign(&keys)?;
//!
//! EventValidator::default().validate_event(&event, true)?;
//! Ok::<(), domp_core::DompError>(())
//! ```

pub mod config;
pub mod content;
pub mod error;
pub mod escrow;
pub mod event;
pub mod keys;
pub mod pow;
pub mod reputation;
pub mod schema;
pub mod utils;
pub mod validation;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::DompConfig;
pub use content::{
    BidAcceptance, BidSubmission, EventContent, PaymentConfirmation, PaymentMethod, ProductListing,
    ReceiptConfirmation, ReceiptStatus,
};
pub use error::{DompError, Result};
pub use escrow::{EscrowManager, EscrowParams, EscrowState, HtlcEscrow};
pub use event::{Event, Kind, Tag, UnsignedEvent};
pub use keys::{verify, verify_signature, Keys};
pub use pow::{mine_pow, mine_pow_parallel, AntiSpamProof, CancelToken, MiningLimits};
pub use reputation::{ReputationEngine, ReputationScore};
pub use schema::SchemaSet;
pub use utils::*;
pub use validation::{EventValidator, ValidationRules};

/// Protocol version implemented by this crate.
pub const PROTOCOL_VERSION: &str = "0.1.0";
