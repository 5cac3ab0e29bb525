//! Common test utilities for domp-core tests.
//!
//! Builders for signed events and complete transaction chains shared by the
//! module tests.

use crate::content::{
    BidAcceptance, BidSubmission, EventContent, PaymentConfirmation, PaymentMethod, ProductListing,
    ReceiptConfirmation, ReceiptStatus,
};
use crate::event::{Event, UnsignedEvent};
use crate::keys::Keys;
use crate::pow::AntiSpamProof;
use crate::utils::sha256_hash;

/// Unsigned listing for `keys`, without an anti-spam tag.
pub fn listing_draft(keys: &Keys) -> UnsignedEvent {
    let listing = EventContent::ProductListing(ProductListing::new(
        "Vintage Camera",
        "Film camera in working condition",
        80_000_000,
    ));
    UnsignedEvent::new(keys.public_key_hex(), &listing).unwrap()
}

/// Sign `content` with a Lightning payment-hash proof, the cheapest valid
/// anti-spam tag.
pub fn sign_with_ln_proof(keys: &Keys, content: &EventContent) -> Event {
    let payment_hash = sha256_hash(&content.to_json().unwrap());
    UnsignedEvent::new(keys.public_key_hex(), content)
        .unwrap()
        .with_proof(&AntiSpamProof::Lightning { payment_hash })
        .sign(keys)
        .unwrap()
}

/// A complete, correctly linked transaction.
pub struct TestChain {
    pub seller: Keys,
    pub buyer: Keys,
    /// Listing, bid, acceptance, payment, receipt.
    pub events: Vec<Event>,
}

/// Build a signed five-event transaction for a listing at `price` and a bid
/// of `bid` sats.
pub fn transaction_chain(price: i64, bid: i64) -> TestChain {
    let seller = Keys::generate();
    let buyer = Keys::generate();

    let listing = sign_with_ln_proof(
        &seller,
        &EventContent::ProductListing(ProductListing::new(
            "Vintage Camera",
            "Film camera in working condition",
            price,
        )),
    );
    let bid = sign_with_ln_proof(
        &buyer,
        &EventContent::BidSubmission(BidSubmission::new(&listing.id, bid, 0)),
    );
    let acceptance = sign_with_ln_proof(
        &seller,
        &EventContent::BidAcceptance(BidAcceptance::new(&bid.id, "lnbc800m1pexample")),
    );
    let payment = sign_with_ln_proof(
        &buyer,
        &EventContent::PaymentConfirmation(PaymentConfirmation::new(
            &acceptance.id,
            &"aa".repeat(32),
            PaymentMethod::LightningHtlc,
        )),
    );
    let receipt = sign_with_ln_proof(
        &buyer,
        &EventContent::ReceiptConfirmation(
            ReceiptConfirmation::new(&payment.id, ReceiptStatus::Received).with_rating(5),
        ),
    );

    TestChain {
        seller,
        buyer,
        events: vec![listing, bid, acceptance, payment, receipt],
    }
}
