//! End-to-end marketplace flow: listing to reputation.

use domp_core::{
    compute_event_id,
    escrow::verify_preimage,
    mine_pow,
    pow::verify_anti_spam,
    reputation::{aggregate_from_events, TransactionContext},
    AntiSpamProof, BidAcceptance, BidSubmission, CancelToken, EscrowManager, EscrowState, Event,
    EventContent, EventValidator, Keys, MiningLimits, PaymentConfirmation, PaymentMethod,
    ProductListing, ReceiptConfirmation, ReceiptStatus, ReputationEngine, ReputationScore, Tag,
    UnsignedEvent,
};
use proptest::prelude::*;

const PRICE: i64 = 80_000_000;
const DIFFICULTY: u32 = 8;

fn publish(keys: &Keys, content: EventContent) -> Event {
    let draft = UnsignedEvent::new(keys.public_key_hex(), &content).unwrap();
    let mined = mine_pow(&draft, DIFFICULTY, &MiningLimits::default(), &CancelToken::new()).unwrap();
    let event = mined.draft.sign(keys).unwrap();
    assert_eq!(event.id, mined.id);
    event
}

#[test]
fn test_full_transaction() {
    let seller = Keys::generate();
    let buyer = Keys::generate();
    let validator = EventValidator::default();

    // Seller lists, buyer bids with matching collateral
    let listing = publish(
        &seller,
        EventContent::ProductListing(ProductListing::new(
            "Vintage Camera",
            "Film camera in working condition",
            PRICE,
        )),
    );
    assert!(listing.find_tag("d").is_some());

    let bid = publish(
        &buyer,
        EventContent::BidSubmission(BidSubmission::new(&listing.id, PRICE, PRICE)),
    );
    let acceptance = publish(
        &seller,
        EventContent::BidAcceptance(BidAcceptance::new(&bid.id, "lnbc800m1pexampleinvoice")),
    );
    for event in [&listing, &bid, &acceptance] {
        validator.validate_event(event, true).unwrap();
        assert!(matches!(
            verify_anti_spam(event),
            Ok(AntiSpamProof::Pow { difficulty: DIFFICULTY, .. })
        ));
    }

    // Acceptance opens the escrow
    let escrows = EscrowManager::default();
    let payment_hash = escrows.create_from_events(&listing, &bid, &acceptance).unwrap();
    let escrow = escrows.get(&listing.id).unwrap();
    assert_eq!(escrow.purchase_amount_sats, 80_000_000);
    assert_eq!(escrow.buyer_collateral_sats, 80_000_000);
    assert_eq!(escrow.state, EscrowState::Pending);

    // Collateral proof is required before the escrow locks
    assert_eq!(escrows.fund(&listing.id, &payment_hash, None, None), Ok(false));
    assert_eq!(
        escrows.fund(&listing.id, &payment_hash, Some(&payment_hash), None),
        Ok(true)
    );
    assert_eq!(escrows.get(&listing.id).unwrap().state, EscrowState::Active);

    let payment = publish(
        &buyer,
        EventContent::PaymentConfirmation(PaymentConfirmation::new(
            &acceptance.id,
            &payment_hash,
            PaymentMethod::LightningHtlc,
        )),
    );

    // Seller ships; release reveals the preimage exactly once
    let preimage = escrows.release(&listing.id).unwrap();
    assert!(verify_preimage(&preimage, &payment_hash));
    assert_eq!(escrows.get(&listing.id).unwrap().state, EscrowState::Completed);
    assert!(escrows.release(&listing.id).is_err());

    let receipt = publish(
        &buyer,
        EventContent::ReceiptConfirmation(
            ReceiptConfirmation::new(&payment.id, ReceiptStatus::Received).with_rating(5),
        ),
    );

    let chain = vec![listing, bid, acceptance, payment, receipt];
    assert_eq!(validator.validate_chain(&chain).unwrap().len(), 5);

    // The receipt feeds the seller's reputation
    let engine = ReputationEngine::default();
    let context = TransactionContext {
        seller_pubkey: seller.public_key_hex(),
        amount_sats: 80_000_000,
    };
    engine
        .add_score(ReputationScore::from_receipt(&chain[4], &context).unwrap())
        .unwrap();
    let rep = engine.get_reputation(&seller.public_key_hex()).unwrap();
    assert_eq!(rep.overall_score, 5.0);
    assert_eq!(rep.total_transactions, 1);

    let derived = aggregate_from_events(&chain).unwrap();
    assert_eq!(derived.get_reputation(&seller.public_key_hex()), Some(rep));
    let trust = derived.trust_score(&seller.public_key_hex());
    assert!(trust > 0.5 && trust <= 1.0);
}

#[test]
fn test_tampered_chain_is_rejected() {
    let seller = Keys::generate();
    let buyer = Keys::generate();

    let listing = publish(
        &seller,
        EventContent::ProductListing(ProductListing::new("Widget", "Blue", 1_000)),
    );
    let stranger = publish(
        &seller,
        EventContent::ProductListing(ProductListing::new("Other", "Red", 1_000)),
    );
    let bid = publish(
        &buyer,
        EventContent::BidSubmission(BidSubmission::new(&stranger.id, 1_000, 0)),
    );

    let escrows = EscrowManager::default();
    let acceptance = publish(
        &seller,
        EventContent::BidAcceptance(BidAcceptance::new(&bid.id, "lntb10u1p")),
    );
    assert!(escrows.create_from_events(&listing, &bid, &acceptance).is_err());
    assert!(escrows.is_empty());
}

proptest! {
    #[test]
    fn prop_event_id_is_deterministic(
        created_at in 0u64..4_000_000_000,
        kind in prop::sample::select(vec![300u32, 301, 303, 311, 313]),
        tags in prop::collection::vec(prop::collection::vec("[a-z0-9]{0,8}", 1..4), 0..4),
        content in "\\PC{0,40}",
    ) {
        let pubkey = "ee96d4b9c5e16f3b11e33bb27fe39ae7a57daa6b24210de5b39237993742cc0a";
        let tags: Vec<Tag> = tags.into_iter().map(Tag).collect();
        let first = compute_event_id(pubkey, created_at, kind, &tags, &content);
        let second = compute_event_id(pubkey, created_at, kind, &tags, &content);
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first.len(), 64);
    }

    #[test]
    fn prop_reordering_tag_strings_changes_id(
        a in "[a-z]{1,8}",
        b in "[A-Z]{1,8}",
    ) {
        let pubkey = "ee96d4b9c5e16f3b11e33bb27fe39ae7a57daa6b24210de5b39237993742cc0a";
        let forward = vec![Tag::new([a.as_str(), b.as_str()])];
        let reversed = vec![Tag::new([b.as_str(), a.as_str()])];
        prop_assert_ne!(
            compute_event_id(pubkey, 1, 300, &forward, "{}"),
            compute_event_id(pubkey, 1, 300, &reversed, "{}")
        );
    }

    #[test]
    fn prop_signatures_verify(message in "\\PC{0,64}") {
        let keys = Keys::generate();
        let id = domp_core::sha256_hash(&message);
        let sig = keys.sign_id(&id).unwrap();
        prop_assert!(domp_core::verify(&id, &sig, &keys.public_key_hex()));
    }
}
