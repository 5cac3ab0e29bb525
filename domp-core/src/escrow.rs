//! # HTLC Escrow
//!
//! Tracks the lifecycle of a hash-time-locked escrow for each transaction:
//!
//! ```text
//! Pending --fund--> Active --release--> Completed
//!    |                 |--sweep_timeouts--> Expired
//!    |                 |                        |
//!    +------refund-----+---------refund---------+--> Refunded
//! ```
//!
//! The payment preimage stays inside the manager until [`EscrowManager::release`]
//! hands it out. It is never serialized and never logged.

use bitcoin::hashes::{sha256, Hash};
use parking_lot::{Mutex, RwLock};
use secp256k1::rand::{thread_rng, RngCore};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{
    content::{EventContent, DEFAULT_HTLC_TIMEOUT_BLOCKS},
    error::EscrowError,
    event::Event,
    utils::now_unix,
};

/// Average seconds per Bitcoin block, used to turn block timeouts into time.
pub const BLOCK_INTERVAL_SECS: u64 = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowState {
    /// Created, waiting for funds.
    Pending,
    /// Funded and locked.
    Active,
    /// Preimage released to the seller.
    Completed,
    /// Funds returned to the buyer.
    Refunded,
    /// Timed out while active.
    Expired,
}

impl EscrowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Refunded => "refunded",
            Self::Expired => "expired",
        }
    }

    /// Whether the escrow has left the funding lifecycle. An expired escrow
    /// is terminal but can still be refunded.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Refunded | Self::Expired)
    }
}

impl fmt::Display for EscrowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of an escrow's audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: EscrowState,
    pub to: EscrowState,
    pub at: u64,
}

/// Parameters for a new escrow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowParams {
    pub transaction_id: String,
    pub buyer_pubkey: String,
    pub seller_pubkey: String,
    pub purchase_amount_sats: u64,
    pub buyer_collateral_sats: u64,
    pub seller_collateral_sats: u64,
    pub timeout_blocks: u32,
}

impl EscrowParams {
    /// Purchase amount plus both collaterals, or an error if the sum overflows.
    pub fn total_sats(&self) -> Result<u64, EscrowError> {
        self.purchase_amount_sats
            .checked_add(self.buyer_collateral_sats)
            .and_then(|sum| sum.checked_add(self.seller_collateral_sats))
            .ok_or_else(|| EscrowError::Overflow {
                field: "total_locked_sats",
                reason: format!(
                    "{} + {} + {} sats",
                    self.purchase_amount_sats, self.buyer_collateral_sats, self.seller_collateral_sats
                ),
            })
    }
}

/// An HTLC escrow.
#[derive(Clone, Serialize)]
pub struct HtlcEscrow {
    pub transaction_id: String,
    pub buyer_pubkey: String,
    pub seller_pubkey: String,
    pub purchase_amount_sats: u64,
    pub buyer_collateral_sats: u64,
    pub seller_collateral_sats: u64,
    /// SHA-256 of the preimage, hex.
    pub payment_hash: String,
    #[serde(skip)]
    payment_preimage: String,
    pub timeout_blocks: u32,
    pub state: EscrowState,
    pub created_at: u64,
    pub expires_at: u64,
    pub buyer_payment_hash: Option<String>,
    pub buyer_collateral_hash: Option<String>,
    pub seller_collateral_hash: Option<String>,
    history: Vec<Transition>,
}

impl HtlcEscrow {
    fn new(params: EscrowParams, now: u64) -> Result<Self, EscrowError> {
        params.total_sats()?;
        let expires_at = u64::from(params.timeout_blocks)
            .checked_mul(BLOCK_INTERVAL_SECS)
            .and_then(|timeout| now.checked_add(timeout))
            .ok_or_else(|| EscrowError::Overflow {
                field: "expires_at",
                reason: format!("{now} + {} blocks", params.timeout_blocks),
            })?;

        let mut preimage = [0u8; 32];
        thread_rng().fill_bytes(&mut preimage);
        let payment_hash = sha256::Hash::hash(&preimage).to_string();

        Ok(Self {
            transaction_id: params.transaction_id,
            buyer_pubkey: params.buyer_pubkey,
            seller_pubkey: params.seller_pubkey,
            purchase_amount_sats: params.purchase_amount_sats,
            buyer_collateral_sats: params.buyer_collateral_sats,
            seller_collateral_sats: params.seller_collateral_sats,
            payment_hash,
            payment_preimage: hex::encode(preimage),
            timeout_blocks: params.timeout_blocks,
            state: EscrowState::Pending,
            created_at: now,
            expires_at,
            buyer_payment_hash: None,
            buyer_collateral_hash: None,
            seller_collateral_hash: None,
            history: Vec::new(),
        })
    }

    /// Every state change so far, oldest first.
    pub fn history(&self) -> &[Transition] {
        &self.history
    }

    /// Sum of purchase amount and both collaterals. Escrows are only created
    /// when this sum fits in a `u64`.
    pub fn total_locked_sats(&self) -> u64 {
        self.purchase_amount_sats
            .saturating_add(self.buyer_collateral_sats)
            .saturating_add(self.seller_collateral_sats)
    }

    fn transition(&mut self, allowed: &[EscrowState], to: EscrowState, at: u64) -> Result<(), EscrowError> {
        if !allowed.contains(&self.state) {
            warn!(
                transaction_id = %self.transaction_id,
                from = %self.state,
                to = %to,
                "rejected escrow transition"
            );
            return Err(EscrowError::InvalidStateTransition {
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        info!(
            transaction_id = %self.transaction_id,
            from = %self.state,
            to = %to,
            "escrow transition"
        );
        self.history.push(Transition {
            from: self.state,
            to,
            at,
        });
        self.state = to;
        Ok(())
    }
}

impl fmt::Debug for HtlcEscrow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HtlcEscrow")
            .field("transaction_id", &self.transaction_id)
            .field("buyer_pubkey", &self.buyer_pubkey)
            .field("seller_pubkey", &self.seller_pubkey)
            .field("purchase_amount_sats", &self.purchase_amount_sats)
            .field("buyer_collateral_sats", &self.buyer_collateral_sats)
            .field("seller_collateral_sats", &self.seller_collateral_sats)
            .field("payment_hash", &self.payment_hash)
            .field("state", &self.state)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Snapshot of an escrow for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowSummary {
    pub transaction_id: String,
    pub state: EscrowState,
    pub purchase_amount_sats: u64,
    pub buyer_collateral_sats: u64,
    pub seller_collateral_sats: u64,
    pub total_locked_sats: u64,
    pub payment_hash: String,
    pub created_at: u64,
    pub expires_at: u64,
    pub time_remaining_secs: u64,
}

/// Owns all escrows, keyed by transaction id.
///
/// Each escrow sits behind its own lock, so operations on one transaction
/// never wait on another.
#[derive(Debug)]
pub struct EscrowManager {
    escrows: RwLock<HashMap<String, Arc<Mutex<HtlcEscrow>>>>,
    default_timeout_blocks: u32,
}

impl Default for EscrowManager {
    fn default() -> Self {
        Self::new(DEFAULT_HTLC_TIMEOUT_BLOCKS)
    }
}

impl EscrowManager {
    pub fn new(default_timeout_blocks: u32) -> Self {
        Self {
            escrows: RwLock::new(HashMap::new()),
            default_timeout_blocks,
        }
    }

    /// Create an escrow, returning its payment hash.
    pub fn create(&self, params: EscrowParams) -> Result<String, EscrowError> {
        self.create_at(params, now_unix())
    }

    pub fn create_at(&self, params: EscrowParams, now: u64) -> Result<String, EscrowError> {
        let mut escrows = self.escrows.write();
        if escrows.contains_key(&params.transaction_id) {
            warn!(transaction_id = %params.transaction_id, "duplicate escrow");
            return Err(EscrowError::AlreadyExists(params.transaction_id));
        }

        let escrow = match HtlcEscrow::new(params, now) {
            Ok(escrow) => escrow,
            Err(e) => {
                warn!(error = %e, "rejected escrow parameters");
                return Err(e);
            }
        };
        let payment_hash = escrow.payment_hash.clone();
        info!(
            transaction_id = %escrow.transaction_id,
            amount_sats = escrow.purchase_amount_sats,
            timeout_blocks = escrow.timeout_blocks,
            payment_hash = %payment_hash,
            "escrow created"
        );
        escrows.insert(escrow.transaction_id.clone(), Arc::new(Mutex::new(escrow)));
        Ok(payment_hash)
    }

    /// Create an escrow for an accepted bid.
    ///
    /// The listing id becomes the transaction id. The bid must reference the
    /// listing and the acceptance must reference the bid.
    pub fn create_from_events(
        &self,
        listing: &Event,
        bid: &Event,
        acceptance: &Event,
    ) -> Result<String, EscrowError> {
        let parse = |event: &Event| {
            event
                .parse_content()
                .map_err(|e| EscrowError::InvalidEvents(format!("event {}: {e}", event.id)))
        };
        let (
            EventContent::ProductListing(listing_content),
            EventContent::BidSubmission(bid_content),
            EventContent::BidAcceptance(acceptance_content),
        ) = (parse(listing)?, parse(bid)?, parse(acceptance)?)
        else {
            return Err("expected a listing, a bid and an acceptance".into());
        };

        if bid_content.product_ref != listing.id {
            return Err("bid does not reference the listing".into());
        }
        if acceptance_content.bid_ref != bid.id {
            return Err("acceptance does not reference the bid".into());
        }

        let sats = |field: &str, value: i64| {
            u64::try_from(value)
                .map_err(|_| EscrowError::InvalidEvents(format!("{field} cannot be negative")))
        };
        let params = EscrowParams {
            transaction_id: listing.id.clone(),
            buyer_pubkey: bid.pubkey.clone(),
            seller_pubkey: listing.pubkey.clone(),
            purchase_amount_sats: sats("bid_amount_satoshis", bid_content.bid_amount_satoshis)?,
            buyer_collateral_sats: sats(
                "buyer_collateral_satoshis",
                bid_content.buyer_collateral_satoshis,
            )?,
            seller_collateral_sats: sats(
                "seller_collateral_satoshis",
                listing_content.seller_collateral_satoshis.unwrap_or(0),
            )?,
            timeout_blocks: acceptance_content
                .htlc_timeout_blocks
                .unwrap_or(self.default_timeout_blocks),
        };
        self.create(params)
    }

    /// Record funding proofs.
    ///
    /// Only a pending escrow can be funded. It becomes active once the buyer
    /// payment hash is present and every non-zero collateral has a hash;
    /// returns whether that happened.
    pub fn fund(
        &self,
        transaction_id: &str,
        buyer_payment_hash: &str,
        buyer_collateral_hash: Option<&str>,
        seller_collateral_hash: Option<&str>,
    ) -> Result<bool, EscrowError> {
        self.with_escrow(transaction_id, |escrow| {
            if escrow.state != EscrowState::Pending {
                warn!(transaction_id, state = %escrow.state, "escrow is not awaiting funds");
                return Err(EscrowError::InvalidStateTransition {
                    from: escrow.state.to_string(),
                    to: EscrowState::Active.to_string(),
                });
            }

            let non_empty = |hash: Option<&str>| hash.filter(|h| !h.is_empty()).map(str::to_string);
            if let Some(hash) = non_empty(Some(buyer_payment_hash)) {
                escrow.buyer_payment_hash = Some(hash);
            }
            if let Some(hash) = non_empty(buyer_collateral_hash) {
                escrow.buyer_collateral_hash = Some(hash);
            }
            if let Some(hash) = non_empty(seller_collateral_hash) {
                escrow.seller_collateral_hash = Some(hash);
            }

            let funded = escrow.buyer_payment_hash.is_some()
                && (escrow.buyer_collateral_sats == 0 || escrow.buyer_collateral_hash.is_some())
                && (escrow.seller_collateral_sats == 0 || escrow.seller_collateral_hash.is_some());
            if !funded {
                debug!(transaction_id, "escrow still waiting for funds");
                return Ok(false);
            }

            escrow.transition(&[EscrowState::Pending], EscrowState::Active, now_unix())?;
            Ok(true)
        })
    }

    /// Complete an active escrow and hand out the preimage.
    pub fn release(&self, transaction_id: &str) -> Result<String, EscrowError> {
        self.with_escrow(transaction_id, |escrow| {
            escrow.transition(&[EscrowState::Active], EscrowState::Completed, now_unix())?;
            Ok(escrow.payment_preimage.clone())
        })
    }

    /// Return funds to the buyer. Completed and refunded escrows cannot be
    /// refunded.
    pub fn refund(&self, transaction_id: &str) -> Result<(), EscrowError> {
        self.with_escrow(transaction_id, |escrow| {
            escrow.transition(
                &[EscrowState::Pending, EscrowState::Active, EscrowState::Expired],
                EscrowState::Refunded,
                now_unix(),
            )
        })
    }

    /// Expire every active escrow whose deadline is before `now`. Returns the
    /// expired transaction ids, sorted.
    pub fn sweep_timeouts(&self, now: u64) -> Vec<String> {
        let mut expired: Vec<String> = self
            .escrows
            .read()
            .values()
            .filter_map(|escrow| {
                let mut escrow = escrow.lock();
                if escrow.state == EscrowState::Active && escrow.expires_at < now {
                    escrow
                        .transition(&[EscrowState::Active], EscrowState::Expired, now)
                        .ok()
                        .map(|_| escrow.transaction_id.clone())
                } else {
                    None
                }
            })
            .collect();
        expired.sort();
        if !expired.is_empty() {
            info!(count = expired.len(), "expired escrows");
        }
        expired
    }

    pub fn get(&self, transaction_id: &str) -> Option<HtlcEscrow> {
        let escrow = self.escrows.read().get(transaction_id).cloned()?;
        let escrow = escrow.lock().clone();
        Some(escrow)
    }

    pub fn payment_hash(&self, transaction_id: &str) -> Option<String> {
        self.get(transaction_id).map(|e| e.payment_hash)
    }

    pub fn summary(&self, transaction_id: &str, now: u64) -> Option<EscrowSummary> {
        self.get(transaction_id).map(|escrow| EscrowSummary {
            transaction_id: escrow.transaction_id.clone(),
            state: escrow.state,
            purchase_amount_sats: escrow.purchase_amount_sats,
            buyer_collateral_sats: escrow.buyer_collateral_sats,
            seller_collateral_sats: escrow.seller_collateral_sats,
            total_locked_sats: escrow.total_locked_sats(),
            payment_hash: escrow.payment_hash.clone(),
            created_at: escrow.created_at,
            expires_at: escrow.expires_at,
            time_remaining_secs: escrow.expires_at.saturating_sub(now),
        })
    }

    /// Transaction ids in `state`, sorted.
    pub fn list_by_state(&self, state: EscrowState) -> Vec<String> {
        let mut ids: Vec<String> = self
            .escrows
            .read()
            .iter()
            .filter(|(_, escrow)| escrow.lock().state == state)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.escrows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_escrow<T>(
        &self,
        transaction_id: &str,
        f: impl FnOnce(&mut HtlcEscrow) -> Result<T, EscrowError>,
    ) -> Result<T, EscrowError> {
        let escrow = self
            .escrows
            .read()
            .get(transaction_id)
            .cloned()
            .ok_or_else(|| EscrowError::NotFound(transaction_id.to_string()))?;
        let mut escrow = escrow.lock();
        f(&mut escrow)
    }
}

/// Whether `preimage_hex` hashes to `payment_hash_hex`.
pub fn verify_preimage(preimage_hex: &str, payment_hash_hex: &str) -> bool {
    match hex::decode(preimage_hex) {
        Ok(preimage) => sha256::Hash::hash(&preimage)
            .to_string()
            .eq_ignore_ascii_case(payment_hash_hex),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{BidAcceptance, BidSubmission, ProductListing};
    use crate::keys::Keys;
    use crate::test_utils::{sign_with_ln_proof, transaction_chain};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const NOW: u64 = 1_735_689_600;

    fn params(id: &str, buyer_collateral: u64, seller_collateral: u64) -> EscrowParams {
        EscrowParams {
            transaction_id: id.to_string(),
            buyer_pubkey: "buyer".into(),
            seller_pubkey: "seller".into(),
            purchase_amount_sats: 80_000_000,
            buyer_collateral_sats: buyer_collateral,
            seller_collateral_sats: seller_collateral,
            timeout_blocks: 144,
        }
    }

    #[test]
    fn test_create_escrow() {
        let manager = EscrowManager::default();
        let hash = manager.create_at(params("tx1", 0, 0), NOW).unwrap();
        let escrow = manager.get("tx1").unwrap();

        assert_eq!(hash.len(), 64);
        assert_eq!(escrow.payment_hash, hash);
        assert_eq!(escrow.state, EscrowState::Pending);
        assert_eq!(escrow.expires_at, NOW + 144 * 600);
        assert!(escrow.history().is_empty());
    }

    #[test]
    fn test_duplicate_transaction_id() {
        let manager = EscrowManager::default();
        manager.create(params("tx1", 0, 0)).unwrap();
        assert_eq!(
            manager.create(params("tx1", 0, 0)),
            Err(EscrowError::AlreadyExists("tx1".into()))
        );
    }

    #[test]
    fn test_fund_waits_for_collateral() {
        let manager = EscrowManager::default();
        manager.create(params("tx1", 1000, 2000)).unwrap();

        assert_eq!(manager.fund("tx1", "pay", Some("bc"), None), Ok(false));
        assert_eq!(manager.get("tx1").unwrap().state, EscrowState::Pending);

        assert_eq!(manager.fund("tx1", "pay", None, Some("sc")), Ok(true));
        let escrow = manager.get("tx1").unwrap();
        assert_eq!(escrow.state, EscrowState::Active);
        assert_eq!(escrow.buyer_collateral_hash.as_deref(), Some("bc"));
        assert_eq!(escrow.history().len(), 1);
    }

    #[test]
    fn test_fund_requires_payment_hash() {
        let manager = EscrowManager::default();
        manager.create(params("tx1", 0, 0)).unwrap();
        assert_eq!(manager.fund("tx1", "", None, None), Ok(false));
        assert_eq!(manager.fund("tx1", "pay", None, None), Ok(true));
        assert!(matches!(
            manager.fund("tx1", "pay", None, None),
            Err(EscrowError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn test_release_hands_out_matching_preimage_once() {
        let manager = EscrowManager::default();
        let hash = manager.create(params("tx1", 0, 0)).unwrap();

        assert!(manager.release("tx1").is_err());
        manager.fund("tx1", "pay", None, None).unwrap();

        let preimage = manager.release("tx1").unwrap();
        assert!(verify_preimage(&preimage, &hash));
        assert_eq!(manager.get("tx1").unwrap().state, EscrowState::Completed);
        assert_eq!(
            manager.release("tx1"),
            Err(EscrowError::InvalidStateTransition {
                from: "completed".into(),
                to: "completed".into()
            })
        );
    }

    #[test]
    fn test_refund_guard() {
        let manager = EscrowManager::default();
        manager.create(params("pending", 0, 0)).unwrap();
        assert_eq!(manager.refund("pending"), Ok(()));
        assert!(manager.refund("pending").is_err());

        manager.create(params("done", 0, 0)).unwrap();
        manager.fund("done", "pay", None, None).unwrap();
        manager.release("done").unwrap();
        assert_eq!(
            manager.refund("done"),
            Err(EscrowError::InvalidStateTransition {
                from: "completed".into(),
                to: "refunded".into()
            })
        );
    }

    #[test]
    fn test_sweep_expires_only_overdue_active() {
        let manager = EscrowManager::default();
        manager.create_at(params("active", 0, 0), NOW).unwrap();
        manager.create_at(params("pending", 0, 0), NOW).unwrap();
        manager.fund("active", "pay", None, None).unwrap();

        let deadline = NOW + 144 * 600;
        assert!(manager.sweep_timeouts(deadline).is_empty());
        assert_eq!(manager.sweep_timeouts(deadline + 1), vec!["active".to_string()]);
        assert_eq!(manager.list_by_state(EscrowState::Expired), vec!["active".to_string()]);
        assert_eq!(manager.list_by_state(EscrowState::Pending), vec!["pending".to_string()]);

        // expired escrows can still be refunded
        assert_eq!(manager.refund("active"), Ok(()));
        let history = manager.get("active").unwrap().history().to_vec();
        let states: Vec<_> = history.iter().map(|t| t.to).collect();
        assert_eq!(
            states,
            vec![EscrowState::Active, EscrowState::Expired, EscrowState::Refunded]
        );
    }

    #[test]
    fn test_unknown_transaction() {
        let manager = EscrowManager::default();
        assert_eq!(manager.refund("nope"), Err(EscrowError::NotFound("nope".into())));
        assert!(manager.get("nope").is_none());
        assert!(manager.summary("nope", NOW).is_none());
    }

    #[test]
    fn test_summary() {
        let manager = EscrowManager::default();
        manager.create_at(params("tx1", 1000, 2000), NOW).unwrap();
        let summary = manager.summary("tx1", NOW + 600).unwrap();
        assert_eq!(summary.total_locked_sats, 80_003_000);
        assert_eq!(summary.time_remaining_secs, 143 * 600);
        assert_eq!(manager.summary("tx1", NOW + 10 * 144 * 600).unwrap().time_remaining_secs, 0);
    }

    #[test]
    fn test_preimage_never_leaks() {
        let manager = EscrowManager::default();
        manager.create(params("tx1", 0, 0)).unwrap();
        manager.fund("tx1", "pay", None, None).unwrap();
        let escrow = manager.get("tx1").unwrap();
        let preimage = manager.release("tx1").unwrap();

        assert!(!format!("{escrow:?}").contains(&preimage));
        let json = serde_json::to_string(&escrow).unwrap();
        assert!(!json.contains(&preimage));
        assert!(!json.contains("payment_preimage"));
    }

    #[test]
    fn test_verify_preimage_rejects_garbage() {
        assert!(!verify_preimage("zz", &"00".repeat(32)));
        assert!(!verify_preimage("00", &"00".repeat(32)));
    }

    #[test]
    fn test_create_from_events() {
        let chain = transaction_chain(80_000_000, 80_000_000);
        let manager = EscrowManager::default();
        let hash = manager
            .create_from_events(&chain.events[0], &chain.events[1], &chain.events[2])
            .unwrap();

        let escrow = manager.get(&chain.events[0].id).unwrap();
        assert_eq!(escrow.payment_hash, hash);
        assert_eq!(escrow.seller_pubkey, chain.seller.public_key_hex());
        assert_eq!(escrow.buyer_pubkey, chain.buyer.public_key_hex());
        assert_eq!(escrow.purchase_amount_sats, 80_000_000);
        assert_eq!(escrow.timeout_blocks, DEFAULT_HTLC_TIMEOUT_BLOCKS);

        assert!(matches!(
            manager.create_from_events(&chain.events[0], &chain.events[2], &chain.events[1]),
            Err(EscrowError::InvalidEvents(_))
        ));
    }

    #[test]
    fn test_terminal_states() {
        assert!(!EscrowState::Pending.is_terminal());
        assert!(!EscrowState::Active.is_terminal());
        assert!(EscrowState::Completed.is_terminal());
        assert!(EscrowState::Refunded.is_terminal());
        assert!(EscrowState::Expired.is_terminal());
    }

    #[test]
    fn test_rejects_overflowing_amounts() {
        let manager = EscrowManager::default();
        let mut huge = params("tx1", u64::MAX, 1);
        huge.purchase_amount_sats = 1;
        assert!(matches!(
            manager.create_at(huge, NOW),
            Err(EscrowError::Overflow { field: "total_locked_sats", .. })
        ));
        assert!(manager.is_empty());

        assert!(matches!(
            manager.create_at(params("tx2", 0, 0), u64::MAX),
            Err(EscrowError::Overflow { field: "expires_at", .. })
        ));
        assert!(manager.is_empty());
    }

    #[test]
    fn test_max_amounts_from_events() {
        let seller = Keys::generate();
        let buyer = Keys::generate();

        let mut listing = ProductListing::new("Camera", "Film camera", i64::MAX);
        listing.seller_collateral_satoshis = Some(i64::MAX);
        let listing = sign_with_ln_proof(&seller, &EventContent::ProductListing(listing));
        let bid = sign_with_ln_proof(
            &buyer,
            &EventContent::BidSubmission(BidSubmission::new(&listing.id, i64::MAX, i64::MAX)),
        );
        let acceptance = sign_with_ln_proof(
            &seller,
            &EventContent::BidAcceptance(BidAcceptance::new(&bid.id, "lnbc1pexample")),
        );

        let manager = EscrowManager::default();
        assert!(matches!(
            manager.create_from_events(&listing, &bid, &acceptance),
            Err(EscrowError::Overflow { .. })
        ));
        assert!(manager.summary(&listing.id, 0).is_none());

        // two maximal amounts still fit
        let mut fits = params("tx1", i64::MAX as u64, 0);
        fits.purchase_amount_sats = i64::MAX as u64;
        manager.create_at(fits, NOW).unwrap();
        let summary = manager.summary("tx1", NOW).unwrap();
        assert_eq!(summary.total_locked_sats, u64::MAX - 1);
    }

    #[test]
    fn test_same_escrow_raced_across_threads() {
        let manager = EscrowManager::default();
        let hash = manager.create(params("tx1", 0, 0)).unwrap();
        let activated = AtomicUsize::new(0);
        let preimages = Mutex::new(Vec::new());

        std::thread::scope(|scope| {
            for _ in 0..16 {
                scope.spawn(|| {
                    if manager.fund("tx1", "pay", None, None) == Ok(true) {
                        activated.fetch_add(1, Ordering::SeqCst);
                    }
                    if let Ok(preimage) = manager.release("tx1") {
                        preimages.lock().push(preimage);
                    }
                });
            }
        });

        assert_eq!(activated.load(Ordering::SeqCst), 1);
        let preimages = preimages.into_inner();
        assert_eq!(preimages.len(), 1);
        assert!(verify_preimage(&preimages[0], &hash));

        let escrow = manager.get("tx1").unwrap();
        assert_eq!(escrow.state, EscrowState::Completed);
        let states: Vec<_> = escrow.history().iter().map(|t| t.to).collect();
        assert_eq!(states, vec![EscrowState::Active, EscrowState::Completed]);
    }

    #[test]
    fn test_independent_escrows_in_parallel() {
        let manager = EscrowManager::default();
        for i in 0..8 {
            manager.create(params(&format!("tx{i}"), 0, 0)).unwrap();
        }
        std::thread::scope(|scope| {
            for i in 0..8 {
                let manager = &manager;
                scope.spawn(move || {
                    let id = format!("tx{i}");
                    assert_eq!(manager.fund(&id, "pay", None, None), Ok(true));
                    manager.release(&id).unwrap();
                });
            }
        });
        assert_eq!(manager.list_by_state(EscrowState::Completed).len(), 8);
    }
}
