//! # Reputation
//!
//! Scores are recorded per (reviewer, reviewed, transaction) and folded into an
//! [`AggregatedReputation`] for the reviewed pubkey each time one is added.
//!
//! Each score is weighted by age, volume and verification:
//!
//! ```text
//! w = decay^days * (1 + volume_factor * sats / 1_000_000) * (1 + bonus * verified + bonus * escrow)
//! ```
//!
//! and the trust score combines the weighted rating with volume, verification
//! rate, reviewer diversity and recency into a value in `[0, 1]`.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::{debug, info, warn};

use crate::{
    config::ReputationConfig,
    content::{EventContent, ReceiptConfirmation, ReceiptStatus},
    error::ReputationError,
    event::{Event, Kind},
    utils::{now_unix, satoshi_to_btc, short_key, SECONDS_PER_DAY},
};

/// A single review of a marketplace participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReputationScore {
    pub transaction_id: String,
    pub reviewer_pubkey: String,
    pub reviewed_pubkey: String,
    /// 1 to 5.
    pub overall_rating: u8,
    pub item_quality: Option<u8>,
    pub shipping_speed: Option<u8>,
    pub communication: Option<u8>,
    pub payment_reliability: Option<u8>,
    pub transaction_amount_sats: u64,
    pub verified_purchase: bool,
    pub escrow_completed: bool,
    pub disputed: bool,
    pub review_timestamp: u64,
    #[serde(default)]
    pub review_text: String,
}

/// What a receipt alone does not say about its transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionContext {
    pub seller_pubkey: String,
    pub amount_sats: u64,
}

impl ReputationScore {
    pub fn new(
        transaction_id: &str,
        reviewer_pubkey: &str,
        reviewed_pubkey: &str,
        overall_rating: u8,
        transaction_amount_sats: u64,
        review_timestamp: u64,
    ) -> Self {
        Self {
            transaction_id: transaction_id.to_string(),
            reviewer_pubkey: reviewer_pubkey.to_string(),
            reviewed_pubkey: reviewed_pubkey.to_string(),
            overall_rating,
            item_quality: None,
            shipping_speed: None,
            communication: None,
            payment_reliability: None,
            transaction_amount_sats,
            verified_purchase: false,
            escrow_completed: false,
            disputed: false,
            review_timestamp,
            review_text: String::new(),
        }
    }

    /// Build a score from a receipt confirmation event.
    ///
    /// A receipt is a verified purchase that went through escrow. Missing
    /// ratings default to 5, item quality is 5 only when the item arrived as
    /// described, and any status other than `received` marks the score as
    /// disputed.
    pub fn from_receipt(event: &Event, context: &TransactionContext) -> Result<Self, ReputationError> {
        if event.kind != Kind::ReceiptConfirmation.as_u32() {
            return Err(ReputationError::NotAReceipt(format!("kind {}", event.kind)));
        }
        let receipt = match event.parse_content() {
            Ok(EventContent::ReceiptConfirmation(receipt)) => receipt,
            Ok(other) => return Err(ReputationError::NotAReceipt(other.kind().to_string())),
            Err(e) => return Err(ReputationError::NotAReceipt(e.to_string())),
        };
        Self::from_receipt_content(&receipt, &event.pubkey, event.created_at, context)
    }

    fn from_receipt_content(
        receipt: &ReceiptConfirmation,
        reviewer_pubkey: &str,
        created_at: u64,
        context: &TransactionContext,
    ) -> Result<Self, ReputationError> {
        let item_quality = if receipt.item_condition.as_deref() == Some("as_described") {
            5
        } else {
            3
        };
        let disputed = receipt.status.parse::<ReceiptStatus>().ok() != Some(ReceiptStatus::Received);

        Ok(Self {
            transaction_id: receipt.payment_ref.clone(),
            reviewer_pubkey: reviewer_pubkey.to_string(),
            reviewed_pubkey: context.seller_pubkey.clone(),
            overall_rating: rating("overall_rating", receipt.rating.unwrap_or(5))?,
            item_quality: Some(item_quality),
            shipping_speed: Some(rating("shipping_speed", receipt.shipping_rating.unwrap_or(5))?),
            communication: Some(rating(
                "communication",
                receipt.communication_rating.unwrap_or(5),
            )?),
            payment_reliability: Some(5),
            transaction_amount_sats: context.amount_sats,
            verified_purchase: true,
            escrow_completed: true,
            disputed,
            review_timestamp: created_at,
            review_text: receipt.feedback.clone().unwrap_or_default(),
        })
    }

    fn metrics(&self) -> [(&'static str, Option<u8>); 5] {
        [
            ("overall_rating", Some(self.overall_rating)),
            ("item_quality", self.item_quality),
            ("shipping_speed", self.shipping_speed),
            ("communication", self.communication),
            ("payment_reliability", self.payment_reliability),
        ]
    }

    fn validate(&self) -> Result<(), ReputationError> {
        if self.reviewed_pubkey.is_empty() {
            return Err(ReputationError::MissingReviewed);
        }
        for (metric, value) in self.metrics() {
            if let Some(value) = value {
                if !(1..=5).contains(&value) {
                    return Err(ReputationError::InvalidRating { metric, value });
                }
            }
        }
        Ok(())
    }
}

fn rating(metric: &'static str, value: i64) -> Result<u8, ReputationError> {
    match u8::try_from(value) {
        Ok(v @ 1..=5) => Ok(v),
        _ => Err(ReputationError::InvalidRating {
            metric,
            value: value.clamp(0, i64::from(u8::MAX)) as u8,
        }),
    }
}

/// Everything known about one pubkey, recomputed on every new score.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatedReputation {
    pub pubkey: String,
    pub overall_score: f64,
    pub total_transactions: usize,
    pub total_volume_sats: u64,
    pub avg_item_quality: Option<f64>,
    pub avg_shipping_speed: Option<f64>,
    pub avg_communication: Option<f64>,
    pub avg_payment_reliability: Option<f64>,
    pub verified_purchases: usize,
    pub completed_escrows: usize,
    pub dispute_rate: f64,
    pub first_transaction: u64,
    pub last_transaction: u64,
    pub transactions_last_30d: usize,
    pub unique_reviewers: usize,
    /// Gini coefficient of reviews per reviewer; 0 is evenly spread.
    pub review_concentration: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReliabilityTier {
    Excellent,
    Good,
    Average,
    #[serde(rename = "Below Average")]
    BelowAverage,
    Poor,
    #[serde(rename = "New Seller")]
    NewSeller,
    #[serde(rename = "Limited Data")]
    LimitedData,
    #[serde(rename = "No Data")]
    NoData,
}

impl ReliabilityTier {
    pub fn classify(score: f64, transactions: usize, min_reviews: usize) -> Self {
        if transactions == 0 {
            Self::NoData
        } else if transactions < 3 {
            Self::NewSeller
        } else if transactions < min_reviews {
            Self::LimitedData
        } else if score >= 4.5 {
            Self::Excellent
        } else if score >= 4.0 {
            Self::Good
        } else if score >= 3.5 {
            Self::Average
        } else if score >= 2.5 {
            Self::BelowAverage
        } else {
            Self::Poor
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Excellent => "Excellent",
            Self::Good => "Good",
            Self::Average => "Average",
            Self::BelowAverage => "Below Average",
            Self::Poor => "Poor",
            Self::NewSeller => "New Seller",
            Self::LimitedData => "Limited Data",
            Self::NoData => "No Data",
        }
    }
}

impl fmt::Display for ReliabilityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Human-facing view of an [`AggregatedReputation`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReputationSummary {
    /// Truncated pubkey.
    pub pubkey: String,
    pub overall_score: f64,
    pub reliability: ReliabilityTier,
    pub total_transactions: usize,
    pub total_volume_btc: f64,
    pub verified_purchases: usize,
    pub completed_escrows: usize,
    pub item_quality: Option<f64>,
    pub shipping_speed: Option<f64>,
    pub communication: Option<f64>,
    pub payment_reliability: Option<f64>,
    pub unique_reviewers: usize,
    pub review_concentration: f64,
    pub recent_activity: usize,
    pub account_age_days: u64,
}

#[derive(Debug, Default)]
struct Ledger {
    scores: HashMap<String, Vec<ReputationScore>>,
    aggregated: HashMap<String, AggregatedReputation>,
    seen: HashSet<(String, String, String)>,
}

/// Records scores and serves aggregates. Writes are serialized; reads see a
/// consistent snapshot.
#[derive(Debug, Default)]
pub struct ReputationEngine {
    params: ReputationConfig,
    ledger: RwLock<Ledger>,
}

impl ReputationEngine {
    pub fn new(params: ReputationConfig) -> Self {
        Self {
            params,
            ledger: RwLock::new(Ledger::default()),
        }
    }

    pub fn params(&self) -> &ReputationConfig {
        &self.params
    }

    /// Record a score, aging reviews against the current time.
    pub fn add_score(&self, score: ReputationScore) -> Result<(), ReputationError> {
        self.add_score_at(score, now_unix())
    }

    pub fn add_score_at(&self, score: ReputationScore, now: u64) -> Result<(), ReputationError> {
        if let Err(e) = score.validate() {
            warn!(transaction_id = %score.transaction_id, error = %e, "rejected reputation score");
            return Err(e);
        }

        let mut ledger = self.ledger.write();
        let key = (
            score.reviewer_pubkey.clone(),
            score.reviewed_pubkey.clone(),
            score.transaction_id.clone(),
        );
        if ledger.seen.contains(&key) {
            return Err(ReputationError::DuplicateScore {
                reviewer: score.reviewer_pubkey,
                transaction_id: score.transaction_id,
            });
        }
        let pubkey = score.reviewed_pubkey.clone();
        info!(
            reviewed = %short_key(&pubkey),
            transaction_id = %score.transaction_id,
            rating = score.overall_rating,
            "reputation score added"
        );
        let history = ledger.scores.entry(pubkey.clone()).or_default();
        history.push(score);
        let aggregate = aggregate(&pubkey, history, &self.params, now);
        ledger.aggregated.insert(pubkey, aggregate);
        ledger.seen.insert(key);
        Ok(())
    }

    pub fn get_reputation(&self, pubkey: &str) -> Option<AggregatedReputation> {
        self.ledger.read().aggregated.get(pubkey).cloned()
    }

    /// Every score recorded for `pubkey`, in insertion order.
    pub fn scores(&self, pubkey: &str) -> Vec<ReputationScore> {
        self.ledger.read().scores.get(pubkey).cloned().unwrap_or_default()
    }

    pub fn pubkeys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.ledger.read().aggregated.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn summary(&self, pubkey: &str) -> ReputationSummary {
        self.summary_at(pubkey, now_unix())
    }

    pub fn summary_at(&self, pubkey: &str, now: u64) -> ReputationSummary {
        let Some(rep) = self.get_reputation(pubkey) else {
            return ReputationSummary {
                pubkey: short_key(pubkey),
                overall_score: 0.0,
                reliability: ReliabilityTier::NoData,
                total_transactions: 0,
                total_volume_btc: 0.0,
                verified_purchases: 0,
                completed_escrows: 0,
                item_quality: None,
                shipping_speed: None,
                communication: None,
                payment_reliability: None,
                unique_reviewers: 0,
                review_concentration: 0.0,
                recent_activity: 0,
                account_age_days: 0,
            };
        };

        ReputationSummary {
            pubkey: short_key(pubkey),
            overall_score: round_to(rep.overall_score, 2),
            reliability: ReliabilityTier::classify(
                rep.overall_score,
                rep.total_transactions,
                self.params.min_reviews_for_reliability,
            ),
            total_transactions: rep.total_transactions,
            total_volume_btc: satoshi_to_btc(rep.total_volume_sats),
            verified_purchases: rep.verified_purchases,
            completed_escrows: rep.completed_escrows,
            item_quality: rep.avg_item_quality.map(|v| round_to(v, 2)),
            shipping_speed: rep.avg_shipping_speed.map(|v| round_to(v, 2)),
            communication: rep.avg_communication.map(|v| round_to(v, 2)),
            payment_reliability: rep.avg_payment_reliability.map(|v| round_to(v, 2)),
            unique_reviewers: rep.unique_reviewers,
            review_concentration: round_to(rep.review_concentration, 3),
            recent_activity: rep.transactions_last_30d,
            account_age_days: now.saturating_sub(rep.first_transaction) / SECONDS_PER_DAY,
        }
    }

    /// Summaries sorted by overall score, best first.
    pub fn compare_sellers<S: AsRef<str>>(&self, pubkeys: &[S]) -> Vec<ReputationSummary> {
        let now = now_unix();
        let mut summaries: Vec<_> = pubkeys
            .iter()
            .map(|pubkey| self.summary_at(pubkey.as_ref(), now))
            .collect();
        summaries.sort_by(|a, b| b.overall_score.total_cmp(&a.overall_score));
        summaries
    }

    pub fn trust_score(&self, pubkey: &str) -> f64 {
        self.trust_score_at(pubkey, now_unix())
    }

    /// Trust in `[0, 1]`; 0 for a pubkey with no history.
    pub fn trust_score_at(&self, pubkey: &str, now: u64) -> f64 {
        let Some(rep) = self.get_reputation(pubkey) else {
            return 0.0;
        };
        if rep.total_transactions == 0 {
            return 0.0;
        }

        let base = rep.overall_score / 5.0;
        let volume = satoshi_to_btc(rep.total_volume_sats).min(1.0);
        let verification = (rep.verified_purchases + rep.completed_escrows) as f64
            / (2 * rep.total_transactions) as f64;
        let diversity = 1.0 - rep.review_concentration;
        let days_since_last = age_in_days(rep.last_transaction, now);
        let recency = (1.0 - days_since_last / 365.0).max(0.1);

        let trust = base * 0.4 + volume * 0.2 + verification * 0.2 + diversity * 0.1 + recency * 0.1;
        trust.clamp(0.0, 1.0)
    }

    /// Score every receipt in `events` whose transaction can be traced back
    /// through payment, acceptance and bid to a listing. Returns how many
    /// scores were added.
    pub fn ingest_events(&self, events: &[Event]) -> Result<usize, ReputationError> {
        let parsed: HashMap<&str, EventContent> = events
            .iter()
            .filter_map(|event| {
                event
                    .parse_content()
                    .ok()
                    .map(|content| (event.id.as_str(), content))
            })
            .collect();
        let authors: HashMap<&str, &str> = events
            .iter()
            .map(|event| (event.id.as_str(), event.pubkey.as_str()))
            .collect();

        let mut added = 0;
        for event in events {
            let Some(EventContent::ReceiptConfirmation(receipt)) = parsed.get(event.id.as_str()) else {
                continue;
            };
            let Some(context) = resolve_context(receipt, &parsed, &authors) else {
                debug!(receipt = %event.id, "receipt does not resolve to a listing, skipped");
                continue;
            };
            let score = ReputationScore::from_receipt_content(
                receipt,
                &event.pubkey,
                event.created_at,
                &context,
            )?;
            self.add_score(score)?;
            added += 1;
        }
        Ok(added)
    }
}

/// Build an engine from the receipts in a set of events.
pub fn aggregate_from_events(events: &[Event]) -> Result<ReputationEngine, ReputationError> {
    let engine = ReputationEngine::default();
    engine.ingest_events(events)?;
    Ok(engine)
}

fn resolve_context(
    receipt: &ReceiptConfirmation,
    parsed: &HashMap<&str, EventContent>,
    authors: &HashMap<&str, &str>,
) -> Option<TransactionContext> {
    let EventContent::PaymentConfirmation(payment) = parsed.get(receipt.payment_ref.as_str())? else {
        return None;
    };
    let EventContent::BidAcceptance(acceptance) = parsed.get(payment.bid_ref.as_str())? else {
        return None;
    };
    let EventContent::BidSubmission(bid) = parsed.get(acceptance.bid_ref.as_str())? else {
        return None;
    };
    let EventContent::ProductListing(_) = parsed.get(bid.product_ref.as_str())? else {
        return None;
    };
    Some(TransactionContext {
        seller_pubkey: authors.get(bid.product_ref.as_str())?.to_string(),
        amount_sats: u64::try_from(bid.bid_amount_satoshis).ok()?,
    })
}

fn aggregate(
    pubkey: &str,
    scores: &[ReputationScore],
    params: &ReputationConfig,
    now: u64,
) -> AggregatedReputation {
    let timestamps = scores.iter().map(|s| s.review_timestamp);
    let thirty_days_ago = now.saturating_sub(30 * SECONDS_PER_DAY);

    let mut per_reviewer: HashMap<&str, u64> = HashMap::new();
    for score in scores {
        *per_reviewer.entry(score.reviewer_pubkey.as_str()).or_default() += 1;
    }
    let counts: Vec<u64> = per_reviewer.values().copied().collect();

    let total = scores.len();
    let disputes = scores.iter().filter(|s| s.disputed).count();
    let optional = |metric: fn(&ReputationScore) -> Option<u8>| {
        weighted_average(scores, params, now, metric)
    };

    AggregatedReputation {
        pubkey: pubkey.to_string(),
        overall_score: weighted_average(scores, params, now, |s| Some(s.overall_rating))
            .unwrap_or(0.0),
        total_transactions: total,
        total_volume_sats: scores
            .iter()
            .fold(0u64, |sum, s| sum.saturating_add(s.transaction_amount_sats)),
        avg_item_quality: optional(|s| s.item_quality),
        avg_shipping_speed: optional(|s| s.shipping_speed),
        avg_communication: optional(|s| s.communication),
        avg_payment_reliability: optional(|s| s.payment_reliability),
        verified_purchases: scores.iter().filter(|s| s.verified_purchase).count(),
        completed_escrows: scores.iter().filter(|s| s.escrow_completed).count(),
        dispute_rate: if total > 0 {
            (disputes as f64 / total as f64).min(1.0)
        } else {
            0.0
        },
        first_transaction: timestamps.clone().min().unwrap_or(0),
        last_transaction: timestamps.clone().max().unwrap_or(0),
        transactions_last_30d: timestamps.filter(|&t| t > thirty_days_ago).count(),
        unique_reviewers: per_reviewer.len(),
        review_concentration: gini_coefficient(&counts),
    }
}

/// Weight of one score at time `now`.
pub fn score_weight(score: &ReputationScore, params: &ReputationConfig, now: u64) -> f64 {
    let days = age_in_days(score.review_timestamp, now);
    let time_weight = params.decay_factor.powf(days);
    let volume_weight =
        1.0 + params.volume_weight_factor * (score.transaction_amount_sats as f64 / 1_000_000.0);
    let mut verification_weight = 1.0;
    if score.verified_purchase {
        verification_weight += params.verification_bonus;
    }
    if score.escrow_completed {
        verification_weight += params.verification_bonus;
    }
    time_weight * volume_weight * verification_weight
}

/// Weighted mean of `metric` over the scores that carry it.
///
/// Weights are normalized before summing, so a single score yields its own
/// rating exactly.
fn weighted_average(
    scores: &[ReputationScore],
    params: &ReputationConfig,
    now: u64,
    metric: impl Fn(&ReputationScore) -> Option<u8>,
) -> Option<f64> {
    let weighted: Vec<(f64, f64)> = scores
        .iter()
        .filter_map(|score| {
            metric(score).map(|value| (f64::from(value), score_weight(score, params, now)))
        })
        .collect();
    let total_weight: f64 = weighted.iter().map(|(_, weight)| weight).sum();
    if total_weight <= 0.0 {
        return None;
    }
    Some(
        weighted
            .iter()
            .map(|(value, weight)| value * (weight / total_weight))
            .sum(),
    )
}

/// Gini coefficient of per-reviewer review counts, in `[0, 1]`.
///
/// No reviewers and a single reviewer both give 0.
pub fn gini_coefficient(counts: &[u64]) -> f64 {
    let n = counts.len();
    let total: u64 = counts.iter().sum();
    if n == 0 || total == 0 {
        return 0.0;
    }
    let mut sorted = counts.to_vec();
    sorted.sort_unstable();

    let ranked: f64 = sorted
        .iter()
        .enumerate()
        .map(|(i, &c)| (i + 1) as f64 * c as f64)
        .sum();
    let n = n as f64;
    let gini = 2.0 * ranked / (n * total as f64) - (n + 1.0) / n;
    gini.clamp(0.0, 1.0)
}

/// Fractional days from `timestamp` to `now`; future timestamps count as 0.
fn age_in_days(timestamp: u64, now: u64) -> f64 {
    now.saturating_sub(timestamp) as f64 / SECONDS_PER_DAY as f64
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
