//! # Anti-Spam Proofs
//!
//! Every DOMP event carries exactly one `anti_spam_proof` tag:
//!
//! - `["anti_spam_proof", "pow", <nonce>, <difficulty bits>]`
//! - `["anti_spam_proof", "ln", <payment hash>]`
//! - `["anti_spam_proof", "ref", <prior event id>, <kind>]`
//!
//! Proof-of-work is counted in whole hex nibbles: a difficulty of `d` bits
//! requires `d / 4` leading `'0'` characters in the event id, so difficulties
//! that are not multiples of 4 round down. Lightning and reference proofs are
//! checked for shape only; linking them to a real payment or a prior event is
//! up to the caller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::{
    error::{AntiSpamError, MiningError},
    event::{Event, Tag, UnsignedEvent},
    utils::{compute_event_id, is_hex_of_len, leading_zero_nibbles},
};

/// Name of the anti-spam tag.
pub const ANTI_SPAM_TAG: &str = "anti_spam_proof";

/// Default cap on nonces tried before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u64 = 10_000_000;

/// How many nonces a worker tries between cancellation checks.
const CHECK_INTERVAL: u64 = 1024;

/// A parsed anti-spam proof.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AntiSpamProof {
    /// Proof-of-work over the event id.
    Pow { nonce: u64, difficulty: u32 },
    /// Hash of a Lightning payment made to publish.
    Lightning { payment_hash: String },
    /// Reference to a prior event by the same author.
    Reference { event_id: String, kind: u32 },
}

impl AntiSpamProof {
    pub fn to_tag(&self) -> Tag {
        match self {
            Self::Pow { nonce, difficulty } => Tag::new([
                ANTI_SPAM_TAG.to_string(),
                "pow".to_string(),
                nonce.to_string(),
                difficulty.to_string(),
            ]),
            Self::Lightning { payment_hash } => {
                Tag::new([ANTI_SPAM_TAG, "ln", payment_hash.as_str()])
            }
            Self::Reference { event_id, kind } => Tag::new([
                ANTI_SPAM_TAG.to_string(),
                "ref".to_string(),
                event_id.clone(),
                kind.to_string(),
            ]),
        }
    }

    pub fn proof_type(&self) -> &'static str {
        match self {
            Self::Pow { .. } => "pow",
            Self::Lightning { .. } => "ln",
            Self::Reference { .. } => "ref",
        }
    }
}

/// Shared flag that stops mining workers.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Bounds on a mining run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MiningLimits {
    /// Nonces `0..max_attempts` are tried at most once each.
    pub max_attempts: u64,
    /// Wall-clock deadline.
    pub deadline: Option<Instant>,
}

impl Default for MiningLimits {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            deadline: None,
        }
    }
}

impl MiningLimits {
    pub fn with_max_attempts(max_attempts: u64) -> Self {
        Self {
            max_attempts,
            deadline: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }
}

/// A draft carrying a pow tag that satisfies its difficulty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinedEvent {
    /// The draft with the pow tag appended; sign it to publish.
    pub draft: UnsignedEvent,
    /// Id of `draft`, already meeting the difficulty.
    pub id: String,
    pub nonce: u64,
    /// Nonces hashed across all workers.
    pub attempts: u64,
}

enum Stop {
    Cancelled,
    DeadlineExceeded,
    /// Another worker already found a solution.
    Solved,
}

struct WorkerResult {
    found: Option<(u64, String)>,
    stop: Option<Stop>,
    attempts: u64,
}

/// Search nonces `start, start + stride, ...` below `limits.max_attempts`.
fn search(
    draft: &UnsignedEvent,
    difficulty: u32,
    start: u64,
    stride: u64,
    limits: &MiningLimits,
    cancel: &CancelToken,
    solved: &AtomicBool,
) -> WorkerResult {
    let required_zeros = (difficulty / 4) as usize;
    let mut tags = draft.tags.clone();
    tags.push(AntiSpamProof::Pow { nonce: start, difficulty }.to_tag());
    let pow_index = tags.len() - 1;

    let mut attempts = 0u64;
    let mut nonce = start;
    while nonce < limits.max_attempts {
        if attempts % CHECK_INTERVAL == 0 {
            let stop = if cancel.is_cancelled() {
                Some(Stop::Cancelled)
            } else if limits.deadline.is_some_and(|d| Instant::now() >= d) {
                Some(Stop::DeadlineExceeded)
            } else if solved.load(Ordering::Relaxed) {
                Some(Stop::Solved)
            } else {
                None
            };
            if stop.is_some() {
                return WorkerResult {
                    found: None,
                    stop,
                    attempts,
                };
            }
        }

        tags[pow_index].0[2] = nonce.to_string();
        let id = compute_event_id(
            &draft.pubkey,
            draft.created_at,
            draft.kind,
            &tags,
            &draft.content,
        );
        attempts += 1;

        if leading_zero_nibbles(&id) >= required_zeros {
            solved.store(true, Ordering::Relaxed);
            return WorkerResult {
                found: Some((nonce, id)),
                stop: None,
                attempts,
            };
        }
        nonce += stride;
    }

    WorkerResult {
        found: None,
        stop: None,
        attempts,
    }
}

/// Mine a pow tag for `draft` on the calling thread.
///
/// Nonces start at 0. The draft must already carry its final pubkey,
/// created_at, kind, content and other tags, since they are all hashed.
pub fn mine_pow(
    draft: &UnsignedEvent,
    difficulty: u32,
    limits: &MiningLimits,
    cancel: &CancelToken,
) -> Result<MinedEvent, MiningError> {
    mine_pow_parallel(draft, difficulty, limits, cancel, 1)
}

/// Mine with `workers` threads, each taking every `workers`-th nonce.
///
/// All workers share `cancel`; the first solution stops the others. When
/// several workers finish with a solution, the smallest nonce wins.
pub fn mine_pow_parallel(
    draft: &UnsignedEvent,
    difficulty: u32,
    limits: &MiningLimits,
    cancel: &CancelToken,
    workers: usize,
) -> Result<MinedEvent, MiningError> {
    let workers = workers.max(1) as u64;
    let started = Instant::now();
    debug!(
        kind = draft.kind,
        difficulty,
        workers,
        max_attempts = limits.max_attempts,
        "mining pow"
    );

    let solved = AtomicBool::new(false);
    let results = Mutex::new(Vec::with_capacity(workers as usize));
    if workers == 1 {
        results
            .lock()
            .push(search(draft, difficulty, 0, 1, limits, cancel, &solved));
    } else {
        std::thread::scope(|scope| {
            for worker in 0..workers {
                let (solved, results) = (&solved, &results);
                scope.spawn(move || {
                    let result = search(draft, difficulty, worker, workers, limits, cancel, solved);
                    results.lock().push(result);
                });
            }
        });
    }

    let results = results.into_inner();
    let attempts: u64 = results.iter().map(|r| r.attempts).sum();

    if let Some((nonce, id)) = results
        .iter()
        .filter_map(|r| r.found.clone())
        .min_by_key(|(nonce, _)| *nonce)
    {
        info!(
            nonce,
            attempts,
            elapsed_ms = started.elapsed().as_millis() as u64,
            id = %id,
            "pow solution found"
        );
        let mut draft = draft.clone();
        draft.tags.push(AntiSpamProof::Pow { nonce, difficulty }.to_tag());
        return Ok(MinedEvent {
            draft,
            id,
            nonce,
            attempts,
        });
    }

    let stops = results.iter().filter_map(|r| r.stop.as_ref());
    let mut deadline = false;
    for stop in stops {
        match stop {
            Stop::Cancelled => return Err(MiningError::Cancelled { attempts }),
            Stop::DeadlineExceeded => deadline = true,
            Stop::Solved => {}
        }
    }
    if deadline {
        return Err(MiningError::DeadlineExceeded { attempts });
    }
    Err(MiningError::Exhausted {
        difficulty,
        attempts,
    })
}

/// Check a pow tag against the event it belongs to.
///
/// The stored id must carry `difficulty / 4` leading zeros and must equal the
/// id recomputed over the event's full tag set, so a pow tag cannot vouch for
/// an id it never produced.
pub fn verify_pow(event: &Event, tag: &Tag) -> Result<AntiSpamProof, AntiSpamError> {
    let (nonce, difficulty) = match (tag.get(2), tag.get(3)) {
        (Some(nonce), Some(difficulty)) if !nonce.is_empty() => (nonce, difficulty),
        _ => return Err(AntiSpamError::PowMissingFields),
    };
    let difficulty: u32 = difficulty.parse().map_err(|_| AntiSpamError::PowNotInteger {
        field: "difficulty",
        value: difficulty.to_string(),
    })?;
    let nonce: u64 = nonce.parse().map_err(|_| AntiSpamError::PowNotInteger {
        field: "nonce",
        value: nonce.to_string(),
    })?;

    let required_zeros = (difficulty / 4) as usize;
    if leading_zero_nibbles(&event.id) < required_zeros {
        return Err(AntiSpamError::DifficultyNotMet {
            difficulty,
            required_zeros,
            id_prefix: event.id.chars().take(8).collect(),
        });
    }

    let computed = event.compute_id();
    if computed != event.id {
        return Err(AntiSpamError::PowIdMismatch {
            stored: event.id.clone(),
            computed,
        });
    }

    Ok(AntiSpamProof::Pow { nonce, difficulty })
}

/// Shape check of a Lightning payment-hash proof.
pub fn verify_ln_proof(tag: &Tag) -> Result<AntiSpamProof, AntiSpamError> {
    let payment_hash = tag.get(2).ok_or(AntiSpamError::LnMissingHash)?;
    if !is_hex_of_len(payment_hash, 64) {
        return Err(AntiSpamError::LnBadHash(payment_hash.to_string()));
    }
    Ok(AntiSpamProof::Lightning {
        payment_hash: payment_hash.to_string(),
    })
}

/// Shape check of a prior-event reference proof.
pub fn verify_ref_proof(tag: &Tag) -> Result<AntiSpamProof, AntiSpamError> {
    let (event_id, kind) = match (tag.get(2), tag.get(3)) {
        (Some(event_id), Some(kind)) => (event_id, kind),
        _ => return Err(AntiSpamError::RefMissingFields),
    };
    if !is_hex_of_len(event_id, 64) {
        return Err(AntiSpamError::RefBadEventId(event_id.to_string()));
    }
    let kind = kind
        .parse()
        .map_err(|_| AntiSpamError::RefBadKind(kind.to_string()))?;
    Ok(AntiSpamProof::Reference {
        event_id: event_id.to_string(),
        kind,
    })
}

/// Find the event's single anti-spam tag and verify it.
pub fn verify_anti_spam(event: &Event) -> Result<AntiSpamProof, AntiSpamError> {
    let tags: Vec<&Tag> = event.anti_spam_tags().collect();
    let tag = match tags.as_slice() {
        [] => return Err(AntiSpamError::MissingProof),
        [tag] => *tag,
        many => return Err(AntiSpamError::MultipleProofs(many.len())),
    };

    match tag.get(1).unwrap_or_default() {
        "pow" => verify_pow(event, tag),
        "ln" => verify_ln_proof(tag),
        "ref" => verify_ref_proof(tag),
        other => Err(AntiSpamError::UnknownProofType(other.to_string())),
    }
}
