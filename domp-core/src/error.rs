//! Error types for domp-core

use thiserror::Error;

/// Result type alias for DOMP operations
pub type Result<T> = std::result::Result<T, DompError>;

/// Top-level error for DOMP operations
#[derive(Error, Debug)]
pub enum DompError {
    /// Event validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Proof-of-work mining errors
    #[error("Mining error: {0}")]
    Mining(#[from] MiningError),

    /// Escrow errors
    #[error("Escrow error: {0}")]
    Escrow(#[from] EscrowError),

    /// Reputation errors
    #[error("Reputation error: {0}")]
    Reputation(#[from] ReputationError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Signing and key handling errors
    #[error("Key error: {0}")]
    Key(#[from] SignatureError),

    /// Serde JSON errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure of the validation pipeline, tagged by stage.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Stage 1: required fields and their shapes
    #[error("structural: {0}")]
    Structural(#[from] StructuralError),

    /// Stage 2: content against the kind schema
    #[error("schema: {0}")]
    Schema(#[from] SchemaError),

    /// Stage 3: kind-specific business rules
    #[error("content: {0}")]
    Content(#[from] ContentError),

    /// Stage 4: anti-spam proof
    #[error("anti-spam: {0}")]
    AntiSpam(#[from] AntiSpamError),

    /// Stage 5: id integrity and Schnorr signature
    #[error("signature: {0}")]
    Signature(#[from] SignatureError),

    /// Chain ordering and cross-references
    #[error("sequence: {0}")]
    Sequence(#[from] SequenceError),

    /// An event inside a chain failed individual validation
    #[error("event {index}: {source}")]
    AtIndex {
        /// Position of the event in the chain
        index: usize,
        /// The underlying failure
        source: Box<ValidationError>,
    },
}

impl ValidationError {
    /// Name of the pipeline stage that produced this error.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Structural(_) => "structural",
            Self::Schema(_) => "schema",
            Self::Content(_) => "content",
            Self::AntiSpam(_) => "anti_spam",
            Self::Signature(_) => "signature",
            Self::Sequence(_) => "sequence",
            Self::AtIndex { source, .. } => source.stage(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StructuralError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("field `{field}` must be {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("field `{field}` must be {expected} hex characters, got {actual}")]
    BadLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("field `{0}` is not valid hex")]
    NotHex(&'static str),

    #[error("tag {index} is empty")]
    EmptyTag { index: usize },

    #[error("event must be a JSON object")]
    NotAnObject,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("unsupported event kind {0}")]
    UnsupportedKind(u32),

    #[error("content is not valid JSON: {0}")]
    ContentNotJson(String),

    #[error("content must be a JSON object")]
    ContentNotObject,

    #[error("kind {kind} content is missing required field `{field}`")]
    MissingField { kind: u32, field: String },

    #[error("content field `{field}` must be {expected}, got {actual}")]
    WrongType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("content does not match kind {kind} payload: {reason}")]
    Malformed { kind: u32, reason: String },

    #[error("invalid schema definition: {0}")]
    InvalidDefinition(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContentError {
    #[error("`{field}` must be positive, got {value}")]
    NotPositive { field: &'static str, value: i64 },

    #[error("`{field}` cannot be negative, got {value}")]
    Negative { field: &'static str, value: i64 },

    #[error("`{field}` is too long: {actual} characters (max {max})")]
    TooLong {
        field: &'static str,
        max: usize,
        actual: usize,
    },

    #[error("invalid Lightning invoice format: {0}")]
    InvalidInvoice(String),

    #[error("invalid payment method `{0}`")]
    InvalidPaymentMethod(String),

    #[error("invalid receipt status `{0}`")]
    InvalidStatus(String),

    #[error("dispute_reason required for status `{0}`")]
    MissingDisputeReason(String),

    #[error("`{field}` must be between 1 and 5, got {value}")]
    RatingOutOfRange { field: &'static str, value: i64 },

    #[error("bid of {bid} sats exceeds {tolerance_percent}% of listing price {price}")]
    BidExceedsListing {
        bid: i64,
        price: i64,
        tolerance_percent: u32,
    },

    #[error("created_at {created_at} is more than {tolerance}s away from {now}")]
    TimestampOutOfRange {
        created_at: u64,
        now: u64,
        tolerance: u64,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AntiSpamError {
    #[error("missing anti_spam_proof tag")]
    MissingProof,

    #[error("expected exactly one anti_spam_proof tag, found {0}")]
    MultipleProofs(usize),

    #[error("unknown anti-spam proof type `{0}`")]
    UnknownProofType(String),

    #[error("pow proof missing nonce or difficulty")]
    PowMissingFields,

    #[error("pow {field} must be an integer, got `{value}`")]
    PowNotInteger { field: &'static str, value: String },

    #[error("pow does not meet difficulty {difficulty} (requires {required_zeros} leading zeros, got {id_prefix}...)")]
    DifficultyNotMet {
        difficulty: u32,
        required_zeros: usize,
        id_prefix: String,
    },

    #[error("pow id mismatch: stored {stored}, recomputed {computed}")]
    PowIdMismatch { stored: String, computed: String },

    #[error("lightning proof missing payment hash")]
    LnMissingHash,

    #[error("invalid lightning payment hash `{0}`")]
    LnBadHash(String),

    #[error("reference proof missing event id or kind")]
    RefMissingFields,

    #[error("invalid referenced event id `{0}`")]
    RefBadEventId(String),

    #[error("invalid referenced kind `{0}`")]
    RefBadKind(String),
}

/// Key parsing, signing and verification failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("`{field}` is not valid hex: {reason}")]
    Hex { field: &'static str, reason: String },

    #[error("`{field}` must be {expected} bytes, got {actual}")]
    BadLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid secret key")]
    InvalidSecretKey,

    #[error("invalid signature encoding: {0}")]
    InvalidEncoding(String),

    #[error("event id mismatch: stored {stored}, recomputed {computed}")]
    IdMismatch { stored: String, computed: String },

    #[error("signature does not verify against pubkey")]
    VerificationFailed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SequenceError {
    #[error("empty event chain")]
    Empty,

    /// `index` is the first position where `actual` and `expected` differ.
    #[error("invalid event sequence {actual:?} at event {index}, expected {expected:?}")]
    WrongKinds {
        index: usize,
        actual: Vec<u32>,
        expected: Vec<u32>,
    },

    #[error("event {index} (kind {kind}) is missing reference field `{field}`")]
    MissingReference {
        index: usize,
        kind: u32,
        field: &'static str,
    },

    #[error("event {index} `{field}` references {actual}, expected {expected}")]
    ReferenceMismatch {
        index: usize,
        field: &'static str,
        expected: String,
        actual: String,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MiningError {
    #[error("no pow solution for difficulty {difficulty} within {attempts} attempts")]
    Exhausted { difficulty: u32, attempts: u64 },

    #[error("mining cancelled after {attempts} attempts")]
    Cancelled { attempts: u64 },

    #[error("mining deadline exceeded after {attempts} attempts")]
    DeadlineExceeded { attempts: u64 },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EscrowError {
    #[error("escrow not found: {0}")]
    NotFound(String),

    #[error("escrow already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("cannot derive escrow from events: {0}")]
    InvalidEvents(String),

    #[error("escrow {field} overflows: {reason}")]
    Overflow { field: &'static str, reason: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReputationError {
    #[error("`{metric}` rating must be between 1 and 5, got {value}")]
    InvalidRating { metric: &'static str, value: u8 },

    #[error("duplicate score from {reviewer} for transaction {transaction_id}")]
    DuplicateScore {
        reviewer: String,
        transaction_id: String,
    },

    #[error("reviewed pubkey is empty")]
    MissingReviewed,

    #[error("event is not a receipt confirmation: {0}")]
    NotAReceipt(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("invalid schema set: {0}")]
    Schema(#[from] SchemaError),
}

impl From<&str> for EscrowError {
    fn from(msg: &str) -> Self {
        Self::InvalidEvents(msg.to_string())
    }
}
