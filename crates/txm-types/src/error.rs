use thiserror::Error;

/// Validation failures: malformed input, surfaced synchronously, never
/// retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("required field `{field}` is missing")]
    MissingField { field: &'static str },
    #[error("invalid value `{value}` for `{field}`")]
    InvalidEnumValue { field: &'static str, value: String },
    #[error("pagination limit must be > 0, got {limit}")]
    BadPaginationLimit { limit: i64 },
    #[error("`{raw}` is not a valid uuid")]
    BadUuid { raw: String },
    #[error("webhook delivery requires a url")]
    WebhookUrlRequired,
    #[error("webhook address `{host}` is blocked")]
    BlockedWebhookAddress { host: String },
    #[error("invalid distribution mode `{mode}`")]
    InvalidDistributionMode { mode: String }
}

/// Two transactions/streams/listeners contending for the same unique key.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConflictError {
    #[error("name `{name}` is already in use")]
    NameInUse { name: String },
    #[error("id `{id}` already exists")]
    DuplicateId { id: String }
}

/// The resource kind a "not found" result refers to, used only to shape the
/// boundary error key — the persistence layer itself returns `Option::None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundKind {
    Stream,
    Listener,
    Transaction,
    Checkpoint
}

impl NotFoundKind {
    pub fn key(self) -> &'static str {
        match self {
            Self::Stream => "stream_not_found",
            Self::Listener => "listener_not_found",
            Self::Transaction => "transaction_not_found",
            Self::Checkpoint => "checkpoint_not_found"
        }
    }
}

/// Stable, top-level error surfaced to the boundary. Retriable transient
/// failures and fatal (context-cancelled) failures are both represented so
/// that callers inside the scheduler/stream runtime can pattern-match on
/// retriability without string-matching messages.
#[derive(Debug, Error, Clone)]
pub enum TmError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Conflict(#[from] ConflictError),
    #[error("{} not found: {1}", .0.key())]
    NotFound(NotFoundKind, String),
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("policy engine failure: {0}")]
    PolicyFailure(String),
    #[error("operation cancelled")]
    Fatal
}

impl TmError {
    /// Stable error key surfaced at the boundary (§6). Never changes meaning
    /// across implementations even if the display message is reworded.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(ValidationError::MissingField { .. }) => "name_missing",
            Self::Validation(ValidationError::InvalidEnumValue { .. }) => "stream_type_invalid",
            Self::Validation(ValidationError::BadPaginationLimit { .. }) => "bad_pagination_limit",
            Self::Validation(ValidationError::BadUuid { .. }) => "bad_uuid",
            Self::Validation(ValidationError::WebhookUrlRequired) => "webhook_url_required",
            Self::Validation(ValidationError::BlockedWebhookAddress { .. }) => {
                "blocked_webhook_address"
            }
            Self::Validation(ValidationError::InvalidDistributionMode { .. }) => {
                "invalid_distribution_mode"
            }
            Self::Conflict(ConflictError::NameInUse { .. }) => "name_in_use",
            Self::Conflict(ConflictError::DuplicateId { .. }) => "duplicate_id",
            Self::NotFound(kind, _) => kind.key(),
            Self::Transient(_) => "transient",
            Self::PolicyFailure(_) => "policy_failure",
            Self::Fatal => "cancelled"
        }
    }

    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}
