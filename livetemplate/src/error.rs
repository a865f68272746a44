//! Error kinds raised by the boundary parser, tree generator, diff
//! engine, session registry, and token service.

use thiserror::Error;

/// Errors raised by the boundary parser, tree generator, diff engine,
/// session registry, and token service.
#[derive(Error, Debug)]
pub enum LiveTemplateError {
    /// Parse/structure problems surfaced at template registration time.
    /// Connection operations never raise this.
    #[error("template invalid: {0}")]
    TemplateInvalid(String),

    /// Strict-mode path evaluation failure. Returned from `Update`
    /// without mutating the connection's `lastTree`.
    #[error("data invalid: {0}")]
    DataInvalid(String),

    /// The token has expired.
    #[error("token expired")]
    TokenExpired,

    /// The token failed to decode or its MAC did not verify.
    #[error("token invalid: {0}")]
    TokenInvalid(String),

    /// The token's tenant does not match the verifying application.
    #[error("application mismatch: token tenant {token_tenant:?} != {expected_tenant:?}")]
    ApplicationMismatch {
        token_tenant: String,
        expected_tenant: String,
    },

    /// Per-tenant connection limit reached; returned from `Attach`.
    #[error("connection limit exceeded for tenant {tenant:?} (max {max})")]
    LimitExceeded { tenant: String, max: usize },

    /// Internal bug signal: a diff step observed a slot-count mismatch
    /// that construction should make impossible. The affected
    /// connection is detached.
    #[error("tree invariant violated: {0}")]
    TreeInvariantViolated(String),

    /// The transport closed. Non-fatal for the registry; the
    /// connection is detached and this is surfaced on the next
    /// `Update` call for that connection.
    #[error("transport closed")]
    TransportClosed,

    /// No connection exists for the given id.
    #[error("unknown connection {0}")]
    UnknownConnection(String),

    /// A broadcast reached its target connections, but `failed` of them
    /// could not be rendered or delivered to (each already logged
    /// individually); the rest still received the update.
    #[error("broadcast failed for {failed} of {total} connections")]
    BroadcastFailed { failed: usize, total: usize },

    /// JSON (de)serialization failure while rendering or decoding a
    /// wire value.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LiveTemplateError>;
