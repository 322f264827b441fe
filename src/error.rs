use thiserror::Error;

pub type NodeResult<T> = std::result::Result<T, NodeError>;

/// Errors that reach the embedding runner.
///
/// Only session faults are fatal: without an authenticated session the node
/// can make no further progress. Everything else degrades to a skipped item,
/// an abandoned round or a failed verdict before it gets here.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("login failed after {attempts} attempts")]
    SessionExhausted { attempts: u32 },

    #[error("platform rejected the supplied credentials")]
    LoginRejected,

    #[error("platform requires email verification before login can continue")]
    EmailVerificationRequired,

    #[error("platform asked for a verification code but none was configured")]
    VerificationCodeMissing,

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl NodeError {
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            NodeError::SessionExhausted { .. }
                | NodeError::LoginRejected
                | NodeError::EmailVerificationRequired
                | NodeError::VerificationCodeMissing
        )
    }

    /// Process exit status the runner should use for this error.
    pub fn exit_code(&self) -> i32 {
        if self.is_fatal() {
            1
        } else {
            0
        }
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid content identifier '{0}'")]
    InvalidIdentifier(String),

    #[error("fetching '{cid}' failed after {attempts} attempts")]
    Exhausted { cid: String, attempts: u32 },

    #[error("blob for '{cid}' could not be decoded: {reason}")]
    Decode { cid: String, reason: String },
}
