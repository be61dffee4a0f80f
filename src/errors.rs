//! Error taxonomy. Transient/parse/precondition/authorization
//! failures are recovered locally by callers; only `Fatal` propagates to the
//! top of the run.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdvisorError {
    #[error("transient network failure calling {endpoint}: {detail}")]
    TransientNetwork { endpoint: String, detail: String },

    #[error("could not parse {what}: {detail}")]
    Parse { what: String, detail: String },

    #[error("manifest precondition violated: {key} not found")]
    PreconditionNotFound { key: String },

    #[error("authorization failure: {detail}")]
    Authorization { detail: String },

    #[error("fatal error: {0}")]
    Fatal(#[from] anyhow::Error),
}
