//! Error messages returned by this crate

use http::StatusCode;

/// Error messages returned by this crate.
///
/// Variants are grouped by the failure policy they map onto: authentication
/// failures reject the request, validation failures are the sender's fault,
/// transient failures are retried by the sender or the delivery queue.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Actor, activity or object was not found in the local store
    #[error("Object was not found in local store")]
    NotFound,
    /// Request is missing the `Signature` header
    #[error("Request is missing an HTTP signature")]
    MissingSignature,
    /// The signature's keyId could not be resolved to an actor
    #[error("Signature keyId could not be resolved: {0}")]
    UnknownKey(String),
    /// The `Date` header is outside the allowed clock skew
    #[error("Request date is outside the allowed clock skew")]
    StaleDate,
    /// The `Digest` header does not match the request body
    #[error("Request body does not match its digest")]
    DigestMismatch,
    /// The HTTP signature does not verify against the actor's public key
    #[error("Invalid HTTP signature")]
    SignatureInvalid,
    /// The signing actor does not match the activity's `actor` field
    #[error("Signing actor {signer} does not match activity actor {actor}")]
    ActorMismatch {
        /// Actor that signed the request
        signer: Box<url::Url>,
        /// `actor` field of the activity
        actor: Box<url::Url>,
    },
    /// Activity type outside the supported set
    #[error("Unsupported activity type: {0}")]
    UnsupportedType(String),
    /// Malformed document or missing required field
    #[error("Invalid activity document: {0}")]
    Validation(String),
    /// An object with this id exists with a different body
    #[error("Object id already exists with a different body")]
    Conflict,
    /// Caller is not allowed to perform this operation
    #[error("Not authorized: {0}")]
    NotAuthorized(&'static str),
    /// Url failed a security check
    #[error("URL failed verification: {0}")]
    UrlVerification(&'static str),
    /// Response body limit was reached during fetch
    #[error("Response body limit was reached during fetch")]
    ResponseBodyLimit,
    /// Object to be fetched was deleted
    #[error("Object to be fetched was deleted")]
    ObjectDeleted,
    /// Failed to resolve actor via webfinger
    #[error("Failed to resolve actor via webfinger")]
    WebfingerResolveFailed,
    /// Store or network I/O failure; the caller is expected to retry
    #[error("Transient failure: {0}")]
    Transient(String),
    /// other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub(crate) fn other<T>(error: T) -> Self
    where
        T: Into<anyhow::Error>,
    {
        Error::Other(error.into())
    }

    /// HTTP status this error surfaces as on the inbound side.
    pub fn status(&self) -> StatusCode {
        match self {
            Error::MissingSignature
            | Error::UnknownKey(_)
            | Error::StaleDate
            | Error::DigestMismatch
            | Error::SignatureInvalid => StatusCode::UNAUTHORIZED,
            Error::ActorMismatch { .. } | Error::NotAuthorized(_) => StatusCode::FORBIDDEN,
            Error::Validation(_) | Error::UrlVerification(_) => StatusCode::BAD_REQUEST,
            Error::NotFound => StatusCode::NOT_FOUND,
            Error::Conflict => StatusCode::CONFLICT,
            Error::ObjectDeleted => StatusCode::GONE,
            // unsupported types are accepted and ignored so senders do not retry
            Error::UnsupportedType(_) => StatusCode::ACCEPTED,
            Error::ResponseBodyLimit
            | Error::WebfingerResolveFailed
            | Error::Transient(_)
            | Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}
