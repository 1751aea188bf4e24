use thiserror::Error;

/// Authentication failure.
///
/// Deliberately a single opaque variant: a missing, malformed, forged or
/// expired credential all produce the same rejection, so a caller can not
/// probe whether an account exists.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid credential")]
    InvalidCredential,
}
