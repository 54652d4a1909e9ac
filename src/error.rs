use crate::k8s::cache::TrackedKind;
use derive_more::From;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, From)]
pub enum Error {
    #[from]
    Kube(kube::Error),

    #[from]
    Infer(kube::config::InferConfigError),

    /// A required source listed zero resources
    Configuration { kind: TrackedKind },

    /// Malformed input to the key transform
    Validation(String),

    /// Programming error, e.g. an operation on a kind that was never registered
    Invariant(String),

    /// A mutex was poisoned by a panicking holder
    LockPoisoned(String),

    /// Custom error message
    Custom(String),
}

impl core::fmt::Display for Error {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::result::Result<(), core::fmt::Error> {
        match self {
            Self::Configuration { kind } => write!(
                fmt,
                "required source returned no {kind} resources (mark the source optional to allow this)"
            ),
            Self::Validation(message) => write!(fmt, "validation failed: {message}"),
            Self::Invariant(message) => write!(fmt, "invariant violated: {message}"),
            Self::LockPoisoned(message) => write!(fmt, "lock poisoned: {message}"),
            Self::Custom(message) => write!(fmt, "{message}"),
            _ => write!(fmt, "{self:?}"),
        }
    }
}

impl std::error::Error for Error {}
