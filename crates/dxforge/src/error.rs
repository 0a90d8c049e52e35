//! The compiler's error taxonomy.
//!
//! One flat enum, one variant per failure class. Components surface only
//! their own kinds: translators never catch front-end errors, the planner
//! never catches translator errors, and the embedding caller converts the
//! taxonomy into user output via [`Error::exit_class`].

use crate::platform::PlatformError;

/// Any error the compiler core can surface.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The front-end rejected the source; forwarded unchanged.
    #[error("parse error: {0}")]
    Parse(String),

    /// The checker rejected the source, or an IR coercion failed.
    #[error("type error: {0}")]
    Type(String),

    /// A source feature the compiler cannot lower.
    #[error("unsupported construct: {0}")]
    Unsupported(String),

    /// Conflicting information about the same free variable in a block.
    #[error(transparent)]
    Closure(#[from] crate::closure::ClosureError),

    /// A block with more than one stage-addressable call site. This is a
    /// builder invariant violation, so it reports as internal.
    #[error("malformed block: {0}")]
    BlockShape(String),

    /// An identifier that cannot be encoded platform-safely.
    #[error(transparent)]
    Name(#[from] dxname::NameError),

    /// An existing platform object conflicts under the strict policy.
    #[error("executable conflict: {0}")]
    ExecutableConflict(String),

    /// A platform API failure, after any internal retries.
    #[error(transparent)]
    Platform(#[from] PlatformError),

    /// An incompatible option combination.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An invariant violation; never expected to escape in production.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// The process exit class the embedding CLI maps this error to:
    /// 1 for user-input and configuration faults, 2 for platform/IO
    /// faults, 3 for internal invariant violations.
    pub fn exit_class(&self) -> u8 {
        match self {
            Error::Parse(_)
            | Error::Type(_)
            | Error::Unsupported(_)
            | Error::Closure(_)
            | Error::Name(_)
            | Error::ExecutableConflict(_)
            | Error::Configuration(_) => 1,
            Error::Platform(_) => 2,
            Error::BlockShape(_) | Error::Internal(_) => 3,
        }
    }
}

impl From<dxforge_ir::value::CoercionError> for Error {
    fn from(err: dxforge_ir::value::CoercionError) -> Self {
        Error::Type(err.to_string())
    }
}

impl From<dxforge_ir::wire::WireError> for Error {
    fn from(err: dxforge_ir::wire::WireError) -> Self {
        Error::Type(err.to_string())
    }
}

impl From<dxforge_ir::bundle::BundleError> for Error {
    fn from(err: dxforge_ir::bundle::BundleError) -> Self {
        use dxforge_ir::bundle::BundleError;

        match &err {
            // Cycles and name collisions come from the user's source.
            BundleError::CyclicDependency(_) | BundleError::DuplicateCallable(_) => {
                Error::Unsupported(err.to_string())
            }
            // A dangling primary or callee means the translator misbehaved.
            BundleError::MissingPrimary(_) | BundleError::UnknownCallee { .. } => {
                Error::Internal(err.to_string())
            }
        }
    }
}

/// The compiler's result alias.
pub type Result<T> = std::result::Result<T, Error>;
