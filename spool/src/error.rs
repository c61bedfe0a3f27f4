//! Error types and result definitions for spool sessions.
//!
//! [`SpoolError`] carries a classifying [`ErrorKind`], a static description, optional dynamic
//! detail and source, and the call site where it was raised. Several errors can be aggregated
//! into one, which is how failures of multiple workers are reported together.

use std::borrow::Cow;
use std::collections::TryReserveError;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

use spool_config::shared::ValidationError;

/// Result type used throughout the crate.
pub type SpoolResult<T> = Result<T, SpoolError>;

#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
}

/// Main error type of the crate.
#[derive(Debug, Clone)]
pub struct SpoolError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    Single(ErrorPayload),
    /// Errors collected from several workers.
    Many {
        errors: Vec<SpoolError>,
        location: &'static Location<'static>,
    },
}

/// Classification of failures.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A queue, semaphore or mutex could not be created. Aborts startup.
    InitializationError,
    /// The enqueue mutex or a free slot could not be obtained in time. Retryable.
    EnqueueFailed,
    /// Storage for a producer's batch could not be reserved. Fatal to that producer.
    AllocationError,
    /// The addressed worker is not registered (or no longer exists).
    UnknownWorker,
    /// The session configuration is invalid.
    ConfigError,
    /// An operation was attempted in a state that does not allow it.
    InvalidState,
    /// The session was shut down while the operation was waiting.
    SessionClosed,
    /// The printer reported a failure for an item.
    ProcessingFailed,
    ConsumerPanic,
    ProducerPanic,
    Unknown,
}

impl SpoolError {
    /// Returns the kind of this error, or of the first aggregated error.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.kind,
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns every kind contained in this error, flattening aggregates.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::Single(ref payload) => vec![payload.kind],
            ErrorRepr::Many { ref errors, .. } => {
                errors.iter().flat_map(|err| err.kinds()).collect()
            }
        }
    }

    /// Returns the description of this error, or of the first aggregated error.
    pub fn description(&self) -> &str {
        match self.repr {
            ErrorRepr::Single(ref payload) => &payload.description,
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.description())
                .unwrap_or("multiple errors"),
        }
    }

    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.detail.as_deref(),
            ErrorRepr::Many { ref errors, .. } => errors.iter().find_map(|e| e.detail()),
        }
    }

    /// Returns the aggregated errors, if this is an aggregate.
    pub fn errors(&self) -> Option<&[SpoolError]> {
        match self.repr {
            ErrorRepr::Single(_) => None,
            ErrorRepr::Many { ref errors, .. } => Some(errors),
        }
    }

    /// Returns the call site that created this error.
    pub fn location(&self) -> &'static Location<'static> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.location,
            ErrorRepr::Many { location, .. } => location,
        }
    }

    /// Attaches the originating error. Has no effect on aggregates.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        if let ErrorRepr::Single(ref mut payload) = self.repr {
            payload.source = Some(Arc::new(source));
        }
        self
    }

    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        SpoolError {
            repr: ErrorRepr::Single(ErrorPayload {
                kind,
                description,
                detail,
                source,
                location: Location::caller(),
            }),
        }
    }
}

impl PartialEq for SpoolError {
    /// Errors compare by kind, aggregates compare element-wise.
    fn eq(&self, other: &SpoolError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::Single(a), ErrorRepr::Single(b)) => a.kind == b.kind,
            (ErrorRepr::Many { errors: a, .. }, ErrorRepr::Many { errors: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for SpoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            ErrorRepr::Single(payload) => {
                write!(
                    f,
                    "[{:?}] {} @ {}:{}",
                    payload.kind,
                    payload.description,
                    payload.location.file(),
                    payload.location.line(),
                )?;

                if let Some(detail) = payload.detail.as_deref() {
                    for line in detail.lines() {
                        write!(f, "\n  {line}")?;
                    }
                }

                Ok(())
            }
            ErrorRepr::Many { errors, location } => {
                write!(
                    f,
                    "[Many] {} error{} @ {}:{}",
                    errors.len(),
                    if errors.len() == 1 { "" } else { "s" },
                    location.file(),
                    location.line(),
                )?;

                for (index, error) in errors.iter().enumerate() {
                    let rendered = error.to_string();
                    let mut lines = rendered.lines();
                    if let Some(first) = lines.next() {
                        write!(f, "\n  {}. {first}", index + 1)?;
                    }
                    for line in lines {
                        write!(f, "\n     {line}")?;
                    }
                }

                Ok(())
            }
        }
    }
}

impl error::Error for SpoolError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload
                .source
                .as_ref()
                .map(|source| source.as_ref() as &(dyn error::Error + 'static)),
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|error| error as &(dyn error::Error + 'static)),
        }
    }
}

impl From<(ErrorKind, &'static str)> for SpoolError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> SpoolError {
        SpoolError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

impl<D> From<(ErrorKind, &'static str, D)> for SpoolError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> SpoolError {
        SpoolError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Aggregates errors. A single error is returned unwrapped.
impl<E> From<Vec<E>> for SpoolError
where
    E: Into<SpoolError>,
{
    #[track_caller]
    fn from(errors: Vec<E>) -> SpoolError {
        let location = Location::caller();
        let mut errors: Vec<SpoolError> = errors.into_iter().map(Into::into).collect();

        if errors.len() == 1
            && let Some(error) = errors.pop()
        {
            return error;
        }

        SpoolError {
            repr: ErrorRepr::Many { errors, location },
        }
    }
}

impl From<ValidationError> for SpoolError {
    #[track_caller]
    fn from(err: ValidationError) -> SpoolError {
        let detail = err.to_string();
        SpoolError::from_components(
            ErrorKind::ConfigError,
            Cow::Borrowed("Invalid session configuration"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl From<TryReserveError> for SpoolError {
    #[track_caller]
    fn from(err: TryReserveError) -> SpoolError {
        let detail = err.to_string();
        SpoolError::from_components(
            ErrorKind::AllocationError,
            Cow::Borrowed("Batch storage could not be allocated"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}
