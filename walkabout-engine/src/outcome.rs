use walkabout_core::Error;

/// What a hook asks the engine to do next.
///
/// `skip` and `disengage` are data, not control-flow exceptions: the
/// imperative `visit.skip()` surface sets a flag the engine folds into the
/// hook's outcome when it returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Run the remaining hooks for this entity, then the next queue entry.
    Continue,
    /// Abort the remaining hooks for the current entity only.
    Skip,
    /// Stop consuming the queue. `on_exit` hooks still run.
    Disengage,
}

/// An error raised inside a hook.
///
/// Recoverable errors are recorded into the walker response and traversal
/// continues with the next queue entry; fatal ones disengage.
#[derive(Debug, Clone)]
pub struct HookError {
    pub error: Error,
    pub recoverable: bool,
}

impl HookError {
    pub fn recoverable(error: Error) -> Self {
        Self {
            error,
            recoverable: true,
        }
    }

    pub fn fatal(error: Error) -> Self {
        Self {
            error,
            recoverable: false,
        }
    }
}

impl From<Error> for HookError {
    fn from(error: Error) -> Self {
        // Domain errors raised with `?` default to recoverable; hooks opt
        // into fatality explicitly.
        Self::recoverable(error)
    }
}

impl std::fmt::Display for HookError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl std::error::Error for HookError {}

/// Every hook resolves to an outcome or an error.
pub type HookResult = Result<Outcome, HookError>;
