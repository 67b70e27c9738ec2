use std::path::PathBuf;
use thiserror::Error;

/// The central error type for the evolvr pipeline.
///
/// Each stage of the self-modification cycle has its own error enum so
/// callers can tell a skipped proposal from an aborted cycle without
/// string matching.
#[derive(Error, Debug)]
pub enum EvolveError {
    #[error("Analysis error: {0}")]
    Analysis(#[from] AnalysisError),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Apply error: {0}")]
    Apply(#[from] ApplyError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Cycle error: {0}")]
    Cycle(#[from] CycleError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Source root does not exist: {0}")]
    RootMissing(PathBuf),

    #[error("Failed to read {path}: {message}")]
    Read { path: PathBuf, message: String },

    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Code generation timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("Code generator failed: {0}")]
    Collaborator(String),

    #[error("Code generator returned an empty response")]
    EmptyResponse,

    #[error("Code generator returned the original code unchanged")]
    Unchanged,

    #[error("No target file for {kind} opportunity")]
    NoTarget { kind: String },
}

#[derive(Error, Debug)]
pub enum ApplyError {
    #[error("Proposal not found: {0}")]
    NotFound(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Proposal {id} has not passed validation")]
    NotValidated { id: String },

    #[error("Refusing to write {path}: content changed since it was analyzed")]
    StaleBase { path: PathBuf },

    #[error("Failed to back up {path}: {message}")]
    Backup { path: PathBuf, message: String },

    #[error("Failed to write {path}: {message}")]
    Write { path: PathBuf, message: String },

    #[error("Post-write validation failed for {path}: {reason}")]
    VerificationFailed { path: PathBuf, reason: String },

    #[error("Rollback of {path} failed: {message}")]
    RollbackFailed { path: PathBuf, message: String },
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Improvement not found: {0}")]
    NotFound(String),

    #[error("Improvement already recorded: {0}")]
    Duplicate(String),

    #[error("Invalid ledger transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Ledger storage error at {path}: {message}")]
    Storage { path: PathBuf, message: String },

    #[error("Ledger document corrupted: {0}")]
    Corrupted(String),
}

#[derive(Error, Debug)]
pub enum CycleError {
    #[error("A self-modification cycle is already running")]
    AlreadyRunning,

    #[error("Self-modification is disabled")]
    Disabled,

    #[error("Cycle stopped before completion")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, EvolveError>;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_ERROR: u8 = 1;
pub const EXIT_CONFIG_ERROR: u8 = 2;
pub const EXIT_APPLY_ERROR: u8 = 3;
pub const EXIT_CYCLE_BUSY: u8 = 4;
pub const EXIT_LEDGER_ERROR: u8 = 5;

/// Determine the appropriate process exit code for an error.
pub fn get_exit_code(e: &anyhow::Error) -> u8 {
    if let Some(evolve_err) = e.downcast_ref::<EvolveError>() {
        return match evolve_err {
            EvolveError::Config(_) => EXIT_CONFIG_ERROR,
            EvolveError::Apply(_) => EXIT_APPLY_ERROR,
            EvolveError::Cycle(CycleError::AlreadyRunning) => EXIT_CYCLE_BUSY,
            EvolveError::Ledger(_) => EXIT_LEDGER_ERROR,
            _ => EXIT_ERROR,
        };
    }

    // Direct enum unwraps fallback
    if e.downcast_ref::<ApplyError>().is_some() {
        return EXIT_APPLY_ERROR;
    }
    if e.downcast_ref::<LedgerError>().is_some() {
        return EXIT_LEDGER_ERROR;
    }
    if let Some(CycleError::AlreadyRunning) = e.downcast_ref::<CycleError>() {
        return EXIT_CYCLE_BUSY;
    }

    EXIT_ERROR
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_config_error() {
        let err: anyhow::Error = EvolveError::Config("bad toml".to_string()).into();
        assert_eq!(get_exit_code(&err), EXIT_CONFIG_ERROR);
    }

    #[test]
    fn test_exit_code_apply_error_wrapped() {
        let err: anyhow::Error = EvolveError::Apply(ApplyError::StaleBase {
            path: PathBuf::from("src/lib.rs"),
        })
        .into();
        assert_eq!(get_exit_code(&err), EXIT_APPLY_ERROR);
    }

    #[test]
    fn test_exit_code_apply_error_direct() {
        let err: anyhow::Error = ApplyError::NotFound("mod_x".to_string()).into();
        assert_eq!(get_exit_code(&err), EXIT_APPLY_ERROR);
    }

    #[test]
    fn test_exit_code_cycle_busy() {
        let err: anyhow::Error = EvolveError::Cycle(CycleError::AlreadyRunning).into();
        assert_eq!(get_exit_code(&err), EXIT_CYCLE_BUSY);

        let direct: anyhow::Error = CycleError::AlreadyRunning.into();
        assert_eq!(get_exit_code(&direct), EXIT_CYCLE_BUSY);
    }

    #[test]
    fn test_exit_code_other_cycle_errors_are_generic() {
        let err: anyhow::Error = EvolveError::Cycle(CycleError::Disabled).into();
        assert_eq!(get_exit_code(&err), EXIT_ERROR);
    }

    #[test]
    fn test_exit_code_plain_anyhow() {
        let err = anyhow::anyhow!("something went wrong");
        assert_eq!(get_exit_code(&err), EXIT_ERROR);
    }

    #[test]
    fn test_error_display_messages() {
        let err = ApplyError::InvalidStateTransition {
            from: "proposed".to_string(),
            to: "applied".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid state transition from proposed to applied"
        );

        let err = GenerationError::Timeout { seconds: 30 };
        assert!(err.to_string().contains("30 seconds"));
    }

    #[test]
    fn test_from_conversions() {
        let err: EvolveError = LedgerError::NotFound("imp".to_string()).into();
        assert!(matches!(err, EvolveError::Ledger(LedgerError::NotFound(_))));

        let err: EvolveError = CycleError::Cancelled.into();
        assert!(matches!(err, EvolveError::Cycle(CycleError::Cancelled)));
    }
}
