use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Run-level error taxonomy. `exit_code` is the only place the process
/// exit status is decided: configuration problems exit 2, everything
/// else that aborts a run exits 1.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Config(String),

    #[error("git {args} exited with status {}: {stderr}", .code.map_or_else(|| "killed".to_string(), |c| c.to_string()))]
    GitCli {
        args: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error(transparent)]
    Git2(#[from] git2::Error),

    #[error("cherry-pick of {sha} stopped on a conflict")]
    Conflict { sha: String },

    #[error("hook {script} exited with status {}: {stderr}", .code.map_or_else(|| "killed".to_string(), |c| c.to_string()))]
    Hook {
        script: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("hook {script} timed out after {seconds}s")]
    HookTimeout { script: String, seconds: u64 },

    #[error("GitHub API error: {0}")]
    Provider(#[from] octocrab::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{what} timed out after {seconds}s")]
    NetworkTimeout { what: String, seconds: u64 },

    #[error("ref {ref_name} not found on the {remote} remote")]
    RefNotFound { remote: String, ref_name: String },
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Error {
        Error::Config(msg.into())
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Config(_) => 2,
            _ => 1,
        }
    }
}
