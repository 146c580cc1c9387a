use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecError {
    /// The tool ran and exited non-zero. `output` holds everything it printed.
    #[error("`{command}` exited with {}", exit_label(.code))]
    CommandFailed {
        command: String,
        code: Option<i32>,
        output: String,
    },

    #[error("`{command}` was cancelled")]
    Cancelled { command: String, output: String },

    #[error("no command arguments given")]
    EmptyCommand,

    #[error("failed to spawn {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to wait for `{command}`: {source}")]
    Wait {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot create log directory {path}: {source}")]
    LogDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot open log file {path}: {source}")]
    LogFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write log file {path}: {source}")]
    LogWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ExecError {
    /// Output captured before the failure, if the command got far enough to print any.
    pub fn output(&self) -> Option<&str> {
        match self {
            ExecError::CommandFailed { output, .. } | ExecError::Cancelled { output, .. } => {
                Some(output)
            }
            _ => None,
        }
    }

    /// True when the tool itself failed, as opposed to the machinery around it.
    pub fn is_command_failure(&self) -> bool {
        matches!(self, ExecError::CommandFailed { .. })
    }
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("status {c}"),
        None => "no status (killed by signal)".into(),
    }
}
