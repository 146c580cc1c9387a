pub mod command;
pub mod error;
pub mod executor;

pub use command::{Subcommand, TofuCommand};
pub use error::ExecError;
pub use executor::{log_file_path, working_dir_override, Executor, TofuExecutor, LOG_DIR_NAME};
