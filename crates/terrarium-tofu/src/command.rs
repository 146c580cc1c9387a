use std::fmt;
use std::path::PathBuf;

/// Subcommands of the `tofu` CLI that terrarium drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subcommand {
    Init,
    Plan,
    Apply,
    Destroy,
    Output,
    Show,
    Refresh,
    State,
    Version,
}

impl Subcommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Subcommand::Init => "init",
            Subcommand::Plan => "plan",
            Subcommand::Apply => "apply",
            Subcommand::Destroy => "destroy",
            Subcommand::Output => "output",
            Subcommand::Show => "show",
            Subcommand::Refresh => "refresh",
            Subcommand::State => "state",
            Subcommand::Version => "version",
        }
    }
}

impl fmt::Display for Subcommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `tofu` invocation: an optional working-directory override, the
/// subcommand, then its arguments in order.
///
/// ```
/// use terrarium_tofu::{Subcommand, TofuCommand};
///
/// let args = TofuCommand::new(Subcommand::Output)
///     .chdir("/srv/tr01/vpn")
///     .json()
///     .arg("aws_vpn_info")
///     .to_args();
/// assert_eq!(args, ["-chdir=/srv/tr01/vpn", "output", "-json", "aws_vpn_info"]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TofuCommand {
    subcommand: Subcommand,
    chdir: Option<PathBuf>,
    args: Vec<String>,
}

impl TofuCommand {
    pub fn new(subcommand: Subcommand) -> Self {
        Self {
            subcommand,
            chdir: None,
            args: Vec::new(),
        }
    }

    pub fn chdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.chdir = Some(dir.into());
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn auto_approve(self) -> Self {
        self.arg("-auto-approve")
    }

    pub fn json(self) -> Self {
        self.arg("-json")
    }

    /// Commands that only read state and may run alongside each other.
    pub fn is_read_only(&self) -> bool {
        matches!(
            self.subcommand,
            Subcommand::Output | Subcommand::Show | Subcommand::Version
        )
    }

    pub fn to_args(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.args.len() + 2);
        if let Some(dir) = &self.chdir {
            out.push(format!("-chdir={}", dir.display()));
        }
        out.push(self.subcommand.as_str().to_string());
        out.extend(self.args.iter().cloned());
        out
    }
}

impl fmt::Display for TofuCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_args().join(" "))
    }
}
