//! CLI definitions for almanac.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Debug, Parser)]
#[command(
    name = "almanac",
    version,
    about = "Terminal client for the Almanac analytics dashboard",
    infer_subcommands = true,
    after_help = "Examples:\n  almanac                                # open the shell against the configured server\n  almanac --server http://10.0.0.5:8000  # override the server address\n  almanac --verbose                      # log requests to stderr\n  almanac completions zsh                # print zsh completions"
)]
pub struct Cli {
    /// Configuration file (defaults to $ALMANAC_CONFIG, then ~/.almanac/almanac.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Server base URL, overriding the configuration file.
    #[arg(long, global = true)]
    pub server: Option<String>,
    /// Show debug logging.
    #[arg(long, short, global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Open the interactive dashboard shell (default).
    Shell,
    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// One line typed at the dashboard prompt.
#[derive(Debug, Parser)]
#[command(
    no_binary_name = true,
    disable_help_subcommand = true,
    disable_version_flag = true,
    infer_subcommands = true
)]
pub struct ShellLine {
    #[command(subcommand)]
    pub command: ShellCommand,
}

#[derive(Debug, Subcommand, PartialEq, Eq)]
pub enum ShellCommand {
    /// Sign in.
    Login {
        /// Account name (prompted when omitted).
        username: Option<String>,
    },
    /// Sign out.
    Logout,
    /// Show the signed-in account.
    Whoami,
    /// Change the password of the signed-in account.
    Passwd,
    /// List the dashboard tabs.
    Tabs,
    /// Switch to a tab.
    Open {
        /// Tab id, as listed by `tabs`.
        tab: String,
    },
    /// Start a market data update and follow its progress.
    Update {
        /// `full` or `incremental`.
        kind: String,
        /// Replace stored rows (full updates only).
        #[arg(long, action = ArgAction::SetTrue)]
        overwrite: bool,
    },
    /// Show the update progress panel.
    Progress,
    /// Show the stored data summary.
    Status,
    /// Look up an instrument by code or name.
    Find {
        /// Code or name fragment.
        #[arg(required = true, num_args = 1..)]
        keyword: Vec<String>,
    },
    /// Download a statistics spreadsheet.
    Export {
        /// Export kind (stock-statistics, multi-month-statistics, month-filter,
        /// industry-statistics, industry-top-stocks, compare-sources).
        kind: String,
        /// JSON request body.
        #[arg(default_value = "{}")]
        body: String,
        /// Output directory or file.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// List accounts (admin).
    Users,
    /// Show, add, edit or delete one account (admin).
    User {
        #[command(subcommand)]
        action: UserAction,
    },
    /// Show or replace an account's permissions (admin).
    Perms {
        /// Account id.
        id: i64,
        /// New permission codes; omit to show the current ones.
        codes: Vec<String>,
    },
    /// List the permission catalog (admin).
    Catalog,
    /// Show or set the session duration in hours (admin).
    SessionHours {
        /// New duration, 1 to 8760.
        hours: Option<String>,
    },
    /// Show the shell commands.
    Help,
    /// Leave the shell.
    #[command(alias = "exit")]
    Quit,
}

#[derive(Debug, Subcommand, PartialEq, Eq)]
pub enum UserAction {
    /// Show one account.
    Show {
        /// Account id.
        id: i64,
    },
    /// Create an account; the password is prompted.
    Add {
        /// Account name.
        username: String,
        /// `user` or `admin`.
        #[arg(long, default_value = "user")]
        role: String,
        /// Expiry (YYYY-MM-DD or YYYY-MM-DD HH:MM:SS); omit for no expiry.
        #[arg(long)]
        valid_until: Option<String>,
    },
    /// Change an account; omitted fields keep their stored values.
    Edit(UserEdit),
    /// Delete an account.
    #[command(alias = "rm")]
    Delete {
        /// Account id.
        id: i64,
    },
}

#[derive(Debug, Args, PartialEq, Eq)]
pub struct UserEdit {
    /// Account id.
    pub id: i64,
    /// New account name.
    #[arg(long)]
    pub username: Option<String>,
    /// `user` or `admin`.
    #[arg(long)]
    pub role: Option<String>,
    /// Re-enable a disabled account.
    #[arg(long, conflicts_with = "disable")]
    pub enable: bool,
    /// Disable the account without deleting it.
    #[arg(long)]
    pub disable: bool,
    /// New expiry; an empty value removes it.
    #[arg(long)]
    pub valid_until: Option<String>,
    /// Prompt for a new password.
    #[arg(long)]
    pub password: bool,
}

/// Splits a prompt line into words, honouring single and double quotes.
pub fn split_line(line: &str) -> anyhow::Result<Vec<String>> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    let mut chars = line.chars();
    while let Some(ch) = chars.next() {
        match (quote, ch) {
            (Some(open), ch) if ch == open => quote = None,
            (Some('"'), '\\') => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            (Some(_), ch) => current.push(ch),
            (None, '\'' | '"') => {
                quote = Some(ch);
                in_word = true;
            }
            (None, ch) if ch.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            (None, ch) => {
                current.push(ch);
                in_word = true;
            }
        }
    }
    if let Some(open) = quote {
        anyhow::bail!("unterminated {open} quote");
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}
