use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "logwarden",
    version,
    about = "Multi-protocol log ingestion and observability server",
    long_about = "Accepts syslog, GELF, Beats, Fluent and structured HTTP logs, \
                  normalizes them into a common schema, and serves search, \
                  alerting and live streaming on top."
)]
pub struct Cli {
    /// Data directory (defaults to LOGWARDEN_DATA or the XDG data dir)
    #[arg(long, global = true)]
    pub data_dir: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the server (the default when no command is given)
    Serve,

    /// Create the data directory layout and a starter config.toml
    Init,

    /// Validate configuration and report what the server would do
    Check,

    /// Manage local accounts
    User {
        #[command(subcommand)]
        command: UserCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum UserCommand {
    /// Create a user
    Add {
        username: String,
        /// Role: admin or viewer
        #[arg(long, default_value = "viewer")]
        role: String,
        /// Password (prompted from stdin when omitted)
        #[arg(long)]
        password: Option<String>,
    },
    /// Change a user's password
    Passwd {
        username: String,
        #[arg(long)]
        password: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_defaults_to_serve() {
        let cli = Cli::parse_from(["logwarden"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn user_add_parses() {
        let cli = Cli::parse_from(["logwarden", "user", "add", "ops", "--role", "admin"]);
        match cli.command {
            Some(Command::User {
                command: UserCommand::Add { username, role, .. },
            }) => {
                assert_eq!(username, "ops");
                assert_eq!(role, "admin");
            }
            other => panic!("unexpected parse: {:?}", other),
        }
    }

    #[test]
    fn global_data_dir_flag() {
        let cli = Cli::parse_from(["logwarden", "--data-dir", "/tmp/lw", "check"]);
        assert_eq!(cli.data_dir.as_deref(), Some("/tmp/lw"));
    }
}
