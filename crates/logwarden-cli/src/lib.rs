mod args;
mod handlers;

pub use args::{Cli, Command, UserCommand};

use anyhow::Result;

/// Dispatch a parsed command line.
pub fn run(cli: Cli) -> Result<()> {
    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => handlers::serve::run(cli.data_dir.as_deref()),
        Command::Init => handlers::init::run(cli.data_dir.as_deref()),
        Command::Check => handlers::check::run(cli.data_dir.as_deref()),
        Command::User { command } => handlers::user::run(cli.data_dir.as_deref(), command),
    }
}

/// Exit codes: 0 normal, 1 config/startup failure, 2 port in use.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<logwarden_runtime::Error>() {
        Some(logwarden_runtime::Error::PortInUse(_)) => 2,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_in_use_maps_to_exit_two() {
        let err = anyhow::Error::new(logwarden_runtime::Error::PortInUse(514));
        assert_eq!(exit_code_for(&err), 2);

        let err = anyhow::Error::new(logwarden_runtime::Error::Config("x".to_string()));
        assert_eq!(exit_code_for(&err), 1);
    }
}
