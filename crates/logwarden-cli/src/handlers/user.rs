use anyhow::{bail, Context, Result};
use logwarden_runtime::Config;
use logwarden_store::Database;

use crate::args::UserCommand;

pub fn run(data_dir: Option<&str>, command: UserCommand) -> Result<()> {
    let config = Config::load(data_dir)?;
    let db_path = config.databases_dir().join("logwarden.db");
    let mut db = Database::open(&db_path)
        .with_context(|| format!("opening {}", db_path.display()))?;

    match command {
        UserCommand::Add {
            username,
            role,
            password,
        } => {
            if !matches!(role.as_str(), "admin" | "viewer") {
                bail!("role must be 'admin' or 'viewer'");
            }
            let password = resolve_password(password)?;
            db.create_user(&username, &password, &random_salt(), &role)?;
            db.record_audit("cli", "user.create", &format!("users/{}", username), None)?;
            println!("user '{}' created with role {}", username, role);
        }
        UserCommand::Passwd { username, password } => {
            let password = resolve_password(password)?;
            db.set_user_password(&username, &password, &random_salt())?;
            db.record_audit("cli", "user.passwd", &format!("users/{}", username), None)?;
            println!("password updated for '{}'", username);
        }
    }
    Ok(())
}

fn resolve_password(flag: Option<String>) -> Result<String> {
    if let Some(password) = flag {
        return Ok(password);
    }
    eprint!("password: ");
    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .context("reading password from stdin")?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        bail!("password must not be empty");
    }
    Ok(password)
}

fn random_salt() -> String {
    use rand::Rng;
    let bytes: [u8; 16] = rand::thread_rng().r#gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
