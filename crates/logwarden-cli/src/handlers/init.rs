use anyhow::Result;
use is_terminal::IsTerminal;
use logwarden_runtime::Config;
use owo_colors::OwoColorize;

/// Scaffold the data directory and write a starter `config.toml` the
/// operator can edit before the first `serve`.
pub fn run(data_dir: Option<&str>) -> Result<()> {
    let config = Config::load(data_dir)?;
    let colored = std::io::stdout().is_terminal();

    std::fs::create_dir_all(config.databases_dir())?;
    std::fs::create_dir_all(config.logs_dir())?;
    std::fs::create_dir_all(config.backups_dir())?;

    let config_path = config.data_dir.join("config.toml");
    if config_path.exists() {
        println!("config.toml already exists, leaving it untouched");
    } else {
        config.save_to(&config_path)?;
        println!("wrote {}", config_path.display());
    }

    let done = if colored {
        "initialized".green().to_string()
    } else {
        "initialized".to_string()
    };
    println!("{} {}", done, config.data_dir.display());
    println!("next: set AUTH_PASSWORD and run 'logwarden serve'");
    Ok(())
}
