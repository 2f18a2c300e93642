use anyhow::Result;
use is_terminal::IsTerminal;
use logwarden_runtime::Config;
use owo_colors::OwoColorize;

/// Validate configuration and report the effective listener set without
/// binding anything.
pub fn run(data_dir: Option<&str>) -> Result<()> {
    let config = Config::load(data_dir)?;
    let colored = std::io::stdout().is_terminal();
    let ok = |s: &str| {
        if colored {
            s.green().to_string()
        } else {
            s.to_string()
        }
    };
    let off = |s: &str| {
        if colored {
            s.dimmed().to_string()
        } else {
            s.to_string()
        }
    };

    println!("data dir     {}", config.data_dir.display());
    println!("api          0.0.0.0:{} (https: {})", config.port, config.use_https);

    let l = &config.listeners;
    let listener = |enabled: bool, name: &str, detail: String| {
        if enabled {
            println!("{:<12} {}", ok(name), detail);
        } else {
            println!("{:<12} {}", off(name), "disabled");
        }
    };
    listener(
        l.syslog_enabled,
        "syslog",
        format!("udp/{} tcp/{}", l.syslog_udp_port, l.syslog_tcp_port),
    );
    listener(
        l.gelf_enabled,
        "gelf",
        format!("udp/{} tcp/{}", l.gelf_udp_port, l.gelf_tcp_port),
    );
    listener(l.beats_enabled, "beats", format!("tcp/{}", l.beats_port));
    listener(l.fluent_enabled, "fluent", format!("http/{}", l.fluent_port));
    for path in &l.tail_paths {
        println!("{:<12} {}", ok("tail"), path.display());
    }

    println!(
        "retention    {} day(s), {} policies, backup at '{}'",
        config.log_retention_days,
        config.effective_retention_policies().len(),
        config.backup_schedule,
    );

    if config.production {
        println!("environment  production");
    } else {
        println!("environment  development (ephemeral JWT secret allowed)");
    }

    println!("{}", ok("configuration ok"));
    Ok(())
}
