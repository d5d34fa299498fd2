mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use cp_bridge::Orchestrator;
use cp_core::config::Config;

/// command-post CLI -- talk to the command-post service and drive the
/// assistant terminal from a shell.
#[derive(Parser)]
#[command(name = "cpost", version, about)]
struct Cli {
    /// Service base URL (overrides config and COMMAND_POST_URL).
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Config file to use instead of ~/.command-post/config.toml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    json_logs: bool,

    /// Print this run's request metrics to stderr when done.
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe the service and show the session id (default).
    Status,

    /// Print the raw health report.
    Health,

    /// List available edicts (automations).
    Edicts,

    /// Trigger an edict by name.
    Run {
        /// Edict name.
        name: String,
        /// JSON context to send along.
        #[arg(long, default_value = "{}")]
        context: String,
    },

    /// List scheduled jobs.
    Schedules,

    /// Show consciousness status, or ask it something.
    Consciousness {
        #[arg(short, long)]
        query: Option<String>,
    },

    /// Show recent service logs.
    Logs {
        #[arg(short, long, default_value_t = 50)]
        limit: u32,
    },

    /// Wekan and foundry status in one view.
    Integrations,

    /// Service statistics.
    Stats,

    /// Send one chat message.
    Chat {
        /// Message text.
        message: String,
    },

    /// Show chat history for this session.
    History,

    /// Show (or reset) the session identifier.
    Session {
        #[arg(long)]
        reset: bool,
    },

    /// Open the interactive terminal session.
    Shell,

    /// Launch the assistant in the terminal with task context.
    Claude {
        /// Task title.
        #[arg(long)]
        task: Option<String>,
        /// Task priority (needs --task).
        #[arg(long, requires = "task")]
        priority: Option<String>,
        /// Free-form context.
        #[arg(long, conflicts_with = "ui_context")]
        context: Option<String>,
        /// Capture the desktop's current UI context instead.
        #[arg(long)]
        ui_context: bool,
    },
}

fn load_config(path: Option<PathBuf>, api_url: Option<String>) -> anyhow::Result<Config> {
    let mut config = match path {
        Some(p) => Config::load_from(p)?,
        None => Config::load()?,
    };
    if let Some(url) = api_url {
        config.service.base_url = url;
        config.validate()?;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config, cli.api_url)?;
    cp_telemetry::logging::init(
        "cpost",
        &config.logging.level,
        cli.json_logs || config.logging.json,
    );

    let orch = Orchestrator::from_config(&config);

    match cli.command {
        None | Some(Commands::Status) => commands::status::run(&orch).await?,
        Some(Commands::Health) => commands::status::health(&orch).await?,
        Some(Commands::Edicts) => commands::remote::edicts(&orch).await?,
        Some(Commands::Run { name, context }) => {
            commands::remote::run_edict(&orch, &name, &context).await?
        }
        Some(Commands::Schedules) => commands::remote::schedules(&orch).await?,
        Some(Commands::Consciousness { query }) => {
            commands::remote::consciousness(&orch, query.as_deref()).await?
        }
        Some(Commands::Logs { limit }) => commands::remote::logs(&orch, limit).await?,
        Some(Commands::Integrations) => commands::remote::integrations(&orch).await?,
        Some(Commands::Stats) => commands::remote::stats(&orch).await?,
        Some(Commands::Chat { message }) => commands::chat::send(&orch, &message).await?,
        Some(Commands::History) => commands::chat::history(&orch).await?,
        Some(Commands::Session { reset }) => commands::session::run(&orch, reset)?,
        Some(Commands::Shell) => commands::terminal::shell(&orch).await?,
        Some(Commands::Claude {
            task,
            priority,
            context,
            ui_context,
        }) => {
            let launch = commands::terminal::ClaudeLaunch {
                task,
                priority,
                context,
                ui_context,
            };
            commands::terminal::claude(&orch, launch).await?
        }
    }

    if cli.metrics {
        eprint!("{}", cp_telemetry::metrics::global_metrics().export_prometheus());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn no_subcommand_means_status() {
        let cli = Cli::parse_from(["cpost"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn claude_flags_parse() {
        let cli = Cli::parse_from([
            "cpost", "claude", "--task", "Fix bug", "--priority", "high", "--context", "urgent",
        ]);
        match cli.command {
            Some(Commands::Claude {
                task,
                priority,
                context,
                ui_context,
            }) => {
                assert_eq!(task.as_deref(), Some("Fix bug"));
                assert_eq!(priority.as_deref(), Some("high"));
                assert_eq!(context.as_deref(), Some("urgent"));
                assert!(!ui_context);
            }
            _ => panic!("expected claude subcommand"),
        }
    }

    #[test]
    fn priority_requires_task() {
        assert!(Cli::try_parse_from(["cpost", "claude", "--priority", "high"]).is_err());
    }

    #[test]
    fn api_url_flag_overrides_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[service]\nbase_url = \"http://file:1\"\n").unwrap();

        let config = load_config(Some(path.clone()), None).unwrap();
        assert_eq!(config.service.base_url, "http://file:1");

        let config = load_config(Some(path), Some("http://flag:2".into())).unwrap();
        assert_eq!(config.service.base_url, "http://flag:2");
    }

    #[test]
    fn invalid_api_url_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "").unwrap();
        assert!(load_config(Some(path), Some("localhost".into())).is_err());
    }
}
