use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gastown::config::{self, agents::AgentRegistry, TownConfig};
use gastown::db::Database;
use gastown::lifecycle::{self, Orchestrator};
use gastown::models::*;
use gastown::molecule::{render, FormulaLibrary, MoleculeEngine};
use gastown::{api, mcp, workspace};

#[derive(Parser)]
#[command(name = "gt")]
#[command(about = "Gas Town: run a town of agent rigs and walk them through molecules")]
struct Cli {
    /// Town root (defaults to the town enclosing the current directory)
    #[arg(long, global = true, env = "GT_TOWN_ROOT")]
    town: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stop all Gas Town services
    Down(DownArgs),
    /// Work with molecules
    #[command(subcommand)]
    Mol(MolCommand),
    /// List agent runtime presets
    Agents {
        /// Agent registry file merged over the built-in presets
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Start the HTTP API
    Serve {
        /// Port for HTTP API
        #[arg(short, long, default_value = "3000")]
        port: u16,
    },
    /// Start MCP server via stdio
    Mcp,
}

#[derive(Args)]
struct DownArgs {
    /// Also stop bd daemons/activity
    #[arg(short, long)]
    all: bool,
    /// Skip graceful shutdown
    #[arg(short, long)]
    force: bool,
    /// Kill the entire tmux server (DESTRUCTIVE - kills non-GT sessions!)
    #[arg(long)]
    nuke: bool,
    /// Preview what would be stopped without taking action
    #[arg(long)]
    dry_run: bool,
    /// Only show errors
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Subcommand)]
enum MolCommand {
    /// Compile a formula into a protomolecule
    Cook { formula: String },
    /// Pour a durable molecule
    Pour {
        proto_id: String,
        /// Variable binding, repeatable
        #[arg(long = "var", value_parser = parse_var)]
        vars: Vec<(String, String)>,
    },
    /// Create an ephemeral wisp
    Wisp {
        proto_id: String,
        #[arg(long = "var", value_parser = parse_var)]
        vars: Vec<(String, String)>,
    },
    /// Pour a molecule bonded onto an existing task
    Bond {
        proto_id: String,
        parent_id: String,
        #[arg(long = "var", value_parser = parse_var)]
        vars: Vec<(String, String)>,
    },
    /// Show progress of a molecule (default: the attached one)
    Current {
        instance_id: Option<String>,
        #[arg(long, env = "GT_AGENT", default_value = "overseer")]
        agent: String,
    },
    /// Claim a ready step
    Start { step_id: String },
    /// Close a step
    Close {
        step_id: String,
        /// Claim the next step
        #[arg(long, conflicts_with = "no_auto")]
        r#continue: bool,
        /// Leave the next step ready but unclaimed
        #[arg(long)]
        no_auto: bool,
    },
    /// Collapse a molecule or wisp into a digest
    Squash {
        instance_id: String,
        #[arg(short, long)]
        summary: String,
    },
    /// Discard a wisp
    Burn { wisp_id: String },
    /// Pin a molecule to the agent's context
    Attach {
        molecule_id: String,
        #[arg(long, env = "GT_AGENT", default_value = "overseer")]
        agent: String,
    },
    /// Unpin the agent's molecule
    Detach {
        #[arg(long, env = "GT_AGENT", default_value = "overseer")]
        agent: String,
    },
}

fn parse_var(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))
}

/// Initialize tracing with output to stderr (for MCP mode) or stdout
fn init_tracing(use_stderr: bool) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "gastown=info,tower_http=info".into()),
    );

    if use_stderr {
        // MCP mode: log to stderr so stdout is clean for protocol
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

fn open_engine(config: &TownConfig, town_root: Option<&Path>) -> anyhow::Result<MoleculeEngine<Database>> {
    let db = match (town_root, &config.db_path) {
        (Some(root), _) => Database::open(config.database_path(root))?,
        (None, Some(path)) => Database::open(path.clone())?,
        (None, None) => Database::open_default()?,
    };
    db.migrate()?;

    let formulas = match town_root {
        Some(root) => FormulaLibrary::load_dir(&config::formulas_dir(root))?,
        None => FormulaLibrary::new(),
    };
    tracing::debug!(formulas = formulas.len(), "Loaded formula library");

    Ok(MoleculeEngine::new(db, formulas, config.workflow))
}

async fn run_down(config: TownConfig, args: DownArgs) -> anyhow::Result<()> {
    let town_root = workspace::resolve_town_root(config.town_root.as_deref())?;
    let opts = ShutdownOptions {
        all: args.all,
        force: args.force,
        nuke: args.nuke,
        dry_run: args.dry_run,
        quiet: args.quiet,
    };

    if let Some(warning) = lifecycle::nuke_warning(&opts, config.nuke_acknowledged) {
        println!("\n{}\n", warning);
    }
    if opts.dry_run {
        println!("{}\n", lifecycle::DRY_RUN_BANNER);
    }

    let grace = config.shutdown_grace;
    let result = tokio::task::spawn_blocking(move || {
        let supervisor = lifecycle::TmuxSupervisor::default();
        let daemon = lifecycle::PidFileDaemon::new(&town_root);
        let rigs = lifecycle::TownRigs::new(&town_root);
        let bd = lifecycle::BdProcesses::new();
        let feed = lifecycle::FeedLog::new(&town_root);

        Orchestrator::new(&supervisor, &daemon, &rigs, &bd, &feed)
            .with_grace(grace)
            .shutdown(&opts, &mut |report: &UnitReport| {
                if let Some(line) = lifecycle::render_unit(report, opts.quiet) {
                    println!("{}", line);
                }
            })
    })
    .await?;

    println!("\n{}", lifecycle::render_summary(&result));
    if !result.dry_run && !result.success() {
        anyhow::bail!("not all services stopped");
    }
    Ok(())
}

fn run_mol(engine: &MoleculeEngine<Database>, command: MolCommand) -> anyhow::Result<()> {
    match command {
        MolCommand::Cook { formula } => {
            let proto = engine.cook(&formula)?;
            println!("Cooked {} ({} steps)", proto.id, proto.steps.len());
            for slot in &proto.vars {
                match slot.default {
                    Some(ref default) => println!("  var {} (default: {})", slot.name, default),
                    None => println!("  var {}", slot.name),
                }
            }
        }
        MolCommand::Pour { proto_id, vars } => {
            let progress = engine.pour(&proto_id, &vars.into_iter().collect())?;
            print!("{}", render::render_progress(&progress));
        }
        MolCommand::Wisp { proto_id, vars } => {
            let progress = engine.wisp(&proto_id, &vars.into_iter().collect())?;
            print!("{}", render::render_progress(&progress));
        }
        MolCommand::Bond {
            proto_id,
            parent_id,
            vars,
        } => {
            let progress = engine.bond(&proto_id, &vars.into_iter().collect(), &parent_id)?;
            print!("{}", render::render_progress(&progress));
        }
        MolCommand::Current { instance_id, agent } => {
            let ctx = engine.store().load_agent_context(&agent)?;
            let progress = engine.current(&ctx, instance_id.as_deref())?;
            print!("{}", render::render_progress(&progress));
            if let Some(step) = progress.current_step() {
                println!("Next: {} {}", step.id, step.title);
            }
        }
        MolCommand::Start { step_id } => {
            let step = engine.start(&step_id)?;
            println!("Started {}: {}", step.id, step.title);
        }
        MolCommand::Close {
            step_id,
            r#continue,
            no_auto,
        } => {
            let mode = if r#continue {
                CloseMode::Continue
            } else if no_auto {
                CloseMode::NoAuto
            } else {
                CloseMode::Plain
            };
            let outcome = engine.close(&step_id, mode)?;
            println!("{}", render::render_close(&outcome));
        }
        MolCommand::Squash {
            instance_id,
            summary,
        } => {
            let digest = engine.squash(&instance_id, &summary)?;
            println!("{}", render::render_digest(&digest));
        }
        MolCommand::Burn { wisp_id } => {
            engine.burn(&wisp_id)?;
            println!("Burned {}", wisp_id);
        }
        MolCommand::Attach { molecule_id, agent } => {
            let mut ctx = engine.store().load_agent_context(&agent)?;
            engine.attach(&mut ctx, &molecule_id)?;
            engine.store().save_agent_context(&ctx)?;
            println!("Attached {} to {}", molecule_id, agent);
        }
        MolCommand::Detach { agent } => {
            let mut ctx = engine.store().load_agent_context(&agent)?;
            match engine.detach(&mut ctx) {
                Some(id) => {
                    engine.store().save_agent_context(&ctx)?;
                    println!("Detached {} from {}", id, agent);
                }
                None => println!("Nothing attached to {}", agent),
            }
        }
    }
    Ok(())
}

fn run_agents(town_root: Option<&Path>, config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.or_else(|| town_root.map(|r| r.join("settings").join("agents.json")));
    let registry = match path {
        Some(ref path) => AgentRegistry::load(path)?,
        None => AgentRegistry::builtin(),
    };

    for name in registry.names() {
        let Some(info) = registry.get(name) else {
            continue;
        };
        let builtin = if config::agents::is_known_preset(name) {
            ""
        } else {
            " (custom)"
        };
        println!("{}{}: {} {}", name, builtin, info.command, info.args.join(" "));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // MCP mode needs stderr for logging since stdout is the protocol channel
    let use_stderr = matches!(cli.command, Commands::Mcp);
    init_tracing(use_stderr);

    let mut config = TownConfig::from_env();
    if cli.town.is_some() {
        config.town_root = cli.town;
    }

    match cli.command {
        Commands::Down(args) => run_down(config, args).await?,
        Commands::Mol(command) => {
            let town_root = workspace::resolve_town_root(config.town_root.as_deref()).ok();
            let engine = open_engine(&config, town_root.as_deref())?;
            run_mol(&engine, command)?;
        }
        Commands::Agents { config: path } => {
            let town_root = workspace::resolve_town_root(config.town_root.as_deref()).ok();
            run_agents(town_root.as_deref(), path)?;
        }
        Commands::Serve { port } => {
            let town_root = workspace::resolve_town_root(config.town_root.as_deref()).ok();
            let engine = Arc::new(open_engine(&config, town_root.as_deref())?);
            let app = api::create_router(engine);

            let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
            tracing::info!("Gas Town API listening on http://127.0.0.1:{}", port);

            axum::serve(listener, app).await?;
        }
        Commands::Mcp => {
            let town_root = workspace::resolve_town_root(config.town_root.as_deref()).ok();
            let engine = Arc::new(open_engine(&config, town_root.as_deref())?);
            mcp::run_stdio_server(engine).await?;
        }
    }

    Ok(())
}
