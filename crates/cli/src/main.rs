use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use {
    anyhow::Result,
    clap::{Parser, Subcommand},
    tracing::{info, warn},
    tracing_subscriber::EnvFilter,
};

use {
    agentry_agents::{AgentSpec, SelectionOrigin, ServerSelection, model::EchoBindingFactory},
    agentry_context::UsageTracker,
    agentry_gateway::{AppState, HostPaths},
    agentry_mcp::LifecycleManager,
    agentry_sandbox::SandboxManager,
};

#[derive(Parser)]
#[command(name = "agentry", about = "Agentry — agent runtime host")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the host (default when no subcommand is provided).
    Serve(ServeArgs),
    /// List the predefined MCP server catalog with availability.
    ListServers,
    /// List agents on a running host.
    ListAgents {
        /// Gateway base URL.
        #[arg(long, default_value = "http://127.0.0.1:8765")]
        url: String,
    },
}

#[derive(Parser, Debug)]
struct ServeArgs {
    /// Address to bind to.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
    /// Port to listen on.
    #[arg(long, default_value_t = 8765)]
    port: u16,
    /// Skip starting MCP servers from the user config file.
    #[arg(long, env = "HOST_NO_CONFIG_PROVIDERS")]
    no_config_providers: bool,
    /// Skip starting the default agent's catalog MCP servers.
    #[arg(long, env = "HOST_NO_CATALOG_PROVIDERS")]
    no_catalog_providers: bool,
    /// Create a default agent with this id at startup.
    #[arg(long, env = "HOST_DEFAULT_AGENT")]
    default_agent: Option<String>,
    /// Display name for the default agent.
    #[arg(long, env = "HOST_AGENT_NAME")]
    agent_name: Option<String>,
    /// Enable code execution for the default agent.
    #[arg(long, env = "HOST_CODE_EXECUTION")]
    code_execution: bool,
    /// Comma-separated skills for the default agent.
    #[arg(long, env = "HOST_SKILLS")]
    skills: Option<String>,
    /// Comma-separated catalog MCP server ids for the default agent.
    #[arg(long, env = "HOST_PROVIDERS")]
    providers: Option<String>,
    /// Preferred transport advertised for the default agent
    /// (ws, agui, chat, a2a). Informational only; all four are mounted.
    #[arg(long, env = "HOST_PROTOCOL")]
    protocol: Option<String>,
    /// Model identifier for the default agent.
    #[arg(long, default_value = "echo:dev")]
    model: String,
    /// Remote sandbox URL (`<url>?token=<token>` switches the sandbox to
    /// the remote-notebook variant).
    #[arg(long, env = "HOST_REMOTE_SANDBOX")]
    remote_sandbox: Option<String>,
    /// Tool-proxy URL handed to remote sandboxes.
    #[arg(long, env = "HOST_TOOL_PROXY_URL")]
    tool_proxy_url: Option<String>,
    /// Folder for generated sandbox code.
    #[arg(long, env = "HOST_GENERATED_FOLDER")]
    generated_folder: Option<PathBuf>,
    /// Folder holding skill directories.
    #[arg(long, env = "HOST_SKILLS_FOLDER")]
    skills_folder: Option<PathBuf>,
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("agentry={level},tower_http=warn")));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    match cli.command {
        Some(Commands::Serve(args)) => serve(args).await,
        Some(Commands::ListServers) => {
            list_servers();
            Ok(())
        },
        Some(Commands::ListAgents { url }) => list_agents(&url).await,
        None => serve(ServeArgs::parse_from(["agentry"])).await,
    }
}

fn split_csv(value: &Option<String>) -> Vec<String> {
    value
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

async fn serve(args: ServeArgs) -> Result<()> {
    let cwd = std::env::current_dir()?;
    let paths = HostPaths {
        workspace: cwd.clone(),
        generated: args
            .generated_folder
            .clone()
            .unwrap_or_else(|| cwd.join("generated")),
        skills: args
            .skills_folder
            .clone()
            .unwrap_or_else(|| cwd.join("skills")),
    };

    // Process-level singletons, built once in main and passed by
    // reference everywhere.
    let lifecycle = Arc::new(LifecycleManager::new());
    let sandbox = Arc::new(SandboxManager::new());
    let tracker = Arc::new(UsageTracker::new());

    if let Some(ref url) = args.remote_sandbox {
        sandbox
            .configure_from_url(url, args.tool_proxy_url.clone(), None)
            .await;
    } else if args.tool_proxy_url.is_some() {
        sandbox
            .configure(agentry_sandbox::SandboxUpdate {
                tool_proxy_url: args.tool_proxy_url.clone(),
                ..Default::default()
            })
            .await;
    }

    let state = AppState::new(
        lifecycle,
        sandbox,
        tracker,
        Arc::new(EchoBindingFactory),
        paths,
        args.model.clone(),
    );

    if let Some(ref agent_id) = args.default_agent {
        create_default_agent(&state, agent_id, &args).await;
    }
    if let Some(ref protocol) = args.protocol {
        info!(protocol = %protocol, "preferred transport for the default agent");
    }

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    agentry_gateway::serve(state, addr, args.no_config_providers).await
}

async fn create_default_agent(state: &Arc<AppState>, agent_id: &str, args: &ServeArgs) {
    let providers = split_csv(&args.providers);

    if !args.no_catalog_providers {
        for provider in &providers {
            match state.lifecycle.start_server(provider, None, None).await {
                Ok(_) => info!(server = %provider, "started catalog MCP server for default agent"),
                Err(e) => warn!(server = %provider, error = %e, "failed to start catalog MCP server"),
            }
        }
    }

    let mut spec = AgentSpec::new(
        agent_id,
        args.agent_name.as_deref().unwrap_or("Agentry Agent"),
    );
    spec.model = Some(args.model.clone());
    spec.skills = split_csv(&args.skills);
    spec.mcp_servers = providers
        .into_iter()
        .map(|id| ServerSelection {
            id,
            origin: SelectionOrigin::Catalog,
        })
        .collect();

    match agentry_gateway::registry::create_agent(state, spec, args.code_execution).await {
        Ok(_) => info!(agent = %agent_id, "default agent created"),
        Err(e) => warn!(agent = %agent_id, detail = %e.detail(), "failed to create default agent"),
    }
}

fn list_servers() {
    for server in agentry_catalog::list_catalog_servers() {
        let availability = if server.is_available {
            "available"
        } else {
            "missing env vars"
        };
        let required = if server.required_env_vars.is_empty() {
            String::new()
        } else {
            format!(" (requires {})", server.required_env_vars.join(", "))
        };
        println!("{:<12} {:<20} {}{}", server.id, server.name, availability, required);

        // Point at where missing credentials can be obtained.
        for var in &server.required_env_vars {
            if std::env::var(var).map(|v| !v.is_empty()).unwrap_or(false) {
                continue;
            }
            if let Some(spec) = agentry_catalog::ENVVAR_CATALOG.get(var.as_str())
                && let Some(url) = spec.registration_url
            {
                println!("             {var}: register at {url}");
            }
        }
    }
}

async fn list_agents(url: &str) -> Result<()> {
    let agents: Vec<serde_json::Value> = reqwest::get(format!("{url}/api/v1/agents"))
        .await?
        .error_for_status()?
        .json()
        .await?;
    if agents.is_empty() {
        println!("no agents registered");
        return Ok(());
    }
    for agent in agents {
        println!(
            "{:<16} {:<24} model={} codeExecution={}",
            agent["id"].as_str().unwrap_or_default(),
            agent["name"].as_str().unwrap_or_default(),
            agent["model"].as_str().unwrap_or_default(),
            agent["codeExecution"],
        );
    }
    Ok(())
}
