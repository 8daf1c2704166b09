use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use kvclaw::activity::{ChangeLog, HealthJournal};
use kvclaw::agent::{
    Agent, AgentDeps, AgentState, ContextBuilder, Dispatcher, Scheduler, Watchdog,
};
use kvclaw::channels::{ChannelManager, CliChannel, HttpChannel, HttpServer};
use kvclaw::cli::{self, Cli, Command};
use kvclaw::config::Config;
use kvclaw::llm::{self, ProviderRouter};
use kvclaw::memory::{self, LongTermMemory};
use kvclaw::plugins::PluginRegistry;
use kvclaw::plugins::builtin::{self, PluginDeps, UsageReportPlugin};
use kvclaw::tools::{ToolCatalog, Toolbox};
use kvclaw::usage::UsageTracker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Ask { prompt } => {
            let tracker = open_usage(&config)?;
            let router = Arc::new(build_router(&config, tracker.clone()));
            let deps = PluginDeps {
                tracker,
                changelog: open_changelog(&config)?,
                journal: open_health_journal(&config)?,
                router: Some(router.clone()),
            };
            let dispatcher = Dispatcher::new(build_registry(&config, deps)?)
                .with_plugin_timeout(config.agent.plugin_timeout);
            println!("{}", cli::ask(&dispatcher, &router, &prompt.join(" ")).await);
            Ok(())
        }
        Command::Usage { view } => {
            let tracker = open_usage(&config)?;
            let report =
                UsageReportPlugin::new(tracker, config.usage.limits.clone(), config.usage.warn_ratio)
                    .render(view.into())?;
            println!("{}", report);
            Ok(())
        }
        Command::Tools => {
            print!("{}", cli::render_tools(&ToolCatalog::new()));
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("kvclaw=info"));
    let json = std::env::var("KVCLAW_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    // stdout belongs to the terminal channel.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn open_usage(config: &Config) -> anyhow::Result<Arc<UsageTracker>> {
    let tracker = UsageTracker::open(&config.usage.db_path).with_context(|| {
        format!(
            "Failed to open usage database at {}",
            config.usage.db_path.display()
        )
    })?;
    Ok(Arc::new(tracker))
}

fn build_router(config: &Config, tracker: Arc<UsageTracker>) -> ProviderRouter {
    ProviderRouter::new(llm::create_providers(&config.llm))
        .with_usage_tracker(tracker)
        .with_timeout(config.llm.request_timeout)
}

fn build_registry(config: &Config, deps: PluginDeps) -> anyhow::Result<Arc<PluginRegistry>> {
    let registry = PluginRegistry::from_plugins(builtin::all(&config.skills, &config.usage, deps))
        .context("Failed to register plugins")?;
    Ok(Arc::new(registry))
}

fn open_changelog(config: &Config) -> anyhow::Result<Arc<ChangeLog>> {
    let path = &config.activity.changelog_db;
    let log = ChangeLog::open(path, &config.activity.watch_folders)
        .with_context(|| format!("Failed to open changelog database at {}", path.display()))?;
    Ok(Arc::new(log))
}

fn open_health_journal(config: &Config) -> anyhow::Result<Arc<HealthJournal>> {
    let path = &config.activity.health_db;
    let journal = HealthJournal::open(path)
        .with_context(|| format!("Failed to open health database at {}", path.display()))?;
    Ok(Arc::new(journal))
}

async fn run(config: Config) -> anyhow::Result<()> {
    tracing::info!("Data directory: {}", config.data_dir.display());

    let tracker = open_usage(&config)?;
    let router = Arc::new(build_router(&config, tracker.clone()));

    let memory = match LongTermMemory::open(
        &config.memory.db_path,
        memory::create_embeddings(&config.memory),
    ) {
        Ok(store) => Some(Arc::new(store)),
        Err(e) => {
            tracing::warn!("Long-term memory unavailable, continuing without it: {}", e);
            None
        }
    };

    let changelog = open_changelog(&config)?;
    let journal = open_health_journal(&config)?;
    let registry = build_registry(
        &config,
        PluginDeps {
            tracker: tracker.clone(),
            changelog: changelog.clone(),
            journal: journal.clone(),
            router: Some(router.clone()),
        },
    )?;
    let dispatcher =
        Arc::new(Dispatcher::new(registry.clone()).with_plugin_timeout(config.agent.plugin_timeout));

    let mut context = ContextBuilder::new(&config.agent.name, registry).with_result_limits(
        config.memory.fact_results,
        config.memory.conversation_results,
    );
    if let Some(store) = &memory {
        context = context.with_memory(store.clone());
    }

    let toolbox = Toolbox::from_config(&config.skills);
    let state = Arc::new(AgentState::new(config.agent.history_capacity));

    let mut channels = ChannelManager::new();
    channels.add(Box::new(
        CliChannel::new(&config.agent.user_id, &config.agent.name)
            .with_history_file(config.data_dir.join("history.txt")),
    ));

    let mut http_server = None;
    if let Some(http) = &config.http {
        let addr: SocketAddr = format!("{}:{}", http.host, http.port)
            .parse()
            .with_context(|| format!("Invalid HTTP address {}:{}", http.host, http.port))?;
        let channel = HttpChannel::new(http.clone());
        let routes = channel.routes();
        channels.add(Box::new(channel));
        http_server = Some(HttpServer::start(routes, addr).await?);
    }
    let channels = Arc::new(channels);

    let scheduler = Arc::new(
        Scheduler::new(
            config.scheduler.clone(),
            toolbox.probe.clone(),
            tracker,
            &config.usage,
        )
        .with_changelog(changelog, config.activity.repo_depth)
        .with_health_journal(journal, config.activity.retention),
    );
    let jobs = scheduler.spawn(channels.clone(), config.agent.user_id.clone());

    let _watchdog = Watchdog::new(config.watchdog.clone(), state.clone()).spawn();

    let agent = Agent::new(
        config.agent.clone(),
        AgentDeps {
            router,
            dispatcher,
            context,
            toolbox,
            memory,
            state,
        },
        channels,
    );
    let result = agent.run().await;

    for job in jobs {
        job.abort();
    }
    if let Some(server) = http_server.as_mut() {
        server.shutdown().await;
    }

    result.map_err(Into::into)
}
