use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hostpace::clock::{SharedClock, SystemClock};
use hostpace::config::{Config, TransportKind};
use hostpace::crawler::{standard_chain, CrawlWorker, HttpFetcher};
use hostpace::due_queue::{DueQueue, DueQueueWorker};
use hostpace::politeness::DistributedRateLimiter;
use hostpace::recovery::OrphanRecovery;
use hostpace::robots::HttpRobotsChecker;
use hostpace::scheduler::Scheduler;
use hostpace::storage::{PostgresUrlRepository, UrlRepository};
use hostpace::store::{RateLimitStore, RedisStore};
use hostpace::transport::{
    transport_key, ChannelTransport, RedisListTransport, UrlConsumer, UrlPublisher,
};

#[derive(Parser)]
#[command(
    name = "hostpace",
    version,
    about = "Crawl coordination: per-host politeness, due queue, scheduling and orphan recovery",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file; environment variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); defaults to logging.format
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Claim ready URLs from the backlog and publish them to the transport
    Scheduler,

    /// Consume URLs from the transport and crawl them
    Worker {
        /// Also drain the due queue in this process
        #[arg(long, default_value = "false")]
        with_drain: bool,
    },

    /// Replay deferred URLs from the due queue once they are due
    Drain,

    /// Return URLs stuck in flight to the backlog
    Recover {
        /// Run a single sweep and exit
        #[arg(long, default_value = "false")]
        once: bool,
    },

    /// Run scheduler, worker, drain and recovery in one process
    Standalone,

    /// Create the URL store schema
    Migrate,

    /// Print the metrics registry in Prometheus text format
    Metrics,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    let format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| config.logging.format.clone());
    setup_tracing(&format, &config.logging.level, cli.verbose)?;

    if let Err(e) = hostpace::metrics::init_metrics() {
        tracing::warn!("Metrics initialization failed: {}", e);
    }

    let cancel = CancellationToken::new();
    spawn_shutdown_listener(cancel.clone());

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "hostpace starting");

    match cli.command {
        Commands::Scheduler => run_scheduler(&config, cancel).await?,
        Commands::Worker { with_drain } => run_worker(&config, with_drain, cancel).await?,
        Commands::Drain => run_drain(&config, cancel).await?,
        Commands::Recover { once } => run_recover(&config, once, cancel).await?,
        Commands::Standalone => run_standalone(&config, cancel).await?,
        Commands::Migrate => {
            let repo = connect_repo(&config).await?;
            repo.migrate().await.context("Failed to create URL store schema")?;
        }
        Commands::Metrics => {
            let text = hostpace::metrics::encode_metrics()
                .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {e}"))?;
            print!("{text}");
        }
    }

    tracing::info!("hostpace stopped");
    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    let config = match path {
        Some(path) => {
            let mut config = Config::from_file(path)?;
            config.apply_env();
            config
        }
        None => Config::from_env()?,
    };
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) if verbose => tracing_subscriber::EnvFilter::new("hostpace=debug,info"),
        Err(_) => tracing_subscriber::EnvFilter::try_new(format!("hostpace={level},warn"))
            .context("Invalid logging.level")?,
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}

fn spawn_shutdown_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown requested"),
            Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
        }
        cancel.cancel();
    });
}

// ============================================================================
// Wiring
// ============================================================================

async fn connect_repo(config: &Config) -> Result<Arc<PostgresUrlRepository>> {
    let repo = PostgresUrlRepository::new(&config.database)
        .await
        .context("Failed to connect to PostgreSQL")?;
    Ok(Arc::new(repo))
}

async fn connect_store(config: &Config) -> Result<RedisStore> {
    RedisStore::try_new(&config.redis)
        .await
        .context("Failed to set up Redis store")
}

fn build_transport(
    config: &Config,
    store: &RedisStore,
) -> (Arc<dyn UrlPublisher>, Arc<dyn UrlConsumer>) {
    match config.transport.kind {
        TransportKind::Redis => {
            let transport = Arc::new(RedisListTransport::new(
                store.pool().clone(),
                transport_key(&config.redis.key_prefix, &config.transport.queue_name),
                Duration::from_secs(config.transport.pop_timeout_secs),
            ));
            let publisher: Arc<dyn UrlPublisher> = transport.clone();
            let consumer: Arc<dyn UrlConsumer> = transport;
            (publisher, consumer)
        }
        TransportKind::Channel => {
            let transport = Arc::new(ChannelTransport::new(config.transport.channel_capacity));
            let publisher: Arc<dyn UrlPublisher> = transport.clone();
            let consumer: Arc<dyn UrlConsumer> = transport;
            (publisher, consumer)
        }
    }
}

fn warn_if_channel(config: &Config) {
    if config.transport.kind == TransportKind::Channel {
        tracing::warn!(
            "transport.kind = channel only connects components in the same process; use `standalone`"
        );
    }
}

/// Everything a crawl worker needs
struct CrawlStack {
    worker: Arc<CrawlWorker>,
    due_queue: DueQueue,
}

fn build_crawl_stack(
    config: &Config,
    store: &RedisStore,
    repo: Arc<dyn UrlRepository>,
    clock: SharedClock,
) -> Result<CrawlStack> {
    let store: Arc<dyn RateLimitStore> = Arc::new(store.clone());
    let limiter = Arc::new(DistributedRateLimiter::new(
        store.clone(),
        clock.clone(),
        config.politeness.clone(),
        config.redis.key_prefix.clone(),
    ));
    let due_queue = DueQueue::new(store, &config.redis.key_prefix);

    let robots_client = reqwest::Client::builder()
        .user_agent(&config.fetch.user_agent)
        .timeout(config.request_timeout())
        .build()
        .context("Failed to create robots.txt client")?;
    let robots = Arc::new(HttpRobotsChecker::new(
        robots_client,
        Duration::from_secs(config.fetch.robots_cache_ttl_secs),
    ));

    let fetcher = HttpFetcher::new(&config.fetch)
        .context("Failed to create HTTP fetcher")?
        .with_limiter(limiter.clone());

    let chain = standard_chain(robots, &config.fetch.user_agent, limiter, due_queue.clone());
    tracing::debug!(policies = ?chain.names(), "Policy chain built");

    let worker = Arc::new(CrawlWorker::new(
        chain,
        Arc::new(fetcher),
        repo,
        clock,
        &config.fetch,
    ));
    Ok(CrawlStack { worker, due_queue })
}

// ============================================================================
// Commands
// ============================================================================

async fn run_scheduler(config: &Config, cancel: CancellationToken) -> Result<()> {
    warn_if_channel(config);
    let repo = connect_repo(config).await?;
    let store = connect_store(config).await?;
    let (publisher, _) = build_transport(config, &store);

    let scheduler = Scheduler::new(
        repo,
        publisher,
        Arc::new(SystemClock),
        config.scheduler.clone(),
    );
    scheduler.run(cancel).await;
    Ok(())
}

async fn run_worker(config: &Config, with_drain: bool, cancel: CancellationToken) -> Result<()> {
    warn_if_channel(config);
    let repo = connect_repo(config).await?;
    let store = connect_store(config).await?;
    let (_, consumer) = build_transport(config, &store);
    let clock: SharedClock = Arc::new(SystemClock);

    let stack = build_crawl_stack(config, &store, repo, clock.clone())?;

    let drain = with_drain.then(|| {
        let drainer = DueQueueWorker::new(
            stack.due_queue.clone(),
            stack.worker.clone(),
            clock,
            config.due_queue.clone(),
        );
        let cancel = cancel.clone();
        tokio::spawn(async move { drainer.run(cancel).await })
    });

    stack.worker.clone().run(consumer, cancel).await;

    if let Some(handle) = drain {
        handle.await.context("Due queue worker panicked")?;
    }
    Ok(())
}

async fn run_drain(config: &Config, cancel: CancellationToken) -> Result<()> {
    let repo = connect_repo(config).await?;
    let store = connect_store(config).await?;
    let clock: SharedClock = Arc::new(SystemClock);

    let stack = build_crawl_stack(config, &store, repo, clock.clone())?;
    let drainer = DueQueueWorker::new(stack.due_queue, stack.worker, clock, config.due_queue.clone());
    drainer.run(cancel).await;
    Ok(())
}

async fn run_recover(config: &Config, once: bool, cancel: CancellationToken) -> Result<()> {
    let repo = connect_repo(config).await?;
    let recovery = OrphanRecovery::new(repo, Arc::new(SystemClock), config.recovery.clone());

    if once {
        let recovered = recovery.sweep_once().await.context("Orphan sweep failed")?;
        tracing::info!(recovered, "Sweep finished");
    } else {
        recovery.run(cancel).await;
    }
    Ok(())
}

async fn run_standalone(config: &Config, cancel: CancellationToken) -> Result<()> {
    let repo = connect_repo(config).await?;
    let store = connect_store(config).await?;
    let (publisher, consumer) = build_transport(config, &store);
    let clock: SharedClock = Arc::new(SystemClock);

    let stack = build_crawl_stack(config, &store, repo.clone(), clock.clone())?;

    let scheduler = Scheduler::new(
        repo.clone(),
        publisher,
        clock.clone(),
        config.scheduler.clone(),
    );
    let recovery = OrphanRecovery::new(repo, clock.clone(), config.recovery.clone());
    let drainer = DueQueueWorker::new(
        stack.due_queue.clone(),
        stack.worker.clone(),
        clock,
        config.due_queue.clone(),
    );

    tokio::join!(
        scheduler.run(cancel.clone()),
        recovery.run(cancel.clone()),
        drainer.run(cancel.clone()),
        stack.worker.clone().run(consumer, cancel),
    );
    Ok(())
}
