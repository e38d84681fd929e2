use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::builder::PossibleValuesParser;
use clap::{Args, Parser, Subcommand};
use dialoguer::{Confirm, theme::ColorfulTheme};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use sora::cache::ProviderCache;
use sora::config::{Settings, default_config_path};
use sora::http::HttpClient;
use sora::player::launch_player;
use sora::providers::ProviderRegistry;
use sora::resolver::{Resolution, ResolveRequest, Resolver};
use sora::types::Translation;

#[derive(Debug, Parser)]
#[command(
    name = "sora",
    about = "Resolve anime episodes from streaming sites and play them with mpv.",
    version
)]
struct Cli {
    /// Config file to read instead of the default location.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the stream URL for an episode.
    Resolve(EpisodeArgs),
    /// Resolve an episode and open it in the player.
    Play(EpisodeArgs),
    /// Manage the provider id cache.
    Cache {
        #[command(subcommand)]
        action: CacheCommand,
    },
    /// Manage the config file.
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },
}

#[derive(Debug, Args)]
struct EpisodeArgs {
    #[arg(value_name = "TITLE", required = true)]
    title: Vec<String>,

    /// Tracking-service (AniList) id of the show.
    #[arg(long, value_name = "ID")]
    media_id: u64,

    #[arg(short = 'e', long, value_name = "EPISODE")]
    episode: u32,

    #[arg(short = 'p', long, ignore_case = true, value_parser = provider_names())]
    provider: Option<String>,

    #[arg(long)]
    dub: bool,

    /// `best`, `worst`, or a label such as `720`.
    #[arg(short = 'q', long)]
    quality: Option<String>,
}

#[derive(Debug, Subcommand)]
enum CacheCommand {
    /// Forget one mapping, or every mapping with --all.
    Clear {
        #[arg(
            long,
            requires = "media_id",
            conflicts_with = "all",
            ignore_case = true,
            value_parser = provider_names()
        )]
        provider: Option<String>,

        #[arg(long, requires = "provider", conflicts_with = "all")]
        media_id: Option<u64>,

        #[arg(long)]
        all: bool,

        /// Skip the confirmation prompt.
        #[arg(short = 'y', long)]
        yes: bool,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Write the default config file.
    Init {
        #[arg(long)]
        force: bool,
    },
    /// Print where the config file is read from.
    Path,
}

fn provider_names() -> PossibleValuesParser {
    PossibleValuesParser::new(ProviderRegistry::names().iter().copied())
}

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sora=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging();
    let result = run().await;
    if let Err(err) = &result {
        eprintln!("error: {err:?}");
    }
    result
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config_path = match cli.config.clone() {
        Some(path) => path,
        None => default_config_path()?,
    };

    match cli.command {
        Command::Config { action } => run_config(action, &config_path),
        command => {
            let settings = Settings::load(Some(&config_path))
                .with_context(|| format!("failed to load config {}", config_path.display()))?;
            debug!(?settings, "loaded settings");
            let cache = match &settings.cache.path {
                Some(path) => ProviderCache::new(path),
                None => ProviderCache::open_default()?,
            };
            match command {
                Command::Resolve(args) => {
                    let resolution = resolve(&settings, cache, &args).await?;
                    print_resolution(&resolution);
                    Ok(())
                }
                Command::Play(args) => {
                    let resolution = resolve(&settings, cache, &args).await?;
                    let media_title = format!(
                        "{} - {}",
                        args.title.join(" "),
                        resolution.episode.episode_title
                    );
                    println!("Playing {media_title} via {}...", resolution.provider);
                    launch_player(&settings.player, &resolution.video, &media_title).await
                }
                Command::Cache { action } => run_cache(action, &cache),
                Command::Config { .. } => unreachable!("handled above"),
            }
        }
    }
}

async fn resolve(settings: &Settings, cache: ProviderCache, args: &EpisodeArgs) -> Result<Resolution> {
    let http = HttpClient::new(&settings.http.user_agent, settings.http.timeout())
        .context("failed to build HTTP client")?;
    let resolver = Resolver::new(ProviderRegistry::new(http, cache));
    let request = ResolveRequest {
        provider: args
            .provider
            .clone()
            .unwrap_or_else(|| settings.provider.clone()),
        media_id: args.media_id,
        episode: args.episode,
        title: args.title.join(" "),
        quality: args
            .quality
            .clone()
            .unwrap_or_else(|| settings.quality.clone()),
        translation: if args.dub {
            Translation::Dub
        } else {
            settings.translation
        },
    };

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let resolution = resolver.resolve(&request, &cancel).await.with_context(|| {
        format!(
            "could not resolve {} episode {} on {}",
            request.title, request.episode, request.provider
        )
    })?;
    Ok(resolution)
}

fn print_resolution(resolution: &Resolution) {
    println!("{}", resolution.video.video_url);
    if resolution.video.is_hls() {
        println!("format: hls");
    }
    if let Some(referer) = &resolution.video.referer {
        println!("referer: {referer}");
    }
    for sub in &resolution.video.subtitle_urls {
        println!("subtitle: {sub}");
    }
}

fn run_cache(action: CacheCommand, cache: &ProviderCache) -> Result<()> {
    match action {
        CacheCommand::Clear {
            provider,
            media_id,
            all,
            yes,
        } => match (provider, media_id) {
            (Some(provider), Some(media_id)) => {
                cache.clear(&provider, media_id)?;
                println!("Cleared {provider} mapping for media {media_id}.");
                Ok(())
            }
            _ if all => {
                let confirmed = yes
                    || Confirm::with_theme(&ColorfulTheme::default())
                        .with_prompt(format!(
                            "Delete every cached mapping in {}?",
                            cache.path().display()
                        ))
                        .default(false)
                        .interact()?;
                if confirmed {
                    cache.clear_all()?;
                    println!("Provider cache cleared.");
                }
                Ok(())
            }
            _ => bail!("pass --provider and --media-id, or --all"),
        },
    }
}

fn run_config(action: ConfigCommand, path: &Path) -> Result<()> {
    match action {
        ConfigCommand::Init { force } => {
            Settings::write_default(path, force)?;
            println!("Wrote {}", path.display());
        }
        ConfigCommand::Path => println!("{}", path.display()),
    }
    Ok(())
}
