use std::{
    io::{self, Write},
    path::PathBuf,
    process,
};

use clap::{Parser, Subcommand};
use reqwest::{Client, Url};
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sitekit::{
    cache::{ContentCache, ContentRequest},
    config::SiteConfig,
    html,
    initiative::{InitiativeLoader, PageStatus},
    loader::{ContentLoader, TemplateRegistry},
    posts::PostFeed,
    serve,
    source::{load_fragment, ContentSource, DirSource, HttpSource},
};

/// Explicit subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Serve a site directory over HTTP
    Serve {
        /// Site root directory
        #[arg(default_value = ".")]
        root: PathBuf,
        /// Interface address to bind to
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        /// Starting port number for the HTTP server
        #[arg(long, default_value = "3333")]
        port: u16,
    },
    /// Render the initiative page for an id and print the HTML document
    Render {
        /// Initiative id (file stem under the initiatives prefix)
        id: String,
        /// Site root directory
        #[arg(long, default_value = ".")]
        root: PathBuf,
        /// Directory of the page, relative to the root, for relative lookups
        #[arg(long, default_value = "")]
        page_dir: String,
    },
    /// Fetch JSON content through the cache and print it
    Fetch {
        /// Content URL or path
        url: String,
        /// Base URL that relative content paths resolve against
        #[arg(long, conflicts_with = "root")]
        base: Option<Url>,
        /// Read content from a site directory instead of over HTTP
        #[arg(long)]
        root: Option<PathBuf>,
        /// Cache-key modifier
        #[arg(long)]
        cache_key: Option<String>,
        /// Template id to render the JSON through
        #[arg(long)]
        template: Option<String>,
    },
    /// Fetch one page of blog posts and print their cards
    Posts {
        /// Site base URL
        base: Url,
        /// Page number
        #[arg(long, default_value = "2")]
        page: u32,
    },
}

#[derive(Parser)]
#[command(
    name = "sitekit",
    version,
    about = "Content pipeline and dev server for a markdown-backed static site"
)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, env = "SITEKIT_CONFIG")]
    config: Option<PathBuf>,
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "sitekit=debug" } else { "sitekit=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn main() -> io::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = SiteConfig::load(cli.config.as_deref()).map_err(|e| {
        tracing::error!(error = %e, "invalid configuration");
        io::Error::new(io::ErrorKind::InvalidData, e)
    })?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    match cli.command {
        Commands::Serve { root, bind, port } => {
            rt.block_on(serve::run_serve(root, bind, port, config))
        }
        Commands::Render { id, root, page_dir } => rt.block_on(run_render(id, root, page_dir, config)),
        Commands::Fetch {
            url,
            base,
            root,
            cache_key,
            template,
        } => {
            let mut request = ContentRequest::new(url.as_str());
            request.cache_key = cache_key;
            request.template = template;
            match root {
                Some(root) => rt.block_on(run_fetch(DirSource::new(root), request, &config)),
                None => {
                    let base = match base {
                        Some(base) => base,
                        None => Url::parse(&url).map_err(|e| {
                            io::Error::new(
                                io::ErrorKind::InvalidInput,
                                format!("'{url}' is not an absolute URL and no --base was given: {e}"),
                            )
                        })?,
                    };
                    let source = HttpSource::new(http_client(&config)?, base);
                    rt.block_on(run_fetch(source, request, &config))
                }
            }
        }
        Commands::Posts { base, page } => rt.block_on(run_posts(base, page, config)),
    }
}

fn http_client(config: &SiteConfig) -> io::Result<Client> {
    let mut builder = Client::builder();
    if let Some(timeout) = config.content.request_timeout() {
        builder = builder.timeout(timeout);
    }
    builder.build().map_err(io::Error::other)
}

fn content_cache(config: &SiteConfig) -> ContentCache {
    let ttl = config.content.cache_ttl();
    match &config.content.cache_dir {
        Some(dir) => ContentCache::on_disk(dir.clone(), ttl),
        None => ContentCache::in_memory(ttl),
    }
}

async fn run_render(id: String, root: PathBuf, page_dir: String, config: SiteConfig) -> io::Result<()> {
    if !root.is_dir() {
        tracing::error!(root = %root.display(), "site root is not a directory");
        process::exit(1);
    }
    let source = DirSource::new(root).with_page_dir(page_dir);
    let header = load_fragment(&source, &config.content.header_component).await;
    let mut loader = InitiativeLoader::from_config(source, &config);
    if config.content.cache_dir.is_some() {
        loader = loader.with_cache(content_cache(&config));
    }

    let page = loader.page(Some(id.as_str())).await;
    let mut out = io::stdout().lock();
    out.write_all(page.to_document(Some(&header)).as_bytes())?;
    out.flush()?;
    if page.status == PageStatus::NotFound {
        process::exit(1);
    }
    Ok(())
}

async fn run_fetch<S: ContentSource>(
    source: S,
    request: ContentRequest,
    config: &SiteConfig,
) -> io::Result<()> {
    let templates = match &config.content.templates_dir {
        Some(dir) => TemplateRegistry::load_dir(dir)?,
        None => TemplateRegistry::new(),
    };
    let loader = ContentLoader::new(source, content_cache(config), templates);

    match loader.fetch_content(&request).await {
        Ok(Value::String(markup)) => println!("{markup}"),
        Ok(data) => {
            let text = serde_json::to_string_pretty(&data).map_err(io::Error::other)?;
            println!("{text}");
        }
        Err(e) => {
            tracing::error!(url = %request.url, error = %e, "fetch failed");
            process::exit(1);
        }
    }
    Ok(())
}

async fn run_posts(base: Url, page: u32, config: SiteConfig) -> io::Result<()> {
    let source = HttpSource::new(http_client(&config)?, base);
    let feed = PostFeed::new(source, config.posts.endpoint);
    let mut out = io::stdout().lock();
    for post in feed.fetch_page(page).await {
        out.write_all(html::render_post_card(&post).as_bytes())?;
    }
    Ok(())
}
