use anyhow::Result;
use clap::{Parser, Subcommand};
use researchpipe_core::Recency;
use researchpipe_local::config::{
    provider_configs, Credentials, ResearchConfig, SERP_API_KEY_ENV, SERP_API_KEY_URL,
};
use researchpipe_local::context::ContextBuilder;
use researchpipe_local::dedup::ShuffleMode;
use researchpipe_local::extract::ExtractOutcome;
use researchpipe_local::gateway::{ProviderGateway, ProviderRegistry};
use researchpipe_local::pipeline::{RequestContext, Researcher};
use researchpipe_local::ratelimit::PoliteLimiter;
use researchpipe_local::report::ReportGenerator;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "researchpipe")]
#[command(about = "Turn one research query into a cited long-form report", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Search, extract, and generate a cited report.
    Research(ResearchCmd),
    /// Plan and run the searches; print the deduplicated candidates (json).
    Search(SearchCmd),
    /// Extract readable text from one URL (json).
    Extract(ExtractCmd),
    /// List the generation providers (json; no secrets).
    Providers,
    /// Report missing credentials and the effective configuration (json; no secrets).
    Doctor(DoctorCmd),
    /// Print version info.
    Version(VersionCmd),
}

#[derive(clap::Args, Debug)]
struct ResearchCmd {
    query: String,
    /// Recency window: "any time", "past year", "past month", "past week", "past day".
    #[arg(long, default_value = "past month")]
    recency: Recency,
    /// Number of documents to extract (1-10).
    #[arg(long, default_value_t = 5)]
    depth: usize,
    /// Extra URL to analyze (repeatable). Cited under "custom".
    #[arg(long = "url")]
    urls: Vec<String>,
    /// Generation provider name or alias.
    #[arg(long, env = "RESEARCHPIPE_PROVIDER", default_value = "openai")]
    provider: String,
    /// Output format: markdown|json
    #[arg(long = "format", alias = "output", default_value = "markdown")]
    format: String,
    /// Visit search results in ranked order instead of shuffling them.
    #[arg(long)]
    no_shuffle: bool,
    /// Seed for the candidate shuffle.
    #[arg(long)]
    seed: Option<u64>,
    /// Cancel the request after this many seconds; a report is still printed.
    #[arg(long)]
    deadline_s: Option<u64>,
}

#[derive(clap::Args, Debug)]
struct SearchCmd {
    query: String,
    #[arg(long, default_value = "past month")]
    recency: Recency,
    #[arg(long, default_value_t = 5)]
    depth: usize,
    #[arg(long = "url")]
    urls: Vec<String>,
}

#[derive(clap::Args, Debug)]
struct ExtractCmd {
    url: String,
}

#[derive(clap::Args, Debug)]
struct DoctorCmd {
    /// Provider whose credential should be checked.
    #[arg(long, env = "RESEARCHPIPE_PROVIDER", default_value = "openai")]
    provider: String,
}

#[derive(clap::Args, Debug)]
struct VersionCmd {
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

/// Optional env-file loader.
///
/// - opt-in only (RESEARCHPIPE_ENV_FILE)
/// - sets vars only if not already set in the process environment
/// - does not log values
fn load_env_file() {
    let Ok(p) = std::env::var("RESEARCHPIPE_ENV_FILE") else {
        return;
    };
    let p = p.trim();
    if p.is_empty() {
        return;
    }
    let Ok(txt) = std::fs::read_to_string(p) else {
        return;
    };
    for raw in txt.lines() {
        let s = raw.trim();
        if s.is_empty() || s.starts_with('#') {
            continue;
        }
        let s = s.strip_prefix("export ").unwrap_or(s);
        let Some((k, v)) = s.split_once('=') else {
            continue;
        };
        let k = k.trim();
        let v = v.trim().trim_matches('"');
        if k.is_empty() {
            continue;
        }
        if std::env::var_os(k).is_none() {
            std::env::set_var(k, v);
        }
    }
}

fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    // stdout carries the report/json; logs go to stderr.
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "researchpipe=info,researchpipe_local=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

/// Token cancelled on Ctrl-C or when the optional deadline passes.
fn request_cancel_token(deadline_s: Option<u64>) -> CancellationToken {
    let token = CancellationToken::new();
    let on_signal = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted; cancelling request");
            on_signal.cancel();
        }
    });
    if let Some(s) = deadline_s {
        let on_deadline = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(s)).await;
            tracing::warn!(deadline_s = s, "deadline reached; cancelling request");
            on_deadline.cancel();
        });
    }
    token
}

fn registry(client: &reqwest::Client) -> ProviderRegistry {
    ProviderRegistry::with_defaults(client.clone(), provider_configs())
}

fn report_generator(client: &reqwest::Client, config: &ResearchConfig) -> ReportGenerator {
    let gateway = ProviderGateway::new(
        registry(client),
        Credentials::Env,
        config.generation_retry_pause(),
    );
    ReportGenerator::new(
        gateway,
        ContextBuilder::new(config.excerpt_chars, config.max_context_chars),
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env_file();
    init_tracing();

    let cli = Cli::parse();
    let config = ResearchConfig::from_env();

    match cli.command {
        Commands::Research(args) => {
            let client = researchpipe_local::default_http_client()?;
            let researcher = Researcher::from_env(client.clone(), config.clone());
            let generator = report_generator(&client, &config);

            let shuffle = if args.no_shuffle || !config.shuffle {
                ShuffleMode::Preserve
            } else {
                ShuffleMode::Shuffle { seed: args.seed }
            };
            let ctx = RequestContext::new(args.query, args.recency, args.depth, args.urls)
                .with_shuffle(shuffle)
                .with_cancel(request_cancel_token(args.deadline_s));

            let docs = researcher.search_and_extract(&ctx).await;
            let report = generator
                .generate_report(&ctx.query, &docs, &args.provider, &ctx.cancel)
                .await;

            match args.format.to_ascii_lowercase().as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(&report)?),
                _ => println!("{}", report.text.trim_end()),
            }
        }
        Commands::Search(args) => {
            let client = researchpipe_local::default_http_client()?;
            let researcher = Researcher::from_env(client, config.clone());
            let ctx = RequestContext::new(args.query, args.recency, args.depth, args.urls)
                .with_cancel(request_cancel_token(None));
            let candidates = researcher.gather_candidates(&ctx).await;
            let v = serde_json::json!({
                "schema_version": 1,
                "kind": "search",
                "query": ctx.query,
                "recency": ctx.recency,
                "depth": ctx.depth,
                "search_configured": researcher.has_search(),
                "custom": candidates.custom_len(),
                "candidates": candidates.hits(),
            });
            println!("{}", serde_json::to_string_pretty(&v)?);
        }
        Commands::Extract(args) => {
            let client = researchpipe_local::default_http_client()?;
            let researcher = Researcher::from_env(client, config.clone());
            let cancel = request_cancel_token(None);
            let out = researcher
                .extractor()
                .extract(&args.url, &PoliteLimiter::disabled(), &cancel)
                .await;
            let v = match out {
                ExtractOutcome::Extracted(text) => serde_json::json!({
                    "url": args.url,
                    "ok": true,
                    "chars": text.chars().count(),
                    "content": text,
                }),
                ExtractOutcome::Skipped(reason) => serde_json::json!({
                    "url": args.url,
                    "ok": false,
                    "chars": 0,
                    "reason": reason.to_string(),
                }),
            };
            println!("{}", serde_json::to_string_pretty(&v)?);
        }
        Commands::Providers => {
            let client = researchpipe_local::default_http_client()?;
            let creds = Credentials::Env;
            let list: Vec<serde_json::Value> = registry(&client)
                .backends()
                .iter()
                .map(|b| {
                    let c = b.config();
                    serde_json::json!({
                        "name": b.name(),
                        "label": c.label,
                        "aliases": b.aliases(),
                        "endpoint": c.endpoint,
                        "model": c.model,
                        "credential_env": c.credential_env,
                        "key_url": c.key_url,
                        "configured": creds.has(&c.credential_env),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&list)?);
        }
        Commands::Doctor(args) => {
            let client = researchpipe_local::default_http_client()?;
            let creds = Credentials::Env;
            let reg = registry(&client);

            let mut missing: Vec<serde_json::Value> = Vec::new();
            let search_ok = creds.has(SERP_API_KEY_ENV);
            if !search_ok {
                missing.push(serde_json::json!({
                    "env": SERP_API_KEY_ENV,
                    "key_url": SERP_API_KEY_URL,
                }));
            }
            let selected = reg.resolve(&args.provider);
            let provider_ok = match selected {
                Some(b) => {
                    let ok = creds.has(&b.config().credential_env);
                    if !ok {
                        missing.push(serde_json::json!({
                            "env": b.config().credential_env,
                            "key_url": b.config().key_url,
                        }));
                    }
                    ok
                }
                None => false,
            };
            let providers: serde_json::Map<String, serde_json::Value> = reg
                .backends()
                .iter()
                .map(|b| {
                    (
                        b.name().to_string(),
                        serde_json::Value::Bool(creds.has(&b.config().credential_env)),
                    )
                })
                .collect();

            let v = serde_json::json!({
                "schema_version": 1,
                "kind": "doctor",
                "ok": missing.is_empty() && selected.is_some(),
                "name": "researchpipe",
                "version": env!("CARGO_PKG_VERSION"),
                "configured": {
                    "search": { "serpapi": search_ok },
                    "providers": providers,
                },
                "selected_provider": {
                    "requested": args.provider,
                    "name": selected.map(|b| b.name()),
                    "known": selected.is_some(),
                    "configured": provider_ok,
                },
                "missing": missing,
                "config": config,
            });
            println!("{}", serde_json::to_string_pretty(&v)?);
        }
        Commands::Version(args) => {
            let v = serde_json::json!({
                "schema_version": 1,
                "kind": "version",
                "ok": true,
                "name": "researchpipe",
                "version": env!("CARGO_PKG_VERSION"),
            });
            match args.output.to_ascii_lowercase().as_str() {
                "text" => println!("researchpipe {}", env!("CARGO_PKG_VERSION")),
                _ => println!("{}", v),
            }
        }
    }

    Ok(())
}
