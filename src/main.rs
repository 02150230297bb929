use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use vitaq::app::{distinct_sources, AppContext};
use vitaq::cli::{Cli, Commands, ConfigAction};
use vitaq::config::Config;
use vitaq::corpus;
use vitaq::error::{Result, VitaqError};
use vitaq::qa::{QueryResponse, NO_MATCH_MESSAGE};
use vitaq::retrieval::SearchFilters;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Index { path, append } => {
            cmd_index(cli.config, &path, append).await?;
        }
        Commands::Ask {
            question,
            no_stream,
            structured,
            top_k,
        } => {
            cmd_ask(cli.config, &question, no_stream, structured, top_k).await?;
        }
        Commands::Search {
            query,
            limit,
            filter,
            json,
        } => {
            cmd_search(cli.config, &query, limit, &filter, json).await?;
        }
        Commands::Stats => {
            cmd_stats(cli.config).await?;
        }
        Commands::Clear { index, cache } => {
            cmd_clear(cli.config, index, cache).await?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "vitaq=debug" } else { "vitaq=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt().with_env_filter(filter).with_target(false).init();
}

/// Build the application context. Commands that call the external
/// service require the configured API key; local maintenance commands
/// run without one.
async fn context(config: Config, need_key: bool) -> Result<AppContext> {
    let api_key = match std::env::var(&config.service.api_key_env) {
        Ok(key) if !key.is_empty() => key,
        _ if need_key => {
            return Err(VitaqError::Config(format!(
                "{} is not set; export your API key first",
                config.service.api_key_env
            )));
        }
        _ => String::new(),
    };
    AppContext::initialize(config, api_key).await
}

async fn cmd_index(config_path: Option<PathBuf>, path: &Path, append: bool) -> Result<()> {
    let config = Config::load_or_default(config_path.as_deref())?;

    let chunks = corpus::load_corpus(path, &config.corpus)?;
    if chunks.is_empty() {
        println!("No resume content found at {}", path.display());
        return Ok(());
    }
    println!(
        "Loaded {} chunks from {} resumes",
        chunks.len(),
        distinct_sources(&chunks)
    );

    let ctx = context(config, true).await?;
    let report = if append {
        ctx.append_index(chunks).await?
    } else {
        ctx.rebuild_index(chunks).await?
    };

    println!(
        "✓ Indexed {} chunks in {}ms",
        report.indexed, report.duration_ms
    );
    if report.degraded > 0 {
        println!(
            "⚠ {} chunks fell back to zero vectors (embedding service errors)",
            report.degraded
        );
    }
    Ok(())
}

async fn cmd_ask(
    config_path: Option<PathBuf>,
    question: &str,
    no_stream: bool,
    structured: bool,
    top_k: Option<usize>,
) -> Result<()> {
    let mut config = Config::load_or_default(config_path.as_deref())?;
    if let Some(k) = top_k {
        config.search.top_k = k;
    }
    let stream = config.generation.streaming && !no_stream;

    let ctx = context(config, true).await?;
    let engine = ctx.engine();

    if structured {
        let value = engine.ask_structured(question).await?;
        let rendered = serde_json::to_string_pretty(&value).map_err(|e| VitaqError::Json {
            source: e,
            context: "Failed to render structured answer".to_string(),
        })?;
        println!("{}", rendered);
        return Ok(());
    }

    let (response, timings) = engine.ask(question, stream).await?;
    match response {
        QueryResponse::Cached(answer) => {
            println!("(cache hit, {}ms)\n", timings.cache_ms);
            println!("{}", answer);
        }
        QueryResponse::Generated(answer) => {
            println!("{}", answer);
            println!(
                "\n({} chunks, retrieval {}ms, generation {}ms, total {}ms)",
                timings.chunks,
                timings.retrieval_ms,
                timings.generation_ms.unwrap_or(0),
                timings.total_ms
            );
        }
        QueryResponse::NoMatches => println!("{}", NO_MATCH_MESSAGE),
        QueryResponse::Streaming(mut fragments) => {
            let stream_started = Instant::now();
            let mut stdout = std::io::stdout();
            while let Some(fragment) = fragments.recv().await {
                match fragment {
                    Ok(text) => {
                        print!("{}", text);
                        stdout.flush().ok();
                    }
                    Err(e) => {
                        println!();
                        return Err(e.into());
                    }
                }
            }
            println!();
            println!(
                "\n({} chunks, retrieval {}ms, stream {}ms)",
                timings.chunks,
                timings.retrieval_ms,
                stream_started.elapsed().as_millis() as u64
            );
        }
    }
    Ok(())
}

async fn cmd_search(
    config_path: Option<PathBuf>,
    query: &str,
    limit: usize,
    filter: &[String],
    json: bool,
) -> Result<()> {
    let filters = SearchFilters::parse(filter)?;
    let config = Config::load_or_default(config_path.as_deref())?;
    let ctx = context(config, true).await?;

    let results = ctx.ranker().search_with_filter(query, &filters, limit).await?;

    if json {
        let rendered = serde_json::to_string_pretty(&results).map_err(|e| VitaqError::Json {
            source: e,
            context: "Failed to render search results".to_string(),
        })?;
        println!("{}", rendered);
        return Ok(());
    }

    if results.is_empty() {
        println!("No matches");
        return Ok(());
    }
    for (rank, result) in results.iter().enumerate() {
        println!(
            "{}. {} [{}] score {:.3} (vector {:.3}, keyword {:.3})",
            rank + 1,
            result.chunk.source_id,
            result.chunk.section,
            result.score,
            result.vector_score,
            result.keyword_score
        );
        println!("   {}", preview(&result.chunk.text, 160));
    }
    Ok(())
}

async fn cmd_stats(config_path: Option<PathBuf>) -> Result<()> {
    let config = Config::load_or_default(config_path.as_deref())?;
    let ctx = context(config, false).await?;
    let stats = ctx.stats().await?;

    println!("Vitaq Status");
    println!("============");
    println!(
        "\nIndex: {} chunks from {} resumes ({})",
        stats.chunks, stats.sources, stats.index_kind
    );
    match (stats.cached_embeddings, stats.cached_answers) {
        (Some(embeddings), Some(answers)) => {
            println!("Cache: {} embeddings, {} answers", embeddings, answers);
        }
        _ => println!("Cache: unavailable"),
    }
    Ok(())
}

async fn cmd_clear(config_path: Option<PathBuf>, index: bool, cache: bool) -> Result<()> {
    let config = Config::load_or_default(config_path.as_deref())?;
    let ctx = context(config, false).await?;
    let both = !index && !cache;

    if index || both {
        ctx.clear_index().await?;
        println!("✓ Index cleared");
    }
    if cache || both {
        let removed = ctx.clear_cache()?;
        println!("✓ Cache cleared ({} entries)", removed);
    }
    Ok(())
}

fn cmd_config(config_path: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = Config::load_or_default(config_path.as_deref())?;
            println!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };
            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }
            Config::default().save(&path)?;
            println!("✓ Configuration initialized at: {}", path.display());
        }
        ConfigAction::Path => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };
            println!("{}", path.display());
        }
    }
    Ok(())
}

/// First `max_chars` of a chunk on one line
fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}
