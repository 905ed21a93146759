use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use paperpair_core::storage::ledger::JsonLedger;
use paperpair_core::{AppConfig, Language, Record, RecordPatch, RecordStore, ingest};
use paperpair_match::cache::ResponseCache;
use paperpair_match::extract::{LopdfSource, PdfTextSource, extract_metadata};
use paperpair_match::stats::{UsageStats, stats_path};
use paperpair_match::{DeepSeekClient, JudgmentService, apply_outcomes, run_feature_only, run_semantic};

// ─── CLI Definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "paperpair",
    about = "Organize and pair bilingual academic-paper libraries",
    version,
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output in JSON format (for scripts).
    /// Also enabled by setting PAPERPAIR_JSON=1.
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum LangArg {
    Chinese,
    English,
    Both,
}

#[derive(Subcommand)]
enum Commands {
    /// Rename new PDFs into the sequential scheme and record their metadata.
    Ingest {
        /// Which folder(s) to scan.
        #[arg(long, value_enum, default_value = "both")]
        language: LangArg,
        /// Skip the LLM and extract with regex heuristics only.
        #[arg(long)]
        no_llm: bool,
    },

    /// Throw the ledger away and re-create it from the files on disk.
    Rebuild {
        #[arg(long)]
        confirm: bool,
        #[arg(long)]
        no_llm: bool,
    },

    /// Drop ledger records whose file no longer exists.
    Clean {
        /// Also wipe the model response cache.
        #[arg(long)]
        cache: bool,
    },

    /// Correct one record's metadata by hand.
    Fix {
        file_id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        authors: Option<String>,
        #[arg(long)]
        journal: Option<String>,
        #[arg(long)]
        year: Option<String>,
        #[arg(long)]
        doi: Option<String>,
        #[arg(long)]
        keywords: Option<String>,
        /// Print current values without changing anything.
        #[arg(long)]
        show: bool,
    },

    /// Pair Chinese papers with their English counterparts.
    Match {
        /// Feature scoring only, no model calls.
        #[arg(long)]
        no_semantic: bool,
        /// Attach title translation and first-page excerpts to each
        /// comparison.
        #[arg(long)]
        enhanced: bool,
        /// Final score threshold for --no-semantic mode.
        #[arg(long)]
        threshold: Option<f64>,
        /// Write confirmed pairings back onto the ledger.
        #[arg(long)]
        update_records: bool,
    },

    /// Re-extract metadata for one record.
    Extract {
        file_id: String,
        #[arg(long)]
        no_llm: bool,
    },

    /// Show ledger and API usage statistics.
    Stats,

    /// Config management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Run diagnostics.
    Doctor,

    /// Show version information.
    Version,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show all config values.
    List,
    /// Get a specific config key.
    Get { key: String },
}

// ─── Main ────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let start = Instant::now();
    let cli = Cli::parse();
    let json_output = cli.json || std::env::var("PAPERPAIR_JSON").as_deref() == Ok("1");

    let config = AppConfig::load()?;

    match cli.command {
        Commands::Ingest { language, no_llm } => {
            let mut ledger = open_ledger(&config)?;
            let client = maybe_client(&config, no_llm);
            let languages: &[Language] = match language {
                LangArg::Chinese => &[Language::Chinese],
                LangArg::English => &[Language::English],
                LangArg::Both => &[Language::Chinese, Language::English],
            };

            let mut ingested = Vec::new();
            for &lang in languages {
                let dir = config.dir_for(lang);
                if !dir.is_dir() {
                    warn!(dir = %dir.display(), "folder missing, skipping");
                    continue;
                }
                for pdf in ingest::scan_pdfs(&dir)? {
                    if let Some(name) = pdf.file_name().and_then(|n| n.to_str()) {
                        if ingest::detect_language(name) != lang {
                            warn!(file = name, folder = %lang, "filename looks like the other language");
                        }
                    }
                    let mut record = ingest::ingest_file(&mut ledger, &dir, &pdf, lang)?;
                    extract_into(&config, client.as_ref(), &mut ledger, &mut record).await;
                    if !json_output {
                        println!("  {} → {}", record.original_name, record.file_id);
                    }
                    ingested.push(record);
                }
            }
            ledger.save()?;
            let dur = start.elapsed().as_millis();

            if json_output {
                print_json(&serde_json::json!({
                    "status": "ok",
                    "data": { "ingested": ingested, "total": ledger.len() },
                    "meta": { "duration_ms": dur }
                }))?;
            } else {
                println!("Ingested {} file(s).", ingested.len());
            }
        }

        Commands::Rebuild { confirm, no_llm } => {
            if !confirm {
                eprintln!("Add --confirm to discard the current ledger and rebuild it.");
                std::process::exit(8);
            }
            let ledger_path = config.ledger_path();
            if ledger_path.exists() {
                std::fs::remove_file(&ledger_path)?;
            }
            let mut ledger = JsonLedger::open(&ledger_path)?;
            let recovered = ingest::rebuild(
                &mut ledger,
                &config.dir_for(Language::Chinese),
                &config.dir_for(Language::English),
            )?;

            let client = maybe_client(&config, no_llm);
            for file_id in &recovered {
                if let Some(mut record) = ledger.get(file_id).cloned() {
                    extract_into(&config, client.as_ref(), &mut ledger, &mut record).await;
                }
            }
            ledger.save()?;
            let dur = start.elapsed().as_millis();

            if json_output {
                print_json(&serde_json::json!({
                    "status": "ok",
                    "data": { "recovered": recovered },
                    "meta": { "duration_ms": dur }
                }))?;
            } else {
                println!("Rebuilt ledger with {} record(s).", recovered.len());
            }
        }

        Commands::Clean { cache } => {
            let mut ledger = open_ledger(&config)?;
            let removed = ledger.prune_missing(
                &config.dir_for(Language::Chinese),
                &config.dir_for(Language::English),
            );
            ledger.save()?;

            let mut cache_cleared = 0;
            if cache {
                let responses = ResponseCache::new(
                    "responses",
                    Duration::from_secs(config.llm.cache_ttl_hours * 3600),
                );
                cache_cleared = responses.clear().await;
            }
            let dur = start.elapsed().as_millis();

            if json_output {
                print_json(&serde_json::json!({
                    "status": "ok",
                    "data": {
                        "removed": removed,
                        "remaining": ledger.len(),
                        "cache_entries_cleared": cache_cleared,
                    },
                    "meta": { "duration_ms": dur }
                }))?;
            } else {
                if removed.is_empty() {
                    println!("Nothing to clean.");
                } else {
                    println!("Removed {} stale record(s): {}", removed.len(), removed.join(", "));
                }
                if cache {
                    println!("Cleared {cache_cleared} cached response(s).");
                }
            }
        }

        Commands::Fix { file_id, title, authors, journal, year, doi, keywords, show } => {
            let mut ledger = open_ledger(&config)?;
            let Some(record) = ledger.get(&file_id).cloned() else {
                eprintln!("Record not found: {file_id}");
                std::process::exit(2);
            };

            if show {
                let dur = start.elapsed().as_millis();
                if json_output {
                    print_json(&serde_json::json!({"status":"ok","data":record,"meta":{"duration_ms":dur}}))?;
                } else {
                    println!("{}", serde_json::to_string_pretty(&record)?);
                }
                return Ok(());
            }

            let patch = RecordPatch { title, authors, journal, year, doi, keywords };
            if patch.is_empty() {
                eprintln!("Nothing to change. Pass at least one field, or --show.");
                std::process::exit(2);
            }
            ledger.update(&file_id, &patch)?;
            ledger.save()?;
            let dur = start.elapsed().as_millis();

            if json_output {
                print_json(&serde_json::json!({"status":"ok","data":ledger.get(&file_id),"meta":{"duration_ms":dur}}))?;
            } else {
                println!("Updated: {file_id}");
            }
        }

        Commands::Match { no_semantic, enhanced, threshold, update_records } => {
            let mut ledger = open_ledger(&config)?;
            let chinese: Vec<Record> = ledger.records(Language::Chinese).to_vec();
            let english: Vec<Record> = ledger.records(Language::English).to_vec();

            let mut matching = config.matching.clone();
            if let Some(t) = threshold {
                matching.final_threshold = t;
            }
            if enhanced {
                matching.enhanced = true;
            }

            let outcomes = if no_semantic || !matching.use_semantic {
                run_feature_only(&matching, &chinese, &english)
            } else {
                let client = DeepSeekClient::from_config(&config)?;
                let excerpts = if matching.enhanced {
                    collect_excerpts(&config, chinese.iter().chain(english.iter()))
                } else {
                    HashMap::new()
                };
                run_semantic(&client, config.retry.clone(), &matching, &chinese, &english, &excerpts)
                    .await
            };

            let written = if update_records {
                let n = apply_outcomes(&mut ledger, &outcomes)?;
                ledger.save()?;
                n
            } else {
                0
            };
            let dur = start.elapsed().as_millis();

            if json_output {
                print_json(&serde_json::json!({
                    "status": "ok",
                    "data": { "matches": outcomes, "total": outcomes.len(), "pairings_written": written },
                    "meta": { "duration_ms": dur }
                }))?;
            } else if outcomes.is_empty() {
                println!("No pairs found.");
            } else {
                for outcome in &outcomes {
                    println!(
                        "  {} ←→ {}  confidence {:>3}  (feature score {:.3})",
                        outcome.chinese_file,
                        outcome.english_file,
                        outcome.verdict.confidence,
                        outcome.feature_score,
                    );
                }
                println!("{} pair(s) found.", outcomes.len());
                if update_records {
                    println!("{written} pairing(s) written to the ledger.");
                }
            }
        }

        Commands::Extract { file_id, no_llm } => {
            let mut ledger = open_ledger(&config)?;
            let Some(mut record) = ledger.get(&file_id).cloned() else {
                eprintln!("Record not found: {file_id}");
                std::process::exit(2);
            };

            let client = maybe_client(&config, no_llm);
            extract_into(&config, client.as_ref(), &mut ledger, &mut record).await;
            ledger.save()?;
            let dur = start.elapsed().as_millis();

            let updated = ledger.get(&file_id);
            if json_output {
                print_json(&serde_json::json!({"status":"ok","data":updated,"meta":{"duration_ms":dur}}))?;
            } else if let Some(record) = updated {
                println!("{}", serde_json::to_string_pretty(record)?);
            }
        }

        Commands::Stats => {
            let ledger = open_ledger(&config)?;
            let usage = UsageStats::load_from(&stats_path())?;
            let chinese = ledger.records(Language::Chinese).len();
            let english = ledger.records(Language::English).len();
            let paired = ledger
                .records(Language::English)
                .iter()
                .filter(|r| r.pairing.is_some())
                .count();
            let dur = start.elapsed().as_millis();

            if json_output {
                print_json(&serde_json::json!({
                    "status": "ok",
                    "data": {
                        "records": { "chinese": chinese, "english": english, "paired": paired },
                        "usage": usage,
                    },
                    "meta": { "duration_ms": dur }
                }))?;
            } else {
                println!("Ledger:");
                println!("  Chinese papers: {chinese}");
                println!("  English papers: {english}");
                println!("  Paired:         {paired}");
                println!("API usage:");
                println!("  Total calls:  {}", usage.total_calls);
                println!("  Total tokens: {}", usage.total_tokens);
                println!("  Est. cost:    {:.4}", usage.total_cost);
                println!("  Calls today:  {}", usage.calls_today());
                println!("  This month:   {:.4}", usage.cost_this_month());
            }
        }

        Commands::Config { action } => {
            let dur = start.elapsed().as_millis();
            let kv = config_key_values(&config);
            match action {
                ConfigAction::List => {
                    if json_output {
                        print_json(&serde_json::json!({"status":"ok","data":kv,"meta":{"duration_ms":dur}}))?;
                    } else {
                        for (k, v) in &kv {
                            println!("{k} = {v}");
                        }
                    }
                }
                ConfigAction::Get { key } => match kv.get(key.as_str()) {
                    Some(val) => {
                        if json_output {
                            print_json(&serde_json::json!({"status":"ok","data":{"key":key,"value":val},"meta":{"duration_ms":dur}}))?;
                        } else {
                            println!("{val}");
                        }
                    }
                    None => {
                        eprintln!("Unknown config key: {key}");
                        std::process::exit(2);
                    }
                },
            }
        }

        Commands::Doctor => {
            let mut issues = 0;

            let config_path = AppConfig::config_path();
            if config_path.exists() {
                println!("✓ Config: {}", config_path.display());
            } else {
                println!("○ Config: not found (using defaults)");
            }

            for lang in [Language::Chinese, Language::English] {
                let dir = config.dir_for(lang);
                if dir.is_dir() {
                    println!("✓ {lang} folder: {}", dir.display());
                } else {
                    issues += 1;
                    println!("✗ {lang} folder missing: {}", dir.display());
                }
            }

            let ledger_path = config.ledger_path();
            match JsonLedger::open(&ledger_path) {
                Ok(ledger) => {
                    println!("✓ Ledger: {} ({} records)", ledger_path.display(), ledger.len());
                }
                Err(e) => {
                    issues += 1;
                    println!("✗ Ledger: {e}");
                }
            }

            if config.api_key().is_some() {
                println!("✓ API key: {} is set", config.llm.api_key_env);
            } else {
                println!("○ API key: {} not set (LLM features unavailable)", config.llm.api_key_env);
            }

            if issues == 0 {
                println!("\nAll checks passed ✓");
            } else {
                println!("\n{issues} issue(s) found");
                std::process::exit(1);
            }
        }

        Commands::Version => {
            let version = env!("CARGO_PKG_VERSION");
            let dur = start.elapsed().as_millis();
            if json_output {
                print_json(&serde_json::json!({"status":"ok","data":{"version":version},"meta":{"duration_ms":dur}}))?;
            } else {
                println!("paperpair v{version}");
            }
        }
    }

    Ok(())
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn print_json(val: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(val)?);
    Ok(())
}

fn open_ledger(config: &AppConfig) -> Result<JsonLedger> {
    Ok(JsonLedger::open(config.ledger_path())?)
}

/// Build the LLM client when extraction wants it; a missing key degrades to
/// heuristic extraction with a warning.
fn maybe_client(config: &AppConfig, no_llm: bool) -> Option<DeepSeekClient> {
    if no_llm || !config.extraction.use_llm {
        return None;
    }
    match DeepSeekClient::from_config(config) {
        Ok(client) => Some(client),
        Err(e) => {
            warn!(error = %e, "LLM unavailable, using regex extraction");
            None
        }
    }
}

/// Extract metadata for one record from its PDF and write it back.
/// Extraction failures leave the skeleton record in place.
async fn extract_into(
    config: &AppConfig,
    client: Option<&DeepSeekClient>,
    ledger: &mut JsonLedger,
    record: &mut Record,
) {
    let source = LopdfSource;
    let path = config.dir_for(record.language).join(&record.file_id);
    let service = client.map(|c| c as &dyn JudgmentService);
    match extract_metadata(
        service,
        &source,
        &path,
        config.extraction.max_pages,
        config.extraction.max_chars,
    )
    .await
    {
        Ok((meta, method)) => {
            let confidence = meta.confidence.round() as u8;
            meta.apply_to(record, method, confidence);
            if let Err(e) = ledger.replace(record.clone()) {
                warn!(file = %record.file_id, error = %e, "failed to store extracted metadata");
            }
        }
        Err(e) => {
            warn!(file = %record.file_id, error = %e, "metadata extraction failed");
        }
    }
}

/// First-page text per record for the enhanced prompt; unreadable files are
/// simply absent from the map.
fn collect_excerpts<'a>(
    config: &AppConfig,
    records: impl Iterator<Item = &'a Record>,
) -> HashMap<String, String> {
    let source = LopdfSource;
    let mut excerpts = HashMap::new();
    for record in records {
        let path = config.dir_for(record.language).join(&record.file_id);
        if let Ok(text) = source.read_text(&path, 1) {
            excerpts.insert(record.file_id.clone(), text);
        }
    }
    excerpts
}

fn config_key_values(config: &AppConfig) -> std::collections::BTreeMap<&'static str, String> {
    let mut map = std::collections::BTreeMap::new();
    map.insert("library.chinese_dir", config.library.chinese_dir.clone());
    map.insert("library.english_dir", config.library.english_dir.clone());
    map.insert("library.ledger", config.library.ledger.clone());
    map.insert("llm.base_url", config.llm.base_url.clone());
    map.insert("llm.model", config.llm.model.clone());
    map.insert("llm.api_key_env", config.llm.api_key_env.clone());
    map.insert(
        "matching.admission_threshold",
        config.matching.admission_threshold.to_string(),
    );
    map.insert(
        "matching.final_threshold",
        config.matching.final_threshold.to_string(),
    );
    map.insert("matching.use_semantic", config.matching.use_semantic.to_string());
    map.insert("matching.enhanced", config.matching.enhanced.to_string());
    map.insert("extraction.use_llm", config.extraction.use_llm.to_string());
    map.insert("retry.max_attempts", config.retry.max_attempts.to_string());
    map
}
