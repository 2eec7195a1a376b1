//! prefgen CLI - Balanced preference dataset generation and cleanup.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use prefgen::audit::{check_themes, exact_duplicate_responses, metadata_balance, validate_structure};
use prefgen::dedup::{PromptCorpus, find_pairs, reduce_with_progress, similarity_with_progress};
use prefgen::generation::load_themes;
use prefgen::store::{count_entries, load_path, timestamped_path, write_records};
use prefgen::{ApiGenerator, BalancedGenerator, ChatClient, Config, MetadataSchema, PrefgenError};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "prefgen")]
#[command(version)]
#[command(about = "Balanced RLHF preference dataset generation and near-duplicate cleanup")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate records with balanced metadata
    Generate {
        /// Number of records to generate (overrides config)
        #[arg(short = 'n', long)]
        records: Option<usize>,

        /// Output JSON file (default: timestamped file in the output dir)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Seed for metadata draws
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Report near-duplicate prompt pairs
    Pairs {
        /// Store file or directory of store files
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Similarity threshold (inclusive)
        #[arg(short, long)]
        threshold: Option<f64>,

        /// Number of pairs to print
        #[arg(long, default_value = "10")]
        show: usize,
    },

    /// Write a copy of the dataset with near-duplicate prompts removed
    Dedup {
        /// Store file or directory of store files
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Output JSON file
        #[arg(short, long, default_value = "rlhf_cleaned.json")]
        output: PathBuf,

        /// Similarity threshold (inclusive)
        #[arg(short, long)]
        threshold: Option<f64>,
    },

    /// Check structure, metadata balance and exact duplicate responses
    Audit {
        /// Store file or directory of store files
        #[arg(short, long, default_value = "rlhf_cleaned.json")]
        input: PathBuf,
    },

    /// Check theme files for missing keys
    CheckThemes {
        /// Themes directory (default: from config)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// Count entries in each store file of a directory
    Count {
        /// Directory of store files (default: output dir from config)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// Validate configuration file
    Validate,

    /// Show example configuration
    Example,
}

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set subscriber")
}

fn print_example_config() {
    let example = r#"# prefgen configuration file

[api]
# API key (can also use the env var named by api_key_env)
# api_key = "${OPENAI_API_KEY}"
api_key_env = "OPENAI_API_KEY"
base_url = "https://api.openai.com/v1"
timeout_secs = 120

[api.retry]
max_attempts = 3
# backoff = { kind = "exponential", base_secs = 2.0, max_secs = 60.0 }
backoff = { kind = "linear", step_secs = 5.0 }

[generation]
model = "gpt-4.1"
temperature = 0.8
max_tokens = 16000
total_records = 1000
batch_size = 25
quota_multiplier = 1      # per-category quota = total_records * quota_multiplier
retry_budget = 3          # batches with failures before the run stops
max_item_attempts = 3     # failures before an item is dropped
metadata_file = "meta_data.json.txt"
themes_dir = "themeset"
themes_suffix = ".json.txt"
# seed = 42
# USD per 1M tokens, for the cost line of the run summary
input_price_per_1m = 0.0
output_price_per_1m = 0.0

[dedup]
report_threshold = 0.85
reduce_threshold = 0.9
prompt_field = "prompt"

[output]
dir = "rlhf"
file_prefix = "rlhf_batch"
"#;
    println!("{example}");
}

/// Load the config file, falling back to defaults when it is absent.
fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        info!(path = %path.display(), "No config file, using defaults");
        return Ok(Config::default());
    }
    let config = Config::from_file(path)
        .with_context(|| format!("Failed to load config from {path:?}"))?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn progress_bar(len: usize, label: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .context("Invalid progress template")?
            .progress_chars("##-"),
    );
    pb.set_message(label.to_string());
    Ok(pb)
}

/// Indices surviving reduction, or every index when too few prompts compare.
///
/// The bar is cleared before anything is logged.
fn dedup_kept(corpus: &PromptCorpus, threshold: f64, pb: &ProgressBar) -> Result<Vec<usize>> {
    let reduced = reduce_with_progress(corpus, threshold, Some(pb));
    pb.finish_and_clear();
    match reduced {
        Ok(reduction) => Ok(reduction.kept),
        Err(PrefgenError::InsufficientCorpus { non_empty }) => {
            warn!(non_empty, "Too few prompts to compare, keeping every record");
            Ok((0..corpus.len()).collect())
        }
        Err(e) => Err(e.into()),
    }
}

fn preview(text: &str, max: usize) -> String {
    let mut out: String = text.chars().take(max).collect();
    if text.chars().count() > max {
        out.push_str("...");
    }
    out
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    match cli.command {
        Commands::Example => {
            print_example_config();
        }

        Commands::Validate => {
            let config = Config::from_file(&cli.config)
                .with_context(|| format!("Failed to load config from {:?}", cli.config))?;
            config.validate().context("Invalid configuration")?;

            config
                .resolve_api_key()
                .context("Failed to resolve API key")?;

            let schema = MetadataSchema::from_file(&config.generation.metadata_file)
                .context("Failed to load metadata schema")?;

            info!("Configuration is valid");
            info!("  Model: {}", config.generation.model);
            info!(
                "  Records: {} in batches of {}",
                config.generation.total_records, config.generation.batch_size
            );
            info!(
                "  Metadata: {} categories, quota {} per category",
                schema.len(),
                config.generation.quota_total()
            );
            info!(
                "  Dedup thresholds: report {:.2}, reduce {:.2}",
                config.dedup.report_threshold, config.dedup.reduce_threshold
            );
        }

        Commands::Generate {
            records,
            output,
            seed,
        } => {
            let mut config = Config::from_file(&cli.config)
                .with_context(|| format!("Failed to load config from {:?}", cli.config))?;
            if let Some(records) = records {
                config.generation.total_records = records;
            }
            if seed.is_some() {
                config.generation.seed = seed;
            }
            config.validate().context("Invalid configuration")?;

            let api_key = config
                .resolve_api_key()
                .context("Failed to resolve API key")?;

            let schema = MetadataSchema::from_file(&config.generation.metadata_file)
                .context("Failed to load metadata schema")?;
            let themes = load_themes(&config.generation.themes_dir, &config.generation.themes_suffix)
                .context("Failed to load themes")?;
            info!(
                categories = schema.len(),
                themes = themes.len(),
                "Loaded schema and themes"
            );

            let client = ChatClient::from_config(&config.api, api_key)?.with_pricing(
                config.generation.input_price_per_1m,
                config.generation.output_price_per_1m,
            );
            let generator = ApiGenerator::from_config(client, &config.generation);
            let mut pipeline =
                BalancedGenerator::from_config(generator, schema, themes, &config.generation)?;

            let output = output
                .unwrap_or_else(|| timestamped_path(&config.output.dir, &config.output.file_prefix));
            let stats = pipeline.run(&output).await?;
            let client = pipeline.generator().client();
            let (input_tokens, output_tokens) = client.total_tokens();

            println!("\n=== Generation Complete ===");
            println!("Target:       {}", stats.target_records);
            println!("Accepted:     {}", stats.accepted);
            println!("Batches:      {}", stats.batches);
            println!("Invalid:      {}", stats.validation_failures);
            println!("Failed calls: {}", stats.generation_failures);
            println!("Restored:     {}", stats.restored_allocations);
            println!("Dropped:      {}", stats.dropped_items);
            println!("Acceptance:   {:.1}%", stats.acceptance_rate * 100.0);
            println!("Throughput:   {:.0}/hr", stats.throughput_per_hour);
            println!("Tokens:       {input_tokens} in / {output_tokens} out");
            println!("Cost:         ${:.4}", client.total_cost_usd());
            println!("Runtime:      {:.1}s", stats.runtime_secs);
            println!("Output:       {output:?}");

            println!("\nQuota remaining:");
            for snapshot in &stats.quota {
                let top: Vec<String> = snapshot
                    .top(3)
                    .into_iter()
                    .map(|(value, count)| format!("{value}: {count}"))
                    .collect();
                println!("  {}: {} ...", snapshot.category, top.join(", "));
            }

            if !stats.is_complete() {
                warn!(
                    missing = stats.target_records - stats.accepted,
                    "Run stopped before reaching the target"
                );
            }
        }

        Commands::Pairs {
            input,
            threshold,
            show,
        } => {
            let config = load_config(&cli.config)?;
            let input = input.unwrap_or_else(|| config.output.dir.clone());
            let threshold = threshold.unwrap_or(config.dedup.report_threshold);

            let records = load_path(&input)
                .with_context(|| format!("Failed to load records from {input:?}"))?;
            let corpus = PromptCorpus::from_records(&records, &config.dedup.prompt_field, true);
            info!(prompts = corpus.len(), "Loaded prompts");

            let pb = progress_bar(corpus.len(), "scoring")?;
            let matrix = similarity_with_progress(&corpus, Some(&pb))?;
            pb.finish_and_clear();

            let pairs = find_pairs(&matrix, threshold);
            let removable: BTreeSet<usize> = pairs.iter().map(|p| p.j).collect();

            println!("Found {} near-duplicate pairs (threshold {threshold:.2}).", pairs.len());
            println!("Potentially removable duplicates: {}", removable.len());

            for (n, pair) in pairs.iter().take(show).enumerate() {
                let (Some(a), Some(b)) = (corpus.get(pair.i), corpus.get(pair.j)) else {
                    continue;
                };
                println!("\nPair {}: similarity={:.2}", n + 1, pair.score);
                println!("  [{}] {}", a.source, preview(&a.text, 160));
                println!("  [{}] {}", b.source, preview(&b.text, 160));
            }
        }

        Commands::Dedup {
            input,
            output,
            threshold,
        } => {
            let config = load_config(&cli.config)?;
            let input = input.unwrap_or_else(|| config.output.dir.clone());
            let threshold = threshold.unwrap_or(config.dedup.reduce_threshold);

            let records = load_path(&input)
                .with_context(|| format!("Failed to load records from {input:?}"))?;
            info!(records = records.len(), "Loaded dataset");

            let corpus = PromptCorpus::from_records(&records, &config.dedup.prompt_field, false);
            let pb = progress_bar(corpus.len(), "deduplicating")?;
            let kept = dedup_kept(&corpus, threshold, &pb)?;

            let cleaned: Vec<&serde_json::Value> = kept.iter().map(|&i| &records[i].value).collect();
            write_records(&output, &cleaned)
                .with_context(|| format!("Failed to write {output:?}"))?;

            println!("Loaded:   {} records", records.len());
            println!("Kept:     {} records", cleaned.len());
            println!("Removed:  {} near-duplicates", records.len() - cleaned.len());
            println!("Output:   {output:?}");
        }

        Commands::Audit { input } => {
            let records = load_path(&input)
                .with_context(|| format!("Failed to load records from {input:?}"))?;
            println!("Loaded {} records.", records.len());

            println!("\nStructural validation:");
            let issues = validate_structure(&records);
            if issues.is_empty() {
                println!("  No structural issues found.");
            } else {
                println!("  Found {} structural issues:", issues.len());
                for issue in issues.iter().take(20) {
                    println!("  - {issue}");
                }
                if issues.len() > 20 {
                    println!("  ... and {} more", issues.len() - 20);
                }
            }

            println!("\nMetadata distribution:");
            for balance in metadata_balance(&records) {
                println!("  {} (spread {}):", balance.category, balance.spread());
                for (value, count) in &balance.counts {
                    println!("    {value}: {count}");
                }
            }

            println!("\nExact duplicate response pairs:");
            let duplicates = exact_duplicate_responses(&records);
            if duplicates.is_empty() {
                println!("  None found.");
            } else {
                println!("  Found {} duplicates (first 10):", duplicates.len());
                for dup in duplicates.iter().take(10) {
                    println!("  - {} <-> {}", dup.first, dup.duplicate);
                }
            }
        }

        Commands::CheckThemes { dir } => {
            let config = load_config(&cli.config)?;
            let dir = dir.unwrap_or_else(|| config.generation.themes_dir.clone());
            if !dir.is_dir() {
                bail!("Themes directory {dir:?} does not exist");
            }

            let issues = check_themes(&dir, &config.generation.themes_suffix)?;
            if issues.is_empty() {
                println!("All themes in {dir:?} have the required keys.");
            } else {
                for issue in &issues {
                    println!("{issue}");
                }
                bail!("{} theme issues found", issues.len());
            }
        }

        Commands::Count { dir } => {
            let config = load_config(&cli.config)?;
            let dir = dir.unwrap_or_else(|| config.output.dir.clone());

            let counts = count_entries(&dir)?;
            for file in &counts.files {
                println!("{}: {} entries", file.file, file.entries);
            }
            for file in &counts.unreadable {
                println!("{file}: unreadable");
            }
            println!("\nTotal entries across all files: {}", counts.total);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_kept_clears_bar_when_corpus_too_small() {
        let corpus = PromptCorpus::from_texts(["only prompt", ""]);
        let pb = ProgressBar::hidden();
        let kept = dedup_kept(&corpus, 0.9, &pb).unwrap();
        assert_eq!(kept, vec![0, 1]);
        assert!(pb.is_finished());
    }

    #[test]
    fn test_dedup_kept_clears_bar_after_reduction() {
        let corpus = PromptCorpus::from_texts([
            "I love hiking in the mountains",
            "I love hiking in the mountains very much",
            "The stock market fell today",
        ]);
        let pb = ProgressBar::hidden();
        let kept = dedup_kept(&corpus, 0.5, &pb).unwrap();
        assert_eq!(kept, vec![0, 2]);
        assert!(pb.is_finished());
    }

    #[test]
    fn test_preview_truncates_on_chars() {
        assert_eq!(preview("héllo world", 5), "héllo...");
        assert_eq!(preview("short", 10), "short");
    }
}
