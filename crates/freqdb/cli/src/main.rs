// FreqDB
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! FreqDB CLI Tool
//!
//! Command-line interface for counting samples into frequency tables and
//! conditional indexes, and for querying the resulting distributions.

mod config;
mod ingest;

use clap::{Parser, Subcommand, ValueEnum};
use config::FreqDbConfig;
use freqdb_core::{
    AccessMode, CacheConfig, ConditionalFrequencyIndex, ConditionalProbabilityCache, Count, FrequencyTable, LidstoneFactory, MleFactory, ProbDist, ProbDistFactory,
    conditional::CONDITION_SUFFIX, store::append_suffix,
};
use ingest::Bigrams;
use serde_json::{Value, json};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

type Index = ConditionalFrequencyIndex<String, String>;
type Table = FrequencyTable<String>;

#[derive(Parser)]
#[command(name = "freqdb")]
#[command(about = "FreqDB - Disk-resident frequency counting")]
#[command(version = "0.1.0")]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Directory that table and index names are resolved against
    #[arg(long, short = 'd', global = true)]
    data_dir: Option<PathBuf>,

    /// Move existing files aside to <name>.bak<N> before opening
    #[arg(long, global = true)]
    reset: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Count each sample once in a frequency table
    Count {
        /// Table name
        table: String,
        /// Samples to count
        #[arg(required = true)]
        samples: Vec<String>,
    },
    /// Show the count of a sample
    Get {
        /// Table name
        table: String,
        /// Sample
        sample: String,
    },
    /// Show total and distinct sample count of a table
    Stats {
        /// Table name
        table: String,
    },
    /// List the most frequent samples of a table
    Top {
        /// Table name
        table: String,
        /// Number of samples to show
        #[arg(short, default_value_t = 10)]
        n: usize,
    },
    /// Record an observation of a sample under a condition
    Observe {
        /// Index name
        index: String,
        /// Condition
        condition: String,
        /// Sample
        sample: String,
        /// Number of observations (negative to retract)
        #[arg(long, default_value_t = 1, allow_hyphen_values = true)]
        count: i64,
    },
    /// Record the whitespace-separated token bigrams of a text file
    Ingest {
        /// Index name
        index: String,
        /// Text file
        file: PathBuf,
    },
    /// List the conditions of an index
    Conditions {
        /// Index name
        index: String,
    },
    /// Show the samples recorded under a condition
    Dist {
        /// Index name
        index: String,
        /// Condition
        condition: String,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Estimate the probability of a sample given a condition
    Prob {
        /// Index name
        index: String,
        /// Condition
        condition: String,
        /// Sample
        sample: String,
        /// Estimator used to build the distribution
        #[arg(long, value_enum, default_value_t = Estimator::Mle)]
        estimator: Estimator,
    },
    /// Rewrite a table or index without superseded records
    Compact {
        /// Table or index name
        name: String,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Estimator {
    /// Relative frequency
    Mle,
    /// Add-one smoothing
    Laplace,
    /// Add-one-half smoothing
    Ele,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match FreqDbConfig::resolve_config(cli.config.clone(), cli.data_dir.clone()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match &cli.command {
        Commands::Count { table, samples } => handle_count(&config, cli.reset, table, samples),
        Commands::Get { table, sample } => handle_get(&config, table, sample),
        Commands::Stats { table } => handle_stats(&config, table),
        Commands::Top { table, n } => handle_top(&config, table, *n),
        Commands::Observe { index, condition, sample, count } => handle_observe(&config, cli.reset, index, condition, sample, *count),
        Commands::Ingest { index, file } => handle_ingest(&config, cli.reset, index, file),
        Commands::Conditions { index } => handle_conditions(&config, index),
        Commands::Dist { index, condition, json } => handle_dist(&config, index, condition, *json),
        Commands::Prob { index, condition, sample, estimator } => handle_prob(&config, index, condition, sample, *estimator),
        Commands::Compact { name } => handle_compact(&config, name),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn open_table(config: &FreqDbConfig, name: &str, mode: AccessMode, reset: bool) -> anyhow::Result<Table> {
    Ok(FrequencyTable::open(config.table_path(name), &config.table_options(mode, reset))?)
}

fn open_index(config: &FreqDbConfig, name: &str, mode: AccessMode, reset: bool) -> anyhow::Result<Index> {
    Ok(ConditionalFrequencyIndex::open(config.table_path(name), &config.table_options(mode, reset))?)
}

fn count_to_json(count: &Count) -> Value {
    match u64::try_from(count) {
        Ok(n) => json!(n),
        Err(_) => json!(count.to_string()),
    }
}

fn handle_count(config: &FreqDbConfig, reset: bool, table_name: &str, samples: &[String]) -> anyhow::Result<()> {
    let mut table = open_table(config, table_name, AccessMode::ReadWrite, reset)?;
    table.update(samples.iter().cloned())?;
    let total = table.total()?;
    table.flush()?;
    table.close()?;

    println!("Counted {} samples, table total: {total}", samples.len());
    info!("Counted {} samples into table {}", samples.len(), table_name);
    Ok(())
}

fn handle_get(config: &FreqDbConfig, table_name: &str, sample: &str) -> anyhow::Result<()> {
    let table = open_table(config, table_name, AccessMode::ReadOnly, false)?;
    println!("{}", table.get(&sample.to_string())?);
    Ok(())
}

fn handle_stats(config: &FreqDbConfig, table_name: &str) -> anyhow::Result<()> {
    let mut table = open_table(config, table_name, AccessMode::ReadOnly, false)?;

    println!("Table: {}", table.path().display());
    println!("  total:    {}", table.total()?);
    println!("  distinct: {}", table.distinct_count()?);
    Ok(())
}

fn handle_top(config: &FreqDbConfig, table_name: &str, n: usize) -> anyhow::Result<()> {
    let table = open_table(config, table_name, AccessMode::ReadOnly, false)?;
    let entries = table.keys_by_frequency()?;

    if entries.is_empty() {
        println!("No samples found in table '{table_name}'");
    }
    for (sample, count) in entries.into_iter().take(n) {
        println!("{count:>10}  {sample}");
    }
    Ok(())
}

fn handle_observe(config: &FreqDbConfig, reset: bool, index_name: &str, condition: &str, sample: &str, count: i64) -> anyhow::Result<()> {
    let mut index = open_index(config, index_name, AccessMode::ReadWrite, reset)?;
    let (condition, sample) = (condition.to_string(), sample.to_string());

    index.increment(&condition, &sample, count)?;
    index.flush()?;

    println!("{condition} -> {sample}: {}", index.get(&condition, &sample)?);
    info!("Recorded {} observations of {} under {} in {}", count, sample, condition, index_name);
    index.close()?;
    Ok(())
}

fn handle_ingest(config: &FreqDbConfig, reset: bool, index_name: &str, file: &Path) -> anyhow::Result<()> {
    let reader = BufReader::new(File::open(file)?);
    let mut index = open_index(config, index_name, AccessMode::ReadWrite, reset)?;

    let mut bigrams = 0u64;
    for pair in Bigrams::new(reader) {
        let (condition, sample) = pair?;
        index.increment(&condition, &sample, 1)?;
        bigrams += 1;
    }
    index.flush()?;

    println!("Recorded {bigrams} bigrams, {} conditions", index.condition_count()?);
    info!("Ingested {} into index {}", file.display(), index_name);
    index.close()?;
    Ok(())
}

fn handle_conditions(config: &FreqDbConfig, index_name: &str) -> anyhow::Result<()> {
    let index = open_index(config, index_name, AccessMode::ReadOnly, false)?;
    let conditions = index.conditions()?;

    if conditions.is_empty() {
        println!("No conditions found in index '{index_name}'");
    }
    for condition in conditions {
        println!("{condition}");
    }
    Ok(())
}

fn handle_dist(config: &FreqDbConfig, index_name: &str, condition: &str, as_json: bool) -> anyhow::Result<()> {
    let index = open_index(config, index_name, AccessMode::ReadOnly, false)?;
    let condition = condition.to_string();
    let dist = index.frequency_distribution_for(&condition)?;

    if as_json {
        let samples: serde_json::Map<String, Value> = dist.most_common().into_iter().map(|(sample, count)| (sample.clone(), count_to_json(count))).collect();
        let output = json!({
            "condition": condition,
            "total": count_to_json(dist.total()),
            "samples": samples,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if dist.is_empty() {
        println!("No samples recorded under '{condition}'");
        return Ok(());
    }
    println!("Condition '{condition}' (total {}):", dist.total());
    for (sample, count) in dist.most_common() {
        println!("{count:>10}  {sample}");
    }
    Ok(())
}

fn handle_prob(config: &FreqDbConfig, index_name: &str, condition: &str, sample: &str, estimator: Estimator) -> anyhow::Result<()> {
    let index = open_index(config, index_name, AccessMode::ReadOnly, false)?;
    let (condition, sample) = (condition.to_string(), sample.to_string());

    let prob = match estimator {
        Estimator::Mle => estimate(&index, config.cache.clone(), MleFactory, &condition, &sample)?,
        Estimator::Laplace => estimate(&index, config.cache.clone(), LidstoneFactory::laplace(None), &condition, &sample)?,
        Estimator::Ele => estimate(&index, config.cache.clone(), LidstoneFactory::expected_likelihood(None), &condition, &sample)?,
    };
    println!("P({sample} | {condition}) = {prob:.6}");
    Ok(())
}

fn estimate<F: ProbDistFactory<String>>(index: &Index, cache_config: CacheConfig, factory: F, condition: &String, sample: &String) -> anyhow::Result<f64> {
    let mut cache: ConditionalProbabilityCache<String, String, _, F> = ConditionalProbabilityCache::with_config(index, factory, cache_config);
    let dist = cache.probability_distribution_for(condition)?;
    Ok(dist.prob(sample))
}

fn handle_compact(config: &FreqDbConfig, name: &str) -> anyhow::Result<()> {
    let path = config.table_path(name);

    let rewritten = if append_suffix(&path, CONDITION_SUFFIX).exists() {
        open_index(config, name, AccessMode::ReadWrite, false)?.compact()?
    } else {
        open_table(config, name, AccessMode::ReadWrite, false)?.compact()?
    };

    if rewritten {
        println!("Compacted {}", path.display());
    } else {
        println!("Nothing to compact in {}", path.display());
    }
    Ok(())
}
