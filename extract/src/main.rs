//! Tagsheet CLI - extract tagged spreadsheets into a record store
//!
//! # Commands
//!
//! ```bash
//! tagsheet extract samples.csv other.csv:Sheet2 --conversion rules.json -o store.json
//! tagsheet compare old.json new.json
//! tagsheet merge a.json b.json -o merged.json
//! tagsheet lineage store.json
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `info`); a `.env` file is honoured.

use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use tagsheet::{
    compare, extract_sources, generate_lineages, load_directives, merge, Diagnostics, DirectivesDocument,
    ExtractOptions, ExtractionStore,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tagsheet")]
#[command(about = "Extract tagged spreadsheet metadata into a nested record store", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract tagged sources into a store JSON
    Extract {
        /// Tagged sources (`path` or `path:sheet`)
        #[arg(required = true)]
        sources: Vec<String>,

        /// Conversion directives (.json or tagged .csv)
        #[arg(short, long)]
        conversion: Option<String>,

        /// Tagging directives (.json)
        #[arg(short, long)]
        tagging: Option<String>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Compare the result against this store JSON
        #[arg(long)]
        compare: Option<PathBuf>,

        /// Print parent/child lineages
        #[arg(long)]
        lineage: bool,

        /// Keep only these tables
        #[arg(long, num_args = 1..)]
        keep: Vec<String>,

        /// Drop these tables
        #[arg(long, num_args = 1..)]
        delete: Vec<String>,

        /// Do not attach project/study ids to lower-ranked records
        #[arg(long)]
        no_propagate: bool,

        /// Collect warnings without printing them
        #[arg(short, long)]
        silent: bool,
    },

    /// Compare two store JSON files
    Compare {
        first: PathBuf,
        second: PathBuf,
    },

    /// Merge store JSON files, later files winning field by field
    Merge {
        #[arg(required = true, num_args = 2..)]
        stores: Vec<PathBuf>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print parent/child lineages of a store JSON
    Lineage {
        store: PathBuf,
    },
}

fn main() {
    // Load .env file (if present)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Extract {
            sources,
            conversion,
            tagging,
            output,
            compare,
            lineage,
            keep,
            delete,
            no_propagate,
            silent,
        } => {
            let options = ExtractOptions {
                propagate_ids: !no_propagate,
                silent,
                keep_tables: keep,
                delete_tables: delete,
                ..ExtractOptions::default()
            };
            cmd_extract(
                &sources,
                conversion.as_deref(),
                tagging.as_deref(),
                &options,
                output.as_deref(),
                compare.as_deref(),
                lineage,
            )
        }

        Commands::Compare { first, second } => cmd_compare(&first, &second),

        Commands::Merge { stores, output } => cmd_merge(&stores, output.as_deref()),

        Commands::Lineage { store } => cmd_lineage(&store),
    };

    if let Err(e) = result {
        eprintln!("❌ Error: {}", e);
        std::process::exit(1);
    }
}

fn cmd_extract(
    sources: &[String],
    conversion: Option<&str>,
    tagging: Option<&str>,
    options: &ExtractOptions,
    output: Option<&Path>,
    compare_with: Option<&Path>,
    lineage: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut directives = DirectivesDocument::default();
    if let Some(spec) = conversion {
        directives.conversion = load_directives(spec)?.conversion;
    }
    if let Some(spec) = tagging {
        directives.tagging = load_directives(spec)?.tagging;
    }
    let directives = (!directives.is_empty()).then_some(directives);

    let mut diagnostics = Diagnostics::new(options.silent);
    let result = extract_sources(sources, directives.as_ref(), options, &mut diagnostics)?;

    for info in &result.sources {
        eprintln!(
            "📄 {}:{}: {} rows, {} headers, {} records",
            info.source, info.sheet, info.rows, info.headers, info.records
        );
    }
    if let Some(report) = &result.conversion {
        eprintln!("⚙️  {}", report.summary());
        for unused in &report.unused {
            eprintln!("   ⚠️  Unused directive: {}", unused);
        }
    }

    if let Some(path) = compare_with {
        let other = read_store(path)?;
        print_comparison(&result.store, &other);
    }
    if lineage {
        let lineages = generate_lineages(&result.store);
        eprintln!("{}", serde_json::to_string_pretty(&lineages)?);
    }

    write_output(&result.store.to_json()?, output)?;
    eprintln!("✨ {}", result.summary());
    Ok(())
}

fn cmd_compare(first: &Path, second: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let left = read_store(first)?;
    let right = read_store(second)?;
    print_comparison(&left, &right);
    Ok(())
}

fn cmd_merge(stores: &[PathBuf], output: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let mut merged = ExtractionStore::new();
    for path in stores {
        merge(&mut merged, read_store(path)?);
    }
    eprintln!(
        "📦 Merged {} stores: {} tables, {} records",
        stores.len(),
        merged.tables().len(),
        merged.record_count()
    );
    write_output(&merged.to_json()?, output)
}

fn cmd_lineage(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let store = read_store(path)?;
    let lineages = generate_lineages(&store);
    println!("{}", serde_json::to_string_pretty(&lineages)?);
    Ok(())
}

fn read_store(path: &Path) -> Result<ExtractionStore, Box<dyn std::error::Error>> {
    let content = fs::read_to_string(path)?;
    Ok(ExtractionStore::from_json(&content)?)
}

fn print_comparison(left: &ExtractionStore, right: &ExtractionStore) {
    let comparison = compare(left, right);
    if comparison.is_identical() {
        eprintln!("✅ Stores are identical");
        return;
    }
    eprintln!("🔍 Differences:");
    for line in comparison.report_lines() {
        eprintln!("   {}", line);
    }
}

fn write_output(content: &str, path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    match path {
        Some(p) => {
            fs::write(p, content)?;
            eprintln!("💾 Output written to: {}", p.display());
        }
        None => {
            println!("{}", content);
        }
    }
    Ok(())
}
