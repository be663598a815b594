//! refscan CLI
//!
//! Scans a document database for references the schema does not back up,
//! and exports the reference graph the schema describes.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use refscan::{
    report, DirectoryStore, ReferenceGraph, ReferenceMap, RefscanConfig, ScanReport, Scanner,
    SchemaModel, Subject,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "refscan")]
#[command(about = "Referential integrity scanner for schema-described document databases")]
#[command(version)]
struct Cli {
    /// Show debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file layered over refscan.toml and REFSCAN__* variables
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan the database for referential integrity violations
    Scan {
        /// Schema file (YAML or JSON)
        #[arg(short, long)]
        schema: Option<PathBuf>,

        /// Directory holding one <collection>.jsonl file per collection
        #[arg(short, long)]
        database: Option<PathBuf>,

        /// Source collection not to scan (repeatable)
        #[arg(long = "skip", value_name = "COLLECTION")]
        skip: Vec<String>,

        /// Write the reference report and stop
        #[arg(long)]
        no_scan: bool,

        /// Look for each missing document in the collections the schema does not allow
        #[arg(long)]
        locate_misplaced_documents: bool,

        #[arg(long)]
        reference_report: Option<PathBuf>,

        #[arg(long)]
        violation_report: Option<PathBuf>,

        /// Collections scanned concurrently
        #[arg(long)]
        workers: Option<usize>,

        /// Documents fetched per page
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Export the reference graph described by the schema
    Graph {
        #[arg(short, long)]
        schema: Option<PathBuf>,

        /// What each node stands for
        #[arg(long, value_enum, default_value = "collection")]
        subject: SubjectArg,

        #[arg(short, long, value_enum, default_value = "dot")]
        format: GraphFormat,

        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SubjectArg {
    Collection,
    Class,
}

impl From<SubjectArg> for Subject {
    fn from(arg: SubjectArg) -> Self {
        match arg {
            SubjectArg::Collection => Subject::Collection,
            SubjectArg::Class => Subject::Class,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum GraphFormat {
    Dot,
    Json,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "refscan=debug" } else { "refscan=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = RefscanConfig::load_from(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Scan {
            schema,
            database,
            skip,
            no_scan,
            locate_misplaced_documents,
            reference_report,
            violation_report,
            workers,
            batch_size,
        } => {
            // Flags override loaded configuration.
            if schema.is_some() {
                config.schema.path = schema;
            }
            if database.is_some() {
                config.database.directory = database;
            }
            config.scan.skip_collections.extend(skip);
            config.scan.locate_misplaced_documents |= locate_misplaced_documents;
            if let Some(path) = reference_report {
                config.reports.reference_report = path;
            }
            if let Some(path) = violation_report {
                config.reports.violation_report = path;
            }
            if let Some(workers) = workers {
                config.scan.workers = workers;
            }
            if let Some(batch_size) = batch_size {
                config.scan.batch_size = batch_size;
            }
            scan(&config, no_scan)
        }
        Commands::Graph {
            schema,
            subject,
            format,
            output,
        } => {
            if schema.is_some() {
                config.schema.path = schema;
            }
            graph(&config, subject.into(), format, output.as_deref())
        }
    }
}

fn load_schema(config: &RefscanConfig) -> anyhow::Result<(SchemaModel, ReferenceMap)> {
    let Some(path) = config.schema.path.as_deref() else {
        bail!("No schema given; pass --schema or set [schema] path");
    };

    tracing::info!(path = %path.display(), "Reading schema");
    let schema = SchemaModel::from_file(path, &config.schema.database_class)?;
    tracing::info!(
        name = schema.name.as_deref().unwrap_or("<unnamed>"),
        version = schema.version.as_deref().unwrap_or("<unversioned>"),
        classes = schema.class_count(),
        collections = schema.collections().len(),
        "Schema loaded"
    );

    let (map, diagnostics) = ReferenceMap::build(&schema);
    diagnostics.log();
    Ok((schema, map))
}

fn scan(config: &RefscanConfig, no_scan: bool) -> anyhow::Result<()> {
    let (_schema, map) = load_schema(config)?;

    for name in &config.scan.skip_collections {
        if !map.index().collections().contains(name) {
            match map.index().suggest_collection(name) {
                Some(suggestion) => tracing::warn!(
                    collection = %name,
                    "Schema has no such collection; did you mean {}?",
                    suggestion
                ),
                None => tracing::warn!(collection = %name, "Schema has no such collection"),
            }
        }
    }

    report::write_reference_map(&config.reports.reference_report, &map)?;
    if no_scan {
        tracing::info!("Skipping scan");
        return Ok(());
    }

    let Some(directory) = config.database.directory.as_deref() else {
        bail!("No database given; pass --database or set [database] directory");
    };
    let store = DirectoryStore::open(directory)?;

    let options = config.scan_options();
    let locate = options.locate_misplaced_documents;
    let scanner = Scanner::new(&map, &store, options);
    match scanner.run() {
        Ok(outcome) => {
            write_violations(config, &outcome, locate)?;
            print_summary(&outcome, &config.reports.violation_report);
            Ok(())
        }
        Err(failure) => {
            // Keep whatever was found before the failure.
            write_violations(config, &failure.partial, locate)?;
            Err(failure.into())
        }
    }
}

fn write_violations(config: &RefscanConfig, outcome: &ScanReport, locate: bool) -> anyhow::Result<()> {
    report::write_violations(&config.reports.violation_report, &outcome.violations, locate)?;
    Ok(())
}

fn print_summary(outcome: &ScanReport, violation_report: &Path) {
    let totals = outcome.totals();
    println!("Collections:");
    for collection in &outcome.collections {
        println!(
            "  {:<32} {:<28} documents={:<8} violations={}",
            collection.name, collection.state, collection.tally.documents_scanned, collection.tally.violations
        );
    }
    if totals.unknown_type_documents > 0 {
        println!("Documents with an unknown type: {}", totals.unknown_type_documents);
    }
    if totals.ineligible_documents > 0 {
        println!("Documents in a collection their class does not belong to: {}", totals.ineligible_documents);
    }
    if totals.malformed_values > 0 {
        println!("Reference values that are not ids: {}", totals.malformed_values);
    }
    println!(
        "Checked {} references in {} documents; {} violations written to {}",
        totals.references_checked,
        totals.documents_scanned,
        outcome.violations.len(),
        violation_report.display()
    );
}

fn graph(config: &RefscanConfig, subject: Subject, format: GraphFormat, output: Option<&Path>) -> anyhow::Result<()> {
    let (schema, map) = load_schema(config)?;
    let graph = ReferenceGraph::build(&schema, &map, subject);
    tracing::info!(nodes = graph.node_count(), edges = graph.edge_count(), "Reference graph built");

    let rendered = match format {
        GraphFormat::Dot => graph.to_dot(),
        GraphFormat::Json => graph.to_json()?,
    };

    match output {
        Some(path) => {
            std::fs::write(path, rendered).with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Exported graph to: {}", path.display());
        }
        None => print!("{}", rendered),
    }
    Ok(())
}
