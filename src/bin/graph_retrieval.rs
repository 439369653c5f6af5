use std::process::ExitCode;
use std::time::Duration;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use graph_retrieval::app::Retriever;
use graph_retrieval::assemble::SummaryAssembler;
use graph_retrieval::catalog::Catalog;
use graph_retrieval::config::{ConfigLoader, RetrievalConfig};
use graph_retrieval::domain::{DatasetName, RepositoryName, Version};
use graph_retrieval::error::RetrievalError;
use graph_retrieval::http::ReqwestHttpClient;
use graph_retrieval::output::{
    CachedEntry, CachedResult, FetchResult, JsonOutput, ListResult, OutputMode,
};
use graph_retrieval::progress::{ProgressSink, progress_for};
use graph_retrieval::store::Store;

#[derive(Parser)]
#[command(name = "graph-retrieval")]
#[command(about = "Download, verify, cache and preprocess published graph datasets")]
#[command(version)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Retrieve a dataset into the cache and load it")]
    Fetch(FetchArgs),
    #[command(about = "List catalog datasets, or cached ones with --cached")]
    List(ListArgs),
    #[command(about = "Show the cache state of a dataset")]
    Info(InfoArgs),
}

#[derive(Args, Clone)]
struct CacheArgs {
    #[arg(long, help = "Cache root; wins over the environment variable")]
    cache_path: Option<String>,

    #[arg(long, help = "Environment variable consulted for the cache root")]
    cache_env_var: Option<String>,

    #[arg(long, help = "Use ~/.cache/graph-retrieval as the cache root", conflicts_with = "cache_path")]
    user_cache: bool,

    #[arg(long)]
    config: Option<String>,

    #[arg(long, help = "Additional catalog file; its repositories replace built-in ones")]
    catalog: Option<String>,
}

#[derive(Args, Clone, Default)]
struct DirectionArgs {
    #[arg(long, conflicts_with = "undirected", help = "Load as directed regardless of the catalog")]
    directed: bool,

    #[arg(long, help = "Load as undirected regardless of the catalog")]
    undirected: bool,
}

impl DirectionArgs {
    fn choice(&self) -> Option<bool> {
        match (self.directed, self.undirected) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }
}

#[derive(Args, Clone)]
struct FetchArgs {
    repository: String,
    name: String,

    #[arg(long)]
    version: Option<String>,

    #[command(flatten)]
    direction: DirectionArgs,

    #[arg(long)]
    no_preprocess: bool,

    #[arg(long, help = "Treat nodes as a dense numeric range instead of keeping names")]
    numeric_nodes: bool,

    #[arg(long)]
    no_node_types: bool,

    #[arg(long)]
    no_edge_types: bool,

    #[arg(long)]
    no_edge_weights: bool,

    #[arg(long, help = "Re-verify cached files and rebuild the preprocessed variant")]
    no_cache: bool,

    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=2))]
    verbose: Option<u8>,

    #[arg(long)]
    deadline_secs: Option<u64>,

    #[arg(long)]
    workers: Option<usize>,

    #[command(flatten)]
    cache: CacheArgs,
}

#[derive(Args, Clone)]
struct ListArgs {
    repository: Option<String>,

    #[arg(long)]
    cached: bool,

    #[command(flatten)]
    cache: CacheArgs,
}

#[derive(Args, Clone)]
struct InfoArgs {
    repository: String,
    name: String,

    #[arg(long)]
    version: Option<String>,

    #[command(flatten)]
    direction: DirectionArgs,

    #[command(flatten)]
    cache: CacheArgs,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<RetrievalError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &RetrievalError) -> u8 {
    match error {
        RetrievalError::InvalidRepository(_)
        | RetrievalError::InvalidDatasetName(_)
        | RetrievalError::InvalidVersion(_)
        | RetrievalError::InvalidFilePath(_)
        | RetrievalError::UnknownRepository(_)
        | RetrievalError::UnknownDataset { .. }
        | RetrievalError::UnknownVersion { .. }
        | RetrievalError::CatalogRead(_)
        | RetrievalError::CatalogParse(_)
        | RetrievalError::ConfigRead(_)
        | RetrievalError::ConfigParse(_) => 2,
        RetrievalError::Download { .. } => 3,
        RetrievalError::Preprocess { .. } | RetrievalError::Assembly(_) => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    match cli.command {
        Commands::Fetch(args) => run_fetch(args, output_mode),
        Commands::List(args) => run_list(args, output_mode),
        Commands::Info(args) => run_info(args, output_mode),
    }
}

fn load_config(args: &CacheArgs) -> Result<RetrievalConfig, RetrievalError> {
    let mut config = ConfigLoader::resolve(args.config.as_deref())?;
    if let Some(path) = &args.cache_path {
        config.cache_path = Some(Utf8PathBuf::from(path));
    } else if args.user_cache {
        config.cache_path = Some(Store::user_cache_root()?);
    }
    if let Some(var) = &args.cache_env_var {
        config.cache_path_env_var = var.clone();
    }
    Ok(config)
}

fn load_catalog(args: &CacheArgs) -> Result<Catalog, RetrievalError> {
    let mut catalog = Catalog::builtin()?;
    if let Some(path) = &args.catalog {
        catalog.extend(Catalog::load(&Utf8PathBuf::from(path))?);
    }
    Ok(catalog)
}

fn parse_version(version: Option<&str>) -> Result<Version, RetrievalError> {
    match version {
        Some(version) => version.parse(),
        None => Ok(Version::latest()),
    }
}

fn retriever() -> Result<Retriever<ReqwestHttpClient, SummaryAssembler>, RetrievalError> {
    Ok(Retriever::new(ReqwestHttpClient::new()?, SummaryAssembler))
}

fn run_fetch(args: FetchArgs, output_mode: OutputMode) -> miette::Result<()> {
    let mut config = load_config(&args.cache)?;
    if args.no_preprocess {
        config.preprocess = false;
    }
    if args.numeric_nodes {
        config.load_nodes = false;
    }
    if args.no_node_types {
        config.load_node_types = false;
    }
    if args.no_edge_types {
        config.load_edge_types = false;
    }
    if args.no_edge_weights {
        config.load_edge_weights = false;
    }
    if args.no_cache {
        config.cache = false;
    }
    if let Some(verbose) = args.verbose {
        config.verbose = verbose;
    }
    if let Some(seconds) = args.deadline_secs {
        config = config.with_deadline(Duration::from_secs(seconds));
    }
    if let Some(workers) = args.workers {
        config.download_workers = workers;
    }

    let catalog = load_catalog(&args.cache)?;
    let repository: RepositoryName = args.repository.parse()?;
    let name: DatasetName = args.name.parse()?;
    let version = parse_version(args.version.as_deref())?;
    let directed = args.direction.choice();

    let retriever = retriever()?;
    match output_mode {
        OutputMode::NonInteractive => {
            let retrieved = retriever.retrieve_from_catalog(
                &catalog,
                &repository,
                &name,
                &version,
                directed,
                &config,
                &JsonOutput,
            )?;
            JsonOutput::print_fetch(&FetchResult {
                report: retrieved.report,
                graph: retrieved.graph,
            })
            .into_diagnostic()?;
        }
        OutputMode::Interactive => {
            let sink: Box<dyn ProgressSink> = progress_for(config.verbosity());
            let retrieved = retriever.retrieve_from_catalog(
                &catalog,
                &repository,
                &name,
                &version,
                directed,
                &config,
                sink.as_ref(),
            )?;
            let report = &retrieved.report;
            let graph = &retrieved.graph;
            println!("{}", report.dataset);
            println!("  cache:      {}", report.entry_dir);
            println!(
                "  state:      {}",
                if report.cache_hit { "cached" } else { "retrieved" }
            );
            if !report.downloaded.is_empty() {
                println!("  downloaded: {}", report.downloaded.join(", "));
            }
            if let Some(dir) = &report.processed_dir {
                println!("  processed:  {dir}");
            }
            println!(
                "  graph:      {} nodes, {} edges, {}",
                graph.nodes,
                graph.edges,
                if graph.directed { "directed" } else { "undirected" }
            );
        }
    }
    Ok(())
}

fn run_list(args: ListArgs, output_mode: OutputMode) -> miette::Result<()> {
    if args.cached {
        let config = load_config(&args.cache)?;
        let retriever = retriever()?;
        let store = retriever.store_for(&config);
        let manifests = retriever.cached_datasets(&config)?;
        let result = CachedResult {
            cache_root: store.cache_root().to_string(),
            datasets: manifests
                .iter()
                .filter(|manifest| {
                    args.repository
                        .as_deref()
                        .is_none_or(|repository| {
                            manifest.repository.eq_ignore_ascii_case(repository)
                        })
                })
                .map(CachedEntry::from)
                .collect(),
        };
        return match output_mode {
            OutputMode::NonInteractive => JsonOutput::print_cached(&result).into_diagnostic(),
            OutputMode::Interactive => {
                if result.datasets.is_empty() {
                    println!("no completed datasets under {}", result.cache_root);
                }
                for entry in &result.datasets {
                    println!(
                        "{}/{}@{}  {} file(s), {} bytes, completed {}",
                        entry.repository,
                        entry.dataset,
                        entry.version,
                        entry.files,
                        entry.bytes,
                        entry.completed_at
                    );
                }
                Ok(())
            }
        };
    }

    let catalog = load_catalog(&args.cache)?;
    let repositories: Vec<RepositoryName> = match &args.repository {
        Some(repository) => vec![repository.parse()?],
        None => catalog
            .repositories()
            .map(|name| name.parse::<RepositoryName>())
            .collect::<Result<Vec<_>, RetrievalError>>()?,
    };
    let mut datasets = Vec::new();
    for repository in &repositories {
        datasets.extend(catalog.datasets(repository)?);
    }
    let result = ListResult { datasets };
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_list(&result).into_diagnostic(),
        OutputMode::Interactive => {
            for listing in &result.datasets {
                println!(
                    "{}/{}  latest {}  (versions: {})",
                    listing.repository,
                    listing.name,
                    listing.latest,
                    listing.versions.join(", ")
                );
            }
            Ok(())
        }
    }
}

fn run_info(args: InfoArgs, output_mode: OutputMode) -> miette::Result<()> {
    let config = load_config(&args.cache)?;
    let catalog = load_catalog(&args.cache)?;
    let repository: RepositoryName = args.repository.parse()?;
    let name: DatasetName = args.name.parse()?;
    let version = parse_version(args.version.as_deref())?;
    let descriptor =
        catalog.descriptor(&repository, &name, &version, args.direction.choice())?;

    let status = retriever()?.status(&descriptor, &config)?;
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_info(&status).into_diagnostic(),
        OutputMode::Interactive => {
            println!("{}", status.dataset);
            println!("  cache:    {}", status.entry_dir);
            println!("  complete: {}", status.complete);
            for file in &status.files {
                match &file.reason {
                    Some(reason) => println!("  {}  {} ({reason})", file.path, file.state),
                    None => println!("  {}  {}", file.path, file.state),
                }
            }
            for variant in &status.processed_variants {
                println!("  processed: {variant}");
            }
            if let Some(citation) = descriptor.citation() {
                println!("  citation: {citation}");
            }
            Ok(())
        }
    }
}
