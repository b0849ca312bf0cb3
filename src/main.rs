//! `folio`: query a personal EPUB library from the command line.
//!
//! Every subcommand maps to one library operation and prints its result as
//! JSON on stdout, except chapter text which is printed as is. Logs go to
//! stderr.

use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{ArgAction, Parser, Subcommand};
use folio_config::{Config, Loader, Overrides};
use folio_library::models::ChapterText;
use folio_library::search::SearchOptions;
use folio_library::{Library, LibraryOptions, ResolveOptions};
use folio_storage::BackendHandle;
use folio_storage::backend::LocalBackend;
use miette::IntoDiagnostic;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "folio", version, about = "Read-only query engine for a personal EPUB library")]
struct Cli {
    /// Config file (TOML, YAML or JSON)
    #[arg(long, global = true, env = "FOLIO_CONFIG")]
    config: Option<PathBuf>,
    /// Library root directory, overriding the configured one
    #[arg(long, global = true)]
    library: Option<PathBuf>,
    /// More logging: `-v` for debug, `-vv` for trace
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List every book in the library
    List,
    /// Show a book's metadata and chapters
    Info { book: PathBuf },
    /// Print one chapter's text
    Chapter { book: PathBuf, number: usize },
    /// Print chapters `start` to `end`, inclusive
    Range { book: PathBuf, start: usize, end: usize },
    /// Search one book
    Search { book: PathBuf, query: String },
    /// Search every book in the library
    SearchLibrary { query: String },
    /// Summarize the library and its index
    Status,
}

fn report<E: Debug>(err: E) -> miette::Report {
    miette::miette!("{err:?}")
}

/// The log level asked for with `-v`, if any.
fn verbosity(verbose: u8) -> Option<String> {
    match verbose {
        0 => None,
        1 => Some("debug".to_string()),
        _ => Some("trace".to_string()),
    }
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn library_options(config: &Config) -> LibraryOptions {
    LibraryOptions {
        resolve: ResolveOptions { split_on_anchors: config.resolve.split_on_anchors },
        search: SearchOptions {
            context_chars: config.search.context_chars,
            max_results_per_book: config.search.result_limit(),
        },
    }
}

fn print_json(value: &impl Serialize) -> miette::Result<()> {
    println!("{}", serde_json::to_string_pretty(value).into_diagnostic()?);
    Ok(())
}

fn print_chapters(chapters: &[ChapterText]) {
    let rule = "=".repeat(60);
    for chapter in chapters {
        let title = chapter.title.clone().unwrap_or_else(|| format!("Chapter {}", chapter.number));
        println!("{rule}\n{title}\n{rule}\n\n{}\n", chapter.text);
    }
}

async fn run(library: &Library, command: Command) -> miette::Result<()> {
    match command {
        Command::List => print_json(&library.list_books().await.map_err(report)?),
        Command::Info { book } => print_json(&library.get_book_info(&book).await.map_err(report)?),
        Command::Chapter { book, number } => {
            let chapter = library.get_chapter(&book, number).await.map_err(report)?;
            println!("{}", chapter.text);
            Ok(())
        },
        Command::Range { book, start, end } => {
            print_chapters(&library.get_chapters_range(&book, start, end).await.map_err(report)?);
            Ok(())
        },
        Command::Search { book, query } => print_json(&library.search_book(&book, &query).await.map_err(report)?),
        Command::SearchLibrary { query } => print_json(&library.search_library(&query).await.map_err(report)?),
        Command::Status => print_json(&library.status().await.map_err(report)?),
    }
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    let overrides = Overrides { library_root: cli.library.clone(), log_level: verbosity(cli.verbose) };
    let mut loader = Loader::new().overrides(overrides);
    if let Some(path) = &cli.config {
        loader = loader.file(path);
    }
    let config = loader.load().map_err(report)?;
    init_logging(&config);

    let root = config.library_root.display().to_string();
    let backend: BackendHandle = Arc::new(LocalBackend::new(root, &config.library_root).map_err(report)?);
    let cancel = CancellationToken::new();
    let library = Library::new(backend, library_options(&config)).with_cancellation(cancel.clone());

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted; cancelling");
                cancel.cancel();
            }
        }
    });

    run(&library, cli.command).await
}
