use anyhow::Result;
use book_rag::commands::{
    Workspace, add_book, ask, list_books, list_chapters, reindex, remove_book, search,
    show_status,
};
use book_rag::config::{run_interactive_config, show_config};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "book-rag")]
#[command(about = "Ask questions about your books and get page-cited answers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure Ollama connection and retrieval settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Import a text file into the library and index it
    Add {
        /// Path to the file; text may carry [PAGE:n] markers
        file: PathBuf,
    },
    /// List all books in the library
    List,
    /// Remove a book from the index and the library
    Remove {
        /// Book ID or name
        book: String,
    },
    /// Rebuild the index from every book in the library
    Reindex,
    /// Show the passages most similar to a query
    Search {
        query: String,
        /// Number of passages to show
        #[arg(long)]
        top_k: Option<usize>,
        /// Minimum similarity score
        #[arg(long, allow_negative_numbers = true)]
        threshold: Option<f32>,
    },
    /// List the chapter headings found in a book
    Chapters {
        /// Book ID or name
        book: String,
    },
    /// Answer a question from the library with citations
    Ask { question: String },
    /// Show detailed status of the library and index
    Status,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config()?;
            } else {
                run_interactive_config()?;
            }
        }
        Commands::Add { file } => {
            add_book(&Workspace::load()?, &file)?;
        }
        Commands::List => {
            list_books(&Workspace::load()?)?;
        }
        Commands::Remove { book } => {
            remove_book(&Workspace::load()?, &book)?;
        }
        Commands::Reindex => {
            reindex(&Workspace::load()?)?;
        }
        Commands::Search {
            query,
            top_k,
            threshold,
        } => {
            search(&Workspace::load()?, &query, top_k, threshold)?;
        }
        Commands::Chapters { book } => {
            list_chapters(&Workspace::load()?, &book)?;
        }
        Commands::Ask { question } => {
            ask(&Workspace::load()?, &question)?;
        }
        Commands::Status => {
            show_status(&Workspace::load()?)?;
        }
    }

    Ok(())
}
