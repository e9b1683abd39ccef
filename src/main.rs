use clap::{Parser, Subcommand};
use notes_rag::Result;
use notes_rag::commands::{
    DEFAULT_USER_ID, add_note, ask, check_index, create_knowledge_base, delete_knowledge_base,
    delete_note, edit_note, list_knowledge_bases, list_notes, search_knowledge_bases, serve_mcp,
    update_index,
};
use notes_rag::config::{
    ConfigError, MAX_TOP_K, get_config_dir, run_interactive_config, show_config,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "notes-rag")]
#[command(about = "Personal notes knowledge bases with retrieval-augmented question answering")]
#[command(version)]
struct Cli {
    /// Configuration directory (default: ~/.notes-rag)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure the embedding, chat and vector store services
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Manage knowledge bases
    #[command(subcommand)]
    Kb(KbCommands),
    /// Manage notes
    #[command(subcommand)]
    Note(NoteCommands),
    /// Synchronize or verify the vector index
    #[command(subcommand)]
    Index(IndexCommands),
    /// Ask a question against one or more knowledge bases
    Ask {
        question: String,
        /// Knowledge base to search; repeat for several, omit to search all
        #[arg(long = "kb")]
        knowledge_bases: Vec<i64>,
        /// Number of chunks to retrieve
        #[arg(long, value_parser = clap::value_parser!(u16).range(1..=MAX_TOP_K as i64))]
        top_k: Option<u16>,
    },
    /// Start MCP server on stdio
    Serve,
}

#[derive(Subcommand)]
enum KbCommands {
    /// Create a knowledge base
    Create {
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, default_value_t = DEFAULT_USER_ID)]
        user: i64,
    },
    /// List knowledge bases
    List {
        #[arg(long, default_value_t = DEFAULT_USER_ID)]
        user: i64,
    },
    /// Find knowledge bases by title or description
    Search {
        keyword: String,
        #[arg(long, default_value_t = DEFAULT_USER_ID)]
        user: i64,
    },
    /// Delete a knowledge base with all notes and index data
    Delete { id: i64 },
}

#[derive(Subcommand)]
enum NoteCommands {
    /// Add a note to a knowledge base
    Add {
        kb: i64,
        title: String,
        #[arg(long, conflicts_with = "file", required_unless_present = "file")]
        content: Option<String>,
        /// Read the note content from a file
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Change a note's title or content
    Edit {
        id: i64,
        #[arg(long)]
        title: Option<String>,
        #[arg(long, conflicts_with = "file")]
        content: Option<String>,
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Delete a note
    Delete {
        id: i64,
        /// Remove its index entries now instead of at the next sync
        #[arg(long)]
        purge: bool,
    },
    /// List the notes of a knowledge base
    List { kb: i64 },
}

#[derive(Subcommand)]
enum IndexCommands {
    /// Index new and changed notes, drop deleted ones
    Update { kb: i64 },
    /// Rebuild the index of every note
    Force { kb: i64 },
    /// Compare chunk records with vector points
    Check { kb: i64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_dir = get_config_dir(cli.config_dir.as_deref()).map_err(config_error)?;
    let config_dir = config_dir.as_path();

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config(config_dir)?;
            } else {
                run_interactive_config(config_dir)?;
            }
        }
        Commands::Kb(command) => match command {
            KbCommands::Create {
                title,
                description,
                user,
            } => {
                create_knowledge_base(config_dir, &title, &description, user).await?;
            }
            KbCommands::List { user } => {
                list_knowledge_bases(config_dir, user).await?;
            }
            KbCommands::Search { keyword, user } => {
                search_knowledge_bases(config_dir, &keyword, user).await?;
            }
            KbCommands::Delete { id } => {
                delete_knowledge_base(config_dir, id).await?;
            }
        },
        Commands::Note(command) => match command {
            NoteCommands::Add {
                kb,
                title,
                content,
                file,
            } => {
                add_note(config_dir, kb, &title, content, file.as_deref()).await?;
            }
            NoteCommands::Edit {
                id,
                title,
                content,
                file,
            } => {
                edit_note(config_dir, id, title, content, file.as_deref()).await?;
            }
            NoteCommands::Delete { id, purge } => {
                delete_note(config_dir, id, purge).await?;
            }
            NoteCommands::List { kb } => {
                list_notes(config_dir, kb).await?;
            }
        },
        Commands::Index(command) => match command {
            IndexCommands::Update { kb } => {
                update_index(config_dir, kb, false).await?;
            }
            IndexCommands::Force { kb } => {
                update_index(config_dir, kb, true).await?;
            }
            IndexCommands::Check { kb } => {
                check_index(config_dir, kb).await?;
            }
        },
        Commands::Ask {
            question,
            knowledge_bases,
            top_k,
        } => {
            ask(
                config_dir,
                &question,
                &knowledge_bases,
                top_k.map(usize::from),
            )
            .await?;
        }
        Commands::Serve => {
            serve_mcp(config_dir).await?;
        }
    }

    Ok(())
}

fn config_error(error: ConfigError) -> notes_rag::RagError {
    notes_rag::RagError::Config(error.to_string())
}
