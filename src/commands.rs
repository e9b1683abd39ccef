use anyhow::Context;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use itertools::Itertools;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::Config;
use crate::database::sqlite::{Database, KnowledgeBase, NewKnowledgeBase, NewNote, Note, NoteUpdate};
use crate::database::{QdrantStore, VectorIndex};
use crate::embeddings::{Embedder, EmbeddingClient};
use crate::generation::{AnswerGenerator, ChatClient, ChatCompleter};
use crate::indexer::{ConsistencyReport, IndexSynchronizer, SyncAction, SyncReport};
use crate::mcp::{McpServer, register_all};
use crate::retrieval::{RagAnswer, Retriever};
use crate::{RagError, Result};

pub const DEFAULT_USER_ID: i64 = 1;

/// Every long-lived component, wired from one configuration
pub struct Services {
    pub config: Config,
    pub database: Database,
    pub synchronizer: IndexSynchronizer,
    pub retriever: Arc<Retriever>,
}

impl Services {
    /// Load `config.toml` from `config_dir` and connect to every backend
    #[inline]
    pub async fn connect(config_dir: &Path) -> Result<Self> {
        Self::from_config(load_config(config_dir)?).await
    }

    /// Open the metadata store and make sure the vector collection exists
    #[inline]
    pub async fn from_config(config: Config) -> Result<Self> {
        let database = open_database(&config).await?;

        let store = Arc::new(QdrantStore::new(&config));
        let probe = Arc::clone(&store);
        tokio::task::spawn_blocking(move || probe.ensure_collection())
            .await
            .context("Vector collection setup task failed")??;

        let embedder: Arc<dyn Embedder> = Arc::new(EmbeddingClient::new(&config));
        let completer: Arc<dyn ChatCompleter> = Arc::new(ChatClient::new(&config));
        let vector_index: Arc<dyn VectorIndex> = store;

        let synchronizer = IndexSynchronizer::new(
            database.clone(),
            Arc::clone(&embedder),
            Arc::clone(&vector_index),
            &config.rag,
        );
        let retriever = Arc::new(Retriever::new(
            database.clone(),
            embedder,
            vector_index,
            AnswerGenerator::new(completer),
            config.rag.top_k,
        ));

        Ok(Self {
            config,
            database,
            synchronizer,
            retriever,
        })
    }
}

#[inline]
pub async fn create_knowledge_base(
    config_dir: &Path,
    title: &str,
    description: &str,
    user_id: i64,
) -> Result<KnowledgeBase> {
    let database = open_database(&load_config(config_dir)?).await?;
    let knowledge_base = database
        .create_knowledge_base(NewKnowledgeBase {
            user_id,
            title: title.to_string(),
            description: description.to_string(),
        })
        .await
        .context("Failed to create knowledge base")?;

    println!(
        "{} knowledge base {} (ID: {})",
        style("Created").green().bold(),
        style(&knowledge_base.title).bold(),
        knowledge_base.id
    );
    Ok(knowledge_base)
}

#[inline]
pub async fn list_knowledge_bases(config_dir: &Path, user_id: i64) -> Result<Vec<KnowledgeBase>> {
    let database = open_database(&load_config(config_dir)?).await?;
    let knowledge_bases = database
        .list_knowledge_bases(user_id)
        .await
        .context("Failed to list knowledge bases")?;

    if knowledge_bases.is_empty() {
        println!("No knowledge bases for user {} yet.", user_id);
        println!("Use 'notes-rag kb create <title>' to add one.");
    } else {
        println!("Knowledge bases ({} total):", knowledge_bases.len());
        println!();
        print_knowledge_bases(&knowledge_bases);
    }
    Ok(knowledge_bases)
}

#[inline]
pub async fn search_knowledge_bases(
    config_dir: &Path,
    keyword: &str,
    user_id: i64,
) -> Result<Vec<KnowledgeBase>> {
    let database = open_database(&load_config(config_dir)?).await?;
    let knowledge_bases = database
        .search_knowledge_bases(user_id, keyword)
        .await
        .context("Failed to search knowledge bases")?;

    if knowledge_bases.is_empty() {
        println!("No knowledge bases match '{}'.", keyword);
    } else {
        print_knowledge_bases(&knowledge_bases);
    }
    Ok(knowledge_bases)
}

/// Delete a knowledge base together with its notes, chunk records and vector points
#[inline]
pub async fn delete_knowledge_base(config_dir: &Path, knowledge_base_id: i64) -> Result<()> {
    let services = Services::connect(config_dir).await?;
    let spinner = spinner(format!("Deleting knowledge base {}", knowledge_base_id));
    let result = services
        .synchronizer
        .delete_knowledge_base(knowledge_base_id)
        .await;
    spinner.finish_and_clear();
    let points_removed = result?;

    println!(
        "{} knowledge base {}",
        style("Deleted").red().bold(),
        knowledge_base_id
    );
    if !points_removed {
        println!(
            "{} its vector points could not be deleted from collection '{}'.",
            style("Warning:").yellow().bold(),
            services.config.qdrant.collection
        );
    }
    Ok(())
}

#[inline]
pub async fn add_note(
    config_dir: &Path,
    knowledge_base_id: i64,
    title: &str,
    content: Option<String>,
    file: Option<&Path>,
) -> Result<Note> {
    let content = read_content(content, file)?.ok_or_else(|| {
        RagError::Config("Note content is required (use --content or --file)".to_string())
    })?;

    let database = open_database(&load_config(config_dir)?).await?;
    if database
        .get_knowledge_base(knowledge_base_id)
        .await
        .context("Failed to load knowledge base")?
        .is_none()
    {
        return Err(knowledge_base_not_found(knowledge_base_id));
    }

    let note = database
        .create_note(NewNote {
            knowledge_base_id,
            title: title.to_string(),
            content,
        })
        .await
        .context("Failed to create note")?;

    println!(
        "{} note {} (ID: {}) in knowledge base {}",
        style("Added").green().bold(),
        style(&note.title).bold(),
        note.id,
        knowledge_base_id
    );
    println!("Run 'notes-rag index update {}' to index it.", knowledge_base_id);
    Ok(note)
}

#[inline]
pub async fn edit_note(
    config_dir: &Path,
    note_id: i64,
    title: Option<String>,
    content: Option<String>,
    file: Option<&Path>,
) -> Result<Note> {
    let update = NoteUpdate {
        title,
        content: read_content(content, file)?,
    };
    if update.is_empty() {
        return Err(RagError::Config(
            "Nothing to change (use --title, --content or --file)".to_string(),
        ));
    }

    let database = open_database(&load_config(config_dir)?).await?;
    let note = database
        .update_note(note_id, update)
        .await
        .context("Failed to update note")?
        .ok_or_else(|| note_not_found(note_id))?;

    println!(
        "{} note {} (ID: {})",
        style("Updated").green().bold(),
        style(&note.title).bold(),
        note.id
    );
    Ok(note)
}

/// Delete a note. Its index entries go away on the next sync, or right now with `purge`.
#[inline]
pub async fn delete_note(config_dir: &Path, note_id: i64, purge: bool) -> Result<()> {
    let config = load_config(config_dir)?;

    if purge {
        let services = Services::from_config(config).await?;
        if services
            .database
            .get_note(note_id)
            .await
            .context("Failed to load note")?
            .is_none()
        {
            return Err(note_not_found(note_id));
        }
        let points_removed = services.synchronizer.purge_note(note_id).await?;
        remove_note(&services.database, note_id).await?;
        if points_removed {
            println!("Index entries for note {} removed.", note_id);
        } else {
            println!(
                "{} the vector points of note {} could not be deleted.",
                style("Warning:").yellow().bold(),
                note_id
            );
        }
    } else {
        let database = open_database(&config).await?;
        remove_note(&database, note_id).await?;
        println!("Index entries are removed on the next 'notes-rag index update'.");
    }
    Ok(())
}

#[inline]
pub async fn list_notes(config_dir: &Path, knowledge_base_id: i64) -> Result<Vec<Note>> {
    let database = open_database(&load_config(config_dir)?).await?;
    let knowledge_base = database
        .get_knowledge_base(knowledge_base_id)
        .await
        .context("Failed to load knowledge base")?
        .ok_or_else(|| knowledge_base_not_found(knowledge_base_id))?;
    let notes = database
        .list_notes(knowledge_base_id)
        .await
        .context("Failed to list notes")?;

    println!(
        "Notes in {} ({} total):",
        style(&knowledge_base.title).bold(),
        notes.len()
    );
    for note in &notes {
        println!(
            "  {} {} (updated {}, {} chars)",
            style(format!("[{}]", note.id)).dim(),
            note.title,
            note.update_time.format("%Y-%m-%d %H:%M:%S"),
            note.content.chars().count()
        );
    }
    Ok(notes)
}

/// Incremental synchronization; `force` rebuilds every note
#[inline]
pub async fn update_index(
    config_dir: &Path,
    knowledge_base_id: i64,
    force: bool,
) -> Result<SyncReport> {
    let services = Services::connect(config_dir).await?;

    let spinner = spinner(if force {
        format!("Rebuilding index for knowledge base {}", knowledge_base_id)
    } else {
        format!("Updating index for knowledge base {}", knowledge_base_id)
    });
    let result = if force {
        services
            .synchronizer
            .force_update_index(knowledge_base_id)
            .await
    } else {
        services.synchronizer.update_index(knowledge_base_id).await
    };
    spinner.finish_and_clear();
    let report = result?;

    print_sync_report(&report);
    Ok(report)
}

#[inline]
pub async fn check_index(config_dir: &Path, knowledge_base_id: i64) -> Result<ConsistencyReport> {
    let services = Services::connect(config_dir).await?;
    let report = services
        .synchronizer
        .check_consistency(knowledge_base_id)
        .await?;

    if report.is_consistent() {
        println!("{} {}", style("✓").green().bold(), report.summary());
    } else {
        println!("{} {}", style("✗").red().bold(), report.summary());
        if !report.missing_in_vector_store.is_empty() {
            println!(
                "  Missing points: {}",
                report.missing_in_vector_store.iter().join(", ")
            );
        }
        if !report.orphaned_in_vector_store.is_empty() {
            println!(
                "  Orphaned points: {}",
                report.orphaned_in_vector_store.iter().join(", ")
            );
        }
        if !report.affected_notes.is_empty() {
            println!("  Affected notes: {}", report.affected_notes.iter().join(", "));
        }
        println!(
            "Run 'notes-rag index force {}' to repair.",
            knowledge_base_id
        );
    }
    Ok(report)
}

#[inline]
pub async fn ask(
    config_dir: &Path,
    question: &str,
    knowledge_base_ids: &[i64],
    top_k: Option<usize>,
) -> Result<RagAnswer> {
    let services = Services::connect(config_dir).await?;

    let spinner = spinner("Thinking".to_string());
    let result = services
        .retriever
        .answer(question, knowledge_base_ids, top_k)
        .await;
    spinner.finish_and_clear();
    let answer = result?;

    println!("{}", answer.answer);
    if !answer.documents.is_empty() {
        println!();
        println!("{}", style("Sources:").bold());
        for (i, document) in answer.documents.iter().enumerate() {
            println!(
                "  {}. {} {}",
                i + 1,
                document.note_title,
                style(format!("(note {}, score {:.3})", document.note_id, document.score)).dim()
            );
        }
    }
    Ok(answer)
}

/// Run the MCP server on stdio until the client disconnects
#[inline]
pub async fn serve_mcp(config_dir: &Path) -> Result<()> {
    let services = Services::connect(config_dir).await?;
    info!(
        "Serving knowledge bases from {}",
        services.config.database_path().display()
    );

    let server = McpServer::new("notes-rag", env!("CARGO_PKG_VERSION"));
    register_all(&server, Arc::clone(&services.retriever), &services.database).await;
    server
        .serve_stdio()
        .await
        .map_err(|e| RagError::Mcp(format!("{:#}", e)))
}

fn load_config(config_dir: &Path) -> Result<Config> {
    Config::load(config_dir).map_err(|e| RagError::Config(format!("{:#}", e)))
}

async fn open_database(config: &Config) -> Result<Database> {
    Ok(Database::initialize_from_config_dir(config.get_base_dir())
        .await
        .context("Failed to initialize database")?)
}

async fn remove_note(database: &Database, note_id: i64) -> Result<()> {
    let note = database
        .delete_note(note_id)
        .await
        .context("Failed to delete note")?
        .ok_or_else(|| note_not_found(note_id))?;

    println!(
        "{} note {} (ID: {})",
        style("Deleted").red().bold(),
        style(&note.title).bold(),
        note.id
    );
    Ok(())
}

fn read_content(content: Option<String>, file: Option<&Path>) -> Result<Option<String>> {
    match (content, file) {
        (Some(content), _) => Ok(Some(content)),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read note file: {}", path.display()))
            .map(Some)
            .map_err(RagError::from),
        (None, None) => Ok(None),
    }
}

fn knowledge_base_not_found(id: i64) -> RagError {
    RagError::NotFound(format!("knowledge base {}", id))
}

fn note_not_found(id: i64) -> RagError {
    RagError::NotFound(format!("note {}", id))
}

fn spinner(message: String) -> ProgressBar {
    if !console::user_attended_stderr() {
        return ProgressBar::hidden();
    }

    let bar = ProgressBar::new_spinner();
    if let Ok(spinner_style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        bar.set_style(spinner_style);
    }
    bar.set_message(message);
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

fn print_knowledge_bases(knowledge_bases: &[KnowledgeBase]) {
    for kb in knowledge_bases {
        println!("{} (ID: {})", style(&kb.title).bold(), kb.id);
        if !kb.description.is_empty() {
            println!("   {}", kb.description);
        }
        println!("   Notes: {}", kb.note_count);
        match kb.index_update_time {
            Some(time) => println!("   Last Indexed: {}", time.format("%Y-%m-%d %H:%M:%S")),
            None => println!("   Last Indexed: {}", style("never").yellow()),
        }
        println!();
    }
}

fn print_sync_report(report: &SyncReport) {
    for detail in &report.details {
        let action = match detail.action {
            SyncAction::Insert => style(detail.action.to_string()).green(),
            SyncAction::Update => style(detail.action.to_string()).cyan(),
            SyncAction::Skip => style(detail.action.to_string()).dim(),
            SyncAction::Delete => style(detail.action.to_string()).red(),
        };
        println!(
            "  {:<6} [{}] {}: {}",
            action, detail.note_id, detail.note_title, detail.message
        );
    }

    println!(
        "{} knowledge base {}: {}",
        style("Index synchronized").green().bold(),
        report.knowledge_base_id,
        report.summary()
    );

    if report.is_partial() {
        println!(
            "{} {} notes are out of step with the vector store:",
            style("Warning:").yellow().bold(),
            report.partially_indexed.len()
        );
        for partial in &report.partially_indexed {
            println!("  note {}: {}", partial.note_id, partial.reason);
        }
        println!(
            "Run 'notes-rag index force {}' once the vector store is reachable.",
            report.knowledge_base_id
        );
    }
}
