//! quarry - command line client for a document search and chat backend
//!
//! Drives the quarry-core synchronization layer end to end: searching,
//! managing documents (with processing watch), chatting, and admin
//! operations.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Logs: $XDG_STATE_HOME/quarry/quarry.log (~/.local/state/quarry/quarry.log)
//! - Config: $XDG_CONFIG_HOME/quarry/config.toml (~/.config/quarry/config.toml)

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use quarry_core::api::Gateway;
use quarry_core::types::{Conversation, Document, Metadata, Source};
use quarry_core::{Config, Mutation, MutationOutput, Navigation, ResourceKey, Session};

#[derive(Parser)]
#[command(name = "quarry")]
#[command(about = "Search, manage, and chat over a document corpus")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Search the corpus
    Search {
        /// Query text
        query: String,

        /// Restrict results to documents carrying this tag (repeatable)
        #[arg(short, long)]
        tag: Vec<String>,
    },

    /// Show query suggestions for a prefix
    Suggest {
        /// Prefix to complete
        prefix: String,
    },

    /// Manage documents
    Docs {
        #[command(subcommand)]
        command: DocsCommand,
    },

    /// Chat with the corpus
    Chat {
        #[command(subcommand)]
        command: ChatCommand,
    },

    /// Show system statistics
    Stats {
        /// Keep watching; refreshes on the stats poll cadence
        #[arg(short, long)]
        watch: bool,

        /// Print raw JSON instead of the table
        #[arg(long)]
        json: bool,
    },

    /// Administrative operations
    Admin {
        #[command(subcommand)]
        command: AdminCommand,
    },
}

#[derive(Subcommand)]
enum DocsCommand {
    /// List documents
    List {
        /// Only documents carrying this tag
        #[arg(long)]
        tag: Option<String>,

        /// Print raw JSON instead of the table
        #[arg(long)]
        json: bool,
    },

    /// Show one document
    Show {
        id: String,

        /// Keep watching until processing reaches a terminal state
        #[arg(short, long)]
        watch: bool,
    },

    /// Create a document from pasted content
    Add {
        #[arg(long)]
        title: String,

        /// Content text; omit to create a metadata-only document
        #[arg(long)]
        content: Option<String>,

        #[arg(long)]
        url: Option<String>,

        #[arg(short, long)]
        tag: Vec<String>,
    },

    /// Upload a file
    Upload {
        path: PathBuf,

        #[arg(long)]
        title: Option<String>,

        #[arg(short, long)]
        tag: Vec<String>,
    },

    /// Ask the backend to crawl a URL
    Crawl {
        url: String,

        #[arg(long)]
        title: Option<String>,

        #[arg(short, long)]
        tag: Vec<String>,
    },

    /// Update a document's title or tags
    Edit {
        id: String,

        #[arg(long)]
        title: Option<String>,

        /// Replace the tag set (repeatable)
        #[arg(short, long)]
        tag: Vec<String>,
    },

    /// Delete a document
    Rm {
        id: String,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum ChatCommand {
    /// Send a message
    Send {
        message: String,

        /// Continue an existing conversation
        #[arg(short, long)]
        conversation: Option<String>,
    },

    /// List conversations
    List,

    /// Show one conversation
    Show { id: String },

    /// Delete a conversation
    Rm {
        id: String,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum AdminCommand {
    /// Delete all documents, chunks, and conversations
    Reset {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Rebuild chunks and embeddings for every document
    Reindex,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Ensure XDG environment variables are set before using core library
    Config::ensure_xdg_env();

    // Load configuration
    let config = Config::load().context("failed to load configuration")?;

    // Initialize logging
    let _log_guard =
        quarry_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!("quarry starting");

    let session = Session::new(&config).context("failed to create session")?;

    match cli.command {
        Command::Search { query, tag } => run_search(&session, &query, tag).await,
        Command::Suggest { prefix } => run_suggest(&session, &prefix).await,
        Command::Docs { command } => run_docs(&session, command).await,
        Command::Chat { command } => run_chat(&session, command).await,
        Command::Stats { watch, json } => run_stats(&session, watch, json).await,
        Command::Admin { command } => run_admin(&session, command).await,
    }
}

// ============================================
// Search
// ============================================

async fn run_search(session: &Session, query: &str, tags: Vec<String>) -> Result<()> {
    let mut search = session.search_session();
    for tag in tags {
        // Filters before the first search just accumulate
        search.set_filter(&tag, true).await?;
    }

    let response = search.submit(query).await.context("search failed")?;

    if response.results.is_empty() {
        println!("No results for {:?}", query);
    } else {
        println!(
            "{} result(s) in {:.3}s:",
            response.results.len(),
            response.search_time
        );
        println!();
        for (rank, hit) in response.results.iter().enumerate() {
            println!("{:2}. {} (score {:.2})", rank + 1, hit.title, hit.score);
            if !hit.tags.is_empty() {
                println!("    tags: {}", hit.tags.join(", "));
            }
            if let Some(content) = &hit.content {
                println!("    {}", snippet(content, 160));
            }
            println!("    document: {}", hit.document_id);
        }
    }

    if let Some(update) = search.take_url_update() {
        println!();
        println!("Share: /search?{}", update.query_string);
    }

    Ok(())
}

async fn run_suggest(session: &Session, prefix: &str) -> Result<()> {
    let limit = session.tuning().suggest_limit;
    let suggestions = session
        .api()
        .suggest(prefix, limit)
        .await
        .context("suggestion fetch failed")?;

    if suggestions.is_empty() {
        println!("No suggestions for {:?}", prefix);
    } else {
        for suggestion in suggestions {
            println!("{}", suggestion);
        }
    }
    Ok(())
}

// ============================================
// Documents
// ============================================

async fn run_docs(session: &Session, command: DocsCommand) -> Result<()> {
    match command {
        DocsCommand::List { tag, json } => {
            let docs = match tag {
                // Tag-filtered listing goes straight to the gateway; the
                // cached list is the unfiltered one
                Some(tag) => {
                    let limit = session.tuning().document_page_size;
                    session.api().list_documents(0, limit, Some(&tag)).await?
                }
                None => session.documents().await?,
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&docs)?);
                return Ok(());
            }

            if docs.is_empty() {
                println!("No documents.");
                return Ok(());
            }
            for doc in docs {
                println!(
                    "{}  {}  [{}] {}",
                    doc.id,
                    status_label(&doc),
                    doc.tags.join(", "),
                    doc.title
                );
            }
            Ok(())
        }

        DocsCommand::Show { id, watch } => {
            if watch {
                watch_document(session, &id).await
            } else {
                let doc = session.document(&id).await?;
                print_document(&doc);
                Ok(())
            }
        }

        DocsCommand::Add {
            title,
            content,
            url,
            tag,
        } => {
            let create = quarry_core::types::DocumentCreate {
                title,
                content,
                url,
                tags: tag,
                metadata: Metadata::new(),
            };
            let outcome = session
                .coordinator()
                .execute(Mutation::CreateDocument(create))
                .await?;
            report_document_outcome(outcome.output, outcome.navigation);
            Ok(())
        }

        DocsCommand::Upload { path, title, tag } => {
            let bytes = std::fs::read(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("upload")
                .to_string();

            let spinner = spinner(&format!("Uploading {}...", file_name));
            let outcome = session
                .coordinator()
                .execute(Mutation::UploadDocument(
                    quarry_core::types::DocumentUpload {
                        file_name,
                        bytes,
                        title,
                        tags: tag,
                        metadata: Metadata::new(),
                    },
                ))
                .await;
            spinner.finish_and_clear();

            let outcome = outcome?;
            report_document_outcome(outcome.output, outcome.navigation);
            Ok(())
        }

        DocsCommand::Crawl { url, title, tag } => {
            let outcome = session
                .coordinator()
                .execute(Mutation::CrawlDocument(quarry_core::types::CrawlRequest {
                    url,
                    title,
                    tags: tag,
                    metadata: Metadata::new(),
                }))
                .await?;
            report_document_outcome(outcome.output, outcome.navigation);
            Ok(())
        }

        DocsCommand::Edit { id, title, tag } => {
            let update = quarry_core::types::DocumentUpdate {
                title,
                tags: if tag.is_empty() { None } else { Some(tag) },
                ..Default::default()
            };
            let outcome = session
                .coordinator()
                .execute(Mutation::UpdateDocument { id, update })
                .await?;
            if let MutationOutput::Document(doc) = outcome.output {
                println!("Updated {:?}", doc.title);
            }
            Ok(())
        }

        DocsCommand::Rm { id, yes } => {
            if !yes {
                bail!("deleting a document cannot be undone; pass --yes to confirm");
            }
            session
                .coordinator()
                .execute(Mutation::DeleteDocument { id: id.clone() })
                .await?;
            println!("Deleted document {}", id);
            Ok(())
        }
    }
}

/// Poll a document until processing reaches a terminal state.
async fn watch_document(session: &Session, id: &str) -> Result<()> {
    let key = ResourceKey::Document(id.to_string());
    let mut subscription = session.subscribe(key.clone());
    let _poll = session.poll(key);

    let spinner = spinner("Waiting for processing...");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                spinner.finish_and_clear();
                println!("Stopped watching.");
                return Ok(());
            }
            entry = subscription.changed() => {
                let Some(entry) = entry else {
                    spinner.finish_and_clear();
                    bail!("document {} was deleted", id);
                };

                if let Some(err) = &entry.error {
                    if err.is_not_found() {
                        spinner.finish_and_clear();
                        bail!("document {} no longer exists", id);
                    }
                    // Transient failure; the poll keeps going
                    spinner.set_message(format!("retrying: {}", err));
                    continue;
                }

                if let Some(doc) = entry.decode::<Document>()? {
                    spinner.set_message(format!("{} chunk(s) so far", doc.chunk_count));
                    if doc.is_terminal() {
                        spinner.finish_and_clear();
                        print_document(&doc);
                        return Ok(());
                    }
                }
            }
        }
    }
}

fn report_document_outcome(output: MutationOutput, navigation: Navigation) {
    if let MutationOutput::Document(doc) = output {
        println!("Created {:?} ({})", doc.title, status_label(&doc));
    }
    if let Navigation::ToDocument(id) = navigation {
        println!("Watch processing with: quarry docs show {} --watch", id);
    }
}

fn print_document(doc: &Document) {
    println!("{}", doc.title);
    println!("  id:      {}", doc.id);
    println!("  status:  {}", status_label(doc));
    println!("  chunks:  {}", doc.chunk_count);
    if let Some(url) = &doc.url {
        println!("  url:     {}", url);
    }
    if !doc.tags.is_empty() {
        println!("  tags:    {}", doc.tags.join(", "));
    }
    println!("  created: {}", doc.created_at.format("%Y-%m-%d %H:%M"));
    if doc.updated_at != doc.created_at {
        println!("  updated: {}", doc.updated_at.format("%Y-%m-%d %H:%M"));
    }
    if let Some(error) = &doc.error {
        println!("  error:   {}", error);
    }
    if !doc.metadata.is_empty() {
        println!("  metadata:");
        let mut keys: Vec<_> = doc.metadata.keys().collect();
        keys.sort();
        for key in keys {
            println!("    {}: {}", key, doc.metadata[key]);
        }
    }
}

fn status_label(doc: &Document) -> &'static str {
    if !doc.processed {
        "processing"
    } else if doc.error.is_some() {
        "failed"
    } else {
        "processed"
    }
}

// ============================================
// Chat
// ============================================

async fn run_chat(session: &Session, command: ChatCommand) -> Result<()> {
    match command {
        ChatCommand::Send {
            message,
            conversation,
        } => {
            let request = session.chat_request(&message, conversation);
            let outcome = session
                .coordinator()
                .execute(Mutation::SendMessage(request))
                .await?;

            let MutationOutput::Chat(reply) = outcome.output else {
                bail!("unexpected response to chat message");
            };

            println!("{}", reply.message.content);
            print_sources(&reply.sources);

            if let Navigation::ToConversation(id) = outcome.navigation {
                println!();
                println!("Continue with: quarry chat send --conversation {} ...", id);
            }
            Ok(())
        }

        ChatCommand::List => {
            let conversations = session.conversations().await?;
            if conversations.is_empty() {
                println!("No conversations.");
                return Ok(());
            }
            for conversation in conversations {
                println!(
                    "{}  {}  ({} message(s))",
                    conversation.id,
                    conversation.title,
                    conversation.messages.len()
                );
            }
            Ok(())
        }

        ChatCommand::Show { id } => {
            let conversation = session.conversation(&id).await?;
            print_conversation(&conversation);
            Ok(())
        }

        ChatCommand::Rm { id, yes } => {
            if !yes {
                bail!("deleting a conversation cannot be undone; pass --yes to confirm");
            }
            session
                .coordinator()
                .execute(Mutation::DeleteConversation { id: id.clone() })
                .await?;
            println!("Deleted conversation {}", id);
            Ok(())
        }
    }
}

fn print_conversation(conversation: &Conversation) {
    println!("{}", conversation.title);
    for message in &conversation.messages {
        println!();
        println!(
            "[{}] {}",
            message.role.as_str(),
            message.created_at.format("%H:%M")
        );
        println!("{}", message.content);
    }
}

fn print_sources(sources: &[Source]) {
    if sources.is_empty() {
        return;
    }
    println!();
    println!("Sources:");
    for source in sources {
        println!("  - {} (score {:.2})", source.title, source.score);
        if let Some(snippet_text) = &source.content_snippet {
            println!("    {}", snippet(snippet_text, 120));
        }
    }
}

// ============================================
// Stats and admin
// ============================================

async fn run_stats(session: &Session, watch: bool, json: bool) -> Result<()> {
    let stats = session.admin_stats().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        print_stats(&stats);
    }

    if !watch {
        return Ok(());
    }

    let key = ResourceKey::AdminStats;
    let mut subscription = session.subscribe(key.clone());
    let _poll = session.poll(key);

    println!();
    println!("Watching (Ctrl+C to stop)...");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("Stopped watching.");
                return Ok(());
            }
            entry = subscription.changed() => {
                let Some(entry) = entry else { continue };
                if let Some(stats) = entry.decode::<quarry_core::types::AdminStats>()? {
                    let timestamp = chrono::Local::now().format("%H:%M:%S");
                    println!();
                    println!("[{}]", timestamp);
                    if json {
                        println!("{}", serde_json::to_string_pretty(&stats)?);
                    } else {
                        print_stats(&stats);
                    }
                }
            }
        }
    }
}

fn print_stats(stats: &quarry_core::types::AdminStats) {
    println!("Documents: {} ({} processed, {} failed)",
        stats.document_count, stats.processed_count, stats.error_count);
    println!("Chunks:    {}", stats.chunk_count);
    println!("Vectors:   {}", stats.vector_count);

    if !stats.top_tags.is_empty() {
        let tags: Vec<String> = stats
            .top_tags
            .iter()
            .map(|t| format!("{} ({})", t.tag, t.count))
            .collect();
        println!("Top tags:  {}", tags.join(", "));
    }

    if !stats.recent_documents.is_empty() {
        println!("Recent:");
        for doc in &stats.recent_documents {
            let status = if !doc.processed {
                "processing"
            } else if doc.error.is_some() {
                "failed"
            } else {
                "processed"
            };
            println!("  - {} ({})", doc.title, status);
        }
    }
}

async fn run_admin(session: &Session, command: AdminCommand) -> Result<()> {
    match command {
        AdminCommand::Reset { yes } => {
            if !yes {
                bail!("reset deletes every document and conversation; pass --yes to confirm");
            }
            let outcome = session.coordinator().execute(Mutation::Reset).await?;
            if let MutationOutput::Ack(status) = outcome.output {
                println!("{}", status);
            }
            Ok(())
        }

        AdminCommand::Reindex => {
            let outcome = session.coordinator().execute(Mutation::Reindex).await?;
            if let MutationOutput::Ack(status) = outcome.output {
                println!("{}", status);
            }
            println!("Watch progress with: quarry stats --watch");
            Ok(())
        }
    }
}

// ============================================
// Helpers
// ============================================

fn spinner(message: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap(),
    );
    bar.set_message(message.to_string());
    bar.enable_steady_tick(std::time::Duration::from_millis(120));
    bar
}

fn snippet(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        out.push('…');
    }
    out.replace('\n', " ")
}
