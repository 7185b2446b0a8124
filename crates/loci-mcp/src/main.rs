//! Loci MCP server - project-scoped semantic memory over stdio.
//!
//! One process serves one project: memories live in an embedded vector
//! store and property graph, tools arrive as line-framed JSON-RPC on stdin,
//! and a background drainer keeps the two stores coherent.

use clap::Parser;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use loci_core::{
    EmbeddingService, GraphStore, Indexer, JobRegistry, MemoryManager, Normalizer,
    ParserOrchestrator, QueryEngine, Settings, SqliteGraphStore, SqliteVectorStore, SyncLayer,
    SyncWorker, VectorStore,
};
use loci_mcp::context::ToolContext;
use loci_mcp::protocol::stdio::StdioTransport;
use loci_mcp::server::McpServer;

/// Project memory MCP server.
#[derive(Parser, Debug)]
#[command(name = "loci-mcp", version, about)]
struct Args {
    /// Project identifier; immutable for the lifetime of the process.
    #[arg(long)]
    project_id: Option<String>,

    /// Containment root for all tool-supplied paths.
    #[arg(long)]
    project_path: Option<PathBuf>,

    /// Where the store databases live. Omit for in-memory stores.
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Logging goes to stderr; stdout carries JSON-RPC.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with_writer(io::stderr)
        .with_target(false)
        .with_ansi(false)
        .init();

    info!("Loci MCP server v{} starting...", env!("CARGO_PKG_VERSION"));

    let mut settings = Settings::from_env();
    if let Some(project_id) = args.project_id {
        settings.project_id = project_id;
    }
    if let Some(project_path) = args.project_path {
        settings.project_path = project_path;
    }
    if let Some(data_dir) = args.data_dir {
        settings.data_dir = Some(data_dir);
    }

    let (vector_path, graph_path) = match &settings.data_dir {
        Some(data_dir) => {
            if let Err(e) = std::fs::create_dir_all(data_dir) {
                error!("Failed to create data directory {:?}: {}", data_dir, e);
                std::process::exit(1);
            }
            (
                Some(data_dir.join("vector.db")),
                Some(data_dir.join("graph.db")),
            )
        }
        None => (None, None),
    };

    let vector: Arc<dyn VectorStore> =
        match SqliteVectorStore::open(vector_path.as_deref()) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                error!("Failed to open vector store: {}", e);
                std::process::exit(1);
            }
        };
    let graph: Arc<dyn GraphStore> = match SqliteGraphStore::open(graph_path.as_deref()) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("Failed to open graph store: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = vector.initialize_collections().await {
        error!("Failed to initialize vector collections: {}", e);
        std::process::exit(1);
    }
    if let Err(e) = graph.initialize_schema().await {
        error!("Failed to initialize graph schema: {}", e);
        std::process::exit(1);
    }
    info!("Stores initialized");

    let embeddings = match EmbeddingService::from_settings(&settings) {
        Ok(service) => Arc::new(service),
        Err(e) => {
            error!("Failed to build embedding service: {}", e);
            std::process::exit(1);
        }
    };

    let sync = Arc::new(SyncLayer::new(
        vector.clone(),
        graph.clone(),
        settings.sync.max_retries,
    ));
    let manager = Arc::new(MemoryManager::new(
        vector.clone(),
        graph.clone(),
        embeddings.clone(),
        sync.clone(),
        settings.normalizer.conflict_threshold,
    ));
    let query = Arc::new(QueryEngine::new(
        vector.clone(),
        graph.clone(),
        embeddings.clone(),
        settings.query.default_limit,
        settings.query.max_limit,
    ));
    let jobs = Arc::new(JobRegistry::new());
    let indexer = Arc::new(Indexer::new(
        manager.clone(),
        vector.clone(),
        graph.clone(),
        jobs.clone(),
        ParserOrchestrator::new(),
    ));
    let normalizer = Arc::new(Normalizer::new(
        vector.clone(),
        graph.clone(),
        embeddings.clone(),
        jobs.clone(),
        settings.normalizer.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    // Background drainer keeping pending graph writes converging.
    {
        let worker = SyncWorker::new(
            sync.clone(),
            Duration::from_secs(settings.sync.interval_seconds),
            settings.sync.batch_size,
        );
        let worker_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            worker.run(worker_shutdown).await;
        });
    }

    let ctx = Arc::new(ToolContext {
        settings,
        vector,
        graph,
        embeddings,
        manager,
        query,
        sync,
        indexer,
        normalizer,
        jobs,
        shutdown: shutdown_rx,
    });

    let server = McpServer::new(ctx);
    let transport = StdioTransport::new();

    info!("Starting MCP server on stdio...");
    if let Err(e) = transport.run(server).await {
        error!("Server error: {}", e);
        let _ = shutdown_tx.send(true);
        std::process::exit(1);
    }

    let _ = shutdown_tx.send(true);
    info!("Loci MCP server shutting down");
}
