pub mod agent;
pub mod cache;
pub mod cli;
pub mod config;
pub mod conversation;
pub mod document;
pub mod error;
pub mod llm;
pub mod media;
pub mod models;
pub mod postprocess;
pub mod search;
pub mod server;

use agent::ChatAgent;
use cli::Args;
use log::info;
use server::Server;
use std::error::Error;
use std::sync::Arc;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("Server Address: {}", args.server_addr);
    info!("Chat LLM Type: {}", args.chat_llm_type);
    info!("Chat Model: {}", args.chat_model.as_deref().unwrap_or("adapter default"));
    info!("Chat Template: {}", args.chat_template);
    info!("Caption Backend: {}", args.caption_backend);
    info!("Transcription Base URL: {}", args.transcription_base_url);
    info!("Web Search Enabled: {}", !args.search_api_key.is_empty() && !args.search_engine_id.is_empty());
    info!("Prompts Path: {}", args.prompts_path.as_deref().unwrap_or("none"));
    info!("Repair Policy: {}", args.repair_policy);
    info!("Orchestration: {}", args.orchestration);
    info!("Page Chunk Size: {}", args.page_chunk_size);
    info!("Temp Dir: {}", args.temp_dir);
    info!("Reclaim URL: {}", args.reclaim_url.as_deref().unwrap_or("none"));
    info!("Eager Init: {}", args.eager_init);
    info!("TLS Enabled: {}", args.enable_tls);
    info!("-------------------------");

    std::fs::create_dir_all(&args.temp_dir)?;

    let agent = Arc::new(ChatAgent::new(args.clone()).await?);
    let addr = args.server_addr.clone();
    info!("Starting server on: {}", addr);
    let server = Server::new(addr, agent, args);
    server.run().await?;

    Ok(())
}
