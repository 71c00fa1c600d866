use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Chat LLM Provider Args ---
    /// Type of LLM provider for chat completion (ollama, openai, anthropic, gemini, deepseek, xai, groq)
    #[arg(long, env = "CHAT_LLM_TYPE", default_value = "ollama")]
    pub chat_llm_type: String,

    /// Base URL for the Chat LLM provider API (e.g., http://localhost:11434 for Ollama)
    #[arg(long, env = "CHAT_BASE_URL")] // No default, let adapters handle defaults if None
    pub chat_base_url: Option<String>,

    /// API Key for the Chat LLM provider (e.g., OpenAI, Anthropic)
    #[arg(long, env = "CHAT_API_KEY", default_value = "")]
    pub chat_api_key: String,

    /// Model name for chat completion (e.g., mistral-nemo, gpt-4o-mini)
    #[arg(long, env = "CHAT_MODEL")] // No default, rely on adapter defaults if None
    pub chat_model: Option<String>,

    /// Sampling temperature passed to the chat model.
    #[arg(long, env = "CHAT_TEMPERATURE", default_value = "0.3")]
    pub chat_temperature: f32,

    // --- Prompt Args ---
    /// Optional JSON file overriding system_prompt, continue_prompt and template.
    #[arg(long, env = "PROMPTS_PATH")]
    pub prompts_path: Option<String>,

    /// System prompt placed at the head of every conversation.
    #[arg(
        long,
        env = "SYSTEM_PROMPT",
        default_value = "You are a professional assistant, coding expert, and MLOps subject matter expert."
    )]
    pub system_prompt: String,

    /// Synthetic user turn used when a conversation would otherwise not end on a user turn.
    #[arg(long, env = "CONTINUE_PROMPT", default_value = "Please continue.")]
    pub continue_prompt: String,

    /// Prompt layout expected by the chat model (mistral, chatml, plain).
    #[arg(long, env = "CHAT_TEMPLATE", default_value = "mistral")]
    pub chat_template: String,

    // --- Captioning Args ---
    /// Image captioning backend (ollama, huggingface)
    #[arg(long, env = "CAPTION_BACKEND", default_value = "ollama")]
    pub caption_backend: String,

    /// Base URL of the captioning backend. For huggingface this is the full model endpoint.
    #[arg(long, env = "CAPTION_BASE_URL")]
    pub caption_base_url: Option<String>,

    /// Captioning model name (e.g., llava, Salesforce/blip-image-captioning-large)
    #[arg(long, env = "CAPTION_MODEL")]
    pub caption_model: Option<String>,

    /// Bearer token for the captioning backend.
    #[arg(long, env = "CAPTION_API_KEY", default_value = "")]
    pub caption_api_key: String,

    /// Instruction sent along with the image to prompt-driven captioners.
    #[arg(
        long,
        env = "CAPTION_PROMPT",
        default_value = "Describe this image in one detailed sentence."
    )]
    pub caption_prompt: String,

    // --- Transcription Args ---
    /// Base URL of an OpenAI-compatible transcription server (whisper.cpp, faster-whisper, OpenAI).
    #[arg(long, env = "TRANSCRIPTION_BASE_URL", default_value = "http://localhost:8000")]
    pub transcription_base_url: String,

    /// Transcription model name.
    #[arg(long, env = "TRANSCRIPTION_MODEL", default_value = "whisper-1")]
    pub transcription_model: String,

    /// Bearer token for the transcription server.
    #[arg(long, env = "TRANSCRIPTION_API_KEY", default_value = "")]
    pub transcription_api_key: String,

    // --- Web Search Args ---
    /// Google Custom Search API key. Search is disabled when empty.
    #[arg(long, env = "SEARCH_API_KEY", default_value = "")]
    pub search_api_key: String,

    /// Google Programmable Search Engine id (cx).
    #[arg(long, env = "SEARCH_ENGINE_ID", default_value = "")]
    pub search_engine_id: String,

    /// Custom Search endpoint.
    #[arg(
        long,
        env = "SEARCH_BASE_URL",
        default_value = "https://www.googleapis.com/customsearch/v1"
    )]
    pub search_base_url: String,

    /// Number of search results appended to a user turn.
    #[arg(long, env = "SEARCH_RESULTS", default_value = "5")]
    pub search_results: usize,

    // --- Orchestration Args ---
    /// How consecutive same-role turns are repaired (insert-placeholder, collapse)
    #[arg(long, env = "REPAIR_POLICY", default_value = "insert-placeholder")]
    pub repair_policy: String,

    /// Request orchestration (combined: all inputs merge into one turn; exclusive: video > audio > image > text)
    #[arg(long, env = "ORCHESTRATION", default_value = "combined")]
    pub orchestration: String,

    /// Characters per document page.
    #[arg(long, env = "PAGE_CHUNK_SIZE", default_value = "1000")]
    pub page_chunk_size: usize,

    /// Maximum accepted length of the text field, in characters.
    #[arg(long, env = "MAX_INPUT_LENGTH", default_value = "1000")]
    pub max_input_length: usize,

    /// Document context longer than this many characters is truncated.
    #[arg(long, env = "MAX_DOCUMENT_CONTEXT", default_value = "20000")]
    pub max_document_context: usize,

    /// Request body limit for uploads, in bytes.
    #[arg(long, env = "MAX_UPLOAD_BYTES", default_value = "52428800")]
    pub max_upload_bytes: usize,

    /// Directory for uploaded media and documents.
    #[arg(long, env = "TEMP_DIR", default_value = "temp")]
    pub temp_dir: String,

    /// Optional endpoint POSTed after heavy inference to release accelerator memory.
    #[arg(long, env = "RECLAIM_URL")]
    pub reclaim_url: Option<String>,

    /// Build every collaborator at start-up instead of on first use.
    #[arg(long, env = "EAGER_INIT", default_value = "false")]
    pub eager_init: bool,

    // --- General App Args ---
    /// Enable debug logging/output
    #[arg(long, env = "DEBUG", default_value = "false")]
    pub debug: bool,

    /// Host address and port for the server to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "0.0.0.0:5001")]
    pub server_addr: String,

    /// Optional API Key required for clients. If set, clients must send X-API-Key or a ts/sig pair.
    #[arg(long, env = "SERVER_API_KEY")]
    pub server_api_key: Option<String>,

    /// Requests accepted per second across all clients.
    #[arg(long, env = "RATE_LIMIT_PER_SECOND", default_value = "10")]
    pub rate_limit_per_second: u32,

    /// Optional path to the TLS certificate file (PEM format). Requires --tls-key-path.
    #[arg(long, env = "TLS_CERT_PATH")]
    pub tls_cert_path: Option<String>,

    /// Optional path to the TLS private key file (PEM format). Requires --tls-cert-path.
    #[arg(long, env = "TLS_KEY_PATH")]
    pub tls_key_path: Option<String>,

    #[arg(long, env = "ENABLE_TLS", default_value = "false")]
    pub enable_tls: bool,
}
