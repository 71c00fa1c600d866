use crate::cache::{ self, CacheReclaimer };
use crate::cli::Args;
use crate::config::prompt::{ self, PromptConfig };
use crate::conversation::{
    without_document_context,
    ConversationLog,
    DOCUMENT_CONTEXT_MARKER,
};
use crate::conversation::prompt::{ assemble_prompt, determine_max_tokens, validate_input };
use crate::conversation::repair::{ repair, RepairPolicy };
use crate::document::{ self, store::DocumentStore };
use crate::error::{ ChatError, DocumentError, MediaError };
use crate::llm::{ non_empty, parse_llm_type, LlmConfig };
use crate::llm::chat::{ ChatClient, CompletionRequest, new_client as new_chat_client };
use crate::llm::speech::{ new_transcriber, Transcriber, TranscriptionConfig };
use crate::llm::vision::{ new_captioner, CaptionConfig, Captioner };
use crate::media::{ self, audio::transcribe_upload, image::caption_image, MediaKind, MediaMemory, Upload };
use crate::models::api::{ ChatResponse, DocumentPage };
use crate::models::chat::Turn;
use crate::postprocess::{ clean_generated_text, clean_response_text, postprocess_reply };
use crate::search::{ new_search, search_or_empty, WebSearch };

use log::{ info, warn, error };
use once_cell::sync::OnceCell;
use std::error::Error;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{ Mutex, RwLock };
use uuid::Uuid;

const TRUNCATION_MARKER: &str = "...[truncated]";

/// How a request's inputs become a user turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestrationMode {
    /// Every provided input contributes a labeled section to one turn.
    Combined,
    /// Only the highest-priority input is used: video, audio, image, text.
    Exclusive,
}

impl fmt::Display for OrchestrationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrchestrationMode::Combined => write!(f, "combined"),
            OrchestrationMode::Exclusive => write!(f, "exclusive"),
        }
    }
}

impl FromStr for OrchestrationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "combined" => Ok(OrchestrationMode::Combined),
            "exclusive" => Ok(OrchestrationMode::Exclusive),
            _ => Err(format!("Invalid orchestration mode: '{}'", s)),
        }
    }
}

/// Post-processing applied to the generated text before it is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStyle {
    Markdown,
    /// Light spacing cleanup for sentence-by-sentence delivery.
    Plain,
}

/// The decoded inputs of one chat request.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub text: Option<String>,
    pub audio: Option<Upload>,
    pub video: Option<Upload>,
    pub image: Option<Upload>,
    pub google_search: bool,
    pub document_interaction: bool,
    pub document_context: String,
}

impl ChatRequest {
    fn text(&self) -> Option<&str> {
        self.text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub repair_policy: RepairPolicy,
    pub orchestration: OrchestrationMode,
    pub page_chunk_size: usize,
    pub max_input_length: usize,
    pub max_document_context: usize,
    pub search_results: usize,
    pub temperature: f32,
    pub temp_dir: PathBuf,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            repair_policy: RepairPolicy::InsertPlaceholder,
            orchestration: OrchestrationMode::Combined,
            page_chunk_size: 1000,
            max_input_length: 1000,
            max_document_context: 20000,
            search_results: 5,
            temperature: 0.3,
            temp_dir: PathBuf::from("temp"),
        }
    }
}

impl AgentSettings {
    pub fn from_args(args: &Args) -> Result<Self, Box<dyn Error + Send + Sync>> {
        if args.page_chunk_size == 0 {
            return Err("page_chunk_size must be greater than zero".into());
        }
        Ok(Self {
            repair_policy: RepairPolicy::from_str(&args.repair_policy)?,
            orchestration: OrchestrationMode::from_str(&args.orchestration)?,
            page_chunk_size: args.page_chunk_size,
            max_input_length: args.max_input_length,
            max_document_context: args.max_document_context,
            search_results: args.search_results,
            temperature: args.chat_temperature,
            temp_dir: PathBuf::from(&args.temp_dir),
        })
    }
}

/// Inference and utility backends, each built once on first use (or all at
/// start-up with eager init).
pub struct Collaborators {
    args: Option<Args>,
    chat: OnceCell<Arc<dyn ChatClient>>,
    captioner: OnceCell<Arc<dyn Captioner>>,
    transcriber: OnceCell<Arc<dyn Transcriber>>,
    search: OnceCell<Arc<dyn WebSearch>>,
    reclaimer: Arc<dyn CacheReclaimer>,
}

impl Collaborators {
    pub fn from_args(args: &Args) -> Self {
        Self {
            args: Some(args.clone()),
            chat: OnceCell::new(),
            captioner: OnceCell::new(),
            transcriber: OnceCell::new(),
            search: OnceCell::new(),
            reclaimer: cache::init(args),
        }
    }

    /// Pre-built backends; nothing is constructed lazily.
    pub fn with_clients(
        chat: Arc<dyn ChatClient>,
        captioner: Arc<dyn Captioner>,
        transcriber: Arc<dyn Transcriber>,
        search: Arc<dyn WebSearch>,
        reclaimer: Arc<dyn CacheReclaimer>
    ) -> Self {
        Self {
            args: None,
            chat: OnceCell::with_value(chat),
            captioner: OnceCell::with_value(captioner),
            transcriber: OnceCell::with_value(transcriber),
            search: OnceCell::with_value(search),
            reclaimer,
        }
    }

    fn args(&self) -> Result<&Args, Box<dyn Error + Send + Sync>> {
        self.args.as_ref().ok_or_else(|| "collaborator has no configuration".into())
    }

    fn initialize_chat_client(args: &Args) -> Result<Arc<dyn ChatClient>, Box<dyn Error + Send + Sync>> {
        let chat_config = LlmConfig {
            llm_type: parse_llm_type(&args.chat_llm_type)?,
            base_url: args.chat_base_url.clone(),
            api_key: non_empty(&args.chat_api_key),
            completion_model: args.chat_model.clone(),
            temperature: args.chat_temperature,
        };
        let chat_client = new_chat_client(&chat_config)?;
        info!(
            "Chat client configured: Type={}, Model={}, BaseURL={:?}",
            args.chat_llm_type,
            chat_client.get_model(),
            chat_client.get_base_url().as_deref().unwrap_or("adapter default")
        );
        Ok(chat_client)
    }

    fn initialize_captioner(args: &Args) -> Result<Arc<dyn Captioner>, Box<dyn Error + Send + Sync>> {
        let caption_config = CaptionConfig::from_args(args)?;
        let captioner = new_captioner(&caption_config)?;
        info!(
            "Captioner configured: Backend={}, Model={}",
            caption_config.backend,
            captioner.get_model()
        );
        Ok(captioner)
    }

    fn initialize_transcriber(args: &Args) -> Result<Arc<dyn Transcriber>, Box<dyn Error + Send + Sync>> {
        let transcription_config = TranscriptionConfig::from_args(args);
        let transcriber = new_transcriber(&transcription_config)?;
        info!(
            "Transcriber configured: BaseURL={}, Model={}",
            transcription_config.base_url,
            transcriber.get_model()
        );
        Ok(transcriber)
    }

    pub fn chat(&self) -> Result<Arc<dyn ChatClient>, ChatError> {
        self.chat
            .get_or_try_init(|| Self::initialize_chat_client(self.args()?))
            .cloned()
            .map_err(|e| ChatError::Collaborator(format!("chat model: {}", e)))
    }

    pub fn captioner(&self) -> Result<Arc<dyn Captioner>, ChatError> {
        self.captioner
            .get_or_try_init(|| Self::initialize_captioner(self.args()?))
            .cloned()
            .map_err(|e| ChatError::Collaborator(format!("captioning model: {}", e)))
    }

    pub fn transcriber(&self) -> Result<Arc<dyn Transcriber>, ChatError> {
        self.transcriber
            .get_or_try_init(|| Self::initialize_transcriber(self.args()?))
            .cloned()
            .map_err(|e| ChatError::Collaborator(format!("speech model: {}", e)))
    }

    pub fn search(&self) -> Result<Arc<dyn WebSearch>, ChatError> {
        self.search
            .get_or_try_init(|| new_search(self.args()?))
            .cloned()
            .map_err(|e| ChatError::Collaborator(format!("web search: {}", e)))
    }

    pub fn reclaimer(&self) -> &dyn CacheReclaimer {
        self.reclaimer.as_ref()
    }

    /// Builds every collaborator now instead of on first use.
    pub fn init_all(&self) -> Result<(), ChatError> {
        self.chat()?;
        self.captioner()?;
        self.transcriber()?;
        self.search()?;
        info!("All collaborators initialized.");
        Ok(())
    }
}

/// Request orchestrator owning the shared conversation and document.
///
/// The conversation lock is held for the whole
/// normalize, append, repair, generate and commit sequence, so at most one
/// mutation sequence is in flight. The document lock is only taken for short
/// reads and swaps, never across a collaborator call.
pub struct ChatAgent {
    collaborators: Collaborators,
    prompts: Arc<PromptConfig>,
    settings: AgentSettings,
    conversation: Mutex<ConversationLog>,
    documents: RwLock<DocumentStore>,
    media_memory: Mutex<MediaMemory>,
}

impl ChatAgent {
    pub async fn new(args: Args) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let prompt_config = prompt::load_prompts(&args)?;
        let settings = AgentSettings::from_args(&args)?;
        let collaborators = Collaborators::from_args(&args);
        if args.eager_init {
            info!("Eager init enabled. Loading collaborators...");
            collaborators.init_all()?;
        }
        Ok(Self::with_parts(collaborators, prompt_config, settings))
    }

    pub fn with_parts(
        collaborators: Collaborators,
        prompts: Arc<PromptConfig>,
        settings: AgentSettings
    ) -> Self {
        let conversation = ConversationLog::new(prompts.system_prompt.clone());
        Self {
            collaborators,
            prompts,
            settings,
            conversation: Mutex::new(conversation),
            documents: RwLock::new(DocumentStore::new()),
            media_memory: Mutex::new(MediaMemory::default()),
        }
    }

    /// Runs one chat request end to end and returns the stored reply.
    pub async fn handle(
        &self,
        request: ChatRequest,
        style: ReplyStyle
    ) -> Result<ChatResponse, ChatError> {
        let request_id = Uuid::new_v4();
        info!(
            "Chat request {}: text={} audio={} video={} image={} search={} document={} mode={}",
            request_id,
            request.text().is_some(),
            request.audio.is_some(),
            request.video.is_some(),
            request.image.is_some(),
            request.google_search,
            request.document_interaction,
            self.settings.orchestration
        );

        let mut conversation = self.conversation.lock().await;

        let (composite, search_results) = match self.settings.orchestration {
            OrchestrationMode::Combined => self.compose_combined(&request).await?,
            OrchestrationMode::Exclusive => (self.compose_exclusive(&request).await?, Vec::new()),
        };

        conversation.append(Turn::user(composite.clone()));
        conversation.open_placeholder();

        let mut snapshot = conversation.snapshot();
        if !request.document_interaction {
            snapshot = without_document_context(&snapshot);
        }
        let repaired = repair(&snapshot, self.settings.repair_policy, &self.prompts.continue_prompt);
        let completion = CompletionRequest {
            prompt: assemble_prompt(&repaired, self.prompts.template),
            max_tokens: determine_max_tokens(&composite),
            temperature: self.settings.temperature,
        };

        let chat_client = self.collaborators.chat()?;
        let start = Instant::now();
        let raw = chat_client.complete(&completion).await.map_err(|e| {
            error!("Error generating response for {}: {}", request_id, e);
            ChatError::Generation(e)
        })?;
        info!(
            "Response for {} generated in {:.2}s (max_tokens={})",
            request_id,
            start.elapsed().as_secs_f32(),
            completion.max_tokens
        );

        let reply = match style {
            ReplyStyle::Markdown => postprocess_reply(&raw.response),
            ReplyStyle::Plain => clean_generated_text(&clean_response_text(&raw.response)),
        };
        if reply.is_empty() {
            return Err(ChatError::Generation("model returned an empty reply".into()));
        }
        conversation.commit_reply(reply.clone());
        drop(conversation);

        self.collaborators.reclaimer().reclaim().await;
        Ok(ChatResponse { response: reply, search_results })
    }

    /// All inputs merged into one labeled composite turn.
    async fn compose_combined(
        &self,
        request: &ChatRequest
    ) -> Result<(String, Vec<String>), ChatError> {
        let text = request.text();
        if let Some(text) = text {
            validate_input(text, self.settings.max_input_length)?;
        }

        let mut composite = String::new();
        if let Some(audio) = &request.audio {
            let result = self.transcribe(MediaKind::Audio, audio).await?;
            composite.push_str(&narrate(MediaKind::Audio, result));
        }
        if let Some(video) = &request.video {
            let result = self.transcribe(MediaKind::Video, video).await?;
            composite.push_str(&narrate(MediaKind::Video, result));
        }
        if let Some(image) = &request.image {
            let result = self.caption(image).await?;
            composite.push_str(&narrate(MediaKind::Image, result));
        }

        if !composite.is_empty() {
            composite.push_str("\n\n");
        }
        if let Some(text) = text {
            composite.push_str(&format!("User question: {}\n", text));
        }

        if request.document_interaction {
            let context = self.document_context(&request.document_context).await;
            if !context.is_empty() {
                composite.push_str(
                    &format!(
                        "\n{}\n{}\nAnswer based on the document when relevant.",
                        DOCUMENT_CONTEXT_MARKER,
                        context
                    )
                );
            }
        }

        let mut search_results = Vec::new();
        if request.google_search {
            if let Some(text) = text {
                let engine = self.collaborators.search()?;
                search_results = search_or_empty(engine.as_ref(), text, self.settings.search_results).await;
                composite.push_str("\n[Internet Search Results]:\n");
                composite.push_str(&search_results.join("\n"));
            }
        }

        if composite.trim().is_empty() {
            return Err(ChatError::InvalidInput("Invalid input: No content provided".to_string()));
        }
        Ok((composite, search_results))
    }

    /// Highest-priority input only; text is answered with remembered media
    /// as context.
    async fn compose_exclusive(&self, request: &ChatRequest) -> Result<String, ChatError> {
        if let Some(video) = &request.video {
            return match self.transcribe(MediaKind::Video, video).await? {
                Ok(transcript) => {
                    let composite = format!("Video transcription:\n\"{}\"", transcript);
                    self.media_memory.lock().await.remember(MediaKind::Video, transcript);
                    Ok(composite)
                }
                Err(e) => Ok(narrate_failure(MediaKind::Video, &e)),
            };
        }
        if let Some(audio) = &request.audio {
            return match self.transcribe(MediaKind::Audio, audio).await? {
                Ok(transcript) => {
                    self.media_memory.lock().await.remember(MediaKind::Audio, transcript.clone());
                    Ok(transcript)
                }
                Err(e) => Ok(narrate_failure(MediaKind::Audio, &e)),
            };
        }
        if let Some(image) = &request.image {
            return match self.caption(image).await? {
                Ok(caption) => {
                    let composite = format!("Image description: {}", caption);
                    self.media_memory.lock().await.remember(MediaKind::Image, caption);
                    Ok(composite)
                }
                Err(e) => Ok(narrate_failure(MediaKind::Image, &e)),
            };
        }

        let text = request.text.as_deref().unwrap_or("");
        validate_input(text, self.settings.max_input_length)?;
        let context = self.media_memory.lock().await.context();
        Ok(format!("{}\n\n[User]: {}", context, text.trim()))
    }

    /// Outer error: the backend could not be built. Inner error: the media
    /// itself failed and is narrated into the turn.
    async fn transcribe(
        &self,
        kind: MediaKind,
        upload: &Upload
    ) -> Result<Result<String, MediaError>, ChatError> {
        let transcriber = self.collaborators.transcriber()?;
        Ok(
            transcribe_upload(
                transcriber.as_ref(),
                self.collaborators.reclaimer(),
                &self.settings.temp_dir,
                kind,
                upload
            ).await
        )
    }

    async fn caption(&self, upload: &Upload) -> Result<Result<String, MediaError>, ChatError> {
        let captioner = self.collaborators.captioner()?;
        Ok(
            caption_image(
                captioner.as_ref(),
                self.collaborators.reclaimer(),
                upload.bytes.clone()
            ).await
        )
    }

    /// The explicit context field, else the loaded document's text, capped
    /// at the configured length.
    async fn document_context(&self, explicit: &str) -> String {
        let explicit = explicit.trim();
        let context = if explicit.is_empty() {
            self.documents.read().await.full_text()
        } else {
            explicit.to_string()
        };
        truncate_chars(context, self.settings.max_document_context)
    }

    pub async fn clear_conversation(&self) -> &'static str {
        self.conversation.lock().await.reset();
        self.collaborators.reclaimer().reclaim().await;
        info!("Conversation reset.");
        "Conversation and cache cleared successfully."
    }

    pub fn clear_text(&self) -> &'static str {
        "Text input cleared."
    }

    /// Sweeps leftover audio and video files. Live uploads belong to the
    /// request holding the conversation lock, so the sweep waits for it.
    pub async fn clear_audio_video(&self) -> &'static str {
        let in_flight = self.conversation.lock().await;
        let removed = media::sweep_temp_files(
            &self.settings.temp_dir,
            &[MediaKind::Audio, MediaKind::Video]
        );
        drop(in_flight);
        if removed > 0 {
            info!("Removed {} audio/video temp file(s).", removed);
            self.collaborators.reclaimer().reclaim().await;
        }
        "Audio/Video cleared."
    }

    pub async fn clear_image(&self) -> &'static str {
        let in_flight = self.conversation.lock().await;
        let removed = media::sweep_temp_files(&self.settings.temp_dir, &[MediaKind::Image]);
        drop(in_flight);
        if removed > 0 {
            info!("Removed {} image temp file(s).", removed);
            self.collaborators.reclaimer().reclaim().await;
        }
        "Image cleared."
    }

    pub async fn clear_media(&self) -> &'static str {
        self.media_memory.lock().await.clear();
        "Previous media cleared. You can upload new files now."
    }

    /// Drops the document, its file, and every turn that carried it.
    pub async fn clear_document(&self) -> &'static str {
        let mut store = self.documents.write().await;
        let filename = store.filename().to_string();
        let backing_file = store.clear();
        drop(store);
        if let Some(path) = backing_file {
            document::remove_backing_file(&path);
        }
        let purged = self.conversation
            .lock().await
            .purge(|turn| turn.content.contains(DOCUMENT_CONTEXT_MARKER) || turn.is_placeholder());
        info!("Document '{}' and its context cleared ({} turn(s) purged).", filename, purged);
        "Document cleared successfully."
    }

    /// Saves, extracts and pages an upload; returns its first page. The store
    /// is left untouched on failure.
    pub async fn upload_document(&self, upload: Option<Upload>) -> Result<DocumentPage, ChatError> {
        let upload = upload.ok_or(DocumentError::NoFile)?;
        if upload.file_name.trim().is_empty() {
            return Err(DocumentError::NoFilename.into());
        }

        let temp_dir = self.settings.temp_dir.clone();
        let ingested = tokio::task
            ::spawn_blocking(move || document::ingest(&temp_dir, &upload)).await
            .map_err(|e| ChatError::Internal(format!("document task failed: {}", e)))??;

        let mut store = self.documents.write().await;
        let previous = store.load(
            ingested.filename.clone(),
            ingested.path,
            &ingested.text,
            self.settings.page_chunk_size
        );
        let first_page = store.page(1)?;
        drop(store);

        if let Some(path) = previous {
            document::remove_backing_file(&path);
        }
        info!(
            "Document {} loaded: {} page(s).",
            ingested.filename,
            first_page.total_pages
        );
        Ok(first_page)
    }

    pub async fn document_page(&self, page: usize) -> Result<DocumentPage, ChatError> {
        Ok(self.documents.read().await.page(page)?)
    }

    pub async fn conversation_snapshot(&self) -> Vec<Turn> {
        self.conversation.lock().await.snapshot()
    }
}

fn narrate(kind: MediaKind, result: Result<String, MediaError>) -> String {
    match result {
        Ok(text) => format!("\n[{}]: {}", kind.label(), text),
        Err(e) => format!("\n{}", narrate_failure(kind, &e)),
    }
}

fn narrate_failure(kind: MediaKind, err: &MediaError) -> String {
    warn!("{:?} processing failed: {}", kind, err);
    format!("[{} Failed]: {}", kind.label(), err)
}

fn truncate_chars(text: String, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}{}", &text[..cut], TRUNCATION_MARKER),
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::NoopReclaimer;
    use crate::llm::chat::CompletionResponse;
    use crate::models::chat::Role;
    use async_trait::async_trait;
    use std::error::Error as StdError;
    use std::path::Path;
    use std::sync::atomic::{ AtomicUsize, Ordering };
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Answers from a script and records every prompt it was given.
    struct ScriptedChat {
        replies: StdMutex<Vec<Result<String, String>>>,
        prompts: StdMutex<Vec<CompletionRequest>>,
    }

    impl ScriptedChat {
        fn new(replies: Vec<Result<&str, &str>>) -> Arc<Self> {
            Arc::new(Self {
                replies: StdMutex::new(
                    replies
                        .into_iter()
                        .rev()
                        .map(|r| r.map(str::to_string).map_err(str::to_string))
                        .collect()
                ),
                prompts: StdMutex::new(Vec::new()),
            })
        }

        fn last_request(&self) -> CompletionRequest {
            self.prompts.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl ChatClient for ScriptedChat {
        async fn complete(
            &self,
            request: &CompletionRequest
        ) -> Result<CompletionResponse, Box<dyn StdError + Send + Sync>> {
            self.prompts.lock().unwrap().push(request.clone());
            match self.replies.lock().unwrap().pop() {
                Some(Ok(text)) => Ok(CompletionResponse { response: text }),
                Some(Err(e)) => Err(e.into()),
                None => Ok(CompletionResponse { response: "default reply".into() }),
            }
        }

        fn get_model(&self) -> String {
            "scripted".into()
        }

        fn get_base_url(&self) -> Option<String> {
            None
        }
    }

    struct FixedCaption;

    #[async_trait]
    impl Captioner for FixedCaption {
        async fn caption(&self, _png: &[u8]) -> Result<String, Box<dyn StdError + Send + Sync>> {
            Ok("a cat on a laptop".into())
        }

        fn get_model(&self) -> String {
            "fixed".into()
        }
    }

    struct FixedTranscript;

    #[async_trait]
    impl Transcriber for FixedTranscript {
        async fn transcribe(&self, _path: &Path) -> Result<String, Box<dyn StdError + Send + Sync>> {
            Ok("turn on the lights".into())
        }

        fn get_model(&self) -> String {
            "fixed".into()
        }
    }

    struct FixedSearch;

    #[async_trait]
    impl WebSearch for FixedSearch {
        async fn search(
            &self,
            _query: &str,
            _num_results: usize
        ) -> Result<Vec<String>, Box<dyn StdError + Send + Sync>> {
            Ok(vec!["https://a.example".into(), "https://b.example".into()])
        }
    }

    fn png_bytes() -> Vec<u8> {
        let img = ::image::RgbImage::from_pixel(1, 1, ::image::Rgb([0, 0, 0]));
        let mut buffer = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut buffer), ::image::ImageFormat::Png).unwrap();
        buffer
    }

    /// Signals when a call starts, then waits to be released.
    #[derive(Default)]
    struct Gate {
        entered: Notify,
        release: Notify,
    }

    impl Gate {
        async fn pass(&self) {
            self.entered.notify_one();
            self.release.notified().await;
        }
    }

    /// Reads the temp file only after the gate opens.
    struct GatedTranscript(Arc<Gate>);

    #[async_trait]
    impl Transcriber for GatedTranscript {
        async fn transcribe(&self, path: &Path) -> Result<String, Box<dyn StdError + Send + Sync>> {
            self.0.pass().await;
            let bytes = std::fs::read(path)?;
            Ok(format!("heard {} bytes", bytes.len()))
        }

        fn get_model(&self) -> String {
            "gated".into()
        }
    }

    /// Blocks every completion on the gate.
    struct GatedChat(Arc<Gate>);

    #[async_trait]
    impl ChatClient for GatedChat {
        async fn complete(
            &self,
            _request: &CompletionRequest
        ) -> Result<CompletionResponse, Box<dyn StdError + Send + Sync>> {
            self.0.pass().await;
            Ok(CompletionResponse { response: "released".into() })
        }

        fn get_model(&self) -> String {
            "gated".into()
        }

        fn get_base_url(&self) -> Option<String> {
            None
        }
    }

    /// Yields to the scheduler mid-generation so concurrent requests interleave
    /// if nothing serializes them.
    struct SlowChat {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChatClient for SlowChat {
        async fn complete(
            &self,
            _request: &CompletionRequest
        ) -> Result<CompletionResponse, Box<dyn StdError + Send + Sync>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(CompletionResponse { response: format!("answer {}", call) })
        }

        fn get_model(&self) -> String {
            "slow".into()
        }

        fn get_base_url(&self) -> Option<String> {
            None
        }
    }

    fn agent_with(chat: Arc<ScriptedChat>, settings: AgentSettings) -> ChatAgent {
        agent_with_clients(chat, Arc::new(FixedTranscript), settings)
    }

    fn agent_with_clients(
        chat: Arc<dyn ChatClient>,
        transcriber: Arc<dyn Transcriber>,
        settings: AgentSettings
    ) -> ChatAgent {
        let collaborators = Collaborators::with_clients(
            chat,
            Arc::new(FixedCaption),
            transcriber,
            Arc::new(FixedSearch),
            Arc::new(NoopReclaimer)
        );
        let prompts = Arc::new(PromptConfig { system_prompt: "sys".into(), ..PromptConfig::default() });
        ChatAgent::with_parts(collaborators, prompts, settings)
    }

    fn settings(temp_dir: &Path, orchestration: OrchestrationMode) -> AgentSettings {
        AgentSettings {
            orchestration,
            temp_dir: temp_dir.to_path_buf(),
            ..AgentSettings::default()
        }
    }

    fn text_request(text: &str) -> ChatRequest {
        ChatRequest { text: Some(text.into()), ..ChatRequest::default() }
    }

    #[tokio::test]
    async fn text_turn_is_answered_and_committed() {
        let dir = tempfile::tempdir().unwrap();
        let chat = ScriptedChat::new(vec![Ok("[Assistant]: Hello there")]);
        let agent = agent_with(chat.clone(), settings(dir.path(), OrchestrationMode::Combined));

        let reply = agent.handle(text_request("hi"), ReplyStyle::Markdown).await.unwrap();
        assert_eq!(reply.response, "Hello there");
        assert!(reply.search_results.is_empty());

        let turns = agent.conversation_snapshot().await;
        let roles: Vec<Role> = turns.iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
        assert_eq!(turns[1].content, "User question: hi\n");
        assert_eq!(turns[2].content, "Hello there");

        let request = chat.last_request();
        assert_eq!(request.max_tokens, 512);
        assert!(request.prompt.ends_with("User question: hi [/INST]"));
    }

    #[tokio::test]
    async fn combined_mode_labels_every_section() {
        let dir = tempfile::tempdir().unwrap();
        let chat = ScriptedChat::new(vec![Ok("ok")]);
        let agent = agent_with(chat, settings(dir.path(), OrchestrationMode::Combined));
        let request = ChatRequest {
            text: Some("what is this?".into()),
            audio: Some(Upload::new("a.wav", b"RIFF".to_vec())),
            image: Some(Upload::new("cat.png", png_bytes())),
            google_search: true,
            document_interaction: true,
            document_context: "Cats like warm keyboards.".into(),
            ..ChatRequest::default()
        };

        let reply = agent.handle(request, ReplyStyle::Markdown).await.unwrap();
        assert_eq!(reply.search_results, vec!["https://a.example", "https://b.example"]);

        let turns = agent.conversation_snapshot().await;
        assert_eq!(
            turns[1].content,
            concat!(
                "\n[Audio Transcription]: turn on the lights",
                "\n[Image Description]: a cat on a laptop",
                "\n\nUser question: what is this?\n",
                "\n[Document Context]\nCats like warm keyboards.\nAnswer based on the document when relevant.",
                "\n[Internet Search Results]:\nhttps://a.example\nhttps://b.example"
            )
        );
        // Temp uploads never outlive the request.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn exclusive_mode_prefers_media_over_text() {
        let dir = tempfile::tempdir().unwrap();
        let chat = ScriptedChat::new(vec![Ok("nice cat"), Ok("it is a cat")]);
        let agent = agent_with(chat, settings(dir.path(), OrchestrationMode::Exclusive));

        let request = ChatRequest {
            text: Some("ignored question".into()),
            image: Some(Upload::new("cat.png", png_bytes())),
            ..ChatRequest::default()
        };
        agent.handle(request, ReplyStyle::Plain).await.unwrap();
        let turns = agent.conversation_snapshot().await;
        assert_eq!(turns[1].content, "Image description: a cat on a laptop");
        assert!(!turns[1].content.contains("ignored question"));

        agent.handle(text_request("what was it?"), ReplyStyle::Plain).await.unwrap();
        let turns = agent.conversation_snapshot().await;
        assert_eq!(turns[3].content, "\n[Image Description]: a cat on a laptop\n\n[User]: what was it?");

        agent.clear_media().await;
        agent.handle(text_request("and now?"), ReplyStyle::Plain).await.unwrap();
        let turns = agent.conversation_snapshot().await;
        assert_eq!(turns[5].content, "\n\n[User]: and now?");
    }

    #[tokio::test]
    async fn invalid_input_leaves_conversation_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let chat = ScriptedChat::new(vec![]);
        let agent = agent_with(chat, settings(dir.path(), OrchestrationMode::Combined));

        let err = agent.handle(ChatRequest::default(), ReplyStyle::Markdown).await.unwrap_err();
        assert!(matches!(err, ChatError::InvalidInput(_)));
        let err = agent.handle(text_request(&"x".repeat(1001)), ReplyStyle::Markdown).await.unwrap_err();
        assert!(matches!(err, ChatError::InvalidInput(_)));
        assert_eq!(agent.conversation_snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn failed_generation_leaves_placeholder_that_next_request_resolves() {
        let dir = tempfile::tempdir().unwrap();
        let chat = ScriptedChat::new(vec![Err("backend down"), Ok("second answer")]);
        let agent = agent_with(chat.clone(), settings(dir.path(), OrchestrationMode::Combined));

        let err = agent.handle(text_request("first"), ReplyStyle::Markdown).await.unwrap_err();
        assert!(matches!(err, ChatError::Generation(_)));
        let turns = agent.conversation_snapshot().await;
        assert_eq!(turns.len(), 3);
        assert!(turns[2].is_placeholder());

        let reply = agent.handle(text_request("second"), ReplyStyle::Markdown).await.unwrap();
        assert_eq!(reply.response, "second answer");
        let prompt = chat.last_request().prompt;
        assert_eq!(
            prompt,
            "<s>[INST] User question: first [/INST] </s>[INST] sys\n\nUser question: second [/INST]"
        );
        let turns = agent.conversation_snapshot().await;
        assert_eq!(turns.last().unwrap().content, "second answer");
    }

    #[tokio::test]
    async fn document_turns_are_hidden_when_interaction_is_off() {
        let dir = tempfile::tempdir().unwrap();
        let chat = ScriptedChat::new(vec![Ok("a1"), Ok("a2")]);
        let agent = agent_with(chat.clone(), settings(dir.path(), OrchestrationMode::Combined));

        let with_doc = ChatRequest {
            text: Some("summarize".into()),
            document_interaction: true,
            document_context: "SECRET PLAN".into(),
            ..ChatRequest::default()
        };
        agent.handle(with_doc, ReplyStyle::Markdown).await.unwrap();
        assert!(chat.last_request().prompt.contains("SECRET PLAN"));

        agent.handle(text_request("unrelated"), ReplyStyle::Markdown).await.unwrap();
        assert!(!chat.last_request().prompt.contains("SECRET PLAN"));
    }

    #[tokio::test]
    async fn document_upload_paging_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let chat = ScriptedChat::new(vec![Ok("noted")]);
        let agent = agent_with(chat.clone(), settings(dir.path(), OrchestrationMode::Combined));

        let err = agent.upload_document(None).await.unwrap_err();
        assert!(matches!(err, ChatError::Document(DocumentError::NoFile)));

        let text = "y".repeat(2100);
        let first = agent
            .upload_document(Some(Upload::new("long.txt", text.into_bytes()))).await
            .unwrap();
        assert_eq!(first.total_pages, 3);
        assert_eq!(first.current_page, 1);
        assert_eq!(agent.document_page(3).await.unwrap().page.len(), 100);
        assert!(matches!(
            agent.document_page(4).await,
            Err(ChatError::Document(DocumentError::InvalidPage))
        ));

        let request = ChatRequest {
            text: Some("what does it say?".into()),
            document_interaction: true,
            ..ChatRequest::default()
        };
        agent.handle(request, ReplyStyle::Markdown).await.unwrap();
        assert!(chat.last_request().prompt.contains(&"y".repeat(2100)));

        assert_eq!(agent.clear_document().await, "Document cleared successfully.");
        assert!(matches!(
            agent.document_page(1).await,
            Err(ChatError::Document(DocumentError::NoDocument))
        ));
        let turns = agent.conversation_snapshot().await;
        assert!(turns.iter().all(|t| !t.content.contains(DOCUMENT_CONTEXT_MARKER)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn clear_resets_to_system_turn() {
        let dir = tempfile::tempdir().unwrap();
        let chat = ScriptedChat::new(vec![Ok("a")]);
        let agent = agent_with(chat, settings(dir.path(), OrchestrationMode::Combined));
        agent.handle(text_request("hello"), ReplyStyle::Markdown).await.unwrap();
        agent.clear_conversation().await;
        let turns = agent.conversation_snapshot().await;
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].content, "sys");
    }

    #[tokio::test]
    async fn audio_clear_waits_for_in_flight_transcription() {
        let dir = tempfile::tempdir().unwrap();
        let gate = Arc::new(Gate::default());
        let agent = Arc::new(
            agent_with_clients(
                ScriptedChat::new(vec![Ok("lights on")]),
                Arc::new(GatedTranscript(gate.clone())),
                settings(dir.path(), OrchestrationMode::Combined)
            )
        );

        let request = ChatRequest {
            audio: Some(Upload::new("clip.wav", b"RIFF".to_vec())),
            ..ChatRequest::default()
        };
        let chat = tokio::spawn({
            let agent = agent.clone();
            async move { agent.handle(request, ReplyStyle::Markdown).await }
        });
        gate.entered.notified().await;

        let clear = tokio::spawn({
            let agent = agent.clone();
            async move { agent.clear_audio_video().await }
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!clear.is_finished());

        gate.release.notify_one();
        chat.await.unwrap().unwrap();
        assert_eq!(clear.await.unwrap(), "Audio/Video cleared.");

        let turns = agent.conversation_snapshot().await;
        assert_eq!(turns[1].content, "\n[Audio Transcription]: heard 4 bytes\n\n");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_requests_commit_strictly_alternating_turns() {
        let dir = tempfile::tempdir().unwrap();
        let agent = Arc::new(
            agent_with_clients(
                Arc::new(SlowChat { calls: AtomicUsize::new(0) }),
                Arc::new(FixedTranscript),
                settings(dir.path(), OrchestrationMode::Combined)
            )
        );

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let agent = agent.clone();
                tokio::spawn(async move {
                    agent.handle(text_request(&format!("question {}", i)), ReplyStyle::Markdown).await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let turns = agent.conversation_snapshot().await;
        assert_eq!(turns.len(), 1 + 2 * 8);
        assert_eq!(turns[0].role, Role::System);
        for pair in turns[1..].chunks(2) {
            assert_eq!(pair[0].role, Role::User);
            assert!(pair[0].content.starts_with("User question: question "));
            assert_eq!(pair[1].role, Role::Assistant);
            assert!(!pair[1].is_placeholder());
        }
    }

    #[tokio::test]
    async fn page_reads_are_served_while_generation_is_blocked() {
        let dir = tempfile::tempdir().unwrap();
        let gate = Arc::new(Gate::default());
        let agent = Arc::new(
            agent_with_clients(
                Arc::new(GatedChat(gate.clone())),
                Arc::new(FixedTranscript),
                settings(dir.path(), OrchestrationMode::Combined)
            )
        );
        agent.upload_document(Some(Upload::new("notes.txt", b"page one".to_vec()))).await.unwrap();

        let request = ChatRequest {
            text: Some("summarize".into()),
            document_interaction: true,
            ..ChatRequest::default()
        };
        let chat = tokio::spawn({
            let agent = agent.clone();
            async move { agent.handle(request, ReplyStyle::Markdown).await }
        });
        gate.entered.notified().await;

        let page = tokio::time
            ::timeout(Duration::from_secs(1), agent.document_page(1)).await
            .expect("page read blocked behind generation")
            .unwrap();
        assert_eq!(page.page, "page one");
        assert!(!chat.is_finished());

        gate.release.notify_one();
        assert_eq!(chat.await.unwrap().unwrap().response, "released");
    }

    #[test]
    fn document_context_is_truncated_by_characters() {
        assert_eq!(truncate_chars("abcdef".into(), 4), "abcd...[truncated]");
        assert_eq!(truncate_chars("abcd".into(), 4), "abcd");
    }

    #[test]
    fn modes_parse() {
        assert_eq!("Exclusive".parse::<OrchestrationMode>(), Ok(OrchestrationMode::Exclusive));
        assert!("both".parse::<OrchestrationMode>().is_err());
    }
}
