use std::env;

/// Application settings, loaded from environment variables.
///
/// Every component receives the parts it needs at construction; nothing in
/// the pipeline reads or mutates the process environment after startup.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Object store region
    pub aws_region: String,
    /// Bucket for input objects and result artifacts
    pub s3_bucket: String,
    /// Upload/confirmation queue URL
    pub queue_url: String,
    /// Dead-letter queue URL, if configured
    pub dlq_url: Option<String>,
    /// Job state table name
    pub jobs_table: String,
    /// Idempotency record table name
    pub idempotency_table: String,

    /// Language model identifier
    pub llm_model: String,
    /// API key for the language-model and embedding provider
    pub llm_api_key: Option<String>,
    /// Base URL of the OpenAI-compatible API
    pub llm_api_base: String,
    /// Maximum attempts for rate-limited model calls
    pub llm_max_retries: u32,
    /// Embedding model identifier
    pub embedding_model: String,
    pub embedding_batch_size: usize,
    pub embedding_max_retries: u32,
    /// Speech-recognition model identifier
    pub asr_model: String,

    /// Diarization inference endpoint
    pub diarizer_url: Option<String>,

    /// Vector store endpoint and collection
    pub qdrant_url: Option<String>,
    pub qdrant_api_key: Option<String>,
    pub qdrant_collection: String,

    /// Synchronization window size in seconds
    pub chunk_window_seconds: f64,
    /// Scene detection threshold in `[0, 1]`
    pub scene_detection_threshold: f64,
    /// Worker threads for the parallel branch phase
    pub parallel_max_workers: usize,
    /// Overlap download with audio extraction when enabled
    pub use_streaming_intake: bool,
    /// Hard wall-clock deadline for one executor task, seconds
    pub executor_timeout_seconds: u64,
    /// Remove the per-job temp directory on exit
    pub cleanup_temp_files: bool,
    /// Root for per-job temp directories
    pub work_dir: String,

    /// Command used to launch one executor task per job
    pub worker_command: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            aws_region: "us-east-1".to_string(),
            s3_bucket: String::new(),
            queue_url: String::new(),
            dlq_url: None,
            jobs_table: String::new(),
            idempotency_table: String::new(),
            llm_model: "gpt-4o".to_string(),
            llm_api_key: None,
            llm_api_base: "https://api.openai.com/v1".to_string(),
            llm_max_retries: 8,
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_batch_size: 64,
            embedding_max_retries: 3,
            asr_model: "whisper-1".to_string(),
            diarizer_url: None,
            qdrant_url: None,
            qdrant_api_key: None,
            qdrant_collection: "vidiary".to_string(),
            chunk_window_seconds: 300.0,
            scene_detection_threshold: 0.3,
            parallel_max_workers: 2,
            use_streaming_intake: true,
            executor_timeout_seconds: 900,
            cleanup_temp_files: true,
            work_dir: "/tmp".to_string(),
            worker_command: "vidiary-worker".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            aws_region: var_or("AWS_REGION", defaults.aws_region),
            s3_bucket: var_or("S3_BUCKET", defaults.s3_bucket),
            queue_url: var_or("SQS_QUEUE_URL", defaults.queue_url),
            dlq_url: var_opt("SQS_DLQ_URL"),
            jobs_table: var_or("JOBS_TABLE_NAME", defaults.jobs_table),
            idempotency_table: var_or("IDEMPOTENCY_TABLE_NAME", defaults.idempotency_table),
            llm_model: var_or("LLM_MODEL", defaults.llm_model),
            llm_api_key: var_opt("OPENAI_API_KEY"),
            llm_api_base: var_or("OPENAI_API_BASE", defaults.llm_api_base),
            llm_max_retries: var_parsed("LLM_MAX_RETRIES", defaults.llm_max_retries),
            embedding_model: var_or("EMBEDDING_MODEL", defaults.embedding_model),
            embedding_batch_size: var_parsed("EMBEDDING_BATCH_SIZE", defaults.embedding_batch_size),
            embedding_max_retries: var_parsed(
                "EMBEDDING_MAX_RETRIES",
                defaults.embedding_max_retries,
            ),
            asr_model: var_or("ASR_MODEL", defaults.asr_model),
            diarizer_url: var_opt("DIARIZER_URL"),
            qdrant_url: var_opt("QDRANT_URL"),
            qdrant_api_key: var_opt("QDRANT_API_KEY"),
            qdrant_collection: var_or("QDRANT_COLLECTION", defaults.qdrant_collection),
            chunk_window_seconds: var_parsed("CHUNK_WINDOW_SECONDS", defaults.chunk_window_seconds),
            scene_detection_threshold: var_parsed(
                "SCENE_DETECTION_THRESHOLD",
                defaults.scene_detection_threshold,
            ),
            parallel_max_workers: var_parsed("PARALLEL_MAX_WORKERS", defaults.parallel_max_workers),
            use_streaming_intake: var_bool("USE_STREAMING_INTAKE", defaults.use_streaming_intake),
            executor_timeout_seconds: var_parsed(
                "EXECUTOR_TIMEOUT_SECONDS",
                defaults.executor_timeout_seconds,
            ),
            cleanup_temp_files: var_bool("CLEANUP_TEMP_FILES", defaults.cleanup_temp_files),
            work_dir: var_or("WORK_DIR", defaults.work_dir),
            worker_command: var_or("WORKER_COMMAND", defaults.worker_command),
        }
    }
}

fn var_or(key: &str, default: String) -> String {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => v,
        _ => default,
    }
}

fn var_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn var_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn var_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => !matches!(v.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no"),
        Err(_) => default,
    }
}
