use crate::pipeline::TurnState;
use thiserror::Error;

pub type Result<T, E = AppError> = std::result::Result<T, E>;

// Top-level errors for the binary, settings and logging setup.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Turn failed: {0}")]
    Turn(#[from] TurnFailure),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("World state error: {0}")]
    World(#[from] WorldError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),

    #[error("Logger error: {0}")]
    Logger(String),

    #[error("No OpenAI API key configured")]
    MissingApiKey,

    #[error("Usage: {0}")]
    Usage(String),
}

// A stakes text that does not describe a complete 1..=100 table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StakesError {
    #[error("no ranges found, expected segments like \"1-50: outcome\"")]
    NoRanges,

    #[error("range {min}-{max} has min greater than max")]
    Inverted { min: u32, max: u32 },

    #[error("ranges must start at 1, first range starts at {0}")]
    MustStartAtOne(u32),

    #[error("ranges must end at 100, last range ends at {0}")]
    MustEndAtHundred(u32),

    #[error("gap between {prev_max} and {next_min}: rolls in between have no outcome")]
    Gap { prev_max: u32, next_min: u32 },

    #[error("ranges overlap: {next_min} is already covered by a range ending at {prev_max}")]
    Overlap { prev_max: u32, next_min: u32 },

    #[error("roll {0} is outside 1-100")]
    RollOutOfRange(u32),
}

// Failures of a single structured orchestrator call.
#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("provider call failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("decision failed schema validation: {0}")]
    Schema(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("OpenAI API error: {0}")]
    OpenAI(#[from] async_openai::error::OpenAIError),

    #[error("Provider returned no choices")]
    EmptyResponse,

    #[error("Provider refused the request: {0}")]
    Refused(String),

    #[error("Structured output was not valid JSON: {0}")]
    MalformedObject(String),

    #[error("Stream failed: {0}")]
    Stream(String),

    #[error("Provider error: {0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Log entry not found: {0}")]
    NotFound(String),

    #[error("Log entry {0} already reached a terminal status")]
    AlreadyTerminal(String),

    #[error("Persistence error: {0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum WorldError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("World file not found: {0}")]
    NotFound(String),

    #[error("Invalid world path: {0}")]
    InvalidPath(String),

    #[error("Text to replace was not found in {0}")]
    NoMatch(String),

    #[error("Text to replace occurs {count} times in {path}, it must be unique")]
    Ambiguous { path: String, count: usize },
}

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("OpenAI API error: {0}")]
    OpenAI(#[from] async_openai::error::OpenAIError),

    #[error("No image returned")]
    NoImage,

    #[error("Catalog error: {0}")]
    Catalog(#[from] PersistenceError),
}

// Errors a tool reports back to the model as a tool error.
#[derive(Debug, Error)]
pub enum ToolFailure {
    #[error("{0}")]
    World(#[from] WorldError),

    #[error("{0}")]
    Image(#[from] ImageError),

    #[error("tool task failed: {0}")]
    Join(String),
}

impl From<tokio::task::JoinError> for ToolFailure {
    fn from(err: tokio::task::JoinError) -> Self {
        ToolFailure::Join(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Client channel closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// Coordinator-level faults. Everything below this level is recovered locally.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Turn has no player message")]
    NoPlayerMessage,

    #[error("Client went away before narration: {0}")]
    Sink(#[from] SinkError),
}

/// A coordinator fault together with the stage the turn had reached.
#[derive(Debug, Error)]
#[error("{error} (stage: {state:?})")]
pub struct TurnFailure {
    pub state: TurnState,
    #[source]
    pub error: PipelineError,
}

// Session recording is best-effort; the coordinator logs this and moves on.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Recorder agent failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("Could not store session notes: {0}")]
    Persistence(#[from] PersistenceError),
}
