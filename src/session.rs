//! Turn journal written after narration by a small recorder agent.

use crate::agent_log::{AgentKind, AgentLogger};
use crate::agent_loop::run_agent;
use crate::agents::{SESSION_RECORDER_PREAMBLE, system_prompt};
use crate::error::{PersistenceError, SessionError};
use crate::message::ChatMessage;
use crate::provider::{LanguageModel, Usage};
use crate::tools::ToolBox;
use crate::world::safe_segment;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub game_id: String,
    pub conversation_id: Option<String>,
    pub recorded_at: DateTime<Utc>,
    pub player_message: String,
    pub notes: String,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn append(&self, record: SessionRecord) -> Result<(), PersistenceError>;
}

/// `<root>/<game_id>/session.jsonl`, one record per line.
#[derive(Debug, Clone)]
pub struct FsSessionStore {
    root: PathBuf,
}

impl FsSessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, game_id: &str) -> PathBuf {
        self.root.join(safe_segment(game_id)).join("session.jsonl")
    }

    pub async fn load(&self, game_id: &str) -> Result<Vec<SessionRecord>, PersistenceError> {
        let data = match tokio::fs::read_to_string(self.path_for(game_id)).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        data.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(PersistenceError::from))
            .collect()
    }
}

#[async_trait]
impl SessionStore for FsSessionStore {
    async fn append(&self, record: SessionRecord) -> Result<(), PersistenceError> {
        let path = self.path_for(&record.game_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

pub struct TurnTranscript<'a> {
    pub game_id: &'a str,
    pub conversation_id: Option<&'a str>,
    pub game_system: &'a str,
    pub player_message: &'a str,
    pub digest: &'a str,
    pub narration: &'a str,
}

pub struct SessionRecorder {
    model: Arc<dyn LanguageModel>,
    store: Arc<dyn SessionStore>,
    logger: AgentLogger,
}

impl SessionRecorder {
    pub fn new(model: Arc<dyn LanguageModel>, store: Arc<dyn SessionStore>, logger: AgentLogger) -> Self {
        Self {
            model,
            store,
            logger,
        }
    }

    pub async fn record(&self, turn: TurnTranscript<'_>) -> Result<Usage, SessionError> {
        let log_id = self
            .logger
            .start(turn.conversation_id, AgentKind::SessionRecorder, None)
            .await;
        match self.summarize_and_store(&turn).await {
            Ok((notes, usage)) => {
                self.logger.complete(log_id, Some(json!({ "notes": notes })));
                Ok(usage)
            }
            Err(e) => {
                self.logger.fail(log_id, e.to_string());
                Err(e)
            }
        }
    }

    async fn summarize_and_store(&self, turn: &TurnTranscript<'_>) -> Result<(String, Usage), SessionError> {
        let digest = if turn.digest.trim().is_empty() {
            "(nothing)"
        } else {
            turn.digest.trim()
        };
        let prompt = format!(
            "## Player\n{}\n\n## Off-screen\n{digest}\n\n## Narrator\n{}",
            turn.player_message.trim(),
            turn.narration.trim()
        );
        let run = run_agent(
            self.model.as_ref(),
            &system_prompt(SESSION_RECORDER_PREAMBLE, turn.game_system),
            vec![ChatMessage::user(prompt)],
            &ToolBox::new(),
            1,
        )
        .await?;

        let notes = run.text.trim().to_string();
        self.store
            .append(SessionRecord {
                game_id: turn.game_id.to_string(),
                conversation_id: turn.conversation_id.map(str::to_string),
                recorded_at: Utc::now(),
                player_message: turn.player_message.to_string(),
                notes: notes.clone(),
            })
            .await?;
        log::debug!("Session notes recorded for game {}", turn.game_id);
        Ok((notes, run.usage))
    }
}
