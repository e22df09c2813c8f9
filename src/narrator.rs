use crate::agent_log::{AgentKind, AgentLogger};
use crate::agent_loop::{EventStream, stream_agent};
use crate::agents::{NARRATOR_PREAMBLE, system_prompt};
use crate::decision::Twist;
use crate::events::ModelEvent;
use crate::images::ImageLibrary;
use crate::message::{ChatMessage, last_user_index};
use crate::provider::LanguageModel;
use crate::tools::{ToolBox, TwistOfFate};
use crate::world::WorldStore;
use async_stream::stream;
use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;

pub struct NarratorInput<'a> {
    pub game_system: &'a str,
    pub messages: &'a [ChatMessage],
    pub digest: &'a str,
    pub twists: &'a [Twist],
    pub conversation_id: Option<&'a str>,
    pub game_id: &'a str,
}

/// Backstage notes for this turn, or `None` when there is nothing to say.
pub fn context_message(digest: &str, twists: &[Twist]) -> Option<ChatMessage> {
    let digest = digest.trim();
    if digest.is_empty() && twists.is_empty() {
        return None;
    }
    let mut text = String::from("[Backstage notes for this turn. Do not quote them to the player.]\n");
    if !digest.is_empty() {
        text.push_str("\n## What happened off-screen\n");
        text.push_str(digest);
        text.push('\n');
    }
    if !twists.is_empty() {
        text.push_str("\n## Possible twists of fate\n");
        for twist in twists {
            text.push_str(&format!("- {} ({})\n", twist.situation, twist.reason));
        }
    }
    Some(ChatMessage::system(text))
}

/// Inserts `context` right before the last user message, or at the end when
/// there is none.
pub fn with_context(messages: &[ChatMessage], context: Option<ChatMessage>) -> Vec<ChatMessage> {
    let mut out = messages.to_vec();
    if let Some(context) = context {
        let at = last_user_index(&out).unwrap_or(out.len());
        out.insert(at, context);
    }
    out
}

pub struct Narrator {
    model: Arc<dyn LanguageModel>,
    world: Arc<dyn WorldStore>,
    images: Arc<dyn ImageLibrary>,
    logger: AgentLogger,
    max_steps: usize,
}

impl Narrator {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        world: Arc<dyn WorldStore>,
        images: Arc<dyn ImageLibrary>,
        logger: AgentLogger,
    ) -> Self {
        Self {
            model,
            world,
            images,
            logger,
            max_steps: 6,
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    /// Starts the narration. The `started` record is written before this
    /// returns; `completed` or `failed` is dispatched once the returned stream
    /// has been drained.
    pub async fn stream(&self, input: NarratorInput<'_>) -> EventStream {
        let messages = with_context(input.messages, context_message(input.digest, input.twists));
        let log_id = self
            .logger
            .start(
                input.conversation_id,
                AgentKind::Narrator,
                Some(json!({
                    "digest": input.digest,
                    "twists": input.twists,
                    "messages": messages.len(),
                })),
            )
            .await;

        let tools = ToolBox::new()
            .with(TwistOfFate)
            .with_world(&self.world, input.game_id)
            .with_images(&self.images, input.game_id);
        let mut inner = stream_agent(
            Arc::clone(&self.model),
            system_prompt(NARRATOR_PREAMBLE, input.game_system),
            messages,
            Arc::new(tools),
            self.max_steps,
        );

        let logger = self.logger.clone();
        Box::pin(stream! {
            let mut text = String::new();
            let mut failure = None;
            while let Some(event) = inner.next().await {
                match &event {
                    ModelEvent::TextDelta { delta, .. } => text.push_str(delta),
                    ModelEvent::Error { error } => failure = Some(error.clone()),
                    _ => {}
                }
                yield event;
            }
            match failure {
                Some(error) => logger.fail(log_id, error),
                None => logger.complete(log_id, Some(json!({ "text": text }))),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_log::{AgentLogStatus, MemoryLogStore};
    use crate::message::Role;
    use crate::test_support::{NoImages, Reply, ScriptedModel};
    use crate::world::FsWorldStore;

    #[test]
    fn context_goes_before_the_last_user_turn() {
        let history = vec![
            ChatMessage::user("look around"),
            ChatMessage::assistant("A quiet dock."),
            ChatMessage::user("I knock"),
        ];
        let twists = vec![Twist {
            situation: "the door opens".into(),
            reason: "the keeper is asleep".into(),
        }];
        let merged = with_context(&history, context_message("The tide rose.", &twists));

        assert_eq!(merged.len(), 4);
        assert_eq!(merged[2].role, Role::System);
        assert!(merged[2].text().contains("The tide rose."));
        assert!(merged[2].text().contains("- the door opens (the keeper is asleep)"));
        assert_eq!(merged[3].text(), "I knock");

        assert_eq!(with_context(&history, context_message("  ", &[])), history);
    }

    #[tokio::test]
    async fn completion_is_logged_after_drain() {
        let dir = tempfile::tempdir().unwrap();
        let logs = Arc::new(MemoryLogStore::new());
        let logger = AgentLogger::new(logs.clone());
        let model = Arc::new(ScriptedModel::new(
            "narrator",
            vec![Reply::streamed_text(&["The door ", "swings open."])],
        ));
        let narrator = Narrator::new(
            model.clone(),
            Arc::new(FsWorldStore::new(dir.path())),
            Arc::new(NoImages),
            logger.clone(),
        );

        let history = [ChatMessage::user("I knock")];
        let stream = narrator
            .stream(NarratorInput {
                game_system: "",
                messages: &history,
                digest: "The keeper fell asleep.",
                twists: &[],
                conversation_id: Some("c"),
                game_id: "g",
            })
            .await;

        logger.drain().await;
        assert_eq!(logs.entries().await[0].status, AgentLogStatus::Started);

        let events: Vec<_> = stream.collect().await;
        assert_eq!(events.last().map(ModelEvent::kind), Some("finish"));
        logger.drain().await;
        let entry = &logs.entries().await[0];
        assert_eq!(entry.status, AgentLogStatus::Completed);
        assert_eq!(entry.output, Some(json!({"text": "The door swings open."})));

        let request = &model.requests.lock().unwrap()[0];
        assert_eq!(request.messages.len(), 2);
        assert!(request.tools.iter().any(|t| t.name == "twist_of_fate"));
    }

    #[tokio::test]
    async fn stream_error_is_logged_as_failure() {
        let dir = tempfile::tempdir().unwrap();
        let logs = Arc::new(MemoryLogStore::new());
        let logger = AgentLogger::new(logs.clone());
        let narrator = Narrator::new(
            Arc::new(ScriptedModel::new("narrator", vec![Reply::Fail("quota")])),
            Arc::new(FsWorldStore::new(dir.path())),
            Arc::new(NoImages),
            logger.clone(),
        );
        let events: Vec<_> = narrator
            .stream(NarratorInput {
                game_system: "",
                messages: &[ChatMessage::user("hi")],
                digest: "",
                twists: &[],
                conversation_id: None,
                game_id: "g",
            })
            .await
            .collect()
            .await;
        assert_eq!(events.last().map(ModelEvent::kind), Some("error"));
        logger.drain().await;
        assert_eq!(logs.entries().await[0].status, AgentLogStatus::Failed);
    }
}
