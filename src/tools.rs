//! Tools the agents can call, as rig `Tool`s, plus a name-indexed [`ToolBox`].

use crate::error::ToolFailure;
use crate::images::{ImageLibrary, ImageQuery, ImageRecord, ImageRequest};
use crate::provider::ToolSchema;
use crate::stakes::{TwistOutcome, twist_of_fate};
use crate::world::WorldStore;
use rig::{
    completion::ToolDefinition,
    tool::{Tool, ToolDyn},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;

// Fate

#[derive(Debug, Clone, Default)]
pub struct TwistOfFate;

#[derive(Debug, Deserialize)]
pub struct TwistOfFateArgs {
    pub stakes: String,
}

impl Tool for TwistOfFate {
    const NAME: &'static str = "twist_of_fate";

    type Error = ToolFailure;
    type Args = TwistOfFateArgs;
    type Output = TwistOutcome;

    async fn definition(&self, _prompt: String) -> ToolDefinition {
        ToolDefinition {
            name: Self::NAME.to_string(),
            description: "Resolve an uncertain moment. Commit to every possible outcome first as \
                          ranges covering 1-100, e.g. \"1-30: the rope snaps 31-100: it holds\". \
                          Returns the roll and the outcome that happened, or an error describing \
                          what is wrong with the ranges."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "stakes": {
                        "type": "string",
                        "description": "Contiguous, non-overlapping \"min-max: outcome\" segments from 1 to 100"
                    }
                },
                "required": ["stakes"]
            }),
        }
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        Ok(twist_of_fate(&args.stakes))
    }
}

// World state

#[derive(Clone)]
pub struct ReadWorldFile {
    pub world: Arc<dyn WorldStore>,
    pub game_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ReadWorldFileArgs {
    pub path: String,
}

impl Tool for ReadWorldFile {
    const NAME: &'static str = "read_world_file";

    type Error = ToolFailure;
    type Args = ReadWorldFileArgs;
    type Output = String;

    async fn definition(&self, _prompt: String) -> ToolDefinition {
        ToolDefinition {
            name: Self::NAME.to_string(),
            description: "Read one world-state file of the current game.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Relative path, e.g. factions/guild.md" }
                },
                "required": ["path"]
            }),
        }
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        Ok(self.world.read_file(&self.game_id, &args.path)?)
    }
}

#[derive(Clone)]
pub struct WriteWorldFile {
    pub world: Arc<dyn WorldStore>,
    pub game_id: String,
}

#[derive(Debug, Deserialize)]
pub struct WriteWorldFileArgs {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct WrittenFile {
    pub path: String,
    pub bytes: usize,
}

impl Tool for WriteWorldFile {
    const NAME: &'static str = "write_world_file";

    type Error = ToolFailure;
    type Args = WriteWorldFileArgs;
    type Output = WrittenFile;

    async fn definition(&self, _prompt: String) -> ToolDefinition {
        ToolDefinition {
            name: Self::NAME.to_string(),
            description: "Create or overwrite a world-state file with the full new content."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Relative path of the file" },
                    "content": { "type": "string", "description": "Complete file content" }
                },
                "required": ["path", "content"]
            }),
        }
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        self.world
            .write_file(&self.game_id, &args.path, &args.content)?;
        Ok(WrittenFile {
            bytes: args.content.len(),
            path: args.path,
        })
    }
}

#[derive(Clone)]
pub struct EditWorldFile {
    pub world: Arc<dyn WorldStore>,
    pub game_id: String,
}

#[derive(Debug, Deserialize)]
pub struct EditWorldFileArgs {
    pub path: String,
    pub old_text: String,
    pub new_text: String,
}

impl Tool for EditWorldFile {
    const NAME: &'static str = "edit_world_file";

    type Error = ToolFailure;
    type Args = EditWorldFileArgs;
    type Output = Value;

    async fn definition(&self, _prompt: String) -> ToolDefinition {
        ToolDefinition {
            name: Self::NAME.to_string(),
            description: "Replace an exact passage in a world-state file. old_text must occur \
                          exactly once; include surrounding words to make it unique."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string" },
                    "old_text": { "type": "string" },
                    "new_text": { "type": "string" }
                },
                "required": ["path", "old_text", "new_text"]
            }),
        }
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        self.world
            .replace_unique(&self.game_id, &args.path, &args.old_text, &args.new_text)?;
        Ok(json!({ "path": args.path, "edited": true }))
    }
}

// Images

#[derive(Clone)]
pub struct SearchImages {
    pub images: Arc<dyn ImageLibrary>,
    pub game_id: String,
}

impl Tool for SearchImages {
    const NAME: &'static str = "search_images";

    type Error = ToolFailure;
    type Args = ImageQuery;
    type Output = Vec<ImageRecord>;

    async fn definition(&self, _prompt: String) -> ToolDefinition {
        ToolDefinition {
            name: Self::NAME.to_string(),
            description: "Find existing images of this game by slug or tags before creating new ones."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "slug": { "type": "string" },
                    "tags": { "type": "array", "items": { "type": "string" } }
                }
            }),
        }
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        let images = Arc::clone(&self.images);
        let game_id = self.game_id.clone();
        let found = tokio::spawn(async move { images.search(&game_id, &args).await }).await??;
        Ok(found)
    }
}

#[derive(Clone)]
pub struct CreateImage {
    pub images: Arc<dyn ImageLibrary>,
    pub game_id: String,
}

impl Tool for CreateImage {
    const NAME: &'static str = "create_image";

    type Error = ToolFailure;
    type Args = ImageRequest;
    type Output = ImageRecord;

    async fn definition(&self, _prompt: String) -> ToolDefinition {
        ToolDefinition {
            name: Self::NAME.to_string(),
            description: "Generate a new illustration for a scene, character or place and store \
                          it under a slug."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "slug": { "type": "string", "description": "kebab-case identifier" },
                    "prompt": { "type": "string", "description": "Visual description" },
                    "tags": { "type": "array", "items": { "type": "string" } }
                },
                "required": ["slug", "prompt"]
            }),
        }
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        let images = Arc::clone(&self.images);
        let game_id = self.game_id.clone();
        let record = tokio::spawn(async move { images.create(&game_id, args).await }).await??;
        Ok(record)
    }
}

/// The tools one agent run may call, looked up by name.
#[derive(Default)]
pub struct ToolBox {
    tools: Vec<Box<dyn ToolDyn>>,
}

impl ToolBox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, tool: impl Tool + 'static) -> Self {
        self.tools.push(Box::new(tool));
        self
    }

    pub fn with_world(self, world: &Arc<dyn WorldStore>, game_id: &str) -> Self {
        self.with(ReadWorldFile {
            world: Arc::clone(world),
            game_id: game_id.to_string(),
        })
        .with(WriteWorldFile {
            world: Arc::clone(world),
            game_id: game_id.to_string(),
        })
        .with(EditWorldFile {
            world: Arc::clone(world),
            game_id: game_id.to_string(),
        })
    }

    pub fn with_images(self, images: &Arc<dyn ImageLibrary>, game_id: &str) -> Self {
        self.with(SearchImages {
            images: Arc::clone(images),
            game_id: game_id.to_string(),
        })
        .with(CreateImage {
            images: Arc::clone(images),
            game_id: game_id.to_string(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|tool| tool.name()).collect()
    }

    pub async fn definitions(&self) -> Vec<ToolSchema> {
        let mut definitions = Vec::with_capacity(self.tools.len());
        for tool in &self.tools {
            definitions.push(tool.definition(String::new()).await.into());
        }
        definitions
    }

    /// Run a tool. `Err` carries the text reported back to the model.
    pub async fn call(&self, name: &str, input: &Value) -> Result<Value, String> {
        let Some(tool) = self.tools.iter().find(|tool| tool.name() == name) else {
            log::warn!("Model called unknown tool {name}");
            return Err(format!("unknown tool: {name}"));
        };
        let args = match input {
            Value::Null => "{}".to_string(),
            other => other.to_string(),
        };
        match tool.call(args).await {
            Ok(output) => {
                Ok(serde_json::from_str(&output).unwrap_or(Value::String(output)))
            }
            Err(e) => {
                log::warn!("Tool {name} failed: {e}");
                Err(e.to_string())
            }
        }
    }
}
