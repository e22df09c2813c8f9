use crate::error::{ImageError, PersistenceError};
use crate::world::safe_segment;
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{CreateImageRequestArgs, ImageModel, ImageResponseFormat, ImageSize},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    pub slug: String,
    pub prompt: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub location: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageQuery {
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl ImageQuery {
    /// Slug must match exactly; otherwise any shared tag is a hit. An empty query
    /// matches everything.
    pub fn matches(&self, record: &ImageRecord) -> bool {
        if let Some(slug) = &self.slug {
            return record.slug.eq_ignore_ascii_case(slug);
        }
        self.tags.is_empty()
            || self
                .tags
                .iter()
                .any(|tag| record.tags.iter().any(|t| t.eq_ignore_ascii_case(tag)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRequest {
    pub slug: String,
    pub prompt: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[async_trait]
pub trait ImageLibrary: Send + Sync {
    async fn search(&self, game_id: &str, query: &ImageQuery)
    -> Result<Vec<ImageRecord>, ImageError>;

    async fn create(&self, game_id: &str, request: ImageRequest)
    -> Result<ImageRecord, ImageError>;
}

/// `images.json` next to the generated files of one game.
#[derive(Debug, Clone)]
pub struct ImageCatalog {
    path: PathBuf,
}

impl ImageCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn load(&self) -> Result<Vec<ImageRecord>, PersistenceError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => Ok(serde_json::from_str(&data)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Adds the record, replacing any earlier one with the same slug.
    pub async fn upsert(&self, record: ImageRecord) -> Result<(), PersistenceError> {
        let mut records = self.load().await?;
        records.retain(|r| r.slug != record.slug);
        records.push(record);
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, serde_json::to_string_pretty(&records)?).await?;
        Ok(())
    }

    pub async fn search(&self, query: &ImageQuery) -> Result<Vec<ImageRecord>, PersistenceError> {
        Ok(self
            .load()
            .await?
            .into_iter()
            .filter(|record| query.matches(record))
            .collect())
    }
}

pub struct OpenAiImageLibrary {
    client: Client<OpenAIConfig>,
    model: ImageModel,
    root: PathBuf,
    catalog_lock: Mutex<()>,
}

impl OpenAiImageLibrary {
    pub fn new(api_key: &str, model: &str, root: impl Into<PathBuf>) -> Self {
        let model = match model {
            "dall-e-3" => ImageModel::DallE3,
            "dall-e-2" => ImageModel::DallE2,
            other => ImageModel::Other(other.to_string()),
        };
        Self {
            client: Client::with_config(OpenAIConfig::new().with_api_key(api_key)),
            model,
            root: root.into(),
            catalog_lock: Mutex::new(()),
        }
    }

    fn game_dir(&self, game_id: &str) -> PathBuf {
        self.root.join(safe_segment(game_id))
    }

    fn catalog(&self, game_id: &str) -> ImageCatalog {
        ImageCatalog::new(self.game_dir(game_id).join("images.json"))
    }
}

#[async_trait]
impl ImageLibrary for OpenAiImageLibrary {
    async fn search(
        &self,
        game_id: &str,
        query: &ImageQuery,
    ) -> Result<Vec<ImageRecord>, ImageError> {
        Ok(self.catalog(game_id).search(query).await?)
    }

    async fn create(
        &self,
        game_id: &str,
        request: ImageRequest,
    ) -> Result<ImageRecord, ImageError> {
        let image_request = CreateImageRequestArgs::default()
            .prompt(&request.prompt)
            .model(self.model.clone())
            .n(1)
            .response_format(ImageResponseFormat::Url)
            .size(ImageSize::S1024x1024)
            .build()?;

        log::info!("Generating image {} for game {game_id}", request.slug);
        let response = self.client.images().create(image_request).await?;
        if response.data.is_empty() {
            return Err(ImageError::NoImage);
        }
        let paths = response.save(self.game_dir(game_id)).await?;
        let location = paths
            .first()
            .ok_or(ImageError::NoImage)?
            .display()
            .to_string();

        let record = ImageRecord {
            slug: request.slug,
            prompt: request.prompt,
            tags: request.tags,
            location,
            created_at: Utc::now(),
        };
        let _guard = self.catalog_lock.lock().await;
        self.catalog(game_id).upsert(record.clone()).await?;
        Ok(record)
    }
}
