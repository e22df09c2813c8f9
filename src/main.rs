use std::path::Path;
use std::sync::Arc;
use taleweaver::agent_log::{AgentLogger, FileLogStore};
use taleweaver::decision::DecisionEngine;
use taleweaver::error::{AppError, Result};
use taleweaver::images::{ImageLibrary, OpenAiImageLibrary};
use taleweaver::narrator::Narrator;
use taleweaver::openai::OpenAiModel;
use taleweaver::pipeline::{TurnPipeline, TurnRequest};
use taleweaver::prestep::PreStepExecutor;
use taleweaver::provider::LanguageModel;
use taleweaver::session::{FsSessionStore, SessionRecorder};
use taleweaver::translator::SseSink;
use taleweaver::world::{FsWorldStore, WorldStore, safe_segment};
use taleweaver::{ChatMessage, Settings, logging};

const USAGE: &str = "taleweaver <game_id> <player message>";

fn build_pipeline(settings: &Settings, data_dir: &Path) -> Result<TurnPipeline> {
    let api_key = settings.api_key()?;

    let primary: Arc<dyn LanguageModel> =
        Arc::new(OpenAiModel::new(&api_key, &settings.decision_model));
    let fallback: Option<Arc<dyn LanguageModel>> = match (&settings.fallback, settings.fallback_key()) {
        (Some(provider), Some(key)) => Some(Arc::new(OpenAiModel::with_base(
            &key,
            &provider.api_base,
            &provider.model,
        )) as Arc<dyn LanguageModel>),
        (Some(provider), None) => {
            log::warn!("Fallback provider key {} is not set", provider.api_key_env);
            None
        }
        (None, _) => None,
    };

    let world: Arc<dyn WorldStore> = Arc::new(FsWorldStore::new(data_dir.join("worlds")));
    let images: Arc<dyn ImageLibrary> = Arc::new(OpenAiImageLibrary::new(
        &api_key,
        &settings.image_model,
        data_dir.join("images"),
    ));
    let logger = AgentLogger::new(Arc::new(FileLogStore::new(data_dir.join("agent_logs"))));

    let decision = DecisionEngine::new(primary, fallback)
        .with_history_window(settings.decision_history_window);
    let pre_steps = PreStepExecutor::new(
        Arc::new(OpenAiModel::new(&api_key, &settings.sub_agent_model)),
        Arc::clone(&world),
        Arc::clone(&images),
        logger.clone(),
    )
    .with_max_rounds(settings.max_pre_step_rounds);
    let narrator = Narrator::new(
        Arc::new(OpenAiModel::new(&api_key, &settings.narrator_model)),
        Arc::clone(&world),
        Arc::clone(&images),
        logger.clone(),
    )
    .with_max_steps(settings.max_narrator_steps);
    let recorder = SessionRecorder::new(
        Arc::new(OpenAiModel::new(&api_key, &settings.recorder_model)),
        Arc::new(FsSessionStore::new(data_dir.join("sessions"))),
        logger.clone(),
    );

    Ok(TurnPipeline::new(decision, pre_steps, narrator, logger)
        .with_recorder(recorder)
        .with_suppressed_input_tools(settings.suppressed_input_tools.clone())
        .with_debug_mode(settings.debug_mode))
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let (game_id, message) = match (args.next(), args.collect::<Vec<_>>()) {
        (Some(game_id), words) if !words.is_empty() => (game_id, words.join(" ")),
        _ => return Err(AppError::Usage(USAGE.to_string())),
    };

    let data_dir = Settings::default_data_dir()?;
    let settings = Settings::load(&data_dir)?;
    let data_dir = settings.data_dir()?;
    logging::init(&data_dir, settings.debug_mode)?;
    log::info!("Starting turn for game {game_id}");

    let system_path = data_dir
        .join("systems")
        .join(format!("{}.md", safe_segment(&game_id)));
    let game_system = std::fs::read_to_string(system_path).unwrap_or_default();
    let pipeline = build_pipeline(&settings, &data_dir)?;

    let mut sink = SseSink::new(tokio::io::stdout());
    let outcome = pipeline
        .run_turn(
            TurnRequest {
                game_id,
                conversation_id: None,
                game_system,
                messages: vec![ChatMessage::user(message)],
            },
            &mut sink,
        )
        .await;

    pipeline.logger().drain().await;
    outcome?;
    Ok(())
}
