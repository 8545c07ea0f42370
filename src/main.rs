use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use tracing::{info, warn};

use emovista::audio::{HttpSttClient, SpeechToText};
use emovista::config::{Config, SessionOverrides};
use emovista::ensemble::EnsembleScorer;
use emovista::recommend::{
    ContextualRecommender, HttpRecommendationClient, RecommendationCache, RecommendationService,
};
use emovista::session::{SessionInputs, SessionRunner};
use emovista::vision::{CenterRegionDetector, FaceSizePolicy};

/// Headless CLI for multimodal analysis of a recorded child session
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory of pre-extracted frame images (frame_000000.png, ...)
    #[arg(short, long)]
    frames: PathBuf,

    /// Extracted session audio (WAV)
    #[arg(short, long)]
    audio: Option<PathBuf>,

    /// Free-text diagnosis for profile resolution (e.g. "TEA grado 1")
    #[arg(short, long)]
    diagnosis: Option<String>,

    /// Free-text session context passed to the recommendation service
    #[arg(long, default_value = "")]
    context: String,

    /// Path to the config file (defaults to ~/.emovista/config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the profile's frame-sampling interval (ms)
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Override the profile's confidence threshold (0.0 - 1.0)
    #[arg(long)]
    threshold: Option<f32>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => Config::default_config_dir()?.join("config.json"),
    };
    let config = Config::load(&config_path)?;

    info!("emovista starting");
    info!("Frames: {:?}", args.frames);
    info!("Diagnosis: {:?}", args.diagnosis);

    let models_dir = config.get_models_dir()?;
    let scorer = match EnsembleScorer::load(&models_dir) {
        Ok(scorer) => scorer,
        Err(e) => return Err(anyhow::anyhow!("Failed to load emotion models: {}", e)),
    };
    if scorer.model_count() == 0 {
        warn!("No emotion models in {:?}; predictions will use the fallback heuristic", models_dir);
    }

    let detector = CenterRegionDetector::new(FaceSizePolicy {
        min_area_ratio: config.min_face_area_ratio,
        max_area_ratio: config.max_face_area_ratio,
    });

    let stt: Option<Box<dyn SpeechToText>> = match &config.stt_endpoint {
        Some(endpoint) => Some(Box::new(HttpSttClient::new(endpoint)?)),
        None => None,
    };

    let service: Option<Box<dyn RecommendationService>> =
        match &config.recommendation_endpoint {
            Some(endpoint) => Some(Box::new(HttpRecommendationClient::new(endpoint, None)?)),
            None => None,
        };
    let cache = std::sync::Arc::new(RecommendationCache::new(
        emovista::recommend::service::CACHE_TTL,
    ));
    let recommender = ContextualRecommender::new(service, cache);

    let runner = SessionRunner::new(config, scorer, Box::new(detector), stt, recommender);

    let stop_flag = runner.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing with partial results");
            stop_flag.store(true, Ordering::SeqCst);
        }
    });

    let inputs = SessionInputs {
        frames_dir: args.frames,
        audio_path: args.audio,
        diagnosis: args.diagnosis,
        user_context: args.context,
        overrides: SessionOverrides {
            frame_interval_ms: args.interval_ms,
            confidence_threshold: args.threshold,
            ..Default::default()
        },
    };

    let result = tokio::task::spawn_blocking(move || runner.run(&inputs)).await??;

    println!("Session {}", result.session_id);
    println!("Priority: {:?}", result.priority);
    if let Some(predominant) = result.stats.predominant {
        println!(
            "Predominant emotion: {} ({:.0}%)",
            predominant,
            result.stats.predominant_share * 100.0
        );
    }
    println!("Communication level: {}", result.audio.level.as_str());
    for alert in &result.alerts {
        println!("[{:?}/{:?}] {}", alert.alert_type, alert.level, alert.message);
    }
    println!("Recommendations:");
    for rec in &result.recommendations {
        println!("  - {}", rec);
    }
    if !result.errors.is_empty() {
        println!("Errors ({}):", result.errors.len());
        for error in &result.errors {
            println!("  - {}", error);
        }
    }

    Ok(())
}
