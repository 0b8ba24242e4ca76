use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use meshid_core::{FaceMeshDetector, FaceStore, RecognitionEngine};
use meshid_store::{SqliteStore, SETTING_THRESHOLD};
use serde_json::json;
use std::path::PathBuf;

mod config;

/// Look-back window for the recognition counts in `status`.
const RECOGNITION_STATS_DAYS: u32 = 30;

use config::Config;

#[derive(Parser)]
#[command(name = "meshid", about = "Face identification by face-mesh landmark embeddings")]
struct Cli {
    /// Override the acceptance threshold (clamped to 0.1–1.0); the value is
    /// saved to the database for later runs
    #[arg(long, global = true)]
    threshold: Option<f32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new person
    AddPerson {
        #[arg(long)]
        family: String,
        #[arg(long, default_value = "")]
        given: String,
    },
    /// Store photos for a person and compute their embeddings
    Enroll {
        /// Person ID returned by add-person
        #[arg(short, long)]
        person: i64,
        /// Image files to enroll
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Identify every face in an image
    Recognize {
        image: PathBuf,
        /// Include 2D landmark points in the output
        #[arg(long)]
        landmarks: bool,
    },
    /// List people and their photos
    List,
    /// Remove a photo and its embedding
    Remove {
        /// Photo ID to remove
        photo_id: i64,
    },
    /// Show engine and database status
    Status,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = Config::from_env();
    let mut store = SqliteStore::open(&cfg.db_path)
        .with_context(|| format!("opening database {}", cfg.db_path.display()))?;

    match cli.command {
        Commands::AddPerson { family, given } => {
            let id = store.add_person(&family, &given)?;
            println!("{}", json!({ "person_id": id }));
        }
        Commands::Enroll { person, images } => {
            let Some(identity) = store.get_person(person)? else {
                bail!("person {person} not found");
            };
            let mut added = Vec::new();
            for path in &images {
                let photo_id = store
                    .add_photo_from_file(person, path)
                    .with_context(|| format!("adding {}", path.display()))?;
                added.push(photo_id);
            }

            let mut engine = load_engine(&cfg, &store, cli.threshold)?;
            let trained = engine.batch_train_identity(person, &identity.display_name(), &mut store);
            println!(
                "{}",
                json!({ "person_id": person, "photos_added": added, "trained": trained })
            );
        }
        Commands::Recognize { image, landmarks } => {
            let img = image::open(&image).with_context(|| format!("reading {}", image.display()))?;
            let mut engine = load_engine(&cfg, &store, cli.threshold)?;
            engine.load_all(&store);

            let faces: Vec<_> = engine
                .recognize_faces(&img, landmarks)
                .into_iter()
                .map(|face| {
                    if let Some(person_id) = face.recognition.identity_id {
                        if let Err(e) = store.add_recognition_session(person_id, face.recognition.confidence) {
                            tracing::warn!(person_id, error = %e, "failed to record recognition");
                        }
                    }
                    let name = face.recognition.photo_id.and_then(|pid| {
                        engine
                            .gallery()
                            .iter()
                            .find(|e| e.photo_id == Some(pid))
                            .map(|e| e.display_name.clone())
                    });
                    json!({
                        "region": face.region,
                        "person_id": face.recognition.identity_id,
                        "name": name,
                        "confidence": face.recognition.confidence,
                        "photo_id": face.recognition.photo_id,
                        "landmarks": face.landmarks,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&faces)?);
        }
        Commands::List => {
            let mut people = Vec::new();
            for identity in store.list_identities()? {
                let photos = store.list_photos(identity.id)?;
                let with_embeddings = photos.iter().filter(|p| p.embedding.is_some()).count();
                people.push(json!({
                    "id": identity.id,
                    "name": identity.display_name(),
                    "photos": photos.iter().map(|p| p.id).collect::<Vec<_>>(),
                    "with_embeddings": with_embeddings,
                }));
            }
            println!("{}", serde_json::to_string_pretty(&people)?);
        }
        Commands::Remove { photo_id } => {
            let removed = store.delete_photo(photo_id)?;
            if !removed {
                bail!("photo {photo_id} not found");
            }
            println!("{}", json!({ "photo_id": photo_id, "removed": removed }));
        }
        Commands::Status => {
            let stats = store.stats()?;
            let recognitions = store.recognition_stats(None, RECOGNITION_STATS_DAYS)?;
            let engine = match load_engine(&cfg, &store, cli.threshold) {
                Ok(mut engine) => {
                    engine.load_all(&store);
                    Some(engine.describe())
                }
                Err(e) => {
                    tracing::warn!(error = %e, "face-mesh model unavailable");
                    None
                }
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "version": env!("CARGO_PKG_VERSION"),
                    "database": cfg.db_path,
                    "store": stats,
                    "recognitions": recognitions,
                    "recognitions_window_days": RECOGNITION_STATS_DAYS,
                    "engine": engine,
                }))?
            );
        }
    }

    Ok(())
}

fn load_engine(
    cfg: &Config,
    store: &SqliteStore,
    threshold: Option<f32>,
) -> Result<RecognitionEngine<FaceMeshDetector>> {
    let engine_cfg = cfg.engine_config(store);
    let detector = FaceMeshDetector::load(&cfg.facemesh_model_path(), engine_cfg.detector_confidence)?;
    let mut engine = RecognitionEngine::new(detector, engine_cfg);
    if let Some(t) = threshold {
        engine.set_threshold(t);
        store
            .set_setting(SETTING_THRESHOLD, &engine.threshold().to_string())
            .context("saving threshold")?;
    }
    Ok(engine)
}
