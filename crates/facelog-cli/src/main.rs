use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facelog_core::{Analyzer, FaceStore, OnnxAnalyzer};
use facelog_hw::Camera;
use facelog_store::SqliteStore;
use std::path::{Path, PathBuf};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp"];

#[derive(Parser)]
#[command(name = "facelog", about = "facelog face gallery and emotion log tools")]
struct Cli {
    /// SQLite database (default: $XDG_DATA_HOME/facelog/facelog.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Directory holding the ONNX models
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    /// Print listings as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll reference images: one subdirectory per person
    Enroll {
        /// Directory of `<name>/<image>` files
        #[arg(short, long, default_value = "known_people")]
        dir: PathBuf,

        #[arg(long, default_value = "det_10g.onnx")]
        detector_model: String,

        #[arg(long, default_value = "embedding.onnx")]
        embedding_model: String,
    },
    /// List known people
    People,
    /// List stored reference embeddings
    Embeddings,
    /// Show the most recent emotion events
    Events {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Run camera diagnostics
    Test {
        #[arg(short, long, default_value = "/dev/video0")]
        device: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db_path = cli.db.clone().unwrap_or_else(facelog_store::default_db_path);
    let model_dir = cli
        .model_dir
        .clone()
        .unwrap_or_else(facelog_core::default_model_dir);

    match cli.command {
        Commands::Enroll {
            dir,
            detector_model,
            embedding_model,
        } => {
            let mut store = open_store(&db_path)?;
            let detector_path = model_dir.join(detector_model);
            let embedding_path = model_dir.join(embedding_model);
            let mut analyzer = OnnxAnalyzer::load(
                &detector_path.to_string_lossy(),
                &embedding_path.to_string_lossy(),
                None,
            )
            .context("failed to load models")?;
            enroll(&mut store, &mut analyzer, &dir)?;
        }
        Commands::People => {
            let people = open_store(&db_path)?.list_people()?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&people)?);
            } else if people.is_empty() {
                println!("No people enrolled");
            } else {
                for p in &people {
                    println!(
                        "{}  {:<24} {:>3} embedding(s)  since {}",
                        p.person.id, p.person.name, p.embeddings, p.created_at
                    );
                }
            }
        }
        Commands::Embeddings => {
            let embeddings = open_store(&db_path)?.embedding_summaries()?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&embeddings)?);
            } else {
                for e in &embeddings {
                    let dim = e
                        .dim
                        .map(|d| d.to_string())
                        .unwrap_or_else(|| "corrupt".to_string());
                    println!(
                        "{:>5}  {:<24} dim={:<6} model={}",
                        e.id,
                        e.person,
                        dim,
                        e.model_version.as_deref().unwrap_or("-")
                    );
                }
                println!("{} embedding(s)", embeddings.len());
            }
        }
        Commands::Events { limit } => {
            let store = open_store(&db_path)?;
            let events = store.recent_events(limit)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&events)?);
            } else {
                for ev in &events {
                    println!(
                        "{:>6}  {:<20} {:<24} {}",
                        ev.id,
                        ev.detected_at.as_deref().unwrap_or("-"),
                        ev.person,
                        ev.emotion
                    );
                }
                println!("{} of {} event(s)", events.len(), store.event_count()?);
            }
        }
        Commands::Test { device } => camera_test(&device)?,
    }

    Ok(())
}

fn open_store(path: &Path) -> Result<SqliteStore> {
    SqliteStore::open(path).with_context(|| format!("failed to open database {}", path.display()))
}

/// Walk `<dir>/<name>/*` and append one embedding per readable image.
fn enroll<S, A>(store: &mut S, analyzer: &mut A, dir: &Path) -> Result<()>
where
    S: FaceStore,
    A: Analyzer,
{
    let people = sorted_entries(dir)?
        .into_iter()
        .filter(|p| p.is_dir())
        .collect::<Vec<_>>();

    let (mut added, mut failed) = (0usize, 0usize);

    for person_dir in people {
        let Some(name) = person_dir.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        let person = match store.get_or_create_person(&name) {
            Ok(person) => person,
            Err(err) => {
                eprintln!("  {name}: skipped ({err})");
                continue;
            }
        };

        for image_path in sorted_entries(&person_dir)?.into_iter().filter(|p| is_image(p)) {
            match embed_image(analyzer, &image_path)
                .and_then(|emb| Ok(store.append_embedding(&person.id, &emb)?))
            {
                Ok(()) => {
                    added += 1;
                    println!("  {name}: {}", image_path.display());
                }
                Err(err) => {
                    failed += 1;
                    eprintln!("  {name}: {} failed: {err:#}", image_path.display());
                }
            }
        }
    }

    tracing::info!(added, failed, dir = %dir.display(), "enrollment finished");
    println!("Enrolled {added} embedding(s), {failed} failure(s)");
    Ok(())
}

fn embed_image<A: Analyzer>(analyzer: &mut A, path: &Path) -> Result<facelog_core::Embedding> {
    let gray = image::open(path)
        .with_context(|| format!("cannot read {}", path.display()))?
        .to_luma8();
    let (width, height) = gray.dimensions();
    let observation = analyzer.try_analyze(gray.as_raw(), width, height)?;
    observation.embedding.context("no face detected")
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = std::fs::read_dir(dir)
        .with_context(|| format!("cannot read directory {}", dir.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .collect::<Vec<_>>();
    entries.sort();
    Ok(entries)
}

fn is_image(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

fn camera_test(device: &str) -> Result<()> {
    println!("Running camera diagnostics...");

    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
    }
    for d in &devices {
        println!("  {}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
    }

    let camera = Camera::open(device, 640, 480)
        .with_context(|| format!("failed to open {device}"))?;
    let frame = camera.capture_frame()?;
    println!(
        "{}: {}x{} {:?}, frame #{} brightness {:.1}{}",
        device,
        frame.width,
        frame.height,
        camera.fourcc,
        frame.sequence,
        frame.avg_brightness(),
        if frame.is_dark { " (dark)" } else { "" }
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use facelog_core::{AnalyzerError, Embedding, Observation};

    /// Embeds every image as its mean intensity and width.
    struct MeanAnalyzer;

    impl Analyzer for MeanAnalyzer {
        fn try_analyze(
            &mut self,
            gray: &[u8],
            width: u32,
            _height: u32,
        ) -> Result<Observation, AnalyzerError> {
            let mean = gray.iter().map(|&p| p as f32).sum::<f32>() / gray.len() as f32;
            Ok(Observation {
                embedding: Some(Embedding::new(vec![mean, width as f32])),
                emotion: None,
            })
        }
    }

    /// Finds no face in any image.
    struct Blind;

    impl Analyzer for Blind {
        fn try_analyze(&mut self, _: &[u8], _: u32, _: u32) -> Result<Observation, AnalyzerError> {
            Ok(Observation::none())
        }
    }

    fn write_png(path: &Path, shade: u8, width: u32) {
        image::GrayImage::from_pixel(width, 2, image::Luma([shade]))
            .save(path)
            .unwrap();
    }

    #[test]
    fn test_enroll_directory_tree() {
        let dir = tempfile::tempdir().unwrap();
        let alice = dir.path().join("alice");
        let bob = dir.path().join("bob");
        std::fs::create_dir_all(&alice).unwrap();
        std::fs::create_dir_all(&bob).unwrap();
        write_png(&alice.join("1.png"), 10, 2);
        write_png(&alice.join("2.png"), 20, 2);
        write_png(&bob.join("1.png"), 30, 2);
        std::fs::write(bob.join("notes.txt"), "not an image").unwrap();
        std::fs::write(bob.join("broken.png"), "not a png").unwrap();

        let mut store = SqliteStore::open_in_memory().unwrap();
        enroll(&mut store, &mut MeanAnalyzer, dir.path()).unwrap();

        let people = store.list_people().unwrap();
        let counts: Vec<_> = people
            .iter()
            .map(|p| (p.person.name.as_str(), p.embeddings))
            .collect();
        assert_eq!(counts, vec![("alice", 2), ("bob", 1)]);

        let gallery = store.load_gallery().unwrap();
        assert_eq!(gallery.len(), 3);
        assert_eq!(gallery.dim(), Some(2));
    }

    #[test]
    fn test_enroll_twice_reuses_people() {
        let dir = tempfile::tempdir().unwrap();
        let carol = dir.path().join("carol");
        std::fs::create_dir_all(&carol).unwrap();
        write_png(&carol.join("a.png"), 50, 2);

        let mut store = SqliteStore::open_in_memory().unwrap();
        enroll(&mut store, &mut MeanAnalyzer, dir.path()).unwrap();
        write_png(&carol.join("b.png"), 60, 2);
        enroll(&mut store, &mut MeanAnalyzer, dir.path()).unwrap();

        let people = store.list_people().unwrap();
        assert_eq!(people.len(), 1);
        assert_eq!(people[0].embeddings, 3);
    }

    #[test]
    fn test_enroll_missing_dir() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let missing = Path::new("/nonexistent/facelog/known_people");
        assert!(enroll(&mut store, &mut MeanAnalyzer, missing).is_err());
    }

    #[test]
    fn test_image_without_face_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let dave = dir.path().join("dave");
        std::fs::create_dir_all(&dave).unwrap();
        write_png(&dave.join("a.png"), 50, 2);

        let err = embed_image(&mut Blind, &dave.join("a.png")).unwrap_err();
        assert_eq!(err.to_string(), "no face detected");

        let mut store = SqliteStore::open_in_memory().unwrap();
        enroll(&mut store, &mut Blind, dir.path()).unwrap();
        let people = store.list_people().unwrap();
        assert_eq!(people.len(), 1);
        assert_eq!(people[0].embeddings, 0);
    }

    #[test]
    fn test_enroll_args_need_no_emotion_model() {
        let cli = Cli::try_parse_from(["facelog", "enroll", "--dir", "faces"]).unwrap();
        match cli.command {
            Commands::Enroll {
                dir,
                detector_model,
                embedding_model,
            } => {
                assert_eq!(dir, PathBuf::from("faces"));
                assert_eq!(detector_model, "det_10g.onnx");
                assert_eq!(embedding_model, "embedding.onnx");
            }
            _ => panic!("expected enroll"),
        }
        assert!(Cli::try_parse_from(["facelog", "enroll", "--emotion-model", "x.onnx"]).is_err());
    }

    #[test]
    fn test_is_image() {
        let dir = tempfile::tempdir().unwrap();
        let upper = dir.path().join("FACE.JPG");
        std::fs::write(&upper, b"x").unwrap();
        assert!(is_image(&upper));
        assert!(!is_image(&dir.path().join("missing.png")));
        assert!(!is_image(dir.path()));
    }
}
