use anyhow::{bail, Context, Result};
use chrono::DateTime;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod cli_style;

use clip_tagger::blend::{DEFAULT_ADMISSION_THRESHOLD, DEFAULT_MAX_RESULTS};
use clip_tagger::classifier::{ContentMetadata, DEFAULT_LEARNING_RATE};
use clip_tagger::config::{AppConfig, CliConfig, FileConfig};
use clip_tagger::fingerprint::fingerprint_file;
use clip_tagger::session::{ExportDocument, TaggingSession};
use clip_tagger::signal::{FeedbackSignal, InvalidSignal};
use cli_style::{
    get_styles, print_empty_list, print_error, print_key_value, print_section_header,
    print_success, print_warning, TableBuilder,
};

fn parse_path(s: &str) -> Result<PathBuf> {
    let original_path = PathBuf::from(s);
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

fn parse_signal(s: &str) -> Result<FeedbackSignal, InvalidSignal> {
    s.parse()
}

#[derive(Parser, Debug)]
#[command(styles = get_styles(), version, about = "Inspect and maintain clip tagger feedback")]
struct CliArgs {
    /// Path to the SQLite feedback database. Without it nothing is persisted.
    #[clap(long, value_parser = parse_path)]
    pub db: Option<PathBuf>,

    /// Path to a TOML config file. Its values override the flags below.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// SGD step size for new models.
    #[clap(long, default_value_t = DEFAULT_LEARNING_RATE)]
    pub learning_rate: f64,

    /// Minimum confidence for a learned-only tag to be shown.
    #[clap(long, default_value_t = DEFAULT_ADMISSION_THRESHOLD)]
    pub admission_threshold: f64,

    /// Maximum number of tags per clip.
    #[clap(long, default_value_t = DEFAULT_MAX_RESULTS)]
    pub max_results: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct MetadataArgs {
    /// Clip duration in seconds.
    #[clap(long)]
    duration: f64,

    #[clap(long, default_value_t = 44_100)]
    sample_rate: u32,

    #[clap(long, default_value_t = 2)]
    channels: u16,
}

impl From<&MetadataArgs> for ContentMetadata {
    fn from(args: &MetadataArgs) -> Self {
        ContentMetadata {
            duration_secs: args.duration,
            sample_rate: args.sample_rate,
            channels: args.channels,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Shows classifier and database statistics.
    Stats,

    /// Lists the custom labels used most often.
    TopLabels {
        #[clap(default_value_t = 10)]
        limit: usize,
    },

    /// Lists the latest feedback events.
    Recent {
        #[clap(default_value_t = 20)]
        limit: usize,
    },

    /// Lists recently tagged clips with the tags shown and their corrections.
    Clips {
        #[clap(default_value_t = 20)]
        limit: usize,
    },

    /// Prints the content fingerprint of a file.
    Fingerprint {
        #[clap(value_parser = parse_path)]
        file: PathBuf,
    },

    /// Records feedback on a label for an audio file and trains on it.
    /// Signals: affirm, reject, introduce.
    Record {
        #[clap(value_parser = parse_path)]
        file: PathBuf,
        label: String,
        #[clap(value_parser = parse_signal)]
        signal: FeedbackSignal,
        #[command(flatten)]
        metadata: MetadataArgs,
    },

    /// Prints the learned confidence of a label for a clip.
    Predict {
        label: String,
        #[command(flatten)]
        metadata: MetadataArgs,
    },

    /// Replays all stored feedback through the classifier.
    Retrain,

    /// Writes classifier and feedback to a JSON document (stdout by default).
    Export {
        #[clap(value_parser = parse_path)]
        output: Option<PathBuf>,
    },

    /// Replaces classifier and feedback with an exported JSON document.
    Import {
        #[clap(value_parser = parse_path)]
        input: PathBuf,
    },

    /// Deletes all feedback and learned models.
    Clear {
        /// Required, there is no undo.
        #[clap(long)]
        yes: bool,
    },
}

fn format_timestamp(millis: i64) -> String {
    DateTime::from_timestamp_millis(millis)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| millis.to_string())
}

fn show_stats(session: &mut TaggingSession) -> Result<()> {
    let stats = session.stats()?;

    print_section_header("Classifier");
    print_key_value("Trained labels", &stats.classifier.trained_labels.to_string());
    print_key_value("Feature dimension", &stats.classifier.feature_dim.to_string());
    print_key_value("Learning rate", &stats.classifier.learning_rate.to_string());
    if !stats.classifier.labels.is_empty() {
        print_key_value("Labels", &stats.classifier.labels.join(", "));
    }

    print_section_header("Feedback");
    match stats.store {
        Some(store) => {
            print_key_value("Events", &store.events.to_string());
            print_key_value("Custom labels", &store.labels.to_string());
            print_key_value("Known clips", &store.content_records.to_string());
            print_key_value("Tagged clips", &store.tagged_clips.to_string());
            print_key_value(
                "Saved classifier",
                if store.has_classifier_state { "yes" } else { "no" },
            );
        }
        None => print_empty_list("no feedback storage"),
    }
    Ok(())
}

fn show_top_labels(session: &mut TaggingSession, limit: usize) -> Result<()> {
    let usage = session.top_labels(limit)?;
    if usage.is_empty() {
        print_empty_list("no custom labels yet");
        return Ok(());
    }
    let mut table = TableBuilder::new(&["Label", "Uses", "Last used"]);
    for entry in usage {
        table.add_row(vec![
            entry.label,
            entry.count.to_string(),
            format_timestamp(entry.last_seen_at),
        ]);
    }
    table.print();
    Ok(())
}

fn show_recent(session: &mut TaggingSession, limit: usize) -> Result<()> {
    let events = session.recent_events(limit)?;
    if events.is_empty() {
        print_empty_list("no feedback yet");
        return Ok(());
    }
    let mut table = TableBuilder::new(&["Id", "When", "Label", "Signal", "Clip"]);
    for event in events {
        let clip: String = event.content_fingerprint.chars().take(12).collect();
        table.add_row(vec![
            event.id.to_string(),
            format_timestamp(event.timestamp),
            event.label,
            event.signal.to_string(),
            clip,
        ]);
    }
    table.print();
    Ok(())
}

fn show_clips(session: &mut TaggingSession, limit: usize) -> Result<()> {
    let history = session.recent_clip_feedback(limit)?;
    if history.is_empty() {
        print_empty_list("no tagged clips yet");
        return Ok(());
    }
    let mut table = TableBuilder::new(&["When", "Clip", "Shown", "Corrected"]);
    for entry in history {
        let clip: String = entry.content_fingerprint.chars().take(12).collect();
        table.add_row(vec![
            format_timestamp(entry.timestamp),
            clip,
            entry.original_tags.join(", "),
            entry.corrected_tags.join(", "),
        ]);
    }
    table.print();
    Ok(())
}

fn record(
    session: &mut TaggingSession,
    file: &Path,
    label: &str,
    signal: FeedbackSignal,
    metadata: &ContentMetadata,
) -> Result<()> {
    let fingerprint = fingerprint_file(file)
        .with_context(|| format!("Failed to read audio file {:?}", file))?;
    let before = session.predict(metadata, label);

    let event_id = match signal {
        FeedbackSignal::Introduce => {
            session.introduce_label(&fingerprint, metadata, label)?;
            None
        }
        _ => session.record_feedback(&fingerprint, metadata, label, signal)?,
    };

    let after = session.predict(metadata, label).unwrap_or_default();
    match before {
        Some(before) => print_success(&format!(
            "{} {:?}: {:.4} -> {:.4}",
            signal, label, before, after
        )),
        None => print_success(&format!("{} {:?}: new model at {:.4}", signal, label, after)),
    }
    if let Some(id) = event_id {
        info!("Stored feedback event {}", id);
    }
    Ok(())
}

fn export(session: &mut TaggingSession, output: Option<&Path>) -> Result<()> {
    let document = session.export_document()?;
    let json = serde_json::to_string_pretty(&document)?;
    match output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write export to {:?}", path))?;
            print_success(&format!(
                "Exported {} models and {} events to {:?}",
                document.classifier.per_label_models.len(),
                document.store.events.len(),
                path
            ));
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn import(session: &mut TaggingSession, input: &Path) -> Result<()> {
    let content = std::fs::read_to_string(input)
        .with_context(|| format!("Failed to read export file {:?}", input))?;
    let document: ExportDocument = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse export file {:?}", input))?;
    let models = document.classifier.per_label_models.len();
    let events = document.store.events.len();
    session.import_document(document)?;
    print_success(&format!("Imported {} models and {} events", models, events));
    Ok(())
}

fn run(session: &mut TaggingSession, command: Command) -> Result<()> {
    match command {
        Command::Stats => show_stats(session),
        Command::TopLabels { limit } => show_top_labels(session, limit),
        Command::Recent { limit } => show_recent(session, limit),
        Command::Clips { limit } => show_clips(session, limit),
        Command::Fingerprint { file } => {
            let fingerprint = fingerprint_file(&file)
                .with_context(|| format!("Failed to read {:?}", file))?;
            println!("{}", fingerprint);
            Ok(())
        }
        Command::Record {
            file,
            label,
            signal,
            metadata,
        } => record(session, &file, &label, signal, &(&metadata).into()),
        Command::Predict { label, metadata } => {
            match session.predict(&(&metadata).into(), &label) {
                Some(confidence) => println!("{:.4}", confidence),
                None => print_empty_list(&format!("{:?} has no learned model", label)),
            }
            Ok(())
        }
        Command::Retrain => {
            let steps = session.retrain_from_store()?;
            print_success(&format!("Replayed {} feedback events", steps));
            Ok(())
        }
        Command::Export { output } => export(session, output.as_deref()),
        Command::Import { input } => import(session, &input),
        Command::Clear { yes } => {
            if !yes {
                bail!("Refusing to clear without --yes");
            }
            session.clear_all()?;
            print_success("All feedback and learned models deleted");
            Ok(())
        }
    }
}

fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let file_config = cli_args
        .config
        .as_deref()
        .map(FileConfig::load)
        .transpose()?;
    let cli_config = CliConfig {
        db_path: cli_args.db.clone(),
        learning_rate: cli_args.learning_rate,
        admission_threshold: cli_args.admission_threshold,
        max_results: cli_args.max_results,
    };
    let app_config = AppConfig::resolve(&cli_config, file_config)?;
    if app_config.db_path.is_none() {
        print_warning("No --db given, feedback will not be persisted");
    }

    let mut session = TaggingSession::open(app_config);
    if let Some(notice) = session.storage_notice() {
        print_warning(notice);
    }
    if let Some(notice) = session.load_notice() {
        print_warning(notice);
    }

    if let Err(err) = run(&mut session, cli_args.command) {
        print_error(&format!("{:#}", err));
        std::process::exit(1);
    }
    if let Some(notice) = session.storage_notice() {
        print_warning(notice);
    }
    Ok(())
}
