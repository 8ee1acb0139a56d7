//! Composition root and command handlers

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::{interval, Instant};

use crate::application::ports::{
    BlobStore, Clock, CrashSignalPort, DevicePort, FilePort, RecoveryStore, SessionStore,
};
use crate::application::{
    run_startup_maintenance, Catalog, EngineDeps, RecordingEngine, StartError,
};
use crate::domain::ids::SessionId;
use crate::domain::session::RecordingOptions;
use crate::domain::settings::{Settings, DEFAULT_STORAGE_LOCATION};
use crate::infrastructure::{
    CodecFactory, CpalDevicePort, FsBlobStore, FsRecoveryStore, FsSessionStore, LocalFiles,
    LogStatus, SystemClock, TerminationSignal, UuidGen,
};

use super::args::{Cli, Commands, FormatArg, SessionsAction, SettingsAction, TagAction};
use super::presenter::{format_duration, format_size, Presenter};

/// Exit codes
pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_ERROR: u8 = 1;
pub const EXIT_USAGE_ERROR: u8 = 2;

/// Everything the command handlers need, wired once.
pub struct App {
    pub engine: RecordingEngine,
    pub catalog: Catalog,
    pub sessions: Arc<dyn SessionStore>,
    pub device: Arc<dyn DevicePort>,
    pub files: Arc<dyn FilePort>,
    pub presenter: Presenter,
}

/// Resolve the storage root: the CLI flag wins, then the configured
/// storage location.
async fn resolve_storage_root(cli_storage: Option<PathBuf>) -> PathBuf {
    if let Some(root) = cli_storage {
        return root;
    }
    let bootstrap = FsSessionStore::new(DEFAULT_STORAGE_LOCATION);
    match bootstrap.get_settings().await {
        Ok(settings) => PathBuf::from(settings.storage_location),
        Err(_) => PathBuf::from(DEFAULT_STORAGE_LOCATION),
    }
}

/// Wire adapters, run the startup maintenance pass, and hand back the
/// app context.
pub async fn build_app(storage_root: PathBuf) -> App {
    let sessions: Arc<dyn SessionStore> = Arc::new(FsSessionStore::new(&storage_root));
    let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(&storage_root));
    let recovery: Arc<dyn RecoveryStore> = Arc::new(FsRecoveryStore::new(&storage_root));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let device: Arc<dyn DevicePort> = Arc::new(CpalDevicePort::new());

    let report = run_startup_maintenance(&sessions, &blobs, &recovery, &clock).await;
    if report.purged_blobs > 0 {
        tracing::info!(purged = report.purged_blobs, "orphan blobs removed at startup");
    }

    let engine = RecordingEngine::spawn(EngineDeps {
        device: Arc::clone(&device),
        encoders: Arc::new(CodecFactory::new()),
        blobs: Arc::clone(&blobs),
        sessions: Arc::clone(&sessions),
        recovery,
        clock,
        ids: Arc::new(UuidGen),
        status: Arc::new(LogStatus),
    });

    App {
        engine,
        catalog: Catalog::new(Arc::clone(&sessions), blobs),
        sessions,
        device,
        files: Arc::new(LocalFiles::new()),
        presenter: Presenter::new(),
    }
}

pub async fn run(cli: Cli) -> ExitCode {
    let storage_root = resolve_storage_root(cli.storage).await;
    let app = build_app(storage_root).await;

    let result = match cli.command {
        Commands::Record {
            name,
            format,
            quality,
            split_interval,
            split_size,
            no_split,
            device,
        } => {
            record(
                &app,
                &name,
                format,
                quality,
                split_interval,
                split_size,
                no_split,
                device,
            )
            .await
        }
        Commands::Sessions { action } => sessions_command(&app, action).await,
        Commands::Note { id, text } => note_command(&app, &id, &text).await,
        Commands::Tag { action } => tag_command(&app, action).await,
        Commands::Export { id, out } => export_command(&app, &id, out).await,
        Commands::Delete { id } => delete_command(&app, &id).await,
        Commands::Settings { action } => settings_command(&app, action).await,
        Commands::Recover => recover_command(&app).await,
        Commands::Discard => discard_command(&app).await,
        Commands::Devices => devices_command(&app).await,
    };

    match result {
        Ok(code) => code,
        Err(message) => {
            app.presenter.error(&message);
            ExitCode::from(EXIT_ERROR)
        }
    }
}

fn parse_session_id(raw: &str) -> Result<SessionId, String> {
    raw.parse()
        .map_err(|_| format!("\"{raw}\" is not a session id"))
}

/// Options for this run: configured settings overlaid with CLI flags.
async fn effective_options(
    app: &App,
    format: Option<FormatArg>,
    quality: Option<u32>,
    split_interval: Option<u32>,
    split_size: Option<u64>,
    no_split: bool,
    device: Option<String>,
) -> Result<RecordingOptions, String> {
    let settings = app
        .sessions
        .get_settings()
        .await
        .map_err(|e| e.to_string())?;
    let mut options = settings.recording_options();

    if let Some(format) = format {
        options.format = format.into();
    }
    if let Some(quality) = quality {
        options.quality_kbps = quality;
    }
    if let Some(minutes) = split_interval {
        options.split_interval_minutes = Some(minutes);
    }
    if let Some(mb) = split_size {
        options.split_size_mb = Some(mb);
    }
    if no_split {
        options.split_interval_minutes = None;
        options.split_size_mb = None;
    }
    if device.is_some() {
        options.input_device_id = device;
    }
    options.validate().map_err(|e| e.to_string())?;
    Ok(options)
}

#[allow(clippy::too_many_arguments)]
async fn record(
    app: &App,
    name: &str,
    format: Option<FormatArg>,
    quality: Option<u32>,
    split_interval: Option<u32>,
    split_size: Option<u64>,
    no_split: bool,
    device: Option<String>,
) -> Result<ExitCode, String> {
    let options =
        effective_options(app, format, quality, split_interval, split_size, no_split, device)
            .await?;

    match app.engine.start(name, options).await {
        Ok(()) => {}
        Err(StartError::RecoveryAvailable(checkpoint)) => {
            app.presenter.warn(&format!(
                "An interrupted session \"{}\" ({}) is waiting.",
                checkpoint.session_name,
                format_duration(checkpoint.duration_seconds),
            ));
            app.presenter
                .info("Run `tavern-tapes recover` to resume it, or `tavern-tapes discard` to drop it.");
            return Ok(ExitCode::from(EXIT_USAGE_ERROR));
        }
        Err(err) => return Err(err.to_string()),
    }

    app.presenter.info("Recording. Press Ctrl-C to stop.");
    run_until_stopped(app, 0).await
}

/// Drive the status line until the termination signal, then stop
/// cleanly.
async fn run_until_stopped(app: &App, base_seconds: u64) -> Result<ExitCode, String> {
    let mut signal = TerminationSignal::new();
    let level = app.engine.level_watch();
    let started = Instant::now();
    let mut ticker = interval(Duration::from_millis(500));

    loop {
        tokio::select! {
            _ = signal.recv() => break,
            _ = ticker.tick() => {
                let elapsed = base_seconds + started.elapsed().as_secs();
                app.presenter.recording_status(elapsed, *level.borrow());
            }
        }
    }
    eprintln!();

    // One synchronous checkpoint before teardown, in case the stop
    // below does not finish.
    app.engine.checkpoint_now().await;

    match app.engine.stop().await {
        Ok(metadata) => {
            app.presenter.success(&format!(
                "Saved \"{}\": {} / {}",
                metadata.session_name,
                format_duration(metadata.duration_seconds),
                format_size(metadata.file_size_bytes),
            ));
            Ok(ExitCode::from(EXIT_SUCCESS))
        }
        Err(err) => Err(err.to_string()),
    }
}

async fn sessions_command(
    app: &App,
    action: Option<SessionsAction>,
) -> Result<ExitCode, String> {
    match action.unwrap_or(SessionsAction::List) {
        SessionsAction::List => {
            let sessions = app.catalog.list_sessions().await.map_err(|e| e.to_string())?;
            if sessions.is_empty() {
                app.presenter.info("No sessions recorded yet.");
            }
            for session in &sessions {
                app.presenter.session_line(session);
            }
        }
        SessionsAction::Search { query } => {
            let sessions = app.catalog.search(&query).await.map_err(|e| e.to_string())?;
            if sessions.is_empty() {
                app.presenter.info("No sessions match.");
            }
            for session in &sessions {
                app.presenter.session_line(session);
            }
        }
        SessionsAction::Show { id } => {
            let id = parse_session_id(&id)?;
            let session = app.catalog.get_session(id).await.map_err(|e| e.to_string())?;
            app.presenter.session_detail(&session);
        }
    }
    Ok(ExitCode::from(EXIT_SUCCESS))
}

async fn note_command(app: &App, id: &str, text: &str) -> Result<ExitCode, String> {
    let id = parse_session_id(id)?;
    app.catalog
        .add_note(id, text)
        .await
        .map_err(|e| e.to_string())?;
    app.presenter.success("Note added.");
    Ok(ExitCode::from(EXIT_SUCCESS))
}

async fn tag_command(app: &App, action: TagAction) -> Result<ExitCode, String> {
    match action {
        TagAction::Add { id, tags } => {
            let id = parse_session_id(&id)?;
            app.catalog
                .add_tags(id, tags)
                .await
                .map_err(|e| e.to_string())?;
            app.presenter.success("Tags added.");
        }
        TagAction::Rm { id, tag } => {
            let id = parse_session_id(&id)?;
            app.catalog
                .remove_tag(id, &tag)
                .await
                .map_err(|e| e.to_string())?;
            app.presenter.success("Tag removed.");
        }
    }
    Ok(ExitCode::from(EXIT_SUCCESS))
}

async fn export_command(
    app: &App,
    id: &str,
    out: Option<PathBuf>,
) -> Result<ExitCode, String> {
    let id = parse_session_id(id)?;
    let session = app.catalog.get_session(id).await.map_err(|e| e.to_string())?;
    let bytes = app
        .catalog
        .export(id, session.metadata.format)
        .await
        .map_err(|e| e.to_string())?;

    let path = out.unwrap_or_else(|| PathBuf::from(Catalog::export_filename(&session)));
    app.files
        .write(&path, &bytes)
        .await
        .map_err(|e| e.to_string())?;
    app.presenter.success(&format!(
        "Exported {} to {}",
        format_size(bytes.len() as u64),
        path.display()
    ));
    Ok(ExitCode::from(EXIT_SUCCESS))
}

async fn delete_command(app: &App, id: &str) -> Result<ExitCode, String> {
    let id = parse_session_id(id)?;
    app.catalog
        .delete_session(id)
        .await
        .map_err(|e| e.to_string())?;
    app.presenter.success("Session deleted.");
    Ok(ExitCode::from(EXIT_SUCCESS))
}

async fn settings_command(app: &App, action: SettingsAction) -> Result<ExitCode, String> {
    match action {
        SettingsAction::Get { key } => {
            let settings = app
                .sessions
                .get_settings()
                .await
                .map_err(|e| e.to_string())?;
            let entries = settings.to_entries();
            match key {
                Some(key) => match entries.get(&key) {
                    Some(value) => app.presenter.key_value(&key, &value.to_string()),
                    None => return Err(format!("Unknown setting \"{key}\"")),
                },
                None => {
                    for (key, value) in &entries {
                        app.presenter.key_value(key, &value.to_string());
                    }
                }
            }
        }
        SettingsAction::Set { key, value } => {
            // Accept JSON scalars; anything unparsable is a string.
            let value: Value =
                serde_json::from_str(&value).unwrap_or(Value::String(value));
            app.sessions
                .put_setting(&key, value)
                .await
                .map_err(|e| e.to_string())?;
            app.presenter.success(&format!("Setting \"{key}\" updated."));
        }
        SettingsAction::Clear => {
            app.sessions
                .clear_settings()
                .await
                .map_err(|e| e.to_string())?;
            let defaults = Settings::default();
            app.presenter.success(&format!(
                "Settings reset (format {}, quality {} kbps).",
                defaults.audio_format, defaults.audio_quality
            ));
        }
    }
    Ok(ExitCode::from(EXIT_SUCCESS))
}

async fn recover_command(app: &App) -> Result<ExitCode, String> {
    let Some(checkpoint) = app.engine.recovery_state().await else {
        app.presenter.info("No interrupted session to recover.");
        return Ok(ExitCode::from(EXIT_SUCCESS));
    };

    let settings = app
        .sessions
        .get_settings()
        .await
        .map_err(|e| e.to_string())?;
    app.engine
        .recover(settings.recording_options())
        .await
        .map_err(|e| e.to_string())?;

    app.presenter.success(&format!(
        "Resumed \"{}\" at {}. Press Ctrl-C to stop.",
        checkpoint.session_name,
        format_duration(checkpoint.duration_seconds),
    ));
    run_until_stopped(app, checkpoint.duration_seconds).await
}

async fn discard_command(app: &App) -> Result<ExitCode, String> {
    match app.engine.recovery_state().await {
        Some(checkpoint) => {
            if app.engine.clear_recovery_state().await {
                app.presenter.success(&format!(
                    "Discarded interrupted session \"{}\".",
                    checkpoint.session_name
                ));
                Ok(ExitCode::from(EXIT_SUCCESS))
            } else {
                Err("Could not clear the recovery checkpoint".to_string())
            }
        }
        None => {
            app.presenter.info("No interrupted session to discard.");
            Ok(ExitCode::from(EXIT_SUCCESS))
        }
    }
}

async fn devices_command(app: &App) -> Result<ExitCode, String> {
    let inputs = app
        .device
        .enumerate_inputs()
        .await
        .map_err(|e| e.to_string())?;
    if inputs.is_empty() {
        app.presenter.warn("No audio input devices found.");
    }
    for input in &inputs {
        app.presenter.key_value(&input.id, &input.label);
    }
    Ok(ExitCode::from(EXIT_SUCCESS))
}
