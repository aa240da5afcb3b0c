mod config;
mod replay;

use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use config::CliConfig;
use replay::ReplayOracle;
use rollcall_core::{
    BoundingBox, CommandSpeaker, Encoding, FaceMatcher, FinishReason, Gallery, Matcher,
    NotificationSink, SessionEvent, Speaker, SpeechQueue, Terminal, TracingSpeaker,
};
use rollcall_hw::{Camera, DefaultBackend, SourceSpec};
use rollcall_store::{Database, User, UserDetails, ADMIN_PASSWORD_KEY};
use serde::Deserialize;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-recognition attendance terminal")]
struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/rollcall/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Administrator password for protected commands (else
    /// $ROLLCALL_ADMIN_PASSWORD, else prompted)
    #[arg(long, global = true)]
    admin_password: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an attendance session until the source ends or Ctrl-C
    Run {
        /// Device index, device path, video file or directory of recorded frames
        #[arg(short, long)]
        source: Option<String>,
        /// Recorded detections (JSON lines keyed by frame sequence)
        #[arg(short, long)]
        detections: PathBuf,
    },
    /// Enroll a person with one or more face encodings
    Enroll {
        #[arg(short, long)]
        name: String,
        /// JSON file holding one encoding (`[f32, ...]`) or a list of them
        #[arg(short, long)]
        encodings: PathBuf,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        address: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// List enrolled people
    Users {
        /// Include removed people
        #[arg(short, long)]
        all: bool,
    },
    /// Identify the faces recorded for one frame and show their contact details
    Identify {
        /// Recorded detections (JSON lines keyed by frame sequence)
        #[arg(short, long)]
        detections: PathBuf,
        /// Frame sequence number
        #[arg(short, long, default_value_t = 0)]
        frame: u32,
    },
    /// Remove a person from the roster (their history is kept); admin only
    Remove {
        id: i64,
    },
    /// Show today's attendance
    Today,
    /// Show attendance between two dates (inclusive)
    History {
        #[arg(long)]
        from: NaiveDate,
        #[arg(long)]
        to: NaiveDate,
    },
    /// Summary, mood and peak-hour statistics for a day
    Stats {
        /// Day to report (default: today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Export attendance between two dates as CSV
    Export {
        #[arg(long)]
        from: NaiveDate,
        #[arg(long)]
        to: NaiveDate,
        #[arg(short, long)]
        out: PathBuf,
    },
    /// Delete one attendance record; admin only
    DeleteRecord {
        id: i64,
    },
    /// Inspect or clear the stranger log
    Strangers {
        #[command(subcommand)]
        action: StrangerAction,
    },
    /// Read or change stored settings; changes are admin only
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
    /// Change the administrator password
    Passwd,
    /// List V4L2 capture devices
    Devices,
}

#[derive(Subcommand)]
enum StrangerAction {
    List,
    Delete { id: i64 },
}

#[derive(Subcommand)]
enum SettingsAction {
    List,
    Get { key: String },
    Set { key: String, value: String },
}

/// Enrollment input: a single vector or several.
#[derive(Deserialize)]
#[serde(untagged)]
enum EncodingFile {
    One(Vec<f32>),
    Many(Vec<Vec<f32>>),
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = CliConfig::load(cli.config.as_deref())?;
    let admin_password = cli
        .admin_password
        .or_else(|| std::env::var("ROLLCALL_ADMIN_PASSWORD").ok());
    let require_admin = |db: &Database| check_admin(db, admin_password.clone(), &mut std::io::stdin().lock());

    let db = Arc::new(
        Database::open(config.db_path(), config.strangers_dir())
            .with_context(|| format!("opening database {}", config.db_path().display()))?,
    );

    match cli.command {
        Commands::Run { source, detections } => {
            run_session(&config, db, source, &detections).await?;
        }
        Commands::Enroll {
            name,
            encodings,
            phone,
            email,
            address,
            notes,
        } => {
            let vectors = read_encodings(&encodings)?;
            let id = db.add_user(&UserDetails {
                name: name.clone(),
                phone,
                email,
                address,
                notes,
            })?;
            for values in vectors {
                db.add_encoding(id, &Encoding::new(values), Some(encodings.as_path()))?;
            }
            println!("Enrolled {name} (id {id})");
        }
        Commands::Users { all } => {
            let users = db.users(all)?;
            if users.is_empty() {
                println!("No users enrolled");
            }
            for u in users {
                let status = if u.is_active { "" } else { "  [removed]" };
                println!(
                    "{:>4}  {:<24} {} encoding(s){status}",
                    u.id, u.details.name, u.encodings
                );
            }
        }
        Commands::Identify { detections, frame } => {
            let oracle = ReplayOracle::load(&detections)?;
            let tolerance = config.pipeline.clone().with_settings(&*db).validate()?.tolerance;
            let faces = identify(&db, &oracle, frame, tolerance)?;
            if faces.is_empty() {
                println!("No faces recorded for frame {frame}");
            }
            for (n, face) in faces.iter().enumerate() {
                print_identified(n + 1, face);
            }
        }
        Commands::Remove { id } => {
            require_admin(&db)?;
            db.deactivate_user(id)?;
            println!("Removed user {id}");
        }
        Commands::Today => {
            print_entries(&db.attendance_on(Local::now().date_naive())?);
        }
        Commands::History { from, to } => {
            if from > to {
                bail!("--from {from} is after --to {to}");
            }
            print_entries(&db.attendance_range(from, to)?);
        }
        Commands::Stats { date } => {
            let date = date.unwrap_or_else(|| Local::now().date_naive());
            let stats = db.stats(date)?;
            println!(
                "{date}: {} enrolled, {} present, {} absent",
                stats.total_users, stats.present, stats.absent
            );
            for (emotion, n) in db.mood_stats(date)? {
                println!("  {:<10} {n}", emotion.as_str());
            }
            for (hour, n) in db.peak_hours(date)? {
                println!("  {hour:02}:00  {n}");
            }
            for (name, n) in db.top_attendees(5, None)? {
                println!("  {name:<24} {n} day(s)");
            }
        }
        Commands::Export { from, to, out } => {
            let file = std::fs::File::create(&out)
                .with_context(|| format!("creating {}", out.display()))?;
            let rows = db.export_csv(from, to, std::io::BufWriter::new(file))?;
            println!("Exported {rows} record(s) to {}", out.display());
        }
        Commands::DeleteRecord { id } => {
            require_admin(&db)?;
            if !db.delete_attendance(id)? {
                bail!("no attendance record {id}");
            }
            println!("Deleted record {id}");
        }
        Commands::Strangers { action } => match action {
            StrangerAction::List => {
                for s in db.strangers()? {
                    println!(
                        "{:>4}  {}  seen {}x  {}",
                        s.id,
                        s.last_seen,
                        s.count,
                        s.image_path.display()
                    );
                }
            }
            StrangerAction::Delete { id } => {
                require_admin(&db)?;
                if !db.delete_stranger(id)? {
                    bail!("no stranger entry {id}");
                }
                println!("Deleted stranger {id}");
            }
        },
        Commands::Settings { action } => match action {
            SettingsAction::List => {
                for (k, v) in db.settings()? {
                    println!("{k} = {v}");
                }
            }
            SettingsAction::Get { key } => {
                reserved_setting(&key)?;
                match db.setting(&key)? {
                    Some(v) => println!("{v}"),
                    None => bail!("setting {key} is not set"),
                }
            }
            SettingsAction::Set { key, value } => {
                reserved_setting(&key)?;
                require_admin(&db)?;
                db.set_setting(&key, &value)?;
                println!("{key} = {value}");
            }
        },
        Commands::Passwd => {
            require_admin(&db)?;
            let new = match std::env::var("ROLLCALL_NEW_ADMIN_PASSWORD") {
                Ok(p) => p,
                Err(_) => {
                    let mut stdin = std::io::stdin().lock();
                    let first = prompt_secret("New admin password: ", &mut stdin)?;
                    let again = prompt_secret("Repeat new password: ", &mut stdin)?;
                    if first != again {
                        bail!("passwords do not match");
                    }
                    first
                }
            };
            db.set_admin_password(&new)?;
            println!("Admin password changed");
        }
        Commands::Devices => list_devices(),
    }

    Ok(())
}

async fn run_session(
    config: &CliConfig,
    db: Arc<Database>,
    source: Option<String>,
    detections: &Path,
) -> Result<()> {
    let oracle = Arc::new(ReplayOracle::load(detections)?);

    let speaker: Box<dyn Speaker> = match config.speech_command.as_deref().and_then(CommandSpeaker::parse) {
        Some(cmd) => Box::new(cmd),
        None => Box::new(TracingSpeaker),
    };
    let speech = Arc::new(SpeechQueue::spawn(speaker).context("starting speech queue")?);
    let notifier: Arc<dyn NotificationSink> = speech.clone();

    let backend = Arc::new(DefaultBackend {
        read_timeout: config.pipeline.read_timeout(),
    });
    let terminal = Arc::new(Terminal::new(
        config.pipeline.clone(),
        backend,
        oracle,
        db,
        notifier,
    ));

    let input = source.unwrap_or_else(|| config.camera_device.clone());
    let spec = SourceSpec::parse(&input, config.playback_fps);
    tracing::info!(source = %input, "starting session");
    let mut events = terminal.start(spec).context("starting session")?;

    let mut finish = None;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(SessionEvent::SessionFinished { reason, detail }) => {
                    finish = Some((reason, detail));
                    break;
                }
                Ok(event) => report(&event),
                Err(RecvError::Lagged(n)) => tracing::warn!(skipped = n, "event consumer lagging"),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted, stopping session");
                let t = terminal.clone();
                tokio::task::spawn_blocking(move || t.stop()).await??;
                break;
            }
        }
    }

    let t = terminal.clone();
    tokio::task::spawn_blocking(move || t.wait()).await??;
    speech.shutdown();

    match finish {
        Some((FinishReason::OpenFailed, detail))
        | Some((FinishReason::ReadFailed, detail))
        | Some((FinishReason::Crashed, detail)) => {
            bail!("session failed: {}", detail.unwrap_or_default())
        }
        Some((reason, _)) => println!("Session finished: {reason:?}"),
        None => println!("Session stopped"),
    }
    Ok(())
}

/// Verify the administrator password, prompting on `input` when none was supplied.
fn check_admin(db: &Database, supplied: Option<String>, input: &mut impl BufRead) -> Result<()> {
    let password = match supplied {
        Some(p) => p,
        None => prompt_secret("Admin password: ", input)?,
    };
    if !db.verify_admin_password(&password)? {
        tracing::warn!("admin password rejected");
        bail!("admin password rejected");
    }
    Ok(())
}

fn prompt_secret(prompt: &str, input: &mut impl BufRead) -> Result<String> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        bail!("no password given");
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// The password hash is only reachable through `passwd`.
fn reserved_setting(key: &str) -> Result<()> {
    if key == ADMIN_PASSWORD_KEY {
        bail!("{key} is managed by `rollcall passwd`");
    }
    Ok(())
}

/// One recorded face and who it belongs to.
struct Identified {
    bbox: BoundingBox,
    distance: f32,
    user: Option<User>,
}

/// Match every face recorded for `frame` against the enrolled roster.
fn identify(db: &Database, oracle: &ReplayOracle, frame: u32, tolerance: f32) -> Result<Vec<Identified>> {
    let roster = db.identities()?;
    let gallery = Gallery::from_identities(&roster);
    let matcher = FaceMatcher::new(oracle);

    oracle
        .faces_at(frame)
        .iter()
        .map(|face| -> Result<Identified> {
            let result = matcher.compare(&face.encoding, &gallery, tolerance);
            let user = match result.identity_index.filter(|_| result.matched) {
                Some(idx) => db.user(roster[idx].id)?,
                None => None,
            };
            Ok(Identified {
                bbox: face.bbox,
                distance: result.distance,
                user,
            })
        })
        .collect()
}

fn print_identified(n: usize, face: &Identified) {
    let b = &face.bbox;
    let at = format!("({:.0}, {:.0}, {:.0}x{:.0})", b.x, b.y, b.width, b.height);
    let Some(user) = &face.user else {
        println!("Face {n} {at}: Unknown (closest distance {:.3})", face.distance);
        return;
    };
    let d = &user.details;
    println!("Face {n} {at}: {} (id {}, distance {:.3})", d.name, user.id, face.distance);
    for (label, value) in [
        ("phone", &d.phone),
        ("email", &d.email),
        ("address", &d.address),
        ("notes", &d.notes),
    ] {
        if let Some(v) = value.as_deref().filter(|v| !v.is_empty()) {
            println!("    {label:<8} {v}");
        }
    }
}

fn report(event: &SessionEvent) {
    match event {
        SessionEvent::AttendanceLogged {
            record,
            display_name,
        } => println!(
            "[{}] {display_name} present ({})",
            record.timestamp.format("%H:%M:%S"),
            record.emotion
        ),
        SessionEvent::Notification(text) => println!("  > {text}"),
        SessionEvent::StrangerLogged { stranger_id } => println!("  stranger logged (#{stranger_id})"),
        SessionEvent::IdentitySeen {
            display_name,
            offset_ms,
            ..
        } => println!(
            "  {display_name} first seen at {}:{:02}.{:03}",
            offset_ms / 60_000,
            offset_ms / 1000 % 60,
            offset_ms % 1000
        ),
        SessionEvent::Warning(msg) => eprintln!("warning: {msg}"),
        SessionEvent::ProgressUpdate { .. }
        | SessionEvent::FrameReady { .. }
        | SessionEvent::SessionFinished { .. } => {}
    }
}

fn print_entries(entries: &[rollcall_store::AttendanceEntry]) {
    if entries.is_empty() {
        println!("No attendance recorded");
        return;
    }
    for e in entries {
        let removed = if e.active { "" } else { " (removed)" };
        println!(
            "{:>4}  {}  {:<24} {}{removed}",
            e.id,
            e.timestamp.format("%Y-%m-%d %H:%M:%S"),
            e.name,
            e.emotion
        );
    }
}

fn read_encodings(path: &Path) -> Result<Vec<Vec<f32>>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading encodings {}", path.display()))?;
    let vectors = match serde_json::from_str(&text)
        .with_context(|| format!("parsing encodings {}", path.display()))?
    {
        EncodingFile::One(v) => vec![v],
        EncodingFile::Many(vs) => vs,
    };
    if vectors.is_empty() || vectors.iter().any(Vec::is_empty) {
        bail!("{} contains no encoding values", path.display());
    }
    Ok(vectors)
}

fn list_devices() {
    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
    }
    for d in devices {
        println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
    }
}
