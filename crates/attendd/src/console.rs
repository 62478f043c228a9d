//! Line-oriented operator console.
//!
//! Reads commands from stdin, forwards them to the engine and renders the
//! session status, the ledger and incoming notices as plain text.

use anyhow::Result;
use attend_core::{present_count, AttendanceRecord, CommandError, SessionSnapshot};
use chrono::Local;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

use crate::engine::{CaptureAck, EngineError, EngineHandle, Notice};

const HELP: &str = "commands: start | stop | capture | status | list | export | help | quit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Capture,
    Status,
    List,
    Export,
    Help,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim().to_ascii_lowercase().as_str() {
            "start" => Some(Command::Start),
            "stop" => Some(Command::Stop),
            "capture" | "mark" => Some(Command::Capture),
            "status" => Some(Command::Status),
            "list" | "ledger" => Some(Command::List),
            "export" => Some(Command::Export),
            "help" | "?" => Some(Command::Help),
            "quit" | "exit" => Some(Command::Quit),
            _ => None,
        }
    }
}

/// Run the console until stdin closes or the operator quits.
pub async fn run(handle: EngineHandle) -> Result<()> {
    let notices = tokio::spawn(print_notices(handle.subscribe()));

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let Some(command) = Command::parse(&line) else {
            println!("unknown command: {}", line.trim());
            println!("{HELP}");
            continue;
        };
        if command == Command::Quit {
            break;
        }
        execute(&handle, command).await?;
    }

    notices.abort();
    Ok(())
}

async fn execute(handle: &EngineHandle, command: Command) -> Result<()> {
    match command {
        Command::Start => match handle.start().await {
            // Reported through the MediaUnavailable notice.
            Ok(_) | Err(EngineError::MediaUnavailable(_)) => {}
            Err(err) => print_error(&err),
        },
        Command::Stop => {
            if let Err(err) = handle.stop().await {
                print_error(&err);
            }
        }
        Command::Capture => match handle.capture().await {
            Ok(CaptureAck::Started) => println!("Processing..."),
            Ok(CaptureAck::AlreadyInFlight) => println!("Capture already in progress"),
            Err(err) => print_error(&err),
        },
        Command::Status => {
            let snapshot = handle.snapshot().await?;
            let ledger = handle.ledger().await?;
            println!("{}", render_status(&snapshot, &ledger));
        }
        Command::List => {
            let ledger = handle.ledger().await?;
            println!("{}", render_ledger(&ledger));
        }
        Command::Export => {
            let ledger = handle.ledger().await?;
            println!("{}", serde_json::to_string_pretty(&ledger)?);
        }
        Command::Help => println!("{HELP}"),
        Command::Quit => {}
    }
    Ok(())
}

fn print_error(err: &EngineError) {
    if let EngineError::ChannelClosed = err {
        tracing::error!("engine is gone");
    }
    println!("{}", describe_error(err));
}

async fn print_notices(mut notices: broadcast::Receiver<Notice>) {
    loop {
        match notices.recv().await {
            Ok(notice) => println!("{}", render_notice(&notice)),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "console fell behind on notices");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Operator-facing wording for a failed command.
pub fn describe_error(err: &EngineError) -> String {
    match err {
        EngineError::Rejected(CommandError::NotActive) => {
            "Please activate the system first".to_string()
        }
        EngineError::Rejected(CommandError::NoFacesDetected) => {
            "No faces detected. Position yourself in front of the camera".to_string()
        }
        EngineError::MediaUnavailable(reason) => format!(
            "Unable to access camera ({reason}). Please ensure camera permissions are granted."
        ),
        other => capitalize(&other.to_string()),
    }
}

pub fn describe_faces(count: u32) -> String {
    match count {
        0 => "No faces detected".to_string(),
        1 => "1 face detected".to_string(),
        n => format!("{n} faces detected"),
    }
}

pub fn detection_hint(count: u32) -> &'static str {
    if count > 0 {
        "Ready to mark attendance"
    } else {
        "Position yourself in front of the camera"
    }
}

pub fn confidence_percent(confidence: f32) -> u32 {
    (confidence.clamp(0.0, 1.0) * 100.0).round() as u32
}

pub fn render_status(snapshot: &SessionSnapshot, ledger: &[AttendanceRecord]) -> String {
    let mut out = format!(
        "System Status: {}\n",
        if snapshot.active { "Active" } else { "Inactive" }
    );
    if snapshot.active {
        out.push_str(&format!(
            "Faces Detected: {} ({})\n",
            describe_faces(snapshot.detected_face_count),
            detection_hint(snapshot.detected_face_count)
        ));
        if let Some(candidate) = &snapshot.candidate {
            let label = if candidate.is_unknown() {
                "Unrecognized face"
            } else {
                candidate.identity.as_str()
            };
            out.push_str(&format!("Candidate: {label} ({}%)\n", candidate.confidence));
        }
    }
    out.push_str(&format!("Total Present: {}\n", present_count(ledger)));
    out.push_str(&format!(
        "Processing: {}",
        if snapshot.capturing { "Active" } else { "Idle" }
    ));
    out
}

pub fn render_record(record: &AttendanceRecord) -> String {
    let time = record.timestamp.with_timezone(&Local).format("%H:%M:%S");
    let confidence = record
        .confidence
        .map(|c| format!("{}% confidence", confidence_percent(c)))
        .unwrap_or_default();
    format!(
        "{time}  {:<20} {:<8} {confidence}",
        record.name,
        record.status.as_str().to_uppercase()
    )
    .trim_end()
    .to_string()
}

pub fn render_ledger(records: &[AttendanceRecord]) -> String {
    if records.is_empty() {
        return "No attendance records yet. Start the system and capture faces to mark attendance"
            .to_string();
    }
    records
        .iter()
        .map(render_record)
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_notice(notice: &Notice) -> String {
    match notice {
        Notice::Activated { stream } => format!(
            "Attendance system activated! Camera is now scanning for faces ({} {}x{})",
            stream.device, stream.width, stream.height
        ),
        Notice::Deactivated => "Attendance system deactivated".to_string(),
        Notice::MediaUnavailable { reason } => format!("Unable to access camera: {reason}"),
        Notice::AttendanceMarked { record } => {
            let confidence = record
                .confidence
                .map(|c| format!(" ({}% confidence)", confidence_percent(c)))
                .unwrap_or_default();
            format!(
                "Attendance marked for {}. Status: {}{confidence}",
                record.name,
                record.status.as_str().to_uppercase()
            )
        }
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
