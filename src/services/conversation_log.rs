//! Daily CSV transcript of every conversation turn.
//!
//! One file per local day, e.g. `logs/16th October, 2026.csv`:
//!
//! ```text
//! Date,Time,Person,Context
//! "16th October, 2026",03:02:01 PM,User,"Hello there"
//! ```

use crate::services::ConversationLogger;
use crate::session::history::Role;
use chrono::{DateTime, Datelike, Local, NaiveDate};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::warn;

const HEADER: &str = "Date,Time,Person,Context\n";

pub struct CsvConversationLog {
    files: Arc<LogFiles>,
}

struct LogFiles {
    dir: PathBuf,
    // Sessions share the day's file.
    write_lock: Mutex<()>,
}

impl LogFiles {
    fn write_row(&self, at: DateTime<Local>, speaker: Role, text: &str) -> io::Result<()> {
        let date = format_day(at.date_naive());
        let time = at.format("%I:%M:%S %p").to_string();

        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("{}.csv", date));

        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let is_new = !path.exists();
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        if is_new {
            file.write_all(HEADER.as_bytes())?;
        }
        file.write_all(csv_row(&[date.as_str(), time.as_str(), speaker_label(speaker), text]).as_bytes())
    }

    fn write_or_warn(&self, at: DateTime<Local>, speaker: Role, text: &str) {
        if let Err(e) = self.write_row(at, speaker, text) {
            warn!("Failed to write conversation log in {}: {}", self.dir.display(), e);
        }
    }
}

impl CsvConversationLog {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            files: Arc::new(LogFiles {
                dir: dir.as_ref().to_path_buf(),
                write_lock: Mutex::new(()),
            }),
        }
    }

    /// Hand the row to the blocking pool, stamped with the time of the call.
    /// Outside a runtime the row is written inline and no handle is returned.
    fn spawn_row(&self, speaker: Role, text: &str) -> Option<JoinHandle<()>> {
        let at = Local::now();
        match Handle::try_current() {
            Ok(runtime) => {
                let files = Arc::clone(&self.files);
                let text = text.to_string();
                Some(runtime.spawn_blocking(move || files.write_or_warn(at, speaker, &text)))
            }
            Err(_) => {
                self.files.write_or_warn(at, speaker, text);
                None
            }
        }
    }
}

impl ConversationLogger for CsvConversationLog {
    fn append(&self, speaker: Role, text: &str) {
        let _ = self.spawn_row(speaker, text);
    }
}

/// Used when no log directory is configured.
pub struct NullConversationLog;

impl ConversationLogger for NullConversationLog {
    fn append(&self, _speaker: Role, _text: &str) {}
}

fn speaker_label(role: Role) -> &'static str {
    match role {
        Role::User => "User",
        Role::Assistant => "AI",
        Role::System => "System",
    }
}

/// `16th October, 2026`
fn format_day(date: NaiveDate) -> String {
    let day = date.day();
    let suffix = if (11..=13).contains(&day) {
        "th"
    } else {
        match day % 10 {
            1 => "st",
            2 => "nd",
            3 => "rd",
            _ => "th",
        }
    };
    format!("{}{} {}", day, suffix, date.format("%B, %Y"))
}

fn csv_field(value: &str) -> String {
    if value.contains(|c| matches!(c, ',' | '"' | '\n' | '\r')) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn csv_row(fields: &[&str]) -> String {
    let mut row = fields.iter().map(|f| csv_field(f)).collect::<Vec<_>>().join(",");
    row.push('\n');
    row
}
