//! JSONL event log.
//!
//! One meeting event per line, in the same wire shape the event bus
//! carries (`id`, `meeting_id`, `at`, `type`, `payload`). Consumers tail
//! the file or replay it offline.

use conclave_domain::MeetingEvent;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

/// Append-only JSONL writer for meeting events.
///
/// Thread-safe via `Mutex<BufWriter<File>>`; each line is flushed so a
/// crash loses at most the event being written.
pub struct JsonlEventLog {
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl JsonlEventLog {
    /// Create a log at `path`, creating parent directories as needed.
    /// Returns `None` (and logs why) when the file cannot be created; event
    /// logging is best-effort and never blocks a meeting.
    pub fn create(path: impl AsRef<Path>) -> Option<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && let Err(err) = std::fs::create_dir_all(parent)
        {
            warn!(
                "could not create event log directory {}: {}",
                parent.display(),
                err
            );
            return None;
        }

        let file = match File::create(path) {
            Ok(file) => file,
            Err(err) => {
                warn!("could not create event log file {}: {}", path.display(), err);
                return None;
            }
        };

        Some(Self {
            writer: Mutex::new(BufWriter::new(file)),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event. Serialization or IO failures are logged and
    /// swallowed.
    pub fn log(&self, event: &MeetingEvent) {
        let Ok(line) = serde_json::to_string(event) else {
            warn!("event {} did not serialize", event.id);
            return;
        };
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writeln!(writer, "{}", line);
            let _ = writer.flush();
        }
    }
}

impl Drop for JsonlEventLog {
    fn drop(&mut self) {
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writer.flush();
        }
    }
}
