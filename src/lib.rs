pub mod agent_core;
pub mod commands;
pub mod inference;
pub mod tools;

use tracing_subscriber::fmt::writer::BoxMakeWriter;

/// Log file name inside the data directory.
const LOG_FILE_NAME: &str = "assistant.log";

/// Rotated logs kept next to the live one.
const LOG_FILES_KEPT: u32 = 3;

/// Return the platform-standard data directory for Nexus.
///
/// - macOS: `~/Library/Application Support/com.nexus.app/`
/// - Windows: `{FOLDERID_RoamingAppData}\com.nexus.app\`
/// - Linux: `$XDG_DATA_HOME/com.nexus.app/` (fallback `~/.local/share/...`)
///
/// Falls back to `~/.nexus/` only if none of the above can be resolved.
pub fn data_dir() -> std::path::PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("com.nexus.app");
    }
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".nexus")
}

/// Initialize the tracing subscriber, writing structured logs to the app data directory.
///
/// On each startup:
/// 1. Rotates existing logs (assistant.log → assistant.log.1 → .2 → .3, keeps last 3).
/// 2. Opens a fresh assistant.log with a line-flushing writer for crash resilience.
/// 3. Logs a startup banner with the data directory path for discoverability.
///
/// `NEXUS_LOG_STDERR=1` logs to stderr instead, and `NEXUS_LOG_FORMAT=json`
/// switches to one JSON object per line. If the log file cannot be opened,
/// logging falls back to stderr.
pub fn init_tracing() {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = data_dir();
    let log_path = log_dir.join(LOG_FILE_NAME);
    let to_stderr = std::env::var("NEXUS_LOG_STDERR").is_ok_and(|v| v == "1");

    let (writer, destination) = if to_stderr {
        (BoxMakeWriter::new(std::io::stderr), "stderr".to_string())
    } else {
        match open_log_file(&log_dir, &log_path) {
            Ok(file) => (
                BoxMakeWriter::new(FlushingWriter::new(file)),
                log_path.display().to_string(),
            ),
            Err(e) => {
                eprintln!("nexus: cannot open {}: {e}; logging to stderr", log_path.display());
                (BoxMakeWriter::new(std::io::stderr), "stderr".to_string())
            }
        }
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("nexus=info,warn"));
    let json = std::env::var("NEXUS_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let builder = fmt::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false);
    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if installed.is_err() {
        // Already initialized (e.g. by an embedding application).
        return;
    }

    // Startup banner
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %log_dir.display(),
        log_file = %destination,
        pid = std::process::id(),
        "=== Nexus starting ==="
    );
}

fn open_log_file(
    log_dir: &std::path::Path,
    log_path: &std::path::Path,
) -> std::io::Result<std::fs::File> {
    std::fs::create_dir_all(log_dir)?;
    rotate_log_file(log_path, LOG_FILES_KEPT);
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
}

/// Rotate log files: `assistant.log` → `assistant.log.1` → `.2` → … → `.{keep}`.
///
/// Oldest file beyond `keep` is deleted. Missing files in the chain are skipped.
fn rotate_log_file(base_path: &std::path::Path, keep: u32) {
    // Delete the oldest
    let oldest = format!("{}.{keep}", base_path.display());
    let _ = std::fs::remove_file(&oldest);

    // Shift: .{n-1} → .{n}
    for i in (1..keep).rev() {
        let from = format!("{}.{i}", base_path.display());
        let to = format!("{}.{}", base_path.display(), i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    // Current → .1
    if base_path.exists() {
        let to = format!("{}.1", base_path.display());
        let _ = std::fs::rename(base_path, &to);
    }
}

/// A writer that wraps `std::fs::File` and flushes after every write.
///
/// `tracing-subscriber` buffers log output internally. Without explicit
/// flushing, log entries may sit in OS buffers and be lost on crash.
#[derive(Clone)]
struct FlushingWriter {
    file: std::sync::Arc<std::sync::Mutex<std::fs::File>>,
}

impl FlushingWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            file: std::sync::Arc::new(std::sync::Mutex::new(file)),
        }
    }
}

impl std::io::Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        let n = std::io::Write::write(&mut *f, buf)?;
        std::io::Write::flush(&mut *f)?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        std::io::Write::flush(&mut *f)
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_rotate_shifts_and_drops_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("assistant.log");
        for (name, body) in [
            ("assistant.log", "current"),
            ("assistant.log.1", "one"),
            ("assistant.log.2", "two"),
            ("assistant.log.3", "three"),
        ] {
            std::fs::write(dir.path().join(name), body).unwrap();
        }

        rotate_log_file(&base, 3);

        let read = |name: &str| std::fs::read_to_string(dir.path().join(name)).unwrap();
        assert!(!base.exists());
        assert_eq!(read("assistant.log.1"), "current");
        assert_eq!(read("assistant.log.2"), "one");
        assert_eq!(read("assistant.log.3"), "two");
    }

    #[test]
    fn test_rotate_with_no_logs_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        rotate_log_file(&dir.path().join("assistant.log"), 3);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_flushing_writer_reaches_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("assistant.log");
        let file = std::fs::File::create(&path).unwrap();

        let mut writer = FlushingWriter::new(file);
        writer.write_all(b"line one\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "line one\n");
    }
}
