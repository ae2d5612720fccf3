//! Process-wide log sink.
//!
//! Events go to the console and, while the sink is open, to
//! `<log_dir>/operator_<YYYY-MM-DD_HH:MM:SS>.log`. Closing the sink flushes
//! and drops the file; events emitted afterwards still reach the console.
//! The console is stdout, except for [`LogSink::stderr_only`] which keeps
//! stdout free for command output.

use std::fs::{self, File};
use std::io::{self, LineWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;

use crate::shutdown::ManagedResource;

type SharedFile = Arc<Mutex<Option<LineWriter<File>>>>;

/// Writer handed to the file layer. Discards output once the sink is closed.
#[derive(Clone)]
struct FileWriter {
    file: SharedFile,
}

impl Write for FileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.file.lock().as_mut() {
            Some(f) => f.write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.lock().as_mut() {
            Some(f) => f.flush(),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Console {
    Stdout,
    Stderr,
}

/// Clones share the same file and close state.
#[derive(Clone)]
pub struct LogSink {
    path: Option<PathBuf>,
    level: Level,
    console: Console,
    file: SharedFile,
    closed: Arc<AtomicBool>,
}

impl LogSink {
    /// Creates `dir` if needed and opens a fresh timestamped log file.
    pub fn open(dir: impl AsRef<Path>, level: Level) -> io::Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let stamp = chrono::Local::now().format("%Y-%m-%d_%H:%M:%S");
        let path = dir.join(format!("operator_{}.log", stamp));
        let file = File::create(&path)?;

        Ok(Self {
            path: Some(path),
            level,
            console: Console::Stdout,
            file: Arc::new(Mutex::new(Some(LineWriter::new(file)))),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// A sink with no file behind it, logging to stderr.
    pub fn stderr_only(level: Level) -> Self {
        Self {
            path: None,
            level,
            console: Console::Stderr,
            file: Arc::new(Mutex::new(None)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn console(&self) -> Console {
        self.console
    }

    /// Installs the global subscriber. Returns `false` if one was already set.
    pub fn install(&self) -> bool {
        let writer = FileWriter {
            file: self.file.clone(),
        };
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(move || writer.clone());

        let console = match self.console {
            Console::Stdout => BoxMakeWriter::new(io::stdout),
            Console::Stderr => BoxMakeWriter::new(io::stderr),
        };

        tracing_subscriber::registry()
            .with(LevelFilter::from_level(self.level))
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(console),
            )
            .with(file_layer)
            .try_init()
            .is_ok()
    }

    /// Flushes and closes the log file. Only the first call does anything.
    pub fn close(&self) -> io::Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        match self.file.lock().take() {
            Some(mut f) => f.flush(),
            None => Ok(()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    fn writer(&self) -> FileWriter {
        FileWriter {
            file: self.file.clone(),
        }
    }
}

#[async_trait]
impl ManagedResource for LogSink {
    fn name(&self) -> &str {
        "log sink"
    }

    async fn close(&self) -> anyhow::Result<()> {
        LogSink::close(self)?;
        Ok(())
    }
}
