use crate::core::message::{Message, Role};
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Plain-text transcript of a chat session. User lines are prefixed with
/// `You: `; assistant replies are written as-is.
pub struct TranscriptLog {
    file_path: Option<PathBuf>,
}

impl TranscriptLog {
    pub fn disabled() -> Self {
        Self { file_path: None }
    }

    pub fn new(path: impl Into<PathBuf>) -> Result<Self, Box<dyn std::error::Error>> {
        let path = path.into();
        test_file_access(&path)?;
        Ok(Self {
            file_path: Some(path),
        })
    }

    pub fn is_active(&self) -> bool {
        self.file_path.is_some()
    }

    pub fn log_message(&self, message: &Message) -> Result<(), Box<dyn std::error::Error>> {
        let Some(file_path) = &self.file_path else {
            return Ok(());
        };
        let Some(entry) = format_entry(message) else {
            return Ok(());
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)?;
        let mut writer = BufWriter::with_capacity(64 * 1024, file);
        write_entry(&mut writer, &entry)?;
        writer.flush()?;
        Ok(())
    }

    /// Replaces the whole file with `messages`. Used after regenerate, when
    /// the tail of the transcript no longer exists.
    pub fn rewrite(&self, messages: &[Message]) -> Result<(), Box<dyn std::error::Error>> {
        let Some(file_path) = &self.file_path else {
            return Ok(());
        };
        let parent = file_path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        // Same directory so the rename stays atomic.
        let mut temp_file = NamedTempFile::new_in(parent)?;
        for entry in messages.iter().filter_map(format_entry) {
            write_entry(&mut temp_file, &entry)?;
        }

        temp_file.flush()?;
        temp_file.as_file().sync_all()?;
        temp_file.persist(file_path)?;
        Ok(())
    }
}

fn format_entry(message: &Message) -> Option<String> {
    match message.role {
        Role::User => Some(format!("You: {}", message.content)),
        Role::Assistant if !message.content.is_empty() => Some(message.content.clone()),
        Role::Assistant => None,
    }
}

fn write_entry(writer: &mut impl Write, entry: &str) -> std::io::Result<()> {
    for line in entry.lines() {
        writeln!(writer, "{line}")?;
    }
    writeln!(writer)
}

fn test_file_access(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.flush()?;
    Ok(())
}
