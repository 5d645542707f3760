use anyhow::Result;
use std::path::Path;

use crate::cli::OutputFormat;
use crate::store::TranscriptionRecord;

pub mod formatters;

pub use formatters::*;

/// Render a record in the requested format
pub fn render_record(record: &TranscriptionRecord, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Text => Ok(format_as_text(record)),
        OutputFormat::Json => format_as_json(record),
    }
}

/// Render a list of records in the requested format
pub fn render_list(records: &[TranscriptionRecord], format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Text => Ok(format_list_as_text(records)),
        OutputFormat::Json => format_list_as_json(records),
    }
}

/// Save a transcription record to file, without terminal styling
pub fn save_to_file(record: &TranscriptionRecord, path: &Path, format: OutputFormat) -> Result<()> {
    let content = render_record(record, format)?;
    fs_err::write(path, console::strip_ansi_codes(&content).as_ref())?;
    Ok(())
}

/// Print a transcription record to console
pub fn print_to_console(record: &TranscriptionRecord, format: OutputFormat) -> Result<()> {
    let content = render_record(record, format)?;
    println!("{}", content.trim_end());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{NewTranscription, TranscriptionStore};
    use crate::store::SqliteStore;

    #[tokio::test]
    async fn test_save_to_file_strips_styling() {
        let store = SqliteStore::in_memory().unwrap();
        let record = store
            .insert(NewTranscription {
                summary: "Short.".to_string(),
                ..NewTranscription::new("https://cdn.example.com/ep1.mp3")
            })
            .await
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        save_to_file(&record, &path, OutputFormat::Text).unwrap();

        let saved = fs_err::read_to_string(&path).unwrap();
        assert!(!saved.contains('\u{1b}'));
        assert!(saved.contains("Summary\nShort.\n"));

        let json_path = dir.path().join("out.json");
        save_to_file(&record, &json_path, OutputFormat::Json).unwrap();
        let parsed: TranscriptionRecord = serde_json::from_str(&fs_err::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(parsed, record);
    }
}
