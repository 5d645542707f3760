use anyhow::Result;
use console::style;

use crate::store::{TranscriptionRecord, TranscriptionStatus};
use crate::utils::format_duration;

/// Format a single record for reading in a terminal
pub fn format_as_text(record: &TranscriptionRecord) -> String {
    let mut output = String::new();

    output.push_str(&format!("{}\n", style(&record.video_title).bold()));
    output.push_str(&format!("{}\n", style(&record.video_url).dim()));
    output.push_str(&format!(
        "ID: {}  Created: {}  Status: {}\n",
        record.id,
        record.created_at,
        status_label(record.status)
    ));

    if record.status == TranscriptionStatus::Failed {
        output.push_str(&format!("\n{} {}\n", style("Error:").red().bold(), record.error_message));
        return output;
    }

    output.push_str(&format!(
        "Method: {}  Duration: {}  Cost: ${:.4}  Tokens: {} in / {} out  Time: {:.1}s\n",
        record.transcript_method,
        format_duration(record.video_duration as f64),
        record.cost,
        record.input_tokens,
        record.output_tokens,
        record.processing_time_seconds
    ));

    if !record.summary.is_empty() {
        output.push_str(&format!("\n{}\n{}\n", style("Summary").cyan().bold(), record.summary));
    }

    if !record.key_points.is_empty() {
        output.push_str(&format!("\n{}\n", style("Key points").cyan().bold()));
        for point in &record.key_points {
            output.push_str(&format!("  • {}\n", point));
        }
    }

    output.push_str(&format!("\n{}\n{}\n", style("Transcript").cyan().bold(), record.cleaned_transcript));
    output
}

/// Format a single record as pretty JSON
pub fn format_as_json(record: &TranscriptionRecord) -> Result<String> {
    Ok(serde_json::to_string_pretty(record)?)
}

/// One line per record: id, creation time, status, cost and title
pub fn format_list_as_text(records: &[TranscriptionRecord]) -> String {
    if records.is_empty() {
        return "No transcriptions stored yet.\n".to_string();
    }

    records
        .iter()
        .map(|record| {
            format!(
                "{}  {}  {:<9}  ${:<8.4}  {}\n",
                style(&record.id).dim(),
                record.created_at,
                status_label(record.status),
                record.cost,
                record.video_title
            )
        })
        .collect()
}

pub fn format_list_as_json(records: &[TranscriptionRecord]) -> Result<String> {
    Ok(serde_json::to_string_pretty(records)?)
}

fn status_label(status: TranscriptionStatus) -> String {
    match status {
        TranscriptionStatus::Completed => style(status.as_str()).green().to_string(),
        TranscriptionStatus::Failed => style(status.as_str()).red().to_string(),
        TranscriptionStatus::Processing => style(status.as_str()).yellow().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> TranscriptionRecord {
        TranscriptionRecord {
            id: "4f1c".to_string(),
            created_at: "2024-05-01T10:00:00.000Z".to_string(),
            video_url: "https://www.youtube.com/watch?v=dQw4w9WgXcQ".to_string(),
            video_id: "dQw4w9WgXcQ".to_string(),
            video_title: "Never Gonna Give You Up".to_string(),
            video_duration: 212,
            raw_transcript: "raw".to_string(),
            cleaned_transcript: "We're no strangers to love.".to_string(),
            summary: "A song about commitment.".to_string(),
            key_points: vec!["Never gives you up".to_string(), "Never lets you down".to_string()],
            transcript_method: "youtube-captions".to_string(),
            input_tokens: 120,
            output_tokens: 40,
            cost: 0.00096,
            processing_time_seconds: 2.5,
            status: TranscriptionStatus::Completed,
            error_message: String::new(),
        }
    }

    #[test]
    fn test_text_contains_sections() {
        let text = console::strip_ansi_codes(&format_as_text(&record())).to_string();
        assert!(text.starts_with("Never Gonna Give You Up\n"));
        assert!(text.contains("Duration: 3m 32s"));
        assert!(text.contains("Cost: $0.0010"));
        assert!(text.contains("  • Never lets you down\n"));
        assert!(text.contains("Transcript\nWe're no strangers to love.\n"));
    }

    #[test]
    fn test_failed_record_shows_error_only() {
        let failed = TranscriptionRecord {
            status: TranscriptionStatus::Failed,
            error_message: "no transcript source succeeded".to_string(),
            summary: String::new(),
            ..record()
        };
        let text = console::strip_ansi_codes(&format_as_text(&failed)).to_string();
        assert!(text.contains("Error: no transcript source succeeded"));
        assert!(!text.contains("Transcript\n"));
    }

    #[test]
    fn test_json_keeps_key_points_array() {
        let json: serde_json::Value = serde_json::from_str(&format_as_json(&record()).unwrap()).unwrap();
        assert_eq!(json["key_points"].as_array().unwrap().len(), 2);
        assert_eq!(json["status"], "completed");
    }

    #[test]
    fn test_list_formats() {
        assert_eq!(format_list_as_text(&[]), "No transcriptions stored yet.\n");

        let text = console::strip_ansi_codes(&format_list_as_text(&[record(), record()])).to_string();
        assert_eq!(text.lines().count(), 2);
        assert!(text.contains("completed"));

        let json: serde_json::Value = serde_json::from_str(&format_list_as_json(&[record()]).unwrap()).unwrap();
        assert!(json.is_array());
    }
}
