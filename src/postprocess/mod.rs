//! Transcript cleanup and summarization.
//!
//! A single fixed prompt asks the text generator for a JSON object with a summary, key
//! points and the cleaned transcript, in that order, so a reply cut off at the output token
//! limit still carries the short fields. Cut-off JSON replies are salvaged field by field;
//! anything else falls back to line heuristics so a usable record is still produced.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

pub mod anthropic;

pub use anthropic::AnthropicClient;

use crate::config::LlmConfig;
use crate::Result;

const MAX_KEY_POINTS: usize = 5;
const SUMMARY_LINES: usize = 3;

static BULLET: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(?:[-*•]|\d+[.)])\s+(.+)$").unwrap());

/// Raw output of one generation call
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// The reply stopped at the output token limit
    pub truncated: bool,
}

/// A text-generation API
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<Generation>;

    /// Fail fast when credentials are missing
    fn ensure_ready(&self) -> Result<()> {
        Ok(())
    }
}

/// Cleaned transcript, summary and the cost of producing them
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessedContent {
    pub cleaned_transcript: String,
    pub summary: String,
    pub key_points: Vec<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
}

#[derive(Debug, Default, Deserialize)]
struct StructuredReply {
    #[serde(default)]
    cleaned_transcript: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    key_points: Option<Vec<Value>>,
}

pub struct PostProcessor {
    generator: Arc<dyn TextGenerator>,
    input_rate_per_million: f64,
    output_rate_per_million: f64,
    max_transcript_chars: usize,
}

impl PostProcessor {
    pub fn new(generator: Arc<dyn TextGenerator>, config: &LlmConfig) -> Self {
        Self {
            generator,
            input_rate_per_million: config.input_rate_per_million,
            output_rate_per_million: config.output_rate_per_million,
            max_transcript_chars: config.transcript_char_budget(),
        }
    }

    pub fn ensure_ready(&self) -> Result<()> {
        self.generator.ensure_ready()
    }

    /// Clean up and summarize `raw_transcript`
    pub async fn process(&self, raw_transcript: &str, title: Option<&str>) -> Result<ProcessedContent> {
        let transcript = truncate_chars(raw_transcript, self.max_transcript_chars);
        if transcript.len() < raw_transcript.len() {
            tracing::warn!(
                limit = self.max_transcript_chars,
                "Transcript truncated before text generation"
            );
        }

        let generation = self.generator.generate(&build_prompt(transcript, title)).await?;
        if generation.truncated {
            tracing::warn!(
                output_tokens = generation.output_tokens,
                "Generation reply hit the output token limit"
            );
        }
        let (cleaned_transcript, summary, key_points) = parse_reply(&generation.text, raw_transcript);

        Ok(ProcessedContent {
            cleaned_transcript,
            summary,
            key_points,
            input_tokens: generation.input_tokens,
            output_tokens: generation.output_tokens,
            cost: generation_cost(
                generation.input_tokens,
                generation.output_tokens,
                self.input_rate_per_million,
                self.output_rate_per_million,
            ),
        })
    }
}

pub fn build_prompt(transcript: &str, title: Option<&str>) -> String {
    let title_line = title
        .filter(|t| !t.trim().is_empty())
        .map(|t| format!("Title: {}\n\n", t.trim()))
        .unwrap_or_default();

    format!(
        "You are given the raw transcript of a video or podcast. It may lack punctuation, \
contain filler words, repeated phrases and transcription errors.\n\n\
{title_line}Transcript:\n<transcript>\n{transcript}\n</transcript>\n\n\
Respond with a single JSON object and nothing else, using exactly these keys in this order:\n\
{{\n  \"summary\": \"a concise summary of two to four sentences\",\n  \
\"key_points\": [\"three to five short key takeaways\"],\n  \
\"cleaned_transcript\": \"the transcript with punctuation, paragraphs and obvious errors fixed, \
without changing its meaning\"\n}}"
    )
}

/// Dollars for a generation call at per-million-token rates
pub fn generation_cost(input_tokens: u64, output_tokens: u64, input_rate: f64, output_rate: f64) -> f64 {
    (input_tokens as f64 * input_rate + output_tokens as f64 * output_rate) / 1_000_000.0
}

/// Split a reply into `(cleaned_transcript, summary, key_points)`
pub fn parse_reply(reply: &str, raw_transcript: &str) -> (String, String, Vec<String>) {
    if let Some(parsed) = extract_json_object(reply)
        .and_then(|json| serde_json::from_str::<StructuredReply>(json).ok())
    {
        let cleaned = parsed
            .cleaned_transcript
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| raw_transcript.to_string());

        let key_points = parsed
            .key_points
            .unwrap_or_default()
            .into_iter()
            .filter_map(|point| match point {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .filter(|s| !s.is_empty())
            .collect();

        return (cleaned, parsed.summary.unwrap_or_default().trim().to_string(), key_points);
    }

    if looks_like_json(reply) {
        tracing::warn!("Generation reply is incomplete JSON, recovering finished fields");
        return recover_fields(reply, raw_transcript);
    }

    tracing::warn!("Generation reply was not valid JSON, using line heuristics");
    let (summary, key_points) = heuristic_sections(reply);
    (raw_transcript.to_string(), summary, key_points)
}

/// An object opening with a quoted key, whether or not it was ever closed
fn looks_like_json(reply: &str) -> bool {
    reply
        .find('{')
        .map(|start| reply[start + 1..].trim_start().starts_with('"'))
        .unwrap_or(false)
}

/// Pull string fields out of a reply that stopped mid-object.
///
/// A cleaned transcript is only kept when its closing quote was reached; a partial summary is
/// still a summary.
fn recover_fields(reply: &str, raw_transcript: &str) -> (String, String, Vec<String>) {
    let cleaned = string_field(reply, "cleaned_transcript")
        .filter(|(_, closed)| *closed)
        .map(|(text, _)| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .unwrap_or_else(|| raw_transcript.to_string());

    let summary = string_field(reply, "summary")
        .map(|(text, _)| text.trim().to_string())
        .unwrap_or_default();

    let key_points = string_array_field(reply, "key_points")
        .into_iter()
        .map(|point| point.trim().to_string())
        .filter(|point| !point.is_empty())
        .collect();

    (cleaned, summary, key_points)
}

/// Whatever follows `"key":`
fn value_after_key<'a>(reply: &'a str, key: &str) -> Option<&'a str> {
    let needle = format!("\"{}\"", key);
    let start = reply.find(&needle)? + needle.len();
    let rest = reply[start..].trim_start().strip_prefix(':')?;
    Some(rest.trim_start())
}

fn string_field(reply: &str, key: &str) -> Option<(String, bool)> {
    let body = value_after_key(reply, key)?.strip_prefix('"')?;
    let (text, end) = read_json_string(body);
    Some((text, end.is_some()))
}

/// Every fully quoted item of `"key": [...]`
fn string_array_field(reply: &str, key: &str) -> Vec<String> {
    let Some(mut rest) = value_after_key(reply, key).and_then(|v| v.strip_prefix('[')) else {
        return Vec::new();
    };

    let mut items = Vec::new();
    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == ',');
        let Some(body) = rest.strip_prefix('"') else {
            break;
        };
        match read_json_string(body) {
            (item, Some(end)) => {
                items.push(item);
                rest = &body[end..];
            }
            (_, None) => break,
        }
    }
    items
}

/// Decode a JSON string body. Returns the text and, when the closing quote was found, the
/// byte offset just past it.
fn read_json_string(body: &str) -> (String, Option<usize>) {
    let mut out = String::new();
    let mut chars = body.char_indices();

    while let Some((idx, c)) = chars.next() {
        match c {
            '"' => return (out, Some(idx + 1)),
            '\\' => match chars.next().map(|(_, escaped)| escaped) {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some('b') | Some('f') => {}
                Some('u') => {
                    let hex: String = chars.by_ref().take(4).map(|(_, h)| h).collect();
                    let Ok(code) = u32::from_str_radix(&hex, 16) else {
                        break;
                    };
                    if (0xD800..0xDC00).contains(&code) {
                        // High surrogate; the low half follows as another \uXXXX
                        let low: String = chars.by_ref().skip(2).take(4).map(|(_, h)| h).collect();
                        match u32::from_str_radix(&low, 16) {
                            Ok(low) if (0xDC00..0xE000).contains(&low) => {
                                let combined = 0x10000 + ((code - 0xD800) << 10) + (low - 0xDC00);
                                out.push(char::from_u32(combined).unwrap_or(char::REPLACEMENT_CHARACTER));
                            }
                            _ => break,
                        }
                    } else {
                        out.push(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER));
                    }
                }
                Some(other) => out.push(other),
                None => break,
            },
            c => out.push(c),
        }
    }

    (out, None)
}

/// Outermost `{...}` in the reply, ignoring code fences and surrounding prose
fn extract_json_object(reply: &str) -> Option<&str> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    (end > start).then(|| &reply[start..=end])
}

fn heuristic_sections(reply: &str) -> (String, Vec<String>) {
    let mut summary_lines = Vec::new();
    let mut key_points = Vec::new();

    for line in reply.lines().map(str::trim) {
        if line.is_empty() || line.starts_with("```") {
            continue;
        }

        if let Some(captures) = BULLET.captures(line) {
            if key_points.len() < MAX_KEY_POINTS {
                key_points.push(captures[1].trim().to_string());
            }
        } else if summary_lines.len() < SUMMARY_LINES {
            summary_lines.push(line);
        }
    }

    (summary_lines.join(" "), key_points)
}

/// At most `max_chars` characters of `text`, on a char boundary
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
