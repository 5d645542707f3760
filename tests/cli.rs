use assert_cmd::Command;
use predicates::prelude::*;

fn tubescribe() -> Command {
    Command::cargo_bin("tubescribe").unwrap()
}

#[test]
fn platforms_lists_tiers_in_order() {
    tubescribe()
        .arg("platforms")
        .assert()
        .success()
        .stdout(predicate::str::contains("YouTube"))
        .stdout(predicate::str::contains("1. Published YouTube captions"))
        .stdout(predicate::str::contains("3. Speech-to-text"));
}

#[test]
fn classify_short_link_prints_canonical_url() {
    tubescribe()
        .args(["classify", "https://youtu.be/dQw4w9WgXcQ"])
        .assert()
        .success()
        .stdout(predicate::str::contains("dQw4w9WgXcQ"))
        .stdout(predicate::str::contains("https://www.youtube.com/watch?v=dQw4w9WgXcQ"));
}

#[test]
fn classify_direct_audio() {
    tubescribe()
        .args(["classify", "https://cdn.example.com/episodes/ep42.mp3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Direct audio file"));
}

#[test]
fn classify_unsupported_fails() {
    tubescribe()
        .args(["classify", "https://example.com/about"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unsupported URL"));
}

#[test]
fn unknown_output_format_is_rejected() {
    tubescribe()
        .args(["transcribe", "https://youtu.be/dQw4w9WgXcQ", "--format", "srt"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"));
}

#[test]
fn help_lists_subcommands() {
    tubescribe()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("transcribe"))
        .stdout(predicate::str::contains("classify"));
}
