//! Plain-text rendering of reports, transcripts and saved interviews.

use interview_core::message::{Message, Role};
use interview_core::report::FeedbackReport;
use interview_core::store::{InterviewRecord, InterviewSummary};
use std::fmt::Write;

const BAR_WIDTH: usize = 20;

pub fn format_report(report: &FeedbackReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== Interview Feedback ===");
    let _ = writeln!(out, "Overall score: {}/100", report.overall_score);
    if !report.summary.is_empty() {
        let _ = writeln!(out, "\n{}", report.summary);
    }

    if !report.skills.is_empty() {
        let _ = writeln!(out, "\nSkills:");
        let width = report.skills.iter().map(|s| s.name.len()).max().unwrap_or(0);
        for skill in &report.skills {
            let _ = writeln!(
                out,
                "  {:<width$}  {} {:>3}",
                skill.name,
                bar(skill.score),
                skill.score
            );
        }
    }

    if !report.key_highlights.is_empty() {
        let _ = writeln!(out, "\nKey highlights:");
        for highlight in &report.key_highlights {
            let _ = writeln!(out, "  * {highlight}");
        }
    }

    for section in &report.detailed_feedback {
        let _ = writeln!(out, "\n{}:", section.category);
        for point in &section.points {
            let _ = writeln!(out, "  - {point}");
        }
    }

    out
}

pub fn format_message(message: &Message) -> String {
    let speaker = match message.role {
        Role::User => "You",
        Role::Assistant if message.error => "!",
        Role::Assistant => "Interviewer",
    };
    format!("{speaker}: {}", message.text)
}

pub fn format_transcript(transcript: &[Message]) -> String {
    transcript
        .iter()
        .map(format_message)
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_summary(summary: &InterviewSummary) -> String {
    format!(
        "#{:<4} {}  {:>3}/100  {}",
        summary.id,
        summary.date.format("%Y-%m-%d %H:%M"),
        summary.score,
        summary.topic
    )
}

pub fn format_record(record: &InterviewRecord) -> String {
    format!(
        "{}\n\n{}\n=== Transcript ===\n{}\n",
        format_summary(&record.summary()),
        format_report(&record.feedback),
        format_transcript(&record.transcript)
    )
}

fn bar(score: u8) -> String {
    let filled = usize::from(score.min(100)) * BAR_WIDTH / 100;
    format!("[{}{}]", "#".repeat(filled), ".".repeat(BAR_WIDTH - filled))
}
