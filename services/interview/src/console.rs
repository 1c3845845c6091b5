use crate::render;
use interview_core::session_state::Phase;
use interview_core::{Command, Input};

pub const HELP: &str = "\
Commands:
  /mic    start or stop voice capture
  /end    finish the interview and get feedback
  /reset  abandon the interview and start over
  /quit   leave
Anything else is your answer (or, before an interview, the role).";

/// What a typed line asks for.
#[derive(Debug, Clone, PartialEq)]
pub enum LineAction {
    Send(Input),
    Quit,
    Help,
    /// Nothing to send; show this hint instead.
    Hint(&'static str),
    Ignore,
}

/// Interprets a line typed while the session is in `phase`.
pub fn parse_line(line: &str, phase: Phase, question_limit: u32) -> LineAction {
    let line = line.trim();
    if line.is_empty() {
        return LineAction::Ignore;
    }

    if let Some(command) = line.strip_prefix('/') {
        return match command.trim().to_ascii_lowercase().as_str() {
            "quit" | "exit" | "q" => LineAction::Quit,
            "help" | "?" => LineAction::Help,
            "mic" => LineAction::Send(Input::ToggleCapture),
            "end" => LineAction::Send(Input::EndSession),
            "reset" => LineAction::Send(Input::ResetSession),
            _ => LineAction::Hint("Unknown command. Type /help for the list."),
        };
    }

    match phase {
        Phase::Idle | Phase::Failed => LineAction::Send(Input::SubmitRole {
            role: line.to_string(),
            question_limit,
        }),
        Phase::Active => LineAction::Send(Input::SubmitTurn(line.to_string())),
        Phase::Starting | Phase::Ending => LineAction::Hint("One moment, please..."),
        Phase::Feedback => {
            LineAction::Hint("Type /reset to start a new interview or /quit to leave.")
        }
    }
}

/// The console output for a session command, if it has any.
pub fn describe(command: &Command) -> Option<String> {
    match command {
        Command::PhaseChanged(phase) => match phase {
            Phase::Idle => Some("What role are you interviewing for?".to_string()),
            Phase::Starting => Some("Starting your interview...".to_string()),
            Phase::Ending => Some("Analyzing your interview...".to_string()),
            Phase::Failed => {
                Some("The interview could not start. Type a role to retry.".to_string())
            }
            Phase::Active | Phase::Feedback => None,
        },
        Command::MessageAppended(message) if message.is_user() => None,
        Command::MessageAppended(message) => Some(render::format_message(message)),
        Command::PartialTranscript(text) => Some(format!("  ... {text}")),
        Command::Listening(true) => Some("[listening, type /mic to stop]".to_string()),
        Command::Listening(false) | Command::Speaking(_) => None,
        Command::ReportReady(report) => Some(render::format_report(report)),
        Command::Notice(notice) => Some(format!("! {notice}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use interview_core::message::Message;

    #[test]
    fn test_line_meaning_depends_on_phase() {
        assert_eq!(
            parse_line("Product Manager", Phase::Idle, 5),
            LineAction::Send(Input::SubmitRole {
                role: "Product Manager".to_string(),
                question_limit: 5
            })
        );
        assert_eq!(
            parse_line("  I ship things  ", Phase::Active, 5),
            LineAction::Send(Input::SubmitTurn("I ship things".to_string()))
        );
        assert!(matches!(parse_line("hello", Phase::Ending, 5), LineAction::Hint(_)));
        assert_eq!(parse_line("   ", Phase::Active, 5), LineAction::Ignore);
    }

    #[test]
    fn test_slash_commands() {
        assert_eq!(parse_line("/quit", Phase::Active, 5), LineAction::Quit);
        assert_eq!(
            parse_line("/MIC", Phase::Active, 5),
            LineAction::Send(Input::ToggleCapture)
        );
        assert_eq!(
            parse_line("/end", Phase::Active, 5),
            LineAction::Send(Input::EndSession)
        );
        assert_eq!(
            parse_line("/reset", Phase::Feedback, 5),
            LineAction::Send(Input::ResetSession)
        );
        assert!(matches!(parse_line("/dance", Phase::Idle, 5), LineAction::Hint(_)));
    }

    #[test]
    fn test_own_answers_are_not_echoed() {
        assert_eq!(describe(&Command::MessageAppended(Message::user("hi"))), None);
        assert_eq!(
            describe(&Command::MessageAppended(Message::assistant("Why?"))),
            Some("Interviewer: Why?".to_string())
        );
        assert_eq!(describe(&Command::Speaking(true)), None);
    }
}
