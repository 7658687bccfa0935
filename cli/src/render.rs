//! Terminal rendering of the meeting event stream.

use colored::Colorize;
use conclave_domain::{ErrorCode, EventKind, MeetingEvent, MessageRole};
use conclave_infrastructure::JsonlEventLog;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Consume the live event stream until the meeting reaches a terminal
/// state (or the channel closes), printing each event and appending it to
/// the JSONL log when one is configured.
pub async fn stream_events(
    mut events: broadcast::Receiver<MeetingEvent>,
    quiet: bool,
    event_log: Option<Arc<JsonlEventLog>>,
) {
    loop {
        match events.recv().await {
            Ok(event) => {
                if let Some(log) = &event_log {
                    log.log(&event);
                }
                if !quiet {
                    print_event(&event);
                }
                if is_terminal(&event) {
                    return;
                }
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                eprintln!("{}", format!("(stream lagged, {} events skipped)", missed).dimmed());
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

fn is_terminal(event: &MeetingEvent) -> bool {
    matches!(
        event.kind,
        EventKind::StateChanged { state, .. } if state.is_terminal()
    )
}

fn print_event(event: &MeetingEvent) {
    let stamp = event.at.format("%H:%M:%S").to_string().dimmed();
    match &event.kind {
        EventKind::StateChanged {
            state,
            round,
            stage_version,
        } => {
            println!(
                "{} {} {} (round {}, stage {})",
                stamp,
                "state".cyan().bold(),
                state,
                round,
                stage_version
            );
        }
        EventKind::MessageFinal { message } => {
            let speaker = match message.role {
                MessageRole::User => message.speaker_label().yellow().bold(),
                MessageRole::Agent => message.speaker_label().green().bold(),
                MessageRole::System => message.speaker_label().blue().bold(),
            };
            let provenance = message
                .meta
                .provider_request_id
                .as_deref()
                .filter(|id| id.starts_with("fallback:"))
                .map(|id| format!(" [{}]", id).dimmed().to_string())
                .unwrap_or_default();
            println!("{} {}{}: {}", stamp, speaker, provenance, message.content);
        }
        EventKind::FacilitatorOutput { round, output, .. } => {
            println!(
                "{} {} round {}: {}",
                stamp,
                "facilitator".blue().bold(),
                round,
                output.round_summary
            );
        }
        EventKind::VoteSessionStarted { kind, attempt, .. } => {
            let label = match attempt {
                Some(n) => format!("{:?} vote started (attempt {})", kind, n),
                None => format!("{:?} vote started", kind),
            };
            println!("{} {}", stamp, label.magenta());
        }
        EventKind::VoteReceived { vote, .. } => {
            let verdict = if vote.pass {
                "pass".green()
            } else {
                "fail".red()
            };
            println!(
                "{} {} {} scored {} ({})",
                stamp,
                "vote".magenta().bold(),
                vote.voter_agent_id,
                vote.score,
                verdict
            );
        }
        EventKind::VoteSessionFinal {
            accepted,
            avg_score,
            reason,
            ..
        } => {
            let verdict = if *accepted {
                "accepted".green().bold()
            } else {
                "rejected".red().bold()
            };
            let avg = avg_score
                .map(|avg| format!(" avg={}", avg))
                .unwrap_or_default();
            println!("{} {} {}{} ({})", stamp, "session".magenta(), verdict, avg, reason);
        }
        EventKind::Error { code, message, .. } => {
            let label = match code {
                ErrorCode::AgentError => "agent error",
                ErrorCode::RunnerError => "runner error",
                ErrorCode::DiscussionEmptySkipVote => "empty round",
            };
            println!("{} {} {}", stamp, label.red().bold(), message);
        }
    }
}

/// Final one-line verdict after the run.
pub fn print_outcome(accepted: bool, reason: &str) {
    if accepted {
        println!("{} {}", "meeting accepted:".green().bold(), reason);
    } else {
        println!("{} {}", "meeting aborted:".red().bold(), reason);
    }
}
