use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;

use tabletalk_agent::{AgentRuntime, SessionServices, TurnReply};
use tabletalk_core::audit::TracingAuditSink;
use tabletalk_core::config::LoadOptions;
use tabletalk_core::execution::ExecutionOutput;
use tabletalk_core::suggestions::SuggestionSet;
use tracing::info;

use crate::commands::{load_config, CommandResult};

pub fn run(options: LoadOptions, script: Option<&Path>, session_id: &str) -> CommandResult {
    let config = match load_config("chat", options) {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => return CommandResult::failure("chat", "runtime", error.to_string(), 1),
    };

    runtime.block_on(async {
        let services = match SessionServices::from_config(&config) {
            Ok(services) => services,
            Err(error) => {
                return CommandResult::failure("chat", "startup", format!("{error:#}"), 3)
            }
        };
        let agent = AgentRuntime::from_config(&config, services)
            .with_audit(Arc::new(TracingAuditSink));
        info!(
            event_name = "chat.session_started",
            session_id = %session_id,
            translator = config.translator.provider.as_str(),
            scripted = script.is_some(),
            "chat session started"
        );

        match script {
            Some(path) => match tokio::fs::read_to_string(path).await {
                Ok(raw) => transcript(&agent, session_id, script_lines(&raw)).await,
                Err(error) => CommandResult::failure(
                    "chat",
                    "script_read",
                    format!("could not read {}: {error}", path.display()),
                    3,
                ),
            },
            None => interactive(&agent, session_id).await,
        }
    })
}

/// Non-empty lines that are not `#` comments.
fn script_lines(raw: &str) -> Vec<&str> {
    raw.lines().map(str::trim).filter(|line| !line.is_empty() && !line.starts_with('#')).collect()
}

pub async fn transcript(agent: &AgentRuntime, session_id: &str, lines: Vec<&str>) -> CommandResult {
    let mut output = Vec::with_capacity(lines.len() * 2);
    for line in lines {
        output.push(format!("> {line}"));
        match agent.handle_message(session_id, line).await {
            Ok(reply) => output.push(render_reply(&reply)),
            Err(error) => {
                output.push(format!("error: {error:#}"));
                return CommandResult { exit_code: 4, output: output.join("\n") };
            }
        }
    }
    CommandResult { exit_code: 0, output: output.join("\n") }
}

async fn interactive(agent: &AgentRuntime, session_id: &str) -> CommandResult {
    println!("TableTalk is listening. Describe what you want to do; type `exit` to leave.");
    let stdin = io::stdin();
    let mut input = stdin.lock().lines();
    loop {
        print!("> ");
        let _ = io::stdout().flush();

        let line = match input.next() {
            Some(Ok(line)) => line,
            Some(Err(error)) => {
                return CommandResult::failure("chat", "stdin", error.to_string(), 1);
            }
            None => break,
        };
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if matches!(text, "exit" | "quit") {
            break;
        }

        agent.expire_idle().await;
        match agent.handle_message(session_id, text).await {
            Ok(reply) => println!("{}", render_reply(&reply)),
            Err(error) => println!("error: {error:#}"),
        }
    }
    CommandResult::success("chat", "session ended")
}

pub fn render_reply(reply: &TurnReply) -> String {
    match reply {
        TurnReply::Prompt(prompt) => match &prompt.retry_reason {
            Some(reason) => format!("{reason}\n{}", prompt.prompt_text),
            None => prompt.prompt_text.clone(),
        },
        TurnReply::Rejected { reason, prompt } => match prompt {
            Some(prompt) => format!("Rejected: {reason}\n{}", prompt.prompt_text),
            None => format!("Rejected: {reason}"),
        },
        TurnReply::Completed { summary, output, suggestions } => {
            let mut lines = vec![format!("Done: {summary}")];
            if let ExecutionOutput::RecordSet(rows) = output {
                for row in rows {
                    let columns = row
                        .iter()
                        .map(|(field, value)| format!("{field}={value}"))
                        .collect::<Vec<_>>();
                    lines.push(format!("  {}", columns.join(", ")));
                }
            }
            lines.extend(render_suggestions(suggestions));
            lines.join("\n")
        }
        TurnReply::Failed { reason } => format!("Failed: {}", reason.describe()),
        TurnReply::Denied { message } => format!("Denied: {message}"),
        TurnReply::Cancelled { summary } => summary.clone(),
    }
}

fn render_suggestions(suggestions: &SuggestionSet) -> Vec<String> {
    if suggestions.is_empty() {
        return Vec::new();
    }
    let mut lines = vec!["Suggestions:".to_string()];
    for suggestion in &suggestions.field_suggestions {
        lines.push(format!(
            "  - {} usually `{}` ({})",
            suggestion.field_name,
            suggestion.suggested_value,
            suggestion.level.display_percentage(suggestion.confidence)
        ));
    }
    for follow_up in &suggestions.follow_up_operations {
        lines.push(format!("  - {}", follow_up.description));
    }
    lines
}

#[cfg(test)]
mod tests {
    use tabletalk_core::flows::FailureReason;

    use super::{render_reply, script_lines};
    use tabletalk_agent::TurnReply;

    #[test]
    fn script_skips_blank_lines_and_comments() {
        let raw = "# hire someone\nadd employee named Ada\n\n  Research  \n";
        assert_eq!(script_lines(raw), vec!["add employee named Ada", "Research"]);
    }

    #[test]
    fn failures_render_their_reason() {
        let reply = TurnReply::Failed { reason: FailureReason::UserCancelled };
        assert_eq!(render_reply(&reply), "Failed: cancelled by user");
        let denied = TurnReply::Denied { message: "Deleting is disabled.".to_string() };
        assert_eq!(render_reply(&denied), "Denied: Deleting is disabled.");
    }
}
