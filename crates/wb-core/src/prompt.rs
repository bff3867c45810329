//! Terminal decision gateway for the `workbench` binary

use async_trait::async_trait;
use std::io::{BufRead, Write};
use wb_kernel::{Decision, DecisionGateway, DecisionRequest};

/// Asks the operator on stderr/stdin what to do with a failed unit
///
/// An empty answer, end of input, or no answer before the scheduler's
/// decision timeout selects the request's default.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptGateway;

#[async_trait]
impl DecisionGateway for PromptGateway {
    async fn decide(&self, request: &DecisionRequest) -> Decision {
        let prompt = format!(
            "{} failed (attempt {}, {} error): {}\n[r]etry / [a]bort / abort and roll[b]ack? (default {}, {} retries left) ",
            request.unit_name,
            request.attempt,
            request.class(),
            request.error,
            request.default,
            request.retries_left,
        );
        let default = request.default;
        match tokio::task::spawn_blocking(move || ask(&prompt)).await {
            Ok(Some(decision)) => decision,
            _ => default,
        }
    }
}

fn ask(prompt: &str) -> Option<Decision> {
    let mut stderr = std::io::stderr().lock();
    let _ = stderr.write_all(prompt.as_bytes());
    let _ = stderr.flush();
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line).ok()?;
    parse_decision(&line)
}

/// Parse an operator answer; `None` for empty or unrecognized input
#[must_use]
pub fn parse_decision(answer: &str) -> Option<Decision> {
    match answer.trim().to_ascii_lowercase().as_str() {
        "r" | "retry" => Some(Decision::Retry),
        "a" | "abort" => Some(Decision::Abort),
        "b" | "rollback" | "abort-and-rollback" => Some(Decision::AbortAndRollback),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answers() {
        assert_eq!(parse_decision(" R\n"), Some(Decision::Retry));
        assert_eq!(parse_decision("abort"), Some(Decision::Abort));
        assert_eq!(parse_decision("b"), Some(Decision::AbortAndRollback));
        assert_eq!(parse_decision(""), None);
        assert_eq!(parse_decision("maybe"), None);
    }
}
