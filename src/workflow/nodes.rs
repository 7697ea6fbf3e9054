//! Node functions of the mediation graph.
//!
//! Each node inspects the workflow record, performs one transformation,
//! and names the next step. The driver owns the loop.

use anyhow::{bail, Result};

use crate::exec::{CommandExecutor, ExecutionResult};
use crate::interact::Interact;
use crate::safety::{self, DangerVerdict};
use crate::translate::{Candidate, CandidateMode, TranslateKind, Translator};
use crate::workflow::{ApprovalDecision, Source, Step, WorkflowState};

use super::driver::WorkflowOptions;

/// Select the path by the populated input kind. Exactly one of
/// natural-language request, (failed command, error) pair, or direct
/// command must be set; anything else is malformed.
pub fn route(state: &WorkflowState) -> Result<Step> {
    let request = &state.request;
    let has_request = request.user_request.is_some();
    let has_failure = request.failed_command.is_some() || request.error_text.is_some();
    let has_direct = request.direct_command.is_some();

    let populated = [has_request, has_failure, has_direct]
        .iter()
        .filter(|p| **p)
        .count();
    if populated != 1 {
        bail!(
            "Provide exactly one of: a natural-language request, a failing command \
             with its error, or a direct command"
        );
    }

    if has_request {
        return Ok(Step::FromRequest);
    }
    if has_failure {
        if request.failed_command.is_none() || request.error_text.is_none() {
            bail!("A repair request needs both the failing command and its error output");
        }
        return Ok(Step::FromError);
    }
    Ok(Step::FromDirect)
}

pub fn from_request(state: &mut WorkflowState, translator: &Translator) -> Step {
    let request = state.request.user_request.clone().unwrap_or_default();
    state.candidate = Some(translator.translate(TranslateKind::Request { request: &request }));
    Step::DangerCheck
}

/// Translate a failure into a corrected candidate. Prefers the failure
/// recorded by the run node (the repair loop) over the original request
/// fields (the one-shot fix path).
pub fn from_error(state: &mut WorkflowState, translator: &Translator) -> Step {
    let command = state
        .last_command
        .clone()
        .or_else(|| state.request.failed_command.clone())
        .unwrap_or_default();
    let error = state
        .last_error
        .clone()
        .or_else(|| state.request.error_text.clone())
        .unwrap_or_default();
    let intent = state
        .request
        .intent
        .clone()
        .or_else(|| state.request.user_request.clone())
        .unwrap_or_default();

    // The candidate is translated from here on, even when the failing
    // command was typed directly; the approval gate applies to it.
    state.source = Source::Translated;
    state.candidate = Some(translator.translate(TranslateKind::Error {
        command: &command,
        error: &error,
        intent: &intent,
    }));
    Step::DangerCheck
}

/// Pass a directly-typed command straight to execution.
pub fn from_direct(state: &mut WorkflowState) -> Step {
    let command = state
        .request
        .direct_command
        .clone()
        .unwrap_or_default()
        .trim()
        .to_string();
    state.source = Source::Direct;
    state.candidate = Some(Candidate {
        command,
        explanation: "Direct command".to_string(),
        mode: CandidateMode::Run,
    });
    Step::Run
}

/// Classify the candidate command, then augment the verdict with intent
/// and explanation signals from the surrounding request.
pub fn danger_check(state: &mut WorkflowState) -> Step {
    let command = state.candidate_command();
    let verdict = if command.trim().is_empty() {
        DangerVerdict::flagged("No command generated")
    } else {
        safety::classify(command)
    };

    let request = state.request.user_request.clone().unwrap_or_default();
    let explanation = state.candidate_explanation().to_string();
    state.verdict = Some(safety::augment(verdict, &request, &explanation));
    Step::ApprovalGate
}

pub fn approval_gate(
    state: &mut WorkflowState,
    interact: &mut dyn Interact,
    quiet: bool,
) -> Step {
    if state.source == Source::Direct {
        state.approval = Some(ApprovalDecision::Auto);
        return Step::Run;
    }

    let mode = state
        .candidate
        .as_ref()
        .map(|c| c.mode)
        .unwrap_or(CandidateMode::Explain);
    if mode == CandidateMode::Explain {
        state.approval = Some(ApprovalDecision::Cancelled);
        return Step::End;
    }

    // Unresolved template placeholders never run.
    let command = state.candidate_command().trim().to_string();
    if !command.is_empty() && command.contains('<') && command.contains('>') {
        if let Some(candidate) = state.candidate.as_mut() {
            candidate.mode = CandidateMode::Explain;
            if candidate.explanation.is_empty() {
                candidate.explanation = "The proposed command includes placeholders (e.g., \
                                         <...>). Replace them with real values and run again."
                    .to_string();
            }
        }
        state.approval = Some(ApprovalDecision::Cancelled);
        return Step::End;
    }

    let dangerous = state.verdict.as_ref().map(|v| v.dangerous).unwrap_or(false);
    if !dangerous {
        if !quiet && !state.candidate_explanation().is_empty() {
            interact.say(&format!("\nCommand: $ {}", command));
            interact.say(&format!("↳ {}", state.candidate_explanation()));
        }
        state.approval = Some(ApprovalDecision::Auto);
        return Step::Run;
    }

    interact.say("\n=== DANGEROUS COMMAND ===");
    interact.say(&format!("$ {}", command));
    if !state.candidate_explanation().is_empty() {
        interact.say(&format!("↳ {}", state.candidate_explanation()));
    }
    if let Some(verdict) = &state.verdict {
        if !verdict.reasons.is_empty() {
            interact.say("Reasons:");
            for reason in &verdict.reasons {
                interact.say(&format!(" - {}", reason));
            }
        }
    }

    let answer = interact
        .prompt_line("Run this command? [y/N] (y to run, n to cancel, e to replan): ")
        .unwrap_or_default()
        .to_lowercase();
    match answer.as_str() {
        "y" | "yes" => {
            state.approval = Some(ApprovalDecision::Approved);
            Step::Run
        }
        "e" => {
            let feedback = interact
                .prompt_line(
                    "Describe adjustments for a safer alternative (or leave blank to skip): ",
                )
                .unwrap_or_default();
            state.approval = Some(ApprovalDecision::Rejected { feedback });
            Step::Replan
        }
        _ => {
            state.approval = Some(ApprovalDecision::Cancelled);
            Step::End
        }
    }
}

/// Re-invoke translation with the prior candidate and the human's
/// feedback, then re-enter the danger check. This can loop for as long
/// as the human keeps rejecting.
pub fn replan(state: &mut WorkflowState, translator: &Translator) -> Step {
    let command = state.candidate_command().to_string();
    let feedback = match state.approval.as_ref() {
        Some(ApprovalDecision::Rejected { feedback }) if !feedback.is_empty() => feedback.clone(),
        _ => "Safer alternative".to_string(),
    };

    state.candidate = Some(translator.translate(TranslateKind::Replan {
        command: &command,
        feedback: &feedback,
    }));
    Step::DangerCheck
}

pub fn run(
    state: &mut WorkflowState,
    executor: &dyn CommandExecutor,
    options: &WorkflowOptions,
    interact: &mut dyn Interact,
) -> Result<Step> {
    let command = state.candidate_command().to_string();
    if command.is_empty() {
        state.result = Some(ExecutionResult {
            exit_code: 1,
            stdout: String::new(),
            stderr: "No command to run.".to_string(),
        });
        return Ok(Step::ErrorDecision);
    }

    if options.dry_run {
        interact.say(&format!("\n[dry-run] Would execute: $ {}", command));
        state.result = Some(ExecutionResult::dry_run());
        return Ok(Step::End);
    }

    interact.say(&format!("\n[run] $ {}", command));
    let result = executor.run(&command)?;

    if !options.quiet {
        interact.say(&format!("-- stdout --\n{}", result.stdout));
        if !result.stderr.is_empty() {
            interact.say(&format!("-- stderr --\n{}", result.stderr));
        }
    }

    let next = if result.success() {
        Step::End
    } else {
        state.last_command = Some(command);
        state.last_error = Some(if result.stderr.is_empty() {
            "(no stderr captured)".to_string()
        } else {
            result.stderr.clone()
        });
        Step::ErrorDecision
    };
    state.result = Some(result);
    Ok(next)
}

/// Decide whether a failed run feeds the repair path. Non-interactive
/// contexts always stop: no silent auto-fix loops in scripted use.
pub fn error_decision(
    state: &WorkflowState,
    interact: &mut dyn Interact,
    interactive: bool,
) -> Step {
    debug_assert!(state.result.is_some());
    if !interactive {
        return Step::End;
    }

    interact.say("The last command failed.");
    loop {
        let answer = interact
            .prompt_line("Ask the AI to suggest a fix? [y/N]: ")
            .unwrap_or_else(|| "n".to_string())
            .to_lowercase();
        match answer.as_str() {
            "y" | "yes" => return Step::FromError,
            "n" | "no" | "" => return Step::End,
            _ => interact.say("Please answer 'y' or 'n'."),
        }
    }
}
