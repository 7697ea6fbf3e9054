//! Outer driver of the mediation graph.

use anyhow::Result;

use crate::exec::{CommandExecutor, ExecutionResult};
use crate::interact::Interact;
use crate::safety::DangerVerdict;
use crate::translate::{Candidate, Translator};
use crate::workflow::{nodes, ApprovalDecision, MediationRequest, Step, WorkflowState};

/// Runtime flags for one workflow invocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkflowOptions {
    /// Print what would run instead of executing.
    pub dry_run: bool,
    /// Suppress command echo and captured output.
    pub quiet: bool,
    /// Whether a human is present to drive the repair path.
    pub interactive: bool,
}

/// Everything the caller may want to summarize after the workflow ends.
#[derive(Debug, Clone, Default)]
pub struct Outcome {
    pub candidate: Option<Candidate>,
    pub verdict: Option<DangerVerdict>,
    pub approval: Option<ApprovalDecision>,
    pub result: Option<ExecutionResult>,
}

/// The mediation workflow with its injected collaborators.
pub struct Workflow<'a> {
    translator: &'a Translator,
    executor: &'a dyn CommandExecutor,
    interact: &'a mut dyn Interact,
    options: WorkflowOptions,
}

impl<'a> Workflow<'a> {
    pub fn new(
        translator: &'a Translator,
        executor: &'a dyn CommandExecutor,
        interact: &'a mut dyn Interact,
        options: WorkflowOptions,
    ) -> Self {
        Self {
            translator,
            executor,
            interact,
            options,
        }
    }

    /// Drive the request to a terminal state. Fails only on malformed
    /// requests and executor spawn faults; translation faults and
    /// non-zero exits are ordinary workflow data.
    pub fn run(&mut self, request: MediationRequest) -> Result<Outcome> {
        let mut state = WorkflowState::new(request);
        let mut step = Step::Route;

        loop {
            tracing::trace!("workflow step: {:?}", step);
            step = match step {
                Step::Route => nodes::route(&state)?,
                Step::FromRequest => nodes::from_request(&mut state, self.translator),
                Step::FromError => nodes::from_error(&mut state, self.translator),
                Step::FromDirect => nodes::from_direct(&mut state),
                Step::DangerCheck => nodes::danger_check(&mut state),
                Step::ApprovalGate => {
                    nodes::approval_gate(&mut state, self.interact, self.options.quiet)
                }
                Step::Replan => nodes::replan(&mut state, self.translator),
                Step::Run => nodes::run(&mut state, self.executor, &self.options, self.interact)?,
                Step::ErrorDecision => {
                    nodes::error_decision(&state, self.interact, self.options.interactive)
                }
                Step::End => break,
            };
        }

        Ok(Outcome {
            candidate: state.candidate,
            verdict: state.verdict,
            approval: state.approval,
            result: state.result,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interact::testing::ScriptedInteract;
    use crate::translate::TextCompletion;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    struct FakeTransport {
        responses: Mutex<Vec<String>>,
        calls: AtomicUsize,
    }

    impl FakeTransport {
        fn new(responses: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.iter().map(|s| s.to_string()).collect()),
                calls: AtomicUsize::new(0),
            })
        }

        fn none() -> Arc<Self> {
            Self::new(&[])
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl TextCompletion for FakeTransport {
        fn complete(&self, _prompt: &str) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                anyhow::bail!("unexpected translation call");
            }
            Ok(responses.remove(0))
        }
    }

    #[derive(Default)]
    struct FakeExecutor {
        results: Mutex<Vec<ExecutionResult>>,
        commands: Mutex<Vec<String>>,
    }

    impl FakeExecutor {
        fn with_results(results: Vec<ExecutionResult>) -> Self {
            Self {
                results: Mutex::new(results),
                commands: Mutex::new(Vec::new()),
            }
        }

        fn executed(&self) -> Vec<String> {
            self.commands.lock().unwrap().clone()
        }
    }

    impl CommandExecutor for FakeExecutor {
        fn run(&self, command: &str) -> anyhow::Result<ExecutionResult> {
            self.commands.lock().unwrap().push(command.to_string());
            let mut results = self.results.lock().unwrap();
            if results.is_empty() {
                Ok(ExecutionResult::default())
            } else {
                Ok(results.remove(0))
            }
        }
    }

    fn ok_result() -> ExecutionResult {
        ExecutionResult::default()
    }

    fn failed_result(exit_code: i32, stderr: &str) -> ExecutionResult {
        ExecutionResult {
            exit_code,
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    fn translator(transport: Arc<FakeTransport>) -> Translator {
        Translator::new(transport, Duration::from_secs(5), false)
    }

    #[test]
    fn test_route_rejects_multiple_inputs() {
        let transport = FakeTransport::none();
        let tr = translator(transport.clone());
        let executor = FakeExecutor::default();
        let mut interact = ScriptedInteract::default();
        let mut workflow =
            Workflow::new(&tr, &executor, &mut interact, WorkflowOptions::default());

        let mut request = MediationRequest::from_request("list files");
        request.direct_command = Some("ls".to_string());

        let err = workflow.run(request).unwrap_err();
        assert!(err.to_string().contains("exactly one"));
        // Rejected before any translation or classification.
        assert_eq!(transport.call_count(), 0);
        assert!(executor.executed().is_empty());
    }

    #[test]
    fn test_route_rejects_empty_request() {
        let transport = FakeTransport::none();
        let tr = translator(transport);
        let executor = FakeExecutor::default();
        let mut interact = ScriptedInteract::default();
        let mut workflow =
            Workflow::new(&tr, &executor, &mut interact, WorkflowOptions::default());

        assert!(workflow.run(MediationRequest::default()).is_err());
    }

    #[test]
    fn test_route_rejects_failure_without_error_text() {
        let transport = FakeTransport::none();
        let tr = translator(transport);
        let executor = FakeExecutor::default();
        let mut interact = ScriptedInteract::default();
        let mut workflow =
            Workflow::new(&tr, &executor, &mut interact, WorkflowOptions::default());

        let request = MediationRequest {
            failed_command: Some("ls -z".to_string()),
            ..Default::default()
        };
        assert!(workflow.run(request).is_err());
    }

    #[test]
    fn test_direct_command_bypasses_translation_and_approval() {
        let transport = FakeTransport::none();
        let tr = translator(transport.clone());
        let executor = FakeExecutor::with_results(vec![ok_result()]);
        let mut interact = ScriptedInteract::default();
        let mut workflow =
            Workflow::new(&tr, &executor, &mut interact, WorkflowOptions::default());

        let outcome = workflow.run(MediationRequest::from_direct("rm -rf /")).unwrap();

        // Never translated, never prompted, ran exactly once.
        assert_eq!(transport.call_count(), 0);
        assert!(interact.prompts.is_empty());
        assert_eq!(executor.executed(), vec!["rm -rf /".to_string()]);
        assert_eq!(outcome.result.unwrap().exit_code, 0);
    }

    #[test]
    fn test_placeholder_candidate_is_cancelled() {
        let transport = FakeTransport::new(&[
            r#"{"command":"mkdir <directory_name>","explanation":"make it","mode":"run"}"#,
        ]);
        let tr = translator(transport);
        let executor = FakeExecutor::default();
        let mut interact = ScriptedInteract::default();
        let mut workflow =
            Workflow::new(&tr, &executor, &mut interact, WorkflowOptions::default());

        let outcome = workflow
            .run(MediationRequest::from_request("make a directory"))
            .unwrap();

        assert_eq!(outcome.approval, Some(ApprovalDecision::Cancelled));
        let candidate = outcome.candidate.unwrap();
        assert_eq!(candidate.mode, crate::translate::CandidateMode::Explain);
        assert!(candidate.explanation.contains("placeholders"));
        assert!(executor.executed().is_empty());
    }

    #[test]
    fn test_explain_candidate_is_cancelled_without_execution() {
        let transport = FakeTransport::new(&[
            r#"{"command":"","explanation":"There is no safe way to do that.","mode":"explain"}"#,
        ]);
        let tr = translator(transport);
        let executor = FakeExecutor::default();
        let mut interact = ScriptedInteract::default();
        let mut workflow =
            Workflow::new(&tr, &executor, &mut interact, WorkflowOptions::default());

        let outcome = workflow
            .run(MediationRequest::from_request("do something impossible"))
            .unwrap();

        assert_eq!(outcome.approval, Some(ApprovalDecision::Cancelled));
        assert!(executor.executed().is_empty());
    }

    #[test]
    fn test_scenario_direct_failure_repaired_interactively() {
        // `ls -z` fails; the human accepts a fix; `ls -a` auto-approves and runs.
        let transport = FakeTransport::new(&[
            r#"{"command":"ls -a","explanation":"List all entries","mode":"run"}"#,
        ]);
        let tr = translator(transport.clone());
        let executor = FakeExecutor::with_results(vec![
            failed_result(2, "ls: invalid option -- 'z'"),
            ok_result(),
        ]);
        let mut interact = ScriptedInteract::with_answers(&["y"]);
        let options = WorkflowOptions {
            interactive: true,
            ..Default::default()
        };
        let mut workflow = Workflow::new(&tr, &executor, &mut interact, options);

        let outcome = workflow.run(MediationRequest::from_direct("ls -z")).unwrap();

        assert_eq!(executor.executed(), vec!["ls -z".to_string(), "ls -a".to_string()]);
        assert_eq!(transport.call_count(), 1);
        assert_eq!(outcome.result.unwrap().exit_code, 0);
        assert!(!outcome.verdict.unwrap().dangerous);
    }

    #[test]
    fn test_scenario_natural_language_auto_runs() {
        let transport = FakeTransport::new(&[
            r#"{"command":"ls -A /etc","explanation":"List hidden entries","mode":"run"}"#,
        ]);
        let tr = translator(transport);
        let executor = FakeExecutor::with_results(vec![ok_result()]);
        let mut interact = ScriptedInteract::default();
        let mut workflow =
            Workflow::new(&tr, &executor, &mut interact, WorkflowOptions::default());

        let outcome = workflow
            .run(MediationRequest::from_request("list only hidden files in /etc"))
            .unwrap();

        assert_eq!(outcome.approval, Some(ApprovalDecision::Auto));
        assert_eq!(executor.executed(), vec!["ls -A /etc".to_string()]);
        assert_eq!(outcome.result.unwrap().exit_code, 0);
    }

    #[test]
    fn test_scenario_destructive_intent_forces_confirmation() {
        // Even a benign-looking candidate blocks on confirmation when the
        // request itself reads destructive.
        let transport = FakeTransport::new(&[
            r#"{"command":"echo 'simulated wipe'","explanation":"Simulates it","mode":"run"}"#,
        ]);
        let tr = translator(transport);
        let executor = FakeExecutor::default();
        let mut interact = ScriptedInteract::with_answers(&["n"]);
        let mut workflow =
            Workflow::new(&tr, &executor, &mut interact, WorkflowOptions::default());

        let outcome = workflow.run(MediationRequest::from_request("wipe disk")).unwrap();

        let verdict = outcome.verdict.unwrap();
        assert!(verdict.dangerous);
        assert!(verdict
            .reasons
            .iter()
            .any(|r| r == "User intent appears destructive"));
        assert!(interact.said("=== DANGEROUS COMMAND ==="));
        assert_eq!(outcome.approval, Some(ApprovalDecision::Cancelled));
        assert!(executor.executed().is_empty());
    }

    #[test]
    fn test_dangerous_command_approved_runs() {
        let transport = FakeTransport::new(&[
            r#"{"command":"shutdown -h now","explanation":"Powers off","mode":"run"}"#,
        ]);
        let tr = translator(transport);
        let executor = FakeExecutor::with_results(vec![ok_result()]);
        let mut interact = ScriptedInteract::with_answers(&["y"]);
        let mut workflow =
            Workflow::new(&tr, &executor, &mut interact, WorkflowOptions::default());

        let outcome = workflow
            .run(MediationRequest::from_request("turn the machine off"))
            .unwrap();

        assert_eq!(outcome.approval, Some(ApprovalDecision::Approved));
        assert_eq!(executor.executed(), vec!["shutdown -h now".to_string()]);
    }

    #[test]
    fn test_replan_loops_back_through_danger_check() {
        let transport = FakeTransport::new(&[
            r#"{"command":"rm -rf /","explanation":"Removes everything","mode":"run"}"#,
            r#"{"command":"ls /","explanation":"Lists instead","mode":"run"}"#,
        ]);
        let tr = translator(transport.clone());
        let executor = FakeExecutor::with_results(vec![ok_result()]);
        let mut interact = ScriptedInteract::with_answers(&["e", "something read-only"]);
        let mut workflow =
            Workflow::new(&tr, &executor, &mut interact, WorkflowOptions::default());

        let outcome = workflow
            .run(MediationRequest::from_request("clean up the filesystem"))
            .unwrap();

        // First candidate rejected with feedback, replan produced a safe one.
        assert_eq!(transport.call_count(), 2);
        assert_eq!(executor.executed(), vec!["ls /".to_string()]);
        assert_eq!(outcome.approval, Some(ApprovalDecision::Auto));
    }

    #[test]
    fn test_dry_run_never_invokes_executor() {
        let transport = FakeTransport::new(&[
            r#"{"command":"ls","explanation":"List","mode":"run"}"#,
        ]);
        let tr = translator(transport);
        let executor = FakeExecutor::default();
        let mut interact = ScriptedInteract::default();
        let options = WorkflowOptions {
            dry_run: true,
            ..Default::default()
        };
        let mut workflow = Workflow::new(&tr, &executor, &mut interact, options);

        let outcome = workflow.run(MediationRequest::from_request("list files")).unwrap();

        assert!(executor.executed().is_empty());
        let result = outcome.result.unwrap();
        assert!(result.success());
        assert_eq!(result.stdout, crate::exec::DRY_RUN_STDOUT);
    }

    #[test]
    fn test_noninteractive_failure_stops_without_repair() {
        let transport = FakeTransport::none();
        let tr = translator(transport.clone());
        let executor = FakeExecutor::with_results(vec![failed_result(127, "not found")]);
        let mut interact = ScriptedInteract::default();
        let mut workflow =
            Workflow::new(&tr, &executor, &mut interact, WorkflowOptions::default());

        let outcome = workflow.run(MediationRequest::from_direct("nope")).unwrap();

        assert_eq!(outcome.result.unwrap().exit_code, 127);
        // No repair translation was attempted.
        assert_eq!(transport.call_count(), 0);
    }

    #[test]
    fn test_translation_fault_ends_as_explained() {
        // Transport has no scripted responses, so the call errors out;
        // the workflow must end cleanly with an explain-only candidate.
        let transport = FakeTransport::none();
        let tr = translator(transport);
        let executor = FakeExecutor::default();
        let mut interact = ScriptedInteract::default();
        let mut workflow =
            Workflow::new(&tr, &executor, &mut interact, WorkflowOptions::default());

        let outcome = workflow.run(MediationRequest::from_request("list files")).unwrap();

        assert_eq!(outcome.approval, Some(ApprovalDecision::Cancelled));
        let candidate = outcome.candidate.unwrap();
        assert!(candidate.explanation.contains("LLM error"));
        assert!(executor.executed().is_empty());
    }

    #[test]
    fn test_one_shot_fix_translates_failure() {
        let transport = FakeTransport::new(&[
            r#"{"command":"apt install ripgrep","explanation":"Install it","mode":"run"}"#,
        ]);
        let tr = translator(transport);
        let executor = FakeExecutor::with_results(vec![ok_result()]);
        let mut interact = ScriptedInteract::default();
        let mut workflow =
            Workflow::new(&tr, &executor, &mut interact, WorkflowOptions::default());

        let outcome = workflow
            .run(MediationRequest::from_failure("rg foo", "rg: command not found"))
            .unwrap();

        assert_eq!(executor.executed(), vec!["apt install ripgrep".to_string()]);
        assert_eq!(outcome.approval, Some(ApprovalDecision::Auto));
    }
}
