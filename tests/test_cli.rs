//! Command-line behavior against a state directory seeded on disk.

mod test_support;

use assert_cmd::Command;
use camino::{Utf8Path, Utf8PathBuf};
use predicates::prelude::*;
use tempfile::TempDir;

use forgeflow::internal::engine::plan_steps;
use forgeflow::internal::interrupt::question_id;
use forgeflow::internal::utils::test_support::epoch;
use forgeflow::internal::utils::types::{
    QuestionOption, QuestionPayload, QuestionResolution, QuestionStatus,
};
use forgeflow::{Config, FileJournal, HistoryEvent, JournalStore, PendingQuestion, QuestionKind};
use test_support::input;

struct Workspace {
    _dir: TempDir,
    root: Utf8PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        Self { _dir: dir, root }
    }

    fn state_dir(&self) -> Utf8PathBuf {
        self.root.join("state")
    }

    fn forgeflow(&self) -> Command {
        let mut cmd = Command::cargo_bin("forgeflow").unwrap();
        cmd.current_dir(&self.root)
            .env_remove("FORGEFLOW_HOME")
            .env_remove("RUST_LOG")
            .arg("--state-dir")
            .arg(self.state_dir().as_str());
        cmd
    }

    fn journal(&self) -> FileJournal {
        FileJournal::new(self.state_dir())
    }

    /// Record a run that is waiting on an approval question.
    fn seed_pending_approval(&self, run_id: &str) -> String {
        let journal = self.journal();
        journal
            .append(
                run_id,
                HistoryEvent::RunStarted {
                    input: input(run_id),
                    phase: "implementation".to_string(),
                    plan: plan_steps(&Config::default()),
                },
            )
            .unwrap();

        let id = question_id(run_id, QuestionKind::Approval, 7);
        let option = |id: &str, recommended| QuestionOption {
            id: id.to_string(),
            label: id.to_string(),
            description: format!("{id} the change"),
            pros: Vec::new(),
            cons: Vec::new(),
            recommended,
        };
        journal
            .append(
                run_id,
                HistoryEvent::QuestionPosted {
                    seq: 7,
                    question: PendingQuestion {
                        question_id: id.clone(),
                        run_id: run_id.to_string(),
                        kind: QuestionKind::Approval,
                        payload: QuestionPayload::Approval {
                            summary: "Add rate limiting".to_string(),
                            options: vec![option("approve", true), option("reject", false)],
                        },
                        posted_at: epoch(),
                        timeout_at: epoch() + chrono::Duration::hours(24),
                        status: QuestionStatus::Pending,
                    },
                },
            )
            .unwrap();
        id
    }

    fn write_config(&self, body: &str) -> Utf8PathBuf {
        let path = self.root.join("forgeflow.toml");
        std::fs::write(&path, body).unwrap();
        path
    }
}

fn resolution(journal: &FileJournal, run_id: &str, question: &str) -> Option<QuestionResolution> {
    journal
        .history(run_id)
        .unwrap()
        .resolution_for(question)
        .cloned()
}

#[test]
fn test_config_json_reflects_cli_overrides() {
    let ws = Workspace::new();
    ws.forgeflow()
        .args(["--max-retries", "5", "config", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"max_retries\":5"));
}

#[test]
fn test_config_human_output_names_sources() {
    let ws = Workspace::new();
    ws.forgeflow()
        .args(["config", "--timeout-hours", "48"])
        .assert()
        .success()
        .stdout(predicate::str::contains("timeout_hours = 48  (cli)"))
        .stdout(predicate::str::contains("[generation]"));
}

#[test]
fn test_invalid_config_file_is_a_usage_error() {
    let ws = Workspace::new();
    let path = ws.write_config("[generation]\nmax_retries = \"many\"\n");
    ws.forgeflow()
        .args(["--config", path.as_str(), "config"])
        .assert()
        .code(2);
}

#[test]
fn test_status_of_unknown_run_exits_with_usage_error() {
    let ws = Workspace::new();
    ws.forgeflow()
        .args(["status", "run-missing"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("run-missing"));
}

#[test]
fn test_status_shows_pending_question() {
    let ws = Workspace::new();
    let question = ws.seed_pending_approval("run-1");

    ws.forgeflow()
        .args(["status", "run-1", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"status\":\"running\""))
        .stdout(predicate::str::contains(question.as_str()));
}

#[test]
fn test_history_prints_one_line_per_event() {
    let ws = Workspace::new();
    ws.seed_pending_approval("run-1");

    let output = ws.forgeflow().args(["history", "run-1"]).output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 2, "{stdout}");
    assert!(lines[0].contains("\"type\":\"run_started\""));
    assert!(lines[1].contains("\"type\":\"question_posted\""));
}

#[test]
fn test_respond_records_answer_for_replay() {
    let ws = Workspace::new();
    let question = ws.seed_pending_approval("run-1");

    ws.forgeflow()
        .args(["respond", "run-1", question.as_str(), "--type", "approve", "--by", "erin"])
        .assert()
        .success()
        .stdout(predicate::str::contains("recorded"));

    let resolved = resolution(&ws.journal(), "run-1", &question).unwrap();
    let response = resolved.response().unwrap();
    assert_eq!(response.responded_by, "erin");

    // The question is settled; a second answer is discarded.
    ws.forgeflow()
        .args(["respond", "run-1", question.as_str(), "--type", "reject"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("no pending question"));
}

#[test]
fn test_respond_to_stale_question_changes_nothing() {
    let ws = Workspace::new();
    let question = ws.seed_pending_approval("run-1");

    ws.forgeflow()
        .args(["respond", "run-1", "approval-00000000", "--type", "approve"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains(question.as_str()));

    assert!(resolution(&ws.journal(), "run-1", &question).is_none());
    assert_eq!(ws.journal().load("run-1").unwrap().len(), 2);
}

#[test]
fn test_respond_rejects_malformed_answer() {
    let ws = Workspace::new();
    let question = ws.seed_pending_approval("run-1");

    ws.forgeflow()
        .args(["respond", "run-1", question.as_str(), "--type", "answer", "--option", "ship-it"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("unknown option"));
}

#[test]
fn test_auto_proceed_cannot_be_sent_by_hand() {
    let ws = Workspace::new();
    ws.forgeflow()
        .args(["respond", "run-1", "q", "--type", "auto-proceed"])
        .assert()
        .code(2);
}

#[test]
fn test_cancel_is_visible_in_status() {
    let ws = Workspace::new();
    ws.seed_pending_approval("run-1");

    ws.forgeflow()
        .args(["cancel", "run-1", "--reason", "superseded"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Cancellation requested"));

    ws.forgeflow()
        .args(["status", "run-1", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"cancel_requested\":true"));
}

#[test]
fn test_cancel_unknown_run_fails() {
    let ws = Workspace::new();
    ws.forgeflow().args(["cancel", "run-nobody"]).assert().code(2);
}

#[cfg(unix)]
#[test]
fn test_doctor_reports_configured_checks() {
    let ws = Workspace::new();
    let path = ws.write_config(
        "[preflight]\nrequired_binaries = [\"sh\"]\nrequired_env = []\ncheck_write_access = true\n",
    );
    ws.forgeflow()
        .args(["--config", path.as_str(), "doctor", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("binary:sh"))
        .stdout(predicate::str::contains("\"success\":true"));
}

#[test]
fn test_doctor_fails_on_missing_binary() {
    let ws = Workspace::new();
    let path = ws.write_config(
        "[preflight]\nrequired_binaries = [\"forgeflow-surely-missing-binary\"]\ncheck_write_access = false\n",
    );
    ws.forgeflow()
        .args(["--config", path.as_str(), "doctor"])
        .assert()
        .code(3)
        .stdout(predicate::str::contains("✗ binary:forgeflow-surely-missing-binary"));
}

#[test]
fn test_state_dir_layout_is_per_run() {
    let ws = Workspace::new();
    ws.seed_pending_approval("run-1");
    assert!(run_dir(&ws.state_dir(), "run-1").is_dir());
}

fn run_dir(state_dir: &Utf8Path, run_id: &str) -> Utf8PathBuf {
    state_dir.join("runs").join(run_id)
}
