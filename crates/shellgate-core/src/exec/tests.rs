use super::*;
use std::process::Command;
use std::sync::atomic::Ordering;

use tokio::sync::mpsc::UnboundedReceiver;

use crate::config::DEFAULT_MAX_CODE_BYTES;
use crate::transport::mock::MockConnector;
use crate::transport::ChannelEvent;

const WAIT: Duration = Duration::from_secs(5);

// --- language table ---

#[test]
fn test_language_aliases() {
    assert_eq!(Language::from_tag(Some("py")), Language::Python);
    assert_eq!(Language::from_tag(Some("Python3")), Language::Python);
    assert_eq!(Language::from_tag(Some("javascript")), Language::Js);
    assert_eq!(Language::from_tag(Some("node")), Language::Js);
    assert_eq!(Language::from_tag(Some("shell")), Language::Sh);
    assert_eq!(Language::from_tag(Some("cobol")), Language::Bash);
    assert_eq!(Language::from_tag(None), Language::Bash);
}

#[test]
fn test_language_table() {
    assert_eq!(Language::Python.interpreter(), "python3");
    assert_eq!(Language::Python.extension(), ".py");
    assert_eq!(Language::Js.interpreter(), "node");
    assert_eq!(Language::Js.extension(), ".js");
    assert_eq!(Language::Sh.extension(), ".sh");
    assert_eq!(Language::Bash.name(), "bash");
}

// --- script construction ---

#[test]
fn test_shell_quote() {
    assert_eq!(shell_quote("plain"), "'plain'");
    assert_eq!(shell_quote(""), "''");
    assert_eq!(shell_quote("it's"), "'it'\\''s'");
}

#[test]
fn test_temp_file_names_are_unique() {
    let a = temp_file_name(Language::Python);
    let b = temp_file_name(Language::Python);
    assert!(a.starts_with("shellgate-"));
    assert!(a.ends_with(".py"));
    assert_ne!(a, b);
}

#[test]
fn test_remote_path_joins_once() {
    assert_eq!(script::remote_path("/tmp/", "x.sh"), "/tmp/x.sh");
    assert_eq!(script::remote_path("/var/tmp", "x.sh"), "/var/tmp/x.sh");
}

/// Run `command` under `sh -c` with `stdin` as its input, the way sshd
/// hands an exec request to the login shell.
#[cfg(unix)]
fn run_sh(command: &str, stdin: &str) -> std::process::Output {
    use std::io::Write;
    use std::process::Stdio;

    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    let mut input = child.stdin.take().unwrap();
    // The script may exit without reading when the write target is bad
    let _ = input.write_all(stdin.as_bytes());
    drop(input);
    child.wait_with_output().unwrap()
}

/// Code that prints its own source and stops before anything else runs.
#[cfg(unix)]
const HOSTILE: &str = "cat \"$0\"; exit 0\n\
    # \"double\" 'single' $HOME ${PATH} `touch BACKTICK` $(touch SUBST) \\ \\n\n\
    '; touch QUOTE; '\n\
    -n --help\n";

#[cfg(unix)]
#[test]
fn test_script_writes_payload_verbatim() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("job.sh");
    let path = path.to_str().unwrap();

    let output = run_sh(&build_script(Language::Sh, path), HOSTILE);

    assert!(output.status.success());
    assert_eq!(String::from_utf8(output.stdout).unwrap(), HOSTILE);
    // Cleaned up, and nothing was injected
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    for marker in ["BACKTICK", "SUBST", "QUOTE"] {
        assert!(!std::path::Path::new(marker).exists());
    }
}

#[cfg(unix)]
#[test]
fn test_remote_command_survives_login_shell() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("job.sh");

    let output = run_sh(
        &build_remote_command(Language::Sh, path.to_str().unwrap()),
        HOSTILE,
    );

    assert!(output.status.success());
    assert_eq!(String::from_utf8(output.stdout).unwrap(), HOSTILE);
    assert!(!path.exists());
}

#[test]
fn test_remote_command_does_not_embed_code() {
    let path = "/tmp/shellgate-1-abc.py";
    let command = build_remote_command(Language::Python, path);

    assert!(command.starts_with("sh -c "));
    assert!(command.contains("python3"));
    assert!(command.contains(path));
    assert!(command.len() < 512, "command grew to {} bytes", command.len());
}

#[cfg(unix)]
#[test]
fn test_quote_heavy_payload_at_limit_runs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("job.sh");
    let line = "echo 'x'\n";
    let lines = DEFAULT_MAX_CODE_BYTES / line.len();
    let code = line.repeat(lines);
    assert!(code.len() <= DEFAULT_MAX_CODE_BYTES);

    let output = run_sh(
        &build_remote_command(Language::Sh, path.to_str().unwrap()),
        &code,
    );

    assert!(output.status.success(), "{:?}", output);
    assert_eq!(output.stdout, "x\n".repeat(lines).into_bytes());
    assert!(!path.exists());
}

#[cfg(unix)]
#[test]
fn test_script_propagates_exit_status() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("job.sh");

    let output = run_sh(
        &build_script(Language::Sh, path.to_str().unwrap()),
        "echo out; echo err >&2; exit 3",
    );

    assert_eq!(output.status.code(), Some(3));
    assert_eq!(output.stdout, b"out\n");
    assert_eq!(output.stderr, b"err\n");
    // Removed even though the interpreter failed
    assert!(!path.exists());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[cfg(unix)]
#[test]
fn test_interpreter_skipped_when_write_fails() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("ran");
    let code = format!("touch '{}'", marker.display());

    let output = run_sh(
        &build_script(Language::Sh, "/nonexistent-shellgate-dir/job.sh"),
        &code,
    );

    assert!(!output.status.success());
    assert!(!marker.exists());
}

// --- executor ---

struct Harness {
    connector: Arc<MockConnector>,
    executor: Executor,
    sink: EventSink,
    rx: UnboundedReceiver<crate::events::ServerEvent>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl Harness {
    fn new(connector: MockConnector) -> Self {
        Self::with_config(connector, ExecutionConfig::default())
    }

    fn with_config(connector: MockConnector, config: ExecutionConfig) -> Self {
        let connector = Arc::new(connector);
        let (sink, rx) = EventSink::channel();
        Self {
            executor: Executor::new(connector.clone(), config, WAIT),
            connector,
            sink,
            rx,
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    fn run(&self, code: &str, language: &str, remote: bool, target: bool) -> String {
        let request = ExecutionRequest {
            code: code.to_string(),
            language: Some(language.to_string()),
            remote,
        };
        let target = target
            .then(|| TargetDescriptor::with_password("vm", "10.0.0.5", 22, "u", "p").unwrap());
        self.executor.spawn(
            request,
            target,
            self.sink.clone(),
            self.cancel.child_token(),
            &self.tracker,
        )
    }

    /// Events for `job_id` up to its terminal event.
    async fn job_events(&mut self, job_id: &str) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        loop {
            let event = tokio::time::timeout(WAIT, self.rx.recv())
                .await
                .expect("timed out waiting for job event")
                .expect("sink closed");
            let terminal = matches!(
                &event,
                ServerEvent::ExecutionExit { job_id: id, .. }
                    | ServerEvent::ExecutionError { job_id: id, .. } if id == job_id
            );
            events.push(event);
            if terminal {
                return events;
            }
        }
    }
}

fn outputs(events: &[ServerEvent], want: OutputStream) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            ServerEvent::Output {
                data,
                stream: Some(stream),
                ..
            } if *stream == want => Some(data.as_str()),
            _ => None,
        })
        .collect()
}

fn start_failure(events: &[ServerEvent]) -> String {
    assert_eq!(events.len(), 1, "expected a lone execution-error: {:?}", events);
    match &events[0] {
        ServerEvent::ExecutionError { message, .. } => message.clone(),
        other => panic!("Expected ExecutionError, got {:?}", other),
    }
}

#[tokio::test]
async fn test_remote_python_job_streams_and_exits() {
    let connector = MockConnector::new().with_exec_script(vec![
        ChannelEvent::Stdout(b"hi\n".to_vec()),
        ChannelEvent::Stdout(b"4\n".to_vec()),
        ChannelEvent::ExitStatus(0),
        ChannelEvent::Eof,
    ]);
    let mut h = Harness::new(connector);

    let job_id = h.run("print('hi')\nprint(2+2)", "python", true, true);
    let events = h.job_events(&job_id).await;

    assert_eq!(
        events[0],
        ServerEvent::ExecutionStarted {
            job_id: job_id.clone(),
            language: "python".to_string(),
            remote: true,
        }
    );
    assert_eq!(outputs(&events, OutputStream::Stdout), "hi\n4\n");
    assert_eq!(
        events.last().unwrap(),
        &ServerEvent::ExecutionExit {
            job_id,
            code: Some(0),
            signal: None,
        }
    );

    let commands = h.connector.state().commands();
    assert_eq!(commands.len(), 1);
    assert!(commands[0].starts_with("sh -c "));
    assert!(commands[0].contains("python3"));
    assert!(commands[0].contains("/tmp/shellgate-"));
    assert_eq!(
        h.connector.state().exec_inputs(),
        vec![b"print('hi')\nprint(2+2)".to_vec()]
    );

    h.tracker.close();
    h.tracker.wait().await;
    assert_eq!(h.connector.state().live_connections(), 0);
    assert_eq!(h.connector.state().live_execs(), 0);
}

#[tokio::test]
async fn test_quote_heavy_payload_streams_over_stdin() {
    let mut h = Harness::new(MockConnector::new());
    let line = "print('it''s', \"q\")\n";
    let code = line.repeat(DEFAULT_MAX_CODE_BYTES / line.len());

    let job_id = h.run(&code, "python", true, true);
    let events = h.job_events(&job_id).await;

    assert!(matches!(
        events.last().unwrap(),
        ServerEvent::ExecutionExit { code: Some(0), .. }
    ));
    let state = h.connector.state();
    let commands = state.commands();
    assert_eq!(commands.len(), 1);
    assert!(!commands[0].contains("print"));
    assert!(commands[0].len() < 512);
    assert_eq!(state.exec_inputs(), vec![code.into_bytes()]);
    assert!(format!("{:?}", state).contains("MockState"));
}

#[tokio::test]
async fn test_remote_stderr_and_signal() {
    let connector = MockConnector::new().with_exec_script(vec![
        ChannelEvent::Stdout(b"partial".to_vec()),
        ChannelEvent::Stderr(b"Traceback\n".to_vec()),
        ChannelEvent::ExitSignal("KILL".to_string()),
    ]);
    let mut h = Harness::new(connector);

    let job_id = h.run("import os", "py", true, true);
    let events = h.job_events(&job_id).await;

    assert_eq!(outputs(&events, OutputStream::Stdout), "partial");
    assert_eq!(outputs(&events, OutputStream::Stderr), "Traceback\n");
    assert!(matches!(
        events.last().unwrap(),
        ServerEvent::ExecutionExit { code: None, signal: Some(s), .. } if s == "KILL"
    ));
}

#[tokio::test]
async fn test_remote_without_target_fails_to_start() {
    let mut h = Harness::new(MockConnector::new());

    let job_id = h.run("ls", "bash", true, false);
    let message = start_failure(&h.job_events(&job_id).await);

    assert!(message.contains("no target configured"));
    assert_eq!(h.connector.state().connections_opened.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_oversized_payload_rejected_before_connecting() {
    let config = ExecutionConfig {
        max_code_bytes: 16,
        ..Default::default()
    };
    let mut h = Harness::with_config(MockConnector::new(), config);

    let job_id = h.run(&"x".repeat(17), "bash", true, true);
    let message = start_failure(&h.job_events(&job_id).await);

    assert!(message.contains("exceeds"));
    assert_eq!(h.connector.state().connections_opened.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_auth_failure_fails_to_start() {
    let mut h = Harness::new(MockConnector::new().rejecting_auth());

    let job_id = h.run("ls", "bash", true, true);
    let message = start_failure(&h.job_events(&job_id).await);

    assert!(message.contains("authentication rejected"));
}

#[tokio::test]
async fn test_refused_exec_fails_to_start() {
    let mut h = Harness::new(MockConnector::new().refusing_exec());

    let job_id = h.run("ls", "bash", true, true);
    let message = start_failure(&h.job_events(&job_id).await);

    assert!(message.contains("exec request failed"));
    h.tracker.close();
    h.tracker.wait().await;
    assert_eq!(h.connector.state().live_connections(), 0);
}

#[tokio::test]
async fn test_local_disabled_by_default() {
    let mut h = Harness::new(MockConnector::new());

    let job_id = h.run("echo hi", "bash", false, false);
    let message = start_failure(&h.job_events(&job_id).await);

    assert!(message.contains("local execution is disabled"));
}

#[tokio::test]
async fn test_concurrent_jobs_cancelled_together() {
    let connector = MockConnector::new()
        .with_exec_script(vec![ChannelEvent::Stdout(b"tick\n".to_vec())])
        .holding_exec_open();
    let mut h = Harness::new(connector);

    let first = h.run("sleep 100", "bash", true, true);
    let second = h.run("sleep 100", "bash", true, true);
    assert_ne!(first, second);

    let mut started = 0;
    while started < 2 {
        let event = tokio::time::timeout(WAIT, h.rx.recv()).await.unwrap().unwrap();
        if matches!(event, ServerEvent::ExecutionStarted { .. }) {
            started += 1;
        }
    }
    assert_eq!(h.connector.state().live_execs(), 2);

    h.cancel.cancel();
    h.tracker.close();
    tokio::time::timeout(WAIT, h.tracker.wait()).await.unwrap();

    assert_eq!(h.connector.state().live_execs(), 0);
    assert_eq!(h.connector.state().live_connections(), 0);
}

#[cfg(unix)]
#[tokio::test]
async fn test_local_job_runs_interpreter_directly() {
    let dir = tempfile::tempdir().unwrap();
    let config = ExecutionConfig {
        local_enabled: true,
        local_temp_dir: Some(dir.path().to_path_buf()),
        ..Default::default()
    };
    let mut h = Harness::with_config(MockConnector::new(), config);

    let job_id = h.run("echo hi; echo oops >&2; exit 2", "sh", false, false);
    let events = h.job_events(&job_id).await;

    assert!(matches!(
        &events[0],
        ServerEvent::ExecutionStarted { remote: false, language, .. } if language == "sh"
    ));
    assert_eq!(outputs(&events, OutputStream::Stdout), "hi\n");
    assert_eq!(outputs(&events, OutputStream::Stderr), "oops\n");
    assert!(matches!(
        events.last().unwrap(),
        ServerEvent::ExecutionExit { code: Some(2), signal: None, .. }
    ));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_signal_names() {
    assert_eq!(local::signal_name(9), "KILL");
    assert_eq!(local::signal_name(15), "TERM");
    assert_eq!(local::signal_name(64), "64");
}
