use super::*;
use crate::transport::mock::MockConnector;
use tokio::net::TcpListener;
use tokio::sync::mpsc::UnboundedReceiver;

const WAIT: Duration = Duration::from_secs(2);

async fn listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

async fn closed_port() -> u16 {
    let (listener, port) = listener().await;
    drop(listener);
    port
}

fn target(port: u16) -> TargetDescriptor {
    TargetDescriptor::with_password("vm", "127.0.0.1", port, "deploy", "pw").unwrap()
}

fn start(
    connector: &Arc<MockConnector>,
    port: u16,
    auth_timeout: Duration,
) -> (SessionHandle, UnboundedReceiver<ServerEvent>) {
    let (sink, rx) = EventSink::channel();
    let ctx = SessionContext {
        connector: connector.clone(),
        prober: Prober::new(WAIT),
        auth_timeout,
        pty: PtyRequest::default(),
        sink,
    };
    let session = Session::new("c1-1", target(port), ctx, CancellationToken::new());
    (session.start(), rx)
}

async fn next(rx: &mut UnboundedReceiver<ServerEvent>) -> ServerEvent {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Collect events up to and including `session-closed`.
async fn until_closed(rx: &mut UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    loop {
        let event = next(rx).await;
        let done = matches!(event, ServerEvent::SessionClosed { .. });
        events.push(event);
        if done {
            return events;
        }
    }
}

fn statuses(events: &[ServerEvent]) -> Vec<(ConnectionStatus, String)> {
    events
        .iter()
        .filter_map(|e| match e {
            ServerEvent::ConnectionStatus { status, message } => Some((*status, message.clone())),
            _ => None,
        })
        .collect()
}

fn close_reason(events: &[ServerEvent]) -> Option<CloseReason> {
    events.iter().find_map(|e| match e {
        ServerEvent::SessionClosed { reason, .. } => Some(*reason),
        _ => None,
    })
}

#[test]
fn test_state_transitions() {
    use SessionState::*;
    assert!(Idle.can_transition_to(Probing));
    assert!(Probing.can_transition_to(Error));
    assert!(Streaming.can_transition_to(Ready));
    assert!(Error.can_transition_to(Closed));

    assert!(!Idle.can_transition_to(Ready));
    assert!(!Probing.can_transition_to(Ready));
    assert!(!Closed.can_transition_to(Probing));
    assert!(!Error.can_transition_to(Ready));
}

#[tokio::test]
async fn test_unreachable_host_reports_network_error_once() {
    let connector = Arc::new(MockConnector::new());
    let port = closed_port().await;
    let (handle, mut rx) = start(&connector, port, WAIT);

    let events = until_closed(&mut rx).await;
    let statuses = statuses(&events);

    assert_eq!(statuses.len(), 2);
    assert_eq!(statuses[0].0, ConnectionStatus::Testing);
    assert_eq!(statuses[1].0, ConnectionStatus::Error);
    assert!(statuses[1].1.contains("refused"), "{}", statuses[1].1);
    assert_eq!(close_reason(&events), Some(CloseReason::Error));

    let state = connector.state();
    assert_eq!(state.connections_opened.load(Ordering::SeqCst), 0);
    assert_eq!(state.shells_opened.load(Ordering::SeqCst), 0);
    assert_eq!(handle.session().state(), SessionState::Closed);
}

#[tokio::test]
async fn test_auth_failure_is_distinct_from_network_failure() {
    let connector = Arc::new(MockConnector::new().rejecting_auth());
    let (_listener, port) = listener().await;
    let (_handle, mut rx) = start(&connector, port, WAIT);

    let events = until_closed(&mut rx).await;
    let errors: Vec<_> = statuses(&events)
        .into_iter()
        .filter(|(s, _)| *s == ConnectionStatus::Error)
        .collect();

    assert_eq!(errors.len(), 1);
    assert!(errors[0].1.contains("authentication rejected"));
    assert!(!errors[0].1.contains("Network connectivity"));
    assert_eq!(connector.state().shells_opened.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_handshake_timeout() {
    let connector = Arc::new(MockConnector::new().with_connect_delay(Duration::from_secs(5)));
    let (_listener, port) = listener().await;
    let (_handle, mut rx) = start(&connector, port, Duration::from_millis(100));

    let events = until_closed(&mut rx).await;
    let (_, message) = statuses(&events).pop().unwrap();
    assert!(message.contains("handshake"), "{}", message);
}

#[tokio::test]
async fn test_input_round_trip_in_order() {
    let connector = Arc::new(MockConnector::new());
    let (_listener, port) = listener().await;
    let (handle, mut rx) = start(&connector, port, WAIT);

    assert_eq!(handle.session().settled().await, SessionState::Ready);

    let chunks: [&[u8]; 3] = [b"echo ", b"hi", b"\r"];
    for chunk in chunks {
        assert!(handle.session().send(SessionCommand::Input(chunk.to_vec())).await);
    }

    let mut echoed = String::new();
    while echoed.len() < 8 {
        if let ServerEvent::Output { data, stream, job_id } = next(&mut rx).await {
            assert!(stream.is_none());
            assert!(job_id.is_none());
            echoed.push_str(&data);
        }
    }

    assert_eq!(echoed, "echo hi\r");
    assert_eq!(connector.state().written(), b"echo hi\r".to_vec());
    assert_eq!(connector.state().writes().len(), 3);
    assert_eq!(handle.session().state(), SessionState::Streaming);
}

#[tokio::test]
async fn test_input_before_ready_is_discarded() {
    let connector =
        Arc::new(MockConnector::new().with_connect_delay(Duration::from_millis(200)));
    let (_listener, port) = listener().await;
    let (handle, _rx) = start(&connector, port, WAIT);

    handle
        .session()
        .send(SessionCommand::Input(b"too early".to_vec()))
        .await;
    assert_eq!(handle.session().settled().await, SessionState::Ready);

    handle
        .session()
        .send(SessionCommand::Input(b"ls\r".to_vec()))
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(connector.state().written(), b"ls\r".to_vec());
}

#[tokio::test]
async fn test_remote_close_releases_everything() {
    let connector = Arc::new(MockConnector::new());
    let (_listener, port) = listener().await;
    let (handle, mut rx) = start(&connector, port, WAIT);
    handle.session().settled().await;

    connector.state().shell(0).unwrap().close();
    let events = until_closed(&mut rx).await;

    assert_eq!(close_reason(&events), Some(CloseReason::RemoteClosed));
    handle.session().closed().await;
    assert_eq!(connector.state().live_shells(), 0);
    assert_eq!(connector.state().live_connections(), 0);
}

#[tokio::test]
async fn test_transport_error_mid_stream() {
    let connector = Arc::new(MockConnector::new());
    let (_listener, port) = listener().await;
    let (handle, mut rx) = start(&connector, port, WAIT);
    handle.session().settled().await;

    connector.state().shell(0).unwrap().fail("connection reset");
    let events = until_closed(&mut rx).await;

    let (status, message) = statuses(&events).pop().unwrap();
    assert_eq!(status, ConnectionStatus::Error);
    assert!(message.contains("connection reset"));
    assert_eq!(close_reason(&events), Some(CloseReason::Error));
    assert_eq!(connector.state().live_connections(), 0);
}

#[tokio::test]
async fn test_split_multibyte_output() {
    let connector = Arc::new(MockConnector::new().without_echo());
    let (_listener, port) = listener().await;
    let (handle, mut rx) = start(&connector, port, WAIT);
    handle.session().settled().await;

    let bytes = "✓ done".as_bytes();
    let remote = connector.state().shell(0).unwrap();
    remote.send_output(&bytes[..1]);
    remote.send_output(&bytes[1..]);

    let mut text = String::new();
    while text.chars().count() < 6 {
        if let ServerEvent::Output { data, .. } = next(&mut rx).await {
            text.push_str(&data);
        }
    }
    assert_eq!(text, "✓ done");
}

#[tokio::test]
async fn test_double_shutdown_is_silent() {
    let connector = Arc::new(MockConnector::new());
    let (_listener, port) = listener().await;
    let (mut handle, mut rx) = start(&connector, port, WAIT);
    handle.session().settled().await;

    handle.shutdown(CloseReason::Superseded, WAIT).await;
    handle.shutdown(CloseReason::ClientRequest, WAIT).await;

    let events = until_closed(&mut rx).await;
    assert_eq!(close_reason(&events), Some(CloseReason::Superseded));

    // Nothing else arrives
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
    assert_eq!(connector.state().live_shells(), 0);
    assert_eq!(connector.state().live_connections(), 0);
}
