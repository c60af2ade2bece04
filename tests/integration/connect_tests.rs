//! Integration tests for the connect sequence.
//!
//! Covers endpoint resolution (prompt and port file), the primary
//! handshake, failure reporting, transport replacement and close events.

use replmux::orchestrator::{ConnectOutcome, SessionSlot};
use replmux::prompt::{NoPrompt, PresetPrompter};
use replmux::protocol::SessionId;
use replmux::AppError;

use super::test_helpers::{settle, wait_for_state, Harness, Opened};

fn endpoint(url: &str) -> PresetPrompter {
    PresetPrompter {
        endpoint: Some(url.to_owned()),
        build_target: None,
    }
}

// ── Prompted endpoints ───────────────────────────────────────────────────────

#[tokio::test]
async fn prompted_endpoint_establishes_primary_session() {
    let h = Harness::new();

    let outcome = h
        .orchestrator
        .connect(false, &endpoint("localhost:5555"))
        .await
        .expect("connect succeeds");

    let ConnectOutcome::Connected(snapshot) = outcome else {
        panic!("expected Connected, got {outcome:?}");
    };
    assert!(snapshot.connected);
    assert!(!snapshot.connecting);
    assert_eq!(snapshot.hostname, "localhost");
    assert_eq!(snapshot.port, Some(5555));
    assert_eq!(snapshot.primary_session, Some(SessionId::new("sess-1")));
    assert_eq!(snapshot.ambiguous_session, snapshot.primary_session);
    assert_eq!(
        h.server.opened(),
        vec![Opened {
            hostname: "localhost".into(),
            port: 5555
        }]
    );

    assert!(h.said("Hooking up nREPL sessions..."));
    assert!(h.said("Connected session: primary"));
}

#[tokio::test]
async fn secondary_session_is_negotiated_after_primary() {
    let h = Harness::new();

    h.orchestrator
        .connect(false, &endpoint("localhost:5555"))
        .await
        .expect("connect succeeds");

    let snapshot = h.snapshot();
    assert_eq!(snapshot.secondary_session, Some(SessionId::new("sess-2")));
    assert_eq!(snapshot.ambiguous_target(), Some(SessionSlot::Primary));
    assert_eq!(h.server.ops(), vec!["clone", "clone", "eval"]);

    let secondary_clone = &h.server.requests()[1];
    assert_eq!(secondary_clone.session, Some(SessionId::new("sess-1")));

    assert!(h.said("Connected session: secondary"));
    assert!(h.said("Ambiguous files will use the primary REPL. (You can toggle this at will.)"));
}

#[tokio::test]
async fn malformed_endpoint_is_rejected_without_connecting() {
    let h = Harness::new();

    let result = h.orchestrator.connect(false, &endpoint("badhost")).await;

    assert!(
        matches!(result, Err(AppError::BadEndpoint(_))),
        "got: {result:?}"
    );
    assert!(h.said("Bad url: badhost"));
    assert!(h.server.opened().is_empty());
    assert!(!h.snapshot().connecting);
    assert!(!h.snapshot().connected);
}

#[tokio::test]
async fn dismissed_prompt_cancels() {
    let h = Harness::new();

    let outcome = h
        .orchestrator
        .connect(false, &NoPrompt)
        .await
        .expect("cancel is not an error");

    assert_eq!(outcome, ConnectOutcome::Cancelled);
    assert!(!h.snapshot().connecting);
    assert!(h.server.opened().is_empty());
}

#[tokio::test]
async fn empty_host_uses_default_host() {
    let h = Harness::new();

    h.orchestrator
        .connect(false, &endpoint(":7000"))
        .await
        .expect("connect succeeds");

    assert_eq!(h.server.opened()[0].hostname, "localhost");
    assert_eq!(h.server.opened()[0].port, 7000);
}

// ── Port file discovery ──────────────────────────────────────────────────────

#[tokio::test]
async fn auto_connect_uses_port_file_without_prompting() {
    let h = Harness::with_project(&[(".nrepl-port", "7888")], &[]);

    let outcome = h
        .orchestrator
        .auto_connect(&NoPrompt)
        .await
        .expect("connect succeeds");

    assert!(matches!(outcome, ConnectOutcome::Connected(_)));
    assert_eq!(
        h.server.opened(),
        vec![Opened {
            hostname: "localhost".into(),
            port: 7888
        }]
    );
}

#[tokio::test]
async fn auto_connect_without_port_file_falls_back_to_prompt() {
    let h = Harness::new();

    let outcome = h
        .orchestrator
        .auto_connect(&endpoint("localhost:6000"))
        .await
        .expect("connect succeeds");

    assert!(matches!(outcome, ConnectOutcome::Connected(_)));
    assert!(h.said("No nREPL port file found"));
    assert_eq!(h.server.opened()[0].port, 6000);
}

#[tokio::test]
async fn unreadable_port_file_is_reported_and_prompted() {
    let h = Harness::with_project(&[(".nrepl-port", "garbage")], &[]);

    let outcome = h
        .orchestrator
        .auto_connect(&NoPrompt)
        .await
        .expect("cancel is not an error");

    assert_eq!(outcome, ConnectOutcome::Cancelled);
    assert!(h.said("Error reading nREPL port file"));
}

// ── Handshake failures ───────────────────────────────────────────────────────

#[tokio::test]
async fn clone_without_session_is_handshake_error() {
    let h = Harness::new();
    h.server.script(|s| s.primary_clone_fails = true);

    let result = h.orchestrator.connect(false, &endpoint("localhost:5555")).await;

    assert!(matches!(result, Err(AppError::Handshake(_))), "got: {result:?}");
    assert!(h.said("Failed connecting."));
    let snapshot = h.snapshot();
    assert!(!snapshot.connected);
    assert!(!snapshot.connecting);
    assert_eq!(snapshot.primary_session, None);
    assert_eq!(h.server.count("clone"), 1, "no secondary clone after a failed handshake");
}

#[tokio::test]
async fn refused_connection_is_transport_error() {
    let h = Harness::new();
    h.server.script(|s| s.refuse_connect = true);

    let result = h.orchestrator.connect(false, &endpoint("localhost:5555")).await;

    assert!(matches!(result, Err(AppError::Transport(_))), "got: {result:?}");
    assert!(h.said("Failed connecting to localhost:5555"));
    assert!(!h.snapshot().connecting);
}

#[tokio::test]
async fn secondary_failure_leaves_primary_connected() {
    let h = Harness::new();
    h.server.script(|s| s.startup_fails = true);

    h.orchestrator
        .connect(false, &endpoint("localhost:5555"))
        .await
        .expect("primary still connects");

    let snapshot = h.snapshot();
    assert!(snapshot.connected);
    assert_eq!(snapshot.secondary_session, None);
    assert_eq!(snapshot.ambiguous_session, snapshot.primary_session);
    assert!(h.said("Failed to start ClojureScript REPL with command:"));
    assert!(h.said("Ambiguous files will use the primary REPL."));
    assert!(!h.said("You can toggle this at will."));
    assert_eq!(
        h.server.closed_sessions(),
        vec![SessionId::new("sess-2")],
        "the unused clone is closed"
    );
}

// ── Transport replacement ────────────────────────────────────────────────────

#[tokio::test]
async fn reconnecting_replaces_the_transport() {
    let h = Harness::new();

    h.orchestrator
        .connect(false, &endpoint("localhost:5555"))
        .await
        .expect("first connect");
    h.orchestrator
        .connect(false, &endpoint("localhost:6666"))
        .await
        .expect("second connect");

    assert_eq!(h.server.opened().len(), 2);
    assert_eq!(h.server.live_transports(), 1);
    assert_eq!(h.server.peak_transports(), 1, "old transport ends before the new one opens");

    let mut closed = h.server.closed_sessions();
    closed.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    assert_eq!(closed, vec![SessionId::new("sess-1"), SessionId::new("sess-2")]);

    let snapshot = h.snapshot();
    assert_eq!(snapshot.port, Some(6666));
    assert_eq!(snapshot.primary_session, Some(SessionId::new("sess-3")));
}

#[tokio::test]
async fn close_of_replaced_transport_is_ignored() {
    let h = Harness::new();

    h.orchestrator
        .connect(false, &endpoint("localhost:5555"))
        .await
        .expect("first connect");
    h.orchestrator
        .connect(false, &endpoint("localhost:6666"))
        .await
        .expect("second connect");

    h.server.kill(0, "late close");
    settle().await;

    assert!(h.snapshot().connected);
    assert!(!h.said("Disconnected from nREPL server"));
}

#[tokio::test]
async fn server_close_clears_sessions() {
    let h = Harness::new();

    h.orchestrator
        .connect(false, &endpoint("localhost:5555"))
        .await
        .expect("connect succeeds");

    h.server.kill(0, "connection reset");
    let snapshot = wait_for_state(&h.orchestrator, |s| !s.connected).await;
    settle().await;

    assert_eq!(snapshot.primary_session, None);
    assert_eq!(snapshot.secondary_session, None);
    assert_eq!(snapshot.ambiguous_session, None);
    assert!(h.said("Disconnected from nREPL server. Error: connection reset"));

    let lookup = h.orchestrator.lookup_info("user", "map").await;
    assert!(matches!(lookup, Err(AppError::NotConnected(_))));
}

#[tokio::test]
async fn can_connect_again_after_server_close() {
    let h = Harness::new();

    h.orchestrator
        .connect(false, &endpoint("localhost:5555"))
        .await
        .expect("first connect");
    h.server.kill(0, "connection reset");
    wait_for_state(&h.orchestrator, |s| !s.connected).await;

    h.orchestrator
        .connect(false, &endpoint("localhost:5555"))
        .await
        .expect("second connect");

    assert!(h.snapshot().connected);
    assert_eq!(h.server.live_transports(), 1);
}

#[tokio::test]
async fn connected_implies_primary_and_ambiguous() {
    let h = Harness::new();
    let mut rx = h.orchestrator.subscribe();

    let watcher = tokio::spawn(async move {
        let mut violations = 0;
        while rx.changed().await.is_ok() {
            let s = rx.borrow_and_update().clone();
            if s.connected && (s.primary_session.is_none() || s.ambiguous_session.is_none()) {
                violations += 1;
            }
            if s.connected && s.secondary_session.is_some() {
                break;
            }
        }
        violations
    });

    h.orchestrator
        .connect(false, &endpoint("localhost:5555"))
        .await
        .expect("connect succeeds");

    let violations = tokio::time::timeout(std::time::Duration::from_secs(2), watcher)
        .await
        .expect("watcher finishes")
        .expect("watcher task");
    assert_eq!(violations, 0);
}
