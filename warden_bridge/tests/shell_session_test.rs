//! Shell session behavior over in-process channel connections.

mod common;

use common::{WAIT, read_until, read_until_closed, sh_config};
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::timeout;
use warden_bridge::{
    ChannelConnection, CloseReason, SessionPhase, ShellConfig, ShellSession, TerminationReason,
    run_session,
};

#[tokio::test]
async fn test_echo_marker_round_trip() {
    let temp = TempDir::new().unwrap();
    let (mut server, mut client) = ChannelConnection::pair(16);
    let config = sh_config(temp.path());
    let session = tokio::spawn(async move { run_session(&mut server, &config).await });

    client.send("echo warden_marker_42\n").await.unwrap();
    let transcript = read_until(&mut client, "warden_marker_42\n").await;

    assert!(
        transcript.text.contains("warden_marker_42\n"),
        "output was: {:?}",
        transcript.text
    );
    assert!(transcript.closed.is_none());

    client.disconnect();
    let outcome = timeout(WAIT, session).await.unwrap().unwrap();
    assert_eq!(outcome.reason, TerminationReason::ClientDisconnected);
    assert_eq!(outcome.frames_in, 1);
    assert!(outcome.frames_out >= 1);
}

#[tokio::test]
async fn test_shell_starts_in_working_dir() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("present.txt"), "x").unwrap();
    let (mut server, mut client) = ChannelConnection::pair(16);
    let config = sh_config(temp.path());
    let _session = tokio::spawn(async move { run_session(&mut server, &config).await });

    client.send("ls\n").await.unwrap();
    let transcript = read_until(&mut client, "present.txt").await;

    assert!(transcript.text.contains("present.txt"));
}

#[tokio::test]
async fn test_stderr_is_forwarded() {
    let temp = TempDir::new().unwrap();
    let (mut server, mut client) = ChannelConnection::pair(16);
    let config = sh_config(temp.path());
    let _session = tokio::spawn(async move { run_session(&mut server, &config).await });

    client.send("echo oops_on_stderr 1>&2\n").await.unwrap();
    let transcript = read_until(&mut client, "oops_on_stderr").await;

    assert!(transcript.text.contains("oops_on_stderr"));
}

#[tokio::test]
async fn test_input_without_newline_is_buffered_by_shell() {
    let temp = TempDir::new().unwrap();
    let (mut server, mut client) = ChannelConnection::pair(16);
    let config = sh_config(temp.path());
    let _session = tokio::spawn(async move { run_session(&mut server, &config).await });

    client.send("echo split_").await.unwrap();
    client.send("input\n").await.unwrap();
    let transcript = read_until(&mut client, "split_input").await;

    assert!(transcript.text.contains("split_input"));
}

#[tokio::test]
async fn test_multibyte_output_survives_single_byte_reads() {
    let temp = TempDir::new().unwrap();
    let (mut server, mut client) = ChannelConnection::pair(64);
    let config = ShellConfig {
        read_chunk_size: 1,
        ..sh_config(temp.path())
    };
    let _session = tokio::spawn(async move { run_session(&mut server, &config).await });

    client.send("echo héllo_あ_done\n").await.unwrap();
    let transcript = read_until(&mut client, "_done").await;

    assert!(
        transcript.text.contains("héllo_あ_done"),
        "output was: {:?}",
        transcript.text
    );
    assert!(!transcript.text.contains('\u{FFFD}'));
}

#[tokio::test]
async fn test_exit_ends_session_with_normal_close() {
    let temp = TempDir::new().unwrap();
    let (mut server, mut client) = ChannelConnection::pair(16);
    let config = sh_config(temp.path());
    let session = tokio::spawn(async move { run_session(&mut server, &config).await });

    client.send("exit\n").await.unwrap();
    let closed = read_until_closed(&mut client).await;

    let reason = closed.expect("session should close").expect("close reason");
    assert_eq!(reason.code, CloseReason::NORMAL);

    let outcome = timeout(WAIT, session).await.unwrap().unwrap();
    assert_eq!(outcome.reason, TerminationReason::ProcessExited);
}

#[tokio::test]
async fn test_spawn_failure_closes_with_internal_error() {
    let temp = TempDir::new().unwrap();
    let (mut server, mut client) = ChannelConnection::pair(16);
    let config = ShellConfig {
        command: "/definitely/not/a/shell".to_string(),
        ..sh_config(temp.path())
    };
    let outcome = run_session(&mut server, &config).await;

    assert_eq!(outcome.reason, TerminationReason::SpawnFailed);
    assert!(outcome.session_id.is_none());
    assert!(outcome.pid.is_none());

    let reason = read_until_closed(&mut client)
        .await
        .expect("session should close")
        .expect("close reason");
    assert_eq!(reason.code, CloseReason::INTERNAL_ERROR);
    assert!(reason.reason.contains("Failed to start shell"));
}

#[tokio::test]
async fn test_sessions_do_not_share_processes() {
    let temp = TempDir::new().unwrap();
    let config = sh_config(temp.path());
    let first = ShellSession::start(&config).unwrap();
    let second = ShellSession::start(&config).unwrap();

    assert_ne!(first.id(), second.id());
    assert!(first.pid().is_some());
    assert_ne!(first.pid(), second.pid());
}

#[tokio::test]
async fn test_start_moves_lifecycle_to_connected() {
    let temp = TempDir::new().unwrap();
    let mut session = ShellSession::start(&sh_config(temp.path())).unwrap();

    assert_eq!(
        session.phase(),
        SessionPhase::Connected { pid: session.pid() }
    );

    session.shutdown(TerminationReason::ClientDisconnected).await;
    assert_eq!(
        session.phase(),
        SessionPhase::Terminated {
            reason: TerminationReason::ClientDisconnected
        }
    );
}

#[tokio::test]
async fn test_shutdown_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let mut session = ShellSession::start(&sh_config(temp.path())).unwrap();
    let lifecycle = session.lifecycle();

    session.shutdown(TerminationReason::StreamError).await;
    session.shutdown(TerminationReason::ProcessExited).await;

    assert_eq!(
        lifecycle.wait_terminated().await,
        TerminationReason::StreamError
    );
}

#[tokio::test]
async fn test_write_after_shutdown_is_rejected() {
    let temp = TempDir::new().unwrap();
    let mut session = ShellSession::start(&sh_config(temp.path())).unwrap();
    session.shutdown(TerminationReason::ClientDisconnected).await;

    assert!(session.write_input("echo late\n").is_err());
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_disconnect_kills_and_reaps_shell() {
    let temp = TempDir::new().unwrap();
    let (mut server, mut client) = ChannelConnection::pair(16);
    let config = sh_config(temp.path());
    let session = tokio::spawn(async move { run_session(&mut server, &config).await });

    client.send("echo ready\n").await.unwrap();
    assert!(read_until(&mut client, "ready").await.text.contains("ready"));

    client.disconnect();
    let outcome = timeout(WAIT, session).await.unwrap().unwrap();

    assert_eq!(outcome.reason, TerminationReason::ClientDisconnected);
    let pid = outcome.pid.expect("pid recorded at spawn");
    assert!(!common::process_alive(pid), "shell {} still present", pid);
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_disconnect_while_shell_input_is_backed_up() {
    let temp = TempDir::new().unwrap();
    let (mut server, client) = ChannelConnection::pair(16);
    let config = ShellConfig {
        command: "cat".to_string(),
        ..sh_config(temp.path())
    };
    let session = tokio::spawn(async move { run_session(&mut server, &config).await });

    // cat echoes everything back and nobody reads it, so stdout, the event
    // queue and finally cat's stdin all fill up.
    client.send("x".repeat(4 * 1024 * 1024)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    client.disconnect();

    let outcome = timeout(WAIT, session)
        .await
        .expect("session must end after disconnect")
        .unwrap();
    assert_eq!(outcome.reason, TerminationReason::ClientDisconnected);
    let pid = outcome.pid.expect("pid recorded at spawn");
    assert!(!common::process_alive(pid), "cat {} still present", pid);
}

#[tokio::test]
async fn test_stderr_written_just_before_exit_is_delivered() {
    let temp = TempDir::new().unwrap();
    let (mut server, mut client) = ChannelConnection::pair(16);
    let config = sh_config(temp.path());
    let _session = tokio::spawn(async move { run_session(&mut server, &config).await });

    client
        .send("echo out_tail; echo err_tail 1>&2; exit\n")
        .await
        .unwrap();
    let transcript = read_until(&mut client, "no such output").await;

    assert!(transcript.text.contains("out_tail"), "{:?}", transcript.text);
    assert!(transcript.text.contains("err_tail"), "{:?}", transcript.text);
    let reason = transcript.closed.expect("session should close").expect("close reason");
    assert_eq!(reason.code, CloseReason::NORMAL);
}

#[tokio::test]
async fn test_dropped_session_terminates_lifecycle() {
    let temp = TempDir::new().unwrap();
    let session = ShellSession::start(&sh_config(temp.path())).unwrap();
    let lifecycle = session.lifecycle();

    drop(session);

    assert_eq!(
        lifecycle.current(),
        SessionPhase::Terminated {
            reason: TerminationReason::ClientDisconnected
        }
    );
}
