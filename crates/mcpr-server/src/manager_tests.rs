use super::*;
use mcpr_core::{NoopSink, TransportKind};
use mcpr_store::Store;
use std::fs;

fn write_script(dir: &std::path::Path) -> std::path::PathBuf {
    let path = dir.join("mock-mcp.sh");
    fs::write(
        &path,
        r#"#!/bin/sh
echo "mock server booting" >&2
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id"[ ]*:[ ]*\([^,}]*\).*/\1/p')
  case "$line" in
    *\"initialize\"*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"mock","version":"0.1.0"}}}\n' "$id"
      ;;
    *\"notifications/initialized\"*)
      ;;
    *\"tools/list\"*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"echo_tool","description":"echo","inputSchema":{"type":"object","properties":{}}}]}}\n' "$id"
      ;;
    *\"tools/call\"*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"pong"}]}}\n' "$id"
      ;;
  esac
done
"#,
    )
    .unwrap();

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
    }

    path
}

fn make_manager(config: ManagerConfig) -> Arc<ServerManager> {
    let store = Store::open_in_memory().unwrap();
    ServerManager::new(
        store.servers(),
        store.audit(),
        Arc::new(NoopSink),
        config,
    )
}

fn stdio_input(name: &str, command: &str, args: Vec<String>) -> NewServer {
    NewServer {
        name: name.to_string(),
        transport: TransportKind::Stdio,
        command: Some(command.to_string()),
        args,
        env: HashMap::new(),
        url: None,
        project_id: None,
        tool_permissions: HashMap::new(),
    }
}

fn script_input(name: &str, script: &std::path::Path) -> NewServer {
    stdio_input(name, "sh", vec![script.to_string_lossy().into_owned()])
}

#[test]
fn test_add_validates_transport_invariants() {
    let manager = make_manager(ManagerConfig::default());

    let err = manager
        .add(NewServer {
            name: "bad".to_string(),
            transport: TransportKind::Stdio,
            command: None,
            args: vec![],
            env: HashMap::new(),
            url: None,
            project_id: None,
            tool_permissions: HashMap::new(),
        })
        .unwrap_err();
    assert_eq!(err.kind(), mcpr_core::ErrorKind::Validation);

    let added = manager
        .add(stdio_input("ok", "sh", vec!["-c".to_string(), "true".to_string()]))
        .unwrap();
    assert!(added.id.starts_with("server-"));
    assert_eq!(added.status, ServerStatus::Stopped);
}

#[test]
fn test_update_patches_fields_but_not_status() {
    let manager = make_manager(ManagerConfig::default());
    let added = manager
        .add(stdio_input("fs", "sh", vec![]))
        .unwrap();

    let updated = manager
        .update(
            &added.id,
            ServerPatch {
                name: Some("fs-renamed".to_string()),
                args: Some(vec!["-c".to_string(), "true".to_string()]),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(updated.name, "fs-renamed");
    assert_eq!(updated.status, ServerStatus::Stopped);
    assert_eq!(updated.created_at, added.created_at);

    let missing = manager.update("server-ghost", ServerPatch::default());
    assert!(missing.is_err());
}

#[test]
fn test_lru_eviction_keeps_db_row() {
    let manager = make_manager(ManagerConfig {
        max_servers: 3,
        max_running: 20,
    });

    let s1 = manager.add(stdio_input("s1", "sh", vec![])).unwrap();
    let s2 = manager.add(stdio_input("s2", "sh", vec![])).unwrap();
    let s3 = manager.add(stdio_input("s3", "sh", vec![])).unwrap();
    let s4 = manager.add(stdio_input("s4", "sh", vec![])).unwrap();

    // s1 was oldest and stopped: evicted from cache, still in the DB.
    let cached = manager.cached_ids();
    assert_eq!(cached.len(), 3);
    assert!(!cached.contains(&s1.id));
    assert!(cached.contains(&s4.id));

    // get() re-reads from the DB and re-inserts, evicting the current
    // oldest stopped entry (s2).
    let reloaded = manager.get(&s1.id).unwrap();
    assert_eq!(reloaded.name, "s1");
    let cached = manager.cached_ids();
    assert!(cached.contains(&s1.id));
    assert!(!cached.contains(&s2.id));
    assert!(cached.contains(&s3.id));
}

#[test]
fn test_cache_touch_changes_eviction_order() {
    let manager = make_manager(ManagerConfig {
        max_servers: 2,
        max_running: 20,
    });
    let s1 = manager.add(stdio_input("s1", "sh", vec![])).unwrap();
    let _s2 = manager.add(stdio_input("s2", "sh", vec![])).unwrap();

    // Touch s1 so s2 becomes the eviction candidate.
    manager.get(&s1.id).unwrap();
    let s3 = manager.add(stdio_input("s3", "sh", vec![])).unwrap();

    let cached = manager.cached_ids();
    assert!(cached.contains(&s1.id));
    assert!(cached.contains(&s3.id));
}

#[tokio::test]
async fn test_start_call_stop_round_trip() {
    let temp = tempfile::tempdir().unwrap();
    let script = write_script(temp.path());
    let manager = make_manager(ManagerConfig::default());
    let server = manager.add(script_input("mock", &script)).unwrap();

    let started = manager.start(&server.id).await.unwrap();
    assert_eq!(started.status, ServerStatus::Running);
    assert_eq!(manager.running_count(), 1);

    let tools = manager.get_tools(&server.id).await.unwrap();
    assert_eq!(tools[0].name.as_ref(), "echo_tool");

    let result = manager
        .call_tool(&server.id, "echo_tool", Some(serde_json::json!({"v": 1})), None)
        .await
        .unwrap();
    assert_eq!(
        result.content[0].as_text().map(|t| t.text.as_str()),
        Some("pong")
    );

    // stderr diagnostics captured from the child.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let stderr = manager.recent_stderr(&server.id);
    assert!(stderr.iter().any(|line| line.contains("booting")));

    let stopped = manager.stop(&server.id).await.unwrap();
    assert_eq!(stopped.status, ServerStatus::Stopped);
    assert_eq!(manager.running_count(), 0);
}

#[tokio::test]
async fn test_start_is_idempotent_and_stop_without_start_is_noop() {
    let temp = tempfile::tempdir().unwrap();
    let script = write_script(temp.path());
    let manager = make_manager(ManagerConfig::default());
    let server = manager.add(script_input("mock", &script)).unwrap();

    manager.start(&server.id).await.unwrap();
    let again = manager.start(&server.id).await.unwrap();
    assert_eq!(again.status, ServerStatus::Running);
    assert_eq!(manager.running_count(), 1);

    manager.stop(&server.id).await.unwrap();
    let stopped_again = manager.stop(&server.id).await.unwrap();
    assert_eq!(stopped_again.status, ServerStatus::Stopped);
}

#[tokio::test]
async fn test_running_cap_is_enforced() {
    let temp = tempfile::tempdir().unwrap();
    let script = write_script(temp.path());
    let manager = make_manager(ManagerConfig {
        max_servers: 100,
        max_running: 1,
    });
    let first = manager.add(script_input("one", &script)).unwrap();
    let second = manager.add(script_input("two", &script)).unwrap();

    manager.start(&first.id).await.unwrap();
    let err = manager.start(&second.id).await.unwrap_err();
    assert_eq!(err.kind(), mcpr_core::ErrorKind::Capacity);

    manager.stop(&first.id).await.unwrap();
    manager.start(&second.id).await.unwrap();
    manager.stop_all().await;
}

#[tokio::test]
async fn test_spawn_failure_sets_error_status() {
    let manager = make_manager(ManagerConfig::default());
    let server = manager
        .add(stdio_input("broken", "/nonexistent/binary-mcpr-test", vec![]))
        .unwrap();

    let err = manager.start(&server.id).await.unwrap_err();
    assert_eq!(err.kind(), mcpr_core::ErrorKind::Transport);

    let record = manager.get(&server.id).unwrap();
    assert_eq!(record.status, ServerStatus::Error);
    assert!(record.last_error.is_some());
}

#[tokio::test]
async fn test_restart_round_trip() {
    let temp = tempfile::tempdir().unwrap();
    let script = write_script(temp.path());
    let manager = make_manager(ManagerConfig::default());
    let server = manager.add(script_input("mock", &script)).unwrap();

    manager.start(&server.id).await.unwrap();
    let restarted = manager.restart(&server.id).await.unwrap();
    assert_eq!(restarted.status, ServerStatus::Running);
    assert_eq!(manager.running_count(), 1);
    manager.stop_all().await;
}

#[tokio::test]
async fn test_remove_running_server_stops_it_first() {
    let temp = tempfile::tempdir().unwrap();
    let script = write_script(temp.path());
    let manager = make_manager(ManagerConfig::default());
    let server = manager.add(script_input("mock", &script)).unwrap();

    manager.start(&server.id).await.unwrap();
    manager.remove(&server.id).await.unwrap();

    assert_eq!(manager.running_count(), 0);
    assert!(manager.get(&server.id).is_err());
}

#[tokio::test]
async fn test_get_tools_requires_running() {
    let manager = make_manager(ManagerConfig::default());
    let server = manager.add(stdio_input("idle", "sh", vec![])).unwrap();
    let err = manager.get_tools(&server.id).await.unwrap_err();
    assert_eq!(err.kind(), mcpr_core::ErrorKind::Conflict);
}

fn write_exiting_script(dir: &std::path::Path, name: &str, exit_line: &str) -> std::path::PathBuf {
    // Handshakes, then runs `exit_line` on the next request.
    let path = dir.join(name);
    fs::write(
        &path,
        format!(
            r#"#!/bin/sh
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id"[ ]*:[ ]*\([^,}}]*\).*/\1/p')
  case "$line" in
    *\"initialize\"*)
      printf '{{"jsonrpc":"2.0","id":%s,"result":{{"protocolVersion":"2024-11-05","capabilities":{{"tools":{{}}}},"serverInfo":{{"name":"mock","version":"0.1.0"}}}}}}\n' "$id"
      ;;
    *\"notifications/initialized\"*)
      ;;
    *)
      {exit_line}
      ;;
  esac
done
"#
        ),
    )
    .unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
    }
    path
}

#[tokio::test]
async fn test_unexpected_exit_reconnects_with_backoff() {
    let temp = tempfile::tempdir().unwrap();
    let path = write_exiting_script(temp.path(), "dying-mcp.sh", "exit 7");

    let manager = make_manager(ManagerConfig::default());
    let server = manager.add(script_input("dying", &path)).unwrap();
    manager.start(&server.id).await.unwrap();

    // Trigger the fatal request; the call itself fails with a transport
    // or timeout error.
    let _ = manager
        .call_tool(
            &server.id,
            "anything",
            None,
            Some(Duration::from_millis(500)),
        )
        .await;

    // The exit watcher records the crash, then restarts the server after
    // the initial backoff delay.
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    let record = manager.get(&server.id).unwrap();
    assert_eq!(record.status, ServerStatus::Running);
    assert!(record.last_error.is_none());
    assert_eq!(manager.running_count(), 1);

    manager.stop_all().await;
}

#[tokio::test]
async fn test_clean_exit_stays_stopped_without_reconnect() {
    let temp = tempfile::tempdir().unwrap();
    let path = write_exiting_script(temp.path(), "finishing-mcp.sh", "exit 0");

    let manager = make_manager(ManagerConfig::default());
    let server = manager.add(script_input("finishing", &path)).unwrap();
    manager.start(&server.id).await.unwrap();

    let _ = manager
        .call_tool(
            &server.id,
            "anything",
            None,
            Some(Duration::from_millis(500)),
        )
        .await;

    // A clean exit is unplanned but intentional: no supervision restart.
    tokio::time::sleep(Duration::from_millis(1_000)).await;
    let record = manager.get(&server.id).unwrap();
    assert_eq!(record.status, ServerStatus::Stopped);
    assert!(record.last_error.is_none());
    assert_eq!(manager.running_count(), 0);
}
