//! End-to-end tests of the control daemon.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use dhcp_ctrl::config::load_config;
use dhcp_ctrl::lifecycle::ReloadError;
use dhcp_ctrl::Daemon;
use serde_json::Value;
use tokio::net::TcpStream;

mod common;

fn write_config(name: &str, content: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("dhcp-ctrl-{}-{name}.toml", std::process::id()));
    std::fs::write(&path, content).unwrap();
    path
}

fn start_daemon(name: &str) -> (Daemon, PathBuf) {
    let port = common::free_port();
    let path = write_config(name, &format!("[listener]\nport = {port}\n"));
    let daemon = Daemon::start(&path, load_config(&path).unwrap()).unwrap();
    (daemon, path)
}

fn command(name: &str) -> String {
    let body = format!("{{\"command\": \"{name}\"}}");
    format!(
        "POST / HTTP/1.1\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    )
}

fn answer(response: &str) -> Value {
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "unexpected response: {response}");
    let (_, body) = response.split_once("\r\n\r\n").unwrap();
    serde_json::from_str(body).unwrap()
}

/// Run `f` against the daemon listening on `addr` from a separate client runtime.
fn with_client<F, Fut>(addr: SocketAddr, f: F)
where
    F: FnOnce(TcpStream) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    runtime.block_on(async {
        let stream = TcpStream::connect(addr).await.unwrap();
        f(stream).await;
    });
}

#[test]
fn test_commands_and_shutdown() {
    let (daemon, path) = start_daemon("commands");
    let addr = daemon.local_addr().unwrap();
    let runner = std::thread::spawn(move || daemon.run());

    with_client(addr, |mut stream| async move {
        let listed = answer(&common::send(&mut stream, &command("list-commands")).await);
        assert_eq!(listed["result"], 0);
        assert!(listed["arguments"]
            .as_array()
            .unwrap()
            .contains(&Value::from("status-get")));

        let version = answer(&common::send(&mut stream, &command("version-get")).await);
        assert_eq!(version["text"], env!("CARGO_PKG_VERSION"));

        let status = answer(&common::send(&mut stream, &command("status-get")).await);
        assert_eq!(status["result"], 0);
        assert_eq!(status["arguments"]["pid"], std::process::id());

        let unknown = answer(&common::send(&mut stream, &command("config-write")).await);
        assert_eq!(unknown["result"], 2);

        let shutdown = answer(&common::send(&mut stream, &command("shutdown")).await);
        assert_eq!(shutdown["result"], 0);
    });

    runner.join().unwrap();
    std::fs::remove_file(path).unwrap();
}

#[test]
fn test_reload_applies_listener_changes() {
    let (daemon, path) = start_daemon("reload");
    let first = daemon.local_addr().unwrap();

    assert!(!daemon.reload().unwrap(), "unchanged config reported a listener change");
    assert_eq!(daemon.local_addr().unwrap(), first);
    assert_eq!(daemon.reloads(), 1);

    let port = common::free_port();
    std::fs::write(&path, format!("[listener]\nport = {port}\nidle_timeout_ms = 1234\n")).unwrap();
    assert!(daemon.reload().unwrap());
    assert_eq!(daemon.local_addr().unwrap().port(), port);
    assert_eq!(daemon.config().listener.idle_timeout_ms, 1234);
    assert_eq!(daemon.reloads(), 2);

    // Same endpoint: timeouts change in place, the socket is kept.
    let bound = daemon.local_addr().unwrap();
    std::fs::write(&path, format!("[listener]\nport = {port}\nrequest_timeout_ms = 750\n")).unwrap();
    assert!(daemon.reload().unwrap());
    assert_eq!(daemon.local_addr().unwrap(), bound);
    assert_eq!(daemon.config().listener.request_timeout_ms, 750);
    assert_eq!(daemon.reloads(), 3);

    std::fs::write(&path, "[listener]\nport = 0\n").unwrap();
    assert!(matches!(daemon.reload(), Err(ReloadError::Config(_))));
    assert_eq!(daemon.config().listener.port, port);
    assert_eq!(daemon.local_addr().unwrap().port(), port);
    assert_eq!(daemon.reloads(), 3);

    // Moving back reuses the port released by the first listener.
    std::fs::write(&path, format!("[listener]\nport = {}\n", first.port())).unwrap();
    assert!(daemon.reload().unwrap());
    assert_eq!(daemon.local_addr().unwrap(), first);
    assert!(std::net::TcpStream::connect(first).is_ok());
    assert_eq!(daemon.reloads(), 4);

    std::fs::remove_file(path).unwrap();
}

#[test]
fn test_reload_keeps_listener_when_port_taken() {
    let (daemon, path) = start_daemon("taken");
    let before = daemon.local_addr().unwrap();

    let blocker = std::net::TcpListener::bind((common::LOOPBACK, 0)).unwrap();
    let taken = blocker.local_addr().unwrap().port();
    std::fs::write(&path, format!("[listener]\nport = {taken}\n")).unwrap();

    assert!(matches!(daemon.reload(), Err(ReloadError::Listener(_))));
    assert_eq!(daemon.local_addr().unwrap(), before);
    assert_eq!(daemon.config().listener.port, before.port());

    std::fs::remove_file(path).unwrap();
}

#[test]
fn test_sighup_reloads_configuration() {
    let (daemon, path) = start_daemon("sighup");
    let addr = daemon.local_addr().unwrap();
    let runner = std::thread::spawn(move || daemon.run());

    // SAFETY: the daemon has installed SIGHUP capture.
    unsafe {
        libc::raise(libc::SIGHUP);
    }

    with_client(addr, |mut stream| async move {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let status = answer(&common::send(&mut stream, &command("status-get")).await);
            if status["arguments"]["reload"].as_u64().unwrap() >= 1 {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "SIGHUP never reloaded");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        common::send(&mut stream, &command("shutdown")).await;
    });

    runner.join().unwrap();
    std::fs::remove_file(path).unwrap();
}
