//! Process-level tests for both binaries: arguments, exit codes and the
//! status line protocol.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::process::{Child, ChildStdout, Command, Stdio};

const CLIENT: &str = env!("CARGO_BIN_EXE_bounce-notify");
const SERVER: &str = env!("CARGO_BIN_EXE_mock-bouncer");

fn client() -> Command {
    let mut cmd = Command::new(CLIENT);
    for var in [
        "BOUNCE_NOTIFY_SERVER",
        "BOUNCE_NOTIFY_TIMEOUT_SECS",
        "BOUNCE_NOTIFY_MAX_BODY_BYTES",
        "BOUNCE_NOTIFY_LOG_LEVEL",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

fn run_client(args: &[&str], stdin: &[u8]) -> i32 {
    let mut child = client()
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn bounce-notify");
    // The client may exit before consuming stdin.
    let _ = child.stdin.take().unwrap().write_all(stdin);
    child.wait().unwrap().code().expect("exit code")
}

/// Start `mock-bouncer` on an ephemeral port and return it with the bound
/// address taken from its `LISTENING` line.
fn start_server(extra: &[&str]) -> (Child, BufReader<ChildStdout>, String) {
    let mut child = Command::new(SERVER)
        .args(["--listen", "127.0.0.1:0"])
        .args(extra)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn mock-bouncer");
    let mut stdout = BufReader::new(child.stdout.take().unwrap());

    let mut line = String::new();
    stdout.read_line(&mut line).unwrap();
    let addr = line
        .strip_prefix("LISTENING ")
        .expect("first line announces the listener")
        .trim()
        .to_string();
    (child, stdout, addr)
}

#[test]
fn test_client_help_and_version() {
    let help = client().arg("--help").output().unwrap();
    assert_eq!(help.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&help.stdout).contains("--server"));

    let version = client().arg("-V").output().unwrap();
    assert_eq!(version.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&version.stdout).starts_with("bounce-notify "));
}

#[test]
fn test_client_usage_errors() {
    assert_eq!(run_client(&[], b""), 64);
    assert_eq!(run_client(&["--from", "a@x.com"], b""), 64);
    assert_eq!(run_client(&["--from", "a", "--to", "b", "--bogus"], b""), 64);
    // --server is required unless configured elsewhere.
    assert_eq!(run_client(&["--from", "a", "--to", "b"], b"hello"), 64);
    assert_eq!(
        run_client(
            &["--server", "127.0.0.1:1", "--from", "a", "--to", "b", "--timeout-secs", "0"],
            b"hello"
        ),
        64
    );
}

#[test]
fn test_client_tempfails_when_nobody_listens() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let code = run_client(
        &["--server", &addr, "--from", "a", "--to", "b", "--timeout-secs", "2"],
        b"hello",
    );
    assert_eq!(code, 75);
}

#[test]
fn test_end_to_end_delivery() {
    let (mut server, mut stdout, addr) = start_server(&[]);

    let code = run_client(
        &["--server", &addr, "--from", "a@x.com", "--to", "b@y.com"],
        b"hello",
    );
    assert_eq!(code, 0);

    let mut rest = String::new();
    stdout.read_to_string(&mut rest).unwrap();
    assert_eq!(
        rest,
        "FRAME header_len=59 body_len=5\n\
         HEADER {\"from\":\"a@x.com\",\"to\":\"b@y.com\",\"kind\":null,\"source\":null}\n\
         RESULT ok\n"
    );
    assert_eq!(server.wait().unwrap().code(), Some(0));
}

#[test]
fn test_oversized_stdin_tempfails_before_connecting() {
    let (mut server, _stdout, addr) = start_server(&[]);

    let body = vec![b'x'; 50 * 1024 + 1];
    let code = run_client(&["--server", &addr, "--from", "a", "--to", "b"], &body);
    assert_eq!(code, 75);

    // The server is still waiting for its one connection.
    assert!(server.try_wait().unwrap().is_none());
    server.kill().unwrap();
    let _ = server.wait();
}

#[test]
fn test_server_bad_magic_exit_code() {
    let (mut server, mut stdout, addr) = start_server(&[]);

    let mut stream = TcpStream::connect(&addr).unwrap();
    stream.write_all(b"XXXX\0\0\0\x05\0\0\0\0\0\0\0\0hello").unwrap();
    let mut reply = Vec::new();
    let _ = stream.read_to_end(&mut reply);
    assert!(reply.is_empty());

    let mut rest = String::new();
    stdout.read_to_string(&mut rest).unwrap();
    assert_eq!(rest, "REJECTED bad_magic\n");
    assert_eq!(server.wait().unwrap().code(), Some(5));
}

#[test]
fn test_server_truncated_prefix_exit_code() {
    let (mut server, _stdout, addr) = start_server(&[]);

    let mut stream = TcpStream::connect(&addr).unwrap();
    stream.write_all(b"BNCE\0\0").unwrap();
    drop(stream);

    assert_eq!(server.wait().unwrap().code(), Some(4));
}

#[test]
fn test_server_header_limit_flag() {
    let (mut server, _stdout, addr) = start_server(&["--max-header-bytes", "8"]);

    let code = run_client(
        &["--server", &addr, "--from", "a@x.com", "--to", "b@y.com", "--timeout-secs", "2"],
        b"hello",
    );
    assert_eq!(code, 75);
    assert_eq!(server.wait().unwrap().code(), Some(6));
}

#[test]
fn test_server_bind_failure_exit_code() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = taken.local_addr().unwrap().to_string();

    let status = Command::new(SERVER)
        .args(["--listen", &addr])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(2));
}

fn write_config(name: &str, contents: &str) -> std::path::PathBuf {
    let path = std::env::temp_dir().join(format!(
        "bounce-notify-cli-{}-{name}.toml",
        std::process::id()
    ));
    std::fs::write(&path, contents).expect("write temp config");
    path
}

#[test]
fn test_config_without_server_is_usage_error() {
    let path = write_config("no-server", "[logging]\nlog_level = \"error\"\n");
    let code = run_client(
        &["--config", path.to_str().unwrap(), "--from", "a", "--to", "b"],
        b"hello",
    );
    std::fs::remove_file(&path).unwrap();
    assert_eq!(code, 64);
}

#[test]
fn test_missing_config_file_is_usage_error() {
    let code = run_client(
        &["--config", "/nonexistent/bounce-notify.toml", "--from", "a", "--to", "b"],
        b"hello",
    );
    assert_eq!(code, 64);
}

#[test]
fn test_server_address_from_config_file() {
    let (mut server, mut stdout, addr) = start_server(&[]);
    let path = write_config(
        "with-server",
        &format!("[client]\nserver_address = \"{addr}\"\n"),
    );

    let code = run_client(
        &["--config", path.to_str().unwrap(), "--from", "a@x.com", "--to", "b@y.com"],
        b"hello",
    );
    std::fs::remove_file(&path).unwrap();
    assert_eq!(code, 0);

    let mut rest = String::new();
    stdout.read_to_string(&mut rest).unwrap();
    assert!(rest.ends_with("RESULT ok\n"));
    assert_eq!(server.wait().unwrap().code(), Some(0));
}

#[test]
fn test_server_rejects_invalid_limits_before_binding() {
    for args in [
        ["--read-timeout-secs", "0"],
        ["--max-header-bytes", "0"],
    ] {
        let output = Command::new(SERVER)
            .args(["--listen", "127.0.0.1:0"])
            .args(args)
            .stderr(Stdio::null())
            .output()
            .unwrap();
        assert_eq!(output.status.code(), Some(1), "{args:?}");
        assert!(output.stdout.is_empty(), "{args:?} should not start listening");
    }
}
