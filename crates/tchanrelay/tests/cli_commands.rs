#![cfg(feature = "cli")]

use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

use tchanrelay_frame::{CallRequest, CallResponse, FrameReader, FrameWriter, MessageType};
use tchanrelay_peer::{connect, handshake_server, HandshakeConfig};
use tchanrelay_transport::{NetStream, TcpTransport};

fn bin() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_tchanrelay"));
    cmd.arg("--log-level").arg("error");
    cmd.env_remove("TCHANRELAY_HOSTS");
    cmd
}

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "tchanrelay-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

/// A service that answers every call with a single `pong` response.
fn spawn_pong_service() -> String {
    let transport = TcpTransport::bind("127.0.0.1:0").expect("service should bind");
    let addr = transport.local_addr().to_string();
    let advertised = addr.clone();
    thread::spawn(move || {
        while let Ok(stream) = transport.accept() {
            let advertised = advertised.clone();
            thread::spawn(move || serve_pong(stream, &advertised));
        }
    });
    addr
}

fn serve_pong(stream: NetStream, advertised: &str) {
    let mut reader = FrameReader::new(stream.try_clone().expect("stream should clone"));
    let mut writer = FrameWriter::new(stream);
    if handshake_server(&mut reader, &mut writer, advertised, &HandshakeConfig::default()).is_err()
    {
        return;
    }
    while let Ok(frame) = reader.read_frame() {
        if frame.message_type() == MessageType::CallReq {
            let res = CallResponse::ok().with_arg("pong").into_frame(frame.id()).unwrap();
            if writer.write_frame(&res).is_err() {
                return;
            }
        }
    }
}

/// Start `serve` on an ephemeral port and return the child and its address.
fn spawn_relay(service_arg: &str) -> (Child, String) {
    let mut child = bin()
        .arg("--format")
        .arg("json")
        .arg("serve")
        .arg("127.0.0.1:0")
        .arg("--service")
        .arg(service_arg)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("serve should start");

    let stdout = child.stdout.take().expect("stdout should be piped");
    let mut line = String::new();
    BufReader::new(stdout)
        .read_line(&mut line)
        .expect("serve should announce its address");
    let announced: serde_json::Value =
        serde_json::from_str(line.trim()).expect("announcement should be JSON");
    let addr = announced["listening"]
        .as_str()
        .expect("listening address present")
        .to_string();
    assert_eq!(announced["services"][0], "echo");
    (child, addr)
}

fn stop(mut child: Child) {
    let _ = child.kill();
    let _ = child.wait();
}

#[test]
fn version_prints_package_version() {
    let output = bin().arg("version").output().expect("version should run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        stdout.trim(),
        format!("tchanrelay {}", env!("CARGO_PKG_VERSION"))
    );
}

#[test]
fn resolve_reads_hosts_file() {
    let dir = unique_temp_dir("resolve");
    let hosts = dir.join("hosts.json");
    std::fs::write(&hosts, r#"{"users": ["10.0.0.1:4040"], "billing": ["10.0.1.1:4040"]}"#)
        .expect("hosts file should write");

    let output = bin()
        .args(["--format", "json", "resolve", "users", "--hosts"])
        .arg(&hosts)
        .output()
        .expect("resolve should run");

    assert!(output.status.success());
    let parsed: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("resolve output should be JSON");
    let resolutions = parsed["resolutions"].as_array().expect("resolutions array");
    assert_eq!(resolutions.len(), 1);
    assert_eq!(resolutions[0]["service"], "users");
    assert_eq!(resolutions[0]["host_port"], "10.0.0.1:4040");
    assert_eq!(resolutions[0]["candidates"], 1);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn resolve_unknown_service_exits_1() {
    let output = bin()
        .args([
            "--format",
            "json",
            "resolve",
            "ghost",
            "--service",
            "users=10.0.0.1:4040",
        ])
        .output()
        .expect("resolve should run");

    assert_eq!(output.status.code(), Some(1));
    let parsed: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("resolve output should be JSON");
    assert!(parsed["resolutions"][0]["host_port"].is_null());
}

#[test]
fn missing_hosts_file_exits_60() {
    let output = bin()
        .args(["resolve", "--hosts", "/nonexistent/tchanrelay-hosts.json"])
        .output()
        .expect("resolve should run");

    assert_eq!(output.status.code(), Some(60));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("cannot read hosts file"));
}

#[test]
fn malformed_service_arg_exits_64() {
    let output = bin()
        .args(["resolve", "--service", "users"])
        .output()
        .expect("resolve should run");

    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn serve_relays_calls_to_registered_service() {
    let service = spawn_pong_service();
    let (child, relay) = spawn_relay(&format!("echo={service}"));

    let mut client = connect(&relay).expect("client should connect to relay");
    client
        .reader
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("read timeout should apply");

    let req = CallRequest::new("echo")
        .with_arg("ping")
        .into_frame(42)
        .expect("call should encode");
    client.writer.write_frame(&req).expect("call should send");

    let res = client.reader.read_frame().expect("response should arrive");
    assert_eq!(res.message_type(), MessageType::CallRes);
    assert_eq!(res.id(), 42);

    stop(child);
}

#[test]
fn info_reports_relay_identity() {
    let service = spawn_pong_service();
    let (child, relay) = spawn_relay(&format!("echo={service}"));

    let output = bin()
        .args(["--format", "json", "info", relay.as_str(), "--timeout", "3s"])
        .output()
        .expect("info should run");

    assert!(output.status.success());
    let parsed: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("info output should be JSON");
    assert_eq!(parsed["connected"], true);
    assert_eq!(parsed["host_port"], relay.as_str());
    assert_eq!(parsed["protocol_version"], 2);
    assert!(parsed["ping_latency_ms"].is_number());

    stop(child);
}

#[test]
fn info_against_closed_port_exits_1() {
    let addr = {
        let transport = TcpTransport::bind("127.0.0.1:0").expect("bind should succeed");
        transport.local_addr().to_string()
    };

    let output = bin()
        .args(["info", addr.as_str(), "--timeout", "500ms"])
        .output()
        .expect("info should run");

    assert_eq!(output.status.code(), Some(1));
}
