use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use nrped::commands::{CommandDefinition, CommandInvoker, CommandOption, CommandRegistry};
use nrped::config::{AppConfig, BindAddress, ServerConfig};
use nrped::context::ServerContext;
use nrped::core::{EventBus, EventKind, EventListener, ReturnValue, ServerEvent, Status};
use nrped::plugins::PluginRegistry;
use nrped::plugins::builtin::CHECK_TEST;
use nrped::protocol::client::CheckClient;
use nrped::protocol::packet::{Packet, VERSION_2, read_packet, write_packet};
use nrped::server::{AllowList, Listener, Server, TIMEOUT_MESSAGE};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::timeout;

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<ServerEvent>>,
}

impl EventListener for Recorder {
    fn notify(&self, event: &ServerEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

impl Recorder {
    fn messages(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.message.clone())
            .collect()
    }
}

fn commands() -> CommandRegistry {
    let mut registry = CommandRegistry::new();
    registry
        .add(
            CommandDefinition::new("check_echo", CHECK_TEST)
                .with_args("--status $ARG1$")
                .with_option(CommandOption::new("text", Some("$ARG2$"))),
        )
        .unwrap();
    registry
        .add(CommandDefinition::new("check_slow", CHECK_TEST).with_args("--delay 5"))
        .unwrap();
    registry
}

fn context(config: ServerConfig, allow: AllowList, events: EventBus) -> ServerContext {
    let invoker = CommandInvoker::new(
        Arc::new(commands()),
        Arc::new(PluginRegistry::with_builtins()),
    );
    ServerContext::new(config, invoker, allow, events)
}

async fn start(config: ServerConfig, allow: AllowList) -> (Listener, Arc<Recorder>) {
    let events = EventBus::new();
    let recorder = Arc::new(Recorder::default());
    events.subscribe(recorder.clone());

    let listener = Listener::bind(
        &BindAddress::new("127.0.0.1", 0),
        None,
        context(config, allow, events),
    )
    .await
    .expect("bind listener");
    (listener, recorder)
}

async fn raw_exchange(addr: SocketAddr, request: &Packet) -> Packet {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    write_packet(&mut stream, request).await.unwrap();
    timeout(Duration::from_secs(5), read_packet(&mut stream))
        .await
        .expect("timeout waiting for response")
        .expect("read response")
}

#[tokio::test]
async fn test_health_check() {
    let (listener, recorder) = start(ServerConfig::default(), AllowList::loopback()).await;

    let result = CheckClient::new(listener.local_addr())
        .check("_NRPE_CHECK", &[] as &[&str])
        .await
        .unwrap();

    assert_eq!(result.status, Status::Ok);
    assert_eq!(result.message, format!("nrped v{}", env!("CARGO_PKG_VERSION")));

    listener.close().await;
    let messages = recorder.messages();
    assert!(messages.contains(&"Listener started".to_string()));
    assert!(messages.contains(&"Listener closed".to_string()));
}

#[tokio::test]
async fn test_macro_substitution_end_to_end() {
    let (listener, _) = start(ServerConfig::default(), AllowList::loopback()).await;

    let result = CheckClient::new(listener.local_addr())
        .check("check_echo", &["WARNING", "disk nearly full"])
        .await
        .unwrap();

    assert_eq!(result.status, Status::Warning);
    assert_eq!(result.message, "disk nearly full");
    listener.close().await;
}

#[tokio::test]
async fn test_unknown_command() {
    let (listener, _) = start(ServerConfig::default(), AllowList::loopback()).await;

    let result = CheckClient::new(listener.local_addr())
        .check("check_nothing", &[] as &[&str])
        .await
        .unwrap();

    assert_eq!(result, ReturnValue::unknown("Bad command"));
    listener.close().await;
}

#[tokio::test]
async fn test_bad_crc_rejected() {
    let (listener, _) = start(ServerConfig::default(), AllowList::loopback()).await;

    let mut request = Packet::query(VERSION_2, "check_echo", &["OK", "fine"]);
    request.crc = request.crc.wrapping_add(1);
    let response = raw_exchange(listener.local_addr(), &request).await;

    response.validate().unwrap();
    assert_eq!(response.result_code, Status::Unknown.code());
    assert_eq!(response.message(), "BAD REQUEST CRC");
    listener.close().await;
}

#[tokio::test]
async fn test_response_type_rejected() {
    let (listener, _) = start(ServerConfig::default(), AllowList::loopback()).await;

    let request = Packet::response(VERSION_2, &ReturnValue::ok("hello"));
    let response = raw_exchange(listener.local_addr(), &request).await;

    assert_eq!(response.result_code, Status::Unknown.code());
    assert_eq!(response.message(), "Invalid Packet Type");
    listener.close().await;
}

#[tokio::test]
async fn test_disallowed_peer_gets_nothing() {
    let allow = AllowList::from_addrs(["10.255.255.1".parse().unwrap()]);
    let (listener, recorder) = start(ServerConfig::default(), allow).await;

    let mut stream = TcpStream::connect(listener.local_addr()).await.unwrap();
    let request = Packet::query(VERSION_2, "_NRPE_CHECK", &[] as &[&str]);
    let _ = write_packet(&mut stream, &request).await;

    let mut buf = Vec::new();
    let read = timeout(Duration::from_secs(5), stream.read_to_end(&mut buf))
        .await
        .expect("connection should be closed");
    // Either a clean EOF or a reset, but never response bytes.
    if read.is_ok() {
        assert!(buf.is_empty());
    }

    listener.close().await;
    assert!(recorder.messages().contains(&"Connection refused".to_string()));
}

#[tokio::test]
async fn test_long_running_command_times_out() {
    let config = ServerConfig {
        command_timeout: Duration::from_secs(1),
        watchdog_interval: Duration::from_millis(100),
    };
    let (listener, recorder) = start(config, AllowList::loopback()).await;

    let started = Instant::now();
    let result = CheckClient::new(listener.local_addr())
        .check("check_slow", &[] as &[&str])
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(result.status, Status::Unknown);
    assert_eq!(result.message, TIMEOUT_MESSAGE);
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_secs(3), "took {:?}", elapsed);

    listener.close().await;
    let events = recorder.events.lock().unwrap();
    assert!(
        events
            .iter()
            .any(|e| e.kind == EventKind::Warning && e.message == TIMEOUT_MESSAGE)
    );
}

#[tokio::test]
async fn test_close_stops_in_flight_connections() {
    let (listener, _) = start(ServerConfig::default(), AllowList::loopback()).await;
    let addr = listener.local_addr();

    let pending = tokio::spawn(async move {
        CheckClient::new(addr)
            .check("check_slow", &[] as &[&str])
            .await
    });
    tokio::time::sleep(Duration::from_millis(200)).await;

    timeout(Duration::from_secs(6), listener.close())
        .await
        .expect("close should not hang");

    let result = timeout(Duration::from_secs(3), pending)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(result.message, TIMEOUT_MESSAGE);

    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn test_concurrent_clients() {
    let (listener, _) = start(ServerConfig::default(), AllowList::loopback()).await;
    let addr = listener.local_addr();

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            tokio::spawn(async move {
                let text = format!("client {}", i);
                let result = CheckClient::new(addr)
                    .check("check_echo", &["OK", text.as_str()])
                    .await
                    .unwrap();
                (text, result)
            })
        })
        .collect();

    for task in tasks {
        let (text, result) = task.await.unwrap();
        assert_eq!(result.status, Status::Ok);
        assert_eq!(result.message, text);
    }
    listener.close().await;
}

#[tokio::test]
async fn test_server_skips_failed_bindings() {
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let taken = occupied.local_addr().unwrap().port();

    let config = AppConfig {
        bind: vec![
            BindAddress::new("127.0.0.1", taken),
            BindAddress::new("127.0.0.1", 0),
        ],
        ..AppConfig::default()
    };
    let events = EventBus::new();
    let recorder = Arc::new(Recorder::default());
    events.subscribe(recorder.clone());

    let server = Server::start(
        &config,
        context(config.server_config(), AllowList::loopback(), events),
    )
    .await
    .unwrap();

    let addrs = server.local_addrs();
    assert_eq!(addrs.len(), 1);
    assert_ne!(addrs[0].port(), taken);
    assert!(
        recorder
            .messages()
            .contains(&"Listener failed to start".to_string())
    );

    server.shutdown().await;
}

#[tokio::test]
async fn test_server_fails_when_nothing_binds() {
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let taken = occupied.local_addr().unwrap().port();

    let config = AppConfig {
        bind: vec![BindAddress::new("127.0.0.1", taken)],
        ..AppConfig::default()
    };

    let result = Server::start(
        &config,
        context(config.server_config(), AllowList::loopback(), EventBus::new()),
    )
    .await;
    assert!(result.is_err());
}
