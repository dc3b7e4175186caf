use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nrped::commands::{CommandInvoker, CommandRegistry};
use nrped::config::{BindAddress, ServerConfig, TlsConfig};
use nrped::context::ServerContext;
use nrped::core::{EventBus, EventKind, EventListener, ServerEvent, Status};
use nrped::plugins::PluginRegistry;
use nrped::protocol::packet::{Packet, PacketType, VERSION_2, read_packet, write_packet};
use nrped::server::{AllowList, Listener};
use rustls::RootCertStore;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, ServerName};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<ServerEvent>>,
}

impl EventListener for Recorder {
    fn notify(&self, event: &ServerEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

async fn start_tls() -> (Listener, Arc<Recorder>) {
    let events = EventBus::new();
    let recorder = Arc::new(Recorder::default());
    events.subscribe(recorder.clone());

    let invoker = CommandInvoker::new(
        Arc::new(CommandRegistry::new()),
        Arc::new(PluginRegistry::with_builtins()),
    );
    let ctx = ServerContext::new(ServerConfig::default(), invoker, AllowList::loopback(), events);

    let binding = BindAddress {
        tls: true,
        ..BindAddress::new("127.0.0.1", 0)
    };
    let tls = TlsConfig {
        certificate: fixture("server.pem"),
        private_key: fixture("server-key.pem"),
    };

    let listener = Listener::bind(&binding, Some(&tls), ctx)
        .await
        .expect("bind TLS listener");
    (listener, recorder)
}

fn connector() -> TlsConnector {
    let mut roots = RootCertStore::empty();
    let ca = CertificateDer::from_pem_file(fixture("ca.pem")).expect("read test CA");
    roots.add(ca).expect("add test CA");

    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

#[tokio::test]
async fn test_health_check_over_tls() {
    let (listener, _) = start_tls().await;

    let tcp = TcpStream::connect(listener.local_addr()).await.unwrap();
    let server_name = ServerName::try_from("localhost").unwrap();
    let mut stream = timeout(Duration::from_secs(5), connector().connect(server_name, tcp))
        .await
        .expect("timeout during handshake")
        .expect("TLS handshake");

    let request = Packet::query(VERSION_2, "_NRPE_CHECK", &[] as &[&str]);
    write_packet(&mut stream, &request).await.unwrap();
    let response = timeout(Duration::from_secs(5), read_packet(&mut stream))
        .await
        .expect("timeout waiting for response")
        .expect("read response");

    response.validate().unwrap();
    assert_eq!(response.kind(), Some(PacketType::Response));
    assert_eq!(response.result_code, Status::Ok.code());
    assert_eq!(
        response.message(),
        format!("nrped v{}", env!("CARGO_PKG_VERSION"))
    );

    listener.close().await;
}

#[tokio::test]
async fn test_plain_client_on_tls_port_fails_handshake() {
    let (listener, recorder) = start_tls().await;

    let mut tcp = TcpStream::connect(listener.local_addr()).await.unwrap();
    let request = Packet::query(VERSION_2, "_NRPE_CHECK", &[] as &[&str]);
    let _ = write_packet(&mut tcp, &request).await;

    let reported = timeout(Duration::from_secs(5), async {
        loop {
            let failed = recorder
                .events
                .lock()
                .unwrap()
                .iter()
                .any(|e| e.kind == EventKind::Error && e.message == "TLS handshake failed");
            if failed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(reported.is_ok(), "handshake failure was not reported");

    drop(tcp);
    listener.close().await;
}
