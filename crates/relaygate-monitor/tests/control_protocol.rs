//! Control protocol over a real socket

use relaygate_config::{ConfigBuilder, MonitorConfig, PathResolver, PluginConfig};
use relaygate_core::{Packet, Value};
use relaygate_monitor::{parse_responses, ControlServer, Response, MAX_LINE};
use relaygate_plugin_api::{Host, Plugin, PluginHost};
use relaygate_runtime::{Gateway, ModuleCatalog};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

#[derive(Debug)]
struct Sink;

impl Plugin for Sink {
    fn process_packet(&mut self, _packet: &Packet) -> bool {
        true
    }
}

fn sink(_host: Host) -> Box<dyn Plugin> {
    Box::new(Sink)
}

struct Harness {
    gateway: Arc<Gateway>,
    addr: SocketAddr,
    server: JoinHandle<relaygate_core::Result<()>>,
    _dir: tempfile::TempDir,
}

impl Harness {
    async fn start(max_clients: usize) -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("src.yaml"), "outputs:\n  - plugin: Dst\n").unwrap();

        let config = ConfigBuilder::new()
            .monitor(MonitorConfig {
                listen: "127.0.0.1:0".parse().unwrap(),
                max_clients,
                ..MonitorConfig::default()
            })
            .plugin_conf_dir(".")
            .plugin(PluginConfig::new("Src", "builtin:sink").with_config("src.yaml"))
            .plugin(PluginConfig::new("Dst", "builtin:sink"))
            .build()
            .unwrap();

        let gateway = Arc::new(Gateway::new(config, ModuleCatalog::new().with("sink", sink)));
        let resolver = PathResolver::new(dir.path(), dir.path(), &gateway.config().gateway);
        gateway.start(&resolver).unwrap();

        let server = ControlServer::bind(Arc::clone(&gateway), None).await.unwrap();
        let addr = server.local_addr().unwrap();
        let server = tokio::spawn(server.run(gateway.shutdown_signal()));

        Self {
            gateway,
            addr,
            server,
            _dir: dir,
        }
    }

    async fn stop(self) {
        self.gateway.shutdown_signal().trigger();
        self.server.await.unwrap().unwrap();
        self.gateway.shutdown();
    }
}

async fn read_until(stream: &mut TcpStream, buf: &mut String, command: &str) -> Response {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(found) = parse_responses(buf).into_iter().find(|r| r.command == command) {
            return found;
        }
        let mut chunk = [0u8; 4096];
        let n = tokio::time::timeout_at(deadline, stream.read(&mut chunk))
            .await
            .expect("timed out waiting for response")
            .unwrap();
        assert!(n > 0, "connection closed while waiting for {command}");
        buf.push_str(std::str::from_utf8(&chunk[..n]).unwrap());
    }
}

#[tokio::test]
async fn stats_request_lists_core_and_every_plugin() {
    let harness = Harness::start(5).await;
    let mut client = TcpStream::connect(harness.addr).await.unwrap();

    client.write_all(b"stats\n\n\x0b\n").await.unwrap();
    let mut buf = String::new();
    let stats = read_until(&mut client, &mut buf, "stats").await;
    assert!(buf.starts_with("stats response\n"));

    let lines: Vec<&str> = stats.data.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("CORE|"));
    for line in &lines[1..] {
        let (_, fields) = line.split_once('|').unwrap();
        let fields: Vec<&str> = fields.split(' ').collect();
        assert_eq!(fields.len(), 5);
        assert!(fields.iter().all(|f| f.parse::<u64>().is_ok()));
    }

    harness.stop().await;
}

#[tokio::test]
async fn responses_are_broadcast_to_every_client() {
    let harness = Harness::start(5).await;
    let mut first = TcpStream::connect(harness.addr).await.unwrap();
    let mut second = TcpStream::connect(harness.addr).await.unwrap();

    second.write_all(b"stats\n\n\x0b\n").await.unwrap();
    let mut buf = String::new();
    read_until(&mut second, &mut buf, "stats").await;

    first.write_all(b"graph\n\n\x0b\n").await.unwrap();
    let mut buf = String::new();
    let graph = read_until(&mut second, &mut buf, "graph").await;
    assert_eq!(graph.data, "Src|Dst\n");

    harness.stop().await;
}

#[tokio::test]
async fn subscription_pushes_updates() {
    let harness = Harness::start(5).await;
    let mut client = TcpStream::connect(harness.addr).await.unwrap();

    client
        .write_all(b"pubsub_subscribe\nfq_name=Src.load\n\n\x0b\n")
        .await
        .unwrap();
    let mut buf = String::new();
    let ack = read_until(&mut client, &mut buf, "pubsub_subscribe").await;
    assert_eq!(ack.options["result"], "ok");

    let src = harness.gateway.registry().get("Src").unwrap();
    assert!(src.context().publish("Src.load", &Value::new(0.5f64)));

    let update = read_until(&mut client, &mut buf, "pubsub_update").await;
    assert_eq!(update.options["fq_name"], "Src.load");
    assert_eq!(update.options["plugin"], "Src");
    assert_eq!(update.data, "0.5\n");

    harness.stop().await;
}

#[tokio::test]
async fn excess_clients_are_closed() {
    let harness = Harness::start(1).await;
    let mut first = TcpStream::connect(harness.addr).await.unwrap();
    first.write_all(b"stats\n\n\x0b\n").await.unwrap();
    let mut buf = String::new();
    read_until(&mut first, &mut buf, "stats").await;

    let mut second = TcpStream::connect(harness.addr).await.unwrap();
    let mut chunk = [0u8; 64];
    let n = tokio::time::timeout(Duration::from_secs(5), second.read(&mut chunk))
        .await
        .expect("excess client should be closed")
        .unwrap_or(0);
    assert_eq!(n, 0);

    harness.stop().await;
}

#[tokio::test]
async fn invalid_utf8_does_not_end_the_session() {
    let harness = Harness::start(5).await;
    let mut client = TcpStream::connect(harness.addr).await.unwrap();

    client
        .write_all(b"stats\nnote=\xff\xfe\n\n\x0b\n")
        .await
        .unwrap();
    let mut buf = String::new();
    let stats = read_until(&mut client, &mut buf, "stats").await;
    assert!(stats.data.starts_with("CORE|"));

    client.write_all(b"graph\n\n\x0b\n").await.unwrap();
    let graph = read_until(&mut client, &mut buf, "graph").await;
    assert_eq!(graph.data, "Src|Dst\n");

    harness.stop().await;
}

#[tokio::test]
async fn overlong_line_closes_the_client() {
    let harness = Harness::start(5).await;
    let mut client = TcpStream::connect(harness.addr).await.unwrap();

    let flood = vec![b'a'; MAX_LINE + 16];
    let _ = client.write_all(&flood).await;

    let mut chunk = [0u8; 64];
    let n = tokio::time::timeout(Duration::from_secs(5), client.read(&mut chunk))
        .await
        .expect("overlong line should close the client")
        .unwrap_or(0);
    assert_eq!(n, 0);

    harness.stop().await;
}
