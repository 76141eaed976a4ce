//! Control service event loop
//!
//! A single task owns the client table and never waits on a socket. Each
//! client has a reader task that parses lines into requests and a writer
//! task fed through a bounded channel; a client whose backlog fills up is
//! disconnected.

use crate::handlers::{log_push, pubsub_update, CommandHandler};
use crate::log::LogReceiver;
use crate::protocol::{Request, RequestParser, Response};
use relaygate_config::{MonitorConfig, ReplyMode, MONITOR_PLUGIN_NAME};
use relaygate_core::{Result, WorkItem, WorkQueue};
use relaygate_runtime::{Gateway, ShutdownSignal};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

const TICK: Duration = Duration::from_secs(1);

/// Frames queued for one client before it is considered stalled
pub const CLIENT_BACKLOG: usize = 256;

/// Longest request line accepted, in bytes
pub const MAX_LINE: usize = 64 * 1024;

const EVENT_BACKLOG: usize = 64;

type ClientId = u64;
type Frame = Arc<str>;

#[derive(Debug)]
enum ClientEvent {
    Request(ClientId, Request),
    Closed(ClientId),
}

#[derive(Debug)]
struct Client {
    peer: SocketAddr,
    frames: mpsc::Sender<Frame>,
    tasks: Vec<JoinHandle<()>>,
}

impl Drop for Client {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Control service bound to its listening socket
#[derive(Debug)]
pub struct ControlServer {
    listener: TcpListener,
    gateway: Arc<Gateway>,
    handler: CommandHandler,
    queue: Arc<WorkQueue>,
    config: MonitorConfig,
    logs: Option<LogReceiver>,
}

impl ControlServer {
    /// Bind `monitor.listen` and register the monitor endpoint
    pub async fn bind(gateway: Arc<Gateway>, logs: Option<LogReceiver>) -> Result<Self> {
        let config = gateway.config().monitor.clone();
        let listener = TcpListener::bind(config.listen).await?;
        let queue = gateway
            .registry()
            .register_endpoint(MONITOR_PLUGIN_NAME)?;

        info!(
            listen = %listener.local_addr()?,
            max_clients = config.max_clients,
            reply_mode = ?config.reply_mode,
            "Control service listening"
        );

        Ok(Self {
            listener,
            handler: CommandHandler::new(Arc::clone(&gateway), Arc::clone(&queue)),
            gateway,
            queue,
            config,
            logs,
        })
    }

    /// Address actually bound
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve clients until `shutdown` triggers
    pub async fn run(mut self, shutdown: ShutdownSignal) -> Result<()> {
        let (events_tx, mut events_rx) = mpsc::channel(EVENT_BACKLOG);
        let mut clients: BTreeMap<ClientId, Client> = BTreeMap::new();
        let mut next_id: ClientId = 0;
        let mut logs = self.logs.take();

        let mut tick = tokio::time::interval(TICK);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let stopped = shutdown.wait();
        tokio::pin!(stopped);

        loop {
            tokio::select! {
                _ = &mut stopped => break,

                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if clients.len() >= self.config.max_clients {
                            warn!(peer = %peer, max_clients = self.config.max_clients, "Too many control clients, closing");
                            drop(stream);
                            continue;
                        }

                        let id = next_id;
                        next_id += 1;
                        let (reader, writer) = stream.into_split();
                        let (frames, backlog) = mpsc::channel(CLIENT_BACKLOG);
                        let tasks = vec![
                            tokio::spawn(read_client(id, reader, events_tx.clone())),
                            tokio::spawn(write_client(id, writer, backlog, events_tx.clone())),
                        ];
                        clients.insert(id, Client { peer, frames, tasks });
                        info!(client = id, peer = %peer, "Control client connected");
                    }
                    Err(e) => warn!(error = %e, "Failed to accept control client"),
                },

                Some(event) = events_rx.recv() => match event {
                    ClientEvent::Request(id, request) => {
                        let response = self.handler.handle(&request);
                        let target = match self.config.reply_mode {
                            ReplyMode::Broadcast => None,
                            ReplyMode::Requester => Some(id),
                        };
                        deliver(&mut clients, target, &response);
                    }
                    ClientEvent::Closed(id) => {
                        if let Some(client) = clients.remove(&id) {
                            info!(client = id, peer = %client.peer, "Control client disconnected");
                        }
                    }
                },

                Some(line) = next_log(&mut logs) => {
                    if !clients.is_empty() {
                        deliver(&mut clients, None, &log_push(&line));
                    }
                }

                _ = tick.tick() => {
                    self.drain_updates(&mut clients);
                }
            }
        }

        clients.clear();
        self.gateway
            .registry()
            .unregister_endpoint(MONITOR_PLUGIN_NAME);
        info!("Control service stopped");
        Ok(())
    }

    fn drain_updates(&self, clients: &mut BTreeMap<ClientId, Client>) {
        while let Some(item) = self.queue.try_dequeue() {
            match item {
                WorkItem::Message(message) => {
                    deliver(clients, None, &pubsub_update(&message));
                }
                WorkItem::Packet(packet) => {
                    debug!(packet = %packet.id(), "Discarding packet sent to the monitor");
                    self.gateway.services().packets().release(&packet);
                }
            }
        }
    }
}

async fn next_log(logs: &mut Option<LogReceiver>) -> Option<String> {
    match logs {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn read_client(id: ClientId, reader: OwnedReadHalf, events: mpsc::Sender<ClientEvent>) {
    let mut parser = RequestParser::new();
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let read = (&mut reader)
            .take(MAX_LINE as u64 + 1)
            .read_until(b'\n', &mut buf)
            .await;

        match read {
            Ok(0) => break,
            Ok(_) if buf.last() != Some(&b'\n') && buf.len() > MAX_LINE => {
                warn!(client = id, limit = MAX_LINE, "Control request line too long, closing client");
                break;
            }
            Ok(_) => {
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                }
                let line = String::from_utf8_lossy(&buf);
                if let Some(request) = parser.feed_line(&line) {
                    if events.send(ClientEvent::Request(id, request)).await.is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                warn!(client = id, error = %e, "Control client read failed");
                break;
            }
        }
    }

    let _ = events.send(ClientEvent::Closed(id)).await;
}

async fn write_client(
    id: ClientId,
    mut writer: OwnedWriteHalf,
    mut frames: mpsc::Receiver<Frame>,
    events: mpsc::Sender<ClientEvent>,
) {
    while let Some(frame) = frames.recv().await {
        if let Err(e) = writer.write_all(frame.as_bytes()).await {
            warn!(client = id, error = %e, "Transmission failed, closing client");
            let _ = events.send(ClientEvent::Closed(id)).await;
            return;
        }
    }
    let _ = writer.shutdown().await;
}

/// Queue `response` for every client, or only `target`
///
/// Never waits: a client whose backlog is full is disconnected.
fn deliver(clients: &mut BTreeMap<ClientId, Client>, target: Option<ClientId>, response: &Response) {
    let frame: Frame = response.encode().into();

    clients.retain(|id, client| {
        if target.is_some_and(|t| t != *id) {
            return true;
        }
        match client.frames.try_send(Arc::clone(&frame)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(client = *id, peer = %client.peer, "Control client is not reading, closing");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(capacity: usize) -> (Client, mpsc::Receiver<Frame>) {
        let (frames, backlog) = mpsc::channel(capacity);
        let client = Client {
            peer: "127.0.0.1:9".parse().unwrap(),
            frames,
            tasks: Vec::new(),
        };
        (client, backlog)
    }

    #[test]
    fn test_stalled_client_is_dropped_without_blocking_others() {
        let (stalled, _stalled_backlog) = client(1);
        let (healthy, mut healthy_backlog) = client(CLIENT_BACKLOG);
        let mut clients = BTreeMap::from([(0, stalled), (1, healthy)]);

        deliver(&mut clients, None, &Response::new("stats").line("a"));
        assert_eq!(clients.len(), 2);

        deliver(&mut clients, None, &Response::new("stats").line("b"));
        assert_eq!(clients.keys().copied().collect::<Vec<_>>(), vec![1]);

        let first = healthy_backlog.try_recv().unwrap();
        assert!(first.starts_with("stats response\n"));
        assert!(healthy_backlog.try_recv().is_ok());
    }

    #[test]
    fn test_targeted_delivery() {
        let (a, mut a_backlog) = client(4);
        let (b, mut b_backlog) = client(4);
        let mut clients = BTreeMap::from([(0, a), (1, b)]);

        deliver(&mut clients, Some(1), &Response::new("graph"));
        assert!(a_backlog.try_recv().is_err());
        assert!(b_backlog.try_recv().is_ok());
    }

    #[test]
    fn test_disconnected_client_is_removed() {
        let (gone, backlog) = client(4);
        drop(backlog);
        let mut clients = BTreeMap::from([(0, gone)]);

        deliver(&mut clients, None, &Response::new("graph"));
        assert!(clients.is_empty());
    }
}
