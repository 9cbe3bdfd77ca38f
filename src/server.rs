//! TCP accept loop and the per-connection session driver.
//!
//! `rredis`'s `src/server.rs` + `src/eventloop.rs` drive one `ae` reactor
//! that multiplexes every client fd on a single thread, calling back into
//! `handler.rs` when a fd becomes readable. This repository spawns one
//! tokio task per connection instead (§5: "each client connection has an
//! independent task driving its session state machine"), so the
//! accept-loop/per-connection-state shape is the same idea, rebuilt on
//! `tokio::net::TcpListener` rather than `libc::epoll_wait`. A connection's
//! task owns its socket via `Arc<TcpStream>` (not `split()`) so the same fd
//! can be read from the command loop and peeked from the blocking-command
//! disconnect watcher at once, the standard tokio idiom for this shape.

use crate::commands::{dispatch, Shared};
use crate::config::Config;
use crate::resp::read_frame;
use crate::session::{ClientId, Outbox, Session};
use crate::transaction::TransactionBuffer;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

pub struct Server {
    shared: Arc<Shared>,
    config: Config,
}

impl Server {
    pub fn new(config: Config) -> Self {
        Server { shared: Arc::new(Shared::new(config.is_replica())), config }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let addr = format!("0.0.0.0:{}", self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        info!(%addr, replica = self.config.is_replica(), "rudis-server listening");

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    let shared = self.shared.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(shared, stream).await {
                            warn!(%peer, error = %e, "connection ended with error");
                        }
                    });
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown signal received, no longer accepting connections");
                    return Ok(());
                }
            }
        }
    }
}

async fn handle_connection(shared: Arc<Shared>, stream: TcpStream) -> anyhow::Result<()> {
    let stream = Arc::new(stream);
    let client = ClientId::next();
    let (outbox, mut outbound_rx) = Outbox::new();
    shared.clients.register(client, outbox);

    let mut reader = BufReader::new(&*stream);
    let mut session = Session::new(client);
    let mut tx_buffer = TransactionBuffer::new();

    let result: anyhow::Result<()> = async {
        loop {
            tokio::select! {
                biased;
                frame = read_frame(&mut reader) => {
                    let Some(argv) = frame? else { break };
                    if argv.is_empty() {
                        continue;
                    }
                    let cancel = watch_disconnect(stream.clone());
                    let outcome = dispatch(&shared, client, &mut session, &mut tx_buffer, argv, cancel).await;
                    for reply in &outcome.replies {
                        let mut buf = Vec::new();
                        reply.encode(&mut buf);
                        (&*stream).write_all(&buf).await?;
                    }
                    (&*stream).flush().await?;
                    if outcome.close {
                        break;
                    }
                }
                Some(frame) = outbound_rx.recv() => {
                    (&*stream).write_all(&frame).await?;
                    (&*stream).flush().await?;
                }
            }
        }
        Ok(())
    }
    .await;

    shared.clients.unregister(client);
    shared.pubsub.drop_client(client);
    shared.replication.detach(client);
    result
}

/// Polls the raw socket for peer-initiated close while a command is
/// parked in the blocking coordinator. `peek` doesn't consume bytes, so it
/// can run concurrently with the connection's normal read loop on the same
/// `Arc<TcpStream>` without contending for the framed reader's buffer.
async fn watch_disconnect(stream: Arc<TcpStream>) {
    let mut probe = [0u8; 1];
    loop {
        match stream.peek(&mut probe).await {
            Ok(0) => return,
            Ok(_) => tokio::time::sleep(Duration::from_millis(50)).await,
            Err(_) => return,
        }
    }
}
