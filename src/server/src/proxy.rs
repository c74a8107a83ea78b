//! TCP proxy server mode: accept, dial the remote, pipe both ways.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{info, warn};

use common::ShutdownMessage;
use dumper::log::EventSink;
use dumper::Dumper;

use crate::pipe::serve_conn;

pub struct ProxyServer {
    pub listen_addr: SocketAddr,
    pub remote_addr: SocketAddr,
    pub proxy_protocol: bool,
    pub use_server_starter: bool,
    dumper: Arc<dyn Dumper>,
    sink: Arc<dyn EventSink>,
}

impl ProxyServer {
    pub fn new(
        listen_addr: SocketAddr,
        remote_addr: SocketAddr,
        proxy_protocol: bool,
        use_server_starter: bool,
        dumper: Arc<dyn Dumper>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        ProxyServer {
            listen_addr,
            remote_addr,
            proxy_protocol,
            use_server_starter,
            dumper,
            sink,
        }
    }

    pub async fn serve(
        &self,
        shutdown: watch::Receiver<ShutdownMessage>,
    ) -> anyhow::Result<()> {
        if self.use_server_starter {
            // listener inheritance lives outside this process; without a
            // supervisor handing in the socket we bind directly
            warn!("server_starter socket not inherited, binding {} directly", self.listen_addr);
        }
        let listener = TcpListener::bind(self.listen_addr).await?;
        self.serve_with_listener(listener, shutdown).await
    }

    pub async fn serve_with_listener(
        &self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<ShutdownMessage>,
    ) -> anyhow::Result<()> {
        let proxy_listen_addr = listener.local_addr()?;
        info!(
            "starting proxy. listen_addr={} remote_addr={} dumper={}",
            proxy_listen_addr,
            self.remote_addr,
            self.dumper.name()
        );

        let mut conns: JoinSet<()> = JoinSet::new();
        let graceful = loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break true;
                    }
                    match shutdown.borrow_and_update().clone() {
                        ShutdownMessage::Immediate(msg) => {
                            info!("proxy immediate shutdown. {msg}");
                            break false;
                        }
                        ShutdownMessage::Graceful(msg) => {
                            info!("proxy graceful shutdown. {msg}");
                            break true;
                        }
                        ShutdownMessage::Init => {}
                    }
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((client, client_addr)) => {
                            let remote_addr = self.remote_addr;
                            let dumper = Arc::clone(&self.dumper);
                            let sink = Arc::clone(&self.sink);
                            let proxy_protocol = self.proxy_protocol;
                            conns.spawn(async move {
                                match TcpStream::connect(remote_addr).await {
                                    Ok(remote) => {
                                        if let Err(err) = serve_conn(
                                            dumper,
                                            sink,
                                            proxy_protocol,
                                            client,
                                            remote,
                                            proxy_listen_addr,
                                        )
                                        .await
                                        {
                                            warn!("proxy conn error. client={client_addr} cause={err}");
                                        }
                                    }
                                    Err(err) => {
                                        warn!("remote dial error. client={client_addr} remote={remote_addr} cause={err}");
                                    }
                                }
                            });
                        }
                        Err(err) => {
                            warn!("accept error. cause={err}");
                        }
                    }
                }
            }
        };

        drop(listener);
        if graceful {
            info!("draining {} in-flight conns", conns.len());
            while conns.join_next().await.is_some() {}
        } else {
            conns.shutdown().await;
        }
        Ok(())
    }
}
