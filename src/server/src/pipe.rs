//! Bidirectional copy between the client and the remote with decoding on
//! the side. Forwarded bytes are never modified.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use dumper::log::EventSink;
use dumper::{ConnMetadata, Direction, DumpValue, Dumper};
use reader::flow::new_conn_id;
use reader::proxy_protocol::parse_proxy_protocol_header;

/// One socket read at a time, matching the decoder chunk size.
const MAX_CHUNK_LEN: usize = 0xffff;

/// Serve one accepted connection: dial already done, copy both ways,
/// decode every chunk. Either direction ending tears down the pair.
pub async fn serve_conn(
    dumper: Arc<dyn Dumper>,
    sink: Arc<dyn EventSink>,
    proxy_protocol: bool,
    client: TcpStream,
    remote: TcpStream,
    proxy_listen_addr: SocketAddr,
) -> std::io::Result<()> {
    let conn_id = new_conn_id();
    let client_addr = client.peer_addr()?;
    let proxy_client_addr = remote.local_addr()?;
    let remote_addr = remote.peer_addr()?;

    let mut metadata = dumper.new_conn_metadata();
    let mut head = vec![
        DumpValue::str("conn_id", conn_id.clone()),
        DumpValue::str("client_addr", client_addr.to_string()),
        DumpValue::str("proxy_listen_addr", proxy_listen_addr.to_string()),
        DumpValue::str("proxy_client_addr", proxy_client_addr.to_string()),
        DumpValue::str("remote_addr", remote_addr.to_string()),
    ];
    head.append(&mut metadata.values);
    metadata.values = head;

    if dumper.name() == "conn" {
        let mut event = vec![DumpValue::ts()];
        event.extend(metadata.values.iter().cloned());
        sink.emit(&event);
    }

    info!("proxy conn open. conn_id={conn_id} client_addr={client_addr} remote_addr={remote_addr}");

    let metadata = Arc::new(Mutex::new(metadata));
    let (client_read, client_write) = client.into_split();
    let (remote_read, remote_write) = remote.into_split();

    let result = tokio::select! {
        r = pipe(
            client_read,
            remote_write,
            Direction::ClientToRemote,
            Arc::clone(&dumper),
            Arc::clone(&sink),
            Arc::clone(&metadata),
            proxy_protocol,
        ) => r,
        r = pipe(
            remote_read,
            client_write,
            Direction::RemoteToClient,
            Arc::clone(&dumper),
            Arc::clone(&sink),
            Arc::clone(&metadata),
            false,
        ) => r,
    };

    info!("proxy conn close. conn_id={conn_id}");
    result
}

async fn pipe<R, W>(
    mut src: R,
    mut dst: W,
    direction: Direction,
    dumper: Arc<dyn Dumper>,
    sink: Arc<dyn EventSink>,
    metadata: Arc<Mutex<ConnMetadata>>,
    proxy_protocol: bool,
) -> std::io::Result<()>
where
    R: AsyncRead + Send + Unpin,
    W: AsyncWrite + Send + Unpin,
{
    let mut buf = vec![0u8; MAX_CHUNK_LEN];
    let mut conn_seq_num: i64 = 0;
    let mut first_chunk = true;
    let mut decode_stopped = false;

    loop {
        let n = match src.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if is_silent_termination(&err) => break,
            Err(err) => return Err(err),
        };
        let chunk = &buf[..n];

        // the PROXY header is decoded away but forwarded untouched
        let mut seek = 0;
        if first_chunk && proxy_protocol {
            match parse_proxy_protocol_header(chunk) {
                Ok((length, values)) => {
                    seek = length;
                    metadata.lock().values.extend(values);
                }
                Err(err) => {
                    warn!("proxy protocol header parse error. cause={err}");
                }
            }
        }
        first_chunk = false;

        if !decode_stopped {
            let read_result = {
                let mut metadata = metadata.lock();
                dumper.read(&chunk[seek..], direction, &mut metadata)
            };
            match read_result {
                Ok(values) => {
                    if !values.is_empty() {
                        let mut event = values;
                        event.push(DumpValue::ts());
                        event.push(DumpValue::str("direction", direction.to_string()));
                        event.push(DumpValue::int("conn_seq_num", conn_seq_num));
                        event.extend(metadata.lock().values.iter().cloned());
                        sink.emit(&event);
                    }
                }
                Err(err) if err.is_transient() => {
                    debug!("dumper read dropped a chunk. cause={err}");
                }
                Err(err) => {
                    warn!(
                        "dumper read error, decoding stops for this connection. cause={err} metadata={:?}",
                        metadata.lock().values
                    );
                    decode_stopped = true;
                }
            }
        }

        match dst.write_all(chunk).await {
            Ok(()) => {}
            Err(err) if is_silent_termination(&err) => break,
            Err(err) => return Err(err),
        }
        conn_seq_num += 1;
    }

    let _ = dst.shutdown().await;
    Ok(())
}

/// Peer hangups are the normal end of a pipe, not errors.
fn is_silent_termination(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::NotConnected
    )
}
