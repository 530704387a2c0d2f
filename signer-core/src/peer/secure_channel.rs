//! Mutually authenticated transport for the cosigner peer layer (spec
//! §4.G/§6). Every peer connection — outbound (`connect_authenticated`) or
//! inbound (`accept_authenticated`) — first runs the same handshake used for
//! the secret transport, then tunnels the resulting byte stream through a
//! [`SealedChannel`]: two background tasks shuttle plaintext between an
//! in-memory `tokio::io::duplex` pipe (handed to `tonic`/`hyper`, which
//! doesn't care about frame boundaries) and sealed frames on the real
//! socket.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use ed25519_dalek::VerifyingKey;
use futures::Stream;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use crate::error::{Result, SignerError};
use crate::transport::framing::SealedChannel;
use crate::transport::handshake::{self, Identity};

/// The duplex half handed to `tonic`/`hyper`, standing in for a bare
/// `TcpStream` once the handshake and sealing are done.
pub struct SecureStream {
	inner: tokio::io::DuplexStream,
}

impl AsyncRead for SecureStream {
	fn poll_read(
		self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &mut ReadBuf<'_>,
	) -> Poll<std::io::Result<()>> {
		Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
	}
}

impl AsyncWrite for SecureStream {
	fn poll_write(
		self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &[u8],
	) -> Poll<std::io::Result<usize>> {
		Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
	}

	fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
		Pin::new(&mut self.get_mut().inner).poll_flush(cx)
	}

	fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
		Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
	}
}

impl hyper::client::connect::Connection for SecureStream {
	fn connected(&self) -> hyper::client::connect::Connected {
		hyper::client::connect::Connected::new()
	}
}

impl tonic::transport::server::Connected for SecureStream {
	type ConnectInfo = PeerIdentity;

	fn connect_info(&self) -> Self::ConnectInfo {
		PeerIdentity::default()
	}
}

/// Placeholder connect-info; the handshake already authenticates the channel
/// before it ever reaches `tonic`, so request handlers don't need the peer
/// key out of band today.
#[derive(Clone, Default)]
pub struct PeerIdentity(pub Option<VerifyingKey>);

/// Dial `addr`, run the initiator handshake proving `identity` and expecting
/// `expected_peer`, and return the tunneled duplex stream.
pub async fn connect_authenticated(
	addr: &str,
	identity: Arc<Identity>,
	expected_peer: VerifyingKey,
) -> Result<SecureStream> {
	let stream = TcpStream::connect(addr)
		.await
		.map_err(|e| SignerError::Transport(format!("dial {addr}: {e}")))?;
	let (reader, writer) = tokio::io::split(stream);
	let reader = Arc::new(Mutex::new(reader));
	let writer = Arc::new(Mutex::new(writer));

	let keys = {
		let w = writer.clone();
		let r = reader.clone();
		handshake::initiate(
			&identity,
			&expected_peer,
			move |bytes| {
				let w = w.clone();
				Box::pin(async move { w.lock().await.write_all(&bytes).await })
			},
			move || {
				let r = r.clone();
				Box::pin(async move {
					let mut buf = vec![0u8; 128];
					r.lock().await.read_exact(&mut buf).await?;
					Ok(buf)
				})
			},
		)
		.await?
	};

	let reader = match Arc::try_unwrap(reader) {
		Ok(m) => m.into_inner(),
		Err(_) => unreachable!("handshake closures hold no lingering reference after completing"),
	};
	let writer = match Arc::try_unwrap(writer) {
		Ok(m) => m.into_inner(),
		Err(_) => unreachable!("handshake closures hold no lingering reference after completing"),
	};
	let stream = reader.unsplit(writer);

	Ok(tunnel(stream, SealedChannel::new(keys)))
}

/// Accept one already-connected socket, run the responder handshake against
/// any of `acceptable_peers`, and return the tunneled stream plus whichever
/// peer key matched.
pub async fn accept_authenticated(
	stream: TcpStream,
	identity: Arc<Identity>,
	acceptable_peers: Arc<Vec<VerifyingKey>>,
) -> Result<(SecureStream, VerifyingKey)> {
	let (reader, writer) = tokio::io::split(stream);
	let reader = Arc::new(Mutex::new(reader));
	let writer = Arc::new(Mutex::new(writer));

	let (keys, peer_key) = {
		let w = writer.clone();
		let r = reader.clone();
		handshake::respond_any(
			&identity,
			&acceptable_peers,
			move |bytes| {
				let w = w.clone();
				Box::pin(async move { w.lock().await.write_all(&bytes).await })
			},
			move || {
				let r = r.clone();
				Box::pin(async move {
					let mut buf = vec![0u8; 128];
					r.lock().await.read_exact(&mut buf).await?;
					Ok(buf)
				})
			},
		)
		.await?
	};

	let reader = match Arc::try_unwrap(reader) {
		Ok(m) => m.into_inner(),
		Err(_) => unreachable!("handshake closures hold no lingering reference after completing"),
	};
	let writer = match Arc::try_unwrap(writer) {
		Ok(m) => m.into_inner(),
		Err(_) => unreachable!("handshake closures hold no lingering reference after completing"),
	};
	let stream = reader.unsplit(writer);

	Ok((tunnel(stream, SealedChannel::new(keys)), peer_key))
}

/// A `Stream` of authenticated, tunneled connections suitable for
/// `tonic::transport::Server::serve_with_incoming_shutdown`. A peer that
/// fails the handshake (wrong identity, bad signature) is dropped and the
/// listener keeps accepting rather than tearing down the whole server.
pub fn authenticated_incoming(
	listener: TcpListener,
	identity: Arc<Identity>,
	acceptable_peers: Arc<Vec<VerifyingKey>>,
) -> impl Stream<Item = std::result::Result<SecureStream, std::io::Error>> {
	futures::stream::unfold((listener, identity, acceptable_peers), |state| async move {
		let (listener, identity, acceptable_peers) = state;
		loop {
			match listener.accept().await {
				Ok((stream, _peer_addr)) => {
					match accept_authenticated(stream, identity.clone(), acceptable_peers.clone()).await {
						Ok((secure, _peer_key)) => {
							return Some((Ok(secure), (listener, identity, acceptable_peers)));
						}
						Err(e) => {
							tracing::warn!(error = %e, "cosigner peer handshake failed, dropping connection");
							continue;
						}
					}
				}
				Err(e) => return Some((Err(e), (listener, identity, acceptable_peers))),
			}
		}
	})
}

fn tunnel(stream: TcpStream, sealed: SealedChannel) -> SecureStream {
	let sealed = Arc::new(sealed);
	let (app_half, net_half) = tokio::io::duplex(64 * 1024);
	tokio::spawn(bridge(net_half, stream, sealed));
	SecureStream { inner: app_half }
}

/// Shuttle bytes between the in-memory duplex handed to `tonic` and sealed
/// frames on the real socket, one task per direction sharing one
/// `SealedChannel` (its nonce counters are independent per direction, so no
/// further locking is needed).
async fn bridge(app_half: tokio::io::DuplexStream, tcp: TcpStream, sealed: Arc<SealedChannel>) {
	let (mut tcp_read, mut tcp_write) = tcp.into_split();
	let (mut app_read, mut app_write) = tokio::io::split(app_half);

	let outbound_sealed = sealed.clone();
	let outbound = async move {
		let mut buf = vec![0u8; 16 * 1024];
		loop {
			let n = match app_read.read(&mut buf).await {
				Ok(0) | Err(_) => break,
				Ok(n) => n,
			};
			let frame = match outbound_sealed.seal(&buf[..n]) {
				Ok(frame) => frame,
				Err(_) => break,
			};
			if tcp_write.write_all(&frame).await.is_err() {
				break;
			}
		}
	};

	let inbound = async move {
		loop {
			let mut len_prefix = [0u8; 4];
			if tcp_read.read_exact(&mut len_prefix).await.is_err() {
				break;
			}
			let len = match SealedChannel::read_length_prefix(len_prefix) {
				Ok(len) => len,
				Err(_) => break,
			};
			let mut ciphertext = vec![0u8; len];
			if tcp_read.read_exact(&mut ciphertext).await.is_err() {
				break;
			}
			let plaintext = match sealed.open(&ciphertext) {
				Ok(plaintext) => plaintext,
				Err(_) => break,
			};
			if app_write.write_all(&plaintext).await.is_err() {
				break;
			}
		}
	};

	tokio::join!(outbound, inbound);
}
