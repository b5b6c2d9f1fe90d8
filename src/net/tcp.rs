//! TCP acceptor and stream socket, in all three facades.
//!
//! Accept and connect are single-shot submissions, not transfer loops,
//! but they follow the same shape as the transfer drivers: kernel-read
//! state (the peer-address storage for accept, the encoded address for
//! connect) lives in a heap-held locals block owned by the in-flight
//! operation.
//!
//! A connected [`Socket`] exposes its descriptor as a stream [`Fd`], so
//! the transfer facades in [`crate::io`] work on it directly.

use std::io;
use std::net::SocketAddr;
use std::os::fd::{FromRawFd, OwnedFd};

use io_uring::{opcode, types};
use socket2::{Domain, Protocol, SockAddr, SockRef, Type};
use tracing::debug;

use crate::context::Context;
use crate::error::Result;
use crate::fd::Fd;
use crate::io::future::op_future;
use crate::op::Op;

/// A listening TCP socket.
pub struct Acceptor {
    fd: Fd,
}

/// A connected TCP stream socket.
pub struct Socket {
    fd: Fd,
}

impl Acceptor {
    /// Bind and listen on `addr`. Port zero picks an ephemeral port,
    /// readable back through [`Acceptor::local_addr`].
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let sock = socket2::Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        sock.set_reuse_address(true)?;
        sock.bind(&addr.into())?;
        sock.listen(128)?;
        let fd = Fd::stream(OwnedFd::from(sock));
        debug!(fd = fd.raw(), %addr, "listening");
        Ok(Self { fd })
    }

    /// The bound local address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        sock_addr(SockRef::from(&self.fd).local_addr()?)
    }

    /// The listening descriptor.
    pub fn fd(&self) -> &Fd {
        &self.fd
    }

    /// Accept one connection, blocking until a peer arrives.
    pub fn accept(&self) -> Result<(Socket, SocketAddr)> {
        let (sock, peer) = SockRef::from(&self.fd).accept()?;
        Ok((Socket::from_parts(OwnedFd::from(sock)), sock_addr(peer)?))
    }

    /// Submit an accept; the continuation receives the connected
    /// socket.
    pub fn accept_cb(
        &self,
        ctx: &Context,
        callback: impl FnOnce(Result<Socket>) + Send + 'static,
    ) {
        let entry = opcode::Accept::new(
            types::Fd(self.fd.raw()),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
        )
        .flags(libc::SOCK_CLOEXEC)
        .build();
        let continuation: crate::SyscallCallback = Box::new(move |result| {
            callback(result.map(|raw|
                // SAFETY: a non-negative accept result is a fresh
                // descriptor owned by no one else.
                Socket::from_parts(unsafe { OwnedFd::from_raw_fd(raw) })))
        });
        if let Err((err, continuation)) = ctx.add_sqe_recoverable(entry, continuation) {
            continuation(Err(err));
        }
    }

    /// Submit an accept that also captures the peer address.
    ///
    /// The kernel writes the address into operation-owned storage sized
    /// at entry; the filled length is read back and decoded when the
    /// completion arrives.
    pub fn accept_with_addr_cb(
        &self,
        ctx: &Context,
        callback: impl FnOnce(Result<(Socket, SocketAddr)>) + Send + 'static,
    ) {
        let locals = AcceptLocals {
            // SAFETY: sockaddr_storage is valid all-zeroes.
            storage: unsafe { std::mem::zeroed() },
            len: std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t,
        };
        let mut op = Op::new(
            ctx.clone(),
            locals,
            move |locals: Box<AcceptLocals>, result: Result<Socket>| match result {
                Ok(sock) => {
                    // SAFETY: the kernel filled `len` bytes of storage
                    // with the peer address on success.
                    let addr = unsafe { SockAddr::new(locals.storage, locals.len) };
                    callback(sock_addr(addr).map(|peer| (sock, peer)));
                }
                Err(err) => callback(Err(err)),
            },
        );
        let entry = opcode::Accept::new(
            types::Fd(self.fd.raw()),
            (&mut op.locals.storage as *mut libc::sockaddr_storage).cast(),
            &mut op.locals.len,
        )
        .flags(libc::SOCK_CLOEXEC)
        .build();
        op.submit(entry, accept_step);
    }

    /// Accept as a future.
    pub async fn accept_async(&self, ctx: &Context) -> Result<Socket> {
        op_future(|complete| self.accept_cb(ctx, move |result| complete.set(result))).await
    }

    /// Accept with peer address as a future.
    pub async fn accept_with_addr_async(&self, ctx: &Context) -> Result<(Socket, SocketAddr)> {
        op_future(|complete| self.accept_with_addr_cb(ctx, move |result| complete.set(result)))
            .await
    }
}

struct AcceptLocals {
    storage: libc::sockaddr_storage,
    len: libc::socklen_t,
}

fn accept_step(op: Op<AcceptLocals, Socket>, result: Result<i32>) {
    match result {
        // SAFETY: see accept_cb; the descriptor is freshly accepted.
        Ok(raw) => op.complete(Ok(Socket::from_parts(unsafe { OwnedFd::from_raw_fd(raw) }))),
        Err(err) => op.complete(Err(err)),
    }
}

struct ConnectLocals {
    fd: Fd,
    addr: SockAddr,
}

fn connect_step(op: Op<ConnectLocals, Socket>, result: Result<i32>) {
    match result {
        Ok(_) => {
            let fd = op.locals.fd.clone();
            op.complete(Ok(Socket { fd }));
        }
        Err(err) => op.complete(Err(err)),
    }
}

impl Socket {
    fn from_parts(fd: OwnedFd) -> Self {
        Self {
            fd: Fd::stream(fd),
        }
    }

    /// Connect to `addr`, blocking until established.
    pub fn connect(addr: SocketAddr) -> Result<Self> {
        let sock = socket2::Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        sock.connect(&addr.into())?;
        Ok(Self::from_parts(OwnedFd::from(sock)))
    }

    /// Submit a connect; the continuation receives the connected
    /// socket.
    ///
    /// The encoded address lives in operation-owned storage until the
    /// completion arrives, as the kernel reads it after submission.
    pub fn connect_cb(
        ctx: &Context,
        addr: SocketAddr,
        callback: impl FnOnce(Result<Socket>) + Send + 'static,
    ) {
        let sock = match socket2::Socket::new(
            Domain::for_address(addr),
            Type::STREAM,
            Some(Protocol::TCP),
        ) {
            Ok(sock) => sock,
            Err(err) => {
                callback(Err(err.into()));
                return;
            }
        };
        let locals = ConnectLocals {
            fd: Fd::stream(OwnedFd::from(sock)),
            addr: addr.into(),
        };
        let op = Op::new(
            ctx.clone(),
            locals,
            move |_locals: Box<ConnectLocals>, result| callback(result),
        );
        let entry = opcode::Connect::new(
            types::Fd(op.locals.fd.raw()),
            op.locals.addr.as_ptr().cast(),
            op.locals.addr.len(),
        )
        .build();
        op.submit(entry, connect_step);
    }

    /// Connect as a future.
    pub async fn connect_async(ctx: &Context, addr: SocketAddr) -> Result<Socket> {
        op_future(|complete| Socket::connect_cb(ctx, addr, move |result| complete.set(result)))
            .await
    }

    /// The connected descriptor, usable with the [`crate::io`] facades.
    pub fn fd(&self) -> &Fd {
        &self.fd
    }

    /// The local address of this end.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        sock_addr(SockRef::from(&self.fd).local_addr()?)
    }

    /// The peer's address.
    pub fn peer_addr(&self) -> Result<SocketAddr> {
        sock_addr(SockRef::from(&self.fd).peer_addr()?)
    }

    /// Half-close the write side, delivering EOF to the peer.
    pub fn shutdown_write(&self) -> Result<()> {
        SockRef::from(&self.fd).shutdown(std::net::Shutdown::Write)?;
        Ok(())
    }
}

fn sock_addr(addr: SockAddr) -> Result<SocketAddr> {
    addr.as_socket()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "non-inet peer address").into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::callback as aio;
    use crate::transfer::transfer_all;
    use std::sync::mpsc;

    fn localhost() -> SocketAddr {
        "127.0.0.1:0".parse().expect("addr")
    }

    #[test]
    fn blocking_accept_and_connect() {
        let acceptor = Acceptor::bind(localhost()).expect("bind");
        let addr = acceptor.local_addr().expect("local addr");

        let peer = std::thread::spawn(move || Socket::connect(addr).expect("connect"));
        let (sock, peer_addr) = acceptor.accept().expect("accept");
        let client = peer.join().expect("client thread");

        assert_eq!(peer_addr.ip(), addr.ip());
        assert_eq!(
            client.local_addr().expect("client local").port(),
            peer_addr.port()
        );
        assert_eq!(sock.peer_addr().expect("peer").port(), peer_addr.port());
    }

    #[test]
    fn ring_accept_captures_peer_address() {
        let ctx = Context::new().expect("context");
        let acceptor = Acceptor::bind(localhost()).expect("bind");
        let addr = acceptor.local_addr().expect("local addr");
        let (tx, rx) = mpsc::channel();

        let ctx2 = ctx.clone();
        acceptor.accept_with_addr_cb(&ctx, move |result| {
            let (_sock, peer) = result.expect("accept");
            tx.send(peer).expect("send");
            ctx2.exit().expect("exit");
        });

        let client = std::thread::spawn(move || {
            let sock = std::net::TcpStream::connect(addr).expect("connect");
            sock.local_addr().expect("local")
        });

        ctx.run().expect("run");
        let seen = rx.recv().expect("peer addr");
        let actual = client.join().expect("client thread");
        assert_eq!(seen, actual);
    }

    #[test]
    fn ring_connect_then_echo_one_message() {
        let ctx = Context::new().expect("context");
        let acceptor = Acceptor::bind(localhost()).expect("bind");
        let addr = acceptor.local_addr().expect("local addr");
        let (tx, rx) = mpsc::channel();

        // Peer side: plain std networking on another thread.
        let server = std::thread::spawn(move || {
            use std::io::{Read, Write};
            let (mut sock, _) = SockRef::from(acceptor.fd())
                .accept()
                .map(|(s, a)| (std::net::TcpStream::from(s), a))
                .expect("accept");
            let mut buf = [0u8; 4];
            sock.read_exact(&mut buf).expect("read");
            sock.write_all(&buf).expect("write back");
        });

        let ctx2 = ctx.clone();
        Socket::connect_cb(&ctx, addr, move |result| {
            let sock = result.expect("connect");
            let fd = sock.fd().clone();
            let ctx3 = ctx2.clone();
            let fd_for_read = fd.clone();
            aio::write(&ctx2, &fd, b"ping".to_vec(), transfer_all(), move |result, _| {
                result.expect("write");
                let ctx4 = ctx3.clone();
                let fd2 = fd_for_read.clone();
                aio::read(
                    &ctx3,
                    &fd2,
                    vec![0u8; 4],
                    transfer_all(),
                    move |result, buf| {
                        result.expect("read");
                        tx.send(buf).expect("send");
                        ctx4.exit().expect("exit");
                    },
                );
                // The in-flight read holds its own descriptor clone.
                drop(sock);
            });
        });

        ctx.run().expect("run");
        server.join().expect("server thread");
        assert_eq!(&rx.recv().expect("echo"), b"ping");
    }
}
