use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::config::AppConfig;
use crate::net::packets::{build_bb_welcome, build_patch_welcome};
use crate::net::patch::{DataProgress, PatchFileSet};
use crate::net::session::{Action, Session};
use crate::params::ParameterCache;
use crate::persistence::storage::Storage;
use crate::telemetry::logging;

const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(50);
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything the role dispatchers share. Immutable after startup apart
/// from the connection registry.
pub struct ServerContext {
    pub config: AppConfig,
    pub storage: Arc<dyn Storage>,
    pub params: Arc<ParameterCache>,
    pub patches: Arc<PatchFileSet>,
    pub connections: ConnectionList,
    pub welcome_message: String,
    pub scroll_message: String,
    pub redirect_ip: [u8; 4],
}

impl ServerContext {
    pub fn new(
        config: AppConfig,
        storage: Arc<dyn Storage>,
        params: Arc<ParameterCache>,
        patches: Arc<PatchFileSet>,
    ) -> Result<Self, String> {
        let redirect_ip = config.redirect_ip()?;
        let welcome_message = config.welcome_message.clone();
        let scroll_message = config.scroll_message.clone();
        Ok(ServerContext {
            config,
            storage,
            params,
            patches,
            connections: ConnectionList::new(),
            welcome_message,
            scroll_message,
            redirect_ip,
        })
    }
}

/// Observable registry of live sessions across all roles.
#[derive(Debug, Default)]
pub struct ConnectionList {
    entries: Mutex<HashMap<u64, String>>,
    next_id: AtomicU64,
}

impl ConnectionList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, addr: &str) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(id, addr.to_string());
        }
        id
    }

    pub fn remove(&self, id: u64) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(&id);
        }
    }

    pub fn count(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }
}

struct ConnectionGuard {
    ctx: Arc<ServerContext>,
    id: u64,
}

impl ConnectionGuard {
    fn new(ctx: Arc<ServerContext>, addr: &str) -> Self {
        let id = ctx.connections.add(addr);
        Self { ctx, id }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.ctx.connections.remove(self.id);
    }
}

#[derive(Debug, Default)]
pub struct ServerControl {
    shutdown: AtomicBool,
}

impl ServerControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.load(Ordering::SeqCst)
    }
}

pub fn run_patch_server(
    ctx: Arc<ServerContext>,
    control: Arc<ServerControl>,
) -> Result<(), String> {
    let port = ctx.config.patch_port;
    run_role_listener("patch", port, ctx, control, handle_patch_connection)
}

pub fn run_data_server(
    ctx: Arc<ServerContext>,
    control: Arc<ServerControl>,
) -> Result<(), String> {
    let port = ctx.config.data_port;
    run_role_listener("data", port, ctx, control, handle_data_connection)
}

pub fn run_login_server(
    ctx: Arc<ServerContext>,
    control: Arc<ServerControl>,
) -> Result<(), String> {
    let port = ctx.config.login_port;
    run_role_listener("login", port, ctx, control, handle_login_connection)
}

pub fn run_character_server(
    ctx: Arc<ServerContext>,
    control: Arc<ServerControl>,
) -> Result<(), String> {
    let port = ctx.config.character_port;
    run_role_listener("character", port, ctx, control, handle_character_connection)
}

fn run_role_listener(
    role: &'static str,
    port: u16,
    ctx: Arc<ServerContext>,
    control: Arc<ServerControl>,
    handler: fn(TcpStream, SocketAddr, Arc<ServerContext>) -> Result<(), String>,
) -> Result<(), String> {
    let bind_addr = format!("{}:{}", ctx.config.hostname, port);
    let listener = TcpListener::bind(&bind_addr)
        .map_err(|err| format!("bind {} failed: {}", bind_addr, err))?;
    listener
        .set_nonblocking(true)
        .map_err(|err| format!("{} listener nonblocking failed: {}", role, err))?;

    logging::log_net(&format!("{} server listening on {}", role, bind_addr));
    println!("bluegate: {} server listening on {}", role, bind_addr);

    while control.is_running() {
        match listener.accept() {
            Ok((stream, addr)) => {
                println!("bluegate: {} connection from {}", role, addr);
                logging::log_net(&format!("accepted {} connection from {}", role, addr));
                let ctx = Arc::clone(&ctx);
                thread::spawn(move || match handler(stream, addr, ctx) {
                    Ok(()) => {
                        logging::log_net(&format!("closed {} connection from {}", role, addr));
                    }
                    Err(err) => {
                        logging::log_error(&format!("{} connection error: {}", role, err));
                        eprintln!("{} connection error: {}", role, err);
                    }
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_RETRY_DELAY);
            }
            Err(err) => {
                logging::log_error(&format!("{} accept error: {}", role, err));
                eprintln!("{} accept error: {}", role, err);
            }
        }
    }

    Ok(())
}

fn prepare_stream(stream: &TcpStream) -> Result<(), String> {
    stream
        .set_nonblocking(false)
        .map_err(|err| format!("stream nonblocking reset failed: {}", err))?;
    stream
        .set_read_timeout(Some(READ_TIMEOUT))
        .map_err(|err| format!("read timeout set failed: {}", err))
}

fn handle_patch_connection(
    stream: TcpStream,
    addr: SocketAddr,
    ctx: Arc<ServerContext>,
) -> Result<(), String> {
    prepare_stream(&stream)?;
    let _guard = ConnectionGuard::new(Arc::clone(&ctx), &addr.to_string());
    let mut session = Session::new_pc(stream, addr.to_string(), ctx.config.debug_mode);
    let welcome = build_patch_welcome(&session.client_vector(), &session.server_vector());
    session.send_plain(welcome)?;
    run_session(&mut session, |session, frame| {
        crate::net::patch::handle_patch_packet(session, &ctx, frame)
    })
}

fn handle_data_connection(
    stream: TcpStream,
    addr: SocketAddr,
    ctx: Arc<ServerContext>,
) -> Result<(), String> {
    prepare_stream(&stream)?;
    let _guard = ConnectionGuard::new(Arc::clone(&ctx), &addr.to_string());
    let mut session = Session::new_pc(stream, addr.to_string(), ctx.config.debug_mode);
    let welcome = build_patch_welcome(&session.client_vector(), &session.server_vector());
    session.send_plain(welcome)?;
    let mut progress = DataProgress::default();
    run_session(&mut session, |session, frame| {
        crate::net::patch::handle_data_packet(session, &ctx, &mut progress, frame)
    })
}

fn handle_login_connection(
    stream: TcpStream,
    addr: SocketAddr,
    ctx: Arc<ServerContext>,
) -> Result<(), String> {
    prepare_stream(&stream)?;
    let _guard = ConnectionGuard::new(Arc::clone(&ctx), &addr.to_string());
    let mut session = Session::new_bb(stream, addr.to_string(), ctx.config.debug_mode);
    let welcome = build_bb_welcome(&session.client_vector(), &session.server_vector());
    session.send_plain(welcome)?;
    run_session(&mut session, |session, frame| {
        crate::net::login::handle_login_packet(session, &ctx, frame)
    })
}

fn handle_character_connection(
    stream: TcpStream,
    addr: SocketAddr,
    ctx: Arc<ServerContext>,
) -> Result<(), String> {
    prepare_stream(&stream)?;
    let _guard = ConnectionGuard::new(Arc::clone(&ctx), &addr.to_string());
    let mut session = Session::new_bb(stream, addr.to_string(), ctx.config.debug_mode);
    let welcome = build_bb_welcome(&session.client_vector(), &session.server_vector());
    session.send_plain(welcome)?;
    run_session(&mut session, |session, frame| {
        crate::net::character::handle_character_packet(session, &ctx, frame)
    })
}

/// Frames are read, dispatched and answered strictly in order; the loop
/// ends on a clean peer close, a handler error, or a requested close.
fn run_session<S, F>(session: &mut Session<S>, mut dispatch: F) -> Result<(), String>
where
    S: Read + Write,
    F: FnMut(&mut Session<S>, &[u8]) -> Result<Action, String>,
{
    loop {
        match session.read_frame()? {
            None => return Ok(()),
            Some(frame) => match dispatch(session, &frame)? {
                Action::Continue => {}
                Action::Close => return Ok(()),
            },
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::test_context;
    use super::*;
    use crate::net::cipher::PcCipher;
    use crate::net::packets::{
        PATCH_COPYRIGHT, PATCH_LOGIN_TYPE, PATCH_WELCOME_SIZE, PATCH_WELCOME_TYPE,
    };
    use crate::net::session::fix_length;

    #[test]
    fn connection_list_tracks_membership() {
        let list = ConnectionList::new();
        let first = list.add("10.0.0.1:100");
        let second = list.add("10.0.0.2:200");
        assert_eq!(list.count(), 2);
        list.remove(first);
        assert_eq!(list.count(), 1);
        list.remove(second);
        assert_eq!(list.count(), 0);
    }

    #[test]
    fn server_control_signals_shutdown() {
        let control = ServerControl::new();
        assert!(control.is_running());
        control.request_shutdown();
        assert!(!control.is_running());
    }

    /// The patch welcome exchange over a real socket: plaintext welcome
    /// with the copyright at offset 4 and both vectors, then an encrypted
    /// login answered by the 4-byte ack typed as a login packet.
    #[test]
    fn patch_welcome_exchange_over_loopback() {
        let ctx = Arc::new(test_context());
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let local = listener.local_addr().expect("addr");

        let server_ctx = Arc::clone(&ctx);
        let server = thread::spawn(move || {
            let (stream, addr) = listener.accept().expect("accept");
            let _ = handle_patch_connection(stream, addr, server_ctx);
        });

        let mut client = TcpStream::connect(local).expect("connect");
        let mut welcome = [0u8; PATCH_WELCOME_SIZE];
        client.read_exact(&mut welcome).expect("welcome");
        assert_eq!(&welcome[..2], &[0x4c, 0x00]);
        assert_eq!(
            u16::from_le_bytes([welcome[2], welcome[3]]),
            PATCH_WELCOME_TYPE
        );
        assert_eq!(&welcome[4..4 + PATCH_COPYRIGHT.len()], PATCH_COPYRIGHT.as_bytes());

        // The vectors key the client's ciphers: the client vector drives
        // what we send, the server vector decrypts what comes back.
        let client_seed = u32::from_le_bytes([welcome[68], welcome[69], welcome[70], welcome[71]]);
        let server_seed = u32::from_le_bytes([welcome[72], welcome[73], welcome[74], welcome[75]]);
        let mut send_cipher = PcCipher::new(client_seed);
        let mut recv_cipher = PcCipher::new(server_seed);

        let mut ack_request = fix_length(vec![0, 0, PATCH_WELCOME_TYPE as u8, 0], 4);
        send_cipher.encrypt(&mut ack_request);
        client.write_all(&ack_request).expect("send ack request");

        let mut reply = [0u8; 4];
        client.read_exact(&mut reply).expect("read ack");
        recv_cipher.decrypt(&mut reply);
        assert_eq!(reply, [0x04, 0x00, PATCH_LOGIN_TYPE as u8, 0x00]);

        drop(client);
        server.join().expect("server thread");
        assert_eq!(ctx.connections.count(), 0);
    }
}
