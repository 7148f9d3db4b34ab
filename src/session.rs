//! Per-connection session state.
//!
//! A [`Session`] is a cheap-clone handle shared between the command loop,
//! the command handlers and the transfer worker. All control-channel
//! writes are serialized through one mutex, so single- and multi-line
//! replies are atomic from the peer's point of view; reads stay with the
//! owning session task. The state mutex is internal and never held
//! across an await point.

use crate::config::Config;
use crate::constants::{PASV_PORT_MAX, PASV_PORT_MIN};
use crate::core_auth::{Permissions, User, UserStore};
use crate::core_filelock::LockTable;
use crate::core_fs::{self, resolver};
use crate::core_network::{self, AddrFamily};
use crate::core_protocol::{
    format_reply, format_reply_cont, DataStructure, ReplyCode, TransferMode, TransferType,
};
use crate::core_transfer::TransferTask;
use log::{debug, info};
use std::io;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex as TokioMutex, Notify};
use tokio::task::JoinHandle;

/// Process-wide collaborators, created once at startup and passed into
/// every session.
#[derive(Debug)]
pub struct ServerContext {
    pub config: Config,
    pub users: UserStore,
    pub locks: LockTable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    AwaitingPassword,
    Authenticated,
    Closing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPhase {
    Idle,
    Starting,
    Running,
    Completing,
    Aborted,
}

#[derive(Debug)]
enum DataMode {
    None,
    Active {
        ip: String,
        port: u16,
    },
    Passive {
        listener: Option<TcpListener>,
        port: u16,
    },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SessionStats {
    pub bytes_uploaded: u64,
    pub bytes_downloaded: u64,
    pub files_uploaded: u32,
    pub files_downloaded: u32,
    pub commands_received: u32,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid path")]
    BadPath,
    #[error("permission denied")]
    Forbidden,
    #[error("no data mode negotiated")]
    NoDataMode,
    #[error("data channel establishment timed out")]
    DataTimeout,
    #[error("a transfer is already in progress")]
    Busy,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A client path resolved to both its virtual and physical form.
#[derive(Debug, Clone)]
pub struct ResolvedPath {
    /// Normalized virtual absolute path (starts with `/`).
    pub virtual_path: String,
    /// The corresponding path under the sandbox root.
    pub physical: PathBuf,
}

#[derive(Debug)]
struct SessionInner {
    state: SessionState,
    username: String,
    user: Option<User>,
    current_dir: String,
    transfer_type: TransferType,
    transfer_mode: TransferMode,
    data_structure: DataStructure,
    data_mode: DataMode,
    restart_offset: u64,
    rename_from: Option<PathBuf>,
    transfer_phase: TransferPhase,
    abort_requested: bool,
    abort_notify: Option<Arc<Notify>>,
    transfer_handle: Option<JoinHandle<()>>,
    stats: SessionStats,
    connect_time: Instant,
    last_activity: Instant,
}

#[derive(Clone)]
pub struct Session {
    ctx: Arc<ServerContext>,
    inner: Arc<StdMutex<SessionInner>>,
    writer: Arc<TokioMutex<OwnedWriteHalf>>,
    peer_ip: IpAddr,
    peer_port: u16,
    local_ip: IpAddr,
}

impl Session {
    pub fn new(
        ctx: Arc<ServerContext>,
        writer: OwnedWriteHalf,
        peer_ip: IpAddr,
        peer_port: u16,
        local_ip: IpAddr,
    ) -> Self {
        let now = Instant::now();
        Session {
            ctx,
            inner: Arc::new(StdMutex::new(SessionInner {
                state: SessionState::Connected,
                username: String::new(),
                user: None,
                current_dir: "/".to_string(),
                transfer_type: TransferType::Ascii,
                transfer_mode: TransferMode::Stream,
                data_structure: DataStructure::File,
                data_mode: DataMode::None,
                restart_offset: 0,
                rename_from: None,
                transfer_phase: TransferPhase::Idle,
                abort_requested: false,
                abort_notify: None,
                transfer_handle: None,
                stats: SessionStats::default(),
                connect_time: now,
                last_activity: now,
            })),
            writer: Arc::new(TokioMutex::new(writer)),
            peer_ip,
            peer_port,
            local_ip,
        }
    }

    // Control-channel replies

    pub async fn reply(&self, code: ReplyCode, msg: &str) -> io::Result<()> {
        self.send_raw(&format_reply(code, msg)).await
    }

    pub async fn reply_continuation(&self, code: ReplyCode, msg: &str) -> io::Result<()> {
        self.send_raw(&format_reply_cont(code, msg)).await
    }

    pub async fn send_raw(&self, text: &str) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        core_network::send_all(&mut *writer, text.as_bytes()).await?;
        debug!("{}:{} <- {}", self.peer_ip, self.peer_port, text.trim_end());
        Ok(())
    }

    // Connection identity

    pub fn peer_ip(&self) -> IpAddr {
        self.peer_ip
    }

    pub fn peer_port(&self) -> u16 {
        self.peer_port
    }

    pub fn local_ip(&self) -> IpAddr {
        self.local_ip
    }

    pub fn config(&self) -> &Config {
        &self.ctx.config
    }

    pub fn users(&self) -> &UserStore {
        &self.ctx.users
    }

    pub fn locks(&self) -> &LockTable {
        &self.ctx.locks
    }

    // Authentication state machine

    pub fn state(&self) -> SessionState {
        self.inner.lock().unwrap().state
    }

    pub fn is_authenticated(&self) -> bool {
        self.state() == SessionState::Authenticated
    }

    pub fn username(&self) -> String {
        self.inner.lock().unwrap().username.clone()
    }

    pub fn user(&self) -> Option<User> {
        self.inner.lock().unwrap().user.clone()
    }

    /// Moves the login flow to waiting-for-password. Also restarts the
    /// flow when a client sends a second USER mid-way.
    pub fn set_user(&self, username: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.username = username.to_string();
        inner.user = None;
        inner.state = SessionState::AwaitingPassword;
        debug!(
            "User set to '{}' for {}:{}",
            username, self.peer_ip, self.peer_port
        );
    }

    /// Verifies the password for the pending USER. On success the user's
    /// permissions and home are loaded and the working directory moves to
    /// the home directory when it exists on disk; on failure the state
    /// machine drops back to Connected.
    pub async fn authenticate(&self, password: &str) -> bool {
        let username = {
            let inner = self.inner.lock().unwrap();
            if inner.state != SessionState::AwaitingPassword {
                return false;
            }
            inner.username.clone()
        };

        if !self.ctx.users.verify(&username, password) {
            let mut inner = self.inner.lock().unwrap();
            inner.state = SessionState::Connected;
            inner.username.clear();
            inner.user = None;
            return false;
        }

        let Some(user) = self.ctx.users.lookup(&username) else {
            let mut inner = self.inner.lock().unwrap();
            inner.state = SessionState::Connected;
            inner.username.clear();
            return false;
        };

        let home_physical = resolver::to_physical(&self.ctx.config.root_dir, &user.home);
        let home_exists = core_fs::is_dir(&home_physical).await;

        let mut inner = self.inner.lock().unwrap();
        inner.state = SessionState::Authenticated;
        inner.current_dir = if home_exists {
            user.home.clone()
        } else {
            "/".to_string()
        };
        inner.user = Some(user);

        info!(
            "User '{}' logged in from {}:{}",
            username, self.peer_ip, self.peer_port
        );
        true
    }

    pub fn set_closing(&self) {
        self.inner.lock().unwrap().state = SessionState::Closing;
    }

    // Paths and the sandbox

    pub fn current_dir(&self) -> String {
        self.inner.lock().unwrap().current_dir.clone()
    }

    /// Resolves a client path against the current directory into its
    /// virtual and physical forms. No access check happens here.
    pub fn resolve_path(&self, path: &str) -> Result<ResolvedPath, SessionError> {
        let current_dir = self.current_dir();
        let virtual_path =
            resolver::resolve_virtual(&current_dir, path).map_err(|_| SessionError::BadPath)?;
        let physical = resolver::to_physical(&self.ctx.config.root_dir, &virtual_path);
        Ok(ResolvedPath {
            virtual_path,
            physical,
        })
    }

    /// Sandbox and permission check: non-admin users may only touch their
    /// home subtree, and must hold every bit in `required`.
    pub fn check_access(&self, virtual_path: &str, required: Permissions) -> bool {
        let inner = self.inner.lock().unwrap();
        let Some(user) = &inner.user else {
            return false;
        };
        if !user.permissions.contains(required) {
            return false;
        }
        user.permissions.is_admin() || resolver::is_within_home(virtual_path, &user.home)
    }

    /// Changes the working directory. Requires READ access and an
    /// existing physical directory.
    pub async fn change_directory(&self, path: &str) -> Result<(), SessionError> {
        let resolved = self.resolve_path(path)?;
        if !self.check_access(&resolved.virtual_path, Permissions::READ) {
            return Err(SessionError::Forbidden);
        }
        if !core_fs::is_dir(&resolved.physical).await {
            return Err(SessionError::BadPath);
        }

        let mut inner = self.inner.lock().unwrap();
        inner.current_dir = resolved.virtual_path;
        debug!(
            "{}:{} changed directory to '{}'",
            self.peer_ip, self.peer_port, inner.current_dir
        );
        Ok(())
    }

    // Transfer parameters

    pub fn transfer_type(&self) -> TransferType {
        self.inner.lock().unwrap().transfer_type
    }

    pub fn set_transfer_type(&self, t: TransferType) {
        self.inner.lock().unwrap().transfer_type = t;
    }

    pub fn transfer_mode(&self) -> TransferMode {
        self.inner.lock().unwrap().transfer_mode
    }

    pub fn set_transfer_mode(&self, m: TransferMode) {
        self.inner.lock().unwrap().transfer_mode = m;
    }

    pub fn data_structure(&self) -> DataStructure {
        self.inner.lock().unwrap().data_structure
    }

    pub fn set_data_structure(&self, s: DataStructure) {
        self.inner.lock().unwrap().data_structure = s;
    }

    // Data channel negotiation

    /// Records active mode. Any previously negotiated data resources are
    /// dropped first.
    pub fn set_active(&self, ip: String, port: u16) {
        let mut inner = self.inner.lock().unwrap();
        inner.data_mode = DataMode::Active { ip, port };
        debug!("Set active mode: {}:{}", self.peer_ip, port);
    }

    /// Binds a passive listener in the configured port range and records
    /// it. Returns the bound port for the 227 reply.
    pub fn set_passive(&self) -> Result<u16, SessionError> {
        let (listener, port) =
            core_network::listen_range(AddrFamily::Ipv4, PASV_PORT_MIN..=PASV_PORT_MAX, 1)?;
        let mut inner = self.inner.lock().unwrap();
        inner.data_mode = DataMode::Passive {
            listener: Some(listener),
            port,
        };
        debug!("Set passive mode: listening on port {}", port);
        Ok(port)
    }

    /// Establishes the data connection: connect for active mode, accept
    /// for passive mode. One-shot: a successful open consumes the
    /// negotiated mode.
    pub async fn open_data_channel(&self, timeout: Duration) -> Result<TcpStream, SessionError> {
        enum Pending {
            Connect(String, u16),
            Accept(TcpListener),
        }

        let pending = {
            let mut inner = self.inner.lock().unwrap();
            match &mut inner.data_mode {
                DataMode::None => return Err(SessionError::NoDataMode),
                DataMode::Active { ip, port } => Pending::Connect(ip.clone(), *port),
                DataMode::Passive { listener, .. } => match listener.take() {
                    Some(listener) => Pending::Accept(listener),
                    None => return Err(SessionError::NoDataMode),
                },
            }
        };

        let stream = match pending {
            Pending::Connect(ip, port) => {
                match tokio::time::timeout(timeout, core_network::connect(&ip, port)).await {
                    Ok(Ok(stream)) => stream,
                    Ok(Err(err)) => {
                        self.close_data_channel();
                        return Err(SessionError::Io(err));
                    }
                    Err(_) => {
                        self.close_data_channel();
                        return Err(SessionError::DataTimeout);
                    }
                }
            }
            Pending::Accept(listener) => {
                match tokio::time::timeout(timeout, listener.accept()).await {
                    Ok(Ok((stream, peer))) => {
                        debug!("Accepted data connection from {}", peer);
                        stream
                    }
                    Ok(Err(err)) => {
                        self.close_data_channel();
                        return Err(SessionError::Io(err));
                    }
                    Err(_) => {
                        self.close_data_channel();
                        return Err(SessionError::DataTimeout);
                    }
                }
            }
        };

        self.close_data_channel();
        Ok(stream)
    }

    /// Drops the data listener and forgets the negotiated mode.
    pub fn close_data_channel(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.data_mode = DataMode::None;
    }

    pub fn has_data_mode(&self) -> bool {
        !matches!(self.inner.lock().unwrap().data_mode, DataMode::None)
    }

    /// The port a passive listener is parked on, if one is.
    pub fn passive_port(&self) -> Option<u16> {
        match &self.inner.lock().unwrap().data_mode {
            DataMode::Passive { port, .. } => Some(*port),
            _ => None,
        }
    }

    // Transfer control

    pub fn transfer_phase(&self) -> TransferPhase {
        self.inner.lock().unwrap().transfer_phase
    }

    pub fn set_transfer_phase(&self, phase: TransferPhase) {
        self.inner.lock().unwrap().transfer_phase = phase;
    }

    /// Hands the data connection and the task over to a background
    /// worker. Fails with `Busy` when a transfer is already in flight.
    pub fn start_transfer(&self, data: TcpStream, task: TransferTask) -> Result<(), SessionError> {
        let notify = Arc::new(Notify::new());
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.transfer_phase != TransferPhase::Idle {
                return Err(SessionError::Busy);
            }
            inner.transfer_phase = TransferPhase::Starting;
            inner.abort_requested = false;
            inner.abort_notify = Some(Arc::clone(&notify));
        }

        let session = self.clone();
        let handle = tokio::spawn(async move {
            crate::core_transfer::run_transfer(session, data, task, notify).await;
        });
        self.inner.lock().unwrap().transfer_handle = Some(handle);
        Ok(())
    }

    /// Flags the running transfer for abort and wakes the worker.
    /// Returns false when no transfer is in flight.
    pub fn request_abort(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.transfer_phase {
            TransferPhase::Starting | TransferPhase::Running => {
                inner.abort_requested = true;
                if let Some(notify) = &inner.abort_notify {
                    notify.notify_one();
                }
                true
            }
            _ => false,
        }
    }

    pub fn abort_requested(&self) -> bool {
        self.inner.lock().unwrap().abort_requested
    }

    /// Worker-side epilogue: return to idle and drop the abort plumbing.
    pub fn finish_transfer(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.transfer_phase = TransferPhase::Idle;
        inner.abort_requested = false;
        inner.abort_notify = None;
    }

    /// Waits for a spawned transfer worker to finish, if one exists.
    /// Only QUIT and REIN do this.
    pub async fn wait_for_transfer(&self) {
        let handle = self.inner.lock().unwrap().transfer_handle.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    // Latent command state

    pub fn set_rest(&self, offset: u64) {
        self.inner.lock().unwrap().restart_offset = offset;
    }

    pub fn take_rest(&self) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        std::mem::take(&mut inner.restart_offset)
    }

    pub fn clear_rest(&self) {
        self.inner.lock().unwrap().restart_offset = 0;
    }

    pub fn set_rename_from(&self, path: PathBuf) {
        self.inner.lock().unwrap().rename_from = Some(path);
    }

    pub fn take_rename_from(&self) -> Option<PathBuf> {
        self.inner.lock().unwrap().rename_from.take()
    }

    pub fn clear_rename_from(&self) {
        self.inner.lock().unwrap().rename_from = None;
    }

    // Statistics and activity

    pub fn stats(&self) -> SessionStats {
        self.inner.lock().unwrap().stats
    }

    pub fn record_command(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.stats.commands_received += 1;
        inner.last_activity = Instant::now();
    }

    pub fn record_upload(&self, bytes: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.stats.bytes_uploaded += bytes;
        inner.stats.files_uploaded += 1;
    }

    pub fn record_download(&self, bytes: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.stats.bytes_downloaded += bytes;
        inner.stats.files_downloaded += 1;
    }

    pub fn connect_elapsed(&self) -> Duration {
        self.inner.lock().unwrap().connect_time.elapsed()
    }

    /// Time since the last received command.
    pub fn idle_elapsed(&self) -> Duration {
        self.inner.lock().unwrap().last_activity.elapsed()
    }

    /// REIN: back to the just-connected state. Statistics survive.
    pub fn reset_for_rein(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = SessionState::Connected;
        inner.username.clear();
        inner.user = None;
        inner.current_dir = "/".to_string();
        inner.transfer_type = TransferType::Ascii;
        inner.transfer_mode = TransferMode::Stream;
        inner.data_structure = DataStructure::File;
        inner.data_mode = DataMode::None;
        inner.restart_offset = 0;
        inner.rename_from = None;
        inner.transfer_handle = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    async fn test_session(root: PathBuf) -> (Session, TcpStream) {
        let ctx = Arc::new(ServerContext {
            config: Config {
                root_dir: root,
                ..Config::default()
            },
            users: UserStore::default(),
            locks: LockTable::new(),
        });

        // A connected socket pair so the session has a real write half.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::net::TcpStream::connect(addr).await.unwrap();
        let (server_stream, _) = listener.accept().await.unwrap();
        let (_read, write) = server_stream.into_split();

        let session = Session::new(
            ctx,
            write,
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            40000,
            IpAddr::V4(Ipv4Addr::LOCALHOST),
        );
        (session, client)
    }

    #[tokio::test]
    async fn login_state_machine() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir(dir.path().join("pub")).await.unwrap();
        let (session, _client) = test_session(dir.path().to_path_buf()).await;

        assert_eq!(session.state(), SessionState::Connected);

        session.set_user("anonymous");
        assert_eq!(session.state(), SessionState::AwaitingPassword);

        assert!(session.authenticate("guest@example.com").await);
        assert_eq!(session.state(), SessionState::Authenticated);
        assert_eq!(session.current_dir(), "/pub");
    }

    #[tokio::test]
    async fn failed_login_returns_to_connected() {
        let dir = tempfile::tempdir().unwrap();
        let (session, _client) = test_session(dir.path().to_path_buf()).await;
        session.users().add_user("bob", "secret", "/", Permissions::READ);

        session.set_user("bob");
        assert!(!session.authenticate("wrong").await);
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(session.username(), "");
    }

    #[tokio::test]
    async fn missing_home_falls_back_to_root() {
        let dir = tempfile::tempdir().unwrap();
        let (session, _client) = test_session(dir.path().to_path_buf()).await;

        session.set_user("anonymous");
        assert!(session.authenticate("x").await);
        assert_eq!(session.current_dir(), "/");
    }

    #[tokio::test]
    async fn change_directory_enforces_sandbox() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir(dir.path().join("pub")).await.unwrap();
        tokio::fs::create_dir(dir.path().join("etc")).await.unwrap();
        tokio::fs::create_dir(dir.path().join("pub/sub")).await.unwrap();
        let (session, _client) = test_session(dir.path().to_path_buf()).await;

        session.set_user("anonymous");
        assert!(session.authenticate("x").await);

        session.change_directory("sub").await.unwrap();
        assert_eq!(session.current_dir(), "/pub/sub");

        // Escaping the home subtree is refused even though /etc exists.
        assert!(matches!(
            session.change_directory("/etc").await,
            Err(SessionError::Forbidden)
        ));
        assert_eq!(session.current_dir(), "/pub/sub");

        // Missing directory inside the sandbox.
        assert!(session.change_directory("nope").await.is_err());
    }

    #[tokio::test]
    async fn rest_and_rename_state_is_take_once() {
        let dir = tempfile::tempdir().unwrap();
        let (session, _client) = test_session(dir.path().to_path_buf()).await;

        session.set_rest(42);
        assert_eq!(session.take_rest(), 42);
        assert_eq!(session.take_rest(), 0);

        session.set_rename_from(PathBuf::from("/tmp/a"));
        assert_eq!(session.take_rename_from(), Some(PathBuf::from("/tmp/a")));
        assert_eq!(session.take_rename_from(), None);
    }

    #[tokio::test]
    async fn rein_preserves_statistics() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir(dir.path().join("pub")).await.unwrap();
        let (session, _client) = test_session(dir.path().to_path_buf()).await;

        session.set_user("anonymous");
        assert!(session.authenticate("x").await);
        session.record_download(1234);
        session.record_command();
        session.set_rest(9);

        session.reset_for_rein();

        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(session.current_dir(), "/");
        assert_eq!(session.take_rest(), 0);
        let stats = session.stats();
        assert_eq!(stats.bytes_downloaded, 1234);
        assert_eq!(stats.files_downloaded, 1);
        assert_eq!(stats.commands_received, 1);
    }

    #[tokio::test]
    async fn open_data_channel_without_mode_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (session, _client) = test_session(dir.path().to_path_buf()).await;
        let result = session
            .open_data_channel(Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(SessionError::NoDataMode)));
    }

    #[tokio::test]
    async fn passive_listener_accepts_one_connection() {
        let dir = tempfile::tempdir().unwrap();
        let (session, _client) = test_session(dir.path().to_path_buf()).await;

        let port = session.set_passive().unwrap();
        assert!(session.has_data_mode());

        let connect = tokio::spawn(async move {
            tokio::net::TcpStream::connect(("127.0.0.1", port))
                .await
                .unwrap()
        });

        let stream = session
            .open_data_channel(Duration::from_secs(2))
            .await
            .unwrap();
        drop(stream);
        connect.await.unwrap();

        // The negotiated mode is consumed by a successful open.
        assert!(!session.has_data_mode());
    }
}
