//! Wire-level scenario tests: a real server on an ephemeral port, driven
//! through the control and data channels exactly like an FTP client.

use ferroftpd::config::Config;
use ferroftpd::core_auth::{Permissions, UserStore};
use ferroftpd::core_filelock::LockTable;
use ferroftpd::core_network::{self, AddrFamily};
use ferroftpd::server;
use ferroftpd::session::ServerContext;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

const IO_TIMEOUT: Duration = Duration::from_secs(10);

struct TestServer {
    port: u16,
    root: TempDir,
}

async fn start_server() -> TestServer {
    let root = tempfile::tempdir().unwrap();
    std::fs::create_dir(root.path().join("pub")).unwrap();
    std::fs::write(
        root.path().join("pub/a.bin"),
        (0u8..10).collect::<Vec<u8>>(),
    )
    .unwrap();
    std::fs::write(root.path().join("pub/hello.txt"), b"hello world\n").unwrap();
    std::fs::create_dir(root.path().join("etc")).unwrap();
    std::fs::write(root.path().join("a.txt"), b"rename me").unwrap();

    let config = Config {
        root_dir: root.path().to_path_buf(),
        command_timeout_ms: 10_000,
        ..Config::default()
    };

    let users = UserStore::new(true, "/pub", Permissions::READ);
    users.add_user("bob", "hunter2", "/", Permissions::ALL);

    let ctx = Arc::new(ServerContext {
        config,
        users,
        locks: LockTable::new(),
    });

    let listener = core_network::listen(AddrFamily::Ipv4, 0, 8).unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(server::serve(listener, ctx, std::future::pending::<()>()));

    TestServer { port, root }
}

struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    /// Connects and consumes the 220 greeting.
    async fn connect(server: &TestServer) -> Client {
        let stream = TcpStream::connect(("127.0.0.1", server.port)).await.unwrap();
        let (reader, writer) = stream.into_split();
        let mut client = Client {
            reader: BufReader::new(reader),
            writer,
        };
        let greeting = client.expect(220).await;
        assert_eq!(greeting, "220 FTP Server Ready\r\n");
        client
    }

    async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{}\r\n", line).as_bytes())
            .await
            .unwrap();
    }

    async fn read_line(&mut self) -> String {
        let mut line = String::new();
        let n = tokio::time::timeout(IO_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("timed out reading reply")
            .unwrap();
        assert!(n > 0, "server closed the control connection unexpectedly");
        line
    }

    /// Reads a single final reply line and asserts its code.
    async fn expect(&mut self, code: u16) -> String {
        let line = self.read_line().await;
        assert!(
            line.starts_with(&format!("{} ", code)),
            "expected reply {}, got {:?}",
            code,
            line
        );
        line
    }

    /// Reads a multi-line reply until the final `code SP` line.
    async fn read_until_final(&mut self, code: u16) -> Vec<String> {
        let mut lines = Vec::new();
        loop {
            let line = self.read_line().await;
            let is_final = line.starts_with(&format!("{} ", code));
            lines.push(line);
            if is_final {
                return lines;
            }
        }
    }

    async fn login_anonymous(&mut self) {
        self.send("USER anonymous").await;
        let line = self.expect(331).await;
        assert_eq!(
            line,
            "331 Anonymous login OK, send your email as password\r\n"
        );
        self.send("PASS user@example.com").await;
        let line = self.expect(230).await;
        assert_eq!(line, "230 User logged in, proceed\r\n");
    }

    async fn login_bob(&mut self) {
        self.send("USER bob").await;
        self.expect(331).await;
        self.send("PASS hunter2").await;
        self.expect(230).await;
    }

    /// Issues PASV and returns the advertised data port.
    async fn pasv(&mut self) -> u16 {
        self.send("PASV").await;
        let line = self.expect(227).await;
        let open = line.find('(').unwrap();
        let close = line.find(')').unwrap();
        let fields: Vec<u16> = line[open + 1..close]
            .split(',')
            .map(|f| f.trim().parse().unwrap())
            .collect();
        assert_eq!(fields.len(), 6);
        fields[4] * 256 + fields[5]
    }

    /// PASV + connect to the advertised port.
    async fn open_data(&mut self) -> TcpStream {
        let port = self.pasv().await;
        TcpStream::connect(("127.0.0.1", port)).await.unwrap()
    }
}

async fn read_to_end(mut stream: TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    tokio::time::timeout(IO_TIMEOUT, stream.read_to_end(&mut buf))
        .await
        .expect("timed out reading data channel")
        .unwrap();
    buf
}

#[tokio::test]
async fn s1_handshake_anonymous_login_and_quit() {
    let server = start_server().await;
    let mut client = Client::connect(&server).await;

    client.login_anonymous().await;

    client.send("PWD").await;
    let line = client.expect(257).await;
    assert_eq!(line, "257 \"/pub\" is current directory\r\n");

    client.send("QUIT").await;
    let lines = client.read_until_final(221).await;
    assert!(lines.len() > 1, "expected multi-line stats, got {:?}", lines);
    assert!(lines[0].starts_with("221-"));
    assert!(lines.iter().any(|l| l.contains("Commands received")));
    assert_eq!(lines.last().unwrap(), "221 Closing connection\r\n");

    // The server closes after the 221 is flushed.
    let mut rest = String::new();
    let n = tokio::time::timeout(IO_TIMEOUT, client.reader.read_line(&mut rest))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(n, 0);
}

#[tokio::test]
async fn s2_binary_retr_with_rest() {
    let server = start_server().await;
    let mut client = Client::connect(&server).await;
    client.login_anonymous().await;

    client.send("TYPE I").await;
    client.expect(200).await;

    let data = client.open_data().await;

    client.send("REST 3").await;
    client.expect(350).await;

    client.send("RETR a.bin").await;
    client.expect(150).await;

    let bytes = read_to_end(data).await;
    assert_eq!(bytes, vec![3, 4, 5, 6, 7, 8, 9]);

    let line = client.expect(226).await;
    assert_eq!(line, "226 Transfer complete\r\n");
}

#[tokio::test]
async fn s2b_ascii_retr_expands_lf() {
    let server = start_server().await;
    let mut client = Client::connect(&server).await;
    client.login_anonymous().await;

    // Default type is ASCII; no TYPE command needed.
    let data = client.open_data().await;
    client.send("RETR hello.txt").await;
    client.expect(150).await;

    let bytes = read_to_end(data).await;
    assert_eq!(bytes, b"hello world\r\n");
    client.expect(226).await;
}

#[tokio::test]
async fn s3_concurrent_stor_and_retr_on_same_path() {
    let server = start_server().await;

    let mut writer = Client::connect(&server).await;
    writer.login_bob().await;
    writer.send("TYPE I").await;
    writer.expect(200).await;

    let mut writer_data = writer.open_data().await;
    writer.send("STOR foo").await;
    writer.expect(150).await;
    writer_data.write_all(b"hello").await.unwrap();

    // The exclusive lock is held from before the 150, so a concurrent
    // reader must be turned away with 450.
    let mut reader = Client::connect(&server).await;
    reader.login_bob().await;
    reader.send("TYPE I").await;
    reader.expect(200).await;
    reader.send("RETR foo").await;
    let line = reader.expect(450).await;
    assert_eq!(
        line,
        "450 File is currently being written to, please try again later\r\n"
    );

    // Writer finishes: half-close signals end of file.
    writer_data.shutdown().await.unwrap();
    writer.expect(226).await;

    // Now the reader can retry and succeed.
    let reader_data = reader.open_data().await;
    reader.send("RETR foo").await;
    reader.expect(150).await;
    assert_eq!(read_to_end(reader_data).await, b"hello");
    reader.expect(226).await;
}

#[tokio::test]
async fn s4_abor_during_retr() {
    let server = start_server().await;
    std::fs::write(
        server.root.path().join("pub/big.bin"),
        vec![0u8; 16 * 1024 * 1024],
    )
    .unwrap();

    let mut client = Client::connect(&server).await;
    client.login_anonymous().await;
    client.send("TYPE I").await;
    client.expect(200).await;

    let data = client.open_data().await;
    client.send("RETR big.bin").await;
    client.expect(150).await;

    // Do not read the data channel: the worker fills the socket buffers
    // and blocks, still holding the transfer.
    tokio::time::sleep(Duration::from_millis(300)).await;

    client.send("ABOR").await;
    let line = client.expect(426).await;
    assert_eq!(line, "426 Data connection closed; transfer aborted\r\n");
    let line = client.expect(226).await;
    assert_eq!(line, "226 ABOR command successful\r\n");

    drop(data);

    // The session is still usable afterwards.
    client.send("NOOP").await;
    client.expect(200).await;
}

#[tokio::test]
async fn s5_path_traversal_rejected() {
    let server = start_server().await;
    let mut client = Client::connect(&server).await;
    client.login_anonymous().await;

    client.send("CWD /etc").await;
    let line = client.expect(550).await;
    assert_eq!(line, "550 Failed to change directory\r\n");

    client.send("RETR ../../../etc/passwd").await;
    let line = client.expect(550).await;
    assert_eq!(line, "550 Permission denied\r\n");

    // Still rooted in the sandbox.
    client.send("PWD").await;
    let line = client.expect(257).await;
    assert!(line.contains("\"/pub\""));
}

#[tokio::test]
async fn s6_rnfr_state_cleared_by_interleaved_command() {
    let server = start_server().await;
    let mut client = Client::connect(&server).await;
    client.login_bob().await;

    client.send("RNFR a.txt").await;
    client.expect(350).await;

    // Any command with a clear-both preflight wipes the pending rename.
    client.send("PWD").await;
    client.expect(257).await;

    client.send("RNTO b.txt").await;
    let line = client.expect(503).await;
    assert_eq!(line, "503 Bad sequence of commands (use RNFR first)\r\n");

    // The uninterrupted sequence succeeds.
    client.send("RNFR a.txt").await;
    client.expect(350).await;
    client.send("RNTO b.txt").await;
    client.expect(250).await;

    assert!(!server.root.path().join("a.txt").exists());
    assert!(server.root.path().join("b.txt").exists());
}

#[tokio::test]
async fn stor_binary_upload_and_resume() {
    let server = start_server().await;
    let mut client = Client::connect(&server).await;
    client.login_bob().await;
    client.send("TYPE I").await;
    client.expect(200).await;

    // Plain upload.
    let mut data = client.open_data().await;
    client.send("STOR up.bin").await;
    client.expect(150).await;
    data.write_all(b"0123456789").await.unwrap();
    data.shutdown().await.unwrap();
    client.expect(226).await;
    assert_eq!(
        std::fs::read(server.root.path().join("up.bin")).unwrap(),
        b"0123456789"
    );

    // Resume at offset 4: the prefix stays, the tail is replaced and
    // the file ends exactly at offset + received.
    let mut data = client.open_data().await;
    client.send("REST 4").await;
    client.expect(350).await;
    client.send("STOR up.bin").await;
    client.expect(150).await;
    data.write_all(b"BB").await.unwrap();
    data.shutdown().await.unwrap();
    client.expect(226).await;
    assert_eq!(
        std::fs::read(server.root.path().join("up.bin")).unwrap(),
        b"0123BB"
    );
}

#[tokio::test]
async fn appe_appends_to_existing_file() {
    let server = start_server().await;
    std::fs::write(server.root.path().join("log.txt"), b"first").unwrap();

    let mut client = Client::connect(&server).await;
    client.login_bob().await;
    client.send("TYPE I").await;
    client.expect(200).await;

    let mut data = client.open_data().await;
    client.send("APPE log.txt").await;
    client.expect(150).await;
    data.write_all(b"|second").await.unwrap();
    data.shutdown().await.unwrap();
    client.expect(226).await;

    assert_eq!(
        std::fs::read(server.root.path().join("log.txt")).unwrap(),
        b"first|second"
    );
}

#[tokio::test]
async fn list_and_nlst_formats() {
    let server = start_server().await;
    let mut client = Client::connect(&server).await;
    client.login_anonymous().await;

    let data = client.open_data().await;
    client.send("LIST").await;
    client.expect(150).await;
    let listing = String::from_utf8(read_to_end(data).await).unwrap();
    client.expect(226).await;

    let lines: Vec<&str> = listing.split("\r\n").filter(|l| !l.is_empty()).collect();
    assert_eq!(lines.len(), 2);
    assert!(lines.iter().any(|l| l.ends_with("a.bin")));
    assert!(lines.iter().any(|l| l.ends_with("hello.txt")));
    for line in &lines {
        assert!(line.starts_with('-') || line.starts_with('d'));
    }

    let data = client.open_data().await;
    client.send("NLST").await;
    client.expect(150).await;
    let names = String::from_utf8(read_to_end(data).await).unwrap();
    client.expect(226).await;
    assert_eq!(names, "a.bin\r\nhello.txt\r\n");

    // LIST with a file argument renders a single entry.
    let data = client.open_data().await;
    client.send("LIST a.bin").await;
    client.expect(150).await;
    let single = String::from_utf8(read_to_end(data).await).unwrap();
    client.expect(226).await;
    let lines: Vec<&str> = single.split("\r\n").filter(|l| !l.is_empty()).collect();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].ends_with("a.bin"));
}

#[tokio::test]
async fn size_and_mdtm() {
    let server = start_server().await;
    let mut client = Client::connect(&server).await;
    client.login_anonymous().await;

    client.send("SIZE a.bin").await;
    let line = client.expect(213).await;
    assert_eq!(line, "213 10\r\n");

    client.send("SIZE /pub").await;
    client.expect(550).await;

    client.send("MDTM a.bin").await;
    let line = client.expect(213).await;
    let value = line.trim_end().strip_prefix("213 ").unwrap();
    assert_eq!(value.len(), 14);
    assert!(value.bytes().all(|b| b.is_ascii_digit()));
}

#[tokio::test]
async fn feat_lists_extensions() {
    let server = start_server().await;
    let mut client = Client::connect(&server).await;
    client.login_anonymous().await;

    client.send("FEAT").await;
    let lines = client.read_until_final(211).await;
    assert!(lines.iter().any(|l| l.contains("SIZE")));
    assert!(lines.iter().any(|l| l.contains("MDTM")));
    assert!(lines.iter().any(|l| l.contains("REST STREAM")));
    assert_eq!(lines.last().unwrap(), "211 End\r\n");
}

#[tokio::test]
async fn command_gating_and_syntax_errors() {
    let server = start_server().await;
    let mut client = Client::connect(&server).await;

    // NOOP is fine before login, everything gated replies 530.
    client.send("NOOP").await;
    client.expect(200).await;
    client.send("SYST").await;
    client.expect(530).await;
    client.send("PASS nothing").await;
    client.expect(503).await;

    // Unknown verb vs unparsable line.
    client.send("XYZZ").await;
    client.expect(502).await;
    client.send("R3TR x").await;
    client.expect(500).await;

    client.login_anonymous().await;

    // Mid-login USER restart: USER then a new USER is allowed.
    client.send("USER anonymous").await;
    client.expect(331).await;
    client.send("USER anonymous").await;
    client.expect(331).await;
    client.send("PASS x").await;
    client.expect(230).await;

    client.send("TYPE").await;
    client.expect(501).await;
    client.send("TYPE E").await;
    client.expect(504).await;
    client.send("MODE B").await;
    client.expect(504).await;
    client.send("STRU R").await;
    client.expect(504).await;

    // Anonymous is read-only: writes are refused.
    client.send("DELE a.bin").await;
    let line = client.expect(550).await;
    assert_eq!(line, "550 Permission denied\r\n");
}

#[tokio::test]
async fn abor_without_transfer_replies_225() {
    let server = start_server().await;
    let mut client = Client::connect(&server).await;
    client.login_anonymous().await;

    client.send("ABOR").await;
    client.expect(225).await;
}

#[tokio::test]
async fn retr_without_data_mode_replies_425() {
    let server = start_server().await;
    let mut client = Client::connect(&server).await;
    client.login_anonymous().await;

    client.send("RETR a.bin").await;
    client.expect(150).await;
    client.expect(425).await;
}

#[tokio::test]
async fn mkd_rmd_roundtrip() {
    let server = start_server().await;
    let mut client = Client::connect(&server).await;
    client.login_bob().await;

    client.send("MKD incoming").await;
    let line = client.expect(257).await;
    assert_eq!(line, "257 \"/incoming\" created\r\n");
    assert!(server.root.path().join("incoming").is_dir());

    client.send("CWD incoming").await;
    client.expect(250).await;
    client.send("PWD").await;
    let line = client.expect(257).await;
    assert!(line.contains("\"/incoming\""));

    client.send("CDUP").await;
    client.expect(250).await;

    client.send("RMD incoming").await;
    client.expect(250).await;
    assert!(!server.root.path().join("incoming").exists());
}

#[tokio::test]
async fn rein_resets_session_but_keeps_connection() {
    let server = start_server().await;
    let mut client = Client::connect(&server).await;
    client.login_bob().await;

    client.send("REIN").await;
    client.expect(220).await;

    // Back to square one: gated commands want a login again.
    client.send("PWD").await;
    client.expect(530).await;

    client.login_anonymous().await;
    client.send("PWD").await;
    let line = client.expect(257).await;
    assert!(line.contains("\"/pub\""));
}

#[tokio::test]
async fn connection_cap_emits_421() {
    let root = tempfile::tempdir().unwrap();
    std::fs::create_dir(root.path().join("pub")).unwrap();

    let config = Config {
        root_dir: root.path().to_path_buf(),
        max_connections: 1,
        command_timeout_ms: 10_000,
        ..Config::default()
    };
    let ctx = Arc::new(ServerContext {
        config,
        users: UserStore::new(true, "/pub", Permissions::READ),
        locks: LockTable::new(),
    });
    let listener = core_network::listen(AddrFamily::Ipv4, 0, 8).unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(server::serve(listener, ctx, std::future::pending::<()>()));

    let first = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let mut reader = BufReader::new(first);
    let mut line = String::new();
    reader.read_line(&mut line).await.unwrap();
    assert!(line.starts_with("220 "));

    let second = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let mut reader2 = BufReader::new(second);
    let mut line2 = String::new();
    tokio::time::timeout(IO_TIMEOUT, reader2.read_line(&mut line2))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        line2,
        "421 Service not available, too many connections\r\n"
    );
}
