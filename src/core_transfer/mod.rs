//! The background transfer worker.
//!
//! RETR/STOR/APPE/LIST/NLST handlers acquire any needed file lock, emit
//! the 150 preliminary reply, open the data connection and then hand
//! everything to [`run_transfer`] on a dedicated task, so the control
//! channel stays responsive to ABOR. The worker owns the data socket and
//! the lock for the duration of the transfer, sends the final reply
//! itself, and returns the session to idle.
//!
//! Cancellation is cooperative but prompt: every copy iteration both
//! checks the session's abort flag and races its socket I/O against the
//! per-transfer abort notifier.

use crate::constants::TRANSFER_BUFFER_SIZE;
use crate::core_filelock::LockGuard;
use crate::core_fs::{self, FileInfo, FileKind};
use crate::core_protocol::ReplyCode;
use crate::helpers::{self, CrlfToLf};
use crate::session::{Session, TransferPhase};
use log::{debug, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Notify;

#[derive(Debug)]
pub enum TransferKind {
    /// RETR: file bytes from disk to the data channel.
    SendFile,
    /// STOR/APPE: data-channel bytes to disk until the peer half-closes.
    RecvFile,
    /// LIST: `ls -l` style lines. With a name filter only the matching
    /// entry of the directory is emitted (LIST with a file argument).
    SendList { name_filter: Option<String> },
    /// NLST: one name per line.
    SendNlst,
}

/// One unit of transfer work. Exists only while the worker runs; the
/// lock travels inside and is released when the task is dropped.
#[derive(Debug)]
pub struct TransferTask {
    pub kind: TransferKind,
    pub path: PathBuf,
    pub offset: u64,
    pub ascii: bool,
    pub lock: Option<LockGuard>,
}

enum TransferStatus {
    Done(u64),
    Aborted,
    ConnError,
    IoError,
}

/// Runs one transfer to completion and emits the final control reply.
pub async fn run_transfer(
    session: Session,
    mut data: TcpStream,
    mut task: TransferTask,
    notify: Arc<Notify>,
) {
    session.set_transfer_phase(TransferPhase::Running);
    debug!(
        "Transfer worker started: {:?} {:?} (offset {})",
        task.kind, task.path, task.offset
    );

    let status = match &task.kind {
        TransferKind::SendFile => send_file(&session, &mut data, &task, &notify).await,
        TransferKind::RecvFile => recv_file(&session, &mut data, &task, &notify).await,
        TransferKind::SendList { name_filter } => {
            send_list(&session, &mut data, &task, &notify, false, name_filter.clone()).await
        }
        TransferKind::SendNlst => send_list(&session, &mut data, &task, &notify, true, None).await,
    };

    session.set_transfer_phase(match status {
        TransferStatus::Aborted => TransferPhase::Aborted,
        _ => TransferPhase::Completing,
    });

    if let Err(err) = data.shutdown().await {
        debug!("Data connection shutdown after transfer: {}", err);
    }
    drop(data);

    let reply_result = match &status {
        TransferStatus::Done(bytes) => {
            match task.kind {
                TransferKind::SendFile => {
                    session.record_download(*bytes);
                    info!("File transfer completed: {} bytes sent", bytes);
                }
                TransferKind::RecvFile => {
                    session.record_upload(*bytes);
                    info!("File reception completed: {} bytes received", bytes);
                }
                _ => {}
            }
            session.reply(ReplyCode::ClosingDataConnection, "Transfer complete").await
        }
        TransferStatus::Aborted => {
            info!("Transfer aborted for {:?}", task.path);
            let first = session
                .reply(
                    ReplyCode::ConnectionClosed,
                    "Data connection closed; transfer aborted",
                )
                .await;
            if first.is_ok() {
                session
                    .reply(ReplyCode::ClosingDataConnection, "ABOR command successful")
                    .await
            } else {
                first
            }
        }
        TransferStatus::ConnError => {
            warn!("Data connection failed during transfer of {:?}", task.path);
            session
                .reply(
                    ReplyCode::ConnectionClosed,
                    "Data connection closed; transfer aborted",
                )
                .await
        }
        TransferStatus::IoError => {
            warn!("Local I/O error during transfer of {:?}", task.path);
            session
                .reply(
                    ReplyCode::LocalError,
                    "Requested action aborted. Local error in processing",
                )
                .await
        }
    };

    if let Err(err) = reply_result {
        warn!("Could not send final transfer reply: {}", err);
    }

    // Release the file lock before going back to idle.
    task.lock.take();
    session.finish_transfer();
}

async fn send_file(
    session: &Session,
    data: &mut TcpStream,
    task: &TransferTask,
    notify: &Notify,
) -> TransferStatus {
    let size = match core_fs::size(&task.path).await {
        Ok(size) => size,
        Err(_) => return TransferStatus::IoError,
    };
    if task.offset > size {
        return TransferStatus::IoError;
    }

    let mut buf = vec![0u8; TRANSFER_BUFFER_SIZE];
    let mut ascii_buf: Vec<u8> = Vec::new();
    let mut remaining = size - task.offset;
    let mut current = task.offset;
    let mut total_sent: u64 = 0;

    while remaining > 0 {
        if session.abort_requested() {
            return TransferStatus::Aborted;
        }

        let to_read = remaining.min(TRANSFER_BUFFER_SIZE as u64) as usize;
        let n = match core_fs::read_range(&task.path, current, &mut buf[..to_read]).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(_) => return TransferStatus::IoError,
        };

        let chunk: &[u8] = if task.ascii {
            helpers::lf_to_crlf(&buf[..n], &mut ascii_buf);
            &ascii_buf
        } else {
            &buf[..n]
        };

        tokio::select! {
            biased;
            _ = notify.notified() => return TransferStatus::Aborted,
            sent = data.write_all(chunk) => {
                if sent.is_err() {
                    return TransferStatus::ConnError;
                }
            }
        }

        current += n as u64;
        remaining -= n as u64;
        total_sent += chunk.len() as u64;
    }

    TransferStatus::Done(total_sent)
}

async fn recv_file(
    session: &Session,
    data: &mut TcpStream,
    task: &TransferTask,
    notify: &Notify,
) -> TransferStatus {
    let convert = task.ascii && helpers::ascii_recv_converts();
    let mut converter = CrlfToLf::new();
    let mut buf = vec![0u8; TRANSFER_BUFFER_SIZE];
    let mut converted: Vec<u8> = Vec::new();
    let mut total_received: u64 = 0;
    let mut total_written: u64 = 0;

    loop {
        if session.abort_requested() {
            return TransferStatus::Aborted;
        }

        let n = tokio::select! {
            biased;
            _ = notify.notified() => return TransferStatus::Aborted,
            received = data.read(&mut buf) => match received {
                Ok(0) => break,
                Ok(n) => n,
                Err(_) => return TransferStatus::ConnError,
            }
        };
        total_received += n as u64;

        let chunk: &[u8] = if convert {
            converter.convert(&buf[..n], &mut converted);
            &converted
        } else {
            &buf[..n]
        };

        if core_fs::write_range(&task.path, task.offset + total_written, chunk)
            .await
            .is_err()
        {
            return TransferStatus::IoError;
        }
        total_written += chunk.len() as u64;
    }

    if convert {
        converter.finish(&mut converted);
        if !converted.is_empty()
            && core_fs::write_range(&task.path, task.offset + total_written, &converted)
                .await
                .is_err()
        {
            return TransferStatus::IoError;
        }
    }

    TransferStatus::Done(total_received)
}

async fn send_list(
    session: &Session,
    data: &mut TcpStream,
    task: &TransferTask,
    notify: &Notify,
    names_only: bool,
    name_filter: Option<String>,
) -> TransferStatus {
    let mut entries = match core_fs::list(&task.path).await {
        Ok(entries) => entries,
        Err(_) => return TransferStatus::IoError,
    };

    if let Some(filter) = &name_filter {
        entries.retain(|entry| &entry.name == filter);
    }

    let count = entries.len();
    for entry in entries {
        if session.abort_requested() {
            return TransferStatus::Aborted;
        }

        let line = if names_only {
            format!("{}\r\n", entry.name)
        } else {
            format_list_line(&entry)
        };

        tokio::select! {
            biased;
            _ = notify.notified() => return TransferStatus::Aborted,
            sent = data.write_all(line.as_bytes()) => {
                if sent.is_err() {
                    return TransferStatus::ConnError;
                }
            }
        }
    }

    info!("Sent directory listing: {} entries", count);
    TransferStatus::Done(0)
}

/// Renders one UNIX `ls -l` style listing line:
/// `-rw-r--r--   1 user     group            1234 Nov 02 12:34 name`
/// with `name -> target` for symlinks.
pub fn format_list_line(entry: &FileInfo) -> String {
    let type_char = type_char(entry);
    let perms = perm_string(entry.mode_bits);
    let user = core_fs::owner_name(entry.uid);
    let group = core_fs::group_name(entry.gid);
    let date = helpers::list_timestamp(entry.mtime);

    match &entry.link_target {
        Some(target) => format!(
            "{}{} {:>3} {:<8} {:<8} {:>12} {} {} -> {}\r\n",
            type_char,
            perms,
            entry.nlink,
            user,
            group,
            entry.size,
            date,
            entry.name,
            target.display()
        ),
        None => format!(
            "{}{} {:>3} {:<8} {:<8} {:>12} {} {}\r\n",
            type_char, perms, entry.nlink, user, group, entry.size, date, entry.name
        ),
    }
}

fn type_char(entry: &FileInfo) -> char {
    match entry.mode_bits & 0o170000 {
        0o140000 => 's',
        0o120000 => 'l',
        0o100000 => '-',
        0o060000 => 'b',
        0o040000 => 'd',
        0o020000 => 'c',
        0o010000 => 'p',
        _ => match entry.kind {
            FileKind::Dir => 'd',
            FileKind::Symlink => 'l',
            _ => '-',
        },
    }
}

fn perm_string(mode: u32) -> String {
    let mut perms = String::with_capacity(9);
    for shift in [6u32, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        perms.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        perms.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        perms.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    perms
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn entry(kind: FileKind, mode: u32) -> FileInfo {
        FileInfo {
            name: "example.txt".to_string(),
            kind,
            size: 1234,
            mtime: SystemTime::UNIX_EPOCH,
            mode_bits: mode,
            nlink: 1,
            uid: 0,
            gid: 0,
            link_target: None,
        }
    }

    #[test]
    fn permission_string_renders_all_bits() {
        assert_eq!(perm_string(0o755), "rwxr-xr-x");
        assert_eq!(perm_string(0o644), "rw-r--r--");
        assert_eq!(perm_string(0o000), "---------");
        assert_eq!(perm_string(0o777), "rwxrwxrwx");
    }

    #[test]
    fn type_char_from_mode_and_kind() {
        assert_eq!(type_char(&entry(FileKind::File, 0o100644)), '-');
        assert_eq!(type_char(&entry(FileKind::Dir, 0o040755)), 'd');
        assert_eq!(type_char(&entry(FileKind::Symlink, 0o120777)), 'l');
        // Synthetic modes without a type nibble fall back to the kind.
        assert_eq!(type_char(&entry(FileKind::Dir, 0o755)), 'd');
        assert_eq!(type_char(&entry(FileKind::File, 0o644)), '-');
    }

    #[test]
    fn list_line_is_crlf_terminated() {
        let line = format_list_line(&entry(FileKind::File, 0o100644));
        assert!(line.ends_with("example.txt\r\n"));
        assert!(line.starts_with("-rw-r--r--"));
    }

    #[test]
    fn list_line_includes_symlink_target() {
        let mut info = entry(FileKind::Symlink, 0o120777);
        info.link_target = Some(PathBuf::from("/srv/target"));
        let line = format_list_line(&info);
        assert!(line.contains("example.txt -> /srv/target"));
    }
}
