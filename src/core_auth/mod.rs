//! Users, permissions, and the on-disk user database.
//!
//! The database is a plain text file, one record per line:
//! `username:digest:home_dir:permissions` where the digest is a 64
//! character hex SHA-256 of the password, the home directory is a virtual
//! absolute path, and permissions are the bitset value in decimal or
//! `0x`-prefixed hex. `#` lines and blank lines are ignored.
//!
//! An "anonymous" pseudo-user can be enabled without a database record; it
//! gets a configurable home and permission set (read-only by default) and
//! accepts any password.

use crate::constants::DEFAULT_ANONYMOUS_HOME;
use sha2::{Digest, Sha256};
use std::fmt;
use std::ops::BitOr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("could not open user database {0}: {1}")]
    Open(String, std::io::Error),
    #[error("could not write user database {0}: {1}")]
    Write(String, std::io::Error),
}

/// Permission bitset. ADMIN additionally bypasses the home-directory
/// sandbox check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Permissions(u8);

impl Permissions {
    pub const NONE: Permissions = Permissions(0x00);
    pub const READ: Permissions = Permissions(0x01);
    pub const WRITE: Permissions = Permissions(0x02);
    pub const DELETE: Permissions = Permissions(0x04);
    pub const RENAME: Permissions = Permissions(0x08);
    pub const MKDIR: Permissions = Permissions(0x10);
    pub const RMDIR: Permissions = Permissions(0x20);
    pub const ADMIN: Permissions = Permissions(0x40);
    pub const ALL: Permissions = Permissions(0xFF);

    pub fn from_bits(bits: u8) -> Self {
        Permissions(bits)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, required: Permissions) -> bool {
        self.0 & required.0 == required.0
    }

    pub fn is_admin(self) -> bool {
        self.contains(Self::ADMIN)
    }
}

impl BitOr for Permissions {
    type Output = Permissions;

    fn bitor(self, rhs: Permissions) -> Permissions {
        Permissions(self.0 | rhs.0)
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct User {
    pub name: String,
    pub password_digest: String,
    /// Virtual absolute path, starts with `/`.
    pub home: String,
    pub permissions: Permissions,
}

#[derive(Debug)]
struct StoreInner {
    users: Vec<User>,
    anonymous_enabled: bool,
    anonymous: User,
}

/// The credential store. Cheap to clone; reads dominate, so a single
/// mutex over the whole store is plenty.
#[derive(Debug, Clone)]
pub struct UserStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl Default for UserStore {
    fn default() -> Self {
        Self::new(true, DEFAULT_ANONYMOUS_HOME, Permissions::READ)
    }
}

impl UserStore {
    pub fn new(anonymous_enabled: bool, anonymous_home: &str, anonymous_perms: Permissions) -> Self {
        let anonymous = User {
            name: "anonymous".to_string(),
            password_digest: String::new(),
            home: anonymous_home.to_string(),
            permissions: anonymous_perms,
        };
        UserStore {
            inner: Arc::new(Mutex::new(StoreInner {
                users: Vec::new(),
                anonymous_enabled,
                anonymous,
            })),
        }
    }

    /// Loads user records from `path`, replacing nothing: records add to
    /// whatever the store already holds. Malformed lines are logged and
    /// skipped. Returns the number of records loaded.
    pub fn load_file(&self, path: &Path) -> Result<usize, AuthError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AuthError::Open(path.display().to_string(), e))?;

        let mut inner = self.inner.lock().unwrap();
        let mut count = 0;

        for (line_num, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            match parse_record(line) {
                Some(user) => {
                    if inner.users.iter().any(|u| u.name == user.name) {
                        log::warn!(
                            "Duplicate user '{}' at line {} in {}, keeping first",
                            user.name,
                            line_num + 1,
                            path.display()
                        );
                        continue;
                    }
                    inner.users.push(user);
                    count += 1;
                }
                None => {
                    log::warn!("Invalid record at line {} in {}", line_num + 1, path.display());
                }
            }
        }

        log::info!("Loaded {} users from {}", count, path.display());
        Ok(count)
    }

    /// Persists the store to `path` in the documented record format.
    pub fn save_file(&self, path: &Path) -> Result<usize, AuthError> {
        let inner = self.inner.lock().unwrap();

        let mut out = String::new();
        out.push_str("# FTP user database\n");
        out.push_str("# Format: username:password_digest:home_dir:permissions\n");
        out.push_str("# home_dir is virtual-absolute (starts with /)\n");
        out.push_str("# permissions are a bitset:\n");
        out.push_str("#   0x01 READ    0x02 WRITE   0x04 DELETE  0x08 RENAME\n");
        out.push_str("#   0x10 MKDIR   0x20 RMDIR   0x40 ADMIN   0xFF ALL\n");
        for user in &inner.users {
            out.push_str(&format!(
                "{}:{}:{}:{}\n",
                user.name,
                user.password_digest,
                user.home,
                user.permissions.bits()
            ));
        }

        std::fs::write(path, out).map_err(|e| AuthError::Write(path.display().to_string(), e))?;
        Ok(inner.users.len())
    }

    /// Adds a user with a freshly digested password. Returns false when
    /// the name is already taken.
    pub fn add_user(&self, name: &str, password: &str, home: &str, permissions: Permissions) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.users.iter().any(|u| u.name == name) {
            return false;
        }
        inner.users.push(User {
            name: name.to_string(),
            password_digest: digest(password),
            home: home.to_string(),
            permissions,
        });
        true
    }

    /// Looks a user up by name. When anonymous login is enabled and no
    /// database record shadows it, "anonymous" resolves to the virtual
    /// anonymous user.
    pub fn lookup(&self, name: &str) -> Option<User> {
        let inner = self.inner.lock().unwrap();
        if let Some(user) = inner.users.iter().find(|u| u.name == name) {
            return Some(user.clone());
        }
        if inner.anonymous_enabled && name == "anonymous" {
            return Some(inner.anonymous.clone());
        }
        None
    }

    /// True when a database record exists for `name` (the virtual
    /// anonymous user does not count).
    pub fn user_exists(&self, name: &str) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.users.iter().any(|u| u.name == name)
    }

    pub fn anonymous_enabled(&self) -> bool {
        self.inner.lock().unwrap().anonymous_enabled
    }

    /// Verifies a password. Anonymous (when enabled and not shadowed by a
    /// database record) accepts any password.
    pub fn verify(&self, name: &str, password: &str) -> bool {
        let inner = self.inner.lock().unwrap();
        if let Some(user) = inner.users.iter().find(|u| u.name == name) {
            return user.password_digest == digest(password);
        }
        inner.anonymous_enabled && name == "anonymous"
    }
}

/// SHA-256 of the password, lowercase hex: exactly 64 characters, the
/// fixed field width the database format requires.
pub fn digest(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    let bytes = hasher.finalize();
    let mut out = String::with_capacity(64);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

fn parse_record(line: &str) -> Option<User> {
    let fields: Vec<&str> = line.split(':').collect();
    if fields.len() != 4 {
        return None;
    }

    let (name, digest, home, perms) = (fields[0], fields[1], fields[2], fields[3]);

    if name.is_empty() || !home.starts_with('/') {
        return None;
    }
    if digest.len() != 64 || !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }

    let bits = if let Some(hex) = perms.strip_prefix("0x").or_else(|| perms.strip_prefix("0X")) {
        u8::from_str_radix(hex, 16).ok()?
    } else {
        perms.parse::<u8>().ok()?
    };

    Some(User {
        name: name.to_string(),
        password_digest: digest.to_ascii_lowercase(),
        home: home.to_string(),
        permissions: Permissions::from_bits(bits),
    })
}
