//! Remote file transfer over SFTP.
//!
//! The pipeline only depends on two small traits:
//!
//! - [`Connector`] opens a [`TransferSession`] to the remote endpoint
//! - [`TransferSession::upload`] streams a local reader to a remote path
//!
//! [`SftpConnector`] is the production implementation on top of [`ssh2`],
//! authenticating with a username and password. Both traits are blocking;
//! async callers run them on the blocking pool.
//!
//! # Error classification
//!
//! [`TransferError::is_transport`] separates failures of the session itself
//! (connect, handshake, broken channel) from failures scoped to one file
//! (remote permission denied, local read error). Callers drop the session on
//! the former and keep using it on the latter.

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;

use ssh2::{ErrorCode, Session, Sftp};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::SftpConfig;

/// Size of the buffer used to stream a file to the remote side.
const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Errors that can occur while talking to the remote endpoint.
#[derive(Error, Debug)]
pub enum TransferError {
    /// TCP connection could not be established.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Server rejected the credentials.
    #[error("authentication failed for user '{username}'")]
    Auth { username: String },

    /// SSH session or channel failure. The session is unusable afterwards.
    #[error("transport error: {0}")]
    Transport(String),

    /// Server refused an operation on a specific path.
    #[error("remote error for {path}: {message}")]
    Remote { path: String, message: String },

    /// The local source could not be read.
    #[error("failed to read local file: {0}")]
    LocalRead(#[source] io::Error),
}

impl TransferError {
    /// Returns `true` if the session can no longer be used.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::Auth { .. } | Self::Transport(_)
        )
    }

    /// Classifies an [`ssh2::Error`]: SFTP status codes are scoped to a path,
    /// everything else is a session failure.
    fn from_ssh(err: ssh2::Error, path: &str) -> Self {
        match err.code() {
            ErrorCode::SFTP(_) => Self::Remote {
                path: path.to_string(),
                message: err.message().to_string(),
            },
            ErrorCode::Session(_) => Self::Transport(err.to_string()),
        }
    }
}

/// Opens sessions to the remote endpoint.
pub trait Connector: Send + Sync + 'static {
    /// Session type produced by this connector.
    type Session: TransferSession;

    /// Establishes and authenticates a new session.
    ///
    /// # Errors
    ///
    /// Returns a transport-class [`TransferError`] if the endpoint is
    /// unreachable or rejects the login.
    fn connect(&self) -> Result<Self::Session, TransferError>;
}

/// An authenticated session able to upload files.
pub trait TransferSession: Send + 'static {
    /// Streams `reader` to `remote_path`, replacing any existing file.
    /// Returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns a [`TransferError`]; see [`TransferError::is_transport`] for
    /// whether the session survives it.
    fn upload(&mut self, reader: &mut dyn Read, remote_path: &str) -> Result<u64, TransferError>;
}

/// Joins the remote working path and a file name.
///
/// A `/` is inserted unless the working path is empty or already ends with
/// one.
#[must_use]
pub fn remote_path_for(working_path: &str, file_name: &str) -> String {
    if working_path.is_empty() || working_path.ends_with('/') {
        format!("{working_path}{file_name}")
    } else {
        format!("{working_path}/{file_name}")
    }
}

/// [`Connector`] for SFTP servers using password authentication.
#[derive(Debug, Clone)]
pub struct SftpConnector {
    config: SftpConfig,
}

impl SftpConnector {
    /// Creates a connector for the given endpoint.
    #[must_use]
    pub fn new(config: SftpConfig) -> Self {
        Self { config }
    }

    fn open_tcp(&self) -> Result<TcpStream, TransferError> {
        let addr = self.config.address();
        let connect_err = |source: io::Error| TransferError::Connect {
            addr: addr.clone(),
            source,
        };

        let mut last_err = io::Error::new(io::ErrorKind::NotFound, "no addresses resolved");
        for socket_addr in addr.to_socket_addrs().map_err(connect_err)? {
            match TcpStream::connect_timeout(&socket_addr, self.config.timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    debug!(addr = %socket_addr, error = %e, "TCP connect attempt failed");
                    last_err = e;
                }
            }
        }

        Err(connect_err(last_err))
    }
}

impl Connector for SftpConnector {
    type Session = SftpSession;

    fn connect(&self) -> Result<SftpSession, TransferError> {
        let tcp = self.open_tcp()?;

        let mut session =
            Session::new().map_err(|e| TransferError::Transport(e.to_string()))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(u32::try_from(self.config.timeout.as_millis()).unwrap_or(u32::MAX));
        session
            .handshake()
            .map_err(|e| TransferError::Transport(format!("SSH handshake failed: {e}")))?;

        session
            .userauth_password(&self.config.username, &self.config.password)
            .map_err(|_| TransferError::Auth {
                username: self.config.username.clone(),
            })?;
        if !session.authenticated() {
            return Err(TransferError::Auth {
                username: self.config.username.clone(),
            });
        }

        let sftp = session
            .sftp()
            .map_err(|e| TransferError::Transport(format!("failed to open SFTP channel: {e}")))?;

        info!(
            addr = %self.config.address(),
            username = %self.config.username,
            "SFTP session established"
        );

        Ok(SftpSession { session, sftp })
    }
}

/// Live SFTP session.
pub struct SftpSession {
    /// Owns the SSH transport the SFTP channel runs on.
    #[allow(dead_code)]
    session: Session,
    sftp: Sftp,
}

impl TransferSession for SftpSession {
    fn upload(&mut self, reader: &mut dyn Read, remote_path: &str) -> Result<u64, TransferError> {
        let mut remote = self
            .sftp
            .create(Path::new(remote_path))
            .map_err(|e| TransferError::from_ssh(e, remote_path))?;

        let mut buf = vec![0u8; UPLOAD_CHUNK_SIZE];
        let mut total = 0u64;
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(TransferError::LocalRead(e)),
            };
            remote
                .write_all(&buf[..n])
                .map_err(|e| TransferError::Transport(e.to_string()))?;
            total += n as u64;
        }

        remote
            .close()
            .map_err(|e| TransferError::from_ssh(e, remote_path))?;

        debug!(remote_path, bytes = total, "Upload complete");
        Ok(total)
    }
}
