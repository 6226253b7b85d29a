//! FTP retrieval of GEO archives.
//!
//! [`RetrievalClient`] owns one FTP session at a time. It walks the target
//! directory one segment at a time, picks the first listed file whose name
//! contains the requested pattern and streams it into a spooled temp file.
//! A transient fault gets exactly one reconnect-and-retry; anything else is
//! returned as is.

use std::io::{Read, Seek, SeekFrom, Write};

use flate2::read::MultiGzDecoder;
use serde::{Deserialize, Serialize};
use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream, Mode};
use tracing::{debug, info, warn};

use crate::error::GeoError;

/// Transfers larger than this spill from memory to a temp file.
pub const SPOOL_THRESHOLD: usize = 32 * 1024 * 1024;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl Default for FtpConfig {
    fn default() -> Self {
        Self {
            host: "ftp.ncbi.nlm.nih.gov".to_string(),
            port: 21,
            username: "anonymous".to_string(),
            password: "anonymous@".to_string(),
        }
    }
}

/// One logged-in FTP control connection.
pub trait FtpSession {
    fn cwd(&mut self, path: &str) -> Result<(), GeoError>;
    fn list_names(&mut self) -> Result<Vec<String>, GeoError>;
    fn retrieve(&mut self, filename: &str, sink: &mut dyn Write) -> Result<u64, GeoError>;
    fn quit(&mut self) -> Result<(), GeoError>;
}

pub trait FtpConnector {
    type Session: FtpSession;

    fn connect(&self) -> Result<Self::Session, GeoError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawContent {
    pub directory: String,
    pub filename: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievedText {
    pub directory: String,
    pub filename: String,
    pub text: String,
}

pub struct RetrievalClient<C: FtpConnector> {
    connector: C,
    session: Option<C::Session>,
}

impl<C: FtpConnector> RetrievalClient<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            session: None,
        }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Downloads the first file in `directory` whose name contains `pattern`.
    pub fn fetch(&mut self, directory: &str, pattern: &str) -> Result<RawContent, GeoError> {
        match self.attempt(directory, pattern) {
            Ok(content) => Ok(content),
            Err(err) if err.is_transient() => {
                warn!(directory, pattern, error = %err, "transfer failed, reconnecting once");
                self.close();
                self.attempt(directory, pattern)
            }
            Err(err) => Err(err),
        }
    }

    /// Resolves the full name of the first file in `directory` containing
    /// `pattern`, without transferring it. Same retry rule as `fetch`.
    pub fn locate(&mut self, directory: &str, pattern: &str) -> Result<String, GeoError> {
        match self.with_session(|session| locate_with_session(session, directory, pattern)) {
            Ok(name) => Ok(name),
            Err(err) if err.is_transient() => {
                warn!(directory, pattern, error = %err, "listing failed, reconnecting once");
                self.close();
                self.with_session(|session| locate_with_session(session, directory, pattern))
            }
            Err(err) => Err(err),
        }
    }

    /// Like [`fetch`](Self::fetch), then decompresses and decodes the payload.
    pub fn fetch_text(&mut self, directory: &str, pattern: &str) -> Result<RetrievedText, GeoError> {
        let raw = self.fetch(directory, pattern)?;
        let text = decode_content(&raw)?;
        Ok(RetrievedText {
            directory: raw.directory,
            filename: raw.filename,
            text,
        })
    }

    /// Sends QUIT on the owned session, if any.
    pub fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(err) = session.quit() {
                warn!(error = %err, "failed to quit FTP session gracefully");
            }
        }
    }

    fn attempt(&mut self, directory: &str, pattern: &str) -> Result<RawContent, GeoError> {
        self.with_session(|session| fetch_with_session(session, directory, pattern))
    }

    fn with_session<R>(
        &mut self,
        op: impl FnOnce(&mut C::Session) -> Result<R, GeoError>,
    ) -> Result<R, GeoError> {
        if self.session.is_none() {
            let session = self.connector.connect()?;
            self.session = Some(session);
        }
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| GeoError::TransientTransfer("FTP session unavailable".to_string()))?;
        op(session)
    }
}

impl<C: FtpConnector> Drop for RetrievalClient<C> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Runs one listing-and-transfer on a session the caller owns. The session is
/// left open.
pub fn fetch_with_session<S: FtpSession + ?Sized>(
    session: &mut S,
    directory: &str,
    pattern: &str,
) -> Result<RawContent, GeoError> {
    let filename = locate_with_session(session, directory, pattern)?;

    debug!(directory, filename = %filename, "retrieving");
    let mut spool = tempfile::spooled_tempfile(SPOOL_THRESHOLD);
    let written = session.retrieve(&filename, &mut spool)?;
    spool
        .seek(SeekFrom::Start(0))
        .map_err(|err| GeoError::Filesystem(err.to_string()))?;
    let mut bytes = Vec::with_capacity(written as usize);
    spool
        .read_to_end(&mut bytes)
        .map_err(|err| GeoError::Filesystem(err.to_string()))?;
    info!(directory, filename = %filename, bytes = bytes.len(), "retrieved");

    Ok(RawContent {
        directory: directory.to_string(),
        filename,
        bytes,
    })
}

/// Changes into `directory` and returns the first listed name containing `pattern`.
pub fn locate_with_session<S: FtpSession + ?Sized>(
    session: &mut S,
    directory: &str,
    pattern: &str,
) -> Result<String, GeoError> {
    // Some servers reject a multi-segment CWD, so walk it.
    session.cwd("/")?;
    for segment in directory.split('/').filter(|s| !s.is_empty()) {
        session.cwd(segment)?;
    }

    session
        .list_names()?
        .into_iter()
        .find(|name| name.contains(pattern))
        .ok_or_else(|| GeoError::NoMatchingFile {
            directory: directory.to_string(),
            pattern: pattern.to_string(),
        })
}

/// Gunzips (when the payload is gzip) and decodes UTF-8. Empty text is an error.
pub fn decode_content(raw: &RawContent) -> Result<String, GeoError> {
    let decode_err = |message: String| GeoError::Decode {
        filename: raw.filename.clone(),
        message,
    };

    let bytes = if raw.bytes.starts_with(&GZIP_MAGIC) {
        let mut decoder = MultiGzDecoder::new(raw.bytes.as_slice());
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|err| decode_err(err.to_string()))?;
        out
    } else {
        raw.bytes.clone()
    };

    let text = String::from_utf8(bytes).map_err(|err| decode_err(err.to_string()))?;
    if text.trim().is_empty() {
        return Err(GeoError::EmptyContent {
            filename: raw.filename.clone(),
        });
    }
    Ok(text)
}

#[derive(Debug, Clone, Default)]
pub struct SuppaFtpConnector {
    config: FtpConfig,
}

impl SuppaFtpConnector {
    pub fn new(config: FtpConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FtpConfig {
        &self.config
    }
}

impl FtpConnector for SuppaFtpConnector {
    type Session = SuppaFtpSession;

    fn connect(&self) -> Result<Self::Session, GeoError> {
        let address = format!("{}:{}", self.config.host, self.config.port);
        debug!(address = %address, "connecting to FTP server");
        let mut stream =
            FtpStream::connect(&address).map_err(|err| classify_ftp_error(err, "connect"))?;
        stream.set_mode(Mode::ExtendedPassive);
        stream
            .login(self.config.username.as_str(), self.config.password.as_str())
            .map_err(|err| classify_ftp_error(err, "login"))?;
        stream
            .transfer_type(FileType::Binary)
            .map_err(|err| classify_ftp_error(err, "set binary mode"))?;
        Ok(SuppaFtpSession { stream })
    }
}

pub struct SuppaFtpSession {
    stream: FtpStream,
}

impl FtpSession for SuppaFtpSession {
    fn cwd(&mut self, path: &str) -> Result<(), GeoError> {
        self.stream
            .cwd(path)
            .map_err(|err| classify_ftp_error(err, &format!("cwd {path}")))
    }

    fn list_names(&mut self) -> Result<Vec<String>, GeoError> {
        let names = self
            .stream
            .nlst(None)
            .map_err(|err| classify_ftp_error(err, "nlst"))?;
        Ok(names
            .into_iter()
            .map(|name| name.rsplit('/').next().unwrap_or_default().to_string())
            .filter(|name| !name.is_empty())
            .collect())
    }

    fn retrieve(&mut self, filename: &str, sink: &mut dyn Write) -> Result<u64, GeoError> {
        self.stream
            .retr(filename, |reader| {
                std::io::copy(reader, &mut *sink).map_err(FtpError::ConnectionError)
            })
            .map_err(|err| classify_ftp_error(err, &format!("retr {filename}")))
    }

    fn quit(&mut self) -> Result<(), GeoError> {
        self.stream
            .quit()
            .map_err(|err| classify_ftp_error(err, "quit"))
    }
}

/// Connection drops and 4xx replies are transient; 5xx replies and protocol
/// errors are permanent.
pub fn classify_ftp_error(err: FtpError, context: &str) -> GeoError {
    match &err {
        FtpError::ConnectionError(_) => GeoError::TransientTransfer(format!("{context}: {err}")),
        FtpError::UnexpectedResponse(response) => {
            if is_transient_reply(response.status.code()) {
                GeoError::TransientTransfer(format!("{context}: {err}"))
            } else {
                GeoError::PermissionTransfer(format!("{context}: {err}"))
            }
        }
        _ => GeoError::PermissionTransfer(format!("{context}: {err}")),
    }
}

pub fn is_transient_reply(code: u32) -> bool {
    (400..500).contains(&code)
}
