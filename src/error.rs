//! Unified error types for the devlink agent.
//!
//! A single `Error` enum that every subsystem converts into, so the
//! lifecycle state machine can log any failure and carry on uniformly.
//! All variants are `Copy` so they pass through the dispatcher and the
//! state handlers without allocation.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level agent error
// ---------------------------------------------------------------------------

/// Every fallible operation in the agent funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A network operation failed or timed out.
    Transport(TransportError),
    /// An inbound payload was malformed or missing a required node.
    Parse(ParseError),
    /// The service flagged this device as belonging to an unknown owner.
    Authorization,
    /// The identity record could not be read or written.
    Persistence(PersistenceError),
    /// A firmware download or flash failed.
    Update(UpdateError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport: {e}"),
            Self::Parse(e) => write!(f, "parse: {e}"),
            Self::Authorization => write!(f, "authorization: owner not recognised by service"),
            Self::Persistence(e) => write!(f, "persistence: {e}"),
            Self::Update(e) => write!(f, "update: {e}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Transport errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// Host lookup or TCP connect failed.
    ConnectFailed,
    /// No response arrived before the deadline.
    Timeout,
    /// Writing the request failed or wrote short.
    WriteFailed,
    /// Reading from the peer failed.
    ReadFailed,
    /// Operation requires an open session.
    NotConnected,
    /// Broker rejected the session.
    SessionRejected,
    /// Subscribing to a channel failed.
    SubscribeFailed,
    /// Publishing a message failed.
    PublishFailed,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectFailed => write!(f, "connect failed"),
            Self::Timeout => write!(f, "timed out waiting for response"),
            Self::WriteFailed => write!(f, "write failed"),
            Self::ReadFailed => write!(f, "read failed"),
            Self::NotConnected => write!(f, "not connected"),
            Self::SessionRejected => write!(f, "session rejected by broker"),
            Self::SubscribeFailed => write!(f, "subscribe failed"),
            Self::PublishFailed => write!(f, "publish failed"),
        }
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

// ---------------------------------------------------------------------------
// Parse errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// The marker was found but no complete object follows it.
    Truncated,
    /// The object following the marker is not valid JSON for its kind.
    Malformed,
    /// A node the payload kind requires is absent.
    MissingNode(&'static str),
    /// Outbound body could not be encoded.
    Encode,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "payload object truncated"),
            Self::Malformed => write!(f, "payload object malformed"),
            Self::MissingNode(node) => write!(f, "missing node '{node}'"),
            Self::Encode => write!(f, "body encoding failed"),
        }
    }
}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Self {
        Self::Parse(e)
    }
}

// ---------------------------------------------------------------------------
// Persistence errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceError {
    /// The backing store could not be opened.
    Unavailable,
    /// Stored bytes are not a well-formed identity record.
    Corrupt,
    /// Encoded record exceeds the fixed record size.
    TooLarge,
    /// The backing store reported an I/O failure.
    Io,
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable => write!(f, "store unavailable"),
            Self::Corrupt => write!(f, "record corrupt"),
            Self::TooLarge => write!(f, "record exceeds maximum size"),
            Self::Io => write!(f, "I/O error"),
        }
    }
}

impl From<PersistenceError> for Error {
    fn from(e: PersistenceError) -> Self {
        Self::Persistence(e)
    }
}

// ---------------------------------------------------------------------------
// Update errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateError {
    /// No direct URL or one-time token was supplied.
    NoUrl,
    /// The image could not be fetched.
    DownloadFailed,
    /// The server answered with an unexpected HTTP status.
    HttpStatus(u16),
    /// Declared image size is zero or exceeds the partition.
    InvalidSize,
    /// The stream ended before the declared length was read.
    Incomplete,
    /// Writing or finalising the partition failed.
    FlashFailed,
}

impl fmt::Display for UpdateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoUrl => write!(f, "no update URL"),
            Self::DownloadFailed => write!(f, "download failed"),
            Self::HttpStatus(code) => write!(f, "HTTP status {code}"),
            Self::InvalidSize => write!(f, "image size out of range"),
            Self::Incomplete => write!(f, "image stream incomplete"),
            Self::FlashFailed => write!(f, "flash write failed"),
        }
    }
}

impl From<UpdateError> for Error {
    fn from(e: UpdateError) -> Self {
        Self::Update(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Agent-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
