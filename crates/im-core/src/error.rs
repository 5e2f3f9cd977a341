//! Error taxonomy for the core. Only [`CoreError::Framing`] is a
//! reason to close the connection; the other variants are logged and
//! absorbed by the dispatcher.

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("framing error: {0}")]
    Framing(#[from] im_protocol::FrameError),
    #[error("payload error: {0}")]
    Payload(#[from] im_protocol::PayloadError),
    #[error("malformed packet: {0}")]
    Packet(#[from] im_protocol::PacketDecodeError),
    #[error("malformed json body: {0}")]
    Json(#[from] serde_json::Error),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl CoreError {
    /// Whether this error should force-close the connection, per the
    /// policy that framing errors are fatal and everything else is
    /// absorbed at the dispatch boundary.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CoreError::Framing(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0}")]
    Backend(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
