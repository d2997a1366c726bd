//! The boundary to the external rendering front-end (§6). Deliberately
//! minimal: a channel of frames out, a channel of plain-text status
//! messages out, and nothing else crosses this line.

use serde::Serialize;
use tokio::sync::mpsc;

/// One selected photo, ready for the front-end to render. `bytes` carries
/// the already-normalized JPEG; whether the transport re-encodes it as
/// base64 is the front-end's concern, not this crate's.
#[derive(Debug, Clone, Serialize)]
pub struct FrameEvent {
    pub photo_id: String,
    #[serde(skip_serializing)]
    pub bytes: Vec<u8>,
    pub filename: String,
    pub created_at: Option<i64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

pub type FrameSender = mpsc::Sender<FrameEvent>;
pub type FrameReceiver = mpsc::Receiver<FrameEvent>;

/// Human-readable status strings for user-visible failures (auth expired,
/// store rebuilt, provider unreachable). Never a panic, never structured
/// data the front-end has to parse.
pub type StatusSender = mpsc::Sender<String>;
pub type StatusReceiver = mpsc::Receiver<String>;

pub fn frame_channel(capacity: usize) -> (FrameSender, FrameReceiver) {
    mpsc::channel(capacity)
}

pub fn status_channel(capacity: usize) -> (StatusSender, StatusReceiver) {
    mpsc::channel(capacity)
}
