use serde::{Deserialize, Serialize};

/// Inbound wire frame, one per chat message:
/// `{"receiver_id": "...", "message": "..."}`.
///
/// Frames that fail to parse are protocol violations and close the
/// connection; see `handlers::handle_socket`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub receiver_id: String,
    pub message: String,
}
