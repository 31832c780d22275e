use dc600_proto::message_id::AckResult;
use thiserror::Error;

/// Session-level failures — a device doing something the state machine
/// doesn't allow (e.g. sending a location report before authenticating).
/// Always recoverable: the dispatcher answers with a result code and
/// keeps the connection open.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("device {0} sent {1:#06x} before authenticating")]
    NotAuthenticated(String, u16),
}

/// Maps a dispatch outcome onto the 0x8001 result code.
pub fn result_for_session_error(_err: &SessionError) -> AckResult {
    AckResult::WrongMessage
}
