//! Room/session provisioning seam.
//!
//! Creating the actual call, chat or dispatch session is an external concern;
//! the orchestrator only needs an opaque room id back, and needs the call to
//! complete before it will burn a free credit.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::error::{AppError, AppErrorKind, ExternalError};

/// Kind of session to provision for a granted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomKind {
    Chat,
    Voice,
    Video,
    Dispatch,
}

impl RoomKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomKind::Chat => "chat",
            RoomKind::Voice => "voice",
            RoomKind::Video => "video",
            RoomKind::Dispatch => "dispatch",
        }
    }
}

#[derive(Debug, Error)]
pub enum RoomError {
    #[error("room provisioning failed: {0}")]
    Provisioning(String),
}

impl From<RoomError> for AppError {
    fn from(err: RoomError) -> Self {
        AppError::new(AppErrorKind::External(ExternalError::RoomProvisioning {
            message: err.to_string(),
        }))
    }
}

/// Creates a call/chat/dispatch room and returns its opaque id.
#[async_trait]
pub trait RoomProvisioner: Send + Sync {
    async fn create_room(
        &self,
        kind: RoomKind,
        caller_id: &str,
        recipient_id: &str,
    ) -> Result<String, RoomError>;
}

/// Jitsi-style provisioner: rooms are identified by a generated name that the
/// clients join by convention, so provisioning is local id generation.
pub struct JitsiRoomProvisioner;

#[async_trait]
impl RoomProvisioner for JitsiRoomProvisioner {
    async fn create_room(
        &self,
        kind: RoomKind,
        _caller_id: &str,
        _recipient_id: &str,
    ) -> Result<String, RoomError> {
        Ok(format!("{}-room-{}", kind.as_str(), Uuid::new_v4()))
    }
}
