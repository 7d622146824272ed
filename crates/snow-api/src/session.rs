use snow_types::api::Claims;
use snow_types::models::Conversation;
use uuid::Uuid;

use crate::error::{Result, ServiceError};

/// Identity of the caller for the current request, built from a verified token
/// by `require_auth` and read by handlers through `Extension`.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub user_id: Uuid,
    pub username: String,
}

impl From<Claims> for SessionContext {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.sub,
            username: claims.username,
        }
    }
}

impl SessionContext {
    /// Conversations of other users are reported as missing rather than forbidden.
    pub fn check_owner(&self, conversation: &Conversation) -> Result<()> {
        if conversation.user_id == self.user_id {
            Ok(())
        } else {
            Err(ServiceError::NotFound {
                entity: "Conversation",
                id: conversation.id.to_string(),
            })
        }
    }
}
