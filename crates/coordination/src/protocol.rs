//! Out-of-band messages carried over the stateless channel
//!
//! These are JSON-encoded strings, not document updates. Server to client:
//!
//! ```json
//! {"type":"error","code":"MAX_USERS_EXCEEDED","message":"..."}
//! {"type":"info","code":"CAN_EDIT","message":"..."}
//! {"type":"userColor","userId":"alice","color":"#7986CB"}
//! ```
//!
//! Client to server:
//!
//! ```json
//! {"type":"requestUserColor","userId":"alice"}
//! ```

use serde::{Deserialize, Serialize};

pub const CODE_MAX_USERS_EXCEEDED: &str = "MAX_USERS_EXCEEDED";
pub const CODE_CAN_EDIT: &str = "CAN_EDIT";

/// Server-to-client notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Notice {
    #[serde(rename = "error")]
    Error { code: String, message: String },

    #[serde(rename = "info")]
    Info { code: String, message: String },

    #[serde(rename = "userColor")]
    UserColor {
        #[serde(rename = "userId")]
        user_id: String,
        color: String,
    },
}

impl Notice {
    pub fn max_users_exceeded(max_editors: usize) -> Self {
        Notice::Error {
            code: CODE_MAX_USERS_EXCEEDED.to_string(),
            message: format!(
                "The document already has {} active editors, so this connection is read-only.",
                max_editors
            ),
        }
    }

    pub fn can_edit() -> Self {
        Notice::Info {
            code: CODE_CAN_EDIT.to_string(),
            message: "An editor slot is available. You can edit the document.".to_string(),
        }
    }

    pub fn user_color(user_id: &str, color: &str) -> Self {
        Notice::UserColor {
            user_id: user_id.to_string(),
            color: color.to_string(),
        }
    }
}

/// Client-to-server request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StatelessRequest {
    #[serde(rename = "requestUserColor")]
    RequestUserColor {
        #[serde(rename = "userId")]
        user_id: String,
    },
}
