use std::fmt;

use anyhow::{anyhow, Context};
use serde_json::json;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ObjectKind {
    User,
    Thread,
    Community,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::User => "user",
            ObjectKind::Thread => "thread",
            ObjectKind::Community => "community",
        }
    }

    fn parse(s: &str) -> Option<ObjectKind> {
        match s {
            "user" => Some(ObjectKind::User),
            "thread" => Some(ObjectKind::Thread),
            "community" => Some(ObjectKind::Community),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Unknown error: {0}")]
    Unknown(String),

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Profile onboarding has not been completed")]
    NotOnboarded,

    #[error("No {kind} with id {id}")]
    NotFound { kind: ObjectKind, id: String },

    #[error("Name already used {0}")]
    NameAlreadyUsed(String),

    #[error("User {user} is already a member of community {community}")]
    AlreadyMember { community: String, user: String },

    #[error("Null byte in string is not allowed {0:?}")]
    NullByteInString(String),

    #[error("Invalid {field}: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("Missing webhook signature headers")]
    MissingWebhookHeaders,

    #[error("Invalid webhook signature")]
    InvalidWebhookSignature,

    #[error("Invalid webhook payload: {0}")]
    InvalidWebhookPayload(String),
}

impl Error {
    pub fn not_found(kind: ObjectKind, id: impl fmt::Display) -> Error {
        Error::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn invalid_field(field: &str, reason: impl Into<String>) -> Error {
        Error::InvalidField {
            field: String::from(field),
            reason: reason.into(),
        }
    }

    pub fn status_code(&self) -> http::StatusCode {
        use http::StatusCode;
        match self {
            Error::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::PermissionDenied => StatusCode::FORBIDDEN,
            Error::NotOnboarded => StatusCode::FORBIDDEN,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::NameAlreadyUsed(_) => StatusCode::CONFLICT,
            Error::AlreadyMember { .. } => StatusCode::CONFLICT,
            Error::NullByteInString(_) => StatusCode::BAD_REQUEST,
            Error::InvalidField { .. } => StatusCode::BAD_REQUEST,
            Error::MissingWebhookHeaders => StatusCode::BAD_REQUEST,
            Error::InvalidWebhookSignature => StatusCode::BAD_REQUEST,
            Error::InvalidWebhookPayload(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn contents(&self) -> Vec<u8> {
        serde_json::to_vec(&match self {
            Error::Unknown(msg) => json!({
                "message": msg,
                "type": "unknown",
            }),
            Error::PermissionDenied => json!({
                "message": "permission denied",
                "type": "permission-denied",
            }),
            Error::NotOnboarded => json!({
                "message": "profile onboarding has not been completed",
                "type": "not-onboarded",
            }),
            Error::NotFound { kind, id } => json!({
                "message": "not found",
                "type": "not-found",
                "kind": kind.as_str(),
                "id": id,
            }),
            Error::NameAlreadyUsed(n) => json!({
                "message": "name already used",
                "type": "conflict-name",
                "name": n,
            }),
            Error::AlreadyMember { community, user } => json!({
                "message": "user is already a member of the community",
                "type": "conflict-member",
                "community": community,
                "user": user,
            }),
            Error::NullByteInString(s) => json!({
                "message": "there was a null byte in argument string",
                "type": "null-byte",
                "string": s,
            }),
            Error::InvalidField { field, reason } => json!({
                "message": reason,
                "type": "invalid-field",
                "field": field,
            }),
            Error::MissingWebhookHeaders => json!({
                "message": "no svix headers",
                "type": "webhook-missing-headers",
            }),
            Error::InvalidWebhookSignature => json!({
                "message": "webhook signature verification failed",
                "type": "webhook-invalid-signature",
            }),
            Error::InvalidWebhookPayload(msg) => json!({
                "message": msg,
                "type": "webhook-invalid-payload",
            }),
        })
        .expect("serializing error contents")
    }

    pub fn parse(body: &[u8]) -> anyhow::Result<Error> {
        let data: serde_json::Value =
            serde_json::from_slice(body).context("parsing error contents")?;
        let field = |name: &str| -> anyhow::Result<String> {
            data.get(name)
                .and_then(|v| v.as_str())
                .map(String::from)
                .ok_or_else(|| anyhow!("error contents is missing string field {name:?}"))
        };
        Ok(
            match data
                .get("type")
                .and_then(|t| t.as_str())
                .ok_or_else(|| anyhow!("error type is not a string"))?
            {
                "unknown" => Error::Unknown(field("message").unwrap_or_default()),
                "permission-denied" => Error::PermissionDenied,
                "not-onboarded" => Error::NotOnboarded,
                "not-found" => Error::NotFound {
                    kind: ObjectKind::parse(&field("kind")?)
                        .ok_or_else(|| anyhow!("error is a not-found with an unknown kind"))?,
                    id: field("id")?,
                },
                "conflict-name" => Error::NameAlreadyUsed(field("name")?),
                "conflict-member" => Error::AlreadyMember {
                    community: field("community")?,
                    user: field("user")?,
                },
                "null-byte" => Error::NullByteInString(field("string")?),
                "invalid-field" => Error::InvalidField {
                    field: field("field")?,
                    reason: field("message")?,
                },
                "webhook-missing-headers" => Error::MissingWebhookHeaders,
                "webhook-invalid-signature" => Error::InvalidWebhookSignature,
                "webhook-invalid-payload" => Error::InvalidWebhookPayload(field("message")?),
                _ => return Err(anyhow!("error contents has unknown type")),
            },
        )
    }
}
