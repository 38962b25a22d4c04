//! Signed organization lifecycle events sent by the identity provider.
//!
//! Signatures follow the svix scheme: the signed content is `{id}.{timestamp}.{body}`, signed
//! with HMAC-SHA256 and sent base64-encoded as `v1,<signature>` entries.

use std::fmt;

use anyhow::Context;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::{CommunityUpdate, Error, NewCommunity};

pub const ID_HEADER: &str = "svix-id";
pub const TIMESTAMP_HEADER: &str = "svix-timestamp";
pub const SIGNATURE_HEADER: &str = "svix-signature";

/// Maximum distance between the signed timestamp and the time of verification
pub const TIMESTAMP_TOLERANCE_SECS: i64 = 5 * 60;

const SECRET_PREFIX: &str = "whsec_";
const SIGNATURE_VERSION: &str = "v1";

#[derive(Clone)]
pub struct WebhookSecret {
    mac: Hmac<Sha256>,
}

impl fmt::Debug for WebhookSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WebhookSecret(..)")
    }
}

impl WebhookSecret {
    /// Parses a base64 secret, with or without its `whsec_` prefix
    pub fn new(secret: &str) -> anyhow::Result<WebhookSecret> {
        let secret = secret.trim();
        let key = base64::decode(secret.strip_prefix(SECRET_PREFIX).unwrap_or(secret))
            .context("decoding webhook secret as base64")?;
        Ok(WebhookSecret {
            mac: Hmac::new_from_slice(&key)
                .map_err(|e| anyhow::anyhow!("building webhook hmac: {e}"))?,
        })
    }

    fn mac_for(&self, id: &str, timestamp: &str, body: &[u8]) -> Hmac<Sha256> {
        let mut mac = self.mac.clone();
        mac.update(id.as_bytes());
        mac.update(b".");
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(body);
        mac
    }

    /// Returns the value of the signature header for this message
    pub fn sign(&self, id: &str, timestamp: i64, body: &[u8]) -> String {
        let sig = self
            .mac_for(id, &timestamp.to_string(), body)
            .finalize()
            .into_bytes();
        format!("{SIGNATURE_VERSION},{}", base64::encode(sig))
    }

    /// Checks that any of the signatures matches, and that the message is recent enough
    pub fn verify(&self, headers: &SignatureHeaders, body: &[u8], now: i64) -> Result<(), Error> {
        let timestamp = headers
            .timestamp
            .trim()
            .parse::<i64>()
            .map_err(|_| Error::InvalidWebhookSignature)?;
        if now.abs_diff(timestamp) > TIMESTAMP_TOLERANCE_SECS.unsigned_abs() {
            tracing::debug!(timestamp, now, "webhook timestamp outside of tolerance");
            return Err(Error::InvalidWebhookSignature);
        }
        let mac = self.mac_for(&headers.id, headers.timestamp.trim(), body);
        let matches = headers
            .signature
            .split_whitespace()
            .filter_map(|entry| entry.split_once(','))
            .filter(|(version, _)| *version == SIGNATURE_VERSION)
            .filter_map(|(_, sig)| base64::decode(sig).ok())
            .any(|sig| mac.clone().verify_slice(&sig).is_ok());
        match matches {
            true => Ok(()),
            false => Err(Error::InvalidWebhookSignature),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SignatureHeaders {
    pub id: String,
    pub timestamp: String,
    pub signature: String,
}

impl SignatureHeaders {
    pub fn from_headers(headers: &http::HeaderMap) -> Result<SignatureHeaders, Error> {
        let get = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
                .map(String::from)
                .ok_or(Error::MissingWebhookHeaders)
        };
        Ok(SignatureHeaders {
            id: get(ID_HEADER)?,
            timestamp: get(TIMESTAMP_HEADER)?,
            signature: get(SIGNATURE_HEADER)?,
        })
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Organization {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,

    /// External id of the user who created the organization
    #[serde(default)]
    pub created_by: Option<String>,
}

impl Organization {
    fn slug_or_id(&self) -> String {
        self.slug.clone().unwrap_or_else(|| self.id.clone())
    }

    pub fn into_new_community(self) -> Result<NewCommunity, Error> {
        let slug = self.slug_or_id();
        let created_by = self.created_by.ok_or_else(|| {
            Error::InvalidWebhookPayload(String::from("organization has no creator"))
        })?;
        Ok(NewCommunity {
            external_id: self.id,
            name: self.name,
            slug,
            image: self.image_url,
            bio: String::new(),
            created_by,
        })
    }

    pub fn into_update(self) -> CommunityUpdate {
        CommunityUpdate {
            slug: self.slug_or_id(),
            name: self.name,
            image: self.image_url,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct OrganizationRef {
    pub id: String,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PublicUserData {
    pub user_id: String,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Membership {
    pub organization: OrganizationRef,
    pub public_user_data: PublicUserData,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum OrgEvent {
    Created(Organization),
    Updated(Organization),
    Deleted { id: String },
    MembershipCreated(Membership),
    MembershipDeleted(Membership),
    InvitationCreated,
    Unknown(String),
}

#[derive(serde::Deserialize)]
struct Envelope {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

fn data_as<T: serde::de::DeserializeOwned>(kind: &str, data: serde_json::Value) -> Result<T, Error> {
    serde_json::from_value(data)
        .map_err(|e| Error::InvalidWebhookPayload(format!("invalid {kind} data: {e}")))
}

impl OrgEvent {
    pub fn parse(body: &[u8]) -> Result<OrgEvent, Error> {
        let env: Envelope = serde_json::from_slice(body)
            .map_err(|e| Error::InvalidWebhookPayload(format!("payload is not an event: {e}")))?;
        let data = match env.data {
            Some(d) if !d.is_null() => d,
            _ => {
                return Err(Error::InvalidWebhookPayload(String::from(
                    "event data is missing",
                )))
            }
        };
        let kind = env.kind.as_str();
        Ok(match kind {
            "" => {
                return Err(Error::InvalidWebhookPayload(String::from(
                    "unknown event type",
                )))
            }
            "organization.created" => OrgEvent::Created(data_as(kind, data)?),
            "organization.updated" => OrgEvent::Updated(data_as(kind, data)?),
            "organization.deleted" => OrgEvent::Deleted {
                id: data_as::<OrganizationRef>(kind, data)?.id,
            },
            "organizationMembership.created" => OrgEvent::MembershipCreated(data_as(kind, data)?),
            "organizationMembership.deleted" => OrgEvent::MembershipDeleted(data_as(kind, data)?),
            "organizationInvitation.created" => OrgEvent::InvitationCreated,
            other => OrgEvent::Unknown(String::from(other)),
        })
    }

    pub fn event_type(&self) -> &str {
        match self {
            OrgEvent::Created(_) => "organization.created",
            OrgEvent::Updated(_) => "organization.updated",
            OrgEvent::Deleted { .. } => "organization.deleted",
            OrgEvent::MembershipCreated(_) => "organizationMembership.created",
            OrgEvent::MembershipDeleted(_) => "organizationMembership.deleted",
            OrgEvent::InvitationCreated => "organizationInvitation.created",
            OrgEvent::Unknown(t) => t,
        }
    }

    /// Whether this event is one of those the identity provider emits right after creating an
    /// organization
    pub fn is_creation_echo(&self) -> bool {
        matches!(self, OrgEvent::MembershipCreated(_) | OrgEvent::Updated(_))
    }
}
