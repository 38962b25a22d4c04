use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use threads_api::{
    webhook::{OrgEvent, SignatureHeaders, WebhookSecret},
    Db,
};

use crate::{extractors::PgPool, Error};

/// Raised when an organization gets created, so that the events the identity provider emits
/// right after it are not applied a second time
#[derive(Clone, Debug, Default)]
pub struct CreationEchoes(Arc<AtomicBool>);

impl CreationEchoes {
    pub fn arm(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true, and lowers the flag, if `evt` is an echo to skip
    pub fn skip(&self, evt: &OrgEvent) -> bool {
        evt.is_creation_echo()
            && self
                .0
                .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
    }

    pub fn is_armed(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct WebhookResponse {
    pub message: String,
}

fn respond(status: StatusCode, message: &str) -> (StatusCode, Json<WebhookResponse>) {
    (
        status,
        Json(WebhookResponse {
            message: String::from(message),
        }),
    )
}

/// Answers the events that need no database access, passing the others through
fn triage(echoes: &CreationEchoes, evt: OrgEvent) -> Result<(StatusCode, &'static str), OrgEvent> {
    if echoes.skip(&evt) {
        tracing::info!(event = evt.event_type(), "skipping organization creation echo");
        return Ok((StatusCode::OK, "Execution skipped."));
    }
    match evt {
        OrgEvent::InvitationCreated => Ok((StatusCode::CREATED, "Invitation created.")),
        OrgEvent::Unknown(t) => {
            tracing::info!(event = %t, "ignoring unknown identity webhook event");
            Ok((StatusCode::OK, "Event ignored."))
        }
        evt => Err(evt),
    }
}

pub async fn apply<D: Db>(
    db: &mut D,
    echoes: &CreationEchoes,
    evt: OrgEvent,
) -> Result<(StatusCode, &'static str), Error> {
    tracing::debug!(event = evt.event_type(), "applying identity webhook");
    Ok(match evt {
        OrgEvent::Created(org) => {
            echoes.arm();
            threads_api::create_community(db, org.into_new_community()?).await??;
            (StatusCode::CREATED, "Community created.")
        }
        OrgEvent::MembershipCreated(m) => {
            threads_api::add_member(db, &m.organization.id, &m.public_user_data.user_id)
                .await??;
            (StatusCode::CREATED, "Invitation accepted.")
        }
        OrgEvent::MembershipDeleted(m) => {
            threads_api::remove_member(db, &m.organization.id, &m.public_user_data.user_id)
                .await??;
            (StatusCode::OK, "Member removed.")
        }
        OrgEvent::Updated(org) => {
            let id = org.id.clone();
            threads_api::update_community(db, &id, org.into_update()).await??;
            (StatusCode::OK, "Community updated.")
        }
        OrgEvent::Deleted { id } => {
            threads_api::delete_community(db, &id).await??;
            (StatusCode::OK, "Community deleted.")
        }
        other => {
            return Err(Error::Anyhow(anyhow::anyhow!(
                "event {} has no database effect",
                other.event_type()
            )))
        }
    })
}

/// Handles a verified event, returning the status and message to answer with.
///
/// `with_db` is only called for events that touch the database, and is expected to hand them
/// to `apply` over a connection it acquires.
pub async fn dispatch<F, Fut>(
    echoes: &CreationEchoes,
    evt: OrgEvent,
    with_db: F,
) -> Result<(StatusCode, &'static str), Error>
where
    F: FnOnce(OrgEvent) -> Fut,
    Fut: Future<Output = Result<(StatusCode, &'static str), Error>>,
{
    match triage(echoes, evt) {
        Ok(res) => Ok(res),
        Err(evt) => with_db(evt).await,
    }
}

pub async fn identity_webhook(
    State(pool): State<PgPool>,
    State(secret): State<Arc<WebhookSecret>>,
    State(echoes): State<CreationEchoes>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<WebhookResponse>), Error> {
    let sig = SignatureHeaders::from_headers(&headers)?;
    serde_json::from_slice::<serde_json::Value>(&body)
        .map_err(|e| Error::invalid_webhook_payload(format!("payload is not json: {e}")))?;
    secret.verify(&sig, &body, chrono::Utc::now().timestamp())?;
    let evt = OrgEvent::parse(&body)?;
    let db_echoes = echoes.clone();
    let (status, msg) = dispatch(&echoes, evt, move |evt| async move {
        let mut conn = pool.acquire().await?;
        apply(&mut conn.db(), &db_echoes, evt).await
    })
    .await?;
    Ok(respond(status, msg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use threads_api::{
        webhook::{Membership, Organization, OrganizationRef, PublicUserData},
        Error as ApiError, ProfileUpdate,
    };
    use threads_mock_server::MockServer;

    fn org(id: &str, created_by: Option<&str>) -> Organization {
        Organization {
            id: String::from(id),
            name: String::from("Rustaceans"),
            slug: Some(String::from("rustaceans")),
            image_url: None,
            created_by: created_by.map(String::from),
        }
    }

    fn membership(org: &str, user: &str) -> Membership {
        Membership {
            organization: OrganizationRef {
                id: String::from(org),
            },
            public_user_data: PublicUserData {
                user_id: String::from(user),
            },
        }
    }

    async fn run(
        db: &mut MockServer,
        echoes: &CreationEchoes,
        evt: OrgEvent,
    ) -> Result<(StatusCode, &'static str), Error> {
        dispatch(echoes, evt, move |evt| async move { apply(db, echoes, evt).await }).await
    }

    async fn mock_with_user(external_id: &str) -> MockServer {
        let mut db = MockServer::new();
        threads_api::update_profile(
            &mut db,
            external_id,
            ProfileUpdate {
                username: String::from("alice"),
                name: String::from("Alice"),
                bio: String::new(),
                image: String::from("https://img.clerk.com/a.png"),
            },
        )
        .await
        .unwrap()
        .unwrap();
        db
    }

    #[tokio::test]
    async fn creation_echoes_are_skipped_once() {
        let mut db = mock_with_user("user_1").await;
        let echoes = CreationEchoes::default();
        let res = run(&mut db, &echoes, OrgEvent::Created(org("org_1", Some("user_1"))))
            .await
            .unwrap();
        assert_eq!(res, (StatusCode::CREATED, "Community created."));
        assert!(echoes.is_armed());

        let res = run(
            &mut db,
            &echoes,
            OrgEvent::MembershipCreated(membership("org_1", "user_1")),
        )
        .await
        .unwrap();
        assert_eq!(res, (StatusCode::OK, "Execution skipped."));
        assert!(!echoes.is_armed());
        assert!(db.test_community("org_1").unwrap().members.is_empty());

        let res = run(
            &mut db,
            &echoes,
            OrgEvent::MembershipCreated(membership("org_1", "user_1")),
        )
        .await
        .unwrap();
        assert_eq!(res, (StatusCode::CREATED, "Invitation accepted."));
        assert_eq!(db.test_community("org_1").unwrap().members.len(), 1);
    }

    #[tokio::test]
    async fn other_events_leave_the_flag_raised() {
        let mut db = mock_with_user("user_1").await;
        let echoes = CreationEchoes::default();
        run(&mut db, &echoes, OrgEvent::Created(org("org_1", Some("user_1"))))
            .await
            .unwrap();
        let res = run(&mut db, &echoes, OrgEvent::InvitationCreated)
            .await
            .unwrap();
        assert_eq!(res, (StatusCode::CREATED, "Invitation created."));
        let res = run(&mut db, &echoes, OrgEvent::Unknown(String::from("user.updated")))
            .await
            .unwrap();
        assert_eq!(res, (StatusCode::OK, "Event ignored."));
        assert!(echoes.is_armed());

        let res = run(&mut db, &echoes, OrgEvent::Updated(org("org_1", None)))
            .await
            .unwrap();
        assert_eq!(res, (StatusCode::OK, "Execution skipped."));
        let res = run(&mut db, &echoes, OrgEvent::Updated(org("org_1", None)))
            .await
            .unwrap();
        assert_eq!(res, (StatusCode::OK, "Community updated."));
    }

    #[tokio::test]
    async fn membership_removal_and_deletion() {
        let mut db = mock_with_user("user_1").await;
        let echoes = CreationEchoes::default();
        threads_api::create_community(&mut db, org("org_1", Some("user_1")).into_new_community().unwrap())
            .await
            .unwrap()
            .unwrap();
        threads_api::add_member(&mut db, "org_1", "user_1")
            .await
            .unwrap()
            .unwrap();
        let res = run(
            &mut db,
            &echoes,
            OrgEvent::MembershipDeleted(membership("org_1", "user_1")),
        )
        .await
        .unwrap();
        assert_eq!(res, (StatusCode::OK, "Member removed."));
        let res = run(
            &mut db,
            &echoes,
            OrgEvent::Deleted {
                id: String::from("org_1"),
            },
        )
        .await
        .unwrap();
        assert_eq!(res, (StatusCode::OK, "Community deleted."));
        assert!(db.test_community("org_1").is_none());
    }

    #[tokio::test]
    async fn triaged_events_never_reach_the_database() {
        let echoes = CreationEchoes::default();
        echoes.arm();
        for evt in [
            OrgEvent::InvitationCreated,
            OrgEvent::Unknown(String::from("session.created")),
            OrgEvent::Updated(org("org_1", None)),
        ] {
            let res = dispatch(&echoes, evt, |evt| async move {
                Err(Error::Anyhow(anyhow::anyhow!(
                    "{} reached the database",
                    evt.event_type()
                )))
            })
            .await;
            assert!(res.is_ok(), "{res:?}");
        }
        assert!(!echoes.is_armed());
    }

    #[tokio::test]
    async fn domain_failures_are_reported() {
        let mut db = MockServer::new();
        let echoes = CreationEchoes::default();
        let res = run(&mut db, &echoes, OrgEvent::Created(org("org_1", Some("user_x")))).await;
        assert!(matches!(
            res,
            Err(Error::Api(ApiError::NotFound { .. }))
        ));
        let res = run(&mut db, &echoes, OrgEvent::Created(org("org_1", None))).await;
        assert!(matches!(
            res,
            Err(Error::Api(ApiError::InvalidWebhookPayload(_)))
        ));
    }
}
