use std::sync::Arc;

use anyhow::Context;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{self, request},
};
use threads_api::{webhook::WebhookSecret, Db, User};

use crate::{db::PostgresDb, session::SessionVerifier, webhook::CreationEchoes, Error};

#[derive(Clone, axum::extract::FromRef)]
pub struct AppState {
    pub db: PgPool,
    pub sessions: Arc<SessionVerifier>,
    pub webhook_secret: Arc<WebhookSecret>,
    pub echoes: CreationEchoes,
}

#[derive(Clone)]
pub struct PgPool(sqlx::PgPool);

impl PgPool {
    pub fn new(pool: sqlx::PgPool) -> PgPool {
        PgPool(pool)
    }

    pub async fn acquire(&self) -> Result<PgConn, Error> {
        Ok(PgConn(
            self.0.acquire().await.context("acquiring db connection")?,
        ))
    }
}

pub struct PgConn(sqlx::pool::PoolConnection<sqlx::Postgres>);

impl PgConn {
    pub fn db(&mut self) -> PostgresDb<'_> {
        PostgresDb { conn: &mut *self.0 }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for PgConn {
    type Rejection = Error;

    async fn from_request_parts(
        _req: &mut request::Parts,
        state: &AppState,
    ) -> Result<PgConn, Error> {
        state.db.acquire().await
    }
}

/// The raw bearer token, not verified yet
pub struct PreAuth(pub String);

#[async_trait]
impl<S: Sync> FromRequestParts<S> for PreAuth {
    type Rejection = Error;

    async fn from_request_parts(req: &mut request::Parts, _state: &S) -> Result<PreAuth, Error> {
        match req.headers.get(http::header::AUTHORIZATION) {
            None => Err(Error::permission_denied()),
            Some(auth) => {
                let auth = auth.to_str().map_err(|_| Error::permission_denied())?;
                let mut auth = auth.split(' ');
                if !auth
                    .next()
                    .ok_or(Error::permission_denied())?
                    .eq_ignore_ascii_case("bearer")
                {
                    return Err(Error::permission_denied());
                }
                let token = auth.next().ok_or(Error::permission_denied())?;
                if !auth.next().is_none() || token.is_empty() {
                    return Err(Error::permission_denied());
                }
                Ok(PreAuth(String::from(token)))
            }
        }
    }
}

/// External identity id of a verified session
pub struct Auth(pub String);

#[async_trait]
impl FromRequestParts<AppState> for Auth {
    type Rejection = Error;

    async fn from_request_parts(req: &mut request::Parts, state: &AppState) -> Result<Auth, Error> {
        let token = PreAuth::from_request_parts(req, state).await?.0;
        Ok(Auth(state.sessions.verify(&token)?.sub))
    }
}

/// A verified session whose user went through onboarding
pub struct Onboarded(pub User);

#[async_trait]
impl FromRequestParts<AppState> for Onboarded {
    type Rejection = Error;

    async fn from_request_parts(
        req: &mut request::Parts,
        state: &AppState,
    ) -> Result<Onboarded, Error> {
        let Auth(external_id) = Auth::from_request_parts(req, state).await?;
        let mut conn = PgConn::from_request_parts(req, state).await?;
        let user = conn
            .db()
            .fetch_user_by_external_id(&external_id)
            .await
            .with_context(|| format!("recovering user for session of {external_id:?}"))?;
        match user {
            Some(u) if u.onboarded => Ok(Onboarded(u)),
            _ => Err(Error::not_onboarded()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use threads_api::Error as ApiError;

    async fn preauth(header: Option<&str>) -> Result<String, Error> {
        let req = http::Request::builder().method(http::Method::GET).uri("/");
        let req = match header {
            Some(h) => req.header(http::header::AUTHORIZATION, h),
            None => req,
        };
        let mut req = req.body(()).unwrap().into_parts().0;
        PreAuth::from_request_parts(&mut req, &()).await.map(|p| p.0)
    }

    #[tokio::test]
    async fn bearer_tokens_are_extracted() {
        assert_eq!(preauth(Some("Bearer abc.def")).await.unwrap(), "abc.def");
        assert_eq!(preauth(Some("bearer abc.def")).await.unwrap(), "abc.def");
    }

    #[tokio::test]
    async fn malformed_headers_are_denied() {
        for h in [None, Some("Basic abc"), Some("Bearer"), Some("Bearer a b"), Some("")] {
            assert!(matches!(
                preauth(h).await,
                Err(Error::Api(ApiError::PermissionDenied))
            ));
        }
    }
}
