use axum::{
    extract::{Path, Query},
    http::StatusCode,
    Json,
};
use threads_api::{
    Activity, CommunityDetails, CommunityListing, NewComment, NewThread, PageRequest, Paginated,
    ProfileUpdate, SearchRequest, ThreadId, ThreadView, User, UserProfile, UserSummary, Uuid,
};

use crate::{extractors::*, Error};

pub async fn whoami(Auth(user): Auth) -> Json<String> {
    Json(user)
}

pub async fn fetch_me(
    Auth(user): Auth,
    mut conn: PgConn,
) -> Result<Json<UserProfile>, Error> {
    Ok(Json(threads_api::fetch_profile(&mut conn.db(), &user).await??))
}

pub async fn update_me(
    Auth(user): Auth,
    mut conn: PgConn,
    Json(profile): Json<ProfileUpdate>,
) -> Result<Json<User>, Error> {
    Ok(Json(
        threads_api::update_profile(&mut conn.db(), &user, profile).await??,
    ))
}

pub async fn search_users(
    Onboarded(user): Onboarded,
    mut conn: PgConn,
    Query(search): Query<SearchRequest>,
) -> Result<Json<Paginated<UserSummary>>, Error> {
    Ok(Json(
        threads_api::search_users(&mut conn.db(), &user.external_id, &search).await??,
    ))
}

pub async fn fetch_user(
    _: Onboarded,
    mut conn: PgConn,
    Path(external_id): Path<String>,
) -> Result<Json<UserProfile>, Error> {
    Ok(Json(
        threads_api::fetch_profile(&mut conn.db(), &external_id).await??,
    ))
}

pub async fn fetch_user_threads(
    _: Onboarded,
    mut conn: PgConn,
    Path(external_id): Path<String>,
) -> Result<Json<Vec<ThreadView>>, Error> {
    Ok(Json(
        threads_api::fetch_user_threads(&mut conn.db(), &external_id).await??,
    ))
}

pub async fn fetch_activity(
    Onboarded(user): Onboarded,
    mut conn: PgConn,
) -> Result<Json<Vec<Activity>>, Error> {
    Ok(Json(
        threads_api::fetch_activity(&mut conn.db(), user.id).await??,
    ))
}

pub async fn fetch_feed(
    _: Onboarded,
    mut conn: PgConn,
    Query(paging): Query<PageRequest>,
) -> Result<Json<Paginated<ThreadView>>, Error> {
    Ok(Json(threads_api::fetch_feed(&mut conn.db(), paging).await??))
}

pub async fn create_thread(
    Onboarded(user): Onboarded,
    mut conn: PgConn,
    Json(t): Json<NewThread>,
) -> Result<(StatusCode, Json<ThreadId>), Error> {
    let id = threads_api::create_thread(&mut conn.db(), &user, t).await??;
    Ok((StatusCode::CREATED, Json(id)))
}

pub async fn fetch_thread(
    _: Onboarded,
    mut conn: PgConn,
    Path(id): Path<Uuid>,
) -> Result<Json<ThreadView>, Error> {
    Ok(Json(
        threads_api::fetch_thread_tree(&mut conn.db(), ThreadId(id)).await??,
    ))
}

pub async fn add_comment(
    Onboarded(user): Onboarded,
    mut conn: PgConn,
    Path(parent): Path<Uuid>,
    Json(c): Json<NewComment>,
) -> Result<(StatusCode, Json<ThreadId>), Error> {
    let id = threads_api::add_comment(&mut conn.db(), &user, ThreadId(parent), c).await??;
    Ok((StatusCode::CREATED, Json(id)))
}

pub async fn search_communities(
    _: Onboarded,
    mut conn: PgConn,
    Query(search): Query<SearchRequest>,
) -> Result<Json<Paginated<CommunityListing>>, Error> {
    Ok(Json(
        threads_api::search_communities(&mut conn.db(), &search).await??,
    ))
}

pub async fn fetch_community(
    _: Onboarded,
    mut conn: PgConn,
    Path(external_id): Path<String>,
) -> Result<Json<CommunityDetails>, Error> {
    Ok(Json(
        threads_api::fetch_community_details(&mut conn.db(), &external_id).await??,
    ))
}

pub async fn fetch_community_threads(
    _: Onboarded,
    mut conn: PgConn,
    Path(external_id): Path<String>,
) -> Result<Json<Vec<ThreadView>>, Error> {
    Ok(Json(
        threads_api::fetch_community_threads(&mut conn.db(), &external_id).await??,
    ))
}
