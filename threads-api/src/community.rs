use anyhow::Context;

use crate::{
    CommunityQuery, Db, Error, ObjectKind, Paginated, SearchRequest, ThreadId, Time, UserId,
    UserSummary, Uuid,
};

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct CommunityId(pub Uuid);

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Community {
    pub id: CommunityId,

    /// Id of the backing organization at the identity provider
    pub external_id: String,
    pub slug: String,
    pub name: String,
    pub bio: String,
    pub image: Option<String>,
    pub created_by: Option<UserId>,
    pub members: Vec<UserId>,
    pub threads: Vec<ThreadId>,
    pub created_at: Time,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CommunitySummary {
    pub id: CommunityId,
    pub external_id: String,
    pub slug: String,
    pub name: String,
    pub image: Option<String>,
}

impl From<&Community> for CommunitySummary {
    fn from(c: &Community) -> CommunitySummary {
        CommunitySummary {
            id: c.id,
            external_id: c.external_id.clone(),
            slug: c.slug.clone(),
            name: c.name.clone(),
            image: c.image.clone(),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct NewCommunity {
    pub external_id: String,
    pub name: String,
    pub slug: String,
    pub image: Option<String>,
    pub bio: String,

    /// External id of the creating user
    pub created_by: String,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CommunityUpdate {
    pub name: String,
    pub slug: String,
    pub image: Option<String>,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CommunityDetails {
    pub community: Community,
    pub created_by: Option<UserSummary>,
    pub members: Vec<UserSummary>,
}

/// A search result: the community along with who is in it
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CommunityListing {
    pub community: CommunitySummary,
    pub bio: String,
    pub members: Vec<UserSummary>,
}

async fn member_summaries<D: Db>(
    db: &mut D,
    ids: &[UserId],
) -> anyhow::Result<Vec<UserSummary>> {
    let mut users = db
        .fetch_users(ids)
        .await
        .with_context(|| format!("fetching {} members", ids.len()))?;
    users.sort_by_key(|u| ids.iter().position(|id| *id == u.id));
    Ok(users.iter().map(UserSummary::from).collect())
}

pub async fn create_community<D: Db>(
    db: &mut D,
    c: NewCommunity,
) -> anyhow::Result<Result<Community, Error>> {
    for s in [&c.external_id, &c.name, &c.slug, &c.bio, &c.created_by] {
        check!(crate::validate_string(s));
    }
    let creator = found!(
        db.fetch_user_by_external_id(&c.created_by)
            .await
            .with_context(|| format!("fetching community creator {:?}", c.created_by))?,
        Error::not_found(ObjectKind::User, &c.created_by)
    );
    let community = Community {
        id: CommunityId(Uuid::new_v4()),
        external_id: c.external_id,
        slug: c.slug,
        name: c.name,
        bio: c.bio,
        image: c.image,
        created_by: Some(creator.id),
        members: Vec::new(),
        threads: Vec::new(),
        created_at: chrono::Utc::now(),
    };
    db.insert_community(&community)
        .await
        .with_context(|| format!("inserting community {:?}", community.external_id))?;
    db.push_user_community(creator.id, community.id)
        .await
        .with_context(|| {
            format!(
                "linking community {:?} to its creator {:?}",
                community.id, creator.id
            )
        })?;
    tracing::info!(community = ?community.id, external_id = %community.external_id, "community created");
    Ok(Ok(community))
}

pub async fn fetch_community_details<D: Db>(
    db: &mut D,
    external_id: &str,
) -> anyhow::Result<Result<CommunityDetails, Error>> {
    let community = found!(
        db.fetch_community_by_external_id(external_id)
            .await
            .with_context(|| format!("fetching community {external_id:?}"))?,
        Error::not_found(ObjectKind::Community, external_id)
    );
    let created_by = match community.created_by {
        None => None,
        Some(id) => db
            .fetch_user(id)
            .await
            .with_context(|| format!("fetching creator of community {external_id:?}"))?
            .as_ref()
            .map(UserSummary::from),
    };
    let members = member_summaries(db, &community.members).await?;
    Ok(Ok(CommunityDetails {
        community,
        created_by,
        members,
    }))
}

pub async fn search_communities<D: Db>(
    db: &mut D,
    search: &SearchRequest,
) -> anyhow::Result<Result<Paginated<CommunityListing>, Error>> {
    check!(crate::validate_string(&search.q));
    let paging = search.paging();
    let (communities, total) = db
        .search_communities(&CommunityQuery {
            needle: search.needle(),
            skip: paging.skip(),
            limit: paging.page_size(),
        })
        .await
        .with_context(|| format!("searching communities for {:?}", search.q))?;
    let mut items = Vec::with_capacity(communities.len());
    for c in communities {
        items.push(CommunityListing {
            community: CommunitySummary::from(&c),
            members: member_summaries(db, &c.members).await?,
            bio: c.bio,
        });
    }
    Ok(Ok(Paginated {
        items,
        is_next: paging.is_next(total),
    }))
}

pub async fn add_member<D: Db>(
    db: &mut D,
    community_id: &str,
    user_id: &str,
) -> anyhow::Result<Result<Community, Error>> {
    let mut community = found!(
        db.fetch_community_by_external_id(community_id)
            .await
            .with_context(|| format!("fetching community {community_id:?}"))?,
        Error::not_found(ObjectKind::Community, community_id)
    );
    let user = found!(
        db.fetch_user_by_external_id(user_id)
            .await
            .with_context(|| format!("fetching user {user_id:?}"))?,
        Error::not_found(ObjectKind::User, user_id)
    );
    if community.members.contains(&user.id) {
        return Ok(Err(Error::AlreadyMember {
            community: String::from(community_id),
            user: String::from(user_id),
        }));
    }
    db.push_community_member(community.id, user.id)
        .await
        .with_context(|| format!("adding {user_id:?} to members of {community_id:?}"))?;
    db.push_user_community(user.id, community.id)
        .await
        .with_context(|| format!("adding {community_id:?} to communities of {user_id:?}"))?;
    community.members.push(user.id);
    Ok(Ok(community))
}

pub async fn remove_member<D: Db>(
    db: &mut D,
    community_id: &str,
    user_id: &str,
) -> anyhow::Result<Result<(), Error>> {
    let user = found!(
        db.fetch_user_by_external_id(user_id)
            .await
            .with_context(|| format!("fetching user {user_id:?}"))?,
        Error::not_found(ObjectKind::User, user_id)
    );
    let community = found!(
        db.fetch_community_by_external_id(community_id)
            .await
            .with_context(|| format!("fetching community {community_id:?}"))?,
        Error::not_found(ObjectKind::Community, community_id)
    );
    db.pull_community_member(community.id, user.id)
        .await
        .with_context(|| format!("removing {user_id:?} from members of {community_id:?}"))?;
    db.pull_user_community(user.id, community.id)
        .await
        .with_context(|| {
            format!("removing {community_id:?} from communities of {user_id:?}")
        })?;
    Ok(Ok(()))
}

pub async fn update_community<D: Db>(
    db: &mut D,
    external_id: &str,
    update: CommunityUpdate,
) -> anyhow::Result<Result<Community, Error>> {
    check!(crate::validate_string(&update.name));
    check!(crate::validate_string(&update.slug));
    Ok(Ok(found!(
        db.update_community(external_id, &update)
            .await
            .with_context(|| format!("updating community {external_id:?}"))?,
        Error::not_found(ObjectKind::Community, external_id)
    )))
}

/// Deletes the community along with every thread posted in it.
///
/// Each step is a separate write and nothing is rolled back: a failure halfway leaves the
/// threads deleted so far gone, and the rest in place.
pub async fn delete_community<D: Db>(
    db: &mut D,
    external_id: &str,
) -> anyhow::Result<Result<(), Error>> {
    let community = found!(
        db.fetch_community_by_external_id(external_id)
            .await
            .with_context(|| format!("fetching community {external_id:?}"))?,
        Error::not_found(ObjectKind::Community, external_id)
    );
    let threads = db
        .fetch_threads_by_community(community.id)
        .await
        .with_context(|| format!("listing threads of community {external_id:?}"))?;
    for t in &threads {
        db.pull_thread_from_users(t.id)
            .await
            .with_context(|| format!("unlinking thread {:?} from its users", t.id))?;
        db.delete_thread(t.id)
            .await
            .with_context(|| format!("deleting thread {:?}", t.id))?;
    }
    db.pull_community_from_users(community.id)
        .await
        .with_context(|| format!("unlinking community {external_id:?} from its users"))?;
    db.delete_community(community.id)
        .await
        .with_context(|| format!("deleting community {external_id:?}"))?;
    tracing::info!(
        community = ?community.id,
        %external_id,
        num_threads = threads.len(),
        "community deleted"
    );
    Ok(Ok(()))
}
