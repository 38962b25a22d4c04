use anyhow::Context;

use crate::{
    load_trees, CommunityId, Db, Error, ObjectKind, PageRequest, Paginated, ThreadView, Time,
    User, UserId, Uuid, DETAIL_DEPTH, FEED_DEPTH, STUB_UUID,
};

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct ThreadId(pub Uuid);

impl ThreadId {
    pub fn stub() -> ThreadId {
        ThreadId(STUB_UUID)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Thread {
    pub id: ThreadId,
    pub text: String,
    pub author: UserId,
    pub community: Option<CommunityId>,
    pub created_at: Time,

    /// Set for replies, `None` for top-level posts
    pub parent_id: Option<ThreadId>,

    /// Replies, oldest first
    pub children: Vec<ThreadId>,
}

impl Thread {
    pub fn is_top_level(&self) -> bool {
        self.parent_id.is_none()
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct NewThread {
    pub text: String,

    /// External id of the community to post in, if any
    #[serde(default)]
    pub community_id: Option<String>,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct NewComment {
    pub text: String,
}

fn validate_text(text: &str) -> Result<(), Error> {
    crate::validate_string(text)?;
    if text.trim().is_empty() {
        return Err(Error::invalid_field("text", "must not be empty"));
    }
    Ok(())
}

/// Posts a top-level thread.
///
/// The thread is inserted first and then linked from its author (and community). Those are
/// separate writes, so a failure after the insert leaves an unlinked thread behind.
pub async fn create_thread<D: Db>(
    db: &mut D,
    author: &User,
    t: NewThread,
) -> anyhow::Result<Result<ThreadId, Error>> {
    check!(validate_text(&t.text));
    let community = match &t.community_id {
        None => None,
        Some(external_id) => Some(found!(
            db.fetch_community_by_external_id(external_id)
                .await
                .with_context(|| format!("fetching community {external_id:?}"))?,
            Error::not_found(ObjectKind::Community, external_id)
        )),
    };
    let thread = Thread {
        id: ThreadId(Uuid::new_v4()),
        text: t.text,
        author: author.id,
        community: community.as_ref().map(|c| c.id),
        created_at: chrono::Utc::now(),
        parent_id: None,
        children: Vec::new(),
    };
    db.insert_thread(&thread)
        .await
        .with_context(|| format!("inserting thread {:?}", thread.id))?;
    db.push_user_thread(author.id, thread.id)
        .await
        .with_context(|| format!("linking thread {:?} to author {:?}", thread.id, author.id))?;
    if let Some(c) = community {
        db.push_community_thread(c.id, thread.id)
            .await
            .with_context(|| format!("linking thread {:?} to community {:?}", thread.id, c.id))?;
    }
    tracing::debug!(thread = ?thread.id, author = ?author.id, "thread created");
    Ok(Ok(thread.id))
}

/// Replies to `parent`, which may itself be a reply
pub async fn add_comment<D: Db>(
    db: &mut D,
    author: &User,
    parent: ThreadId,
    c: NewComment,
) -> anyhow::Result<Result<ThreadId, Error>> {
    check!(validate_text(&c.text));
    let parent = found!(
        db.fetch_thread(parent)
            .await
            .with_context(|| format!("fetching parent thread {parent:?}"))?,
        Error::not_found(ObjectKind::Thread, parent.0)
    );
    let comment = Thread {
        id: ThreadId(Uuid::new_v4()),
        text: c.text,
        author: author.id,
        community: parent.community,
        created_at: chrono::Utc::now(),
        parent_id: Some(parent.id),
        children: Vec::new(),
    };
    db.insert_thread(&comment)
        .await
        .with_context(|| format!("inserting comment {:?}", comment.id))?;
    db.push_thread_child(parent.id, comment.id)
        .await
        .with_context(|| format!("linking comment {:?} to {:?}", comment.id, parent.id))?;
    tracing::debug!(comment = ?comment.id, parent = ?parent.id, "comment added");
    Ok(Ok(comment.id))
}

/// Top-level threads, newest first
pub async fn fetch_feed<D: Db>(
    db: &mut D,
    paging: PageRequest,
) -> anyhow::Result<Result<Paginated<ThreadView>, Error>> {
    let (threads, total) = db
        .fetch_top_level_threads(paging.skip(), paging.page_size())
        .await
        .with_context(|| format!("fetching top-level threads for {paging:?}"))?;
    Ok(Ok(Paginated {
        items: load_trees(db, threads, FEED_DEPTH).await?,
        is_next: paging.is_next(total),
    }))
}

pub async fn fetch_thread_tree<D: Db>(
    db: &mut D,
    id: ThreadId,
) -> anyhow::Result<Result<ThreadView, Error>> {
    let thread = found!(
        db.fetch_thread(id)
            .await
            .with_context(|| format!("fetching thread {id:?}"))?,
        Error::not_found(ObjectKind::Thread, id.0)
    );
    let tree = found!(
        load_trees(db, vec![thread], DETAIL_DEPTH)
            .await?
            .pop(),
        Error::not_found(ObjectKind::Thread, id.0)
    );
    Ok(Ok(tree))
}

/// Threads listed on a user's profile, in the order they were posted
pub async fn fetch_user_threads<D: Db>(
    db: &mut D,
    external_id: &str,
) -> anyhow::Result<Result<Vec<ThreadView>, Error>> {
    let user = found!(
        db.fetch_user_by_external_id(external_id)
            .await
            .with_context(|| format!("fetching user {external_id:?}"))?,
        Error::not_found(ObjectKind::User, external_id)
    );
    let threads = fetch_in_order(db, &user.threads).await?;
    Ok(Ok(load_trees(db, threads, FEED_DEPTH).await?))
}

pub async fn fetch_community_threads<D: Db>(
    db: &mut D,
    external_id: &str,
) -> anyhow::Result<Result<Vec<ThreadView>, Error>> {
    let community = found!(
        db.fetch_community_by_external_id(external_id)
            .await
            .with_context(|| format!("fetching community {external_id:?}"))?,
        Error::not_found(ObjectKind::Community, external_id)
    );
    let threads = fetch_in_order(db, &community.threads).await?;
    Ok(Ok(load_trees(db, threads, FEED_DEPTH).await?))
}

async fn fetch_in_order<D: Db>(db: &mut D, ids: &[ThreadId]) -> anyhow::Result<Vec<Thread>> {
    let mut threads = db
        .fetch_threads(ids)
        .await
        .with_context(|| format!("fetching {} threads", ids.len()))?;
    threads.sort_by_key(|t| ids.iter().position(|id| *id == t.id));
    Ok(threads)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_text_is_rejected() {
        assert!(validate_text("hello").is_ok());
        assert!(matches!(
            validate_text("  \n "),
            Err(Error::InvalidField { .. })
        ));
        assert!(matches!(
            validate_text("a\0b"),
            Err(Error::NullByteInString(_))
        ));
    }

    #[test]
    fn community_defaults_to_none() {
        let t: NewThread = serde_json::from_str(r#"{"text": "hi"}"#).unwrap();
        assert_eq!(t.community_id, None);
    }
}
