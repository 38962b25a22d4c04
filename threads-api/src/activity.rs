use std::collections::HashMap;

use anyhow::Context;

use crate::{Db, Error, ObjectKind, ThreadId, Time, UserId, UserSummary};

/// A reply written by someone else to one of the user's threads or comments
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Activity {
    pub id: ThreadId,

    /// The thread that was replied to
    pub parent_id: ThreadId,
    pub text: String,
    pub created_at: Time,
    pub author: UserSummary,
}

/// Replies by others to anything `user` wrote, newest first
pub async fn fetch_activity<D: Db>(
    db: &mut D,
    user: UserId,
) -> anyhow::Result<Result<Vec<Activity>, Error>> {
    found!(
        db.fetch_user(user)
            .await
            .with_context(|| format!("fetching user {user:?}"))?,
        Error::not_found(ObjectKind::User, user.0)
    );
    let own = db
        .fetch_threads_by_author(user)
        .await
        .with_context(|| format!("fetching threads authored by {user:?}"))?;
    let child_ids = own
        .iter()
        .flat_map(|t| t.children.iter().copied())
        .collect::<Vec<_>>();
    if child_ids.is_empty() {
        return Ok(Ok(Vec::new()));
    }
    let mut replies = db
        .fetch_threads(&child_ids)
        .await
        .with_context(|| format!("fetching {} replies to {user:?}", child_ids.len()))?;
    replies.retain(|r| r.author != user);
    let mut author_ids = replies.iter().map(|r| r.author).collect::<Vec<_>>();
    author_ids.sort_unstable();
    author_ids.dedup();
    let authors = db
        .fetch_users(&author_ids)
        .await
        .with_context(|| format!("fetching authors of replies to {user:?}"))?
        .iter()
        .map(|u| (u.id, UserSummary::from(u)))
        .collect::<HashMap<_, _>>();
    let mut res = replies
        .into_iter()
        .filter_map(|r| {
            let parent_id = r.parent_id?;
            match authors.get(&r.author) {
                Some(author) => Some(Activity {
                    id: r.id,
                    parent_id,
                    text: r.text,
                    created_at: r.created_at,
                    author: author.clone(),
                }),
                None => {
                    tracing::warn!(reply = ?r.id, author = ?r.author, "skipping reply whose author is missing");
                    None
                }
            }
        })
        .collect::<Vec<_>>();
    res.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(Ok(res))
}
