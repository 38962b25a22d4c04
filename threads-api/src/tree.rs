use std::collections::{HashMap, HashSet};

use anyhow::Context;

use crate::{
    Community, CommunityId, CommunitySummary, Db, Thread, ThreadId, Time, User, UserId,
    UserSummary,
};

/// Levels of replies expanded on feed cards, profile tabs and community tabs
pub const FEED_DEPTH: usize = 1;

/// Levels of replies expanded on a thread's own page
pub const DETAIL_DEPTH: usize = 2;

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ThreadView {
    pub id: ThreadId,
    pub text: String,
    pub author: UserSummary,
    pub community: Option<CommunitySummary>,
    pub created_at: Time,
    pub parent_id: Option<ThreadId>,

    /// Number of stored replies, including the ones that were not expanded
    pub child_count: usize,
    pub children: Vec<ThreadView>,
}

impl ThreadView {
    pub fn is_comment(&self) -> bool {
        self.parent_id.is_some()
    }

    pub fn reply_count(&self) -> usize {
        self.children.len()
    }

    pub fn descendant_count(&self) -> usize {
        self.children
            .iter()
            .map(|c| 1 + c.descendant_count())
            .sum()
    }

    /// Authors of the direct replies, each listed once, in order of their first reply
    pub fn reply_authors(&self) -> Vec<&UserSummary> {
        let mut seen = HashSet::new();
        self.children
            .iter()
            .map(|c| &c.author)
            .filter(|a| seen.insert(a.id))
            .collect()
    }
}

/// Threads, authors and communities loaded so far, from which views get assembled
#[derive(Clone, Debug, Default)]
pub struct Forest {
    threads: HashMap<ThreadId, Thread>,
    users: HashMap<UserId, UserSummary>,
    communities: HashMap<CommunityId, CommunitySummary>,
}

impl Forest {
    pub fn new() -> Forest {
        Forest::default()
    }

    pub fn contains(&self, id: &ThreadId) -> bool {
        self.threads.contains_key(id)
    }

    pub fn add_threads(&mut self, threads: impl IntoIterator<Item = Thread>) {
        self.threads
            .extend(threads.into_iter().map(|t| (t.id, t)));
    }

    pub fn add_users<'a>(&mut self, users: impl IntoIterator<Item = &'a User>) {
        self.users
            .extend(users.into_iter().map(|u| (u.id, UserSummary::from(u))));
    }

    pub fn add_communities<'a>(&mut self, communities: impl IntoIterator<Item = &'a Community>) {
        self.communities.extend(
            communities
                .into_iter()
                .map(|c| (c.id, CommunitySummary::from(c))),
        );
    }

    /// Author and community ids referenced by the loaded threads that are not loaded yet
    fn missing_refs(&self) -> (Vec<UserId>, Vec<CommunityId>) {
        let mut users = HashSet::new();
        let mut communities = HashSet::new();
        for t in self.threads.values() {
            if !self.users.contains_key(&t.author) {
                users.insert(t.author);
            }
            if let Some(c) = t.community {
                if !self.communities.contains_key(&c) {
                    communities.insert(c);
                }
            }
        }
        (users.into_iter().collect(), communities.into_iter().collect())
    }

    /// Renders `id` with `depth` levels of replies expanded.
    ///
    /// Returns `None` if the thread or its author is not loaded. Children in the same situation
    /// are left out of the view.
    pub fn view(&self, id: ThreadId, depth: usize) -> Option<ThreadView> {
        let thread = match self.threads.get(&id) {
            Some(t) => t,
            None => {
                tracing::warn!(thread = ?id, "skipping dangling thread reference");
                return None;
            }
        };
        let author = match self.users.get(&thread.author) {
            Some(a) => a.clone(),
            None => {
                tracing::warn!(thread = ?id, author = ?thread.author, "skipping thread whose author is missing");
                return None;
            }
        };
        let community = thread.community.and_then(|c| {
            let res = self.communities.get(&c).cloned();
            if res.is_none() {
                tracing::warn!(thread = ?id, community = ?c, "thread references a missing community");
            }
            res
        });
        let children = match depth {
            0 => Vec::new(),
            _ => thread
                .children
                .iter()
                .filter_map(|c| self.view(*c, depth - 1))
                .collect(),
        };
        Some(ThreadView {
            id,
            text: thread.text.clone(),
            author,
            community,
            created_at: thread.created_at,
            parent_id: thread.parent_id,
            child_count: thread.children.len(),
            children,
        })
    }
}

/// Loads the replies of `roots` down to `depth` levels, then renders each root.
///
/// Issues one thread query per level, plus one for all authors and one for all communities.
pub async fn load_trees<D: Db>(
    db: &mut D,
    roots: Vec<Thread>,
    depth: usize,
) -> anyhow::Result<Vec<ThreadView>> {
    let root_ids = roots.iter().map(|t| t.id).collect::<Vec<_>>();
    let mut frontier = roots
        .iter()
        .flat_map(|t| t.children.iter().copied())
        .collect::<Vec<_>>();
    let mut forest = Forest::new();
    forest.add_threads(roots);
    for level in 0..depth {
        frontier.retain(|id| !forest.contains(id));
        frontier.sort_unstable();
        frontier.dedup();
        if frontier.is_empty() {
            break;
        }
        let threads = db
            .fetch_threads(&frontier)
            .await
            .with_context(|| format!("fetching {} replies at level {level}", frontier.len()))?;
        frontier = threads
            .iter()
            .flat_map(|t| t.children.iter().copied())
            .collect();
        forest.add_threads(threads);
    }
    let (user_ids, community_ids) = forest.missing_refs();
    let users = db
        .fetch_users(&user_ids)
        .await
        .with_context(|| format!("fetching {} thread authors", user_ids.len()))?;
    forest.add_users(&users);
    if !community_ids.is_empty() {
        let communities = db
            .fetch_communities(&community_ids)
            .await
            .with_context(|| format!("fetching {} communities", community_ids.len()))?;
        forest.add_communities(&communities);
    }
    Ok(root_ids
        .into_iter()
        .filter_map(|id| forest.view(id, depth))
        .collect())
}
