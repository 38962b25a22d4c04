use std::collections::BTreeMap;

use async_trait::async_trait;
use threads_api::{
    matches_needle, Community, CommunityId, CommunityQuery, CommunityUpdate, Db, ProfileUpdate,
    Thread, ThreadId, User, UserId, UserQuery, Uuid,
};

/// In-memory `Db`, behaving like the Postgres backend
#[derive(Debug, Default)]
pub struct MockServer {
    users: BTreeMap<UserId, User>,
    threads: BTreeMap<ThreadId, Thread>,
    communities: BTreeMap<CommunityId, Community>,
}

fn page<T>(items: Vec<T>, skip: u64, limit: u64) -> (Vec<T>, u64) {
    let total = items.len() as u64;
    let items = items
        .into_iter()
        .skip(usize::try_from(skip).unwrap_or(usize::MAX))
        .take(usize::try_from(limit).unwrap_or(usize::MAX))
        .collect();
    (items, total)
}

fn pull<T: PartialEq>(list: &mut Vec<T>, item: &T) {
    list.retain(|i| i != item);
}

impl MockServer {
    pub fn new() -> MockServer {
        MockServer::default()
    }

    /// Return the current number of users
    pub fn test_num_users(&self) -> usize {
        self.users.len()
    }

    /// Return the current number of threads, comments included
    pub fn test_num_threads(&self) -> usize {
        self.threads.len()
    }

    pub fn test_num_communities(&self) -> usize {
        self.communities.len()
    }

    pub fn test_user(&self, external_id: &str) -> Option<&User> {
        self.users.values().find(|u| u.external_id == external_id)
    }

    pub fn test_thread(&self, id: ThreadId) -> Option<&Thread> {
        self.threads.get(&id)
    }

    pub fn test_community(&self, external_id: &str) -> Option<&Community> {
        self.communities
            .values()
            .find(|c| c.external_id == external_id)
    }

    /// Stores `thread` as-is, bypassing every paired write
    pub fn test_insert_raw_thread(&mut self, thread: Thread) {
        self.threads.insert(thread.id, thread);
    }
}

#[async_trait]
impl Db for MockServer {
    async fn fetch_user(&mut self, id: UserId) -> anyhow::Result<Option<User>> {
        Ok(self.users.get(&id).cloned())
    }

    async fn fetch_user_by_external_id(
        &mut self,
        external_id: &str,
    ) -> anyhow::Result<Option<User>> {
        Ok(self.test_user(external_id).cloned())
    }

    async fn fetch_user_by_username(&mut self, username: &str) -> anyhow::Result<Option<User>> {
        let username = username.to_lowercase();
        Ok(self
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn fetch_users(&mut self, ids: &[UserId]) -> anyhow::Result<Vec<User>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.users.get(id))
            .cloned()
            .collect())
    }

    async fn upsert_user(
        &mut self,
        external_id: &str,
        profile: &ProfileUpdate,
    ) -> anyhow::Result<User> {
        let username = profile.username.to_lowercase();
        if self
            .users
            .values()
            .any(|u| u.username == username && u.external_id != external_id)
        {
            anyhow::bail!("unique constraint violated on username {username:?}");
        }
        let existing = self
            .users
            .values_mut()
            .find(|u| u.external_id == external_id);
        let user = match existing {
            Some(u) => {
                u.username = username;
                u.name = profile.name.clone();
                u.bio = profile.bio.clone();
                u.image = profile.image.clone();
                u.onboarded = true;
                u.clone()
            }
            None => {
                let u = User {
                    id: UserId(Uuid::new_v4()),
                    external_id: String::from(external_id),
                    username,
                    name: profile.name.clone(),
                    bio: profile.bio.clone(),
                    image: profile.image.clone(),
                    threads: Vec::new(),
                    onboarded: true,
                    communities: Vec::new(),
                    joined_at: chrono::Utc::now(),
                };
                self.users.insert(u.id, u.clone());
                u
            }
        };
        Ok(user)
    }

    async fn search_users(&mut self, q: &UserQuery) -> anyhow::Result<(Vec<User>, u64)> {
        let mut res = self
            .users
            .values()
            .filter(|u| Some(&u.external_id) != q.exclude_external_id.as_ref())
            .filter(|u| matches_needle(&q.needle, &[u.username.as_str(), u.name.as_str()]))
            .cloned()
            .collect::<Vec<_>>();
        res.sort_by(|a, b| b.joined_at.cmp(&a.joined_at).then(a.id.cmp(&b.id)));
        Ok(page(res, q.skip, q.limit))
    }

    async fn push_user_thread(&mut self, user: UserId, thread: ThreadId) -> anyhow::Result<bool> {
        Ok(match self.users.get_mut(&user) {
            Some(u) => {
                u.threads.push(thread);
                true
            }
            None => false,
        })
    }

    async fn push_user_community(
        &mut self,
        user: UserId,
        community: CommunityId,
    ) -> anyhow::Result<bool> {
        Ok(match self.users.get_mut(&user) {
            Some(u) => {
                u.communities.push(community);
                true
            }
            None => false,
        })
    }

    async fn pull_user_community(
        &mut self,
        user: UserId,
        community: CommunityId,
    ) -> anyhow::Result<bool> {
        Ok(match self.users.get_mut(&user) {
            Some(u) => {
                pull(&mut u.communities, &community);
                true
            }
            None => false,
        })
    }

    async fn pull_thread_from_users(&mut self, thread: ThreadId) -> anyhow::Result<()> {
        for u in self.users.values_mut() {
            pull(&mut u.threads, &thread);
        }
        Ok(())
    }

    async fn pull_community_from_users(&mut self, community: CommunityId) -> anyhow::Result<()> {
        for u in self.users.values_mut() {
            pull(&mut u.communities, &community);
        }
        Ok(())
    }

    async fn insert_thread(&mut self, thread: &Thread) -> anyhow::Result<()> {
        if self.threads.contains_key(&thread.id) {
            anyhow::bail!("thread {:?} already exists", thread.id);
        }
        self.threads.insert(thread.id, thread.clone());
        Ok(())
    }

    async fn fetch_thread(&mut self, id: ThreadId) -> anyhow::Result<Option<Thread>> {
        Ok(self.threads.get(&id).cloned())
    }

    async fn fetch_threads(&mut self, ids: &[ThreadId]) -> anyhow::Result<Vec<Thread>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.threads.get(id))
            .cloned()
            .collect())
    }

    async fn fetch_threads_by_author(&mut self, author: UserId) -> anyhow::Result<Vec<Thread>> {
        Ok(self
            .threads
            .values()
            .filter(|t| t.author == author)
            .cloned()
            .collect())
    }

    async fn fetch_threads_by_community(
        &mut self,
        community: CommunityId,
    ) -> anyhow::Result<Vec<Thread>> {
        Ok(self
            .threads
            .values()
            .filter(|t| t.community == Some(community))
            .cloned()
            .collect())
    }

    async fn fetch_top_level_threads(
        &mut self,
        skip: u64,
        limit: u64,
    ) -> anyhow::Result<(Vec<Thread>, u64)> {
        let mut res = self
            .threads
            .values()
            .filter(|t| t.is_top_level())
            .cloned()
            .collect::<Vec<_>>();
        res.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(page(res, skip, limit))
    }

    async fn push_thread_child(
        &mut self,
        parent: ThreadId,
        child: ThreadId,
    ) -> anyhow::Result<bool> {
        Ok(match self.threads.get_mut(&parent) {
            Some(t) => {
                t.children.push(child);
                true
            }
            None => false,
        })
    }

    async fn delete_thread(&mut self, id: ThreadId) -> anyhow::Result<bool> {
        Ok(self.threads.remove(&id).is_some())
    }

    async fn insert_community(&mut self, community: &Community) -> anyhow::Result<()> {
        if self.communities.values().any(|c| {
            c.id == community.id
                || c.external_id == community.external_id
                || c.slug == community.slug
        }) {
            anyhow::bail!(
                "unique constraint violated inserting community {:?}",
                community.external_id
            );
        }
        self.communities.insert(community.id, community.clone());
        Ok(())
    }

    async fn fetch_community_by_external_id(
        &mut self,
        external_id: &str,
    ) -> anyhow::Result<Option<Community>> {
        Ok(self.test_community(external_id).cloned())
    }

    async fn fetch_communities(&mut self, ids: &[CommunityId]) -> anyhow::Result<Vec<Community>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.communities.get(id))
            .cloned()
            .collect())
    }

    async fn update_community(
        &mut self,
        external_id: &str,
        update: &CommunityUpdate,
    ) -> anyhow::Result<Option<Community>> {
        if self
            .communities
            .values()
            .any(|c| c.slug == update.slug && c.external_id != external_id)
        {
            anyhow::bail!("unique constraint violated on slug {:?}", update.slug);
        }
        Ok(self
            .communities
            .values_mut()
            .find(|c| c.external_id == external_id)
            .map(|c| {
                c.name = update.name.clone();
                c.slug = update.slug.clone();
                c.image = update.image.clone();
                c.clone()
            }))
    }

    async fn search_communities(
        &mut self,
        q: &CommunityQuery,
    ) -> anyhow::Result<(Vec<Community>, u64)> {
        let mut res = self
            .communities
            .values()
            .filter(|c| matches_needle(&q.needle, &[c.slug.as_str(), c.name.as_str()]))
            .cloned()
            .collect::<Vec<_>>();
        res.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(page(res, q.skip, q.limit))
    }

    async fn push_community_member(
        &mut self,
        community: CommunityId,
        user: UserId,
    ) -> anyhow::Result<bool> {
        Ok(match self.communities.get_mut(&community) {
            Some(c) => {
                c.members.push(user);
                true
            }
            None => false,
        })
    }

    async fn pull_community_member(
        &mut self,
        community: CommunityId,
        user: UserId,
    ) -> anyhow::Result<bool> {
        Ok(match self.communities.get_mut(&community) {
            Some(c) => {
                pull(&mut c.members, &user);
                true
            }
            None => false,
        })
    }

    async fn push_community_thread(
        &mut self,
        community: CommunityId,
        thread: ThreadId,
    ) -> anyhow::Result<bool> {
        Ok(match self.communities.get_mut(&community) {
            Some(c) => {
                c.threads.push(thread);
                true
            }
            None => false,
        })
    }

    async fn delete_community(&mut self, id: CommunityId) -> anyhow::Result<bool> {
        Ok(self.communities.remove(&id).is_some())
    }
}
