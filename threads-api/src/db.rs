use async_trait::async_trait;

use crate::{
    Community, CommunityId, CommunityQuery, CommunityUpdate, ProfileUpdate, Thread, ThreadId,
    User, UserId, UserQuery,
};

/// Primitive document operations over the users, threads and communities collections.
///
/// Every operation is a single write or read; the multi-write operations built on top of
/// this trait are not atomic. Absence is reported through `Option` or `bool`, errors are
/// reserved for infrastructure failures.
#[async_trait]
pub trait Db: Send {
    async fn fetch_user(&mut self, id: UserId) -> anyhow::Result<Option<User>>;
    async fn fetch_user_by_external_id(&mut self, external_id: &str)
        -> anyhow::Result<Option<User>>;
    async fn fetch_user_by_username(&mut self, username: &str) -> anyhow::Result<Option<User>>;
    /// Users are returned in no particular order, missing ids are skipped
    async fn fetch_users(&mut self, ids: &[UserId]) -> anyhow::Result<Vec<User>>;
    /// Inserts or updates the user keyed by `external_id`, marking it as onboarded
    async fn upsert_user(&mut self, external_id: &str, profile: &ProfileUpdate)
        -> anyhow::Result<User>;
    /// Returns the requested page and the total number of matches
    async fn search_users(&mut self, q: &UserQuery) -> anyhow::Result<(Vec<User>, u64)>;
    async fn push_user_thread(&mut self, user: UserId, thread: ThreadId) -> anyhow::Result<bool>;
    async fn push_user_community(
        &mut self,
        user: UserId,
        community: CommunityId,
    ) -> anyhow::Result<bool>;
    async fn pull_user_community(
        &mut self,
        user: UserId,
        community: CommunityId,
    ) -> anyhow::Result<bool>;
    /// Removes `thread` from the thread list of every user referencing it
    async fn pull_thread_from_users(&mut self, thread: ThreadId) -> anyhow::Result<()>;
    /// Removes `community` from the community list of every user referencing it
    async fn pull_community_from_users(&mut self, community: CommunityId) -> anyhow::Result<()>;

    async fn insert_thread(&mut self, thread: &Thread) -> anyhow::Result<()>;
    async fn fetch_thread(&mut self, id: ThreadId) -> anyhow::Result<Option<Thread>>;
    /// Threads are returned in no particular order, missing ids are skipped
    async fn fetch_threads(&mut self, ids: &[ThreadId]) -> anyhow::Result<Vec<Thread>>;
    async fn fetch_threads_by_author(&mut self, author: UserId) -> anyhow::Result<Vec<Thread>>;
    async fn fetch_threads_by_community(
        &mut self,
        community: CommunityId,
    ) -> anyhow::Result<Vec<Thread>>;
    /// Threads without a parent, newest first
    async fn fetch_top_level_threads(
        &mut self,
        skip: u64,
        limit: u64,
    ) -> anyhow::Result<(Vec<Thread>, u64)>;
    async fn push_thread_child(&mut self, parent: ThreadId, child: ThreadId)
        -> anyhow::Result<bool>;
    async fn delete_thread(&mut self, id: ThreadId) -> anyhow::Result<bool>;

    async fn insert_community(&mut self, community: &Community) -> anyhow::Result<()>;
    async fn fetch_community_by_external_id(
        &mut self,
        external_id: &str,
    ) -> anyhow::Result<Option<Community>>;
    /// Communities are returned in no particular order, missing ids are skipped
    async fn fetch_communities(&mut self, ids: &[CommunityId]) -> anyhow::Result<Vec<Community>>;
    async fn update_community(
        &mut self,
        external_id: &str,
        update: &CommunityUpdate,
    ) -> anyhow::Result<Option<Community>>;
    async fn search_communities(
        &mut self,
        q: &CommunityQuery,
    ) -> anyhow::Result<(Vec<Community>, u64)>;
    async fn push_community_member(
        &mut self,
        community: CommunityId,
        user: UserId,
    ) -> anyhow::Result<bool>;
    async fn pull_community_member(
        &mut self,
        community: CommunityId,
        user: UserId,
    ) -> anyhow::Result<bool>;
    async fn push_community_thread(
        &mut self,
        community: CommunityId,
        thread: ThreadId,
    ) -> anyhow::Result<bool>;
    async fn delete_community(&mut self, id: CommunityId) -> anyhow::Result<bool>;
}
