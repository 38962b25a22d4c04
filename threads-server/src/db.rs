use anyhow::Context;
use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::{postgres::PgRow, Row};
use threads_api::{
    Community, CommunityId, CommunityQuery, CommunityUpdate, Db, ProfileUpdate, Thread, ThreadId,
    User, UserId, UserQuery, Uuid,
};

pub struct PostgresDb<'a> {
    pub conn: &'a mut sqlx::PgConnection,
}

/// ILIKE pattern matching `needle` anywhere, with its wildcards escaped
fn like_pattern(needle: &str) -> String {
    let mut res = String::with_capacity(needle.len() + 2);
    res.push('%');
    for c in needle.chars() {
        if matches!(c, '\\' | '%' | '_') {
            res.push('\\');
        }
        res.push(c);
    }
    res.push('%');
    res
}

fn to_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn raw_ids<T: Copy>(ids: &[T], unwrap: impl Fn(T) -> Uuid) -> Vec<Uuid> {
    ids.iter().map(|id| unwrap(*id)).collect()
}

fn id_list<T>(row: &PgRow, field: &str, wrap: impl Fn(Uuid) -> T) -> anyhow::Result<Vec<T>> {
    Ok(row
        .try_get::<Vec<Uuid>, _>(field)
        .with_context(|| format!("retrieving the {field} field"))?
        .into_iter()
        .map(wrap)
        .collect())
}

fn count_from_row(row: &PgRow) -> anyhow::Result<u64> {
    let count: i64 = row.try_get("count").context("retrieving the count field")?;
    u64::try_from(count).context("converting count to u64")
}

fn user_from_row(row: &PgRow) -> anyhow::Result<User> {
    Ok(User {
        id: UserId(row.try_get("id").context("retrieving the id field")?),
        external_id: row
            .try_get("external_id")
            .context("retrieving the external_id field")?,
        username: row
            .try_get("username")
            .context("retrieving the username field")?,
        name: row.try_get("name").context("retrieving the name field")?,
        bio: row.try_get("bio").context("retrieving the bio field")?,
        image: row.try_get("image").context("retrieving the image field")?,
        threads: id_list(row, "threads", ThreadId)?,
        onboarded: row
            .try_get("onboarded")
            .context("retrieving the onboarded field")?,
        communities: id_list(row, "communities", CommunityId)?,
        joined_at: row
            .try_get("joined_at")
            .context("retrieving the joined_at field")?,
    })
}

fn thread_from_row(row: &PgRow) -> anyhow::Result<Thread> {
    Ok(Thread {
        id: ThreadId(row.try_get("id").context("retrieving the id field")?),
        text: row.try_get("text").context("retrieving the text field")?,
        author: UserId(row.try_get("author").context("retrieving the author field")?),
        community: row
            .try_get::<Option<Uuid>, _>("community")
            .context("retrieving the community field")?
            .map(CommunityId),
        created_at: row
            .try_get("created_at")
            .context("retrieving the created_at field")?,
        parent_id: row
            .try_get::<Option<Uuid>, _>("parent_id")
            .context("retrieving the parent_id field")?
            .map(ThreadId),
        children: id_list(row, "children", ThreadId)?,
    })
}

fn community_from_row(row: &PgRow) -> anyhow::Result<Community> {
    Ok(Community {
        id: CommunityId(row.try_get("id").context("retrieving the id field")?),
        external_id: row
            .try_get("external_id")
            .context("retrieving the external_id field")?,
        slug: row.try_get("slug").context("retrieving the slug field")?,
        name: row.try_get("name").context("retrieving the name field")?,
        bio: row.try_get("bio").context("retrieving the bio field")?,
        image: row.try_get("image").context("retrieving the image field")?,
        created_by: row
            .try_get::<Option<Uuid>, _>("created_by")
            .context("retrieving the created_by field")?
            .map(UserId),
        members: id_list(row, "members", UserId)?,
        threads: id_list(row, "threads", ThreadId)?,
        created_at: row
            .try_get("created_at")
            .context("retrieving the created_at field")?,
    })
}

impl<'a> PostgresDb<'a> {
    async fn fetch_threads_where(
        &mut self,
        query: &str,
        bind: Uuid,
    ) -> anyhow::Result<Vec<Thread>> {
        let mut rows = sqlx::query(query).bind(bind).fetch(&mut *self.conn);
        let mut res = Vec::new();
        while let Some(row) = rows.try_next().await.context("querying threads table")? {
            res.push(thread_from_row(&row)?);
        }
        Ok(res)
    }
}

#[async_trait]
impl<'a> Db for PostgresDb<'a> {
    async fn fetch_user(&mut self, id: UserId) -> anyhow::Result<Option<User>> {
        sqlx::query(
            "
                SELECT id, external_id, username, name, bio, image,
                    threads, onboarded, communities, joined_at
                FROM users
                WHERE id = $1
            ",
        )
        .bind(id.0)
        .fetch_optional(&mut *self.conn)
        .await
        .with_context(|| format!("querying user {id:?}"))?
        .as_ref()
        .map(user_from_row)
        .transpose()
    }

    async fn fetch_user_by_external_id(
        &mut self,
        external_id: &str,
    ) -> anyhow::Result<Option<User>> {
        sqlx::query(
            "
                SELECT id, external_id, username, name, bio, image,
                    threads, onboarded, communities, joined_at
                FROM users
                WHERE external_id = $1
            ",
        )
        .bind(external_id)
        .fetch_optional(&mut *self.conn)
        .await
        .with_context(|| format!("querying user with external id {external_id:?}"))?
        .as_ref()
        .map(user_from_row)
        .transpose()
    }

    async fn fetch_user_by_username(&mut self, username: &str) -> anyhow::Result<Option<User>> {
        sqlx::query(
            "
                SELECT id, external_id, username, name, bio, image,
                    threads, onboarded, communities, joined_at
                FROM users
                WHERE username = lower($1)
            ",
        )
        .bind(username)
        .fetch_optional(&mut *self.conn)
        .await
        .with_context(|| format!("querying user with username {username:?}"))?
        .as_ref()
        .map(user_from_row)
        .transpose()
    }

    async fn fetch_users(&mut self, ids: &[UserId]) -> anyhow::Result<Vec<User>> {
        sqlx::query(
            "
                SELECT id, external_id, username, name, bio, image,
                    threads, onboarded, communities, joined_at
                FROM users
                WHERE id = ANY($1)
            ",
        )
        .bind(raw_ids(ids, |id| id.0))
        .fetch_all(&mut *self.conn)
        .await
        .with_context(|| format!("querying {} users", ids.len()))?
        .iter()
        .map(user_from_row)
        .collect()
    }

    async fn upsert_user(
        &mut self,
        external_id: &str,
        profile: &ProfileUpdate,
    ) -> anyhow::Result<User> {
        let row = sqlx::query(
            "
                INSERT INTO users (id, external_id, username, name, bio, image, onboarded)
                VALUES ($1, $2, lower($3), $4, $5, $6, true)
                ON CONFLICT (external_id) DO UPDATE
                    SET username = EXCLUDED.username,
                        name = EXCLUDED.name,
                        bio = EXCLUDED.bio,
                        image = EXCLUDED.image,
                        onboarded = true
                RETURNING id, external_id, username, name, bio, image,
                    threads, onboarded, communities, joined_at
            ",
        )
        .bind(Uuid::new_v4())
        .bind(external_id)
        .bind(&profile.username)
        .bind(&profile.name)
        .bind(&profile.bio)
        .bind(&profile.image)
        .fetch_one(&mut *self.conn)
        .await
        .with_context(|| format!("upserting user {external_id:?}"))?;
        user_from_row(&row)
    }

    async fn search_users(&mut self, q: &UserQuery) -> anyhow::Result<(Vec<User>, u64)> {
        let pattern = like_pattern(&q.needle);
        let users = sqlx::query(
            "
                SELECT id, external_id, username, name, bio, image,
                    threads, onboarded, communities, joined_at
                FROM users
                WHERE (username ILIKE $1 OR name ILIKE $1)
                    AND ($2::VARCHAR IS NULL OR external_id <> $2)
                ORDER BY joined_at DESC, id
                OFFSET $3
                LIMIT $4
            ",
        )
        .bind(&pattern)
        .bind(&q.exclude_external_id)
        .bind(to_i64(q.skip))
        .bind(to_i64(q.limit))
        .fetch_all(&mut *self.conn)
        .await
        .with_context(|| format!("searching users for {:?}", q.needle))?
        .iter()
        .map(user_from_row)
        .collect::<anyhow::Result<Vec<_>>>()?;
        let total = sqlx::query(
            "
                SELECT COUNT(*) AS count
                FROM users
                WHERE (username ILIKE $1 OR name ILIKE $1)
                    AND ($2::VARCHAR IS NULL OR external_id <> $2)
            ",
        )
        .bind(&pattern)
        .bind(&q.exclude_external_id)
        .fetch_one(&mut *self.conn)
        .await
        .with_context(|| format!("counting users matching {:?}", q.needle))?;
        Ok((users, count_from_row(&total)?))
    }

    async fn push_user_thread(&mut self, user: UserId, thread: ThreadId) -> anyhow::Result<bool> {
        Ok(sqlx::query("UPDATE users SET threads = array_append(threads, $2) WHERE id = $1")
            .bind(user.0)
            .bind(thread.0)
            .execute(&mut *self.conn)
            .await
            .with_context(|| format!("adding thread {thread:?} to user {user:?}"))?
            .rows_affected()
            == 1)
    }

    async fn push_user_community(
        &mut self,
        user: UserId,
        community: CommunityId,
    ) -> anyhow::Result<bool> {
        Ok(sqlx::query(
            "UPDATE users SET communities = array_append(communities, $2) WHERE id = $1",
        )
        .bind(user.0)
        .bind(community.0)
        .execute(&mut *self.conn)
        .await
        .with_context(|| format!("adding community {community:?} to user {user:?}"))?
        .rows_affected()
            == 1)
    }

    async fn pull_user_community(
        &mut self,
        user: UserId,
        community: CommunityId,
    ) -> anyhow::Result<bool> {
        Ok(sqlx::query(
            "UPDATE users SET communities = array_remove(communities, $2) WHERE id = $1",
        )
        .bind(user.0)
        .bind(community.0)
        .execute(&mut *self.conn)
        .await
        .with_context(|| format!("removing community {community:?} from user {user:?}"))?
        .rows_affected()
            == 1)
    }

    async fn pull_thread_from_users(&mut self, thread: ThreadId) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE users SET threads = array_remove(threads, $1) WHERE $1 = ANY(threads)",
        )
        .bind(thread.0)
        .execute(&mut *self.conn)
        .await
        .with_context(|| format!("removing thread {thread:?} from all users"))?;
        Ok(())
    }

    async fn pull_community_from_users(&mut self, community: CommunityId) -> anyhow::Result<()> {
        sqlx::query(
            "
                UPDATE users SET communities = array_remove(communities, $1)
                WHERE $1 = ANY(communities)
            ",
        )
        .bind(community.0)
        .execute(&mut *self.conn)
        .await
        .with_context(|| format!("removing community {community:?} from all users"))?;
        Ok(())
    }

    async fn insert_thread(&mut self, thread: &Thread) -> anyhow::Result<()> {
        sqlx::query(
            "
                INSERT INTO threads (id, text, author, community, created_at, parent_id, children)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
            ",
        )
        .bind(thread.id.0)
        .bind(&thread.text)
        .bind(thread.author.0)
        .bind(thread.community.map(|c| c.0))
        .bind(thread.created_at)
        .bind(thread.parent_id.map(|p| p.0))
        .bind(raw_ids(&thread.children, |id| id.0))
        .execute(&mut *self.conn)
        .await
        .with_context(|| format!("inserting thread {:?}", thread.id))?;
        Ok(())
    }

    async fn fetch_thread(&mut self, id: ThreadId) -> anyhow::Result<Option<Thread>> {
        sqlx::query(
            "
                SELECT id, text, author, community, created_at, parent_id, children
                FROM threads
                WHERE id = $1
            ",
        )
        .bind(id.0)
        .fetch_optional(&mut *self.conn)
        .await
        .with_context(|| format!("querying thread {id:?}"))?
        .as_ref()
        .map(thread_from_row)
        .transpose()
    }

    async fn fetch_threads(&mut self, ids: &[ThreadId]) -> anyhow::Result<Vec<Thread>> {
        sqlx::query(
            "
                SELECT id, text, author, community, created_at, parent_id, children
                FROM threads
                WHERE id = ANY($1)
            ",
        )
        .bind(raw_ids(ids, |id| id.0))
        .fetch_all(&mut *self.conn)
        .await
        .with_context(|| format!("querying {} threads", ids.len()))?
        .iter()
        .map(thread_from_row)
        .collect()
    }

    async fn fetch_threads_by_author(&mut self, author: UserId) -> anyhow::Result<Vec<Thread>> {
        self.fetch_threads_where(
            "
                SELECT id, text, author, community, created_at, parent_id, children
                FROM threads
                WHERE author = $1
            ",
            author.0,
        )
        .await
        .with_context(|| format!("fetching threads authored by {author:?}"))
    }

    async fn fetch_threads_by_community(
        &mut self,
        community: CommunityId,
    ) -> anyhow::Result<Vec<Thread>> {
        self.fetch_threads_where(
            "
                SELECT id, text, author, community, created_at, parent_id, children
                FROM threads
                WHERE community = $1
            ",
            community.0,
        )
        .await
        .with_context(|| format!("fetching threads of community {community:?}"))
    }

    async fn fetch_top_level_threads(
        &mut self,
        skip: u64,
        limit: u64,
    ) -> anyhow::Result<(Vec<Thread>, u64)> {
        let threads = sqlx::query(
            "
                SELECT id, text, author, community, created_at, parent_id, children
                FROM threads
                WHERE parent_id IS NULL
                ORDER BY created_at DESC, id
                OFFSET $1
                LIMIT $2
            ",
        )
        .bind(to_i64(skip))
        .bind(to_i64(limit))
        .fetch_all(&mut *self.conn)
        .await
        .context("querying top-level threads")?
        .iter()
        .map(thread_from_row)
        .collect::<anyhow::Result<Vec<_>>>()?;
        let total = sqlx::query("SELECT COUNT(*) AS count FROM threads WHERE parent_id IS NULL")
            .fetch_one(&mut *self.conn)
            .await
            .context("counting top-level threads")?;
        Ok((threads, count_from_row(&total)?))
    }

    async fn push_thread_child(
        &mut self,
        parent: ThreadId,
        child: ThreadId,
    ) -> anyhow::Result<bool> {
        Ok(
            sqlx::query("UPDATE threads SET children = array_append(children, $2) WHERE id = $1")
                .bind(parent.0)
                .bind(child.0)
                .execute(&mut *self.conn)
                .await
                .with_context(|| format!("adding child {child:?} to thread {parent:?}"))?
                .rows_affected()
                == 1,
        )
    }

    async fn delete_thread(&mut self, id: ThreadId) -> anyhow::Result<bool> {
        Ok(sqlx::query("DELETE FROM threads WHERE id = $1")
            .bind(id.0)
            .execute(&mut *self.conn)
            .await
            .with_context(|| format!("deleting thread {id:?}"))?
            .rows_affected()
            == 1)
    }

    async fn insert_community(&mut self, community: &Community) -> anyhow::Result<()> {
        sqlx::query(
            "
                INSERT INTO communities
                    (id, external_id, slug, name, bio, image, created_by, members, threads, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ",
        )
        .bind(community.id.0)
        .bind(&community.external_id)
        .bind(&community.slug)
        .bind(&community.name)
        .bind(&community.bio)
        .bind(&community.image)
        .bind(community.created_by.map(|u| u.0))
        .bind(raw_ids(&community.members, |id| id.0))
        .bind(raw_ids(&community.threads, |id| id.0))
        .bind(community.created_at)
        .execute(&mut *self.conn)
        .await
        .with_context(|| format!("inserting community {:?}", community.external_id))?;
        Ok(())
    }

    async fn fetch_community_by_external_id(
        &mut self,
        external_id: &str,
    ) -> anyhow::Result<Option<Community>> {
        sqlx::query(
            "
                SELECT id, external_id, slug, name, bio, image,
                    created_by, members, threads, created_at
                FROM communities
                WHERE external_id = $1
            ",
        )
        .bind(external_id)
        .fetch_optional(&mut *self.conn)
        .await
        .with_context(|| format!("querying community with external id {external_id:?}"))?
        .as_ref()
        .map(community_from_row)
        .transpose()
    }

    async fn fetch_communities(&mut self, ids: &[CommunityId]) -> anyhow::Result<Vec<Community>> {
        sqlx::query(
            "
                SELECT id, external_id, slug, name, bio, image,
                    created_by, members, threads, created_at
                FROM communities
                WHERE id = ANY($1)
            ",
        )
        .bind(raw_ids(ids, |id| id.0))
        .fetch_all(&mut *self.conn)
        .await
        .with_context(|| format!("querying {} communities", ids.len()))?
        .iter()
        .map(community_from_row)
        .collect()
    }

    async fn update_community(
        &mut self,
        external_id: &str,
        update: &CommunityUpdate,
    ) -> anyhow::Result<Option<Community>> {
        sqlx::query(
            "
                UPDATE communities
                SET name = $2, slug = $3, image = $4
                WHERE external_id = $1
                RETURNING id, external_id, slug, name, bio, image,
                    created_by, members, threads, created_at
            ",
        )
        .bind(external_id)
        .bind(&update.name)
        .bind(&update.slug)
        .bind(&update.image)
        .fetch_optional(&mut *self.conn)
        .await
        .with_context(|| format!("updating community {external_id:?}"))?
        .as_ref()
        .map(community_from_row)
        .transpose()
    }

    async fn search_communities(
        &mut self,
        q: &CommunityQuery,
    ) -> anyhow::Result<(Vec<Community>, u64)> {
        let pattern = like_pattern(&q.needle);
        let communities = sqlx::query(
            "
                SELECT id, external_id, slug, name, bio, image,
                    created_by, members, threads, created_at
                FROM communities
                WHERE slug ILIKE $1 OR name ILIKE $1
                ORDER BY created_at DESC, id
                OFFSET $2
                LIMIT $3
            ",
        )
        .bind(&pattern)
        .bind(to_i64(q.skip))
        .bind(to_i64(q.limit))
        .fetch_all(&mut *self.conn)
        .await
        .with_context(|| format!("searching communities for {:?}", q.needle))?
        .iter()
        .map(community_from_row)
        .collect::<anyhow::Result<Vec<_>>>()?;
        let total = sqlx::query(
            "SELECT COUNT(*) AS count FROM communities WHERE slug ILIKE $1 OR name ILIKE $1",
        )
        .bind(&pattern)
        .fetch_one(&mut *self.conn)
        .await
        .with_context(|| format!("counting communities matching {:?}", q.needle))?;
        Ok((communities, count_from_row(&total)?))
    }

    async fn push_community_member(
        &mut self,
        community: CommunityId,
        user: UserId,
    ) -> anyhow::Result<bool> {
        Ok(sqlx::query(
            "UPDATE communities SET members = array_append(members, $2) WHERE id = $1",
        )
        .bind(community.0)
        .bind(user.0)
        .execute(&mut *self.conn)
        .await
        .with_context(|| format!("adding member {user:?} to community {community:?}"))?
        .rows_affected()
            == 1)
    }

    async fn pull_community_member(
        &mut self,
        community: CommunityId,
        user: UserId,
    ) -> anyhow::Result<bool> {
        Ok(sqlx::query(
            "UPDATE communities SET members = array_remove(members, $2) WHERE id = $1",
        )
        .bind(community.0)
        .bind(user.0)
        .execute(&mut *self.conn)
        .await
        .with_context(|| format!("removing member {user:?} from community {community:?}"))?
        .rows_affected()
            == 1)
    }

    async fn push_community_thread(
        &mut self,
        community: CommunityId,
        thread: ThreadId,
    ) -> anyhow::Result<bool> {
        Ok(sqlx::query(
            "UPDATE communities SET threads = array_append(threads, $2) WHERE id = $1",
        )
        .bind(community.0)
        .bind(thread.0)
        .execute(&mut *self.conn)
        .await
        .with_context(|| format!("adding thread {thread:?} to community {community:?}"))?
        .rows_affected()
            == 1)
    }

    async fn delete_community(&mut self, id: CommunityId) -> anyhow::Result<bool> {
        Ok(sqlx::query("DELETE FROM communities WHERE id = $1")
            .bind(id.0)
            .execute(&mut *self.conn)
            .await
            .with_context(|| format!("deleting community {id:?}"))?
            .rows_affected()
            == 1)
    }
}
