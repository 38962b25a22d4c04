use chrono::{DateTime, Duration, Utc};
use rand::{seq::SliceRandom, Rng};
use uuid::Uuid;

const NUM_USERS: usize = 10;
const NUM_COMMUNITIES: usize = 4;
const MAX_MEMBERS: usize = 6;

const NUM_THREADS: usize = 60;
const NUM_COMMENTS: usize = 200;
const THREAD_WORD_COUNT: usize = 25;
const COMMENT_WORD_COUNT: usize = 12;

// Chance that a top-level thread is posted in a community
const COMMUNITY_RATIO: f64 = 0.3;

struct Thread {
    id: Uuid,
    text: String,
    author: usize,
    community: Option<usize>,
    created_at: DateTime<Utc>,
    parent: Option<usize>,
    children: Vec<Uuid>,
}

fn gen_n_items(table: &str, columns: &str, n: usize, mut f: impl FnMut(usize) -> String) {
    if n == 0 {
        return;
    }
    println!("INSERT INTO {} ({}) VALUES", table, columns);
    for i in 0..n {
        if i != 0 {
            println!(",");
        }
        print!("    {}", f(i));
    }
    println!();
    println!("ON CONFLICT DO NOTHING;");
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn uuid_array(ids: &[Uuid]) -> String {
    let ids = ids.iter().map(|i| i.to_string()).collect::<Vec<_>>();
    format!("'{{{}}}'::UUID[]", ids.join(","))
}

fn gen_date(rng: &mut impl Rng, after: DateTime<Utc>) -> DateTime<Utc> {
    after + Duration::seconds(rng.gen_range(1..3 * 24 * 3600))
}

/// The generated rows, with every reference list kept in sync with the rows it points to
struct Seed {
    users: Vec<Uuid>,
    user_threads: Vec<Vec<Uuid>>,
    user_communities: Vec<Vec<Uuid>>,
    communities: Vec<Uuid>,
    community_creators: Vec<usize>,
    community_members: Vec<Vec<Uuid>>,
    community_threads: Vec<Vec<Uuid>>,
    threads: Vec<Thread>,
}

fn generate(rng: &mut impl Rng, start: DateTime<Utc>) -> Seed {
    let users = (0..NUM_USERS).map(|_| Uuid::new_v4()).collect::<Vec<_>>();
    let mut user_threads = vec![Vec::new(); NUM_USERS];
    let mut user_communities = vec![Vec::new(); NUM_USERS];

    let communities = (0..NUM_COMMUNITIES)
        .map(|_| Uuid::new_v4())
        .collect::<Vec<_>>();
    let mut community_threads = vec![Vec::new(); NUM_COMMUNITIES];
    let mut community_members = vec![Vec::new(); NUM_COMMUNITIES];
    let community_creators = (0..NUM_COMMUNITIES)
        .map(|_| rng.gen_range(0..NUM_USERS))
        .collect::<Vec<_>>();
    for (c, members) in community_members.iter_mut().enumerate() {
        // creators are linked to their community without being members of it
        user_communities[community_creators[c]].push(communities[c]);
        let count = rng.gen_range(1..=MAX_MEMBERS.min(NUM_USERS));
        let mut picked = (0..NUM_USERS).collect::<Vec<_>>();
        picked.shuffle(rng);
        for u in picked.into_iter().take(count) {
            members.push(users[u]);
            if !user_communities[u].contains(&communities[c]) {
                user_communities[u].push(communities[c]);
            }
        }
    }

    // Top-level threads first, then comments replying to any earlier thread
    let mut threads: Vec<Thread> = Vec::new();
    for i in 0..NUM_THREADS + NUM_COMMENTS {
        let author = rng.gen_range(0..NUM_USERS);
        let parent = match i < NUM_THREADS {
            true => None,
            false => Some(rng.gen_range(0..threads.len())),
        };
        let (community, created_at, text) = match parent {
            None => (
                Some(rng.gen_range(0..NUM_COMMUNITIES)).filter(|_| rng.gen_bool(COMMUNITY_RATIO)),
                gen_date(rng, start),
                lipsum::lipsum_words(THREAD_WORD_COUNT),
            ),
            Some(p) => (
                threads[p].community,
                gen_date(rng, threads[p].created_at),
                lipsum::lipsum_words(COMMENT_WORD_COUNT),
            ),
        };
        let id = Uuid::new_v4();
        match parent {
            None => {
                user_threads[author].push(id);
                if let Some(c) = community {
                    community_threads[c].push(id);
                }
            }
            Some(p) => threads[p].children.push(id),
        }
        threads.push(Thread {
            id,
            text,
            author,
            community,
            created_at,
            parent,
            children: Vec::new(),
        });
    }

    Seed {
        users,
        user_threads,
        user_communities,
        communities,
        community_creators,
        community_members,
        community_threads,
        threads,
    }
}

fn main() {
    let start = Utc::now() - Duration::days(90);
    let Seed {
        users,
        user_threads,
        user_communities,
        communities,
        community_creators,
        community_members,
        community_threads,
        threads,
    } = generate(&mut rand::thread_rng(), start);

    gen_n_items(
        "users",
        "id, external_id, username, name, bio, image, threads, onboarded, communities, joined_at",
        NUM_USERS,
        |i| {
            let name = lipsum::lipsum_words(2);
            format!(
                "('{}', 'user_seed_{}', 'user{}', {}, {}, 'https://img.example.com/u/{}.png', {}, true, {}, '{}')",
                users[i],
                i,
                i,
                quote(&name),
                quote(&lipsum::lipsum_words(8)),
                i,
                uuid_array(&user_threads[i]),
                uuid_array(&user_communities[i]),
                start.to_rfc3339(),
            )
        },
    );

    gen_n_items(
        "communities",
        "id, external_id, slug, name, bio, image, created_by, members, threads, created_at",
        NUM_COMMUNITIES,
        |i| {
            format!(
                "('{}', 'org_seed_{}', 'community-{}', {}, {}, NULL, '{}', {}, {}, '{}')",
                communities[i],
                i,
                i,
                quote(&lipsum::lipsum_title()),
                quote(&lipsum::lipsum_words(10)),
                users[community_creators[i]],
                uuid_array(&community_members[i]),
                uuid_array(&community_threads[i]),
                start.to_rfc3339(),
            )
        },
    );

    gen_n_items(
        "threads",
        "id, text, author, community, created_at, parent_id, children",
        threads.len(),
        |i| {
            let t = &threads[i];
            format!(
                "('{}', {}, '{}', {}, '{}', {}, {})",
                t.id,
                quote(&t.text),
                users[t.author],
                match t.community {
                    Some(c) => format!("'{}'", communities[c]),
                    None => String::from("NULL"),
                },
                t.created_at.to_rfc3339(),
                match t.parent {
                    Some(p) => format!("'{}'", threads[p].id),
                    None => String::from("NULL"),
                },
                uuid_array(&t.children),
            )
        },
    );
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;

    fn seed() -> Seed {
        generate(&mut StdRng::seed_from_u64(42), Utc::now())
    }

    #[test]
    fn only_top_level_threads_are_listed() {
        let seed = seed();
        let listed = seed
            .user_threads
            .iter()
            .chain(seed.community_threads.iter())
            .flatten()
            .collect::<Vec<_>>();
        for t in &seed.threads {
            match t.parent {
                None => assert!(seed.user_threads[t.author].contains(&t.id)),
                Some(_) => assert!(!listed.contains(&&t.id), "comment {} is listed", t.id),
            }
        }
        let num_top_level = seed.threads.iter().filter(|t| t.parent.is_none()).count();
        assert_eq!(num_top_level, NUM_THREADS);
        assert_eq!(seed.user_threads.iter().flatten().count(), NUM_THREADS);
    }

    #[test]
    fn community_lists_match_thread_communities() {
        let seed = seed();
        for t in seed.threads.iter().filter(|t| t.parent.is_none()) {
            for (c, listed) in seed.community_threads.iter().enumerate() {
                assert_eq!(listed.contains(&t.id), t.community == Some(c));
            }
        }
    }

    #[test]
    fn children_point_back_to_their_parent() {
        let seed = seed();
        for (i, t) in seed.threads.iter().enumerate() {
            for child in &t.children {
                let child = seed.threads.iter().find(|c| c.id == *child).unwrap();
                assert_eq!(child.parent, Some(i));
                assert_eq!(child.community, t.community);
            }
        }
    }

    #[test]
    fn creators_and_members_are_linked() {
        let seed = seed();
        for (c, id) in seed.communities.iter().enumerate() {
            assert!(seed.user_communities[seed.community_creators[c]].contains(id));
            for m in &seed.community_members[c] {
                let u = seed.users.iter().position(|u| u == m).unwrap();
                assert!(seed.user_communities[u].contains(id));
            }
        }
        for links in &seed.user_communities {
            let mut dedup = links.clone();
            dedup.sort();
            dedup.dedup();
            assert_eq!(dedup.len(), links.len());
        }
    }
}
