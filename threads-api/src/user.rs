use anyhow::Context;

use crate::{
    CommunityId, CommunitySummary, Db, Error, ObjectKind, Paginated, SearchRequest, ThreadId,
    Time, UserQuery, Uuid, STUB_UUID,
};

pub const USERNAME_MIN_LEN: usize = 3;
pub const USERNAME_MAX_LEN: usize = 30;
pub const NAME_MAX_LEN: usize = 30;
pub const BIO_MAX_LEN: usize = 1000;

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn stub() -> UserId {
        UserId(STUB_UUID)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct User {
    pub id: UserId,

    /// Id of this user at the identity provider
    pub external_id: String,
    pub username: String,
    pub name: String,
    pub bio: String,
    pub image: String,

    /// Top-level threads posted by this user, oldest first
    pub threads: Vec<ThreadId>,
    pub onboarded: bool,
    pub communities: Vec<CommunityId>,
    pub joined_at: Time,
}

/// The subset of a user shown next to the things they authored
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct UserSummary {
    pub id: UserId,
    pub external_id: String,
    pub username: String,
    pub name: String,
    pub image: String,
}

impl From<&User> for UserSummary {
    fn from(u: &User) -> UserSummary {
        UserSummary {
            id: u.id,
            external_id: u.external_id.clone(),
            username: u.username.clone(),
            name: u.name.clone(),
            image: u.image.clone(),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ProfileUpdate {
    pub username: String,
    pub name: String,
    pub bio: String,

    /// Hosted URL returned by the upload provider
    pub image: String,
}

impl ProfileUpdate {
    /// Lower-cases the username and trims surrounding whitespace off every field
    pub fn normalized(self) -> ProfileUpdate {
        ProfileUpdate {
            username: self.username.trim().to_lowercase(),
            name: self.name.trim().to_string(),
            bio: self.bio.trim().to_string(),
            image: self.image.trim().to_string(),
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        crate::validate_length("username", &self.username, USERNAME_MIN_LEN, USERNAME_MAX_LEN)?;
        if let Some(c) = self
            .username
            .chars()
            .find(|c| {
                !(c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(*c, '_' | '.' | '-'))
            })
        {
            return Err(Error::invalid_field(
                "username",
                format!("character {c:?} is not allowed"),
            ));
        }
        crate::validate_length("name", &self.name, 1, NAME_MAX_LEN)?;
        crate::validate_length("bio", &self.bio, 0, BIO_MAX_LEN)?;
        crate::validate_string(&self.image)?;
        match url::Url::parse(&self.image) {
            Ok(u) if u.scheme() == "https" || u.scheme() == "http" => Ok(()),
            Ok(u) => Err(Error::invalid_field(
                "image",
                format!("scheme {:?} is not allowed", u.scheme()),
            )),
            Err(e) => Err(Error::invalid_field("image", format!("not a valid url: {e}"))),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct UserProfile {
    pub user: User,
    pub communities: Vec<CommunitySummary>,
}

/// Creates the user on first save, updates it afterwards, and marks it as onboarded
pub async fn update_profile<D: Db>(
    db: &mut D,
    external_id: &str,
    profile: ProfileUpdate,
) -> anyhow::Result<Result<User, Error>> {
    check!(crate::validate_string(external_id));
    let profile = profile.normalized();
    check!(profile.validate());
    if let Some(owner) = db
        .fetch_user_by_username(&profile.username)
        .await
        .with_context(|| format!("checking ownership of username {:?}", profile.username))?
    {
        if owner.external_id != external_id {
            return Ok(Err(Error::NameAlreadyUsed(profile.username)));
        }
    }
    let user = db
        .upsert_user(external_id, &profile)
        .await
        .with_context(|| format!("upserting user {external_id:?}"))?;
    tracing::debug!(user = ?user.id, %external_id, "profile saved");
    Ok(Ok(user))
}

pub async fn fetch_profile<D: Db>(
    db: &mut D,
    external_id: &str,
) -> anyhow::Result<Result<UserProfile, Error>> {
    let user = found!(
        db.fetch_user_by_external_id(external_id)
            .await
            .with_context(|| format!("fetching user {external_id:?}"))?,
        Error::not_found(ObjectKind::User, external_id)
    );
    let mut communities = db
        .fetch_communities(&user.communities)
        .await
        .with_context(|| format!("fetching communities of user {:?}", user.id))?;
    communities.sort_by_key(|c| user.communities.iter().position(|id| *id == c.id));
    Ok(Ok(UserProfile {
        communities: communities.iter().map(CommunitySummary::from).collect(),
        user,
    }))
}

/// Searches users other than `requester`, newest first
pub async fn search_users<D: Db>(
    db: &mut D,
    requester: &str,
    search: &SearchRequest,
) -> anyhow::Result<Result<Paginated<UserSummary>, Error>> {
    check!(crate::validate_string(&search.q));
    let paging = search.paging();
    let (users, total) = db
        .search_users(&UserQuery {
            needle: search.needle(),
            exclude_external_id: Some(String::from(requester)),
            skip: paging.skip(),
            limit: paging.page_size(),
        })
        .await
        .with_context(|| format!("searching users for {:?}", search.q))?;
    Ok(Ok(Paginated {
        items: users.iter().map(UserSummary::from).collect(),
        is_next: paging.is_next(total),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> ProfileUpdate {
        ProfileUpdate {
            username: String::from("  Alice_1 "),
            name: String::from("Alice"),
            bio: String::from("hello"),
            image: String::from("https://utfs.io/f/abc.png"),
        }
    }

    #[test]
    fn normalized_lowercases_username() {
        let p = profile().normalized();
        assert_eq!(p.username, "alice_1");
        assert_eq!(p.validate(), Ok(()));
    }

    #[test]
    fn username_bounds() {
        let mut p = profile().normalized();
        p.username = String::from("ab");
        assert!(matches!(p.validate(), Err(Error::InvalidField { field, .. }) if field == "username"));
        p.username = "a".repeat(USERNAME_MAX_LEN + 1);
        assert!(p.validate().is_err());
        p.username = String::from("has space");
        assert!(p.validate().is_err());
    }

    #[test]
    fn bio_may_be_empty_but_bounded() {
        let mut p = profile().normalized();
        p.bio = String::new();
        assert_eq!(p.validate(), Ok(()));
        p.bio = "x".repeat(BIO_MAX_LEN + 1);
        assert!(matches!(p.validate(), Err(Error::InvalidField { field, .. }) if field == "bio"));
    }

    #[test]
    fn image_must_be_a_web_url() {
        let mut p = profile().normalized();
        p.image = String::from("not a url");
        assert!(matches!(p.validate(), Err(Error::InvalidField { field, .. }) if field == "image"));
        p.image = String::from("data:image/png;base64,AAAA");
        assert!(p.validate().is_err());
    }

    #[test]
    fn null_bytes_are_caught() {
        let mut p = profile().normalized();
        p.name = String::from("Al\0ice");
        assert!(matches!(p.validate(), Err(Error::NullByteInString(_))));
    }
}
