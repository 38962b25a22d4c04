use chrono::Utc;

pub use uuid::{uuid, Uuid};
pub type Time = chrono::DateTime<Utc>;

pub const STUB_UUID: Uuid = uuid!("ffffffff-ffff-ffff-ffff-ffffffffffff");

/// Unwraps an `Option` inside an operation, returning the domain error
/// (as the inner `Err` of `anyhow::Result<Result<_, Error>>`) if it is `None`.
macro_rules! found {
    ($e:expr, $err:expr) => {
        match $e {
            Some(v) => v,
            None => return Ok(Err($err)),
        }
    };
}

/// Same as `?`, but for the inner domain result of an operation.
macro_rules! check {
    ($e:expr) => {
        match $e {
            Ok(v) => v,
            Err(e) => return Ok(Err(e)),
        }
    };
}

mod activity;
mod auth;
mod community;
mod db;
mod error;
mod search;
mod thread;
mod tree;
mod user;
pub mod webhook;

pub use activity::{fetch_activity, Activity};
pub use auth::SessionClaims;
pub use community::{
    add_member, create_community, delete_community, fetch_community_details, remove_member,
    search_communities, update_community, Community, CommunityDetails, CommunityId,
    CommunityListing, CommunitySummary, CommunityUpdate, NewCommunity,
};
pub use db::Db;
pub use error::{Error, ObjectKind};
pub use search::{
    matches_needle, CommunityQuery, PageRequest, Paginated, SearchRequest, UserQuery,
    DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
};
pub use thread::{
    add_comment, create_thread, fetch_community_threads, fetch_feed, fetch_thread_tree,
    fetch_user_threads, NewComment, NewThread, Thread, ThreadId,
};
pub use tree::{load_trees, Forest, ThreadView, DETAIL_DEPTH, FEED_DEPTH};
pub use user::{
    fetch_profile, search_users, update_profile, ProfileUpdate, User, UserId, UserProfile,
    UserSummary,
};

pub fn validate_string(s: &str) -> Result<(), Error> {
    match s.contains('\0') {
        true => Err(Error::NullByteInString(String::from(s))),
        false => Ok(()),
    }
}

/// Checks that `s` is not blank and is at most `max` characters long
pub fn validate_length(field: &str, s: &str, min: usize, max: usize) -> Result<(), Error> {
    validate_string(s)?;
    let len = s.chars().count();
    if len < min {
        return Err(Error::invalid_field(
            field,
            format!("must be at least {min} characters long"),
        ));
    }
    if len > max {
        return Err(Error::invalid_field(
            field,
            format!("must be at most {max} characters long"),
        ));
    }
    Ok(())
}
