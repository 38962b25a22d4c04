/// Claims carried by the identity provider's session tokens
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct SessionClaims {
    /// External identity id of the signed-in user
    pub sub: String,

    /// Expiration, as seconds since the unix epoch
    pub exp: u64,
}
