/// One user's stored record: the provider session, if signed in, and the
/// account version tokens are bound to.
pub struct SessionRow {
    pub phone: String,
    pub session: Option<String>,
    pub account_version: u64,
    pub updated_at: String,
}
