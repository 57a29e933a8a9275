//! Branch, tag and Via helpers

use rand::distributions::Alphanumeric;
use rand::Rng;

use siplet_sip_core::Via;
use siplet_sip_transport::SipConnection;

/// RFC 3261 branch prefix
pub const BRANCH_MAGIC_COOKIE: &str = "z9hG4bK";

/// Generate a unique RFC 3261 branch parameter
pub fn generate_branch() -> String {
    format!("{}{}", BRANCH_MAGIC_COOKIE, random_token(16))
}

/// Generate a From/To tag
pub fn generate_tag() -> String {
    random_token(10)
}

/// Generate a Call-ID local part; callers usually append `@host`
pub fn generate_call_id() -> String {
    random_token(24)
}

pub fn is_rfc3261_branch(branch: &str) -> bool {
    branch.len() > BRANCH_MAGIC_COOKIE.len() && branch.starts_with(BRANCH_MAGIC_COOKIE)
}

/// Via for a request sent on `connection`, with a fresh branch
pub fn via_for(connection: &dyn SipConnection) -> Via {
    let local = connection.local_addr();
    Via::new(
        connection.transport().via_transport(),
        local.ip().to_string(),
        Some(local.port()),
        &generate_branch(),
    )
}

fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
