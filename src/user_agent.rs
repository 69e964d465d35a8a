//! User-Agent sent to every upstream source.
//!
//! Crossref and DataCite route requests that carry a contact address into
//! their "polite" pools, so the address is appended when configured.

/// Project URL for User-Agent identification (RFC 9308).
const PROJECT_UA_URL: &str = "https://github.com/bibresolve/bibresolve";

/// `bibresolve/{version} (research-tool; +{url})`, plus ` mailto:{addr}`
/// when a contact address is given.
#[must_use]
pub fn resolver_user_agent(mailto: Option<&str>) -> String {
    let version = env!("CARGO_PKG_VERSION");
    let base = format!("bibresolve/{version} (research-tool; +{PROJECT_UA_URL})");
    match mailto.map(str::trim).filter(|m| !m.is_empty()) {
        Some(mailto) => format!("{base} mailto:{mailto}"),
        None => base,
    }
}
