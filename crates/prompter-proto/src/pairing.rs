//! Pairing URL scheme: a shareable link encodes the role a joining
//! device should adopt, e.g. `https://prompter.local/?role=viewer`.

use crate::role::Role;
use url::Url;

/// Role encoded in a pairing URL, if any.
pub fn role_from_url(url: &str) -> Option<Role> {
    let parsed = Url::parse(url).ok()?;
    parsed
        .query_pairs()
        .find(|(name, _)| name == "role")
        .and_then(|(_, value)| value.parse().ok())
}

/// Resolve the role a freshly started client begins with: the pairing
/// URL wins, then a previously persisted choice, then `Host`.
pub fn initial_role(pairing_url: Option<&str>, saved: Option<Role>) -> Role {
    pairing_url
        .and_then(role_from_url)
        .or(saved)
        .unwrap_or_default()
}

/// Build a shareable pairing URL for `role`, replacing any role already
/// present on `base`.
pub fn pairing_url(base: &str, role: Role) -> Result<String, url::ParseError> {
    let mut url = Url::parse(base)?;
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(name, _)| name != "role")
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();
    {
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        for (name, value) in &kept {
            pairs.append_pair(name, value);
        }
        pairs.append_pair("role", role.as_str());
    }
    Ok(url.into())
}
