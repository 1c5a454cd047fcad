//! Newtype domain identifiers.
//!
//! Names, ids and credential references are distinct newtypes so a
//! [`TargetName`] can never be passed where a [`CredentialRef`] is expected.
//!
//! [`RepositoryIdentity`] is the equality/hash basis for every other component:
//! problem records, the ignore list, and hook registration are all keyed by it.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Macro for String-wrapped newtypes.
// Generates: struct, new() returning Option<Self>, as_str(), Display.
// ---------------------------------------------------------------------------
macro_rules! string_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier, returning `None` if the value is blank.
            pub fn new(value: impl Into<String>) -> Option<Self> {
                let v = value.into();
                let trimmed = v.trim();
                if trimmed.is_empty() {
                    None
                } else if trimmed.len() == v.len() {
                    Some(Self(v))
                } else {
                    Some(Self(trimmed.to_string()))
                }
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Integer-backed identifiers
// ---------------------------------------------------------------------------

/// Identifies a hook object on the remote host.
///
/// Wraps the integer id GitHub assigns when a hook is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HookId(u64);

impl HookId {
    /// Creates a new identifier from a raw integer.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the underlying integer value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for HookId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// String-backed identifiers
// ---------------------------------------------------------------------------

string_id! {
    /// Identifies a target: a consumer-owning unit (for example a configured
    /// build job) associated with one or more repositories.
    TargetName
}

string_id! {
    /// The delivery identifier GitHub sends in `X-GitHub-Delivery`.
    ///
    /// Redeliveries of the same event reuse the identifier, which is what
    /// duplicate tracking keys on.
    DeliveryId
}

string_id! {
    /// The single HTTP endpoint this deployment listens on for inbound
    /// deliveries. Hooks whose configured URL equals it are "ours".
    CallbackUrl
}

string_id! {
    /// Name of the environment variable holding a secret or token.
    ///
    /// Secrets are never stored in configuration; only the reference is.
    CredentialRef
}

// ---------------------------------------------------------------------------
// Repository identity
// ---------------------------------------------------------------------------

/// URL schemes that carry an authority section (`scheme://[user@]host/...`).
const AUTHORITY_SCHEMES: &[&str] = &["https://", "http://", "git://", "ssh://", "git+ssh://"];

/// Canonical identity of one remote repository: `(host, owner, name)`.
///
/// Constructed only through [`RepositoryIdentity::parse`], which accepts the
/// URL forms found in source-control configuration:
///
/// - SSH (scp-like): `git@github.com:owner/repo.git`
/// - git protocol: `git://github.com/owner/repo.git`
/// - HTTPS, optionally with userinfo: `https://user@github.com/owner/repo/`
/// - SSH URLs: `ssh://git@github.com/owner/repo.git`
///
/// The host is lower-cased. Owner and name keep the spelling they were parsed
/// with (used for display and API paths) but compare ASCII case-insensitively,
/// matching how GitHub resolves `owner/repo`.
///
/// # Examples
///
/// ```rust
/// use webhooks::RepositoryIdentity;
///
/// let ssh = RepositoryIdentity::parse("git@github.com:jenkinsci/jenkins.git").unwrap();
/// let https = RepositoryIdentity::parse("https://user@github.com/jenkinsci/jenkins/").unwrap();
/// assert_eq!(ssh, https);
/// assert_eq!(ssh.host(), "github.com");
/// assert!(RepositoryIdentity::parse("svn://example.com/repo").is_none());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct RepositoryIdentity {
    host: String,
    owner: String,
    name: String,
}

impl RepositoryIdentity {
    /// Parses a source-control URL into an identity.
    ///
    /// Returns `None` for unsupported schemes, URLs without an `owner/repo`
    /// path, and blank input. This is a silent skip, not an error.
    pub fn parse(raw: &str) -> Option<Self> {
        let url = raw.trim();
        if url.is_empty() {
            return None;
        }

        let (host, path) = match AUTHORITY_SCHEMES
            .iter()
            .find_map(|scheme| strip_prefix_ignore_case(url, scheme))
        {
            Some(rest) => {
                let (authority, path) = rest.split_once('/')?;
                (host_of(authority)?, path)
            }
            None => {
                // scp-like syntax: user@host:owner/repo
                if url.contains("://") {
                    return None;
                }
                let (login, path) = url.split_once(':')?;
                let (_, host) = login.rsplit_once('@')?;
                (host_of(host)?, path)
            }
        };

        let (owner, name) = owner_and_name(path)?;
        Some(Self {
            host,
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }

    /// Lower-cased host name, e.g. `github.com`.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Repository owner (user or organisation) as spelled in the parsed URL.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Repository name without any `.git` suffix.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `owner/name`, the form used in REST API paths.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// Canonical browser URL for the repository.
    pub fn html_url(&self) -> String {
        format!("https://{}/{}/{}", self.host, self.owner, self.name)
    }

    fn key(&self) -> (&str, String, String) {
        (
            self.host.as_str(),
            self.owner.to_ascii_lowercase(),
            self.name.to_ascii_lowercase(),
        )
    }
}

impl PartialEq for RepositoryIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host
            && self.owner.eq_ignore_ascii_case(&other.owner)
            && self.name.eq_ignore_ascii_case(&other.name)
    }
}

impl Eq for RepositoryIdentity {}

impl Hash for RepositoryIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl PartialOrd for RepositoryIdentity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RepositoryIdentity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl std::fmt::Display for RepositoryIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.host, self.owner, self.name)
    }
}

impl From<RepositoryIdentity> for String {
    fn from(value: RepositoryIdentity) -> Self {
        value.html_url()
    }
}

impl TryFrom<String> for RepositoryIdentity {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("not a repository URL: '{value}'"))
    }
}

fn strip_prefix_ignore_case<'a>(value: &'a str, prefix: &str) -> Option<&'a str> {
    let head = value.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        value.get(prefix.len()..)
    } else {
        None
    }
}

/// Extracts the host from an authority, dropping userinfo and port.
fn host_of(authority: &str) -> Option<String> {
    let without_user = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
    let host = without_user
        .split_once(':')
        .map_or(without_user, |(h, _)| h)
        .trim();
    if host.is_empty() || host.contains(char::is_whitespace) {
        None
    } else {
        Some(host.to_ascii_lowercase())
    }
}

/// Splits `owner/repo[.git][/]` into its two segments.
fn owner_and_name(path: &str) -> Option<(&str, &str)> {
    let path = path.trim_start_matches('/').trim_end_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);
    let (owner, name) = path.split_once('/')?;
    let valid = |s: &str| !s.is_empty() && !s.contains(['/', ' ', '\t']);
    if valid(owner) && valid(name) {
        Some((owner, name))
    } else {
        None
    }
}

#[cfg(test)]
#[path = "identifiers_tests.rs"]
mod tests;
