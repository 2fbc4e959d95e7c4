//! Identity of the host user, baked into the container images.

/// uid, gid and login name used for the in-container user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostUser {
    pub uid: u32,
    pub gid: u32,
    pub username: String,
}

impl HostUser {
    #[cfg(unix)]
    #[must_use]
    pub fn current() -> Self {
        // SAFETY: getuid/getgid cannot fail and touch no memory.
        let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
        Self {
            uid,
            gid,
            username: username_from_env(),
        }
    }

    #[cfg(not(unix))]
    #[must_use]
    pub fn current() -> Self {
        Self {
            uid: 1000,
            gid: 1000,
            username: username_from_env(),
        }
    }

    /// uid:gid as used by compose `user:`.
    #[must_use]
    pub fn uid_gid(&self) -> String {
        format!("{}:{}", self.uid, self.gid)
    }
}

fn username_from_env() -> String {
    let raw = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_default();
    // Windows domain logins and spaces are not valid Linux user names.
    let cleaned: String = raw
        .rsplit('\\')
        .next()
        .unwrap_or_default()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() { "berth".to_string() } else { cleaned.to_lowercase() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uid_gid() {
        let user = HostUser {
            uid: 501,
            gid: 20,
            username: "dev".into(),
        };
        assert_eq!(user.uid_gid(), "501:20");
    }

    #[test]
    fn test_current_has_a_username() {
        assert!(!HostUser::current().username.is_empty());
    }
}
