//! Home-directory lookup, consumed by tilde expansion.
//!
//! Authentication proper is the embedding server's business; the router
//! only needs to map `~user` to a home directory.

use async_trait::async_trait;

#[async_trait]
pub trait Authn: Send + Sync {
    /// Returns the home directory of `user`, or `None` if no such user.
    async fn home_dir(&self, user: &str) -> Option<String>;
}

/// Lookup against the system user database via `getpwnam_r(3)`.
#[cfg(unix)]
pub struct SystemAuthn;

#[cfg(unix)]
#[async_trait]
impl Authn for SystemAuthn {
    async fn home_dir(&self, user: &str) -> Option<String> {
        let user = user.to_owned();
        // getpwnam_r may touch NSS backends; keep it off the reactor.
        tokio::task::spawn_blocking(move || passwd_home(&user)).await.ok().flatten()
    }
}

#[cfg(unix)]
fn passwd_home(user: &str) -> Option<String> {
    use std::ffi::{CStr, CString};

    let name = CString::new(user).ok()?;
    let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
    let mut buf = vec![0u8; 4096];
    let mut result: *mut libc::passwd = std::ptr::null_mut();

    let rc = unsafe {
        libc::getpwnam_r(
            name.as_ptr(),
            &mut pwd,
            buf.as_mut_ptr().cast(),
            buf.len(),
            &mut result,
        )
    };

    if rc != 0 || result.is_null() || pwd.pw_dir.is_null() {
        return None;
    }

    let dir = unsafe { CStr::from_ptr(pwd.pw_dir) };
    dir.to_str().ok().map(str::to_owned)
}

/// Table-backed lookup for tests and virtual-user embedders.
#[derive(Debug, Default)]
pub struct StaticAuthn {
    users: std::collections::HashMap<String, String>,
}

impl StaticAuthn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, user: &str, home: &str) -> Self {
        self.users.insert(user.to_owned(), home.to_owned());
        self
    }
}

#[async_trait]
impl Authn for StaticAuthn {
    async fn home_dir(&self, user: &str) -> Option<String> {
        self.users.get(user).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_authn_resolves_known_users() {
        let authn = StaticAuthn::new().with_user("ftp", "/srv/ftp");
        assert_eq!(authn.home_dir("ftp").await.as_deref(), Some("/srv/ftp"));
        assert_eq!(authn.home_dir("nobody-here").await, None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn system_authn_finds_root() {
        let home = SystemAuthn.home_dir("root").await;
        assert!(home.is_some());
    }
}
