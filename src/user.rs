//! The invoking user and their directories.

use nix::unistd::{Group, Uid, User};
use std::path::PathBuf;

use crate::config::{Config, DirectoryStructure};
use crate::error::{Error, Result};

/// Who runs a plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub name: String,
    pub uid: u32,
    pub home: PathBuf,
}

impl UserInfo {
    /// Root of the user's evaluation tree.
    pub fn base_dir(&self, config: &Config) -> PathBuf {
        let base = config.get_or("base_dir", "evaluation_system");
        match config.directory_structure() {
            DirectoryStructure::Local => self.home.join(base),
            DirectoryStructure::Central => {
                let location = config
                    .get_opt("base_dir_location")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| self.home.clone());
                location.join(base).join(&self.name)
            }
        }
    }

    pub fn output_dir(&self, config: &Config, tool: &str) -> PathBuf {
        self.tool_dir(config, "output", tool)
    }

    pub fn plots_dir(&self, config: &Config, tool: &str) -> PathBuf {
        self.tool_dir(config, "plots", tool)
    }

    pub fn cache_dir(&self, config: &Config, tool: &str) -> PathBuf {
        self.tool_dir(config, "cache", tool)
    }

    fn tool_dir(&self, config: &Config, kind: &str, tool: &str) -> PathBuf {
        self.base_dir(config).join(kind).join(tool.to_lowercase())
    }
}

/// Source of the current user and group membership.
pub trait UserProvider: Send + Sync {
    fn current_user(&self) -> Result<UserInfo>;

    fn is_member_of(&self, user: &UserInfo, group: &str) -> Result<bool>;
}

/// Reads the OS user and group databases.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemUserProvider;

impl UserProvider for SystemUserProvider {
    fn current_user(&self) -> Result<UserInfo> {
        let uid = Uid::current();
        let user = User::from_uid(uid)
            .map_err(|e| Error::Configuration(format!("cannot look up uid {}: {}", uid, e)))?
            .ok_or_else(|| Error::Configuration(format!("no passwd entry for uid {}", uid)))?;
        Ok(UserInfo {
            name: user.name,
            uid: uid.as_raw(),
            home: user.dir,
        })
    }

    fn is_member_of(&self, user: &UserInfo, group: &str) -> Result<bool> {
        let Some(grp) = Group::from_name(group)
            .map_err(|e| Error::Configuration(format!("cannot look up group {}: {}", group, e)))?
        else {
            return Ok(false);
        };
        if grp.mem.iter().any(|m| *m == user.name) {
            return Ok(true);
        }
        // Primary group membership is not listed in the member list.
        let primary = User::from_uid(Uid::from_raw(user.uid))
            .ok()
            .flatten()
            .map(|u| u.gid);
        Ok(primary == Some(grp.gid))
    }
}

/// Fixed user and group list.
#[derive(Debug, Clone)]
pub struct StaticUserProvider {
    pub user: UserInfo,
    pub groups: Vec<String>,
}

impl StaticUserProvider {
    pub fn new(user: UserInfo) -> Self {
        Self {
            user,
            groups: Vec::new(),
        }
    }

    pub fn with_group(mut self, group: &str) -> Self {
        self.groups.push(group.to_string());
        self
    }
}

impl UserProvider for StaticUserProvider {
    fn current_user(&self) -> Result<UserInfo> {
        Ok(self.user.clone())
    }

    fn is_member_of(&self, user: &UserInfo, group: &str) -> Result<bool> {
        Ok(user.name == self.user.name && self.groups.iter().any(|g| g == group))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn user() -> UserInfo {
        UserInfo {
            name: "jdoe".to_string(),
            uid: 1000,
            home: PathBuf::from("/home/jdoe"),
        }
    }

    #[test]
    fn local_layout_under_home() {
        let cfg = Config::from_str(
            "[evaluation_system]\nbase_dir = evaluation_system\ndirectory_structure_type = local\n",
            Path::new("/"),
        )
        .unwrap();
        assert_eq!(
            user().output_dir(&cfg, "DummyPlugin"),
            PathBuf::from("/home/jdoe/evaluation_system/output/dummyplugin")
        );
    }

    #[test]
    fn central_layout_under_location() {
        let cfg = Config::from_str(
            "[evaluation_system]\nbase_dir = freva\nbase_dir_location = /work\ndirectory_structure_type = central\n",
            Path::new("/"),
        )
        .unwrap();
        assert_eq!(user().base_dir(&cfg), PathBuf::from("/work/freva/jdoe"));
        assert_eq!(
            user().plots_dir(&cfg, "x"),
            PathBuf::from("/work/freva/jdoe/plots/x")
        );
    }

    #[test]
    fn static_provider_groups() {
        let p = StaticUserProvider::new(user()).with_group("externals");
        assert!(p.is_member_of(&user(), "externals").unwrap());
        assert!(!p.is_member_of(&user(), "staff").unwrap());
    }

    #[test]
    fn system_provider_knows_current_user() {
        let u = SystemUserProvider.current_user().unwrap();
        assert!(!u.name.is_empty());
        assert!(!SystemUserProvider
            .is_member_of(&u, "no-such-group-for-freva-tests")
            .unwrap());
    }
}
