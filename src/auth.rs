use std::collections::HashMap;

use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

use crate::config::Config;
use crate::model::{Principal, Role};

/// Shared cleartext password for every login.
#[derive(Debug)]
pub struct CoworkAuthSource {
    password: String,
}

impl CoworkAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for CoworkAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

/// Login user → role. Users not listed get the default role.
#[derive(Debug, Clone)]
pub struct RoleDirectory {
    roles: HashMap<String, Role>,
    default_role: Role,
}

impl RoleDirectory {
    pub fn new(roles: HashMap<String, Role>, default_role: Role) -> Self {
        Self { roles, default_role }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.roles.clone(), config.default_role)
    }

    pub fn role_of(&self, user: &str) -> Role {
        self.roles.get(user).copied().unwrap_or(self.default_role)
    }

    /// The principal a connection acts as: its login user inside the
    /// organization named by the connection's database.
    pub fn principal(&self, user: &str, organization: &str) -> Principal {
        Principal::new(user, self.role_of(user), organization)
    }
}
