/*!
Configuration data and the shared state handed to request handlers.
*/
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;

use serde::Deserialize;

use crate::{
    store::Store,
    user::Role,
};

#[derive(Deserialize)]
struct ConfigFile {
    db_connect_string: Option<String>,
    admin_uname: Option<String>,
    admin_email: Option<String>,
    webhook_secret: Option<String>,
    webhook_default_role: Option<String>,
    webhook_placeholder_credential: Option<String>,
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Debug)]
pub struct Cfg {
    pub db_connect_string: String,
    pub default_admin_uname: String,
    pub default_admin_email: String,
    /// Shared secret for identity-provider webhook signatures. May carry a
    /// `whsec_` prefix over base64 key material, as issued by the provider.
    pub webhook_secret: String,
    /// Role given to users created through the identity webhook.
    pub webhook_default_role: Role,
    /// Credential column value for webhook-created users; real credentials
    /// stay with the identity provider.
    pub webhook_placeholder_credential: String,
    pub addr: SocketAddr,
}

impl std::default::Default for Cfg {
    fn default() -> Self {
        Self {
            db_connect_string: "host=localhost user=ecole_test password='ecole_test' dbname=ecole_store_test".to_owned(),
            default_admin_uname: "root".to_owned(),
            default_admin_email: "admin@ecole.not.an.address".to_owned(),
            webhook_secret: "whsec_c2VjcmV0LXNpZ25pbmcta2V5".to_owned(),
            webhook_default_role: Role::Student,
            webhook_placeholder_credential: "external".to_owned(),
            addr: SocketAddr::new(
                "0.0.0.0".parse().unwrap(),
                8001
            ),
        }
    }
}

impl Cfg {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let path = path.as_ref();
        let file_contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Unable to read config file: {}", &e))?;
        Self::from_toml(&file_contents)
    }

    /// Merge the values present in `text` over the defaults.
    pub fn from_toml(text: &str) -> Result<Self, String> {
        let cf: ConfigFile = toml::from_str(text)
            .map_err(|e| format!("Unable to deserialize config file: {}", &e))?;

        let mut c = Self::default();

        if let Some(s) = cf.db_connect_string {
            c.db_connect_string = s;
        }
        if let Some(s) = cf.admin_uname {
            c.default_admin_uname = s;
        }
        if let Some(s) = cf.admin_email {
            c.default_admin_email = s;
        }
        if let Some(s) = cf.webhook_secret {
            c.webhook_secret = s;
        }
        if let Some(s) = cf.webhook_default_role {
            c.webhook_default_role = s.parse()
                .map_err(|e| format!("Bad webhook_default_role: {}", &e))?;
        }
        if let Some(s) = cf.webhook_placeholder_credential {
            c.webhook_placeholder_credential = s;
        }
        if let Some(s) = cf.host {
            c.addr.set_ip(
                s.parse().map_err(|e| format!(
                    "Error parsing {:?} as IP address: {}",
                    &s, &e
                ))?
            );
        }
        if let Some(n) = cf.port {
            c.addr.set_port(n);
        }

        Ok(c)
    }
}

/**
This guy hauls the store handle, the webhook defaults, and the cached
list-view renderings around in an `axum::Extension` for the handlers
that need them.
*/
#[derive(Debug)]
pub struct Glob {
    pub store: Store,
    pub default_admin_uname: String,
    pub webhook_secret: String,
    pub webhook_default_role: Role,
    pub webhook_placeholder_credential: String,
    pub addr: SocketAddr,
    views: HashMap<String, String>,
}

impl Glob {
    /// Assemble shared state from a configuration and a store handle.
    /// Touches nothing; schema and bootstrap checks happen in
    /// `glob_from_cfg`.
    pub fn new(store: Store, cfg: Cfg) -> Self {
        Self {
            store,
            default_admin_uname: cfg.default_admin_uname,
            webhook_secret: cfg.webhook_secret,
            webhook_default_role: cfg.webhook_default_role,
            webhook_placeholder_credential: cfg.webhook_placeholder_credential,
            addr: cfg.addr,
            views: HashMap::new(),
        }
    }

    pub fn store(&self) -> &Store { &self.store }

    /// Fetch a cached list-view rendering, if one survives.
    pub fn cached_view(&self, key: &str) -> Option<&str> {
        self.views.get(key).map(|s| s.as_str())
    }

    pub fn cache_view(&mut self, key: String, body: String) {
        log::trace!("Glob::cache_view( {:?}, [ {} bytes ] ) called.", &key, body.len());
        self.views.insert(key, body);
    }

    /// Drop every cached rendering of views under `path_prefix`.
    ///
    /// Called after each successful mutation so the next read of the
    /// affected list reflects the write.
    pub fn invalidate_views(&mut self, path_prefix: &str) {
        let before = self.views.len();
        self.views.retain(|key, _| !key.starts_with(path_prefix));
        log::trace!(
            "Glob::invalidate_views( {:?} ): {} entries dropped.",
            path_prefix, before - self.views.len()
        );
    }
}

/// Load system configuration, ensure the database schema, and assure the
/// existence of the default admin user.
pub async fn load_configuration<P: AsRef<Path>>(path: P) -> Result<Glob, String> {
    let cfg = Cfg::from_file(path.as_ref())?;
    log::info!("Configuration file read:\n{:#?}", &cfg);

    glob_from_cfg(cfg).await
}

pub async fn glob_from_cfg(cfg: Cfg) -> Result<Glob, String> {
    log::trace!("Checking state of data DB...");
    let store = Store::new(cfg.db_connect_string.clone());
    if let Err(e) = store.ensure_db_schema().await {
        let estr = format!("Unable to ensure state of data DB: {}", e.display());
        return Err(estr);
    }
    log::trace!("...data DB okay.");

    log::trace!("Checking existence of default Admin...");
    match store.get_user_by_uname(&cfg.default_admin_uname).await {
        Err(e) => {
            let estr = format!(
                "Error checking existence of default Admin ({}): {}",
                &cfg.default_admin_uname, e.display()
            );
            return Err(estr);
        },
        Ok(None) => {
            log::info!(
                "Default Admin ({}) doesn't exist; inserting.",
                &cfg.default_admin_uname
            );
            let admin = crate::user::NewUser {
                id: uuid::Uuid::new_v4().to_string(),
                uname: cfg.default_admin_uname.clone(),
                first_name: "Default".to_owned(),
                last_name: "Admin".to_owned(),
                email: cfg.default_admin_email.clone(),
                phone: None,
                address: None,
                role: Role::Admin,
                sex: crate::user::Gender::Other,
                birth_date: None,
                credential: cfg.webhook_placeholder_credential.clone(),
            };
            if let Err(e) = store.insert_user(&admin).await {
                let estr = format!(
                    "Error inserting default Admin: {}", e.display()
                );
                return Err(estr);
            }
        },
        Ok(Some(_)) => {},
    }
    log::trace!("Default Admin OK.");

    Ok(Glob::new(store, cfg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::ensure_logging;

    #[test]
    fn defaults_hold_when_file_is_empty() {
        ensure_logging();
        let c = Cfg::from_toml("").unwrap();
        let d = Cfg::default();
        assert_eq!(c.db_connect_string, d.db_connect_string);
        assert_eq!(c.default_admin_uname, d.default_admin_uname);
        assert_eq!(c.webhook_default_role, Role::Student);
        assert_eq!(c.webhook_placeholder_credential, "external");
        assert_eq!(c.addr, d.addr);
    }

    #[test]
    fn file_values_override_defaults() {
        ensure_logging();
        let text = r#"
admin_uname = "directrice"
webhook_default_role = "Teacher"
webhook_placeholder_credential = "managed-elsewhere"
host = "127.0.0.1"
port = 9999
"#;
        let c = Cfg::from_toml(text).unwrap();
        assert_eq!(c.default_admin_uname, "directrice");
        assert_eq!(c.webhook_default_role, Role::Teacher);
        assert_eq!(c.webhook_placeholder_credential, "managed-elsewhere");
        assert_eq!(c.addr.port(), 9999);
        assert!(c.addr.ip().is_loopback());
    }

    #[test]
    fn bad_role_in_file_is_an_error() {
        ensure_logging();
        assert!(Cfg::from_toml("webhook_default_role = \"Janitor\"").is_err());
    }

    #[test]
    fn view_invalidation_is_by_prefix() {
        ensure_logging();
        let mut glob = Glob::new(Store::new(String::new()), Cfg::default());

        glob.cache_view("/users?query=&page=1&role=".to_owned(), "u1".to_owned());
        glob.cache_view("/users?query=dupont&page=2&role=".to_owned(), "u2".to_owned());
        glob.cache_view("/lessons?query=&page=1".to_owned(), "l1".to_owned());

        glob.invalidate_views("/users");

        assert!(glob.cached_view("/users?query=&page=1&role=").is_none());
        assert!(glob.cached_view("/users?query=dupont&page=2&role=").is_none());
        assert_eq!(glob.cached_view("/lessons?query=&page=1"), Some("l1"));
    }
}
