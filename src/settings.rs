// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Typed settings cascade and instance configuration.
//!
//! Options live in layered [`SettingsSet`]s: per-zone → global (from the
//! `idnsConfigObject` entry) → local (instance configuration) → built-in
//! defaults. Reads walk up the chain; writes target one explicit layer.
//!
//! The instance configuration is deserialized from YAML with the same
//! keys the original `dynamic-db` configuration block used; obsolete
//! options are accepted and ignored with a log.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::constants::{
    DEFAULT_DIRECTORY_PREFIX, DEFAULT_RECONNECT_INTERVAL_SECS, DEFAULT_SASL_MECH,
    DEFAULT_TIMEOUT_SECS, MIN_POOL_CONNECTIONS,
};
use crate::entry::Entry;
use crate::errors::{SyncError, SyncResult};

/// Value kinds a setting can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Str,
    Uint,
    Bool,
}

/// A typed setting value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Str(String),
    Uint(u32),
    Bool(bool),
}

/// Outcome of updating a setting from an LDAP entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingUpdate {
    /// The attribute was present and the stored value changed or was set
    Updated,
    /// The attribute is absent; nothing was stored
    Ignored,
}

/// Options recognized in the instance configuration layer.
const LOCAL_OPTIONS: &[(&str, Kind)] = &[
    ("uri", Kind::Str),
    ("connections", Kind::Uint),
    ("reconnect_interval", Kind::Uint),
    ("timeout", Kind::Uint),
    ("base", Kind::Str),
    ("auth_method", Kind::Str),
    ("bind_dn", Kind::Str),
    ("password", Kind::Str),
    ("krb5_principal", Kind::Str),
    ("krb5_keytab", Kind::Str),
    ("sasl_mech", Kind::Str),
    ("sasl_user", Kind::Str),
    ("fake_mname", Kind::Str),
    ("sync_ptr", Kind::Bool),
    ("dyn_update", Kind::Bool),
    ("directory", Kind::Str),
];

/// Options the global configuration entry may override.
const GLOBAL_OPTIONS: &[(&str, Kind)] = &[("dyn_update", Kind::Bool), ("sync_ptr", Kind::Bool)];

/// Zone-specific options from `idnsZone` entries.
///
/// The forwarding attributes (`idnsForwardPolicy`, `idnsForwarders`) are
/// not part of this set: the forwarder configurator reads them straight
/// off the entry, because they also apply to forward-zone and
/// configuration entries that never own a zone settings layer.
const ZONE_OPTIONS: &[(&str, Kind)] = &[
    ("dyn_update", Kind::Bool),
    ("sync_ptr", Kind::Bool),
    ("update_policy", Kind::Str),
    ("allow_query", Kind::Str),
    ("allow_transfer", Kind::Str),
];

/// Options that are no longer supported but still accepted in input.
const OBSOLETE_OPTIONS: &[&str] = &["cache_ttl", "psearch", "serial_autoincrement", "zone_refresh"];

/// One layer of the settings cascade.
#[derive(Debug)]
pub struct SettingsSet {
    name: String,
    declared: &'static [(&'static str, Kind)],
    parent: Option<Arc<SettingsSet>>,
    values: RwLock<HashMap<&'static str, Value>>,
}

impl SettingsSet {
    /// Built-in defaults, the root of every chain.
    #[must_use]
    pub fn defaults() -> Arc<Self> {
        let set = Self {
            name: "defaults".to_string(),
            declared: LOCAL_OPTIONS,
            parent: None,
            values: RwLock::new(HashMap::new()),
        };
        // uri and base deliberately have no default: they are required.
        set.set_unchecked("connections", Value::Uint(MIN_POOL_CONNECTIONS));
        set.set_unchecked("reconnect_interval", Value::Uint(DEFAULT_RECONNECT_INTERVAL_SECS));
        set.set_unchecked("timeout", Value::Uint(DEFAULT_TIMEOUT_SECS));
        set.set_unchecked("auth_method", Value::Str("none".to_string()));
        set.set_unchecked("bind_dn", Value::Str(String::new()));
        set.set_unchecked("password", Value::Str(String::new()));
        set.set_unchecked("krb5_principal", Value::Str(String::new()));
        set.set_unchecked("krb5_keytab", Value::Str(String::new()));
        set.set_unchecked("sasl_mech", Value::Str(DEFAULT_SASL_MECH.to_string()));
        set.set_unchecked("sasl_user", Value::Str(String::new()));
        set.set_unchecked("fake_mname", Value::Str(String::new()));
        set.set_unchecked("sync_ptr", Value::Bool(false));
        set.set_unchecked("dyn_update", Value::Bool(false));
        set.set_unchecked("directory", Value::Str(String::new()));
        Arc::new(set)
    }

    /// Instance-configuration layer.
    #[must_use]
    pub fn local(instance: &str, parent: Arc<SettingsSet>) -> Arc<Self> {
        Arc::new(Self {
            name: format!("local settings for instance {instance}"),
            declared: LOCAL_OPTIONS,
            parent: Some(parent),
            values: RwLock::new(HashMap::new()),
        })
    }

    /// Global layer fed from the `idnsConfigObject` entry.
    #[must_use]
    pub fn global(instance: &str, parent: Arc<SettingsSet>) -> Arc<Self> {
        Arc::new(Self {
            name: format!("global settings for instance {instance}"),
            declared: GLOBAL_OPTIONS,
            parent: Some(parent),
            values: RwLock::new(HashMap::new()),
        })
    }

    /// Per-zone layer fed from the zone's `idnsZone` entry.
    #[must_use]
    pub fn zone(dn: &str, parent: Arc<SettingsSet>) -> Arc<Self> {
        Arc::new(Self {
            name: format!("zone settings for {dn}"),
            declared: ZONE_OPTIONS,
            parent: Some(parent),
            values: RwLock::new(HashMap::new()),
        })
    }

    /// Layer name for diagnostics.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn declared_key(&self, option: &str) -> Option<(&'static str, Kind)> {
        self.declared
            .iter()
            .find(|(name, _)| *name == option)
            .copied()
    }

    fn get(&self, option: &str) -> Option<Value> {
        if let Some((key, _)) = self.declared_key(option) {
            if let Some(value) = self.values.read().expect("settings lock").get(key) {
                return Some(value.clone());
            }
        }
        self.parent.as_ref().and_then(|parent| parent.get(option))
    }

    /// String option; walks the chain.
    pub fn get_str(&self, option: &str) -> SyncResult<String> {
        match self.get(option) {
            Some(Value::Str(s)) => Ok(s),
            Some(_) => Err(SyncError::UnexpectedToken(format!(
                "option '{option}' is not a string"
            ))),
            None => Err(SyncError::NotFound(format!(
                "option '{option}' has no value in {}",
                self.name
            ))),
        }
    }

    /// Unsigned option; walks the chain.
    pub fn get_uint(&self, option: &str) -> SyncResult<u32> {
        match self.get(option) {
            Some(Value::Uint(v)) => Ok(v),
            Some(_) => Err(SyncError::UnexpectedToken(format!(
                "option '{option}' is not an integer"
            ))),
            None => Err(SyncError::NotFound(format!(
                "option '{option}' has no value in {}",
                self.name
            ))),
        }
    }

    /// Boolean option; walks the chain.
    pub fn get_bool(&self, option: &str) -> SyncResult<bool> {
        match self.get(option) {
            Some(Value::Bool(v)) => Ok(v),
            Some(_) => Err(SyncError::UnexpectedToken(format!(
                "option '{option}' is not a boolean"
            ))),
            None => Err(SyncError::NotFound(format!(
                "option '{option}' has no value in {}",
                self.name
            ))),
        }
    }

    /// Store a value in this layer.
    ///
    /// # Errors
    ///
    /// `NotFound` when the option is not declared for this layer, and
    /// `UnexpectedToken` on a kind mismatch.
    pub fn set(&self, option: &str, value: Value) -> SyncResult<()> {
        let (key, kind) = self.declared_key(option).ok_or_else(|| {
            SyncError::NotFound(format!("option '{option}' is not declared in {}", self.name))
        })?;
        let matches_kind = matches!(
            (&value, kind),
            (Value::Str(_), Kind::Str) | (Value::Uint(_), Kind::Uint) | (Value::Bool(_), Kind::Bool)
        );
        if !matches_kind {
            return Err(SyncError::UnexpectedToken(format!(
                "wrong value kind for option '{option}'"
            )));
        }
        self.values.write().expect("settings lock").insert(key, value);
        Ok(())
    }

    fn set_unchecked(&self, key: &'static str, value: Value) {
        self.values.write().expect("settings lock").insert(key, value);
    }

    /// Update one option of this layer from an LDAP entry attribute.
    ///
    /// Absent attributes leave the stored value untouched and report
    /// [`SettingUpdate::Ignored`].
    pub fn update_from_entry(
        &self,
        option: &str,
        attr: &str,
        entry: &Entry,
    ) -> SyncResult<SettingUpdate> {
        let (_, kind) = self.declared_key(option).ok_or_else(|| {
            SyncError::NotFound(format!("option '{option}' is not declared in {}", self.name))
        })?;
        let Some(text) = entry.first_value(attr) else {
            return Ok(SettingUpdate::Ignored);
        };

        let value = match kind {
            Kind::Str => Value::Str(text.to_string()),
            Kind::Uint => Value::Uint(text.parse::<u32>().map_err(|_| {
                SyncError::UnexpectedToken(format!("attribute {attr} value '{text}' is not a number"))
            })?),
            Kind::Bool => match entry.bool_value(attr) {
                Some(flag) => Value::Bool(flag),
                None => {
                    return Err(SyncError::UnexpectedToken(format!(
                        "attribute {attr} value '{text}' is not TRUE/FALSE"
                    )))
                }
            },
        };
        debug!(set = %self.name, option, attr, "setting updated from LDAP entry");
        self.set(option, value)?;
        Ok(SettingUpdate::Updated)
    }
}

/// Authentication methods supported for the LDAP bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    None,
    Simple,
    Sasl,
}

impl FromStr for AuthMethod {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("none") {
            Ok(Self::None)
        } else if s.eq_ignore_ascii_case("simple") {
            Ok(Self::Simple)
        } else if s.eq_ignore_ascii_case("sasl") {
            Ok(Self::Sasl)
        } else {
            Err(SyncError::UnexpectedToken(format!(
                "unknown authentication method '{s}'"
            )))
        }
    }
}

/// Instance configuration, deserialized from YAML.
///
/// Keys match the original configuration block one to one; unknown keys
/// are rejected, obsolete keys are accepted and ignored with a log.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstanceConfig {
    /// Instance name, used for the default working directory
    #[serde(default = "default_instance_name")]
    pub name: String,
    pub uri: Option<String>,
    pub base: Option<String>,
    pub connections: Option<u32>,
    pub reconnect_interval: Option<u32>,
    pub timeout: Option<u32>,
    pub auth_method: Option<String>,
    pub bind_dn: Option<String>,
    pub password: Option<String>,
    pub krb5_principal: Option<String>,
    pub krb5_keytab: Option<String>,
    pub sasl_mech: Option<String>,
    pub sasl_user: Option<String>,
    pub fake_mname: Option<String>,
    pub sync_ptr: Option<bool>,
    pub dyn_update: Option<bool>,
    pub directory: Option<String>,
    // Obsolete options, accepted for compatibility
    pub cache_ttl: Option<String>,
    pub psearch: Option<String>,
    pub serial_autoincrement: Option<String>,
    pub zone_refresh: Option<String>,
}

fn default_instance_name() -> String {
    "default".to_string()
}

impl InstanceConfig {
    /// Parse a YAML document.
    pub fn from_yaml(input: &str) -> SyncResult<Self> {
        serde_yaml::from_str(input)
            .map_err(|err| SyncError::UnexpectedToken(format!("invalid configuration: {err}")))
    }

    /// Copy the provided values into the local settings layer.
    pub fn fill(&self, local: &SettingsSet) -> SyncResult<()> {
        let mut strings: Vec<(&str, &Option<String>)> = vec![
            ("uri", &self.uri),
            ("base", &self.base),
            ("auth_method", &self.auth_method),
            ("bind_dn", &self.bind_dn),
            ("password", &self.password),
            ("krb5_principal", &self.krb5_principal),
            ("krb5_keytab", &self.krb5_keytab),
            ("sasl_mech", &self.sasl_mech),
            ("sasl_user", &self.sasl_user),
            ("fake_mname", &self.fake_mname),
            ("directory", &self.directory),
        ];
        for (option, value) in strings.drain(..) {
            if let Some(value) = value {
                local.set(option, Value::Str(value.clone()))?;
            }
        }
        for (option, value) in [
            ("connections", self.connections),
            ("reconnect_interval", self.reconnect_interval),
            ("timeout", self.timeout),
        ] {
            if let Some(value) = value {
                local.set(option, Value::Uint(value))?;
            }
        }
        for (option, value) in [("sync_ptr", self.sync_ptr), ("dyn_update", self.dyn_update)] {
            if let Some(value) = value {
                local.set(option, Value::Bool(value))?;
            }
        }
        for (option, value) in [
            ("cache_ttl", &self.cache_ttl),
            ("psearch", &self.psearch),
            ("serial_autoincrement", &self.serial_autoincrement),
            ("zone_refresh", &self.zone_refresh),
        ] {
            if value.is_some() {
                debug_assert!(OBSOLETE_OPTIONS.contains(&option));
                error!(option, "option is not supported, ignoring");
            }
        }
        Ok(())
    }
}

/// Validate the instance-level settings and derive dependent values.
///
/// Performs the startup checks: working-directory defaulting and
/// creation, pool size, authentication option consistency and the
/// required `uri`/`base` keys. Missing required keys are fatal.
pub fn validate_local_settings(instance: &str, local: &SettingsSet) -> SyncResult<()> {
    if instance.is_empty() {
        return Err(SyncError::UnexpectedToken(
            "instance name cannot be empty".to_string(),
        ));
    }

    // Use the instance name as the default working directory.
    let mut directory = local.get_str("directory")?;
    if directory.is_empty() {
        directory = format!("{DEFAULT_DIRECTORY_PREFIX}/{instance}");
    }
    if !directory.ends_with('/') {
        directory.push('/');
    }
    local.set("directory", Value::Str(directory.clone()))?;
    create_private_dirs(Path::new(&directory))?;

    let connections = local.get_uint("connections")?;
    if connections < MIN_POOL_CONNECTIONS {
        // The watcher needs one connection and update paths a second one.
        error!(connections, "at least two connections are required");
        return Err(SyncError::UnexpectedToken(
            "at least two connections are required".to_string(),
        ));
    }

    let auth_method: AuthMethod = local.get_str("auth_method")?.parse()?;
    let bind_dn = local.get_str("bind_dn")?;
    let password = local.get_str("password")?;
    let sasl_user = local.get_str("sasl_user")?;
    let krb5_principal = local.get_str("krb5_principal")?;
    let sasl_mech = local.get_str("sasl_mech")?;

    if auth_method != AuthMethod::Simple && (!bind_dn.is_empty() || !password.is_empty()) {
        return Err(SyncError::UnexpectedToken(
            "options 'bind_dn' and 'password' are allowed only for auth_method 'simple'"
                .to_string(),
        ));
    }
    if auth_method == AuthMethod::Simple && (bind_dn.is_empty() || password.is_empty()) {
        error!("auth_method 'simple' requires 'bind_dn' and 'password'");
        info!("for anonymous bind please use auth_method 'none'");
        return Err(SyncError::UnexpectedToken(
            "auth_method 'simple' requires 'bind_dn' and 'password'".to_string(),
        ));
    }
    if auth_method != AuthMethod::Sasl && (!sasl_user.is_empty() || !krb5_principal.is_empty()) {
        return Err(SyncError::UnexpectedToken(
            "options 'sasl_user' and 'krb5_principal' are effective only with auth_method 'sasl'"
                .to_string(),
        ));
    }

    if auth_method == AuthMethod::Sasl && sasl_mech.eq_ignore_ascii_case("GSSAPI") {
        if krb5_principal.is_empty() {
            if sasl_user.is_empty() {
                let hostname = read_hostname().ok_or_else(|| {
                    SyncError::UnexpectedToken(
                        "SASL mech GSSAPI defined but krb5_principal and sasl_user are empty \
                         and the hostname could not be determined"
                            .to_string(),
                    )
                })?;
                let principal = format!("DNS/{hostname}");
                debug!(principal = %principal, "krb5_principal and sasl_user are empty, using default");
                local.set("krb5_principal", Value::Str(principal))?;
            } else {
                local.set("krb5_principal", Value::Str(sasl_user))?;
            }
        }
    } else if auth_method == AuthMethod::Sasl {
        info!("SASL mechanisms other than GSSAPI+Kerberos are untested; expect problems");
    }

    // Required keys; absence is fatal at startup.
    for option in ["uri", "base"] {
        if let Err(err) = local.get_str(option) {
            error!(option, "required option is missing");
            return Err(err);
        }
    }

    Ok(())
}

/// Create a directory chain with mode 0700.
pub fn create_private_dirs(path: &Path) -> SyncResult<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::create_dir_all(path)?;
    let perms = std::fs::Permissions::from_mode(0o700);
    std::fs::set_permissions(path, perms)?;
    Ok(())
}

fn read_hostname() -> Option<String> {
    let hostname = std::fs::read_to_string("/etc/hostname").ok()?;
    let hostname = hostname.trim();
    if hostname.is_empty() {
        warn!("/etc/hostname is empty");
        return None;
    }
    Some(hostname.to_string())
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod settings_tests;
