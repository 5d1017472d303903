// UserTemplateStore: per-user permission templates (allowed modules, SSH
// access, resource limits) used by the pipeline's permission check.
//
// Grounded on `utemplates/types.go` (UserTemplate{Modules,SSH,Limits},
// UserLimits{Diskspace,Traffic,DBs,DBUsers,FTPs,WebDomains,DNSDomains,
// Emails}) and `utemplates/utemplates.go`. Stored through the same
// [`crate::kv::KvStore`] contract as the journal, since the original keeps
// both in the same boltdb file.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::kv::{KvError, KvStore};

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error(transparent)]
    Kv(#[from] KvError),
    #[error("failed to encode template: {0}")]
    Encode(String),
    #[error("failed to decode template: {0}")]
    Decode(String),
    #[error("no template named {0}")]
    NotFound(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserLimits {
    pub diskspace: i64,
    pub traffic: i64,
    pub dbs: i64,
    pub db_users: i64,
    pub ftps: i64,
    pub web_domains: i64,
    pub dns_domains: i64,
    pub emails: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserTemplate {
    pub name: String,
    pub modules: HashSet<String>,
    pub ssh: bool,
    pub limits: UserLimits,
}

impl UserTemplate {
    pub fn has_module(&self, module: &str) -> bool {
        self.modules.contains(module)
    }
}

const BUCKET: &str = "Templates";

pub struct UserTemplateStore<S: KvStore> {
    store: S,
}

impl<S: KvStore> UserTemplateStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn save(&self, template: &UserTemplate) -> Result<(), TemplateError> {
        let value = bincode::serialize(template).map_err(|e| TemplateError::Encode(e.to_string()))?;
        self.store.put(BUCKET, template.name.as_bytes(), &value)?;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<UserTemplate, TemplateError> {
        let raw = self
            .store
            .get(BUCKET, name.as_bytes())?
            .ok_or_else(|| TemplateError::NotFound(name.to_string()))?;
        bincode::deserialize(&raw).map_err(|e| TemplateError::Decode(e.to_string()))
    }

    pub fn delete(&self, name: &str) -> Result<(), TemplateError> {
        self.store.delete(BUCKET, name.as_bytes())?;
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<UserTemplate>, TemplateError> {
        let rows = self.store.scan_all(BUCKET)?;
        rows.into_iter()
            .map(|(_, v)| bincode::deserialize(&v).map_err(|e| TemplateError::Decode(e.to_string())))
            .collect()
    }

    /// `hasPermissions` from the original: `username == "root"` always
    /// passes, regardless of template contents.
    pub fn has_permission(&self, username: &str, template_name: &str, module: &str) -> Result<bool, TemplateError> {
        if username == "root" {
            return Ok(true);
        }
        let template = self.get(template_name)?;
        Ok(template.has_module(module))
    }
}
