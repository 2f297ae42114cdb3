//! **C2** — organizational state: roles and agent metadata.
//!
//! Roles are immutable once created (no `update_role`, matching the
//! specification's silence on role mutation). Agent metadata records parentage
//! and termination so [`crate::lifecycle::AgentLifecycle`] can cascade
//! terminations and rebuild workspace ancestry without consulting the bus or
//! the conversation store.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// The only status persisted to disk (§3): an agent's rich in-memory compute
/// status ([`crate::status::ComputeStatus`]) is rebuilt fresh on every boot,
/// but whether it's still part of the org at all has to survive a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PersistedStatus {
    Active,
    Terminated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    pub name: String,
    pub role_prompt: String,
    pub tool_groups: Vec<String>,
    pub llm_service_id: String,
    pub created_by: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMeta {
    pub id: String,
    pub role_id: String,
    pub parent_agent_id: Option<String>,
    pub status: PersistedStatus,
    pub created_at: String,
    pub terminated_at: Option<String>,
    pub terminated_by: Option<String>,
    pub reason: Option<String>,
}

impl AgentMeta {
    fn new(id: String, role_id: String, parent_agent_id: Option<String>) -> Self {
        AgentMeta {
            id,
            role_id,
            parent_agent_id,
            status: PersistedStatus::Active,
            created_at: Utc::now().to_rfc3339(),
            terminated_at: None,
            terminated_by: None,
            reason: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct OrgSnapshot {
    roles: HashMap<String, Role>,
    agents: HashMap<String, AgentMeta>,
}

#[derive(Debug, Clone)]
pub enum OrgError {
    RoleNotFound(String),
    RoleNameTaken(String),
    AgentNotFound(String),
}

impl std::fmt::Display for OrgError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrgError::RoleNotFound(id) => write!(f, "role not found: {}", id),
            OrgError::RoleNameTaken(name) => write!(f, "role name already in use: {}", name),
            OrgError::AgentNotFound(id) => write!(f, "agent not found: {}", id),
        }
    }
}
impl std::error::Error for OrgError {}

/// **C2**. Holds roles and agent metadata behind a single lock; persisted as
/// one JSON snapshot under `runtime_dir/org.json`.
pub struct OrgState {
    inner: RwLock<OrgSnapshot>,
    path: PathBuf,
}

impl OrgState {
    pub fn new(runtime_dir: impl AsRef<Path>) -> Self {
        OrgState {
            inner: RwLock::new(OrgSnapshot::default()),
            path: runtime_dir.as_ref().join("org.json"),
        }
    }

    /// Loads a prior snapshot from `runtime_dir/org.json` if present; a fresh
    /// runtime directory starts with empty org state.
    pub async fn load_if_exists(&self) -> Result<(), std::io::Error> {
        if !self.path.exists() {
            return Ok(());
        }
        let data = fs::read_to_string(&self.path)?;
        let snapshot: OrgSnapshot = serde_json::from_str(&data)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        *self.inner.write().await = snapshot;
        Ok(())
    }

    pub async fn persist(&self) -> Result<(), std::io::Error> {
        let snapshot = self.inner.read().await;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(&*snapshot)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        fs::write(&self.path, data)
    }

    pub async fn create_role(
        &self,
        id: String,
        name: String,
        role_prompt: String,
        tool_groups: Vec<String>,
        llm_service_id: String,
        created_by: String,
    ) -> Result<Role, OrgError> {
        let mut snapshot = self.inner.write().await;
        if snapshot.roles.values().any(|r| r.name == name) {
            return Err(OrgError::RoleNameTaken(name));
        }
        let role = Role {
            id: id.clone(),
            name,
            role_prompt,
            tool_groups,
            llm_service_id,
            created_by,
            created_at: Utc::now().to_rfc3339(),
        };
        snapshot.roles.insert(id, role.clone());
        Ok(role)
    }

    pub async fn find_role_by_name(&self, name: &str) -> Option<Role> {
        self.inner
            .read()
            .await
            .roles
            .values()
            .find(|r| r.name == name)
            .cloned()
    }

    pub async fn get_role(&self, role_id: &str) -> Result<Role, OrgError> {
        self.inner
            .read()
            .await
            .roles
            .get(role_id)
            .cloned()
            .ok_or_else(|| OrgError::RoleNotFound(role_id.to_string()))
    }

    pub async fn create_agent(
        &self,
        id: String,
        role_id: &str,
        parent_agent_id: Option<String>,
    ) -> Result<AgentMeta, OrgError> {
        let mut snapshot = self.inner.write().await;
        if !snapshot.roles.contains_key(role_id) {
            return Err(OrgError::RoleNotFound(role_id.to_string()));
        }
        let meta = AgentMeta::new(id.clone(), role_id.to_string(), parent_agent_id);
        snapshot.agents.insert(id, meta.clone());
        Ok(meta)
    }

    pub async fn get_agent(&self, agent_id: &str) -> Result<AgentMeta, OrgError> {
        self.inner
            .read()
            .await
            .agents
            .get(agent_id)
            .cloned()
            .ok_or_else(|| OrgError::AgentNotFound(agent_id.to_string()))
    }

    pub async fn record_termination(
        &self,
        agent_id: &str,
        terminated_by: &str,
        reason: Option<String>,
    ) -> Result<(), OrgError> {
        let mut snapshot = self.inner.write().await;
        let meta = snapshot
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| OrgError::AgentNotFound(agent_id.to_string()))?;
        meta.status = PersistedStatus::Terminated;
        meta.terminated_at = Some(Utc::now().to_rfc3339());
        meta.terminated_by = Some(terminated_by.to_string());
        meta.reason = reason;
        Ok(())
    }

    /// Direct children of `agent_id`, for lifecycle cascade and workspace
    /// ancestry resolution.
    pub async fn children_of(&self, agent_id: &str) -> Vec<String> {
        self.inner
            .read()
            .await
            .agents
            .values()
            .filter(|m| m.parent_agent_id.as_deref() == Some(agent_id))
            .map(|m| m.id.clone())
            .collect()
    }

    pub async fn list_agents(&self) -> Vec<AgentMeta> {
        self.inner.read().await.agents.values().cloned().collect()
    }

    pub async fn list_roles(&self) -> Vec<Role> {
        self.inner.read().await.roles.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplicate_role_names_are_rejected() {
        let org = OrgState::new(tempfile::tempdir().unwrap().into_path());
        org.create_role(
            "role-a".to_string(),
            "worker".to_string(),
            "you do work".to_string(),
            vec![],
            "default".to_string(),
            "root".to_string(),
        )
        .await
        .unwrap();

        let err = org
            .create_role(
                "role-b".to_string(),
                "worker".to_string(),
                "you do other work".to_string(),
                vec![],
                "default".to_string(),
                "root".to_string(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, OrgError::RoleNameTaken(name) if name == "worker"));
    }

    #[tokio::test]
    async fn persist_then_reload_round_trips_roles_and_agents() {
        let dir = tempfile::tempdir().unwrap().into_path();
        let org = OrgState::new(&dir);
        let role = org
            .create_role(
                "role-a".to_string(),
                "worker".to_string(),
                "you do work".to_string(),
                vec!["workspace".to_string()],
                "default".to_string(),
                "root".to_string(),
            )
            .await
            .unwrap();
        org.create_agent("agent-a".to_string(), &role.id, None)
            .await
            .unwrap();
        org.persist().await.unwrap();

        let reloaded = OrgState::new(&dir);
        reloaded.load_if_exists().await.unwrap();
        assert_eq!(reloaded.list_roles().await.len(), 1);
        assert_eq!(reloaded.list_agents().await.len(), 1);
        assert!(reloaded.get_agent("agent-a").await.is_ok());
    }

    #[tokio::test]
    async fn terminating_an_unknown_agent_reports_not_found() {
        let org = OrgState::new(tempfile::tempdir().unwrap().into_path());
        let err = org
            .record_termination("nobody", "root", None)
            .await
            .unwrap_err();
        assert!(matches!(err, OrgError::AgentNotFound(id) if id == "nobody"));
    }
}
