//! **C6** — agent lifecycle: spawn, status transitions, cascading termination,
//! and workspace ancestry.
//!
//! Re-exports [`crate::status::ComputeStatus`] as its public status type, since
//! from the outside this is the component that owns status transitions even
//! though the enum itself lives in a neutral module shared with the bus (see
//! `status.rs`'s module docs).

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

pub use crate::status::ComputeStatus;
use crate::contacts::{ContactRegistry, PresetContact};
use crate::envelope::{ROOT_AGENT, USER_AGENT};
use crate::event::{EventHandler, RuntimeEvent};
use crate::org::{AgentMeta, OrgState};
use crate::status::StatusTable;
use crate::store::WorkspaceStore;

#[derive(Debug, Clone)]
pub enum LifecycleError {
    AgentNotFound(String),
    RoleNotFound(String),
    NotChildAgent { caller: String, target: String },
    InvalidParentAgentId(String),
    ReservedAgent(String),
}

impl fmt::Display for LifecycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleError::AgentNotFound(id) => write!(f, "agent_not_found: {}", id),
            LifecycleError::RoleNotFound(id) => write!(f, "role_not_found: {}", id),
            LifecycleError::NotChildAgent { caller, target } => write!(
                f,
                "not_child_agent: {} is not a descendant of {}",
                target, caller
            ),
            LifecycleError::InvalidParentAgentId(id) => {
                write!(f, "invalid_parentAgentId: {}", id)
            }
            LifecycleError::ReservedAgent(id) => {
                write!(f, "reserved_agent_not_terminable: {}", id)
            }
        }
    }
}
impl std::error::Error for LifecycleError {}

/// Tracks the wall-clock instant an agent last left the `idle` state, purely
/// in-memory — used to compute `AgentIdleWarning` events, never persisted.
struct IdleTracker {
    last_activity: RwLock<std::collections::HashMap<String, Instant>>,
}

impl IdleTracker {
    fn new() -> Self {
        IdleTracker {
            last_activity: RwLock::new(std::collections::HashMap::new()),
        }
    }

    async fn touch(&self, agent_id: &str) {
        self.last_activity
            .write()
            .await
            .insert(agent_id.to_string(), Instant::now());
    }

    async fn idle_ms(&self, agent_id: &str) -> Option<u64> {
        self.last_activity
            .read()
            .await
            .get(agent_id)
            .map(|i| i.elapsed().as_millis() as u64)
    }

    async fn remove(&self, agent_id: &str) {
        self.last_activity.write().await.remove(agent_id);
    }
}

/// **C6**. Owns `ComputeStatus` transitions via the shared [`StatusTable`], and
/// composes [`OrgState`] (role/agent metadata) and [`ContactRegistry`]
/// (implicit introductions) so a single `spawn`/`terminate` call keeps all
/// three consistent.
pub struct AgentLifecycle {
    org: Arc<OrgState>,
    contacts: Arc<ContactRegistry>,
    status: StatusTable,
    idle: IdleTracker,
    events: Arc<dyn EventHandler>,
    workspaces: Arc<dyn WorkspaceStore>,
}

impl AgentLifecycle {
    pub fn new(
        org: Arc<OrgState>,
        contacts: Arc<ContactRegistry>,
        status: StatusTable,
        events: Arc<dyn EventHandler>,
        workspaces: Arc<dyn WorkspaceStore>,
    ) -> Self {
        AgentLifecycle {
            org,
            contacts,
            status,
            idle: IdleTracker::new(),
            events,
            workspaces,
        }
    }

    /// `SpawnAgent(parentAgentId, roleId) → agentId`. `parent_agent_id` must
    /// already exist unless it is the reserved `root`/`user` id (handled by the
    /// caller at boot).
    pub async fn spawn(
        &self,
        role_id: &str,
        parent_agent_id: &str,
        presets: &[PresetContact],
    ) -> Result<AgentMeta, LifecycleError> {
        self.org
            .get_role(role_id)
            .await
            .map_err(|_| LifecycleError::RoleNotFound(role_id.to_string()))?;

        let agent_id = format!("agent-{}", Uuid::new_v4());
        let meta = self
            .org
            .create_agent(agent_id.clone(), role_id, Some(parent_agent_id.to_string()))
            .await
            .map_err(|e| LifecycleError::RoleNotFound(e.to_string()))?;

        self.status
            .write()
            .await
            .insert(agent_id.clone(), ComputeStatus::Idle);
        self.contacts
            .register_agent(&agent_id, Some(parent_agent_id), presets)
            .await;
        self.idle.touch(&agent_id).await;

        // §4.4 spawn rule 5: only direct children of `root` get a workspace,
        // and even then the content directory isn't created until first write.
        if parent_agent_id == ROOT_AGENT {
            self.workspaces.assign_workspace(&agent_id).await.ok();
        }

        self.events
            .on_event(&RuntimeEvent::AgentSpawned {
                agent_id: agent_id.clone(),
                role_id: role_id.to_string(),
                parent_agent_id: parent_agent_id.to_string(),
            })
            .await;

        Ok(meta)
    }

    pub async fn status_of(&self, agent_id: &str) -> Option<ComputeStatus> {
        self.status.read().await.get(agent_id).copied()
    }

    /// Transitions `agent_id` to `to`, firing `AgentStatusChanged`. Clearing
    /// the bus queue on entry to a terminal status is the caller's
    /// responsibility (the scheduler holds the bus reference this module does
    /// not).
    pub async fn set_status(
        &self,
        agent_id: &str,
        to: ComputeStatus,
    ) -> Result<(), LifecycleError> {
        let from = {
            let mut table = self.status.write().await;
            let entry = table
                .get_mut(agent_id)
                .ok_or_else(|| LifecycleError::AgentNotFound(agent_id.to_string()))?;
            let from = *entry;
            *entry = to;
            from
        };
        self.idle.touch(agent_id).await;
        self.events
            .on_event(&RuntimeEvent::AgentStatusChanged {
                agent_id: agent_id.to_string(),
                from,
                to,
            })
            .await;
        Ok(())
    }

    /// `true` if `target` is `caller` itself or a (possibly transitive)
    /// descendant of `caller`. `root` may terminate anyone.
    pub async fn is_descendant_or_self(&self, caller: &str, target: &str) -> bool {
        if caller == crate::envelope::ROOT_AGENT || caller == target {
            return true;
        }
        let mut frontier = vec![caller.to_string()];
        while let Some(current) = frontier.pop() {
            let children = self.org.children_of(&current).await;
            if children.iter().any(|c| c == target) {
                return true;
            }
            frontier.extend(children);
        }
        false
    }

    /// `TerminateAgent(callerAgentId, targetAgentId, reason)`. Cascades to
    /// every transitive descendant of `target`, deepest first, so a child
    /// never outlives the parent that is being removed around it.
    pub async fn terminate(
        &self,
        caller_agent_id: &str,
        target_agent_id: &str,
        reason: Option<String>,
    ) -> Result<Vec<String>, LifecycleError> {
        if target_agent_id == ROOT_AGENT || target_agent_id == USER_AGENT {
            return Err(LifecycleError::ReservedAgent(target_agent_id.to_string()));
        }
        if !self
            .is_descendant_or_self(caller_agent_id, target_agent_id)
            .await
            && caller_agent_id != target_agent_id
        {
            return Err(LifecycleError::NotChildAgent {
                caller: caller_agent_id.to_string(),
                target: target_agent_id.to_string(),
            });
        }

        let mut to_remove = Vec::new();
        let mut frontier = vec![target_agent_id.to_string()];
        while let Some(current) = frontier.pop() {
            let children = self.org.children_of(&current).await;
            frontier.extend(children);
            to_remove.push(current);
        }
        // Deepest-first: reverse the discovery order (a DFS push/pop order is
        // already root-to-leaf, so the collected list needs reversing).
        to_remove.reverse();

        for agent_id in &to_remove {
            self.status
                .write()
                .await
                .insert(agent_id.clone(), ComputeStatus::Terminating);
            self.org
                .record_termination(agent_id, caller_agent_id, reason.clone())
                .await
                .ok();
            self.contacts.remove_agent(agent_id).await;
            self.idle.remove(agent_id).await;
            self.events
                .on_event(&RuntimeEvent::AgentTerminated {
                    agent_id: agent_id.clone(),
                    terminated_by: caller_agent_id.to_string(),
                    reason: reason.clone(),
                })
                .await;
        }

        Ok(to_remove)
    }

    pub async fn idle_ms(&self, agent_id: &str) -> Option<u64> {
        self.idle.idle_ms(agent_id).await
    }

    pub async fn touch(&self, agent_id: &str) {
        self.idle.touch(agent_id).await;
    }

    /// `true` if `agent_id` has an assigned workspace (§4.4 spawn rule 5: only
    /// direct children of `root`).
    pub async fn has_workspace(&self, agent_id: &str) -> bool {
        self.workspaces.has_workspace(agent_id).await
    }

    /// The chain of owner ids `agent_id` may read a workspace file from, from
    /// its own id up through every ancestor's, root-most last. Used by the
    /// `read_file` tool's upward-search fallback.
    pub async fn workspace_ancestry(&self, agent_id: &str) -> Vec<String> {
        let mut chain = vec![agent_id.to_string()];
        let mut current = agent_id.to_string();
        while let Ok(meta) = self.org.get_agent(&current).await {
            match meta.parent_agent_id {
                Some(parent) => {
                    chain.push(parent.clone());
                    current = parent;
                }
                None => break,
            }
        }
        chain
    }

    pub async fn list_agents(&self) -> Vec<AgentMeta> {
        self.org.list_agents().await
    }
}
