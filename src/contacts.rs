//! **C3** — contact registry.
//!
//! Tracks which agents know about which other agents, so an agent can only
//! `send_message` to an id it has actually been introduced to (its parent, its
//! children, and anyone explicitly shared with it via `introduce`/`share_contact`).
//! `root` and `user` are implicitly known to every agent. Each contact carries
//! enough metadata (§4.2) for the owning agent's system prompt to describe who
//! it can reach and why, not just a bare id.

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::envelope::{ROOT_AGENT, USER_AGENT};

/// How a contact entry came to be known, per §4.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactSource {
    System,
    Parent,
    Preset,
    Introduction,
    FirstMessage,
}

/// Per-contact metadata (§4.2): `role` is the relationship as seen by the
/// owning agent (e.g. `"parent"`, `"child"`, `"peer"`), distinct from
/// `source`, which records how the entry was added.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactInfo {
    pub role: String,
    pub source: ContactSource,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub interface_spec: Option<String>,
    pub added_at: String,
}

impl ContactInfo {
    fn new(role: impl Into<String>, source: ContactSource) -> Self {
        ContactInfo {
            role: role.into(),
            source,
            description: None,
            interface_spec: None,
            added_at: Utc::now().to_rfc3339(),
        }
    }
}

/// A collaborator a freshly-spawned agent should already know about, supplied
/// by the caller of `spawn_agent`/`init_registry`.
#[derive(Debug, Clone, Deserialize)]
pub struct PresetContact {
    pub id: String,
    pub role: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub interface_spec: Option<String>,
}

#[derive(Default)]
struct ContactState {
    known: HashMap<String, HashMap<String, ContactInfo>>,
}

/// **C3**. One shared instance per runtime, behind a single lock.
pub struct ContactRegistry {
    inner: RwLock<ContactState>,
}

impl ContactRegistry {
    pub fn new() -> Self {
        ContactRegistry {
            inner: RwLock::new(ContactState::default()),
        }
    }

    /// `initRegistry(agentId, parentId, presets?)` (§4.2): seeds `root`/`user`,
    /// the new agent's parent (bidirectionally, so the parent can reach the
    /// child back), and any preset collaborators.
    pub async fn register_agent(
        &self,
        agent_id: &str,
        parent_agent_id: Option<&str>,
        presets: &[PresetContact],
    ) {
        let mut state = self.inner.write().await;
        let entry = state.known.entry(agent_id.to_string()).or_default();
        entry.insert(ROOT_AGENT.to_string(), ContactInfo::new("system", ContactSource::System));
        entry.insert(USER_AGENT.to_string(), ContactInfo::new("system", ContactSource::System));
        if let Some(parent) = parent_agent_id {
            entry.insert(parent.to_string(), ContactInfo::new("parent", ContactSource::Parent));
            state
                .known
                .entry(parent.to_string())
                .or_default()
                .insert(agent_id.to_string(), ContactInfo::new("child", ContactSource::Parent));
        }
        let entry = state.known.entry(agent_id.to_string()).or_default();
        for preset in presets {
            let mut info = ContactInfo::new(preset.role.clone(), ContactSource::Preset);
            info.description = preset.description.clone();
            info.interface_spec = preset.interface_spec.clone();
            entry.insert(preset.id.clone(), info);
        }
    }

    /// Grants `agent_id` knowledge of `contact_id`. One-directional: the
    /// reverse introduction must be granted separately if desired.
    pub async fn introduce(
        &self,
        agent_id: &str,
        contact_id: &str,
        role: impl Into<String>,
        description: Option<String>,
    ) {
        let mut info = ContactInfo::new(role, ContactSource::Introduction);
        info.description = description;
        self.inner
            .write()
            .await
            .known
            .entry(agent_id.to_string())
            .or_default()
            .insert(contact_id.to_string(), info);
    }

    /// Records that `agent_id` learned of `contact_id` implicitly, by it being
    /// the sender of the first message addressed to `agent_id` from an id it
    /// didn't already know.
    pub async fn note_first_message(&self, agent_id: &str, contact_id: &str) {
        let mut state = self.inner.write().await;
        let entry = state.known.entry(agent_id.to_string()).or_default();
        entry
            .entry(contact_id.to_string())
            .or_insert_with(|| ContactInfo::new("peer", ContactSource::FirstMessage));
    }

    pub async fn is_known(&self, agent_id: &str, contact_id: &str) -> bool {
        if contact_id == ROOT_AGENT || contact_id == USER_AGENT || contact_id == agent_id {
            return true;
        }
        self.inner
            .read()
            .await
            .known
            .get(agent_id)
            .map(|contacts| contacts.contains_key(contact_id))
            .unwrap_or(false)
    }

    /// `listContacts`: every contact id and its metadata known to `agent_id`.
    pub async fn list_contacts(&self, agent_id: &str) -> Vec<(String, ContactInfo)> {
        self.inner
            .read()
            .await
            .known
            .get(agent_id)
            .map(|contacts| contacts.iter().map(|(id, info)| (id.clone(), info.clone())).collect())
            .unwrap_or_default()
    }

    /// Bare contact ids known to `agent_id`, for call sites that only need the
    /// `send_message` allow-list and not the full metadata.
    pub async fn contacts_of(&self, agent_id: &str) -> Vec<String> {
        self.inner
            .read()
            .await
            .known
            .get(agent_id)
            .map(|contacts| contacts.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Removes `agent_id` entirely: its own contact set and every mention of
    /// it in other agents' sets. Called on termination.
    pub async fn remove_agent(&self, agent_id: &str) {
        let mut state = self.inner.write().await;
        state.known.remove(agent_id);
        for contacts in state.known.values_mut() {
            contacts.remove(agent_id);
        }
    }
}

impl Default for ContactRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn newly_spawned_agent_knows_root_user_and_parent() {
        let registry = ContactRegistry::new();
        registry.register_agent("child", Some("parent"), &[]).await;
        assert!(registry.is_known("child", "root").await);
        assert!(registry.is_known("child", "user").await);
        assert!(registry.is_known("child", "parent").await);
        assert!(registry.is_known("parent", "child").await);
        assert!(!registry.is_known("child", "stranger").await);
    }

    #[tokio::test]
    async fn presets_are_seeded_with_preset_source() {
        let registry = ContactRegistry::new();
        let presets = vec![PresetContact {
            id: "agent-sibling".to_string(),
            role: "peer".to_string(),
            description: Some("a collaborator spawned earlier".to_string()),
            interface_spec: None,
        }];
        registry.register_agent("child", None, &presets).await;
        assert!(registry.is_known("child", "agent-sibling").await);
        let contacts = registry.list_contacts("child").await;
        let (_, info) = contacts.iter().find(|(id, _)| id == "agent-sibling").unwrap();
        assert_eq!(info.source, ContactSource::Preset);
        assert_eq!(info.description.as_deref(), Some("a collaborator spawned earlier"));
    }

    #[tokio::test]
    async fn introduce_is_one_directional() {
        let registry = ContactRegistry::new();
        registry.register_agent("a", None, &[]).await;
        registry.register_agent("b", None, &[]).await;
        registry.introduce("a", "b", "peer", None).await;
        assert!(registry.is_known("a", "b").await);
        assert!(!registry.is_known("b", "a").await);
    }

    #[tokio::test]
    async fn removing_an_agent_scrubs_reverse_references() {
        let registry = ContactRegistry::new();
        registry.register_agent("child", Some("parent"), &[]).await;
        registry.remove_agent("child").await;
        assert!(!registry.is_known("parent", "child").await);
        assert!(registry.contacts_of("child").await.is_empty());
    }
}
