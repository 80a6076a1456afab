//! Scene backend capability surface.
//!
//! The core never talks to a host DCC directly. Everything host-shaped —
//! mirrored records, attributes, connections, file-path application,
//! display groups, reference lookup — goes through the [`SceneBackend`]
//! trait. Implementers write one backend per host; tests (and the pipeline's
//! own unit tests) use the in-memory [`MemoryBackend`].
//!
//! Linkage policy: an asset record is associated with a host reference
//! bidirectionally (`linked_host_ref` / `linked_assets`). When the host
//! reference is locked and cannot take a live association, the backend MUST
//! still support a string-keyed fallback — same observable behavior, with
//! [`LinkMode::StringKeyed`] returned purely as information. One host
//! reference may serve several asset records (cross-shot sharing).

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
#[error("backend operation '{op}' failed: {detail}")]
pub struct BackendError {
    pub op: String,
    pub detail: String,
}

impl BackendError {
    pub fn new(op: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            op: op.into(),
            detail: detail.into(),
        }
    }
}

/// Which record kind a mirrored node represents in the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Manager,
    Shot,
    Asset,
}

impl RecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Manager => "manager",
            RecordKind::Shot => "shot",
            RecordKind::Asset => "asset",
        }
    }
}

/// Attribute slot values the core reads and writes on mirrored records.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl AttrValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

/// How an asset-to-reference link was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkMode {
    /// Live bidirectional association.
    Bidirectional,
    /// String-keyed fallback for locked references.
    StringKeyed,
}

/// A host reference visible to the core: opaque id plus its namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceInfo {
    pub id: String,
    pub namespace: String,
}

/// Capabilities the core requires from a host integration.
pub trait SceneBackend {
    fn node_exists(&self, id: &str) -> bool;

    /// Creates an opaque host record mirroring a core node; returns its id.
    fn create_record(&mut self, kind: RecordKind, name: &str) -> Result<String, BackendError>;

    fn delete_record(&mut self, id: &str) -> Result<(), BackendError>;

    fn set_attr(&mut self, id: &str, name: &str, value: AttrValue) -> Result<(), BackendError>;

    fn get_attr(&self, id: &str, name: &str) -> Result<Option<AttrValue>, BackendError>;

    fn connect(
        &mut self,
        src_id: &str,
        src_attr: &str,
        dst_id: &str,
        dst_attr: &str,
    ) -> Result<(), BackendError>;

    fn list_connections(&self, id: &str, attr: &str) -> Vec<String>;

    /// Applies a resolved file path to whatever attribute/mechanism the host
    /// reference uses (`dso`, `fileName`, reference reload).
    fn apply_file_path(&mut self, host_ref_id: &str, path: &str) -> Result<(), BackendError>;

    /// Current file path of a host reference, if it has one.
    fn reference_file_path(&self, host_ref_id: &str) -> Option<String>;

    fn find_reference_by_namespace(&self, namespace: &str) -> Option<String>;

    /// Every file reference the host scene currently holds.
    fn list_references(&self) -> Vec<ReferenceInfo>;

    // --- linkage ---------------------------------------------------------

    /// Associates an asset record with a host reference. Returns which link
    /// mechanism was used (informational only).
    fn link(&mut self, asset_id: &str, host_ref_id: &str) -> Result<LinkMode, BackendError>;

    /// Removes an asset's association. Returns whether a link existed.
    fn unlink(&mut self, asset_id: &str) -> Result<bool, BackendError>;

    fn linked_host_ref(&self, asset_id: &str) -> Option<String>;

    fn linked_assets(&self, host_ref_id: &str) -> Vec<String>;

    // --- display groups --------------------------------------------------

    fn ensure_display_group(&mut self, name: &str) -> Result<(), BackendError>;

    fn set_group_visible(&mut self, name: &str, visible: bool) -> Result<(), BackendError>;

    fn group_visible(&self, name: &str) -> Option<bool>;

    fn assign_to_group(&mut self, name: &str, id: &str) -> Result<(), BackendError>;

    fn group_members(&self, name: &str) -> Vec<String>;

    fn groups_with_prefix(&self, prefix: &str) -> Vec<String>;

    fn delete_display_group(&mut self, name: &str) -> Result<(), BackendError>;
}

// -------------------------------------------------------------------------------------------------
// In-memory backend
// -------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct MemoryNode {
    kind: Option<RecordKind>,
    attrs: BTreeMap<String, AttrValue>,
    connections: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Default)]
struct MemoryGroup {
    visible: bool,
    members: BTreeSet<String>,
}

#[derive(Debug, Clone)]
struct MemoryReference {
    namespace: String,
    file_path: Option<String>,
    locked: bool,
}

/// In-memory [`SceneBackend`] used by tests and headless tooling.
///
/// References can be registered with [`MemoryBackend::add_reference`] and
/// locked with [`MemoryBackend::lock_reference`] to exercise the
/// string-keyed link fallback.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    nodes: BTreeMap<String, MemoryNode>,
    references: BTreeMap<String, MemoryReference>,
    groups: BTreeMap<String, MemoryGroup>,
    // asset -> ref (live links)
    links: BTreeMap<String, String>,
    // asset -> ref name (string fallback)
    string_links: BTreeMap<String, String>,
    next_id: u64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a host reference under `namespace`; returns its id.
    pub fn add_reference(&mut self, namespace: &str) -> String {
        self.next_id += 1;
        let id = format!("ref{}", self.next_id);
        self.references.insert(
            id.clone(),
            MemoryReference {
                namespace: namespace.to_string(),
                file_path: None,
                locked: false,
            },
        );
        id
    }

    /// Marks a reference as locked so `link` takes the string fallback.
    pub fn lock_reference(&mut self, ref_id: &str) {
        if let Some(reference) = self.references.get_mut(ref_id) {
            reference.locked = true;
        }
    }

    /// Applied file path of a reference, for assertions.
    pub fn reference_path(&self, ref_id: &str) -> Option<&str> {
        self.references
            .get(ref_id)
            .and_then(|r| r.file_path.as_deref())
    }
}

impl SceneBackend for MemoryBackend {
    fn node_exists(&self, id: &str) -> bool {
        self.nodes.contains_key(id) || self.references.contains_key(id)
    }

    fn create_record(&mut self, kind: RecordKind, name: &str) -> Result<String, BackendError> {
        self.next_id += 1;
        let id = format!("{}_{}_{}", kind.as_str(), name, self.next_id);
        self.nodes.insert(
            id.clone(),
            MemoryNode {
                kind: Some(kind),
                ..MemoryNode::default()
            },
        );
        debug!(target: "backend", id = %id, "record created");
        Ok(id)
    }

    fn delete_record(&mut self, id: &str) -> Result<(), BackendError> {
        self.nodes
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| BackendError::new("delete_record", format!("unknown node '{id}'")))
    }

    fn set_attr(&mut self, id: &str, name: &str, value: AttrValue) -> Result<(), BackendError> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| BackendError::new("set_attr", format!("unknown node '{id}'")))?;
        node.attrs.insert(name.to_string(), value);
        Ok(())
    }

    fn get_attr(&self, id: &str, name: &str) -> Result<Option<AttrValue>, BackendError> {
        let node = self
            .nodes
            .get(id)
            .ok_or_else(|| BackendError::new("get_attr", format!("unknown node '{id}'")))?;
        Ok(node.attrs.get(name).cloned())
    }

    fn connect(
        &mut self,
        src_id: &str,
        src_attr: &str,
        dst_id: &str,
        dst_attr: &str,
    ) -> Result<(), BackendError> {
        if !self.node_exists(src_id) {
            return Err(BackendError::new(
                "connect",
                format!("unknown source node '{src_id}'"),
            ));
        }
        if !self.node_exists(dst_id) {
            return Err(BackendError::new(
                "connect",
                format!("unknown destination node '{dst_id}'"),
            ));
        }
        if let Some(node) = self.nodes.get_mut(src_id) {
            node.connections
                .entry(src_attr.to_string())
                .or_default()
                .push(dst_id.to_string());
        }
        if let Some(node) = self.nodes.get_mut(dst_id) {
            node.connections
                .entry(dst_attr.to_string())
                .or_default()
                .push(src_id.to_string());
        }
        Ok(())
    }

    fn list_connections(&self, id: &str, attr: &str) -> Vec<String> {
        self.nodes
            .get(id)
            .and_then(|node| node.connections.get(attr))
            .cloned()
            .unwrap_or_default()
    }

    fn apply_file_path(&mut self, host_ref_id: &str, path: &str) -> Result<(), BackendError> {
        let reference = self.references.get_mut(host_ref_id).ok_or_else(|| {
            BackendError::new(
                "apply_file_path",
                format!("unknown reference '{host_ref_id}'"),
            )
        })?;
        reference.file_path = Some(path.to_string());
        debug!(target: "backend", reference = host_ref_id, path, "file path applied");
        Ok(())
    }

    fn reference_file_path(&self, host_ref_id: &str) -> Option<String> {
        self.references
            .get(host_ref_id)
            .and_then(|r| r.file_path.clone())
    }

    fn find_reference_by_namespace(&self, namespace: &str) -> Option<String> {
        self.references
            .iter()
            .find(|(_, r)| r.namespace == namespace)
            .map(|(id, _)| id.clone())
    }

    fn list_references(&self) -> Vec<ReferenceInfo> {
        self.references
            .iter()
            .map(|(id, r)| ReferenceInfo {
                id: id.clone(),
                namespace: r.namespace.clone(),
            })
            .collect()
    }

    fn link(&mut self, asset_id: &str, host_ref_id: &str) -> Result<LinkMode, BackendError> {
        let reference = self
            .references
            .get(host_ref_id)
            .ok_or_else(|| BackendError::new("link", format!("unknown reference '{host_ref_id}'")))?;
        if reference.locked {
            warn!(
                target: "backend",
                asset = asset_id,
                reference = host_ref_id,
                "reference locked, using string-keyed link"
            );
            self.string_links
                .insert(asset_id.to_string(), host_ref_id.to_string());
            return Ok(LinkMode::StringKeyed);
        }
        self.links
            .insert(asset_id.to_string(), host_ref_id.to_string());
        Ok(LinkMode::Bidirectional)
    }

    fn unlink(&mut self, asset_id: &str) -> Result<bool, BackendError> {
        let had_live = self.links.remove(asset_id).is_some();
        let had_string = self.string_links.remove(asset_id).is_some();
        Ok(had_live || had_string)
    }

    fn linked_host_ref(&self, asset_id: &str) -> Option<String> {
        self.links
            .get(asset_id)
            .or_else(|| self.string_links.get(asset_id))
            .cloned()
    }

    fn linked_assets(&self, host_ref_id: &str) -> Vec<String> {
        let mut assets: Vec<String> = self
            .links
            .iter()
            .chain(self.string_links.iter())
            .filter(|(_, r)| r.as_str() == host_ref_id)
            .map(|(a, _)| a.clone())
            .collect();
        assets.sort_unstable();
        assets.dedup();
        assets
    }

    fn ensure_display_group(&mut self, name: &str) -> Result<(), BackendError> {
        self.groups.entry(name.to_string()).or_insert(MemoryGroup {
            visible: true,
            members: BTreeSet::new(),
        });
        Ok(())
    }

    fn set_group_visible(&mut self, name: &str, visible: bool) -> Result<(), BackendError> {
        let group = self
            .groups
            .get_mut(name)
            .ok_or_else(|| BackendError::new("set_group_visible", format!("unknown group '{name}'")))?;
        group.visible = visible;
        Ok(())
    }

    fn group_visible(&self, name: &str) -> Option<bool> {
        self.groups.get(name).map(|g| g.visible)
    }

    fn assign_to_group(&mut self, name: &str, id: &str) -> Result<(), BackendError> {
        if !self.node_exists(id) {
            return Err(BackendError::new(
                "assign_to_group",
                format!("unknown node '{id}'"),
            ));
        }
        let group = self
            .groups
            .get_mut(name)
            .ok_or_else(|| BackendError::new("assign_to_group", format!("unknown group '{name}'")))?;
        group.members.insert(id.to_string());
        Ok(())
    }

    fn group_members(&self, name: &str) -> Vec<String> {
        self.groups
            .get(name)
            .map(|g| g.members.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn groups_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.groups
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect()
    }

    fn delete_display_group(&mut self, name: &str) -> Result<(), BackendError> {
        self.groups
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| BackendError::new("delete_display_group", format!("unknown group '{name}'")))
    }
}
