//! Shot switching and display-group visibility policy.
//!
//! Switching is the one operation that touches graph state, host visibility,
//! and history together, in a fixed order: validate, re-point the active
//! flag, ensure and show the target's display group, hide the other
//! CTX-prefixed groups (when asked), record history, and only then emit
//! `ShotSwitched`. Observers therefore always see a fully settled scene.
//!
//! History is a bounded list of the last [`MAX_HISTORY`] activated shots.
//! Re-switching to a shot already present re-ranks it to the end rather
//! than duplicating it. `previous`/`next` navigate by the current shot's
//! position in that list and are no-ops when there is nothing to go to.

use core_backend::{BackendError, SceneBackend};
use core_events::PipelineEvent;
use core_model::{DISPLAY_GROUP_PREFIX, GraphError, SceneGraph, ShotId};
use thiserror::Error;
use tracing::{debug, info};

/// Maximum retained history entries.
pub const MAX_HISTORY: usize = 20;

#[derive(Debug, Error)]
pub enum SwitchError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Moves "active" between shots and keeps display groups in sync.
#[derive(Debug, Default)]
pub struct ShotSwitcher {
    history: Vec<ShotId>,
}

impl ShotSwitcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Switches the active shot. With `hide_others`, every other
    /// CTX-prefixed display group is hidden.
    pub fn switch_to(
        &mut self,
        graph: &mut SceneGraph,
        backend: &mut dyn SceneBackend,
        shot_id: &ShotId,
        hide_others: bool,
    ) -> Result<bool, SwitchError> {
        graph.activate(shot_id)?;
        let group = graph.shot(shot_id)?.display_group_name.clone();

        backend.ensure_display_group(&group)?;
        backend.set_group_visible(&group, true)?;

        if hide_others {
            for other in backend.groups_with_prefix(DISPLAY_GROUP_PREFIX) {
                if other != group {
                    backend.set_group_visible(&other, false)?;
                }
            }
        }

        self.push_history(shot_id.clone());

        info!(
            target: "switch",
            shot = shot_id.as_str(),
            hide_others,
            "shot switched"
        );
        graph.notify(&PipelineEvent::ShotSwitched {
            shot_id: shot_id.as_str().to_string(),
        });
        Ok(true)
    }

    /// Currently active shot, if any.
    pub fn active(&self, graph: &SceneGraph) -> Option<ShotId> {
        graph.active_shot_id().cloned()
    }

    /// Switches to the shot before the current one in history. No-op
    /// (returns `false`) when history is too short or the current shot is
    /// not in it.
    pub fn previous(
        &mut self,
        graph: &mut SceneGraph,
        backend: &mut dyn SceneBackend,
    ) -> Result<bool, SwitchError> {
        let Some(target) = self.neighbor(graph, -1) else {
            return Ok(false);
        };
        self.switch_to(graph, backend, &target, true)
    }

    /// Switches to the shot after the current one in history.
    pub fn next(
        &mut self,
        graph: &mut SceneGraph,
        backend: &mut dyn SceneBackend,
    ) -> Result<bool, SwitchError> {
        let Some(target) = self.neighbor(graph, 1) else {
            return Ok(false);
        };
        self.switch_to(graph, backend, &target, true)
    }

    fn neighbor(&self, graph: &SceneGraph, offset: isize) -> Option<ShotId> {
        if self.history.len() < 2 {
            return None;
        }
        let current = graph.active_shot_id()?;
        let index = self.history.iter().position(|id| id == current)?;
        let target = index.checked_add_signed(offset)?;
        self.history.get(target).cloned()
    }

    /// Shows only this shot: alias for `switch_to` with `hide_others`.
    pub fn isolate(
        &mut self,
        graph: &mut SceneGraph,
        backend: &mut dyn SceneBackend,
        shot_id: &ShotId,
    ) -> Result<bool, SwitchError> {
        self.switch_to(graph, backend, shot_id, true)
    }

    /// Shows every CTX-prefixed display group.
    pub fn show_all(&self, backend: &mut dyn SceneBackend) -> Result<(), SwitchError> {
        for group in backend.groups_with_prefix(DISPLAY_GROUP_PREFIX) {
            backend.set_group_visible(&group, true)?;
        }
        Ok(())
    }

    /// Hides every CTX-prefixed display group.
    pub fn hide_all(&self, backend: &mut dyn SceneBackend) -> Result<(), SwitchError> {
        for group in backend.groups_with_prefix(DISPLAY_GROUP_PREFIX) {
            backend.set_group_visible(&group, false)?;
        }
        Ok(())
    }

    pub fn history(&self) -> &[ShotId] {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    fn push_history(&mut self, shot_id: ShotId) {
        self.history.retain(|id| id != &shot_id);
        self.history.push(shot_id);
        if self.history.len() > MAX_HISTORY {
            let excess = self.history.len() - MAX_HISTORY;
            self.history.drain(..excess);
        }
    }

    /// Deletes CTX display groups with no members. With `dry_run`, only
    /// reports what would be deleted.
    pub fn cleanup_empty_groups(
        &self,
        backend: &mut dyn SceneBackend,
        dry_run: bool,
    ) -> Result<Vec<String>, SwitchError> {
        let empty: Vec<String> = backend
            .groups_with_prefix(DISPLAY_GROUP_PREFIX)
            .into_iter()
            .filter(|group| backend.group_members(group).is_empty())
            .collect();
        if !dry_run {
            for group in &empty {
                backend.delete_display_group(group)?;
                debug!(target: "switch", group, "empty display group deleted");
            }
        }
        Ok(empty)
    }

    /// Deletes CTX display groups no shot record claims. With `dry_run`,
    /// only reports what would be deleted.
    pub fn cleanup_orphaned_groups(
        &self,
        graph: &SceneGraph,
        backend: &mut dyn SceneBackend,
        dry_run: bool,
    ) -> Result<Vec<String>, SwitchError> {
        let valid: Vec<String> = graph
            .shots()
            .map(|shot| shot.display_group_name.clone())
            .collect();
        let orphaned: Vec<String> = backend
            .groups_with_prefix(DISPLAY_GROUP_PREFIX)
            .into_iter()
            .filter(|group| !valid.contains(group))
            .collect();
        if !dry_run {
            for group in &orphaned {
                backend.delete_display_group(group)?;
                debug!(target: "switch", group, "orphaned display group deleted");
            }
        }
        Ok(orphaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_backend::MemoryBackend;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn setup() -> (SceneGraph, MemoryBackend, ShotSwitcher, ShotId, ShotId) {
        let mut graph = SceneGraph::new();
        let a = graph.create_shot("Ep04", "sq0070", "SH0170").unwrap();
        let b = graph.create_shot("Ep04", "sq0070", "SH0180").unwrap();
        (graph, MemoryBackend::new(), ShotSwitcher::new(), a, b)
    }

    #[test]
    fn switch_shows_target_and_hides_others() {
        let (mut graph, mut backend, mut switcher, a, b) = setup();
        switcher.switch_to(&mut graph, &mut backend, &a, true).unwrap();
        switcher.switch_to(&mut graph, &mut backend, &b, true).unwrap();

        assert_eq!(switcher.active(&graph), Some(b.clone()));
        assert_eq!(backend.group_visible("CTX_Ep04_sq0070_SH0170"), Some(false));
        assert_eq!(backend.group_visible("CTX_Ep04_sq0070_SH0180"), Some(true));
        assert_eq!(switcher.history(), &[a, b]);
    }

    #[test]
    fn exactly_one_shot_active_after_switch() {
        let (mut graph, mut backend, mut switcher, a, b) = setup();
        switcher.switch_to(&mut graph, &mut backend, &a, true).unwrap();
        switcher.switch_to(&mut graph, &mut backend, &b, true).unwrap();
        let active: Vec<_> = graph.shots().filter(|s| s.is_active()).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id(), &b);
    }

    #[test]
    fn hide_others_false_leaves_other_groups_visible() {
        let (mut graph, mut backend, mut switcher, a, b) = setup();
        switcher.switch_to(&mut graph, &mut backend, &a, true).unwrap();
        switcher.switch_to(&mut graph, &mut backend, &b, false).unwrap();
        assert_eq!(backend.group_visible("CTX_Ep04_sq0070_SH0170"), Some(true));
        assert_eq!(backend.group_visible("CTX_Ep04_sq0070_SH0180"), Some(true));
    }

    #[test]
    fn switch_to_unknown_shot_is_stale_handle() {
        let (mut graph, mut backend, mut switcher, a, _b) = setup();
        graph.delete_shot(&a).unwrap();
        let err = switcher
            .switch_to(&mut graph, &mut backend, &a, true)
            .unwrap_err();
        assert!(matches!(err, SwitchError::Graph(GraphError::StaleHandle { .. })));
    }

    #[test]
    fn event_emitted_after_visibility_and_history() {
        let (mut graph, backend, mut switcher, a, _b) = setup();
        let backend = Rc::new(RefCell::new(backend));
        let seen = Rc::new(RefCell::new(Vec::new()));
        {
            let seen = seen.clone();
            graph.register_observer(move |ev| {
                if let PipelineEvent::ShotSwitched { shot_id } = ev {
                    seen.borrow_mut().push(shot_id.clone());
                }
            });
        }
        switcher
            .switch_to(&mut graph, &mut *backend.borrow_mut(), &a, true)
            .unwrap();
        assert_eq!(*seen.borrow(), vec![a.as_str().to_string()]);
        // Visibility was already settled when the event fired.
        assert_eq!(
            backend.borrow().group_visible("CTX_Ep04_sq0070_SH0170"),
            Some(true)
        );
    }

    #[test]
    fn history_reranks_existing_entry() {
        let (mut graph, mut backend, mut switcher, a, b) = setup();
        let c = graph.create_shot("Ep04", "sq0070", "SH0190").unwrap();
        for id in [&a, &b, &c, &a] {
            switcher.switch_to(&mut graph, &mut backend, id, true).unwrap();
        }
        assert_eq!(switcher.history(), &[b, c, a]);
    }

    #[test]
    fn history_is_bounded() {
        let mut graph = SceneGraph::new();
        let mut backend = MemoryBackend::new();
        let mut switcher = ShotSwitcher::new();
        let mut ids = Vec::new();
        for i in 0..25 {
            let id = graph
                .create_shot("Ep04", "sq0070", &format!("SH{i:04}"))
                .unwrap();
            ids.push(id);
        }
        for id in &ids {
            switcher.switch_to(&mut graph, &mut backend, id, true).unwrap();
        }
        assert_eq!(switcher.history().len(), MAX_HISTORY);
        assert_eq!(switcher.history().first(), Some(&ids[5]));
        assert_eq!(switcher.history().last(), Some(&ids[24]));
    }

    #[test]
    fn previous_and_next_navigate_history() {
        let (mut graph, mut backend, mut switcher, a, b) = setup();
        switcher.switch_to(&mut graph, &mut backend, &a, true).unwrap();
        switcher.switch_to(&mut graph, &mut backend, &b, true).unwrap();

        assert!(switcher.previous(&mut graph, &mut backend).unwrap());
        assert_eq!(switcher.active(&graph), Some(a.clone()));

        assert!(switcher.next(&mut graph, &mut backend).unwrap());
        assert_eq!(switcher.active(&graph), Some(b.clone()));

        // At the end of history, next is a no-op.
        assert!(!switcher.next(&mut graph, &mut backend).unwrap());
        assert_eq!(switcher.active(&graph), Some(b));
    }

    #[test]
    fn previous_noop_with_short_history() {
        let (mut graph, mut backend, mut switcher, a, _b) = setup();
        switcher.switch_to(&mut graph, &mut backend, &a, true).unwrap();
        assert!(!switcher.previous(&mut graph, &mut backend).unwrap());
    }

    #[test]
    fn show_all_and_hide_all_touch_only_ctx_groups() {
        let (mut graph, mut backend, mut switcher, a, b) = setup();
        switcher.switch_to(&mut graph, &mut backend, &a, true).unwrap();
        switcher.switch_to(&mut graph, &mut backend, &b, true).unwrap();
        backend.ensure_display_group("other_group").unwrap();
        backend.set_group_visible("other_group", false).unwrap();

        switcher.show_all(&mut backend).unwrap();
        assert_eq!(backend.group_visible("CTX_Ep04_sq0070_SH0170"), Some(true));
        assert_eq!(backend.group_visible("CTX_Ep04_sq0070_SH0180"), Some(true));
        assert_eq!(backend.group_visible("other_group"), Some(false));

        switcher.hide_all(&mut backend).unwrap();
        assert_eq!(backend.group_visible("CTX_Ep04_sq0070_SH0170"), Some(false));
        assert_eq!(backend.group_visible("CTX_Ep04_sq0070_SH0180"), Some(false));
        assert_eq!(backend.group_visible("other_group"), Some(false));
    }

    #[test]
    fn cleanup_orphaned_groups_respects_dry_run() {
        let (mut graph, mut backend, mut switcher, a, b) = setup();
        switcher.switch_to(&mut graph, &mut backend, &a, true).unwrap();
        switcher.switch_to(&mut graph, &mut backend, &b, true).unwrap();
        graph.delete_shot(&b).unwrap();

        let would_delete = switcher
            .cleanup_orphaned_groups(&graph, &mut backend, true)
            .unwrap();
        assert_eq!(would_delete, vec!["CTX_Ep04_sq0070_SH0180".to_string()]);
        assert!(backend.group_visible("CTX_Ep04_sq0070_SH0180").is_some());

        switcher
            .cleanup_orphaned_groups(&graph, &mut backend, false)
            .unwrap();
        assert!(backend.group_visible("CTX_Ep04_sq0070_SH0180").is_none());
        assert!(backend.group_visible("CTX_Ep04_sq0070_SH0170").is_some());
    }

    #[test]
    fn cleanup_empty_groups_deletes_memberless_groups() {
        let (mut graph, mut backend, mut switcher, a, _b) = setup();
        switcher.switch_to(&mut graph, &mut backend, &a, true).unwrap();
        let node = backend
            .create_record(core_backend::RecordKind::Asset, "cat")
            .unwrap();
        backend
            .assign_to_group("CTX_Ep04_sq0070_SH0170", &node)
            .unwrap();
        backend.ensure_display_group("CTX_empty").unwrap();

        let deleted = switcher.cleanup_empty_groups(&mut backend, false).unwrap();
        assert_eq!(deleted, vec!["CTX_empty".to_string()]);
        assert!(backend.group_visible("CTX_Ep04_sq0070_SH0170").is_some());
    }
}
