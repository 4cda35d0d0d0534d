//! Mount manager
//!
//! Session-side bookkeeping for UI mounts registered by executed code. The
//! engine hands over a mount frame plus the patch subscription it opened at
//! registration; this manager forwards the frame outbound, spawns the patch
//! forwarder, and tracks the pending result slot that exactly one inbound
//! submission may fulfil. Callback dispatch itself happens inside the
//! interpreter context; here we only know the names.

use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::interpreter::MountEvent;
use crate::protocol::{DataPatchPayload, Outbound};
use crate::reactive::Subscription;

struct MountEntry {
    callback_names: Vec<String>,
    pending: bool,
    /// Keeps the record's patch tap alive for the life of the mount
    _subscription: Option<Subscription>,
    forwarder: Option<JoinHandle<()>>,
}

/// Registry of mounts for one session
#[derive(Default)]
pub struct MountManager {
    entries: HashMap<String, MountEntry>,
}

impl MountManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a mount from the engine: emit the mount frame, then start
    /// forwarding its reactive patches in production order.
    pub fn register(&mut self, event: MountEvent, outbound: mpsc::UnboundedSender<Outbound>) {
        let mount_id = event.frame.mount_id.clone();
        let callback_names = event.frame.callback_names.clone().unwrap_or_default();

        // The frame goes out before any patch can be forwarded.
        let _ = outbound.send(Outbound::Mount(event.frame));

        let (subscription, forwarder) = match event.patches {
            Some((subscription, mut patches)) => {
                let id = mount_id.clone();
                let handle = tokio::spawn(async move {
                    while let Some(patch) = patches.recv().await {
                        let frame = Outbound::DataPatch(DataPatchPayload {
                            mount_id: id.clone(),
                            patches: vec![patch],
                        });
                        if outbound.send(frame).is_err() {
                            break;
                        }
                    }
                });
                (Some(subscription), Some(handle))
            }
            None => (None, None),
        };

        self.entries.insert(
            mount_id,
            MountEntry {
                callback_names,
                pending: true,
                _subscription: subscription,
                forwarder,
            },
        );
    }

    /// Claim the pending result slot. Returns true exactly once per mount;
    /// later submissions for the same identifier are stale.
    pub fn take_pending(&mut self, mount_id: &str) -> bool {
        match self.entries.get_mut(mount_id) {
            Some(entry) if entry.pending => {
                entry.pending = false;
                true
            }
            _ => false,
        }
    }

    pub fn has_callback(&self, mount_id: &str, name: &str) -> bool {
        self.entries
            .get(mount_id)
            .is_some_and(|e| e.callback_names.iter().any(|n| n == name))
    }

    /// Clear all pending result slots; cleared waiters never resolve
    pub fn clear_pending(&mut self) {
        for entry in self.entries.values_mut() {
            entry.pending = false;
        }
    }

    /// Stop patch forwarding for every mount
    pub fn teardown(&mut self) {
        for entry in self.entries.values_mut() {
            if let Some(handle) = entry.forwarder.take() {
                handle.abort();
            }
        }
    }
}

impl Drop for MountManager {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MountFramePayload;
    use crate::reactive::ReactiveRegistry;
    use serde_json::json;

    fn frame(mount_id: &str) -> MountFramePayload {
        MountFramePayload {
            mount_id: mount_id.to_string(),
            ui_source: "() => null".to_string(),
            initial_data: None,
            streamed_data_id: None,
            output_schema: json!({}),
            callback_names: Some(vec!["refresh".to_string()]),
        }
    }

    #[tokio::test]
    async fn pending_slot_claims_exactly_once() {
        let mut mounts = MountManager::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        mounts.register(
            MountEvent {
                frame: frame("m1"),
                patches: None,
            },
            tx,
        );
        assert!(matches!(rx.recv().await, Some(Outbound::Mount(_))));
        assert!(mounts.take_pending("m1"));
        assert!(!mounts.take_pending("m1"));
        assert!(!mounts.take_pending("ghost"));
    }

    #[tokio::test]
    async fn patches_forward_tagged_with_mount_id() {
        let reactive = ReactiveRegistry::new();
        let doc = reactive.wrap(json!({"n": 0}));
        let (subscription, patches) = reactive.subscribe(doc).unwrap();

        let mut mounts = MountManager::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        mounts.register(
            MountEvent {
                frame: frame("m1"),
                patches: Some((subscription, patches)),
            },
            tx,
        );
        let _ = rx.recv().await; // mount frame

        reactive.set(doc, vec![crate::reactive::PathSeg::key("n")], json!(7));
        match rx.recv().await.unwrap() {
            Outbound::DataPatch(p) => {
                assert_eq!(p.mount_id, "m1");
                assert_eq!(p.patches[0].value, Some(json!(7)));
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn callback_names_are_known() {
        let mut mounts = MountManager::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        mounts.register(
            MountEvent {
                frame: frame("m1"),
                patches: None,
            },
            tx,
        );
        assert!(mounts.has_callback("m1", "refresh"));
        assert!(!mounts.has_callback("m1", "ghost"));
    }
}
