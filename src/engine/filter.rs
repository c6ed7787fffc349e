//! Event filtering ahead of the workqueue
//!
//! Status writes by the engine itself produce watch events. Without this
//! filter every one of them would trigger a fresh attempt.
//!
//! Memory is bounded by the live objects: keys are dropped on delete events
//! and on relists that no longer return them.

use std::collections::{HashMap, HashSet};

use futures::{future, Stream, StreamExt};
use kube::runtime::watcher;
use kube::ResourceExt;

use super::resource::{generation_of, ObjectKey, Reconcilable};

/// Whether an update from `old` to `new` warrants a reconcile
///
/// True when the generation increased, deletion started, any of labels,
/// annotations, finalizers or owner references differ, or the observable
/// status summary (`isReady` and `checks`) differs.
pub fn reconcile_filter<K: Reconcilable>(old: &K, new: &K) -> bool {
    if generation_of(new) > generation_of(old) {
        return true;
    }

    let (old_meta, new_meta) = (old.meta(), new.meta());
    if old_meta.deletion_timestamp != new_meta.deletion_timestamp {
        return true;
    }
    if old.labels() != new.labels()
        || old.annotations() != new.annotations()
        || old.finalizers() != new.finalizers()
        || old_meta.owner_references != new_meta.owner_references
    {
        return true;
    }

    old.observable_summary() != new.observable_summary()
}

fn is_gone<K: Reconcilable>(obj: &K) -> bool {
    obj.meta().deletion_timestamp.is_some() && obj.finalizers().is_empty()
}

/// Turn watcher events into the objects worth reconciling
///
/// Applied objects pass when [`reconcile_filter`] accepts them against the
/// last version seen for their key; the first version always passes.
/// Deleted objects always pass and are forgotten. A relist forgets every key
/// it did not return. Errors pass through so the controller's backoff still
/// sees them.
pub fn dedup_events<K, E, S>(events: S) -> impl Stream<Item = Result<K, E>>
where
    K: Reconcilable,
    S: Stream<Item = Result<watcher::Event<K>, E>>,
{
    let mut last_seen: HashMap<ObjectKey, K> = HashMap::new();
    let mut relisted: Option<HashSet<ObjectKey>> = None;
    events.filter_map(move |event| {
        let forward = match event {
            Ok(watcher::Event::Apply(obj) | watcher::Event::InitApply(obj)) => {
                let key = ObjectKey::of(&obj);
                if let Some(keys) = relisted.as_mut() {
                    keys.insert(key.clone());
                }
                let pass = last_seen
                    .get(&key)
                    .map_or(true, |old| reconcile_filter(old, &obj));
                if is_gone(&obj) {
                    last_seen.remove(&key);
                } else {
                    last_seen.insert(key, obj.clone());
                }
                pass.then_some(Ok(obj))
            }
            Ok(watcher::Event::Delete(obj)) => {
                last_seen.remove(&ObjectKey::of(&obj));
                Some(Ok(obj))
            }
            Ok(watcher::Event::Init) => {
                relisted = Some(HashSet::new());
                None
            }
            Ok(watcher::Event::InitDone) => {
                if let Some(keys) = relisted.take() {
                    last_seen.retain(|key, _| keys.contains(key));
                }
                None
            }
            Err(err) => Some(Err(err)),
        };
        future::ready(forward)
    })
}
