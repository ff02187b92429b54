//! In-memory API server for tests.
//!
//! [`FakeCluster`] implements [`ObjectStore`] with enough API server behavior
//! to drive the peering protocol end to end: resourceVersion and generation
//! bookkeeping, optimistic concurrency on replace, equality label selectors,
//! JSON merge patch, cascade deletion through namespaces and owner
//! references, finalizers holding deleted objects back, and status
//! preservation on writes. Reactors stand in for the
//! controllers that fill status fields asynchronously in a real cluster.
//!
//! Every mutating call is appended to an ordered log so tests can assert on
//! the sequence of writes, not only on the final state.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use kube::api::DynamicObject;
use kube::core::TypeMeta;
use parking_lot::Mutex;
use serde_json::Value;

use crate::store::{from_dynamic, to_dynamic, Object, ObjectStore, Scope};
use crate::{Error, Resources, Result};

/// Mutating verb recorded in the operation log
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verb {
    /// `create`
    Create,
    /// `replace`
    Replace,
    /// `patch` (merge)
    Patch,
    /// `delete` (only explicit deletes, not cascades)
    Delete,
}

/// One entry of the operation log
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedOp {
    /// What was done
    pub verb: Verb,
    /// Kind of the target
    pub kind: String,
    /// Namespace of the target
    pub namespace: Option<String>,
    /// Name of the target
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Key {
    group: String,
    kind: String,
    namespace: Option<String>,
    name: String,
}

impl Key {
    fn new(scope: &Scope, namespace: Option<&str>, name: &str) -> Self {
        Self {
            group: scope.resource.group.clone(),
            kind: scope.resource.kind.clone(),
            namespace: namespace.map(str::to_string),
            name: name.to_string(),
        }
    }
}

type ReactorFn = Box<dyn Fn(&mut DynamicObject) + Send + Sync>;

struct Reactor {
    kind: String,
    verbs: Vec<Verb>,
    react: ReactorFn,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<Key, DynamicObject>,
    next_version: u64,
    log: Vec<RecordedOp>,
    reactors: Vec<Reactor>,
    terminating: BTreeSet<Key>,
}

impl State {
    fn bump(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }

    fn record(&mut self, verb: Verb, key: &Key) {
        self.log.push(RecordedOp {
            verb,
            kind: key.kind.clone(),
            namespace: key.namespace.clone(),
            name: key.name.clone(),
        });
    }

    fn react(&self, kind: &str, verb: Verb, object: &mut DynamicObject) {
        for reactor in &self.reactors {
            if reactor.kind == kind && reactor.verbs.contains(&verb) {
                (reactor.react)(object);
            }
        }
    }

    fn remove_cascading(&mut self, key: &Key) {
        self.terminating.remove(key);
        let Some(removed) = self.objects.remove(key) else {
            return;
        };

        let mut dependents: Vec<Key> = Vec::new();
        if key.group.is_empty() && key.kind == "Namespace" {
            dependents.extend(
                self.objects
                    .keys()
                    .filter(|k| k.namespace.as_deref() == Some(key.name.as_str()))
                    .cloned(),
            );
        }
        if let Some(uid) = removed.metadata.uid.as_deref() {
            dependents.extend(
                self.objects
                    .iter()
                    .filter(|(_, obj)| {
                        obj.metadata
                            .owner_references
                            .iter()
                            .flatten()
                            .any(|o| o.uid == uid)
                    })
                    .map(|(k, _)| k.clone()),
            );
        }
        for dependent in dependents {
            self.remove_cascading(&dependent);
        }
    }
}

/// In-memory [`ObjectStore`]
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
}

fn object_name(object: &DynamicObject) -> Result<String> {
    object
        .metadata
        .name
        .clone()
        .ok_or_else(|| Error::validation("object has no name"))
}

fn object_namespace<'a>(scope: &'a Scope, object: &'a DynamicObject) -> Option<&'a str> {
    object
        .metadata
        .namespace
        .as_deref()
        .or(scope.namespace.as_deref())
}

fn spec_of(object: &DynamicObject) -> Option<&Value> {
    object.data.get("spec")
}

/// Whether a label map matches an equality-based selector
/// (`k=v`, `k==v`, `k!=v`, `k`, `!k`, comma separated)
pub fn selector_matches(selector: &str, labels: Option<&BTreeMap<String, String>>) -> bool {
    let empty = BTreeMap::new();
    let labels = labels.unwrap_or(&empty);
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| {
            if let Some((k, v)) = term.split_once("!=") {
                labels.get(k.trim()).map(String::as_str) != Some(v.trim())
            } else if let Some((k, v)) = term.split_once("==").or_else(|| term.split_once('=')) {
                labels.get(k.trim()).map(String::as_str) == Some(v.trim())
            } else if let Some(k) = term.strip_prefix('!') {
                !labels.contains_key(k.trim())
            } else {
                labels.contains_key(term)
            }
        })
}

/// RFC 7386 JSON merge patch
pub fn merge_patch(target: &mut Value, patch: &Value) {
    match patch {
        Value::Object(patch_map) => {
            if !target.is_object() {
                *target = Value::Object(Default::default());
            }
            if let Value::Object(target_map) = target {
                for (k, v) in patch_map {
                    if v.is_null() {
                        target_map.remove(k);
                    } else {
                        merge_patch(target_map.entry(k.clone()).or_insert(Value::Null), v);
                    }
                }
            }
        }
        other => *target = other.clone(),
    }
}

impl FakeCluster {
    /// Empty cluster
    pub fn new() -> Self {
        Self::default()
    }

    /// Typed facade over this fake
    pub fn resources(self: &Arc<Self>) -> Resources {
        Resources::new(self.clone())
    }

    /// Store an object as-is (status included), bypassing reactors and the log
    pub fn insert<K: Object>(&self, object: K) -> K {
        let scope = Scope::of::<K>(None);
        let mut dynamic = match to_dynamic(&object) {
            Ok(d) => d,
            Err(e) => panic!("cannot serialize {}: {}", scope.resource.kind, e),
        };
        let name = dynamic.metadata.name.clone().unwrap_or_default();
        let key = Key::new(&scope, dynamic.metadata.namespace.as_deref(), &name);

        let mut state = self.state.lock();
        let version = state.bump();
        dynamic.metadata.resource_version = Some(version.clone());
        dynamic.metadata.uid.get_or_insert_with(|| format!("uid-{}", version));
        dynamic.metadata.generation.get_or_insert(1);
        state.objects.insert(key, dynamic.clone());
        from_dynamic(dynamic).unwrap_or(object)
    }

    /// Read an object
    pub fn get<K: Object>(&self, namespace: Option<&str>, name: &str) -> Option<K> {
        let key = Key::new(&Scope::of::<K>(None), namespace, name);
        let obj = self.state.lock().objects.get(&key).cloned()?;
        from_dynamic(obj).ok()
    }

    /// All objects of a kind, optionally restricted to one namespace
    pub fn list<K: Object>(&self, namespace: Option<&str>) -> Vec<K> {
        let scope = Scope::of::<K>(None);
        self.state
            .lock()
            .objects
            .iter()
            .filter(|(k, _)| k.group == scope.resource.group && k.kind == scope.resource.kind)
            .filter(|(k, _)| namespace.is_none() || k.namespace.as_deref() == namespace)
            .filter_map(|(_, obj)| from_dynamic(obj.clone()).ok())
            .collect()
    }

    /// Mutate a stored object in place (status included), as a controller
    /// would. Returns false when the object does not exist.
    pub fn mutate<K: Object>(&self, namespace: Option<&str>, name: &str, f: impl FnOnce(&mut K)) -> bool {
        let key = Key::new(&Scope::of::<K>(None), namespace, name);
        let mut state = self.state.lock();
        let Some(current) = state.objects.get(&key).cloned() else {
            return false;
        };
        let Ok(mut typed) = from_dynamic::<K>(current) else {
            return false;
        };
        f(&mut typed);
        let Ok(mut updated) = to_dynamic(&typed) else {
            return false;
        };
        updated.metadata.resource_version = Some(state.bump());
        state.objects.insert(key, updated);
        true
    }

    /// Run `react` on every object of kind `K` written with one of `verbs`,
    /// after the write is applied and before it is stored. Delete reactors
    /// see the object as it was and their changes are discarded.
    pub fn on<K: Object>(&self, verbs: &[Verb], react: impl Fn(&mut K) + Send + Sync + 'static) {
        let kind = K::kind(&()).into_owned();
        self.state.lock().reactors.push(Reactor {
            kind,
            verbs: verbs.to_vec(),
            react: Box::new(move |obj: &mut DynamicObject| {
                let Ok(mut typed) = from_dynamic::<K>(obj.clone()) else {
                    return;
                };
                react(&mut typed);
                if let Ok(updated) = to_dynamic(&typed) {
                    *obj = updated;
                }
            }),
        });
    }

    /// Reactor for creates only
    pub fn on_create<K: Object>(&self, react: impl Fn(&mut K) + Send + Sync + 'static) {
        self.on::<K>(&[Verb::Create], react);
    }

    /// Reactor for creates, replaces and patches
    pub fn on_write<K: Object>(&self, react: impl Fn(&mut K) + Send + Sync + 'static) {
        self.on::<K>(&[Verb::Create, Verb::Replace, Verb::Patch], react);
    }

    /// Drop the finalizers of an object, as its controller would once done.
    /// An object already deleted goes away now. Returns false when the
    /// object does not exist.
    pub fn finalize<K: Object>(&self, namespace: Option<&str>, name: &str) -> bool {
        let key = Key::new(&Scope::of::<K>(None), namespace, name);
        let mut state = self.state.lock();
        if state.terminating.contains(&key) {
            state.remove_cascading(&key);
            return true;
        }
        match state.objects.get_mut(&key) {
            Some(obj) => {
                obj.metadata.finalizers = None;
                true
            }
            None => false,
        }
    }

    /// Whether an object was deleted but is held back by finalizers
    pub fn is_terminating<K: Object>(&self, namespace: Option<&str>, name: &str) -> bool {
        let key = Key::new(&Scope::of::<K>(None), namespace, name);
        self.state.lock().terminating.contains(&key)
    }

    /// The ordered log of mutating calls
    pub fn ops(&self) -> Vec<RecordedOp> {
        self.state.lock().log.clone()
    }

    /// Logged calls with the given verb
    pub fn ops_of_verb(&self, verb: Verb) -> Vec<RecordedOp> {
        self.ops().into_iter().filter(|op| op.verb == verb).collect()
    }

    /// Logged calls on the given kind
    pub fn ops_on(&self, kind: &str) -> Vec<RecordedOp> {
        self.ops().into_iter().filter(|op| op.kind == kind).collect()
    }

    /// Forget the log
    pub fn clear_ops(&self) {
        self.state.lock().log.clear();
    }
}

#[async_trait]
impl ObjectStore for FakeCluster {
    async fn get(&self, scope: &Scope, name: &str) -> Result<Option<DynamicObject>> {
        let key = Key::new(scope, scope.namespace.as_deref(), name);
        Ok(self.state.lock().objects.get(&key).cloned())
    }

    async fn list(&self, scope: &Scope, label_selector: &str) -> Result<Vec<DynamicObject>> {
        let state = self.state.lock();
        Ok(state
            .objects
            .iter()
            .filter(|(k, _)| k.group == scope.resource.group && k.kind == scope.resource.kind)
            .filter(|(k, _)| scope.namespace.is_none() || k.namespace == scope.namespace)
            .filter(|(_, obj)| selector_matches(label_selector, obj.metadata.labels.as_ref()))
            .map(|(_, obj)| {
                // lists omit per-item type meta
                let mut item = obj.clone();
                item.types = None;
                item
            })
            .collect())
    }

    async fn create(&self, scope: &Scope, object: &DynamicObject) -> Result<DynamicObject> {
        let name = object_name(object)?;
        let namespace = object_namespace(scope, object).map(str::to_string);
        let key = Key::new(scope, namespace.as_deref(), &name);

        let mut state = self.state.lock();
        if state.objects.contains_key(&key) {
            return Err(Error::AlreadyExists {
                kind: key.kind,
                name: scope.qualified(&name),
            });
        }
        if let Some(ns) = &namespace {
            let ns_key = Key {
                group: String::new(),
                kind: "Namespace".to_string(),
                namespace: None,
                name: ns.clone(),
            };
            if !state.objects.contains_key(&ns_key) {
                return Err(Error::not_found("Namespace", ns.clone()));
            }
        }

        let mut stored = object.clone();
        let version = state.bump();
        stored.types.get_or_insert_with(|| TypeMeta {
            api_version: scope.resource.api_version.clone(),
            kind: scope.resource.kind.clone(),
        });
        stored.metadata.namespace = namespace;
        stored.metadata.resource_version = Some(version.clone());
        stored.metadata.uid = Some(format!("uid-{}", version));
        stored.metadata.generation = Some(1);
        if !scope.resource.group.is_empty() {
            if let Some(map) = stored.data.as_object_mut() {
                map.remove("status");
            }
        }

        state.react(&key.kind, Verb::Create, &mut stored);
        state.record(Verb::Create, &key);
        state.objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn replace(&self, scope: &Scope, object: &DynamicObject) -> Result<DynamicObject> {
        let name = object_name(object)?;
        let key = Key::new(scope, object_namespace(scope, object), &name);

        let mut state = self.state.lock();
        let Some(current) = state.objects.get(&key).cloned() else {
            return Err(Error::not_found(&key.kind, scope.qualified(&name)));
        };
        if let Some(rv) = &object.metadata.resource_version {
            if current.metadata.resource_version.as_ref() != Some(rv) {
                return Err(Error::Conflict {
                    kind: key.kind,
                    name: scope.qualified(&name),
                });
            }
        }

        let mut stored = object.clone();
        stored.types = current.types.clone();
        stored.metadata.namespace = current.metadata.namespace.clone();
        stored.metadata.uid = current.metadata.uid.clone();
        stored.metadata.resource_version = Some(state.bump());
        let generation = current.metadata.generation.unwrap_or(1);
        stored.metadata.generation = Some(if spec_of(&stored) != spec_of(&current) {
            generation + 1
        } else {
            generation
        });
        if !scope.resource.group.is_empty() {
            if let Some(map) = stored.data.as_object_mut() {
                match current.data.get("status") {
                    Some(status) => {
                        map.insert("status".to_string(), status.clone());
                    }
                    None => {
                        map.remove("status");
                    }
                }
            }
        }

        state.react(&key.kind, Verb::Replace, &mut stored);
        state.record(Verb::Replace, &key);
        state.objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn patch_merge(&self, scope: &Scope, name: &str, patch: &Value) -> Result<DynamicObject> {
        let key = Key::new(scope, scope.namespace.as_deref(), name);

        let mut state = self.state.lock();
        let Some(current) = state.objects.get(&key).cloned() else {
            return Err(Error::not_found(&key.kind, scope.qualified(name)));
        };

        let mut value = serde_json::to_value(&current)?;
        merge_patch(&mut value, patch);
        let mut stored: DynamicObject = serde_json::from_value(value)?;
        stored.metadata.uid = current.metadata.uid.clone();
        stored.metadata.resource_version = Some(state.bump());
        let generation = current.metadata.generation.unwrap_or(1);
        stored.metadata.generation = Some(if spec_of(&stored) != spec_of(&current) {
            generation + 1
        } else {
            generation
        });

        state.react(&key.kind, Verb::Patch, &mut stored);
        state.record(Verb::Patch, &key);
        state.objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn delete(&self, scope: &Scope, name: &str) -> Result<bool> {
        let key = Key::new(scope, scope.namespace.as_deref(), name);
        let mut state = self.state.lock();
        let Some(mut doomed) = state.objects.get(&key).cloned() else {
            return Ok(false);
        };
        let held = doomed
            .metadata
            .finalizers
            .as_ref()
            .is_some_and(|f| !f.is_empty());
        state.react(&key.kind, Verb::Delete, &mut doomed);
        state.record(Verb::Delete, &key);
        if held {
            state.terminating.insert(key);
        } else {
            state.remove_cascading(&key);
        }
        Ok(true)
    }
}
