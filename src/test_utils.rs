// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Test utilities: a mocked kube HTTP service, an in-memory cluster and a
//! recording event publisher.

use crate::events::EventPublisher;
use crate::kubernetes::cluster::{ClusterClient, Mapping};
use crate::types::ExtensionKind;
use async_trait::async_trait;
use chrono::Utc;
use http::{Request, Response};
use k8s_openapi::api::core::v1::ObjectReference;
use kube::api::{ApiResource, DynamicObject, GroupVersionKind, PropagationPolicy};
use kube::client::Body;
use kube::error::ErrorResponse;
use kube::runtime::events::EventType;
use kube::Client;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;

/// A mock HTTP service that returns predefined responses based on request paths.
#[derive(Clone)]
pub struct MockService {
    responses: Arc<Mutex<HashMap<(String, String), (u16, String)>>>,
}

impl MockService {
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Add a response for requests with `method` matching the exact path
    pub fn on(self, method: &str, path: &str, status: u16, body: &str) -> Self {
        self.responses.lock().insert(
            (method.to_string(), path.to_string()),
            (status, body.to_string()),
        );
        self
    }

    pub fn on_get(self, path: &str, status: u16, body: &str) -> Self {
        self.on("GET", path, status, body)
    }

    /// Build a kube Client from this mock service
    pub fn into_client(self) -> Client {
        Client::new(self, "https://kubernetes.default.svc")
    }

    fn find_response(&self, method: &str, path: &str) -> Option<(u16, String)> {
        self.responses
            .lock()
            .get(&(method.to_string(), path.to_string()))
            .cloned()
    }
}

impl Default for MockService {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<Request<Body>> for MockService {
    type Response = Response<Body>;
    type Error = tower::BoxError;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let method = req.method().to_string();
        let path = req.uri().path().to_string();

        let (status, body) = self
            .find_response(&method, &path)
            .unwrap_or_else(|| (404, not_found_json("resource", &path)));

        Box::pin(async move {
            Ok(Response::builder()
                .status(status)
                .header("content-type", "application/json")
                .body(Body::from(body.into_bytes()))
                .unwrap())
        })
    }
}

/// Create a 404 not found response
pub fn not_found_json(resource: &str, name: &str) -> String {
    json!({
        "kind": "Status",
        "apiVersion": "v1",
        "status": "Failure",
        "message": format!("{} \"{}\" not found", resource, name),
        "reason": "NotFound",
        "code": 404
    })
    .to_string()
}

pub fn api_error(code: u16, reason: &str, message: impl Into<String>) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: message.into(),
        reason: reason.to_string(),
        code,
    })
}

/// A recorded call against the [`FakeCluster`].
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub verb: &'static str,
    pub kind: String,
    pub namespace: String,
    pub name: String,
    pub propagation: Option<String>,
}

#[derive(Debug, Clone)]
struct Failure {
    verb: &'static str,
    kind: String,
    name: Option<String>,
    code: u16,
    reason: String,
}

type ObjectKey = (String, String, String, String);

/// In-memory [`ClusterClient`] with API server semantics close enough for
/// reconciler tests: resource versions, optimistic concurrency, finalizers,
/// immutable secrets, merge patches and label selectors.
pub struct FakeCluster {
    kinds: Mutex<HashMap<(String, String, String), Mapping>>,
    objects: Mutex<BTreeMap<ObjectKey, Value>>,
    failures: Mutex<Vec<Failure>>,
    calls: Mutex<Vec<Call>>,
    revision: AtomicU64,
}

const BUILTIN_KINDS: &[(&str, &str, &str, &str, bool)] = &[
    ("", "v1", "Namespace", "namespaces", false),
    ("", "v1", "ConfigMap", "configmaps", true),
    ("", "v1", "Secret", "secrets", true),
    ("", "v1", "Service", "services", true),
    ("", "v1", "ServiceAccount", "serviceaccounts", true),
    ("", "v1", "PersistentVolumeClaim", "persistentvolumeclaims", true),
    ("", "v1", "Pod", "pods", true),
    ("", "v1", "Event", "events", true),
    ("apps", "v1", "Deployment", "deployments", true),
    ("apps", "v1", "StatefulSet", "statefulsets", true),
    ("apps", "v1", "DaemonSet", "daemonsets", true),
    ("apps", "v1", "ReplicaSet", "replicasets", true),
    ("extensions", "v1beta1", "Deployment", "deployments", true),
    ("batch", "v1", "Job", "jobs", true),
    ("batch", "v1", "CronJob", "cronjobs", true),
    ("policy", "v1", "PodDisruptionBudget", "poddisruptionbudgets", true),
    ("networking.k8s.io", "v1", "NetworkPolicy", "networkpolicies", true),
    ("networking.k8s.io", "v1", "Ingress", "ingresses", true),
    ("rbac.authorization.k8s.io", "v1", "Role", "roles", true),
    ("rbac.authorization.k8s.io", "v1", "RoleBinding", "rolebindings", true),
    ("rbac.authorization.k8s.io", "v1", "ClusterRole", "clusterroles", false),
    ("rbac.authorization.k8s.io", "v1", "ClusterRoleBinding", "clusterrolebindings", false),
    ("apiextensions.k8s.io", "v1", "CustomResourceDefinition", "customresourcedefinitions", false),
    ("autoscaling", "v2", "HorizontalPodAutoscaler", "horizontalpodautoscalers", true),
    ("autoscaling.k8s.io", "v1alpha1", "Hvpa", "hvpas", true),
    ("autoscaling.k8s.io", "v1", "VerticalPodAutoscaler", "verticalpodautoscalers", true),
    ("coordination.k8s.io", "v1", "Lease", "leases", true),
    ("certificates.k8s.io", "v1", "CertificateSigningRequest", "certificatesigningrequests", false),
    ("core.gardener.cloud", "v1beta1", "Seed", "seeds", false),
    ("core.gardener.cloud", "v1beta1", "Shoot", "shoots", true),
    ("core.gardener.cloud", "v1beta1", "BackupBucket", "backupbuckets", false),
    ("core.gardener.cloud", "v1beta1", "BackupEntry", "backupentries", true),
    ("core.gardener.cloud", "v1beta1", "ControllerInstallation", "controllerinstallations", false),
    ("core.gardener.cloud", "v1beta1", "ControllerRegistration", "controllerregistrations", false),
    ("core.gardener.cloud", "v1beta1", "Project", "projects", false),
    ("core.gardener.cloud", "v1beta1", "SecretBinding", "secretbindings", true),
    ("core.gardener.cloud", "v1beta1", "CloudProfile", "cloudprofiles", false),
    ("core.gardener.cloud", "v1alpha1", "ShootState", "shootstates", true),
    ("resources.gardener.cloud", "v1alpha1", "ManagedResource", "managedresources", true),
    ("operations.gardener.cloud", "v1alpha1", "Bastion", "bastions", true),
    ("seedmanagement.gardener.cloud", "v1alpha1", "ManagedSeed", "managedseeds", true),
];

impl Default for FakeCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeCluster {
    pub fn new() -> Self {
        let fake = Self {
            kinds: Mutex::new(HashMap::new()),
            objects: Mutex::new(BTreeMap::new()),
            failures: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            revision: AtomicU64::new(0),
        };
        for (group, version, kind, plural, namespaced) in BUILTIN_KINDS {
            let gvk = GroupVersionKind::gvk(group, version, kind);
            fake.register(ApiResource::from_gvk_with_plural(&gvk, plural), *namespaced);
        }
        for kind in [
            ExtensionKind::Infrastructure,
            ExtensionKind::ControlPlane,
            ExtensionKind::Worker,
            ExtensionKind::DnsRecord,
            ExtensionKind::Extension,
            ExtensionKind::BackupBucket,
            ExtensionKind::BackupEntry,
        ] {
            fake.register(kind.api_resource(), kind.namespaced());
        }
        fake
    }

    /// Make a kind discoverable.
    pub fn register(&self, resource: ApiResource, namespaced: bool) {
        let key = (
            resource.group.clone(),
            resource.version.clone(),
            resource.kind.clone(),
        );
        self.kinds.lock().insert(key, Mapping { resource, namespaced });
    }

    /// Let every call of `verb` on `kind` (and `name`, if given) fail.
    pub fn fail(&self, verb: &'static str, kind: &str, name: Option<&str>, code: u16, reason: &str) {
        self.failures.lock().push(Failure {
            verb,
            kind: kind.to_string(),
            name: name.map(str::to_string),
            code,
            reason: reason.to_string(),
        });
    }

    pub fn clear_failures(&self) {
        self.failures.lock().clear();
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Calls of `verb` on `kind`.
    pub fn calls_of(&self, verb: &str, kind: &str) -> Vec<Call> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.verb == verb && c.kind == kind)
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Store a raw object, bypassing all API semantics.
    pub fn insert(&self, mut obj: Value) {
        let (group, _) = split_api_version(obj["apiVersion"].as_str().unwrap_or_default());
        let kind = obj["kind"].as_str().unwrap_or_default().to_string();
        let name = obj["metadata"]["name"].as_str().unwrap_or_default().to_string();
        let namespace = obj["metadata"]["namespace"].as_str().unwrap_or_default().to_string();
        if obj["metadata"].get("resourceVersion").is_none() {
            obj["metadata"]["resourceVersion"] = json!(self.next_revision());
        }
        self.objects.lock().insert((group, kind, namespace, name), obj);
    }

    /// The stored object, if any.
    pub fn object(&self, api_version: &str, kind: &str, namespace: &str, name: &str) -> Option<Value> {
        let (group, _) = split_api_version(api_version);
        self.objects
            .lock()
            .get(&(group, kind.to_string(), namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn exists(&self, api_version: &str, kind: &str, namespace: &str, name: &str) -> bool {
        self.object(api_version, kind, namespace, name).is_some()
    }

    /// All stored objects of a group and kind.
    pub fn objects_of(&self, group: &str, kind: &str) -> Vec<Value> {
        self.objects
            .lock()
            .iter()
            .filter(|((g, k, _, _), _)| g == group && k == kind)
            .map(|(_, v)| v.clone())
            .collect()
    }

    /// Remove an object regardless of finalizers.
    pub fn remove(&self, api_version: &str, kind: &str, namespace: &str, name: &str) {
        let (group, _) = split_api_version(api_version);
        self.objects
            .lock()
            .remove(&(group, kind.to_string(), namespace.to_string(), name.to_string()));
    }

    fn next_revision(&self) -> String {
        (self.revision.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn record(&self, verb: &'static str, resource: &ApiResource, namespace: &str, name: &str, propagation: Option<String>) {
        self.calls.lock().push(Call {
            verb,
            kind: resource.kind.clone(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            propagation,
        });
    }

    fn check_failure(&self, verb: &'static str, resource: &ApiResource, name: &str) -> kube::Result<()> {
        let failures = self.failures.lock();
        let hit = failures.iter().find(|f| {
            f.verb == verb && f.kind == resource.kind && f.name.as_deref().is_none_or(|n| n == name)
        });
        match hit {
            Some(f) => Err(api_error(f.code, &f.reason, format!("injected {} failure", verb))),
            None => Ok(()),
        }
    }

    fn is_namespaced(&self, resource: &ApiResource) -> bool {
        self.kinds
            .lock()
            .get(&(resource.group.clone(), resource.version.clone(), resource.kind.clone()))
            .map(|m| m.namespaced)
            .unwrap_or(true)
    }

    fn key(&self, resource: &ApiResource, namespace: Option<&str>, name: &str) -> ObjectKey {
        let namespace = if self.is_namespaced(resource) {
            namespace.unwrap_or_default().to_string()
        } else {
            String::new()
        };
        (resource.group.clone(), resource.kind.clone(), namespace, name.to_string())
    }

    fn not_found(resource: &ApiResource, name: &str) -> kube::Error {
        api_error(
            404,
            "NotFound",
            format!("{} \"{}\" not found", resource.plural, name),
        )
    }

    /// Store `next` under `key`, bumping the resource version and generation
    /// when anything changed. Objects with a deletion timestamp and no
    /// finalizers disappear.
    fn commit(&self, key: ObjectKey, previous: &Value, mut next: Value) -> Value {
        let mut objects = self.objects.lock();
        if without_volatile(previous) == without_volatile(&next) {
            return previous.clone();
        }
        if without_meta_and_status(previous) != without_meta_and_status(&next) {
            let generation = previous["metadata"]["generation"].as_i64().unwrap_or(1);
            next["metadata"]["generation"] = json!(generation + 1);
        }
        next["metadata"]["resourceVersion"] = json!(self.next_revision());
        if next["metadata"].get("deletionTimestamp").is_some_and(|t| !t.is_null())
            && finalizers_of(&next).is_empty()
        {
            objects.remove(&key);
        } else {
            objects.insert(key, next.clone());
        }
        next
    }

    fn stored(&self, key: &ObjectKey) -> Option<Value> {
        self.objects.lock().get(key).cloned()
    }
}

fn split_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

fn finalizers_of(obj: &Value) -> Vec<String> {
    obj["metadata"]["finalizers"]
        .as_array()
        .map(|f| f.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

fn without_volatile(obj: &Value) -> Value {
    let mut obj = obj.clone();
    if let Some(meta) = obj.get_mut("metadata").and_then(Value::as_object_mut) {
        meta.remove("resourceVersion");
        meta.remove("managedFields");
    }
    strip_nulls(&mut obj);
    obj
}

fn without_meta_and_status(obj: &Value) -> Value {
    let mut obj = obj.clone();
    if let Some(map) = obj.as_object_mut() {
        map.remove("metadata");
        map.remove("status");
    }
    strip_nulls(&mut obj);
    obj
}

fn strip_nulls(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            map.values_mut().for_each(strip_nulls);
        }
        Value::Array(items) => items.iter_mut().for_each(strip_nulls),
        _ => {}
    }
}

/// RFC 7386 JSON merge patch.
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(map) = target {
        for (key, value) in patch {
            if value.is_null() {
                map.remove(key);
            } else {
                merge_patch(map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

fn matches_selector(obj: &Value, selector: &str) -> bool {
    let labels = obj["metadata"]["labels"].as_object();
    let label = |k: &str| labels.and_then(|l| l.get(k)).and_then(Value::as_str);
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| {
            if let Some((k, v)) = term.split_once("!=") {
                label(k.trim()) != Some(v.trim())
            } else if let Some((k, v)) = term.split_once("==").or_else(|| term.split_once('=')) {
                label(k.trim()) == Some(v.trim())
            } else if let Some(k) = term.strip_prefix('!') {
                label(k.trim()).is_none()
            } else {
                label(term).is_some()
            }
        })
}

fn to_dynamic(obj: &Value) -> kube::Result<DynamicObject> {
    serde_json::from_value(obj.clone()).map_err(kube::Error::SerdeError)
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn resolve(&self, gvk: &GroupVersionKind) -> kube::Result<Option<Mapping>> {
        Ok(self
            .kinds
            .lock()
            .get(&(gvk.group.clone(), gvk.version.clone(), gvk.kind.clone()))
            .cloned())
    }

    fn refresh_discovery(&self) {}

    async fn get(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> kube::Result<Option<DynamicObject>> {
        self.check_failure("get", resource, name)?;
        self.stored(&self.key(resource, namespace, name))
            .map(|obj| to_dynamic(&obj))
            .transpose()
    }

    async fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> kube::Result<Vec<DynamicObject>> {
        self.check_failure("list", resource, "")?;
        let namespaced = self.is_namespaced(resource);
        let objects = self.objects.lock();
        objects
            .iter()
            .filter(|((g, k, ns, _), _)| {
                *g == resource.group
                    && *k == resource.kind
                    && (!namespaced || namespace.is_none_or(|want| want.is_empty() || want == ns))
            })
            .filter(|(_, obj)| label_selector.is_none_or(|s| matches_selector(obj, s)))
            .map(|(_, obj)| to_dynamic(obj))
            .collect()
    }

    async fn create(&self, resource: &ApiResource, obj: &DynamicObject) -> kube::Result<DynamicObject> {
        let name = obj.metadata.name.clone().unwrap_or_default();
        self.check_failure("create", resource, &name)?;
        let key = self.key(resource, obj.metadata.namespace.as_deref(), &name);
        self.record("create", resource, &key.2, &name, None);
        if name.is_empty() {
            return Err(api_error(422, "Invalid", "metadata.name: Required value"));
        }
        if self.stored(&key).is_some() {
            return Err(api_error(
                409,
                "AlreadyExists",
                format!("{} \"{}\" already exists", resource.plural, name),
            ));
        }

        let mut value = serde_json::to_value(obj).map_err(kube::Error::SerdeError)?;
        strip_nulls(&mut value);
        value["apiVersion"] = json!(resource.api_version);
        value["kind"] = json!(resource.kind);
        let revision = self.next_revision();
        let meta = &mut value["metadata"];
        if key.2.is_empty() {
            if let Some(m) = meta.as_object_mut() {
                m.remove("namespace");
            }
        } else {
            meta["namespace"] = json!(key.2);
        }
        meta["resourceVersion"] = json!(revision);
        meta["uid"] = json!(format!("uid-{}", revision));
        meta["creationTimestamp"] = json!(Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true));
        meta["generation"] = json!(1);

        self.objects.lock().insert(key, value.clone());
        to_dynamic(&value)
    }

    async fn update(&self, resource: &ApiResource, obj: &DynamicObject) -> kube::Result<DynamicObject> {
        let name = obj.metadata.name.clone().unwrap_or_default();
        self.check_failure("update", resource, &name)?;
        let key = self.key(resource, obj.metadata.namespace.as_deref(), &name);
        self.record("update", resource, &key.2, &name, None);
        let Some(previous) = self.stored(&key) else {
            return Err(Self::not_found(resource, &name));
        };

        let stored_rv = previous["metadata"]["resourceVersion"].as_str().unwrap_or_default();
        if let Some(rv) = obj.metadata.resource_version.as_deref() {
            if rv != stored_rv {
                return Err(api_error(
                    409,
                    "Conflict",
                    "the object has been modified; please apply your changes to the latest version and try again",
                ));
            }
        }

        let mut next = serde_json::to_value(obj).map_err(kube::Error::SerdeError)?;
        strip_nulls(&mut next);
        next["apiVersion"] = json!(resource.api_version);
        next["kind"] = json!(resource.kind);
        if previous["immutable"] == json!(true)
            && (previous.get("data") != next.get("data") || next["immutable"] != json!(true))
        {
            return Err(api_error(
                422,
                "Invalid",
                format!("{} \"{}\" is invalid: data: Forbidden: field is immutable when `immutable` is set", resource.plural, name),
            ));
        }
        for field in ["uid", "creationTimestamp", "deletionTimestamp", "generation", "namespace"] {
            match previous["metadata"].get(field) {
                Some(v) => next["metadata"][field] = v.clone(),
                None => {
                    if let Some(m) = next["metadata"].as_object_mut() {
                        m.remove(field);
                    }
                }
            }
        }
        next["metadata"]["resourceVersion"] = json!(stored_rv);
        match previous.get("status") {
            Some(status) => next["status"] = status.clone(),
            None => {
                if let Some(m) = next.as_object_mut() {
                    m.remove("status");
                }
            }
        }

        to_dynamic(&self.commit(key, &previous, next))
    }

    async fn patch(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        patch: &Value,
    ) -> kube::Result<DynamicObject> {
        self.check_failure("patch", resource, name)?;
        let key = self.key(resource, namespace, name);
        self.record("patch", resource, &key.2, name, None);
        let Some(previous) = self.stored(&key) else {
            return Err(Self::not_found(resource, name));
        };

        let mut patch = patch.clone();
        if let Some(rv) = patch
            .get_mut("metadata")
            .and_then(Value::as_object_mut)
            .and_then(|m| m.remove("resourceVersion"))
        {
            if rv.as_str().is_some_and(|rv| Some(rv) != previous["metadata"]["resourceVersion"].as_str()) {
                return Err(api_error(
                    409,
                    "Conflict",
                    "the object has been modified; please apply your changes to the latest version and try again",
                ));
            }
        }
        if let Some(p) = patch.as_object_mut() {
            p.remove("status");
        }

        let mut next = previous.clone();
        merge_patch(&mut next, &patch);
        to_dynamic(&self.commit(key, &previous, next))
    }

    async fn patch_status(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        patch: &Value,
    ) -> kube::Result<DynamicObject> {
        self.check_failure("patch_status", resource, name)?;
        let key = self.key(resource, namespace, name);
        self.record("patch_status", resource, &key.2, name, None);
        let Some(previous) = self.stored(&key) else {
            return Err(Self::not_found(resource, name));
        };

        let mut next = previous.clone();
        if let Some(status) = patch.get("status") {
            merge_patch(&mut next, &json!({ "status": status }));
        }
        to_dynamic(&self.commit(key, &previous, next))
    }

    async fn delete(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        propagation: Option<PropagationPolicy>,
    ) -> kube::Result<()> {
        self.check_failure("delete", resource, name)?;
        let key = self.key(resource, namespace, name);
        self.record(
            "delete",
            resource,
            &key.2,
            name,
            propagation.map(|p| format!("{:?}", p)),
        );
        let Some(previous) = self.stored(&key) else {
            return Err(Self::not_found(resource, name));
        };

        if finalizers_of(&previous).is_empty() {
            self.objects.lock().remove(&key);
            return Ok(());
        }
        if previous["metadata"].get("deletionTimestamp").is_none() {
            let mut next = previous.clone();
            next["metadata"]["deletionTimestamp"] =
                json!(Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true));
            self.commit(key, &previous, next);
        }
        Ok(())
    }
}

/// An event captured by [`RecordingEventPublisher`].
#[derive(Debug, Clone)]
pub struct RecordedEvent {
    pub kind: String,
    pub namespace: String,
    pub name: String,
    pub warning: bool,
    pub reason: String,
    pub action: String,
    pub note: Option<String>,
}

#[derive(Default)]
pub struct RecordingEventPublisher {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingEventPublisher {
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }

    pub fn reasons(&self) -> Vec<String> {
        self.events.lock().iter().map(|e| e.reason.clone()).collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish(
        &self,
        regarding: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        self.events.lock().push(RecordedEvent {
            kind: regarding.kind.clone().unwrap_or_default(),
            namespace: regarding.namespace.clone().unwrap_or_default(),
            name: regarding.name.clone().unwrap_or_default(),
            warning: type_ == EventType::Warning,
            reason: reason.to_string(),
            action: action.to_string(),
            note,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_map() -> ApiResource {
        ApiResource::from_gvk_with_plural(&GroupVersionKind::gvk("", "v1", "ConfigMap"), "configmaps")
    }

    fn make(name: &str, labels: Value) -> DynamicObject {
        serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": name, "namespace": "garden", "labels": labels},
            "data": {"k": "v"}
        }))
        .unwrap()
    }

    #[test]
    fn test_merge_patch() {
        let mut target = json!({"a": {"b": 1, "c": 2}, "d": [1]});
        merge_patch(&mut target, &json!({"a": {"b": null, "e": 3}, "d": [2]}));
        assert_eq!(target, json!({"a": {"c": 2, "e": 3}, "d": [2]}));
    }

    #[tokio::test]
    async fn test_noop_patch_keeps_resource_version() {
        let fake = FakeCluster::new();
        let created = fake.create(&config_map(), &make("a", json!({}))).await.unwrap();
        let patched = fake
            .patch(&config_map(), Some("garden"), "a", &json!({"data": {"k": "v"}}))
            .await
            .unwrap();
        assert_eq!(created.metadata.resource_version, patched.metadata.resource_version);
    }

    #[tokio::test]
    async fn test_list_with_selector() {
        let fake = FakeCluster::new();
        fake.create(&config_map(), &make("a", json!({"role": "x"}))).await.unwrap();
        fake.create(&config_map(), &make("b", json!({"role": "y"}))).await.unwrap();
        fake.create(&config_map(), &make("c", json!({}))).await.unwrap();

        let names = |objs: Vec<DynamicObject>| -> Vec<String> {
            objs.into_iter().filter_map(|o| o.metadata.name).collect()
        };
        assert_eq!(names(fake.list(&config_map(), None, Some("role=x")).await.unwrap()), vec!["a"]);
        assert_eq!(names(fake.list(&config_map(), None, Some("role!=x")).await.unwrap()), vec!["b", "c"]);
        assert_eq!(names(fake.list(&config_map(), None, Some("!role")).await.unwrap()), vec!["c"]);
        assert_eq!(names(fake.list(&config_map(), Some("other"), None).await.unwrap()).len(), 0);
    }

    #[tokio::test]
    async fn test_delete_with_finalizer_sets_timestamp() {
        let fake = FakeCluster::new();
        let mut obj = make("a", json!({}));
        obj.metadata.finalizers = Some(vec!["x".to_string()]);
        fake.create(&config_map(), &obj).await.unwrap();

        fake.delete(&config_map(), Some("garden"), "a", None).await.unwrap();
        let live = fake.get(&config_map(), Some("garden"), "a").await.unwrap().unwrap();
        assert!(live.metadata.deletion_timestamp.is_some());

        fake.patch(&config_map(), Some("garden"), "a", &json!({"metadata": {"finalizers": null}}))
            .await
            .unwrap();
        assert!(fake.get(&config_map(), Some("garden"), "a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let fake = FakeCluster::new();
        fake.fail("create", "ConfigMap", Some("a"), 500, "InternalError");
        let err = fake.create(&config_map(), &make("a", json!({}))).await.unwrap_err();
        assert!(matches!(err, kube::Error::Api(ae) if ae.code == 500));
        fake.create(&config_map(), &make("b", json!({}))).await.unwrap();
    }
}
