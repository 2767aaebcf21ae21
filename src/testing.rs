//! Seeding helpers and hand-written fakes shared by the unit tests

use crate::cache::{
    DbResourceCacheFactory, ResourceCacheFactory, ResourceConfigFactory, ResourceUser,
    UsedBaseResourceType, UsedConfigOrigin, UsedResourceCache, UsedResourceConfig,
};
use crate::db::{now_millis, SavedBuild, SavedResource, SavedResourceType, Store};
use crate::error::{HangarError, HangarResult};
use crate::lifecycle::{worker_resource_cache_id, ContainerMetadata, ContainerOwner};
use crate::radar::{CheckLock, RadarDb};
use crate::resource::types::{
    hash_json, JobDefinition, Params, PipelineDefinition, ResourceDefinition,
    ResourceTypeDefinition, Source, Version, VersionedResourceTypes,
};
use crate::resource::{FetchedVersion, Resource, ResourceFactory};
use crate::worker::{
    Container, ContainerConfig, ContainerRuntime, ContainerSpec, ProcessOutput, Volume,
    VolumeMount, Worker,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

pub fn version(v: &str) -> Version {
    Version::from([("ref".to_string(), v.to_string())])
}

pub async fn count(store: &Store, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(store.pool())
        .await
        .unwrap()
}

/// Ids of what [`pipeline_with_resource`] saved
#[derive(Debug, Clone)]
pub struct Seeded {
    pub pipeline_id: i64,
    pub resource_id: i64,
    pub resource_type_id: i64,
    pub job_id: i64,
    pub resource_source: Source,
}

/// Save `pipeline` with one `some-resource` and one `some-type`, both of
/// type `base_type`, and one `some-job`
pub async fn pipeline_with_resource(store: &Store, pipeline: &str, base_type: &str) -> Seeded {
    let resource_source = Source::from([("uri".to_string(), json!("https://example.com/repo.git"))]);
    let definition = PipelineDefinition {
        resources: vec![ResourceDefinition {
            name: "some-resource".to_string(),
            type_: base_type.to_string(),
            source: resource_source.clone(),
            tags: vec![],
            check_every: None,
        }],
        resource_types: vec![ResourceTypeDefinition {
            name: "some-type".to_string(),
            type_: base_type.to_string(),
            source: Source::from([("some-type".to_string(), json!("source"))]),
            privileged: false,
            tags: vec![],
            check_every: None,
        }],
        jobs: vec![JobDefinition {
            name: "some-job".to_string(),
        }],
    };

    let record = store.save_pipeline(pipeline, &definition).await.unwrap();
    let resource = store
        .resource(record.id, "some-resource")
        .await
        .unwrap()
        .unwrap();
    let resource_type = store
        .resource_type(record.id, "some-type")
        .await
        .unwrap()
        .unwrap();
    let job_id = store.job_id(record.id, "some-job").await.unwrap().unwrap();

    Seeded {
        pipeline_id: record.id,
        resource_id: resource.id,
        resource_type_id: resource_type.id,
        job_id,
        resource_source,
    }
}

/// A `git` cache used by a fresh one-off build
pub async fn used_cache_for_build(store: &Store) -> (SavedBuild, UsedResourceCache) {
    store.find_or_create_base_resource_type("git").await.unwrap();
    let build = store.create_one_off_build("one-off").await.unwrap();
    let cache = DbResourceCacheFactory::new(store.clone())
        .find_or_create_resource_cache(
            ResourceUser::Build(build.id),
            "git",
            &version("v1"),
            &Source::from([("uri".to_string(), json!("https://example.com/repo.git"))]),
            &Params::new(),
            &VersionedResourceTypes::default(),
        )
        .await
        .unwrap();
    (build, cache)
}

pub async fn cache_for_build(store: &Store) -> (SavedBuild, i64) {
    let (build, cache) = used_cache_for_build(store).await;
    (build, cache.id)
}

/// Insert a volume on worker `local` holding `resource_cache_id`
pub async fn insert_cache_volume(store: &Store, resource_cache_id: i64, state: &str) -> i64 {
    let mut conn = store.pool().acquire().await.unwrap();
    let wrc = worker_resource_cache_id(&mut *conn, "local", resource_cache_id)
        .await
        .unwrap();
    sqlx::query_scalar(
        "INSERT INTO volumes (handle, worker_name, state, worker_resource_cache_id, created_at) \
         VALUES (?, 'local', ?, ?, ?) RETURNING id",
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(state)
    .bind(wrc)
    .bind(now_millis())
    .fetch_one(&mut *conn)
    .await
    .unwrap()
}

/// Register `base_type` on `worker` and save a config for it.
/// Returns `(resource_config_id, worker_base_resource_type_id)`.
pub async fn base_type_on_worker(store: &Store, worker: &str, base_type: &str) -> (i64, i64) {
    let base = store
        .find_or_create_base_resource_type(base_type)
        .await
        .unwrap();
    let wbrt: i64 = sqlx::query_scalar(
        "INSERT INTO worker_base_resource_types (worker_name, base_resource_type_id, image) \
         VALUES (?, ?, 'example/image') RETURNING id",
    )
    .bind(worker)
    .bind(base.id)
    .fetch_one(store.pool())
    .await
    .unwrap();

    let build = store.create_one_off_build("checker").await.unwrap();
    let config = DbResourceCacheFactory::new(store.clone())
        .find_or_create_resource_config(
            ResourceUser::Build(build.id),
            base_type,
            &Source::new(),
            &VersionedResourceTypes::default(),
        )
        .await
        .unwrap();
    (config.id, wbrt)
}

/// Records runtime calls; handles passed to `fail_on` fail to be destroyed
#[derive(Debug, Default)]
pub struct FakeRuntime {
    containers: Mutex<Vec<ContainerConfig>>,
    volumes: Mutex<Vec<String>>,
    destroyed_containers: Mutex<Vec<String>>,
    destroyed_volumes: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
}

impl FakeRuntime {
    pub fn created_containers(&self) -> Vec<ContainerConfig> {
        self.containers.lock().unwrap().clone()
    }

    pub fn created_volumes(&self) -> Vec<String> {
        self.volumes.lock().unwrap().clone()
    }

    pub fn destroyed_containers(&self) -> Vec<String> {
        self.destroyed_containers.lock().unwrap().clone()
    }

    pub fn destroyed_volumes(&self) -> Vec<String> {
        self.destroyed_volumes.lock().unwrap().clone()
    }

    pub fn fail_on(&self, handle: &str) {
        self.failing.lock().unwrap().insert(handle.to_string());
    }

    pub fn clear_failures(&self) {
        self.failing.lock().unwrap().clear();
    }

    fn check(&self, handle: &str) -> HangarResult<()> {
        if self.failing.lock().unwrap().contains(handle) {
            return Err(HangarError::command_exec(
                format!("podman rm {handle}"),
                "device busy",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn is_available(&self) -> HangarResult<bool> {
        Ok(true)
    }

    async fn ensure_ready(&self) -> HangarResult<()> {
        Ok(())
    }

    async fn create_volume(&self, handle: &str, _parent: Option<&str>) -> HangarResult<()> {
        self.volumes.lock().unwrap().push(handle.to_string());
        Ok(())
    }

    async fn destroy_volume(&self, handle: &str) -> HangarResult<()> {
        self.check(handle)?;
        self.destroyed_volumes.lock().unwrap().push(handle.to_string());
        Ok(())
    }

    async fn create_container(&self, config: &ContainerConfig) -> HangarResult<()> {
        self.containers.lock().unwrap().push(config.clone());
        Ok(())
    }

    async fn run(
        &self,
        _handle: &str,
        _path: &str,
        _args: &[String],
        _stdin: &[u8],
        _abort: &CancellationToken,
    ) -> HangarResult<ProcessOutput> {
        Ok(ProcessOutput {
            exit_status: 0,
            stdout: b"[]".to_vec(),
            stderr: String::new(),
        })
    }

    async fn destroy_container(&self, handle: &str) -> HangarResult<()> {
        self.check(handle)?;
        self.destroyed_containers
            .lock()
            .unwrap()
            .push(handle.to_string());
        Ok(())
    }

    fn runtime_name(&self) -> &'static str {
        "Fake"
    }
}

#[derive(Debug, Default)]
pub struct FakeVolume {
    handle: String,
    privileged: Mutex<Option<bool>>,
    initialized_for: Mutex<Option<i64>>,
}

impl FakeVolume {
    pub fn new(handle: &str) -> Self {
        Self {
            handle: handle.to_string(),
            ..Default::default()
        }
    }

    pub fn privileged(&self) -> Option<bool> {
        *self.privileged.lock().unwrap()
    }

    pub fn initialized_for(&self) -> Option<i64> {
        *self.initialized_for.lock().unwrap()
    }
}

#[async_trait]
impl Volume for FakeVolume {
    fn handle(&self) -> &str {
        &self.handle
    }

    async fn set_privileged(&self, privileged: bool) -> HangarResult<()> {
        *self.privileged.lock().unwrap() = Some(privileged);
        Ok(())
    }

    async fn initialize_resource_cache(&self, cache: &UsedResourceCache) -> HangarResult<bool> {
        let mut initialized = self.initialized_for.lock().unwrap();
        if initialized.is_some() {
            return Ok(false);
        }
        *initialized = Some(cache.id);
        Ok(true)
    }
}

/// One `run_script` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptCall {
    pub path: String,
    pub args: Vec<String>,
    pub stdin: Vec<u8>,
}

/// Answers scripts from a queue of canned outputs
pub struct FakeContainer {
    handle: String,
    mounts: Vec<VolumeMount>,
    responses: Mutex<VecDeque<ProcessOutput>>,
    calls: Mutex<Vec<ScriptCall>>,
    hang: AtomicBool,
}

impl FakeContainer {
    pub fn new(handle: &str, mounts: Vec<VolumeMount>) -> Self {
        Self {
            handle: handle.to_string(),
            mounts,
            responses: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            hang: AtomicBool::new(false),
        }
    }

    pub fn respond(&self, output: ProcessOutput) {
        self.responses.lock().unwrap().push_back(output);
    }

    /// Scripts block until aborted
    pub fn hang_until_aborted(&self) {
        self.hang.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<ScriptCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Container for FakeContainer {
    fn handle(&self) -> &str {
        &self.handle
    }

    fn volume_mounts(&self) -> &[VolumeMount] {
        &self.mounts
    }

    async fn run_script(
        &self,
        path: &str,
        args: &[String],
        stdin: &[u8],
        abort: &CancellationToken,
    ) -> HangarResult<ProcessOutput> {
        self.calls.lock().unwrap().push(ScriptCall {
            path: path.to_string(),
            args: args.to_vec(),
            stdin: stdin.to_vec(),
        });

        if self.hang.load(Ordering::SeqCst) {
            abort.cancelled().await;
            return Err(HangarError::Aborted);
        }

        let next = self.responses.lock().unwrap().pop_front();
        next.ok_or_else(|| HangarError::InvalidData(format!("no response scripted for {path}")))
    }
}

/// Hands out one container and remembers the owners asked for
pub struct FakeWorker {
    name: String,
    container: Arc<FakeContainer>,
    initialized: Mutex<Option<Arc<FakeVolume>>>,
    owners: Mutex<Vec<ContainerOwner>>,
}

impl FakeWorker {
    pub fn new(name: &str, container: Arc<FakeContainer>) -> Self {
        Self {
            name: name.to_string(),
            container,
            initialized: Mutex::new(None),
            owners: Mutex::new(Vec::new()),
        }
    }

    pub fn set_initialized(&self, volume: Arc<FakeVolume>) {
        *self.initialized.lock().unwrap() = Some(volume);
    }

    pub fn owners(&self) -> Vec<ContainerOwner> {
        self.owners.lock().unwrap().clone()
    }
}

#[async_trait]
impl Worker for FakeWorker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check_session_owner(
        &self,
        config: &UsedResourceConfig,
        expires_at: DateTime<Utc>,
    ) -> HangarResult<ContainerOwner> {
        Ok(ContainerOwner::CheckSession {
            resource_config_id: config.id,
            worker_base_resource_type_id: 1,
            expires_at,
        })
    }

    async fn find_or_create_container(
        &self,
        owner: &ContainerOwner,
        _metadata: &ContainerMetadata,
        _spec: &ContainerSpec,
        _types: &VersionedResourceTypes,
    ) -> HangarResult<Arc<dyn Container>> {
        self.owners.lock().unwrap().push(owner.clone());
        let container: Arc<dyn Container> = self.container.clone();
        Ok(container)
    }

    async fn find_or_create_volume_for_resource_cache(
        &self,
        _cache: &UsedResourceCache,
    ) -> HangarResult<Arc<dyn Volume>> {
        let existing = self.initialized.lock().unwrap().clone();
        let volume: Arc<dyn Volume> = match existing {
            Some(volume) => volume,
            None => Arc::new(FakeVolume::new("cache-volume")),
        };
        Ok(volume)
    }

    async fn find_initialized_volume_for_resource_cache(
        &self,
        _cache: &UsedResourceCache,
    ) -> HangarResult<Option<Arc<dyn Volume>>> {
        let found = self.initialized.lock().unwrap().clone();
        Ok(found.map(|volume| volume as Arc<dyn Volume>))
    }
}

#[derive(Debug, Default)]
struct RadarState {
    paused: bool,
    resources: Vec<SavedResource>,
    resource_types: Vec<SavedResourceType>,
    latest: HashMap<i64, Version>,
    saved: HashMap<i64, Vec<Vec<Version>>>,
    fail_saves: bool,
    denied_locks: usize,
    lock_requests: Vec<(Duration, bool)>,
}

/// In-memory [`RadarDb`]
pub struct FakeRadarDb {
    pipeline_name: String,
    state: Mutex<RadarState>,
    releases: Arc<AtomicUsize>,
    released: Arc<Notify>,
}

impl FakeRadarDb {
    pub fn new(pipeline_name: &str) -> Self {
        Self {
            pipeline_name: pipeline_name.to_string(),
            state: Mutex::new(RadarState::default()),
            releases: Arc::new(AtomicUsize::new(0)),
            released: Arc::new(Notify::new()),
        }
    }

    fn next_id(state: &RadarState) -> i64 {
        (state.resources.len() + state.resource_types.len() + 1) as i64
    }

    pub fn add_resource(&self, name: &str, type_: &str) {
        let mut state = self.state.lock().unwrap();
        let id = Self::next_id(&state);
        state.resources.push(SavedResource {
            id,
            pipeline_id: 1,
            pipeline_name: self.pipeline_name.clone(),
            name: name.to_string(),
            type_: type_.to_string(),
            source: Source::from([("uri".to_string(), json!(format!("https://example.com/{name}")))]),
            source_hash: String::new(),
            tags: vec![],
            check_every: None,
            paused: false,
            active: true,
            check_error: None,
        });
    }

    pub fn add_resource_type(&self, name: &str, type_: &str, privileged: bool) {
        let mut state = self.state.lock().unwrap();
        let id = Self::next_id(&state);
        state.resource_types.push(SavedResourceType {
            id,
            pipeline_id: 1,
            name: name.to_string(),
            type_: type_.to_string(),
            source: Source::from([("repository".to_string(), json!(format!("example/{name}")))]),
            privileged,
            tags: vec![],
            check_every: None,
            version: None,
            active: true,
            check_error: None,
        });
    }

    fn with_resource<T>(&self, name: &str, f: impl FnOnce(&mut SavedResource) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        let resource = state
            .resources
            .iter_mut()
            .find(|r| r.name == name)
            .unwrap();
        f(resource)
    }

    fn with_resource_type<T>(&self, name: &str, f: impl FnOnce(&mut SavedResourceType) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        let resource_type = state
            .resource_types
            .iter_mut()
            .find(|r| r.name == name)
            .unwrap();
        f(resource_type)
    }

    pub fn resource_id(&self, name: &str) -> i64 {
        self.with_resource(name, |r| r.id)
    }

    pub fn resource_type_id(&self, name: &str) -> i64 {
        self.with_resource_type(name, |t| t.id)
    }

    pub fn set_paused(&self, paused: bool) {
        self.state.lock().unwrap().paused = paused;
    }

    pub fn set_resource_paused(&self, name: &str, paused: bool) {
        self.with_resource(name, |r| r.paused = paused);
    }

    pub fn set_check_every(&self, name: &str, value: &str) {
        self.with_resource(name, |r| r.check_every = Some(value.to_string()));
    }

    pub fn set_latest(&self, name: &str, version: Version) {
        let id = self.resource_id(name);
        self.state.lock().unwrap().latest.insert(id, version);
    }

    /// Refuse the next `n` lock requests
    pub fn deny_locks(&self, n: usize) {
        self.state.lock().unwrap().denied_locks = n;
    }

    pub fn fail_saves(&self) {
        self.state.lock().unwrap().fail_saves = true;
    }

    /// Every batch passed to `save_resource_versions`
    pub fn saved(&self, name: &str) -> Vec<Vec<Version>> {
        let id = self.resource_id(name);
        self.state
            .lock()
            .unwrap()
            .saved
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn lock_requests(&self) -> Vec<(Duration, bool)> {
        self.state.lock().unwrap().lock_requests.clone()
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn check_error(&self, name: &str) -> Option<String> {
        self.with_resource(name, |r| r.check_error.clone())
    }

    pub fn resource_type_check_error(&self, name: &str) -> Option<String> {
        self.with_resource_type(name, |t| t.check_error.clone())
    }

    pub fn resource_type_version(&self, name: &str) -> Option<Version> {
        self.with_resource_type(name, |t| t.version.clone())
    }

    fn lock(&self, interval: Duration, immediate: bool) -> Option<Box<dyn CheckLock>> {
        let mut state = self.state.lock().unwrap();
        state.lock_requests.push((interval, immediate));
        if state.denied_locks > 0 {
            state.denied_locks -= 1;
            return None;
        }
        Some(Box::new(FakeLock {
            releases: self.releases.clone(),
            released: self.released.clone(),
        }))
    }
}

struct FakeLock {
    releases: Arc<AtomicUsize>,
    released: Arc<Notify>,
}

#[async_trait]
impl CheckLock for FakeLock {
    async fn release(&self) -> HangarResult<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.released.notify_waiters();
        Ok(())
    }
}

#[async_trait]
impl RadarDb for FakeRadarDb {
    fn pipeline_id(&self) -> i64 {
        1
    }

    fn pipeline_name(&self) -> &str {
        &self.pipeline_name
    }

    async fn is_paused(&self) -> HangarResult<bool> {
        Ok(self.state.lock().unwrap().paused)
    }

    async fn resource(&self, name: &str) -> HangarResult<Option<SavedResource>> {
        let state = self.state.lock().unwrap();
        Ok(state.resources.iter().find(|r| r.name == name).cloned())
    }

    async fn resource_type(&self, name: &str) -> HangarResult<Option<SavedResourceType>> {
        let state = self.state.lock().unwrap();
        Ok(state.resource_types.iter().find(|t| t.name == name).cloned())
    }

    async fn resource_types(&self) -> HangarResult<VersionedResourceTypes> {
        let state = self.state.lock().unwrap();
        Ok(state
            .resource_types
            .iter()
            .map(SavedResourceType::to_versioned)
            .collect())
    }

    async fn latest_version(&self, resource_id: i64) -> HangarResult<Option<Version>> {
        Ok(self.state.lock().unwrap().latest.get(&resource_id).cloned())
    }

    async fn save_resource_versions(
        &self,
        resource_id: i64,
        versions: &[Version],
    ) -> HangarResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_saves {
            return Err(HangarError::Conflict("disk full".to_string()));
        }
        state
            .saved
            .entry(resource_id)
            .or_default()
            .push(versions.to_vec());
        if let Some(last) = versions.last() {
            state.latest.insert(resource_id, last.clone());
        }
        Ok(())
    }

    async fn save_resource_type_version(
        &self,
        resource_type_id: i64,
        version: &Version,
    ) -> HangarResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(t) = state
            .resource_types
            .iter_mut()
            .find(|t| t.id == resource_type_id)
        {
            t.version = Some(version.clone());
        }
        Ok(())
    }

    async fn set_resource_check_error(
        &self,
        resource_id: i64,
        check_error: Option<&str>,
    ) -> HangarResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(r) = state.resources.iter_mut().find(|r| r.id == resource_id) {
            r.check_error = check_error.map(str::to_string);
        }
        Ok(())
    }

    async fn set_resource_type_check_error(
        &self,
        resource_type_id: i64,
        check_error: Option<&str>,
    ) -> HangarResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(t) = state
            .resource_types
            .iter_mut()
            .find(|t| t.id == resource_type_id)
        {
            t.check_error = check_error.map(str::to_string);
        }
        Ok(())
    }

    async fn acquire_resource_checking_lock(
        &self,
        _resource_id: i64,
        interval: Duration,
        immediate: bool,
    ) -> HangarResult<Option<Box<dyn CheckLock>>> {
        Ok(self.lock(interval, immediate))
    }

    async fn acquire_resource_type_checking_lock(
        &self,
        _resource_type_id: i64,
        interval: Duration,
        immediate: bool,
    ) -> HangarResult<Option<Box<dyn CheckLock>>> {
        Ok(self.lock(interval, immediate))
    }

    fn lock_released(&self) -> Notified<'_> {
        self.released.notified()
    }
}

/// Resolves every config to base type 1 unless told to fail
#[derive(Default)]
pub struct FakeConfigFactory {
    calls: Mutex<Vec<(ResourceUser, String)>>,
    failure: Mutex<Option<HangarError>>,
}

impl FakeConfigFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next call with `err`
    pub fn fail_with(&self, err: HangarError) {
        *self.failure.lock().unwrap() = Some(err);
    }

    pub fn calls(&self) -> Vec<(ResourceUser, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResourceConfigFactory for FakeConfigFactory {
    async fn find_or_create_resource_config(
        &self,
        user: ResourceUser,
        type_name: &str,
        source: &Source,
        _types: &VersionedResourceTypes,
    ) -> HangarResult<UsedResourceConfig> {
        self.calls
            .lock()
            .unwrap()
            .push((user, type_name.to_string()));
        if let Some(err) = self.failure.lock().unwrap().take() {
            return Err(err);
        }
        Ok(UsedResourceConfig {
            id: 1,
            origin: UsedConfigOrigin::BaseType(UsedBaseResourceType {
                id: 1,
                name: type_name.to_string(),
            }),
            source_hash: hash_json(source)?,
        })
    }
}

#[derive(Default)]
struct CheckState {
    responses: VecDeque<HangarResult<Vec<Version>>>,
    checks: Vec<Option<Version>>,
    specs: Vec<ContainerSpec>,
}

/// Builds resources whose checks answer from a queue
#[derive(Default)]
pub struct FakeResourceFactory {
    state: Arc<Mutex<CheckState>>,
}

impl FakeResourceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, result: HangarResult<Vec<Version>>) {
        self.state.lock().unwrap().responses.push_back(result);
    }

    /// The `from` version of every check, in order
    pub fn checks(&self) -> Vec<Option<Version>> {
        self.state.lock().unwrap().checks.clone()
    }

    pub fn specs(&self) -> Vec<ContainerSpec> {
        self.state.lock().unwrap().specs.clone()
    }
}

#[async_trait]
impl ResourceFactory for FakeResourceFactory {
    async fn new_check_resource(
        &self,
        _config: &UsedResourceConfig,
        _session_ttl: Duration,
        _metadata: &ContainerMetadata,
        spec: &ContainerSpec,
        _types: &VersionedResourceTypes,
    ) -> HangarResult<Box<dyn Resource>> {
        self.state.lock().unwrap().specs.push(spec.clone());
        Ok(Box::new(FakeResource {
            state: self.state.clone(),
        }))
    }
}

struct FakeResource {
    state: Arc<Mutex<CheckState>>,
}

#[async_trait]
impl Resource for FakeResource {
    async fn check(
        &self,
        _source: &Source,
        from: Option<&Version>,
        _abort: &CancellationToken,
    ) -> HangarResult<Vec<Version>> {
        let mut state = self.state.lock().unwrap();
        state.checks.push(from.cloned());
        state.responses.pop_front().unwrap_or_else(|| Ok(vec![]))
    }

    async fn get(
        &self,
        _mount_path: &str,
        _source: &Source,
        _params: &Params,
        _version: &Version,
        _abort: &CancellationToken,
    ) -> HangarResult<FetchedVersion> {
        Err(HangarError::InvalidData("check-only resource".to_string()))
    }
}
