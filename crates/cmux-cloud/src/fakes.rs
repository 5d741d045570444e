//! In-memory fakes for the cloud traits (testing only).
//!
//! `FakeCloud` boots `FakeInstance`s that record every call and answer
//! execs from a scriptable response table, so downstream crates can test
//! orchestration and retry behavior without a provider.

use crate::api::{BootSpec, CloudClient, ExecResult, InstanceHandle, SnapshotInfo, TtlAction};
use crate::error::CloudError;
use crate::CloudResult;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// Scripted answer for commands containing a marker substring.
struct ScriptedResponse {
    marker: String,
    result: ExecResult,
    /// Remaining transient failures to inject before `result` is returned.
    transient_failures: u32,
}

/// In-memory instance recording all interactions.
#[derive(Default)]
pub struct FakeInstance {
    id: String,
    exec_log: Mutex<Vec<String>>,
    responses: Mutex<Vec<ScriptedResponse>>,
    uploads: Mutex<Vec<(PathBuf, String)>>,
    upload_failures: Mutex<u32>,
    exposed: Mutex<Vec<(String, u16, String)>>,
    ttl: Mutex<Option<(u64, TtlAction)>>,
    snapshot_counter: AtomicU32,
    wake_on_http: AtomicBool,
    stopped: AtomicBool,
}

impl FakeInstance {
    pub fn new(id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            ..Self::default()
        })
    }

    /// Script the result for any command containing `marker`. Later entries
    /// win over earlier ones so tests can override defaults.
    pub fn respond_to(&self, marker: impl Into<String>, result: ExecResult) {
        self.responses.lock().unwrap().insert(
            0,
            ScriptedResponse {
                marker: marker.into(),
                result,
                transient_failures: 0,
            },
        );
    }

    /// Script `count` transient transport failures for commands containing
    /// `marker` before they start succeeding.
    pub fn fail_transient_times(&self, marker: impl Into<String>, count: u32) {
        self.responses.lock().unwrap().insert(
            0,
            ScriptedResponse {
                marker: marker.into(),
                result: ExecResult {
                    exit_code: 0,
                    stdout: String::new(),
                    stderr: String::new(),
                },
                transient_failures: count,
            },
        );
    }

    /// Script `count` transient failures for the next uploads.
    pub fn fail_upload_times(&self, count: u32) {
        *self.upload_failures.lock().unwrap() = count;
    }

    /// Every command executed, in order.
    pub fn commands(&self) -> Vec<String> {
        self.exec_log.lock().unwrap().clone()
    }

    pub fn uploads(&self) -> Vec<(PathBuf, String)> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn exposed_services(&self) -> Vec<(String, u16, String)> {
        self.exposed.lock().unwrap().clone()
    }

    pub fn current_ttl(&self) -> Option<(u64, TtlAction)> {
        *self.ttl.lock().unwrap()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn wake_on_http(&self) -> bool {
        self.wake_on_http.load(Ordering::SeqCst)
    }

    pub fn snapshot_count(&self) -> u32 {
        self.snapshot_counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InstanceHandle for FakeInstance {
    fn id(&self) -> &str {
        &self.id
    }

    async fn wait_until_ready(&self) -> CloudResult<()> {
        Ok(())
    }

    async fn expose_http_service(&self, name: &str, port: u16) -> CloudResult<String> {
        let url = format!("https://{name}-{}.http.cloud.morph.so", self.id);
        self.exposed
            .lock()
            .unwrap()
            .push((name.to_string(), port, url.clone()));
        Ok(url)
    }

    async fn upload(&self, local: &Path, remote: &str) -> CloudResult<()> {
        {
            let mut failures = self.upload_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(CloudError::Transient("sftp channel closed".to_string()));
            }
        }
        self.uploads
            .lock()
            .unwrap()
            .push((local.to_path_buf(), remote.to_string()));
        Ok(())
    }

    async fn exec(&self, command: &str) -> CloudResult<ExecResult> {
        self.exec_log.lock().unwrap().push(command.to_string());
        let mut responses = self.responses.lock().unwrap();
        for scripted in responses.iter_mut() {
            if command.contains(&scripted.marker) {
                if scripted.transient_failures > 0 {
                    scripted.transient_failures -= 1;
                    return Err(CloudError::Transient("channel closed".to_string()));
                }
                return Ok(scripted.result.clone());
            }
        }
        Ok(ExecResult {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
        })
    }

    async fn snapshot(&self) -> CloudResult<SnapshotInfo> {
        let n = self.snapshot_counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SnapshotInfo {
            id: format!("snapshot_{}_{n}", self.id),
        })
    }

    async fn set_ttl(&self, ttl_seconds: u64, ttl_action: TtlAction) -> CloudResult<()> {
        *self.ttl.lock().unwrap() = Some((ttl_seconds, ttl_action));
        Ok(())
    }

    async fn set_wake_on(&self, wake_on_http: bool) -> CloudResult<()> {
        self.wake_on_http.store(wake_on_http, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> CloudResult<()> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// In-memory provider handing out [`FakeInstance`]s.
#[derive(Default)]
pub struct FakeCloud {
    boot_counter: AtomicU32,
    booted: Mutex<Vec<(BootSpec, Arc<FakeInstance>)>>,
}

impl FakeCloud {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every instance booted so far, in boot order.
    pub fn instances(&self) -> Vec<Arc<FakeInstance>> {
        self.booted
            .lock()
            .unwrap()
            .iter()
            .map(|(_, inst)| Arc::clone(inst))
            .collect()
    }

    pub fn boot_specs(&self) -> Vec<BootSpec> {
        self.booted
            .lock()
            .unwrap()
            .iter()
            .map(|(spec, _)| spec.clone())
            .collect()
    }
}

#[async_trait]
impl CloudClient for FakeCloud {
    async fn boot(&self, spec: &BootSpec) -> CloudResult<Arc<dyn InstanceHandle>> {
        let n = self.boot_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let instance = FakeInstance::new(format!("morphvm_fake{n}"));
        self.booted
            .lock()
            .unwrap()
            .push((spec.clone(), Arc::clone(&instance)));
        Ok(instance)
    }

    async fn get_instance(&self, instance_id: &str) -> CloudResult<Arc<dyn InstanceHandle>> {
        self.booted
            .lock()
            .unwrap()
            .iter()
            .find(|(_, inst)| inst.id == instance_id)
            .map(|(_, inst)| Arc::clone(inst) as Arc<dyn InstanceHandle>)
            .ok_or_else(|| CloudError::Api {
                status: 404,
                message: format!("instance not found: {instance_id}"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_instance_records_and_scripts_execs() {
        let instance = FakeInstance::new("morphvm_t1");
        instance.respond_to(
            "cargo --version",
            ExecResult {
                exit_code: 0,
                stdout: "cargo 1.80.0\n".into(),
                stderr: String::new(),
            },
        );
        instance.respond_to(
            "broken",
            ExecResult {
                exit_code: 2,
                stdout: String::new(),
                stderr: "boom".into(),
            },
        );

        let ok = instance.exec("cargo --version").await.unwrap();
        assert_eq!(ok.stdout, "cargo 1.80.0\n");
        let bad = instance.exec("run broken thing").await.unwrap();
        assert_eq!(bad.exit_code, 2);
        let default = instance.exec("echo fine").await.unwrap();
        assert!(default.success());
        assert_eq!(instance.commands().len(), 3);
    }

    #[tokio::test]
    async fn transient_failures_run_out() {
        let instance = FakeInstance::new("morphvm_t2");
        instance.fail_transient_times("flaky", 2);

        assert!(matches!(
            instance.exec("flaky once").await,
            Err(CloudError::Transient(_))
        ));
        assert!(matches!(
            instance.exec("flaky twice").await,
            Err(CloudError::Transient(_))
        ));
        assert!(instance.exec("flaky thrice").await.unwrap().success());
    }

    #[tokio::test]
    async fn boot_hands_out_distinct_instances() {
        let cloud = FakeCloud::new();
        let spec = BootSpec {
            snapshot_id: "snapshot_base".into(),
            vcpus: 4,
            memory_mib: 16_384,
            disk_size_mib: 49_152,
            ttl_seconds: 3600,
            ttl_action: TtlAction::Pause,
        };
        let a = cloud.boot(&spec).await.unwrap();
        let b = cloud.boot(&spec).await.unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(cloud.instances().len(), 2);

        let found = cloud.get_instance(a.id()).await.unwrap();
        assert_eq!(found.id(), a.id());
        assert!(matches!(
            cloud.get_instance("morphvm_missing").await,
            Err(CloudError::Api { status: 404, .. })
        ));
    }
}
