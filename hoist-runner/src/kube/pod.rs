//! Pod model and workload construction
//!
//! A deliberately minimal serde model of the Kubernetes objects hoist
//! touches, plus the merge step that turns a run spec into a submittable
//! pod: base template (or a default built from an image name), the
//! injected manifest argument, execution-id environment variable, secret
//! and claim-backed volumes, and additively merged resource requests.

use crate::error::{Result, RunnerError};
use hoist_core::{EnvironmentBase, RunSpec, ensure_tag};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

/// Name of the container the continuation runs in; templates must declare
/// exactly one container with this name
pub const RUN_CONTAINER_NAME: &str = "hoist-run";

/// Environment variable carrying the generated execution id into the
/// workload
pub const EXECUTION_ID_ENV: &str = "HOIST_EXECUTION_ID";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pod {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub spec: PodSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PodStatus>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart_policy: Option<String>,
    #[serde(default)]
    pub containers: Vec<Container>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
    /// Set by the scheduler once the pod is assigned to a node
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<ContainerVolumeMount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<Resources>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerVolumeMount {
    pub name: String,
    pub mount_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_only: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Resources {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<SecretVolumeSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim: Option<ClaimVolumeSource>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretVolumeSource {
    pub secret_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimVolumeSource {
    pub claim_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<PodPhase>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub container_statuses: Vec<ContainerStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerStatus {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<ContainerState>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminated: Option<TerminatedState>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminatedState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A persistent volume claim
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeClaim {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub spec: VolumeClaimSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeClaimSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub access_modes: Vec<String>,
    #[serde(default)]
    pub resources: Resources,
}

/// Loads a pod template document
pub fn load_template(path: &Path) -> Result<Pod> {
    let text = std::fs::read_to_string(path).map_err(|e| RunnerError::MalformedTemplate {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    serde_yaml::from_str(&text).map_err(|e| RunnerError::MalformedTemplate {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// The termination message of the run container, if one was written
pub fn termination_message(pod: &Pod) -> Option<String> {
    pod.status
        .as_ref()?
        .container_statuses
        .iter()
        .find(|s| s.name == RUN_CONTAINER_NAME)?
        .state
        .as_ref()?
        .terminated
        .as_ref()?
        .message
        .clone()
        .filter(|m| !m.trim().is_empty())
}

/// Builds the pod for one run
///
/// `claim_mounts` pairs each of the environment's volume mounts with the
/// name of the live claim resolved for it. The merge keeps everything the
/// template declares except at the injection points: args (overwritten, with
/// a warning if the template declared some), the execution-id env var, the
/// secret and claim volumes, and resource requests (template entries are
/// kept; run entries are added, winning per key).
pub fn build_pod(
    run_spec: &RunSpec,
    claim_mounts: &[(String, hoist_core::VolumeMount)],
    pod_name: &str,
) -> Result<Pod> {
    let environment = run_spec.environment();

    let mut pod = match environment.base() {
        EnvironmentBase::Image(_) => default_pod(),
        EnvironmentBase::Template(path) => load_template(path)?,
    };
    pod.api_version = Some("v1".to_string());
    pod.kind = Some("Pod".to_string());
    pod.metadata.name = Some(pod_name.to_string());
    if pod.spec.restart_policy.is_none() {
        pod.spec.restart_policy = Some("Never".to_string());
    }

    let mut matching = pod
        .spec
        .containers
        .iter()
        .enumerate()
        .filter(|(_, c)| c.name == RUN_CONTAINER_NAME)
        .map(|(i, _)| i);
    let run_index = match (matching.next(), matching.next()) {
        (Some(index), None) => index,
        _ => {
            return Err(RunnerError::MissingRunContainer {
                path: environment
                    .template_path()
                    .map(Path::to_path_buf)
                    .unwrap_or_default(),
                container: RUN_CONTAINER_NAME,
            });
        }
    };

    // Secret and claim-backed volumes are shared pod-level objects
    for secret in environment.secret_mounts() {
        pod.spec.volumes.push(Volume {
            name: secret.name().to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: secret.name().to_string(),
            }),
            persistent_volume_claim: None,
        });
    }
    for (claim_name, mount) in claim_mounts {
        pod.spec.volumes.push(Volume {
            name: mount.request().id().to_string(),
            secret: None,
            persistent_volume_claim: Some(ClaimVolumeSource {
                claim_name: claim_name.clone(),
            }),
        });
    }

    let container = &mut pod.spec.containers[run_index];

    let image = match (container.image.take(), run_spec.image()) {
        // an explicit override always wins over whatever the template declares
        (Some(declared), Some(image)) => {
            warn!(
                "Overriding template image {} for container {} in pod {}",
                declared, RUN_CONTAINER_NAME, pod_name
            );
            image.to_string()
        }
        (None, Some(image)) => image.to_string(),
        (Some(_), None) => {
            return Err(RunnerError::ImageConflict {
                path: environment
                    .template_path()
                    .map(Path::to_path_buf)
                    .unwrap_or_default(),
            });
        }
        (None, None) => return Err(RunnerError::MissingImage),
    };
    container.image = Some(ensure_tag(&image));

    if let Some(declared) = &container.args {
        warn!(
            "Overriding template args {:?} for container {} in pod {}",
            declared, RUN_CONTAINER_NAME, pod_name
        );
    }
    container.args = Some(vec![
        run_spec
            .staged_continuation()
            .manifest_location()
            .to_string(),
    ]);

    container.env.push(EnvVar {
        name: EXECUTION_ID_ENV.to_string(),
        value: pod_name.to_string(),
    });

    for secret in environment.secret_mounts() {
        container.volume_mounts.push(ContainerVolumeMount {
            name: secret.name().to_string(),
            mount_path: secret.mount_path().to_string(),
            read_only: Some(true),
        });
    }
    for (_, mount) in claim_mounts {
        container.volume_mounts.push(ContainerVolumeMount {
            name: mount.request().id().to_string(),
            mount_path: mount.mount_path().to_string(),
            read_only: Some(mount.read_only()),
        });
    }

    if !environment.resource_requests().is_empty() {
        let resources = container.resources.get_or_insert_with(Resources::default);
        for (resource, amount) in environment.resource_requests() {
            resources.requests.insert(resource.clone(), amount.clone());
        }
    }

    Ok(pod)
}

fn default_pod() -> Pod {
    Pod {
        spec: PodSpec {
            restart_policy: Some("Never".to_string()),
            containers: vec![Container {
                name: RUN_CONTAINER_NAME.to_string(),
                ..Container::default()
            }],
            ..PodSpec::default()
        },
        ..Pod::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hoist_core::{
        RunEnvironment, RunManifest, Secret, StagedContinuation, VolumeRequest,
    };
    use std::io::Write;

    const MANIFEST_LOCATION: &str = "gs://bucket/staging/manifest-abc.txt";

    fn staged() -> StagedContinuation {
        let manifest = RunManifest::new("cont.bin", vec![], vec![]);
        StagedContinuation::new(MANIFEST_LOCATION, manifest)
    }

    fn spec_for(environment: RunEnvironment) -> RunSpec {
        RunSpec::from_environment(environment, staged())
    }

    fn run_container(pod: &Pod) -> &Container {
        pod.spec
            .containers
            .iter()
            .find(|c| c.name == RUN_CONTAINER_NAME)
            .expect("run container missing")
    }

    fn template_file(yaml: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();
        file
    }

    const MINIMAL_TEMPLATE: &str = r#"
spec:
  restartPolicy: Never
  containers:
    - name: hoist-run
      imagePullPolicy: Always
      env:
        - name: EXAMPLE
          value: my-env-value
      resources:
        requests:
          cpu: 100m
        limits:
          memory: 1Gi
"#;

    #[test]
    fn sets_manifest_as_sole_argument() {
        let pod = build_pod(&spec_for(RunEnvironment::with_image("busybox:1")), &[], "hoist-run-1")
            .unwrap();
        assert_eq!(
            run_container(&pod).args,
            Some(vec![MANIFEST_LOCATION.to_string()])
        );
    }

    #[test]
    fn sets_execution_id_env_var_to_pod_name() {
        let pod = build_pod(&spec_for(RunEnvironment::with_image("busybox:1")), &[], "hoist-run-1")
            .unwrap();
        assert!(run_container(&pod).env.contains(&EnvVar {
            name: EXECUTION_ID_ENV.to_string(),
            value: "hoist-run-1".to_string(),
        }));
    }

    #[test]
    fn completes_untagged_images() {
        let pod =
            build_pod(&spec_for(RunEnvironment::with_image("busybox")), &[], "hoist-run-1").unwrap();
        assert_eq!(run_container(&pod).image.as_deref(), Some("busybox:latest"));
    }

    #[test]
    fn mounts_secrets_read_only() {
        let env = RunEnvironment::with_image("busybox:1").with_secret(Secret::new("keys", "/etc/keys"));
        let pod = build_pod(&spec_for(env), &[], "hoist-run-1").unwrap();

        assert_eq!(pod.spec.volumes.len(), 1);
        assert_eq!(pod.spec.volumes[0].name, "keys");
        assert_eq!(
            pod.spec.volumes[0].secret.as_ref().unwrap().secret_name,
            "keys"
        );
        let mounts = &run_container(&pod).volume_mounts;
        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0].mount_path, "/etc/keys");
        assert_eq!(mounts[0].read_only, Some(true));
    }

    #[test]
    fn mounts_resolved_claims() {
        let request = VolumeRequest::create_if_not_exists("scratch", "fast", "16Gi");
        let mount = request.mount_read_write("/scratch");
        let env = RunEnvironment::with_image("busybox:1").with_mount(mount.clone());

        let pod = build_pod(
            &spec_for(env),
            &[("scratch-fast-16gi".to_string(), mount)],
            "hoist-run-1",
        )
        .unwrap();

        assert_eq!(
            pod.spec.volumes[0]
                .persistent_volume_claim
                .as_ref()
                .unwrap()
                .claim_name,
            "scratch-fast-16gi"
        );
        let mounts = &run_container(&pod).volume_mounts;
        assert_eq!(mounts[0].mount_path, "/scratch");
        assert_eq!(mounts[0].read_only, Some(false));
    }

    #[test]
    fn template_fields_survive_and_requests_merge_additively() {
        let template = template_file(MINIMAL_TEMPLATE);
        let env = RunEnvironment::from_template(template.path())
            .with_image_override("busybox:1")
            .with_request("memory", "16Gi");
        let pod = build_pod(&spec_for(env), &[], "hoist-run-1").unwrap();

        assert_eq!(pod.spec.restart_policy.as_deref(), Some("Never"));
        let container = run_container(&pod);
        assert_eq!(container.image.as_deref(), Some("busybox:1"));
        assert_eq!(container.image_pull_policy.as_deref(), Some("Always"));
        assert!(container.env.contains(&EnvVar {
            name: "EXAMPLE".to_string(),
            value: "my-env-value".to_string(),
        }));

        let resources = container.resources.as_ref().unwrap();
        // template entry kept, run entry added
        assert_eq!(resources.requests.get("cpu"), Some(&"100m".to_string()));
        assert_eq!(resources.requests.get("memory"), Some(&"16Gi".to_string()));
        assert_eq!(resources.limits.get("memory"), Some(&"1Gi".to_string()));
    }

    #[test]
    fn template_args_are_overwritten() {
        let template = template_file(
            r#"
spec:
  containers:
    - name: hoist-run
      args: ["original", "args"]
"#,
        );
        let env = RunEnvironment::from_template(template.path()).with_image_override("busybox:1");
        let pod = build_pod(&spec_for(env), &[], "hoist-run-1").unwrap();
        assert_eq!(
            run_container(&pod).args,
            Some(vec![MANIFEST_LOCATION.to_string()])
        );
    }

    #[test]
    fn template_without_run_container_is_rejected() {
        let template = template_file(
            r#"
spec:
  containers:
    - name: something-else
"#,
        );
        let env = RunEnvironment::from_template(template.path()).with_image_override("busybox:1");
        let err = build_pod(&spec_for(env), &[], "hoist-run-1").unwrap_err();
        assert!(matches!(err, RunnerError::MissingRunContainer { .. }));
    }

    #[test]
    fn override_wins_over_a_template_declared_image() {
        let template = template_file(
            r#"
spec:
  containers:
    - name: hoist-run
      image: template-declared:1
"#,
        );
        let env = RunEnvironment::from_template(template.path()).with_image_override("override:2");
        let pod = build_pod(&spec_for(env), &[], "hoist-run-1").unwrap();
        assert_eq!(run_container(&pod).image.as_deref(), Some("override:2"));
    }

    #[test]
    fn template_image_without_override_is_rejected() {
        let template = template_file(
            r#"
spec:
  containers:
    - name: hoist-run
      image: busybox:1
"#,
        );
        let env = RunEnvironment::from_template(template.path());
        let err = build_pod(&spec_for(env), &[], "hoist-run-1").unwrap_err();
        assert!(matches!(err, RunnerError::ImageConflict { .. }));
    }

    #[test]
    fn template_without_any_image_is_rejected() {
        let template = template_file(
            r#"
spec:
  containers:
    - name: hoist-run
"#,
        );
        let env = RunEnvironment::from_template(template.path());
        let err = build_pod(&spec_for(env), &[], "hoist-run-1").unwrap_err();
        assert!(matches!(err, RunnerError::MissingImage));
    }

    #[test]
    fn unreadable_template_is_rejected() {
        let env = RunEnvironment::from_template("/definitely/not/here.yaml")
            .with_image_override("busybox:1");
        let err = build_pod(&spec_for(env), &[], "hoist-run-1").unwrap_err();
        assert!(matches!(err, RunnerError::MalformedTemplate { .. }));
    }

    #[test]
    fn extracts_the_run_containers_termination_message() {
        let pod = Pod {
            status: Some(PodStatus {
                phase: Some(PodPhase::Succeeded),
                container_statuses: vec![ContainerStatus {
                    name: RUN_CONTAINER_NAME.to_string(),
                    state: Some(ContainerState {
                        terminated: Some(TerminatedState {
                            exit_code: Some(0),
                            message: Some("gs://bucket/obj".to_string()),
                        }),
                    }),
                }],
            }),
            ..Pod::default()
        };
        assert_eq!(termination_message(&pod), Some("gs://bucket/obj".to_string()));
    }
}
