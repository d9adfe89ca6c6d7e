//! GraphQL document builders.
//!
//! Every value that originates outside the program (pod names, template ids,
//! tokens) goes through [`escape_str`] before it is embedded in a document.
//! Builders take typed inputs; no caller ever splices raw strings.

use std::fmt::Write as _;

use super::models::{CreatePodRequest, EnvVar};

/// Escape a value for use inside a GraphQL string literal.
#[must_use]
pub fn escape_str(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

/// GPU catalog query.
pub const GPU_TYPES: &str = "\
query {
  gpuTypes {
    id
    displayName
    memoryInGb
  }
}";

/// Account SSH public key query.
pub const ACCOUNT_PUBLIC_KEY: &str = "\
query {
  myself {
    pubKey
  }
}";

/// All pods owned by the authenticated account.
pub const MY_PODS: &str = "\
query {
  myself {
    pods {
      id
      name
      desiredStatus
      machine {
        gpuTypeId
      }
      runtime {
        ports {
          ip
          isIpPublic
          privatePort
          publicPort
          type
        }
        uptimeInSeconds
      }
    }
  }
}";

/// Single-pod lookup including GPU assignment and runtime descriptor.
#[must_use]
pub fn pod(pod_id: &str) -> String {
    format!(
        "\
query Pod {{
  pod(input: {{podId: \"{id}\"}}) {{
    id
    name
    desiredStatus
    machine {{
      gpuTypeId
    }}
    runtime {{
      ports {{
        ip
        isIpPublic
        privatePort
        publicPort
        type
      }}
      uptimeInSeconds
    }}
  }}
}}",
        id = escape_str(pod_id)
    )
}

/// Declared environment of a pod template.
#[must_use]
pub fn template_env(template_id: &str) -> String {
    format!(
        "\
query {{
  podTemplate(id: \"{id}\") {{
    env {{
      key
      value
    }}
  }}
}}",
        id = escape_str(template_id)
    )
}

/// Stop a running pod without deleting it.
#[must_use]
pub fn pod_stop(pod_id: &str) -> String {
    format!(
        "\
mutation {{
  podStop(input: {{podId: \"{id}\"}}) {{
    id
    desiredStatus
  }}
}}",
        id = escape_str(pod_id)
    )
}

/// Resume a stopped pod.
#[must_use]
pub fn pod_resume(pod_id: &str, gpu_count: u32) -> String {
    format!(
        "\
mutation {{
  podResume(input: {{
    podId: \"{id}\",
    gpuCount: {gpu_count}
  }}) {{
    id
    desiredStatus
  }}
}}",
        id = escape_str(pod_id)
    )
}

/// Terminate (delete) a pod.
#[must_use]
pub fn pod_terminate(pod_id: &str) -> String {
    format!(
        "mutation {{\n  podTerminate(input: {{podId: \"{id}\"}})\n}}",
        id = escape_str(pod_id)
    )
}

/// On-demand deploy mutation.
///
/// `env` is the fully merged environment, or `None` to leave the template's
/// own environment untouched. The deploy input treats an explicit `env` list
/// as a total replacement of the template environment, which is why callers
/// merge first (see [`merge_env`]).
#[must_use]
pub fn deploy(req: &CreatePodRequest, env: Option<&[EnvVar]>) -> String {
    let cloud_type_line = req
        .cloud_type
        .map(|c| format!("      cloudType: {c}\n"))
        .unwrap_or_default();

    let env_line = env.map_or_else(String::new, |vars| {
        let mut rendered = String::from("      env: [");
        for (i, var) in vars.iter().enumerate() {
            if i > 0 {
                rendered.push_str(", ");
            }
            let _ = write!(
                rendered,
                "{{key: \"{}\", value: \"{}\"}}",
                escape_str(&var.key),
                escape_str(&var.value)
            );
        }
        rendered.push_str("]\n");
        rendered
    });

    format!(
        "\
mutation {{
  podFindAndDeployOnDemand(
    input: {{
{cloud_type_line}      gpuCount: {gpu_count}
      gpuTypeId: \"{gpu_type}\"
      name: \"{name}\"
      templateId: \"{template}\"
      ports: \"22/tcp,{app_port}/tcp\"
      volumeInGb: {volume_gb}
      containerDiskInGb: {container_disk_gb}
      volumeMountPath: \"{mount}\"
{env_line}    }}
  ) {{
    id
    name
    imageName
  }}
}}",
        gpu_count = req.gpu_count,
        gpu_type = escape_str(&req.gpu_type_id),
        name = escape_str(&req.name),
        template = escape_str(&req.template_id),
        app_port = req.app_port,
        volume_gb = req.volume_gb,
        container_disk_gb = req.container_disk_gb,
        mount = escape_str(&req.volume_mount_path),
    )
}

/// Merge a template environment with override pairs.
///
/// Template key order is preserved; keys present in `overrides` take the
/// override value in place; override keys the template does not declare are
/// appended at the end in `overrides` order.
#[must_use]
pub fn merge_env(template: &[EnvVar], overrides: &[(String, String)]) -> Vec<EnvVar> {
    let mut out = Vec::with_capacity(template.len() + overrides.len());

    for var in template {
        let value = overrides
            .iter()
            .find(|(key, _)| *key == var.key)
            .map_or_else(|| var.value.clone(), |(_, value)| value.clone());
        out.push(EnvVar {
            key: var.key.clone(),
            value,
        });
    }

    for (key, value) in overrides {
        if !template.iter().any(|var| var.key == *key) {
            out.push(EnvVar {
                key: key.clone(),
                value: value.clone(),
            });
        }
    }

    out
}
