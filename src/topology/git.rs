//! Self-hosted git: a container-optimized VM with a persistent data disk
//! and an A record pointing at its external address.

use serde::Serialize;
use serde_json::json;

use super::dns::{self, Zone};
use crate::config::{GitConfig, TopologyConfig};
use crate::deferred::Deferred;
use crate::error::{GraphError, Result};
use crate::provider::ResourceKind;
use crate::provision::{Provisioner, ResourceDescriptor};

pub const DATA_DISK: &str = "giteadata";
const BOOT_DISK_GB: u32 = 10;
const DATA_MOUNT: &str = "/data";

/// `gce-container-declaration` metadata document
#[derive(Debug, Serialize)]
pub struct ContainerDeclaration {
    pub spec: ContainerSpec,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    pub containers: Vec<Container>,
    pub volumes: Vec<Volume>,
    pub restart_policy: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub image: String,
    pub env: Vec<EnvVar>,
    pub volume_mounts: Vec<VolumeMount>,
    pub stdin: bool,
    pub tty: bool,
}

#[derive(Debug, Serialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    pub name: String,
    pub mount_path: String,
    pub read_only: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub name: String,
    pub gce_persistent_disk: PersistentDisk,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistentDisk {
    pub pd_name: String,
    pub fs_type: String,
}

impl ContainerDeclaration {
    pub fn gitea(image: &str, disk: &str) -> Self {
        let env = [
            ("DISABLE_REGISTRATION", "false"),
            ("USER_UID", "1000"),
            ("USER_GID", "1000"),
        ]
        .into_iter()
        .map(|(name, value)| EnvVar {
            name: name.to_string(),
            value: value.to_string(),
        })
        .collect();

        Self {
            spec: ContainerSpec {
                containers: vec![Container {
                    image: image.to_string(),
                    env,
                    volume_mounts: vec![VolumeMount {
                        name: "pd-0".into(),
                        mount_path: DATA_MOUNT.into(),
                        read_only: false,
                    }],
                    stdin: false,
                    tty: false,
                }],
                volumes: vec![Volume {
                    name: "pd-0".into(),
                    gce_persistent_disk: PersistentDisk {
                        pd_name: disk.to_string(),
                        fs_type: "ext4".into(),
                    },
                }],
                restart_policy: "Always".into(),
            },
        }
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| GraphError::ConfigError {
            reason: format!("Failed to render container declaration: {}", e),
        })
    }
}

/// Declare disk, instance and DNS record; returns the record's FQDN
pub fn declare(
    prov: &Provisioner,
    config: &TopologyConfig,
    git: &GitConfig,
    zone: &Zone,
) -> Result<Deferred<String>> {
    let disk = prov.declare(
        ResourceDescriptor::new(DATA_DISK, ResourceKind::ComputeDisk)
            .config(json!({
                "project": config.project,
                "zone": git.zone,
                "size": git.data_disk_gb,
            }))
            .outputs(["name"]),
    )?;

    let declaration = ContainerDeclaration::gitea(&git.image, DATA_DISK).to_yaml()?;

    let instance = prov.declare(
        ResourceDescriptor::new("gitea", ResourceKind::ComputeInstance)
            .input("data_disk", &disk.string("name"))
            .config(json!({
                "project": config.project,
                "zone": git.zone,
                "machine_type": git.machine_type,
                "boot_disk": { "image": git.boot_image, "size": BOOT_DISK_GB },
                "network": { "network": "default", "tier": "STANDARD" },
                "metadata": {
                    "gce-container-declaration": declaration,
                    "google-logging-enabled": "true",
                },
                "allow_stopping_for_update": true,
            }))
            .outputs(["nat_ip", "name"]),
    )?;

    let rrdatas = instance.string("nat_ip").then(|ip| json!([ip]));
    dns::record(
        prov,
        "gitea-dns",
        &git.subdomain,
        zone,
        "A",
        &rrdatas,
        &config.project,
    )
}
