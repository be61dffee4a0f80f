//! Published-blob store: the latest report JSON/Markdown and a
//! run timestamp, mirrored into a `ConfigMap` so the exporter (and anything
//! else in-cluster) can read the most recent run without re-querying
//! Prometheus. A local `OUTPUT_DIR` mirror backs it up for operators.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::Client;

const KEY_LATEST_JSON: &str = "latest.json";
const KEY_LATEST_MD: &str = "latest.md";
const KEY_LAST_RUN_AT: &str = "lastRunAt";
const KEY_MODE: &str = "mode";

#[derive(Clone)]
pub struct BlobStore {
    client: Client,
    namespace: String,
    name: String,
}

impl BlobStore {
    pub fn new(client: Client, namespace: String, name: String) -> Self {
        Self { client, namespace, name }
    }

    fn api(&self) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    /// Writes the latest run's artifacts. Idempotent: skips the API call
    /// when the stored data already matches byte-for-byte. Returns whether a
    /// write happened.
    pub async fn publish(&self, latest_json: &str, latest_md: &str, last_run_at: &str, mode: &str) -> Result<bool> {
        let mut data = BTreeMap::new();
        data.insert(KEY_LATEST_JSON.to_string(), latest_json.to_string());
        data.insert(KEY_LATEST_MD.to_string(), latest_md.to_string());
        data.insert(KEY_LAST_RUN_AT.to_string(), last_run_at.to_string());
        data.insert(KEY_MODE.to_string(), mode.to_string());

        let api = self.api();
        match api.get(&self.name).await {
            Ok(existing) => {
                if existing.data.as_ref() == Some(&data) {
                    return Ok(false);
                }
                let patch = ConfigMap { data: Some(data), ..Default::default() };
                api.patch(&self.name, &PatchParams::default(), &Patch::Merge(&patch))
                    .await
                    .context("patching resource-advisor blob configmap")?;
                Ok(true)
            }
            Err(kube::Error::Api(e)) if e.code == 404 => {
                let cm = ConfigMap {
                    metadata: ObjectMeta {
                        name: Some(self.name.clone()),
                        namespace: Some(self.namespace.clone()),
                        ..Default::default()
                    },
                    data: Some(data),
                    ..Default::default()
                };
                api.create(&PostParams::default(), &cm).await.context("creating resource-advisor blob configmap")?;
                Ok(true)
            }
            Err(e) => Err(e).context("fetching resource-advisor blob configmap"),
        }
    }

    pub async fn fetch(&self) -> Result<Option<BTreeMap<String, String>>> {
        match self.api().get(&self.name).await {
            Ok(cm) => Ok(cm.data),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
            Err(e) => Err(e).context("fetching resource-advisor blob configmap"),
        }
    }
}

/// Mirrors the report artifacts onto disk at `OUTPUT_DIR`, for operators who
/// don't have cluster access to the blob ConfigMap.
pub fn write_local_mirror(output_dir: &str, latest_json: &str, latest_md: &str) -> Result<()> {
    let dir = Path::new(output_dir);
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", output_dir))?;
    std::fs::write(dir.join(KEY_LATEST_JSON), latest_json).context("writing latest.json")?;
    std::fs::write(dir.join(KEY_LATEST_MD), latest_md).context("writing latest.md")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn local_mirror_writes_both_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().to_str().unwrap();
        write_local_mirror(path, "{}", "# report").unwrap();
        assert!(dir.path().join(KEY_LATEST_JSON).exists());
        assert!(dir.path().join(KEY_LATEST_MD).exists());
        assert_eq!(std::fs::read_to_string(dir.path().join(KEY_LATEST_JSON)).unwrap(), "{}");
    }
}
