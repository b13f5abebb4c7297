use async_trait::async_trait;
use thiserror::Error;

use crate::config::PipelineConfig;
use crate::job::HashKey;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    /// The object does not exist and will not appear on retry.
    #[error("no such key: {0}")]
    NoSuchKey(String),
    #[error("object store failure: {0}")]
    Backend(String),
}

/// Key-addressed blob storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> anyhow::Result<()>;

    /// Fails with [`ObjectStoreError::NoSuchKey`] when the key is absent.
    async fn get(&self, key: &str) -> anyhow::Result<Vec<u8>>;

    /// Deleting an absent key succeeds.
    async fn delete(&self, key: &str) -> anyhow::Result<()>;

    /// Deletes every key under `prefix`, returning how many were removed.
    async fn delete_prefix(&self, prefix: &str) -> anyhow::Result<u64>;

    /// Keys under `prefix` in lexical order.
    async fn list(&self, prefix: &str) -> anyhow::Result<Vec<String>>;
}

/// Key layout of one job's working namespace.
#[derive(Clone, Debug)]
pub struct JobKeys<'a> {
    hash_key: &'a HashKey,
}

impl<'a> JobKeys<'a> {
    pub fn new(hash_key: &'a HashKey) -> Self {
        Self { hash_key }
    }

    /// Prefix covering every object the job owns.
    pub fn prefix(&self) -> String {
        format!("{}/", self.hash_key)
    }

    pub fn object(&self, filename: &str) -> String {
        format!("{}/{}", self.hash_key, filename)
    }

    pub fn parameter_file(&self, config: &PipelineConfig) -> String {
        self.object(&config.parameter_filename)
    }

    pub fn output_prefix(&self) -> String {
        format!("{}/out/", self.hash_key)
    }

    pub fn manifest(&self, config: &PipelineConfig) -> String {
        self.object(&config.manifest_filename)
    }
}

/// Where uploaded input bundles wait until their job launches.
pub fn pending_key(bundle: &str) -> String {
    format!("pending-jobs/{bundle}")
}

pub fn completed_key(result_filename: &str) -> String {
    format!("completed-jobs/{result_filename}.zip")
}

pub fn result_link(config: &PipelineConfig, result_filename: &str) -> String {
    format!(
        "http://{}/{}/resultfiles/{}.zip",
        config.storage_host, config.bucket, result_filename
    )
}

/// Final path segment of an object key.
pub fn file_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_keys_live_under_hash_key() {
        let config = PipelineConfig::default();
        let hash = HashKey::from("f00d");
        let keys = JobKeys::new(&hash);
        assert_eq!(keys.prefix(), "f00d/");
        assert_eq!(keys.parameter_file(&config), "f00d/parameters.conf");
        assert_eq!(keys.manifest(&config), "f00d/manifest.json");
        assert_eq!(keys.output_prefix(), "f00d/out/");
        assert_eq!(keys.object("spectra.mgf"), "f00d/spectra.mgf");
    }

    #[test]
    fn result_link_is_deterministic() {
        let config = PipelineConfig {
            bucket: "spectra".into(),
            ..PipelineConfig::default()
        };
        assert_eq!(
            result_link(&config, "run_a_b"),
            "http://s3.amazonaws.com/spectra/resultfiles/run_a_b.zip"
        );
        assert_eq!(completed_key("run_a_b"), "completed-jobs/run_a_b.zip");
        assert_eq!(pending_key("in.zip"), "pending-jobs/in.zip");
    }

    #[test]
    fn file_name_takes_last_segment() {
        assert_eq!(file_name("abc/out/x.csv"), "x.csv");
        assert_eq!(file_name("plain"), "plain");
    }
}
