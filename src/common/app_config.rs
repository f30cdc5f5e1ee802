// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static CONFIG: OnceLock<NovaCoreConfig> = OnceLock::new();

fn default_log_level() -> String {
    "info".to_string()
}

pub fn init_from_path(path: impl AsRef<Path>) -> Result<&'static NovaCoreConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = path.as_ref().to_path_buf();
    let cfg = NovaCoreConfig::load_from_file(&path)?;
    let _ = CONFIG.set(cfg);
    CONFIG.get().ok_or_else(|| anyhow!("config not initialized"))
}

pub fn init_from_env_or_default() -> Result<&'static NovaCoreConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = config_path_from_env_or_default()?;
    init_from_path(path)
}

pub fn config() -> Result<&'static NovaCoreConfig> {
    init_from_env_or_default()
}

fn config_path_from_env_or_default() -> Result<PathBuf> {
    if let Ok(p) = std::env::var("NOVACORE_CONFIG") {
        if !p.trim().is_empty() {
            return Ok(PathBuf::from(p));
        }
    }

    let candidate = PathBuf::from("novacore.toml");
    if candidate.exists() {
        return Ok(candidate);
    }

    Err(anyhow!(
        "missing config file: set $NOVACORE_CONFIG or create ./novacore.toml"
    ))
}

#[derive(Clone, Debug, Deserialize)]
pub struct NovaCoreConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional full tracing EnvFilter expression, preferred over `log_level`.
    /// Example: "novacore=debug,novacore::storage=info"
    #[serde(default)]
    pub log_filter: Option<String>,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

impl NovaCoreConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read config file: {}", path.display()))?;
        Self::parse(&s).with_context(|| format!("parse toml: {}", path.display()))
    }

    pub fn parse(s: &str) -> Result<Self> {
        let cfg: NovaCoreConfig = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.pipeline.yield_preempt_max_time_spent_ms > self.pipeline.yield_max_time_spent_ms {
            return Err(anyhow!(
                "pipeline.yield_preempt_max_time_spent_ms ({}) must not exceed pipeline.yield_max_time_spent_ms ({})",
                self.pipeline.yield_preempt_max_time_spent_ms,
                self.pipeline.yield_max_time_spent_ms
            ));
        }
        if self.storage.pre_aggregate_factor > 100 {
            return Err(anyhow!(
                "storage.pre_aggregate_factor must be within [0, 100], got {}",
                self.storage.pre_aggregate_factor
            ));
        }
        if self.pipeline.chunk_size == 0 || self.storage.chunk_size == 0 {
            return Err(anyhow!("chunk_size must be positive"));
        }
        Ok(())
    }
}

impl Default for NovaCoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_filter: None,
            pipeline: PipelineConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct PipelineConfig {
    /// Hard upper bound of one `process()` call before the driver yields.
    #[serde(default = "default_yield_max_time_spent_ms")]
    pub yield_max_time_spent_ms: u64,
    /// After this long a driver yields if its workgroup queue has waiters.
    #[serde(default = "default_yield_preempt_max_time_spent_ms")]
    pub yield_preempt_max_time_spent_ms: u64,
    #[serde(default = "default_exec_threads")]
    pub exec_threads: usize,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

fn default_yield_max_time_spent_ms() -> u64 {
    100
}

fn default_yield_preempt_max_time_spent_ms() -> u64 {
    5
}

fn default_exec_threads() -> usize {
    4
}

fn default_chunk_size() -> usize {
    4096
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            yield_max_time_spent_ms: default_yield_max_time_spent_ms(),
            yield_preempt_max_time_spent_ms: default_yield_preempt_max_time_spent_ms(),
            exec_threads: default_exec_threads(),
            chunk_size: default_chunk_size(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct StorageConfig {
    /// Percentage of rows a pre-aggregation batch must fold away to stay enabled.
    #[serde(default = "default_pre_aggregate_factor")]
    pub pre_aggregate_factor: u32,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_vertical_compaction_max_columns_per_group")]
    pub vertical_compaction_max_columns_per_group: usize,
    /// Number of metadata versions a tablet keeps before the oldest are dropped.
    #[serde(default = "default_tablet_max_versions")]
    pub tablet_max_versions: usize,
}

fn default_pre_aggregate_factor() -> u32 {
    80
}

fn default_vertical_compaction_max_columns_per_group() -> usize {
    5
}

fn default_tablet_max_versions() -> usize {
    1000
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            pre_aggregate_factor: default_pre_aggregate_factor(),
            chunk_size: default_chunk_size(),
            vertical_compaction_max_columns_per_group:
                default_vertical_compaction_max_columns_per_group(),
            tablet_max_versions: default_tablet_max_versions(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::NovaCoreConfig;

    #[test]
    fn empty_document_uses_defaults() {
        let cfg = NovaCoreConfig::parse("").expect("parse empty config");
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.pipeline.yield_max_time_spent_ms, 100);
        assert_eq!(cfg.pipeline.yield_preempt_max_time_spent_ms, 5);
        assert_eq!(cfg.storage.pre_aggregate_factor, 80);
        assert_eq!(cfg.storage.chunk_size, 4096);
    }

    #[test]
    fn sections_override_defaults() {
        let cfg = NovaCoreConfig::parse(
            r#"
log_level = "debug"

[pipeline]
yield_max_time_spent_ms = 20
exec_threads = 2

[storage]
pre_aggregate_factor = 50
"#,
        )
        .expect("parse config");
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.pipeline.yield_max_time_spent_ms, 20);
        assert_eq!(cfg.pipeline.yield_preempt_max_time_spent_ms, 5);
        assert_eq!(cfg.pipeline.exec_threads, 2);
        assert_eq!(cfg.storage.pre_aggregate_factor, 50);
    }

    #[test]
    fn preempt_threshold_above_hard_limit_is_rejected() {
        let err = NovaCoreConfig::parse(
            "[pipeline]\nyield_max_time_spent_ms = 5\nyield_preempt_max_time_spent_ms = 10\n",
        )
        .expect_err("invalid thresholds");
        assert!(err.to_string().contains("yield_preempt_max_time_spent_ms"));
    }
}
