//! Engine tuning configuration: `TOML` file plus environment overrides.
//!
//! # Priority (highest to lowest)
//!
//! 1. Environment variables (`VORTEXDB_*`)
//! 2. Configuration file
//! 3. Default values
//!
//! This covers the engine's own tuning knobs (HNSW, BM25, cache, fusion
//! defaults) — request framing, transport and auth configuration live
//! outside this crate.

use std::path::Path;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::fusion::FusionMethod;
use crate::index::hnsw::HnswParams;
use crate::index::bm25::Bm25Params;

/// HNSW construction/search defaults for newly created namespaces.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct HnswConfig {
    pub m: usize,
    pub ef_construction: usize,
}

impl Default for HnswConfig {
    fn default() -> Self {
        let defaults = HnswParams::balanced();
        Self {
            m: defaults.m,
            ef_construction: defaults.ef_construction,
        }
    }
}

impl HnswConfig {
    #[must_use]
    pub fn to_params(self) -> HnswParams {
        HnswParams::new(self.m, self.ef_construction)
    }
}

/// BM25 scoring parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct Bm25Config {
    pub k1: f32,
    pub b: f32,
}

impl Default for Bm25Config {
    fn default() -> Self {
        let defaults = Bm25Params::default();
        Self {
            k1: defaults.k1,
            b: defaults.b,
        }
    }
}

impl Bm25Config {
    #[must_use]
    pub const fn to_params(self) -> Bm25Params {
        Bm25Params {
            k1: self.k1,
            b: self.b,
        }
    }
}

/// Query cache capacity and TTL.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub capacity: usize,
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            ttl_seconds: 60,
        }
    }
}

/// Default hybrid search fusion parameters, overridable per request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub rrf_k: f32,
    pub alpha: f32,
    pub beta: f32,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            rrf_k: 60.0,
            alpha: 0.5,
            beta: 0.5,
        }
    }
}

impl FusionConfig {
    #[must_use]
    pub const fn to_method(self) -> FusionMethod {
        FusionMethod::Rrf {
            rrf_k: self.rrf_k,
            alpha: self.alpha,
            beta: self.beta,
        }
    }
}

/// Batch worker pool configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub workers: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { workers: 8 }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub hnsw: HnswConfig,
    pub bm25: Bm25Config,
    pub cache: CacheConfig,
    pub fusion: FusionConfig,
    pub batch: BatchConfig,
}

impl EngineConfig {
    /// Loads configuration from `vortexdb.toml` if present, then applies
    /// `VORTEXDB_*` environment overrides, falling back to defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but fails to parse, or an
    /// environment override cannot be coerced into its target type.
    pub fn load() -> crate::Result<Self> {
        Self::load_from_path("vortexdb.toml")
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("VORTEXDB_").split("_").lowercase(false));

        figment.extract().map_err(|e| crate::Error::Config(e.to_string()))
    }

    pub fn from_toml(toml_str: &str) -> crate::Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::string(toml_str));

        figment.extract().map_err(|e| crate::Error::Config(e.to_string()))
    }

    /// Validates ranges that would otherwise surface as confusing failures
    /// deep inside index construction.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first invalid field found.
    pub fn validate(&self) -> crate::Result<()> {
        if self.hnsw.m < 2 {
            return Err(crate::Error::Config(format!("hnsw.m must be >= 2, got {}", self.hnsw.m)));
        }
        if self.hnsw.ef_construction == 0 {
            return Err(crate::Error::Config("hnsw.ef_construction must be > 0".to_string()));
        }
        if !(0.0..=f32::INFINITY).contains(&self.bm25.k1) {
            return Err(crate::Error::Config("bm25.k1 must be non-negative".to_string()));
        }
        if !(0.0..=1.0).contains(&self.bm25.b) {
            return Err(crate::Error::Config("bm25.b must be in [0, 1]".to_string()));
        }
        if self.batch.workers == 0 {
            return Err(crate::Error::Config("batch.workers must be > 0".to_string()));
        }
        Ok(())
    }

    /// Serializes the configuration to `TOML`, e.g. to seed a config file
    /// from the effective defaults plus environment overrides.
    pub fn to_toml(&self) -> crate::Result<String> {
        toml::to_string_pretty(self).map_err(|e| crate::Error::Config(e.to_string()))
    }
}

#[cfg(test)]
mod config_tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn toml_overrides_defaults() {
        let cfg = EngineConfig::from_toml("[hnsw]\nm = 32\nef_construction = 400\n").unwrap();
        assert_eq!(cfg.hnsw.m, 32);
        assert_eq!(cfg.hnsw.ef_construction, 400);
        assert_eq!(cfg.bm25.k1, Bm25Config::default().k1);
    }

    #[test]
    fn to_toml_round_trips_through_from_toml() {
        let original = EngineConfig::from_toml("[hnsw]\nm = 24\n").unwrap();
        let serialized = original.to_toml().unwrap();
        let reloaded = EngineConfig::from_toml(&serialized).unwrap();
        assert_eq!(reloaded.hnsw.m, 24);
    }

    #[test]
    fn rejects_invalid_m() {
        let cfg = EngineConfig::from_toml("[hnsw]\nm = 1\n").unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn env_overrides_file() {
        std::env::set_var("VORTEXDB_BATCH_WORKERS", "4");
        let cfg = EngineConfig::load_from_path("does-not-exist.toml").unwrap();
        std::env::remove_var("VORTEXDB_BATCH_WORKERS");
        assert_eq!(cfg.batch.workers, 4);
    }
}
