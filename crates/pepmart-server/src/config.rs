use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use pepmart_engine::providers::{default_provider_specs, parse_provider_specs, ProviderSpec};
use pepmart_engine::{PipelineConfig, DEFAULT_PREVIEW_EDGE};

pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
pub const MAX_WORKERS: usize = 64;

#[derive(Debug, Clone, Parser)]
#[command(name = "pepmart-server", version, about = "Pet portrait generation service")]
pub struct ServerArgs {
    /// Address to bind
    #[arg(long, env = "PEPMART_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "PEPMART_PORT", default_value_t = 8000)]
    pub port: u16,

    /// Concurrent inference calls; requests beyond this queue
    #[arg(long, env = "PEPMART_WORKERS", default_value_t = 1, value_parser = parse_workers)]
    pub workers: usize,

    /// JSON array of `{kind, priority, timeout_secs, enabled}` rows replacing the default chain
    #[arg(long, env = "PEPMART_PROVIDERS")]
    pub providers: Option<PathBuf>,

    #[arg(long, env = "PEPMART_MAX_UPLOAD_BYTES", default_value_t = DEFAULT_MAX_UPLOAD_BYTES)]
    pub max_upload_bytes: usize,

    /// Longest edge of the original-image preview
    #[arg(long, env = "PEPMART_PREVIEW_EDGE", default_value_t = DEFAULT_PREVIEW_EDGE)]
    pub preview_edge: u32,
}

impl ServerArgs {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            workers: self.workers,
            preview_edge: self.preview_edge.max(1),
        }
    }

    pub fn provider_specs(&self) -> Result<Vec<ProviderSpec>> {
        let Some(path) = self.providers.as_ref() else {
            return Ok(default_provider_specs());
        };
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed reading provider table {}", path.display()))?;
        parse_provider_specs(&raw)
            .with_context(|| format!("invalid provider table {}", path.display()))
    }
}

fn parse_workers(raw: &str) -> Result<usize, String> {
    let workers = raw
        .trim()
        .parse::<usize>()
        .map_err(|err| format!("`{raw}` is not a worker count: {err}"))?;
    if !(1..=MAX_WORKERS).contains(&workers) {
        return Err(format!("workers must be between 1 and {MAX_WORKERS}, got {workers}"));
    }
    Ok(workers)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use clap::Parser;

    use super::{ServerArgs, DEFAULT_MAX_UPLOAD_BYTES, MAX_WORKERS};

    #[test]
    fn flags_override_defaults() {
        let args = ServerArgs::parse_from(["pepmart-server", "--port", "9001", "--workers", "3"]);
        assert_eq!(args.bind_address(), "0.0.0.0:9001");
        assert_eq!(args.pipeline_config().workers, 3);
        assert_eq!(args.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
        assert_eq!(ServerArgs::parse_from(["pepmart-server"]).workers, 1);
    }

    #[test]
    fn worker_count_outside_range_is_rejected() {
        let too_many = (MAX_WORKERS + 1).to_string();
        for workers in ["0", too_many.as_str(), "18446744073709551615", "many"] {
            let parsed = ServerArgs::try_parse_from(["pepmart-server", "--workers", workers]);
            assert!(parsed.is_err(), "--workers {workers} should be rejected");
        }
        let max = MAX_WORKERS.to_string();
        let args = ServerArgs::parse_from(["pepmart-server", "--workers", max.as_str()]);
        assert_eq!(args.pipeline_config().workers, MAX_WORKERS);
    }

    #[test]
    fn provider_table_file_replaces_default_chain() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("providers.json");
        fs::write(&path, r#"[{"kind": "dryrun", "priority": 1, "timeout_secs": 2}]"#)?;
        let args = ServerArgs::parse_from([
            "pepmart-server",
            "--providers",
            path.to_str().unwrap(),
        ]);
        let specs = args.provider_specs()?;
        assert_eq!(specs.len(), 1);

        let defaults = ServerArgs::parse_from(["pepmart-server"]).provider_specs()?;
        assert_eq!(defaults.len(), 4);
        Ok(())
    }
}
