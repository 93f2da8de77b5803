// SPDX-License-Identifier: Apache-2.0

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8099";
const DEFAULT_ARCHIVE_ROOT: &str = "vcr-archive";

/// Startup configuration for the playback binary, resolved
/// `CLI > ENV > config file > defaults`.
#[derive(Debug, Clone, Serialize)]
pub struct PlaybackStartupConfig {
    pub bind_addr: String,
    pub archive_root: PathBuf,
    /// Optional endpoint registry file (JSON list of endpoint descriptors).
    pub endpoints_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PlaybackStartupConfigFile {
    bind_addr: Option<String>,
    archive_root: Option<PathBuf>,
    endpoints_file: Option<PathBuf>,
}

pub fn load_playback_startup_config(
    config_path: Option<&Path>,
    cli_bind_addr: Option<&str>,
    cli_archive_root: Option<&Path>,
    cli_endpoints_file: Option<&Path>,
) -> Result<PlaybackStartupConfig, String> {
    let file_cfg = if let Some(path) = config_path {
        parse_playback_startup_config_file(path)?
    } else {
        PlaybackStartupConfigFile::default()
    };
    resolve_playback_startup_config(
        file_cfg,
        cli_bind_addr,
        cli_archive_root,
        cli_endpoints_file,
        std::env::var("VCR_BIND").ok(),
        std::env::var("VCR_ARCHIVE_ROOT").ok().map(PathBuf::from),
        std::env::var("VCR_ENDPOINTS_FILE").ok().map(PathBuf::from),
    )
}

fn resolve_playback_startup_config(
    file_cfg: PlaybackStartupConfigFile,
    cli_bind_addr: Option<&str>,
    cli_archive_root: Option<&Path>,
    cli_endpoints_file: Option<&Path>,
    env_bind_addr: Option<String>,
    env_archive_root: Option<PathBuf>,
    env_endpoints_file: Option<PathBuf>,
) -> Result<PlaybackStartupConfig, String> {
    let bind_addr = cli_bind_addr
        .map(ToString::to_string)
        .or(env_bind_addr)
        .or(file_cfg.bind_addr)
        .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());

    let archive_root = cli_archive_root
        .map(Path::to_path_buf)
        .or(env_archive_root)
        .or(file_cfg.archive_root)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ARCHIVE_ROOT));

    let endpoints_file = cli_endpoints_file
        .map(Path::to_path_buf)
        .or(env_endpoints_file)
        .or(file_cfg.endpoints_file);

    if bind_addr.trim().is_empty() {
        return Err("playback config bind_addr must not be empty".to_string());
    }
    if archive_root.as_os_str().is_empty() {
        return Err("playback config archive_root must not be empty".to_string());
    }

    Ok(PlaybackStartupConfig {
        bind_addr,
        archive_root,
        endpoints_file,
    })
}

fn parse_playback_startup_config_file(path: &Path) -> Result<PlaybackStartupConfigFile, String> {
    let text = std::fs::read_to_string(path).map_err(|err| {
        format!(
            "failed reading playback config file {}: {err}",
            path.display()
        )
    })?;
    match path.extension().and_then(|v| v.to_str()) {
        Some("json") => serde_json::from_str(&text)
            .map_err(|err| format!("invalid playback config json {}: {err}", path.display())),
        Some("yaml") | Some("yml") => serde_yaml::from_str(&text)
            .map_err(|err| format!("invalid playback config yaml {}: {err}", path.display())),
        Some("toml") => toml::from_str(&text)
            .map_err(|err| format!("invalid playback config toml {}: {err}", path.display())),
        _ => Err(format!(
            "unsupported playback config extension for {} (expected .json/.yaml/.yml/.toml)",
            path.display()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_env_and_file() {
        let resolved = resolve_playback_startup_config(
            PlaybackStartupConfigFile {
                bind_addr: Some("127.0.0.1:9000".to_string()),
                archive_root: Some(PathBuf::from("from-file")),
                endpoints_file: None,
            },
            Some("127.0.0.1:9200"),
            Some(Path::new("from-cli")),
            None,
            Some("127.0.0.1:9100".to_string()),
            Some(PathBuf::from("from-env")),
            None,
        )
        .expect("resolve");
        assert_eq!(resolved.bind_addr, "127.0.0.1:9200");
        assert_eq!(resolved.archive_root, PathBuf::from("from-cli"));
    }

    #[test]
    fn env_overrides_file() {
        let resolved = resolve_playback_startup_config(
            PlaybackStartupConfigFile {
                bind_addr: Some("127.0.0.1:9000".to_string()),
                archive_root: Some(PathBuf::from("from-file")),
                endpoints_file: Some(PathBuf::from("eps-file.json")),
            },
            None,
            None,
            None,
            Some("127.0.0.1:9100".to_string()),
            None,
            Some(PathBuf::from("eps-env.json")),
        )
        .expect("resolve");
        assert_eq!(resolved.bind_addr, "127.0.0.1:9100");
        assert_eq!(resolved.archive_root, PathBuf::from("from-file"));
        assert_eq!(resolved.endpoints_file, Some(PathBuf::from("eps-env.json")));
    }

    #[test]
    fn defaults_apply_without_sources() {
        let resolved = resolve_playback_startup_config(
            PlaybackStartupConfigFile::default(),
            None,
            None,
            None,
            None,
            None,
            None,
        )
        .expect("resolve");
        assert_eq!(resolved.bind_addr, DEFAULT_BIND_ADDR);
        assert_eq!(resolved.archive_root, PathBuf::from(DEFAULT_ARCHIVE_ROOT));
        assert_eq!(resolved.endpoints_file, None);
    }
}
