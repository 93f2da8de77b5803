// SPDX-License-Identifier: Apache-2.0

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use httpvcr_core::{Policy, Result, VcrError, POLICY_FILE_NAME};
use tracing::debug;

use crate::har::{build_har, parse_single_entry, RequestSpec, ResponseMeta};

pub const HAR_SUFFIX: &str = ".vcr.har";
pub const JSON_SUFFIX: &str = ".vcr.json";

/// Whether the caller can operate without a policy file.
///
/// Recording sessions require a configured upstream; pure playback can run
/// against a bare stub directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyRequirement {
    Required,
    Optional,
}

/// The stub store: a single root directory with `vcr.json` and per-endpoint
/// stub pairs. Single-writer within a session; reads take shared access.
#[derive(Debug)]
pub struct Archive {
    root: PathBuf,
    pub policy: Policy,
}

impl Archive {
    /// Opens an archive rooted at `root`, loading and validating its policy.
    pub fn open(root: &Path, requirement: PolicyRequirement) -> Result<Self> {
        let meta = fs::metadata(root)
            .map_err(|err| VcrError::io(format!("stat {}", root.display()), err))?;
        if !meta.is_dir() {
            return Err(VcrError::NotConfigured(format!(
                "not a directory: {}",
                root.display()
            )));
        }

        let policy_path = root.join(POLICY_FILE_NAME);
        let policy = match fs::read(&policy_path) {
            Ok(data) => serde_json::from_slice::<Policy>(&data).map_err(|err| {
                VcrError::NotConfigured(format!("parse {}: {err}", policy_path.display()))
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => match requirement {
                PolicyRequirement::Optional => Policy::default(),
                PolicyRequirement::Required => {
                    return Err(VcrError::NotConfigured(format!(
                        "missing {}",
                        policy_path.display()
                    )));
                }
            },
            Err(err) => {
                return Err(VcrError::io(
                    format!("read {}", policy_path.display()),
                    err,
                ));
            }
        };
        policy.validate()?;

        Ok(Self {
            root: root.to_path_buf(),
            policy,
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reports whether a stub exists for the endpoint and diversifier
    /// (empty string for the undiversified form). I/O failures other than
    /// absence are errors, not a `false`.
    pub fn has_stub(&self, endpoint_name: &str, diversifier: &str) -> Result<bool> {
        let path = self.har_path(endpoint_name, diversifier)?;
        match fs::metadata(&path) {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(VcrError::io(format!("stat {}", path.display()), err)),
        }
    }

    /// Resolves a stub and returns its archived request metadata.
    pub fn read_request(&self, endpoint_name: &str, diversifier: &str) -> Result<RequestSpec> {
        let (req, _) = self.read_har(endpoint_name, diversifier)?;
        Ok(req)
    }

    /// Resolves a stub and returns its response metadata and body bytes.
    pub fn read_response(
        &self,
        endpoint_name: &str,
        diversifier: &str,
    ) -> Result<(ResponseMeta, Vec<u8>)> {
        let (_, meta) = self.read_har(endpoint_name, diversifier)?;
        let body_path = self.json_path(endpoint_name, diversifier)?;
        let body = fs::read(&body_path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                // The HAR exists but its body is gone: a torn stub.
                VcrError::ArchiveCorrupt {
                    path: body_path.clone(),
                    reason: "body file missing".to_string(),
                }
            } else {
                VcrError::io(format!("read {}", body_path.display()), err)
            }
        })?;
        Ok((meta, body))
    }

    /// Writes a stub pair. The body lands first so a concurrent reader never
    /// sees a HAR entry without its body. Existing files are overwritten.
    pub fn write_stub(
        &self,
        endpoint_name: &str,
        req: &RequestSpec,
        resp: &ResponseMeta,
        body: &[u8],
        diversifier: &str,
    ) -> Result<()> {
        let har_path = self.har_path(endpoint_name, diversifier)?;
        let json_path = self.json_path(endpoint_name, diversifier)?;

        write_file_0600(&json_path, body)?;

        let har = build_har(req, resp);
        let mut data = serde_json::to_vec_pretty(&har).map_err(|err| {
            VcrError::ArchiveCorrupt {
                path: har_path.clone(),
                reason: format!("marshal HAR: {err}"),
            }
        })?;
        data.push(b'\n');
        write_file_0600(&har_path, &data)
    }

    /// Persists the in-memory policy to `vcr.json` with stable indentation
    /// and a trailing newline.
    pub fn write_policy(&self) -> Result<()> {
        let path = self.root.join(POLICY_FILE_NAME);
        let mut data = serde_json::to_vec_pretty(&self.policy).map_err(|err| {
            VcrError::NotConfigured(format!("marshal policy: {err}"))
        })?;
        data.push(b'\n');
        write_file_0600(&path, &data)
    }

    /// Deletes every stub file belonging to an endpoint: the undiversified
    /// pair plus all `<name>--*` variants. The policy file is never touched.
    pub fn delete_endpoint_stubs(&self, endpoint_name: &str) -> Result<()> {
        let entries = fs::read_dir(&self.root)
            .map_err(|err| VcrError::io(format!("read dir {}", self.root.display()), err))?;
        let diversified_prefix = format!("{endpoint_name}--");

        for entry in entries {
            let entry =
                entry.map_err(|err| VcrError::io(format!("read dir {}", self.root.display()), err))?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if name == POLICY_FILE_NAME {
                continue;
            }
            let Some(stem) = name
                .strip_suffix(HAR_SUFFIX)
                .or_else(|| name.strip_suffix(JSON_SUFFIX))
            else {
                continue;
            };
            if stem == endpoint_name || stem.starts_with(&diversified_prefix) {
                debug!(stub = name, "deleting stub file");
                fs::remove_file(entry.path())
                    .map_err(|err| VcrError::io(format!("remove {name}"), err))?;
            }
        }
        Ok(())
    }

    fn read_har(
        &self,
        endpoint_name: &str,
        diversifier: &str,
    ) -> Result<(RequestSpec, ResponseMeta)> {
        let path = self.har_path(endpoint_name, diversifier)?;
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(VcrError::NotFound {
                    endpoint: endpoint_name.to_string(),
                    diversifier: diversifier.to_string(),
                });
            }
            Err(err) => return Err(VcrError::io(format!("read {}", path.display()), err)),
        };
        parse_single_entry(&path, &data)
    }

    fn har_path(&self, endpoint_name: &str, diversifier: &str) -> Result<PathBuf> {
        Ok(self
            .root
            .join(stub_key(endpoint_name, diversifier)? + HAR_SUFFIX))
    }

    fn json_path(&self, endpoint_name: &str, diversifier: &str) -> Result<PathBuf> {
        Ok(self
            .root
            .join(stub_key(endpoint_name, diversifier)? + JSON_SUFFIX))
    }
}

fn stub_key(endpoint_name: &str, diversifier: &str) -> Result<String> {
    validate_component("endpoint name", endpoint_name)?;
    if diversifier.is_empty() {
        return Ok(endpoint_name.to_string());
    }
    validate_component("diversifier", diversifier)?;
    Ok(format!("{endpoint_name}--{diversifier}"))
}

/// Stub keys become file names directly; anything that could escape the
/// archive root is rejected outright.
fn validate_component(kind: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(VcrError::NotConfigured(format!("empty {kind}")));
    }
    if value.contains(['/', '\\']) || value.contains("..") {
        return Err(VcrError::NotConfigured(format!(
            "invalid {kind} {value:?}: path separators are not allowed"
        )));
    }
    Ok(())
}

fn write_file_0600(path: &Path, data: &[u8]) -> Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(path)
        .map_err(|err| VcrError::io(format!("open {}", path.display()), err))?;
    file.write_all(data)
        .map_err(|err| VcrError::io(format!("write {}", path.display()), err))
}
