//! Image spec resolution
//!
//! Validates an [`ImageSpec`] and maps it onto an ordered step list:
//! 1. System packages (one apt step, if any)
//! 2. Tools, in declared order
//! 3. Configure commands
//!
//! Resolution is pure. The same spec and catalog always produce the same
//! steps, fingerprints included.

use crate::cache::{sha256_bytes, CacheMount, CacheScope};
use crate::catalog::{
    is_pinned, InstallMethod, PackageManager, ToolCatalog, ToolSpec, TOOL_CACHE_PREFIX,
};
use crate::error::{SandkitError, SandkitResult};
use crate::plan::step::{fingerprint, ArchiveFormat, Step, StepAction, StepExports};
use crate::spec::{ImageSpec, ToolRef};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// Resolve a spec into its ordered provisioning steps
pub fn resolve(spec: &ImageSpec, catalog: &ToolCatalog) -> SandkitResult<Vec<Step>> {
    validate_spec(spec)?;

    let tools = resolve_tools(spec, catalog)?;

    let mut drafts = Vec::new();
    if !spec.system_packages.is_empty() {
        drafts.push(system_packages_draft(&spec.system_packages));
    }
    for tool in &tools {
        drafts.push(tool_draft(spec, tool)?);
    }
    for (n, argv) in spec.configure.iter().enumerate() {
        drafts.push(Draft {
            id: format!("configure-{}", n + 1),
            description: format!("Configure: {}", argv.join(" ")),
            action: StepAction::Configure { argv: argv.clone() },
            mounts: Vec::new(),
            exports: StepExports::default(),
        });
    }

    check_mount_conflicts(spec, &drafts)?;

    let mut env = BTreeMap::new();
    let mut path: Vec<String> = Vec::new();
    let steps = drafts
        .into_iter()
        .enumerate()
        .map(|(index, draft)| {
            let step = Step {
                index,
                fingerprint: fingerprint(&draft.id, &draft.action, &draft.mounts),
                id: draft.id,
                description: draft.description,
                action: draft.action,
                mounts: draft.mounts,
                build_env: env.clone(),
                build_path: path.clone(),
                exports: draft.exports,
            };

            env.extend(step.exports.env.clone());
            if let Some(bin) = &step.exports.bin_path {
                if !path.contains(bin) {
                    path.push(bin.clone());
                }
            }
            step
        })
        .collect::<Vec<_>>();

    debug!("Resolved {} into {} steps", spec.name, steps.len());
    Ok(steps)
}

struct Draft {
    id: String,
    description: String,
    action: StepAction,
    mounts: Vec<CacheMount>,
    exports: StepExports,
}

fn invalid(spec: &ImageSpec, reason: impl Into<String>) -> SandkitError {
    let name = if spec.name.is_empty() {
        "<unnamed>"
    } else {
        spec.name.as_str()
    };
    SandkitError::invalid_spec(name, reason)
}

/// Checks that need nothing but the spec itself
fn validate_spec(spec: &ImageSpec) -> SandkitResult<()> {
    if spec.name.trim().is_empty() {
        return Err(invalid(spec, "name is empty"));
    }
    if !spec
        .name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.'))
    {
        return Err(invalid(
            spec,
            "name must contain only lowercase letters, digits, '-', '_' or '.'",
        ));
    }
    if spec.base_image.trim().is_empty() {
        return Err(invalid(spec, "base_image is empty"));
    }
    if spec.workdir.trim().is_empty() {
        return Err(invalid(spec, "workdir is empty"));
    }
    if !spec.workdir.starts_with('/') {
        return Err(invalid(
            spec,
            format!("workdir must be absolute, got {}", spec.workdir),
        ));
    }
    if let Some(port) = spec
        .exposed_ports
        .iter()
        .find(|port| !(1..=65535).contains(*port))
    {
        return Err(invalid(
            spec,
            format!("exposed port {} is outside 1-65535", port),
        ));
    }
    if spec.entrypoint.is_empty() || spec.entrypoint[0].trim().is_empty() {
        return Err(invalid(spec, "entrypoint is empty"));
    }
    check_env(spec, "env", &spec.env)?;
    if spec.system_packages.iter().any(|p| p.trim().is_empty()) {
        return Err(invalid(spec, "system_packages contains an empty name"));
    }
    if let Some(n) = spec
        .configure
        .iter()
        .position(|argv| argv.first().is_none_or(|cmd| cmd.trim().is_empty()))
    {
        return Err(invalid(spec, format!("configure command {} is empty", n + 1)));
    }
    Ok(())
}

/// Env ends up in single-line image instructions: plain names, no line breaks
fn check_env(spec: &ImageSpec, owner: &str, env: &BTreeMap<String, String>) -> SandkitResult<()> {
    for (key, value) in env {
        let valid_name = key.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
            && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid_name {
            return Err(invalid(spec, format!("{} has an invalid name {:?}", owner, key)));
        }
        if value.chars().any(char::is_control) {
            return Err(invalid(
                spec,
                format!("{} value of {} contains a control character", owner, key),
            ));
        }
    }
    Ok(())
}

/// Turn tool references into complete descriptors
fn resolve_tools(spec: &ImageSpec, catalog: &ToolCatalog) -> SandkitResult<Vec<ToolSpec>> {
    let mut seen = HashSet::new();
    let mut tools = Vec::with_capacity(spec.tools.len());

    for tool_ref in &spec.tools {
        if tool_ref.name.trim().is_empty() {
            return Err(invalid(spec, "tool with an empty name"));
        }
        if !is_pinned(&tool_ref.version) {
            return Err(invalid(
                spec,
                format!(
                    "tool {} has unpinned version \"{}\"",
                    tool_ref.name, tool_ref.version
                ),
            ));
        }
        if !seen.insert(tool_ref.name.as_str()) {
            return Err(invalid(
                spec,
                format!("tool {} is listed more than once", tool_ref.name),
            ));
        }

        tools.push(resolve_tool(spec, tool_ref, catalog)?);
    }

    Ok(tools)
}

fn resolve_tool(
    spec: &ImageSpec,
    tool_ref: &ToolRef,
    catalog: &ToolCatalog,
) -> SandkitResult<ToolSpec> {
    let mut tool = match &tool_ref.method {
        None => catalog
            .lookup_version(&tool_ref.name, &tool_ref.version)?
            .clone(),
        Some(method) => {
            if let Ok(existing) = catalog.lookup_version(&tool_ref.name, &tool_ref.version) {
                if &existing.method != method {
                    return Err(SandkitError::DuplicateTool {
                        name: tool_ref.name.clone(),
                        version: tool_ref.version.clone(),
                        reason: format!(
                            "inline {} method conflicts with catalog {} method",
                            method.label(),
                            existing.method.label()
                        ),
                    });
                }
            }
            ToolSpec::new(
                &tool_ref.name,
                &tool_ref.version,
                method.clone(),
                format!("/opt/{}", tool_ref.name),
            )
        }
    };

    if let Some(path_hint) = &tool_ref.path_hint {
        tool.path_hint = path_hint.clone();
    }
    if let Some(bin_dir) = &tool_ref.bin_dir {
        tool.bin_dir = Some(bin_dir.clone());
    }
    tool.env
        .extend(tool_ref.env.iter().map(|(k, v)| (k.clone(), v.clone())));
    for cache in &tool_ref.shared_caches {
        if !tool.shared_caches.contains(cache) {
            tool.shared_caches.push(cache.clone());
        }
    }

    check_env(spec, &format!("tool {} env", tool.name), &tool.env)?;
    if !tool.path_hint.starts_with('/') {
        return Err(invalid(
            spec,
            format!("tool {} path {} is not absolute", tool.name, tool.path_hint),
        ));
    }
    if let InstallMethod::ArchiveDownload {
        sha256: Some(sum), ..
    } = &tool.method
    {
        if sum.len() != 64 || !sum.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid(
                spec,
                format!("tool {} has a malformed sha256", tool.name),
            ));
        }
    }

    Ok(tool)
}

fn system_packages_draft(packages: &[String]) -> Draft {
    let digest = sha256_bytes(packages.join("\n").as_bytes());
    let key = format!("system-packages-{}", &digest[..12]);
    let manager = PackageManager::Apt;

    Draft {
        id: "system-packages".to_string(),
        description: format!("Install system packages ({})", packages.join(", ")),
        action: StepAction::PackageInstall {
            manager,
            packages: packages.to_vec(),
            version: digest[..12].to_string(),
        },
        mounts: std::iter::once(CacheMount::per_tool(&key, format!("{}/{}", TOOL_CACHE_PREFIX, key)))
            .chain(mounts_for(manager))
            .collect(),
        exports: StepExports::default(),
    }
}

fn mounts_for(manager: PackageManager) -> impl Iterator<Item = CacheMount> {
    manager
        .caches()
        .into_iter()
        .map(|cache| CacheMount::shared(cache.key, cache.mount_path))
}

fn tool_draft(spec: &ImageSpec, tool: &ToolSpec) -> SandkitResult<Draft> {
    let mut mounts = vec![CacheMount::per_tool(tool.cache_key(), tool.cache_mount_path())];

    let action = match &tool.method {
        InstallMethod::ArchiveDownload { sha256, .. } => {
            let url = tool.source_url().unwrap_or_default();
            if !(url.starts_with("https://") || url.starts_with("http://")) {
                return Err(invalid(
                    spec,
                    format!("tool {} has an unsupported URL {}", tool.name, url),
                ));
            }
            StepAction::FetchArchive {
                tool: tool.name.clone(),
                version: tool.version.clone(),
                format: ArchiveFormat::from_url(&url),
                url,
                sha256: sha256.as_ref().map(|s| s.to_ascii_lowercase()),
                install_dir: tool.path_hint.clone(),
            }
        }
        InstallMethod::PackageManager { manager, packages } => {
            mounts.extend(mounts_for(*manager));
            let packages = if packages.is_empty() {
                vec![manager.package_for(&tool.name, &tool.version)]
            } else {
                packages.clone()
            };
            StepAction::PackageInstall {
                manager: *manager,
                packages,
                version: tool.version.clone(),
            }
        }
        InstallMethod::Script { script } => StepAction::Script {
            tool: tool.name.clone(),
            version: tool.version.clone(),
            script: script.clone(),
        },
    };

    for cache in &tool.shared_caches {
        let mount = CacheMount::shared(&cache.key, &cache.mount_path);
        if !mounts.iter().any(|m| m.key == mount.key) {
            mounts.push(mount);
        }
    }

    Ok(Draft {
        id: format!("tool:{}@{}", tool.name, tool.version),
        description: format!(
            "Install {} {} ({})",
            tool.name,
            tool.version,
            tool.method.label()
        ),
        action,
        mounts,
        exports: StepExports {
            env: tool.env.clone(),
            bin_path: tool.bin_path(),
        },
    })
}

/// Every key must mean the same directory with the same scope everywhere
fn check_mount_conflicts(spec: &ImageSpec, drafts: &[Draft]) -> SandkitResult<()> {
    let mut by_key: HashMap<&str, (&CacheMount, &str)> = HashMap::new();
    let mut by_path: HashMap<&str, &str> = HashMap::new();

    for draft in drafts {
        for mount in &draft.mounts {
            match by_key.get(mount.key.as_str()) {
                Some((existing, owner)) if existing.scope != mount.scope => {
                    return Err(invalid(
                        spec,
                        format!(
                            "cache key {} is {} for {} but {} for {}",
                            mount.key,
                            existing.scope,
                            owner,
                            mount.scope,
                            draft.id
                        ),
                    ));
                }
                Some((existing, owner)) if existing.mount_path != mount.mount_path => {
                    return Err(invalid(
                        spec,
                        format!(
                            "cache key {} is mounted at {} for {} but at {} for {}",
                            mount.key, existing.mount_path, owner, mount.mount_path, draft.id
                        ),
                    ));
                }
                Some((existing, owner))
                    if existing.scope == CacheScope::PerTool && *owner != draft.id =>
                {
                    return Err(invalid(
                        spec,
                        format!(
                            "per-tool cache key {} is used by both {} and {}",
                            mount.key, owner, draft.id
                        ),
                    ));
                }
                Some(_) => {}
                None => {
                    by_key.insert(mount.key.as_str(), (mount, draft.id.as_str()));
                }
            }

            match by_path.get(mount.mount_path.as_str()) {
                Some(key) if *key != mount.key => {
                    return Err(invalid(
                        spec,
                        format!(
                            "cache keys {} and {} share mount path {}",
                            key, mount.key, mount.mount_path
                        ),
                    ));
                }
                _ => {
                    by_path.insert(mount.mount_path.as_str(), mount.key.as_str());
                }
            }
        }
    }

    Ok(())
}
