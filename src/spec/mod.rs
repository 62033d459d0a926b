//! Image specifications
//!
//! An [`ImageSpec`] is the declarative identity of one sandbox flavor. Specs
//! are TOML documents; the built-in ones are compiled into the binary from
//! `images/`.

use crate::catalog::{InstallMethod, SharedCache};
use crate::error::{SandkitError, SandkitResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

// Built-in specs embedded at compile time
const BUILTIN_JAVA: &str = include_str!("../../images/java.toml");
const BUILTIN_NODE: &str = include_str!("../../images/node.toml");

const BUILTIN_SPECS: &[(&str, &str)] = &[("java", BUILTIN_JAVA), ("node", BUILTIN_NODE)];

/// Declarative definition of one sandbox image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSpec {
    /// Unique name, also used for the committed image tag
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Image the build container starts from
    pub base_image: String,

    /// Tools to install, in order
    #[serde(default)]
    pub tools: Vec<ToolRef>,

    /// Environment baked into the image; wins over tool-provided values
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub workdir: String,

    /// Ports to expose. Kept wide so out-of-range values reach validation.
    #[serde(default)]
    pub exposed_ports: Vec<i64>,

    /// Keep-alive command of the finished image
    #[serde(default = "default_entrypoint")]
    pub entrypoint: Vec<String>,

    /// OS packages installed before any tool
    #[serde(default)]
    pub system_packages: Vec<String>,

    /// Fixed configuration commands run after all tools
    #[serde(default)]
    pub configure: Vec<Vec<String>>,
}

/// Reference to a tool from an image spec.
///
/// Without a `method`, the tool is taken from the catalog by name and
/// version. With one, the reference is a complete inline definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolRef {
    pub name: String,

    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub method: Option<InstallMethod>,

    #[serde(default)]
    pub path_hint: Option<String>,

    #[serde(default)]
    pub bin_dir: Option<String>,

    /// Merged over the catalog's env for this tool
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub shared_caches: Vec<SharedCache>,
}

impl ToolRef {
    /// Reference a catalog tool at an exact version
    pub fn catalog(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            method: None,
            path_hint: None,
            bin_dir: None,
            env: BTreeMap::new(),
            shared_caches: Vec::new(),
        }
    }
}

fn default_entrypoint() -> Vec<String> {
    vec!["tail".to_string(), "-f".to_string(), "/dev/null".to_string()]
}

impl ImageSpec {
    /// Parse a spec from a TOML string
    pub fn parse(content: &str) -> SandkitResult<Self> {
        toml::from_str(content).map_err(|e| SandkitError::invalid_spec("<toml>", e.to_string()))
    }

    /// Parse a spec from a TOML file on disk
    pub async fn from_file(path: &Path) -> SandkitResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| SandkitError::io(format!("reading image spec {}", path.display()), e))?;
        toml::from_str(&content)
            .map_err(|e| SandkitError::invalid_spec(path.display().to_string(), e.to_string()))
    }

    /// Look up a built-in spec by name
    pub fn builtin(name: &str) -> SandkitResult<Option<Self>> {
        BUILTIN_SPECS
            .iter()
            .find(|(builtin, _)| *builtin == name)
            .map(|(_, content)| Self::parse(content))
            .transpose()
    }

    /// Names of all built-in specs
    pub fn builtin_names() -> Vec<&'static str> {
        BUILTIN_SPECS.iter().map(|(name, _)| *name).collect()
    }

    /// Resolve a CLI argument: an existing file path first, then a built-in name
    pub async fn load(name_or_path: &str) -> SandkitResult<Self> {
        let path = Path::new(name_or_path);
        if path.is_file() {
            debug!("Loading image spec from {}", path.display());
            return Self::from_file(path).await;
        }

        Self::builtin(name_or_path)?
            .ok_or_else(|| SandkitError::SpecNotFound(name_or_path.to_string()))
    }

    /// Repository tag the finished image is committed under
    pub fn image_tag(&self, prefix: &str) -> String {
        format!("{}/{}:latest", prefix, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::PackageManager;
    use std::collections::HashSet;
    use tempfile::TempDir;

    #[test]
    fn builtin_java_parses() {
        let spec = ImageSpec::builtin("java").unwrap().unwrap();
        assert_eq!(spec.name, "java");
        assert_eq!(spec.workdir, "/workspace");
        assert_eq!(spec.exposed_ports, vec![3000, 8080, 8443, 9090]);
        assert_eq!(spec.entrypoint, vec!["tail", "-f", "/dev/null"]);

        let tools: Vec<(&str, &str)> = spec
            .tools
            .iter()
            .map(|t| (t.name.as_str(), t.version.as_str()))
            .collect();
        assert_eq!(
            tools,
            vec![
                ("jdk", "21"),
                ("maven", "3.9.6"),
                ("gradle", "8.5"),
                ("node", "20.11.1"),
                ("pnpm", "8.15.4"),
                ("yarn", "1.22.21"),
                ("typescript", "5.3.3"),
                ("tsx", "4.7.1"),
            ]
        );
        assert_eq!(
            spec.configure.last().unwrap(),
            &vec!["sh", "-c", "mvn --version && gradle --version"]
        );
    }

    #[test]
    fn builtin_names_are_unique_and_match() {
        let names = ImageSpec::builtin_names();
        let unique: HashSet<_> = names.iter().collect();
        assert_eq!(unique.len(), names.len());

        for name in names {
            let spec = ImageSpec::builtin(name).unwrap().unwrap();
            assert_eq!(spec.name, name);
        }
    }

    #[test]
    fn builtin_unknown() {
        assert!(ImageSpec::builtin("cobol").unwrap().is_none());
    }

    #[test]
    fn entrypoint_defaults_to_keepalive() {
        let spec = ImageSpec::parse("name = \"x\"\nbase_image = \"ubuntu:22.04\"\n").unwrap();
        assert_eq!(spec.entrypoint, default_entrypoint());
        assert!(spec.workdir.is_empty());
        assert!(spec.tools.is_empty());
    }

    #[test]
    fn inline_tool_method() {
        let spec = ImageSpec::parse(
            r#"
name = "custom"
base_image = "ubuntu:22.04"
workdir = "/work"

[[tools]]
name = "prettier"
version = "3.2.5"
method = { type = "package-manager", manager = "npm" }
"#,
        )
        .unwrap();

        assert_eq!(
            spec.tools[0].method,
            Some(InstallMethod::PackageManager {
                manager: PackageManager::Npm,
                packages: vec![]
            })
        );
    }

    #[test]
    fn missing_required_fields_errors() {
        let result = ImageSpec::parse("name = \"broken\"\n");
        assert!(matches!(result, Err(SandkitError::InvalidSpec { .. })));
    }

    #[test]
    fn negative_port_still_parses() {
        let spec = ImageSpec::parse(
            "name = \"x\"\nbase_image = \"b\"\nexposed_ports = [-1, 70000]\n",
        )
        .unwrap();
        assert_eq!(spec.exposed_ports, vec![-1, 70000]);
    }

    #[tokio::test]
    async fn load_prefers_files() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("java");
        std::fs::write(&path, "name = \"from-file\"\nbase_image = \"alpine:3.19\"\n").unwrap();

        let spec = ImageSpec::load(path.to_str().unwrap()).await.unwrap();
        assert_eq!(spec.name, "from-file");

        let spec = ImageSpec::load("node").await.unwrap();
        assert_eq!(spec.name, "node");
    }

    #[tokio::test]
    async fn load_missing_errors() {
        let err = ImageSpec::load("does-not-exist").await.unwrap_err();
        assert!(matches!(err, SandkitError::SpecNotFound(_)));
    }

    #[test]
    fn image_tag_uses_prefix() {
        let spec = ImageSpec::builtin("node").unwrap().unwrap();
        assert_eq!(spec.image_tag("sandkit"), "sandkit/node:latest");
    }
}
