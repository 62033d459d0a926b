//! Runtime binding
//!
//! Turns a spec and its completed steps into the final image configuration:
//! environment, PATH, working directory, exposed ports and the keep-alive
//! entrypoint. Binding is deterministic and only ever applies to a build
//! whose every step succeeded.

use crate::build::StepRecord;
use crate::cache::sha256_bytes;
use crate::plan::Step;
use crate::spec::ImageSpec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Label holding the spec name
pub const SPEC_LABEL: &str = "io.sandkit.spec";

/// Label holding the combined fingerprint of all steps
pub const FINGERPRINT_LABEL: &str = "io.sandkit.fingerprint";

/// Finalized image configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageManifest {
    /// Repository tag the image is committed under
    pub tag: String,
    pub base_image: String,
    pub env: BTreeMap<String, String>,
    pub workdir: String,
    pub exposed_ports: BTreeSet<u16>,
    pub entrypoint: Vec<String>,
    pub labels: BTreeMap<String, String>,
    /// Set once the runtime committed the image
    #[serde(default)]
    pub image_id: Option<String>,
}

/// Bind a fully built spec. Returns `None` unless every step succeeded, in order.
pub fn bind(
    spec: &ImageSpec,
    steps: &[Step],
    succeeded: &[StepRecord],
    base_path: &str,
    tag: impl Into<String>,
) -> Option<ImageManifest> {
    let complete = steps.len() == succeeded.len()
        && steps
            .iter()
            .zip(succeeded)
            .all(|(step, record)| step.index == record.index && step.id == record.id);
    if !complete {
        return None;
    }

    let mut env = BTreeMap::new();
    let mut bin_dirs: Vec<&str> = Vec::new();
    for step in steps {
        env.extend(step.exports.env.clone());
        if let Some(bin) = step.exports.bin_path.as_deref() {
            if !bin_dirs.contains(&bin) {
                bin_dirs.push(bin);
            }
        }
    }

    let path = bin_dirs
        .into_iter()
        .chain(std::iter::once(base_path))
        .filter(|dir| !dir.is_empty())
        .collect::<Vec<_>>()
        .join(":");
    env.insert("PATH".to_string(), path);

    // Spec values win over tool contributions, PATH included
    env.extend(spec.env.clone());

    let exposed_ports = spec
        .exposed_ports
        .iter()
        .filter_map(|port| u16::try_from(*port).ok())
        .filter(|port| *port > 0)
        .collect();

    let mut labels = BTreeMap::new();
    labels.insert(SPEC_LABEL.to_string(), spec.name.clone());
    labels.insert(FINGERPRINT_LABEL.to_string(), combined_fingerprint(steps));

    Some(ImageManifest {
        tag: tag.into(),
        base_image: spec.base_image.clone(),
        env,
        workdir: spec.workdir.clone(),
        exposed_ports,
        entrypoint: spec.entrypoint.clone(),
        labels,
        image_id: None,
    })
}

/// One fingerprint for the whole step sequence
pub fn combined_fingerprint(steps: &[Step]) -> String {
    let joined = steps
        .iter()
        .map(|s| s.fingerprint.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    sha256_bytes(joined.as_bytes())
}

impl ImageManifest {
    /// Dockerfile instructions applied through `commit --change`
    pub fn commit_changes(&self) -> Vec<String> {
        let mut changes = Vec::new();

        for (key, value) in &self.env {
            changes.push(format!("ENV {}={}", key, dockerfile_quote(value)));
        }

        changes.push(format!("WORKDIR {}", self.workdir));

        for port in &self.exposed_ports {
            changes.push(format!("EXPOSE {}", port));
        }

        for (key, value) in &self.labels {
            changes.push(format!("LABEL {}={}", key, dockerfile_quote(value)));
        }

        // JSON exec form; plain strings always serialize
        let entrypoint = serde_json::to_string(&self.entrypoint).unwrap_or_else(|_| "[]".into());
        changes.push(format!("ENTRYPOINT {}", entrypoint));
        changes.push("CMD []".to_string());

        changes
    }
}

/// Quote a value for a Dockerfile ENV or LABEL instruction.
/// Backslashes, double quotes and `$` are escaped so nothing is expanded.
/// Line breaks never get here: resolution rejects them.
fn dockerfile_quote(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '$' | '"' | '\\' | '\'' | '='));
    if needs_quotes {
        let escaped = value
            .replace('\\', "\\\\")
            .replace('"', "\\\"")
            .replace('$', "\\$");
        format!("\"{}\"", escaped)
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ToolCatalog;
    use crate::executor::StepOutcome;
    use crate::plan::resolve;

    fn java() -> (ImageSpec, Vec<Step>) {
        let mut spec = ImageSpec::builtin("java").unwrap().unwrap();
        spec.system_packages.clear();
        spec.configure.clear();
        spec.tools
            .retain(|t| matches!(t.name.as_str(), "jdk" | "maven" | "gradle"));
        let steps = resolve(&spec, ToolCatalog::global()).unwrap();
        (spec, steps)
    }

    fn records(steps: &[Step]) -> Vec<StepRecord> {
        steps
            .iter()
            .map(|s| StepRecord {
                index: s.index,
                id: s.id.clone(),
                description: s.description.clone(),
                attempts: 1,
                outcome: StepOutcome::Installed,
            })
            .collect()
    }

    #[test]
    fn binds_complete_build() {
        let (spec, steps) = java();
        let manifest = bind(&spec, &steps, &records(&steps), "/usr/bin:/bin", "sandkit/java:latest").unwrap();

        assert_eq!(manifest.workdir, "/workspace");
        assert_eq!(
            manifest.exposed_ports.iter().copied().collect::<Vec<_>>(),
            vec![3000, 8080, 8443, 9090]
        );
        assert_eq!(manifest.entrypoint, vec!["tail", "-f", "/dev/null"]);
        assert_eq!(
            manifest.env.get("PATH").map(String::as_str),
            Some("/opt/java/jdk-21/bin:/opt/maven/bin:/opt/gradle/bin:/usr/bin:/bin")
        );
        assert_eq!(manifest.env.get("JAVA_HOME").map(String::as_str), Some("/opt/java/jdk-21"));
        assert_eq!(
            manifest.env.get("JAVA_OPTS").map(String::as_str),
            Some("-Xmx2g -XX:+UseG1GC")
        );
        assert_eq!(manifest.labels.get(SPEC_LABEL).map(String::as_str), Some("java"));
    }

    #[test]
    fn partial_build_is_not_bound() {
        let (spec, steps) = java();
        let mut partial = records(&steps);
        partial.pop();
        assert!(bind(&spec, &steps, &partial, "/bin", "t").is_none());
    }

    #[test]
    fn spec_env_wins() {
        let (mut spec, steps) = java();
        spec.env.insert("JAVA_HOME".to_string(), "/usr/lib/jvm/custom".to_string());
        let manifest = bind(&spec, &steps, &records(&steps), "/bin", "t").unwrap();
        assert_eq!(
            manifest.env.get("JAVA_HOME").map(String::as_str),
            Some("/usr/lib/jvm/custom")
        );
    }

    #[test]
    fn binding_is_deterministic() {
        let (spec, steps) = java();
        let a = bind(&spec, &steps, &records(&steps), "/bin", "t").unwrap();
        let b = bind(&spec, &steps, &records(&steps), "/bin", "t").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.commit_changes(), b.commit_changes());
    }

    #[test]
    fn duplicate_ports_collapse() {
        let (mut spec, steps) = java();
        spec.exposed_ports = vec![8080, 3000, 8080];
        let manifest = bind(&spec, &steps, &records(&steps), "/bin", "t").unwrap();
        assert_eq!(manifest.exposed_ports.len(), 2);
    }

    #[test]
    fn commit_changes_render() {
        let (spec, steps) = java();
        let manifest = bind(&spec, &steps, &records(&steps), "/bin", "t").unwrap();
        let changes = manifest.commit_changes();

        assert!(changes.contains(&"WORKDIR /workspace".to_string()));
        assert!(changes.contains(&"EXPOSE 8443".to_string()));
        assert!(changes.contains(&"ENV JAVA_OPTS=\"-Xmx2g -XX:+UseG1GC\"".to_string()));
        assert!(changes.contains(&"LABEL io.sandkit.spec=java".to_string()));
        assert!(changes.contains(&"ENTRYPOINT [\"tail\",\"-f\",\"/dev/null\"]".to_string()));
        assert_eq!(changes.last().map(String::as_str), Some("CMD []"));
    }

    #[test]
    fn dockerfile_quote_values() {
        assert_eq!(dockerfile_quote("/opt/maven"), "/opt/maven");
        assert_eq!(dockerfile_quote(""), "\"\"");
        assert_eq!(dockerfile_quote("a \"b\""), "\"a \\\"b\\\"\"");
        assert_eq!(
            dockerfile_quote("-Dmaven.repo.local=/root/.m2/repository"),
            "\"-Dmaven.repo.local=/root/.m2/repository\""
        );
        assert_eq!(dockerfile_quote("$HOME/bin"), "\"\\$HOME/bin\"");
        assert_eq!(dockerfile_quote("a\\$b"), "\"a\\\\\\$b\"");
    }
}
