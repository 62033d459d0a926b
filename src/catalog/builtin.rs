//! Built-in tool definitions
//!
//! Archive checksums are not pinned here; the executor records the digest of
//! the first download in the cache stamp and enforces it on every later run.

use crate::catalog::tool::{InstallMethod, PackageManager, ToolSpec};

fn archive(url: &str) -> InstallMethod {
    InstallMethod::ArchiveDownload {
        url: url.to_string(),
        sha256: None,
    }
}

fn npm() -> InstallMethod {
    InstallMethod::PackageManager {
        manager: PackageManager::Npm,
        packages: Vec::new(),
    }
}

fn npm_tool(name: &str, version: &str) -> ToolSpec {
    // Globals land under node's own prefix, whose bin dir is already on PATH
    ToolSpec::new(
        name,
        version,
        npm(),
        format!("/opt/node/lib/node_modules/{}", name),
    )
}

/// Every tool the catalog knows out of the box
pub fn builtin_tools() -> Vec<ToolSpec> {
    vec![
        ToolSpec::new(
            "jdk",
            "21",
            archive("https://github.com/adoptium/temurin21-binaries/releases/download/jdk-21.0.2%2B13/OpenJDK21U-jdk_x64_linux_hotspot_21.0.2_13.tar.gz"),
            "/opt/java/jdk-21",
        )
        .with_bin_dir("bin")
        .with_env("JAVA_HOME", "/opt/java/jdk-21"),
        ToolSpec::new(
            "jdk",
            "17",
            archive("https://github.com/adoptium/temurin17-binaries/releases/download/jdk-17.0.10%2B7/OpenJDK17U-jdk_x64_linux_hotspot_17.0.10_7.tar.gz"),
            "/opt/java/jdk-17",
        )
        .with_bin_dir("bin")
        .with_env("JAVA_HOME", "/opt/java/jdk-17"),
        ToolSpec::new(
            "maven",
            "3.9.6",
            archive("https://archive.apache.org/dist/maven/maven-3/{version}/binaries/apache-maven-{version}-bin.tar.gz"),
            "/opt/maven",
        )
        .with_bin_dir("bin")
        .with_env("MAVEN_HOME", "/opt/maven")
        .with_env("MAVEN_OPTS", "-Dmaven.repo.local=/root/.m2/repository")
        .with_shared_cache("maven-repository", "/root/.m2"),
        ToolSpec::new(
            "gradle",
            "8.5",
            archive("https://services.gradle.org/distributions/gradle-{version}-bin.zip"),
            "/opt/gradle",
        )
        .with_bin_dir("bin")
        .with_env("GRADLE_HOME", "/opt/gradle")
        .with_env("GRADLE_USER_HOME", "/root/.gradle")
        .with_shared_cache("gradle-home", "/root/.gradle"),
        ToolSpec::new(
            "node",
            "20.11.1",
            archive("https://nodejs.org/dist/v{version}/node-v{version}-linux-x64.tar.gz"),
            "/opt/node",
        )
        .with_bin_dir("bin"),
        npm_tool("pnpm", "8.15.4"),
        npm_tool("yarn", "1.22.21"),
        npm_tool("typescript", "5.3.3"),
        npm_tool("tsx", "4.7.1"),
    ]
}
