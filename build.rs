//! Build script: version metadata and GPU toolkit pre-flight checks.
//!
//! whisper-rs-sys fails deep inside cmake when a GPU toolkit is missing, so
//! the GPU features check for the toolkit first and stop with a short hint.

use std::process::Command;

fn main() {
    // Embed git short hash for version string
    if let Ok(output) = Command::new("git")
        .args(["rev-parse", "--short=7", "HEAD"])
        .output()
        && output.status.success()
    {
        let hash = String::from_utf8_lossy(&output.stdout).trim().to_string();
        println!("cargo:rustc-env=GIT_HASH={}", hash);
    }
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/heads/");

    if cfg!(feature = "cuda") {
        require_tool("nvcc", &["--version"], "CUDA toolkit", "cuda");
        if let Some(version) = cuda_toolkit_version() {
            println!("cargo::warning=Building with CUDA {}.{}", version.0, version.1);
        }
    }
    if cfg!(feature = "vulkan") {
        require_tool("vulkaninfo", &["--summary"], "Vulkan SDK", "vulkan");
    }
    if cfg!(feature = "hipblas") {
        require_tool("rocminfo", &[], "ROCm", "hipblas");
    }
}

fn require_tool(program: &str, args: &[&str], toolkit: &str, feature: &str) {
    if Command::new(program).args(args).output().is_err() {
        panic!(
            "`{}` not found: the {} is required by the `{}` feature.\n\
             Install it, or build without `--features {}`.",
            program, toolkit, feature, feature
        );
    }
}

fn cuda_toolkit_version() -> Option<(u32, u32)> {
    let output = Command::new("nvcc").arg("--version").output().ok()?;
    parse_cuda_version(&String::from_utf8_lossy(&output.stdout))
}

/// Parse "release X.Y" from nvcc --version output.
fn parse_cuda_version(text: &str) -> Option<(u32, u32)> {
    let after = text.split("release ").nth(1)?;
    let version = after.split(',').next()?;
    let (major, minor) = version.trim().split_once('.')?;
    Some((major.parse().ok()?, minor.parse().ok()?))
}
