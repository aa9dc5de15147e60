use std::collections::BTreeMap;

use serde::Serialize;

use crate::cmd::EnvinfoArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::output::OutputFormat;

#[derive(Serialize)]
struct PlatformInfo {
    os: String,
    arch: String,
}

#[derive(Serialize)]
struct EnvInfoOutput {
    schema_id: &'static str,
    version: String,
    target: String,
    rust_version: String,
    git_hash: String,
    platform: PlatformInfo,
    dependencies: BTreeMap<String, String>,
    environment: BTreeMap<String, Option<String>>,
}

pub fn run(_args: EnvinfoArgs, format: OutputFormat) -> CliResult<i32> {
    let mut deps = BTreeMap::new();
    deps.insert("clap".to_string(), "4.5".to_string());
    deps.insert("bytes".to_string(), "1".to_string());
    deps.insert("crossbeam-utils".to_string(), "0.8".to_string());

    let mut env = BTreeMap::new();
    env.insert(
        crate::logging::LOG_LEVEL_ENV.to_string(),
        std::env::var(crate::logging::LOG_LEVEL_ENV).ok(),
    );
    env.insert("RUST_LOG".to_string(), std::env::var("RUST_LOG").ok());

    let output = EnvInfoOutput {
        schema_id: "https://schemas.ringbus.dev/cli/v1/envinfo.schema.json",
        version: env!("CARGO_PKG_VERSION").to_string(),
        target: target_triple(),
        rust_version: option_env!("RUSTC_VERSION")
            .unwrap_or("unknown")
            .to_string(),
        git_hash: option_env!("GIT_HASH").unwrap_or("unknown").to_string(),
        platform: PlatformInfo {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        },
        dependencies: deps,
        environment: env,
    };

    print_envinfo(&output, format);
    Ok(SUCCESS)
}

fn target_triple() -> String {
    if let Some(target) = option_env!("RINGBUS_BUILD_TARGET") {
        return target.to_string();
    }

    match (std::env::consts::ARCH, std::env::consts::OS) {
        ("aarch64", "macos") => "aarch64-apple-darwin".to_string(),
        ("x86_64", "macos") => "x86_64-apple-darwin".to_string(),
        ("aarch64", "linux") => "aarch64-unknown-linux-gnu".to_string(),
        ("x86_64", "linux") => "x86_64-unknown-linux-gnu".to_string(),
        ("x86_64", "windows") => "x86_64-pc-windows-msvc".to_string(),
        (arch, os) => format!("{arch}-unknown-{os}"),
    }
}

fn print_envinfo(output: &EnvInfoOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string(output).unwrap_or_else(|_| "{}".to_string())
        ),
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("ringbus environment\n");
            println!("  Version:    {}", output.version);
            println!("  Target:     {}", output.target);
            println!("  Rust:       {}", output.rust_version);
            println!("  Git hash:   {}", output.git_hash);
            println!(
                "  Platform:   {} ({})",
                output.platform.os, output.platform.arch
            );
            println!("\n  Dependencies:");
            for (k, v) in &output.dependencies {
                println!("    {:<16} {}", k, v);
            }
            println!("\n  Environment:");
            for (k, v) in &output.environment {
                println!("    {:<20} {}", k, v.as_deref().unwrap_or("(not set)"));
            }
        }
        OutputFormat::Raw => println!("{}", output.version),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envinfo_json_has_schema_id() {
        let out = EnvInfoOutput {
            schema_id: "x",
            version: "0.1.0".to_string(),
            target: "a-b-c".to_string(),
            rust_version: "1.85.0".to_string(),
            git_hash: "abc".to_string(),
            platform: PlatformInfo {
                os: "linux".to_string(),
                arch: "x86_64".to_string(),
            },
            dependencies: BTreeMap::new(),
            environment: BTreeMap::new(),
        };

        let json = serde_json::to_string(&out).expect("envinfo output should serialize");
        assert!(json.contains("\"schema_id\""));
    }

    #[test]
    fn target_looks_like_triple() {
        let target = target_triple();
        assert!(target.split('-').count() >= 3);
    }
}
