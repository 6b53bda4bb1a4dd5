use std::process::Command;

use anyhow::{Context, Result};

/// Feature sets checked with `--no-default-features`
const FEATURE_COMBINATIONS: &[&[&str]] = &[
    &[], // bare core
    &["config"],
];

/// Check that all required feature combinations compile successfully.
pub fn test_feature_matrix() -> Result<()> {
    println!("Testing {} shield feature combinations...", FEATURE_COMBINATIONS.len());

    for (index, features) in FEATURE_COMBINATIONS.iter().enumerate() {
        let joined = features.join(",");
        let is_bare = features.is_empty();
        let display_label = if is_bare { "no-default".to_string() } else { joined.clone() };
        let feature_arg = if is_bare { None } else { Some(joined) };

        println!(
            "\n[{}/{}] cargo check -p shield --all-targets --no-default-features{}",
            index + 1,
            FEATURE_COMBINATIONS.len(),
            feature_arg.as_ref().map(|arg| format!(" --features {arg}")).unwrap_or_default()
        );

        let mut command = Command::new("cargo");
        command.args(["check", "-p", "shield", "--all-targets", "--no-default-features"]);

        if let Some(feature_list) = feature_arg.as_ref() {
            command.arg("--features").arg(feature_list.as_str());
        }

        let status = command
            .status()
            .with_context(|| format!("Failed to run cargo check for '{display_label}'"))?;

        if !status.success() {
            anyhow::bail!("Feature combination '{display_label}' failed to compile");
        }

        println!("✅ Features '{display_label}' compiled successfully");
    }

    println!("\n✅ All {} feature combinations compile successfully!", FEATURE_COMBINATIONS.len());

    Ok(())
}
