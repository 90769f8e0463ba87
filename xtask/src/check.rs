use anyhow::{bail, Context, Result};
use colored::Colorize;
use std::process::Command;
use std::time::Instant;

/// `cargo check` across every target, then clippy with warnings denied —
/// the same gate the library crates' lint headers assume.
pub fn run() -> Result<()> {
    let start = Instant::now();

    for (label, args) in [
        (
            "check",
            &["check", "--workspace", "--all-targets"] as &[&str],
        ),
        (
            "clippy",
            &["clippy", "--workspace", "--all-targets", "--", "-D", "warnings"],
        ),
    ] {
        let step_start = Instant::now();
        let output = Command::new("cargo")
            .args(args)
            .output()
            .with_context(|| format!("could not launch cargo {label}"))?;

        if !output.status.success() {
            eprintln!("{}", String::from_utf8_lossy(&output.stderr));
            bail!("cargo {label} failed");
        }

        println!(
            "{:>9}  {}  {:.1}s",
            label.bold(),
            "ok".green(),
            step_start.elapsed().as_secs_f64()
        );
    }

    println!(
        "{}",
        format!("workspace clean in {:.1}s", start.elapsed().as_secs_f64())
            .green()
            .bold()
    );

    Ok(())
}
