use anyhow::{bail, Context, Result};
use colored::Colorize;
use std::process::Command;
use std::time::Instant;

/// The library crates worth reading docs for; xtask itself is excluded.
const LIB_CRATES: [&str; 4] = ["machine", "regbank", "peripherals", "bridge"];

pub fn run(open: bool) -> Result<()> {
    println!("{}", "building canlab API docs".bold());

    let start = Instant::now();
    let mut cmd = Command::new("cargo");
    cmd.args(["doc", "--no-deps", "--document-private-items"]);
    for name in LIB_CRATES {
        cmd.args(["-p", name]);
    }
    if open {
        cmd.arg("--open");
    }

    let output = cmd.output().context("cargo doc did not start")?;
    if !output.status.success() {
        eprintln!("{}", String::from_utf8_lossy(&output.stderr));
        bail!("cargo doc failed");
    }

    println!(
        "{}",
        format!("docs built in {:.1}s", start.elapsed().as_secs_f64()).green()
    );
    if !open {
        println!("entry points:");
        for name in LIB_CRATES {
            println!("  {}", format!("target/doc/{name}/index.html").dimmed());
        }
    }

    Ok(())
}
