use anyhow::{bail, Context, Result};
use colored::Colorize;
use std::process::Command;
use std::time::Instant;

/// One cargo invocation in the test run.
struct Suite {
    label: &'static str,
    args: &'static [&'static str],
}

/// In-crate `#[cfg(test)]` modules across all four library crates.
const UNIT: Suite = Suite {
    label: "unit",
    args: &["test", "--lib", "--workspace"],
};

/// The register-plane scenarios in `crates/peripherals/tests/` and the
/// bridge lifecycle tests in `crates/bridge/tests/`.
const SCENARIO: Suite = Suite {
    label: "scenario",
    args: &["test", "--workspace", "--tests"],
};

/// Doc examples; these double as the crates' README-level usage samples.
const DOC: Suite = Suite {
    label: "doc",
    args: &["test", "--doc", "--workspace"],
};

pub fn run(unit_only: bool, integration_only: bool) -> Result<()> {
    let mut suites = Vec::new();
    if !integration_only {
        suites.push(&UNIT);
    }
    if !unit_only {
        suites.push(&SCENARIO);
    }
    if !unit_only && !integration_only {
        suites.push(&DOC);
    }

    let start = Instant::now();
    for suite in &suites {
        let suite_start = Instant::now();
        let output = Command::new("cargo")
            .args(suite.args)
            .output()
            .with_context(|| format!("could not launch the {} suite", suite.label))?;

        if !output.status.success() {
            eprintln!("{}", String::from_utf8_lossy(&output.stdout));
            eprintln!("{}", String::from_utf8_lossy(&output.stderr));
            bail!("{} suite failed", suite.label);
        }

        let passed = count_passed(&String::from_utf8_lossy(&output.stdout));
        println!(
            "{:>9}  {}  {passed} passed in {:.1}s",
            suite.label.bold(),
            "ok".green(),
            suite_start.elapsed().as_secs_f64()
        );
    }

    println!(
        "{}",
        format!(
            "{} suites green in {:.1}s",
            suites.len(),
            start.elapsed().as_secs_f64()
        )
        .green()
        .bold()
    );

    Ok(())
}

/// Sum the pass counts over every per-target `test result:` line, since a
/// workspace run prints one line per crate and test binary.
fn count_passed(output: &str) -> usize {
    output
        .lines()
        .filter_map(|line| {
            let rest = line.split("test result:").nth(1)?;
            let count = rest.split(" passed").next()?.split_whitespace().last()?;
            count.parse::<usize>().ok()
        })
        .sum()
}
