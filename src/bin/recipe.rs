//! Recipe Calculator
//!
//! Prints the mixing plan for an N-P-K target.
//! Run with: cargo run --bin recipe -- <n> <p> <k> [weight] [--json]
//!
//! Example: cargo run --bin recipe -- 15 15 15 50

use anyhow::{bail, Context, Result};
use npk_mixer::{NpkTarget, Nutrient, RecipeSolver, DEFAULT_TOTAL_WEIGHT};

const USAGE: &str = "Usage: recipe <n> <p> <k> [weight] [--json]";

fn parse_arg(args: &[String], index: usize, name: &str) -> Result<Option<f64>> {
    match args.get(index) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .with_context(|| format!("Invalid {} value: {:?}\n{}", name, raw, USAGE)),
        None => Ok(None),
    }
}

fn main() -> Result<()> {
    let mut json = false;
    let mut args = Vec::new();
    for arg in std::env::args().skip(1) {
        if arg == "--json" {
            json = true;
        } else {
            args.push(arg);
        }
    }

    if args.len() < 3 || args.len() > 4 {
        bail!("{}", USAGE);
    }

    let n = parse_arg(&args, 0, "n")?.unwrap_or_default();
    let p = parse_arg(&args, 1, "p")?.unwrap_or_default();
    let k = parse_arg(&args, 2, "k")?.unwrap_or_default();
    let weight = parse_arg(&args, 3, "weight")?.unwrap_or(DEFAULT_TOTAL_WEIGHT);

    let solver = RecipeSolver::default();
    let plan = match solver.solve(&NpkTarget::new(n, p, k), weight) {
        Ok(plan) => plan,
        Err(e) => {
            if json {
                println!("{}", serde_json::json!({ "error": e.user_message(), "kind": e.kind() }));
            } else {
                eprintln!("{}", e.user_message());
            }
            std::process::exit(1);
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    println!("Recipe for {}-{}-{} ({} kg batch)", n, p, k, weight);
    println!("{}", "=".repeat(48));
    for row in plan.rows(solver.materials()) {
        println!(
            "{:<8} {:<10} {:>10.2} kg  {:>6.1}%",
            row.material, row.sub_label, row.mass, row.share
        );
    }
    println!("{}", "-".repeat(48));
    println!("{:<19} {:>10.2} kg", "Total", plan.total);

    let delivered = plan.nutrient_content(solver.materials());
    for nutrient in Nutrient::ALL {
        println!("{:<12} {:>6.2}%", nutrient.display_name(), delivered.get(nutrient));
    }

    Ok(())
}
