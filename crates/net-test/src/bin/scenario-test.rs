//! End-to-end scenario runner binary

use clap::{Arg, Command};
use netstate_test::scenarios::ScenarioRunner;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let matches = Command::new("scenario-test")
        .about("Run save/restore scenarios against a simulated host")
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("FILE")
                .help("Write a markdown report to FILE"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Verbose output")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let output_file = matches.get_one::<String>("output");
    let verbose = matches.get_flag("verbose");

    let results = ScenarioRunner::new().run_all().await;

    if verbose {
        results.print_summary();
    } else {
        println!(
            "Scenario Results: {}/{} passed",
            results.passed, results.total
        );
    }

    if let Some(output_path) = output_file {
        std::fs::write(output_path, results.generate_report())?;
        println!("Report written to: {}", output_path);
    }

    if results.failed > 0 {
        std::process::exit(1);
    }

    Ok(())
}
