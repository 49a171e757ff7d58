//! `policy` command: print the derived expiration thresholds.

use std::path::Path;

use super::load_config;
use crate::error::CliError;

/// Print every expiration threshold.
pub fn run(path: Option<&Path>) -> Result<(), CliError> {
    let config = load_config(path)?;
    let policy = config.expiration_policy()?;

    println!("Expiration Policy");
    println!("=================");
    println!();

    for (name, value) in policy.thresholds() {
        println!("  {:<28} {:>12} ms  ({})", name, value.as_millis(), value);
    }
    println!(
        "  {:<28} {:>12}",
        "max_long_running_timeout_retries",
        policy.max_long_running_timeout_retries()
    );

    Ok(())
}
