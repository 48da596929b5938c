use anyhow::Result;

use crate::exit_codes;

pub fn run() -> Result<i32> {
    println!("{}", concord_core::config::schema_source());
    Ok(exit_codes::SUCCESS)
}
