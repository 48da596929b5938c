use anyhow::Result;

use concord_core::{ConfigError, ConsensusConfig};

use crate::args::ValidateArgs;
use crate::exit_codes;

pub fn run(args: ValidateArgs) -> Result<i32> {
    match ConsensusConfig::from_file(&args.config) {
        Ok(config) => {
            println!(
                "{}: ok ({} criteria, scale {}..{})",
                args.config.display(),
                config.criteria.len(),
                config.scale.min,
                config.scale.max
            );
            Ok(exit_codes::SUCCESS)
        }
        Err(ConfigError::SchemaError(violations)) => {
            eprintln!("{}: does not match schema", args.config.display());
            for violation in violations {
                eprintln!("  - {}", violation);
            }
            Ok(exit_codes::ERROR)
        }
        Err(e) => {
            eprintln!("{}: {}", args.config.display(), e);
            Ok(exit_codes::ERROR)
        }
    }
}
