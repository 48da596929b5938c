use anyhow::{Context, Result};
use std::fs;

use concord_core::EvidenceAssessor;

use crate::args::{AssessArgs, Format};
use crate::{exit_codes, input, output};

pub fn run(args: AssessArgs) -> Result<i32> {
    let config = input::load_config(args.config.as_deref())?;
    let assessor = EvidenceAssessor::new(config.evidence)?;

    let rationale = match (args.text, args.file) {
        (Some(text), _) => text,
        (None, Some(path)) => fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        (None, None) => anyhow::bail!("Provide rationale text or --file"),
    };

    let quality = assessor.assess(&rationale);
    match args.format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&quality)?),
        Format::Text => print!("{}", output::evidence(&quality)),
    }
    Ok(exit_codes::SUCCESS)
}
