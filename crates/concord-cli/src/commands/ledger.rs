use anyhow::{bail, Result};
use chrono::Utc;

use concord_core::{LedgerSnapshot, ReliabilityLedger};

use crate::args::{Format, LedgerCommand};
use crate::{exit_codes, input, output};

pub fn run(command: LedgerCommand) -> Result<i32> {
    match command {
        LedgerCommand::Show { ledger, format } => {
            let snapshot = input::load_ledger(&ledger)?;
            match format {
                Format::Json => println!("{}", snapshot.to_json()?),
                Format::Text => show(&snapshot),
            }
            Ok(exit_codes::SUCCESS)
        }
        LedgerCommand::Reset {
            ledger,
            judge,
            output,
            config,
        } => {
            let snapshot = input::load_ledger(&ledger)?;
            let reliability = input::load_config(config.as_deref())?.reliability;
            let mut restored = ReliabilityLedger::restore(reliability, snapshot);
            if !restored.reset(&judge) {
                bail!("Judge '{}' is not in {}", judge, ledger.display());
            }

            let target = output.as_deref().unwrap_or(&ledger);
            input::write(target, &restored.snapshot().to_json()?)?;
            eprintln!("Reset {} in {}", judge, target.display());
            Ok(exit_codes::SUCCESS)
        }
    }
}

fn show(snapshot: &LedgerSnapshot) {
    let age = Utc::now().signed_duration_since(snapshot.taken_at);
    println!(
        "{} judges, snapshot taken {} ({}m ago)",
        snapshot.profiles.len(),
        snapshot.taken_at.to_rfc3339(),
        age.num_minutes()
    );
    for profile in &snapshot.profiles {
        println!("  {}", output::profile(profile));
    }
}
