//! Master key input.

use std::io::IsTerminal;

use dialoguer::Password;
use zeroize::Zeroizing;

pub const MASTER_KEY_ENV: &str = "CLINIVAULT_MASTER_KEY";

/// Read the master key from `CLINIVAULT_MASTER_KEY`, or prompt for it.
///
/// With `confirm`, the prompt asks twice (for `init`).
pub fn read_master_key(confirm: bool) -> anyhow::Result<Zeroizing<String>> {
    if let Ok(value) = std::env::var(MASTER_KEY_ENV) {
        if !value.trim().is_empty() {
            return Ok(Zeroizing::new(value));
        }
    }
    if !std::io::stdin().is_terminal() {
        return Err(anyhow::anyhow!(
            "No master key provided and no TTY available. Set {}.",
            MASTER_KEY_ENV
        ));
    }

    let mut prompt = Password::new().with_prompt("Master key");
    if confirm {
        prompt = prompt.with_confirmation("Confirm master key", "Master keys do not match");
    }
    prompt
        .interact()
        .map(Zeroizing::new)
        .map_err(|e| anyhow::anyhow!("Failed to read master key: {}", e))
}
