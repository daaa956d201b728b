//! Terminal input. Passwords are read without echo.

use std::io::{self, BufRead, Write};

use anyhow::{anyhow, bail, Result};
use zeroize::Zeroizing;

const RECOMMENDED_PASSWORD_LEN: usize = 12;

/// Master password prompt handed to `VaultContext::ensure_unlocked`.
pub fn master_password() -> coffer_core::Result<Zeroizing<String>> {
    let password = rpassword::prompt_password("Enter master password: ")?;
    Ok(Zeroizing::new(password))
}

/// Ask for a new master password twice.
pub fn new_master_password() -> Result<Zeroizing<String>> {
    let first = Zeroizing::new(
        rpassword::prompt_password("Enter password: ")
            .map_err(|e| anyhow!("password prompt: {e}"))?,
    );
    if first.is_empty() {
        bail!("master password must not be empty");
    }
    let second = Zeroizing::new(
        rpassword::prompt_password("Confirm password: ")
            .map_err(|e| anyhow!("password prompt: {e}"))?,
    );
    if *first != *second {
        bail!("passwords do not match");
    }
    if first.chars().count() < RECOMMENDED_PASSWORD_LEN {
        eprintln!(
            "warning: passwords shorter than {RECOMMENDED_PASSWORD_LEN} characters are easier to guess"
        );
    }
    Ok(first)
}

pub fn hidden(label: &str) -> Result<Zeroizing<String>> {
    let value = Zeroizing::new(
        rpassword::prompt_password(label).map_err(|e| anyhow!("password prompt: {e}"))?,
    );
    Ok(trimmed(&value))
}

fn trimmed(value: &str) -> Zeroizing<String> {
    Zeroizing::new(value.trim().to_string())
}

/// Read one trimmed line from stdin.
pub fn line(label: &str) -> Result<String> {
    print!("{label}");
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().lock().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

pub fn confirm(question: &str) -> Result<bool> {
    let answer = line(&format!("{question} (y/N): "))?;
    Ok(answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trimmed_copy_stays_zeroizing() {
        let raw = Zeroizing::new("  hunter2 \n".to_string());
        let value: Zeroizing<String> = trimmed(&raw);
        assert_eq!(value.as_str(), "hunter2");
    }
}
