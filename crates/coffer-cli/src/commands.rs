use std::time::Duration;

use anyhow::{bail, Context, Result};
use coffer_core::{Secret, VaultContext, VaultError};
use tracing::info;

use crate::prompt;

const MASK: &str = "********";

pub fn init(ctx: &mut VaultContext) -> Result<()> {
    if ctx.vault_exists()? {
        return Err(VaultError::VaultAlreadyExists.into());
    }

    println!("Creating a new vault...");
    println!();
    println!("Choose a strong master password:");
    println!("  - at least 12 characters");
    println!("  - a mix of letters, numbers and symbols");
    println!("  - not reused from another service");
    println!();

    let password = prompt::new_master_password()?;
    ctx.initialize(&password).context("create vault")?;

    println!();
    println!("Vault created.");
    println!();
    println!("Next steps:");
    println!("  coffer add -u USERNAME -p PASSWORD");
    println!("  coffer list");
    println!("  coffer get <index>");
    Ok(())
}

pub fn unlock(ctx: &VaultContext) -> Result<()> {
    let reused = ctx.ensure_unlocked(prompt::master_password)?;
    if reused {
        println!("Vault is already unlocked.");
    } else {
        println!("Vault unlocked.");
    }
    println!("{}", describe_window(ctx.session().remaining_time()));
    Ok(())
}

pub fn lock(ctx: &VaultContext) -> Result<()> {
    ctx.lock().context("clear session")?;
    println!("Vault locked. The next command will ask for the master password.");
    Ok(())
}

pub fn status(ctx: &VaultContext) -> Result<()> {
    if !ctx.vault_exists()? {
        println!("Vault:    not initialized");
        return Ok(());
    }
    println!("Vault:    initialized");
    if ctx.session().is_valid() {
        println!(
            "Session:  active ({})",
            describe_window(ctx.session().remaining_time())
        );
    } else {
        println!("Session:  locked");
    }
    println!(
        "Autolock: {}",
        describe_autolock(ctx.config().read().auto_lock_secs)
    );
    Ok(())
}

pub fn add(
    ctx: &VaultContext,
    username: Option<String>,
    password: Option<String>,
    url: Option<String>,
    description: Option<String>,
) -> Result<()> {
    ctx.ensure_unlocked(prompt::master_password)?;

    let interactive =
        username.is_none() && password.is_none() && url.is_none() && description.is_none();
    let username = match username {
        Some(u) => u,
        None => prompt::line("Username: ")?,
    };
    let password = match password {
        Some(p) => zeroize::Zeroizing::new(p),
        None => prompt::hidden("Password: ")?,
    };
    let (url, description) = if interactive {
        (
            prompt::line("URL (optional): ")?,
            prompt::line("Description (optional): ")?,
        )
    } else {
        (url.unwrap_or_default(), description.unwrap_or_default())
    };

    if username.is_empty() {
        bail!("username is required");
    }
    if password.is_empty() {
        bail!("password is required");
    }

    let secret = Secret::new(username, password.as_str(), url, description);
    ctx.secrets().add(&secret).context("save secret")?;
    info!("secret added");
    println!("Secret for '{}' saved.", secret.username);
    Ok(())
}

pub fn get(ctx: &VaultContext, target: &str, show_password: bool) -> Result<()> {
    ctx.ensure_unlocked(prompt::master_password)?;
    let secrets = sorted_secrets(ctx)?;
    let index = resolve(&secrets, target)?;
    let secret = &secrets[index];

    println!("Index:       {}", index + 1);
    println!("ID:          {}", secret.id);
    println!("Username:    {}", secret.username);
    if show_password {
        println!("Password:    {}", secret.password);
    } else {
        println!("Password:    {MASK}  (use --show-password to reveal)");
    }
    println!("URL:         {}", secret.url);
    println!("Description: {}", secret.description);
    println!("Created:     {}", secret.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("Updated:     {}", secret.updated_at.format("%Y-%m-%d %H:%M:%S UTC"));
    Ok(())
}

pub fn list(ctx: &VaultContext, verbose: bool) -> Result<()> {
    ctx.ensure_unlocked(prompt::master_password)?;
    let secrets = sorted_secrets(ctx)?;
    if secrets.is_empty() {
        println!("No secrets found in the vault.");
        return Ok(());
    }
    info!(count = secrets.len(), "listing secrets");

    if verbose {
        println!(
            "{:<6} {:<24} {:<32} {:<12} {}",
            "#", "USERNAME", "URL", "CREATED", "DESCRIPTION"
        );
        println!("{}", "-".repeat(110));
    } else {
        println!("{:<6} {:<24} {:<32} {}", "#", "USERNAME", "URL", "DESCRIPTION");
        println!("{}", "-".repeat(96));
    }
    for (i, secret) in secrets.iter().enumerate() {
        if verbose {
            println!(
                "{:<6} {:<24} {:<32} {:<12} {}",
                i + 1,
                truncate(&secret.username, 24),
                truncate(&secret.url, 32),
                secret.created_at.format("%Y-%m-%d"),
                truncate(&secret.description, 50),
            );
        } else {
            println!(
                "{:<6} {:<24} {:<32} {}",
                i + 1,
                truncate(&secret.username, 24),
                truncate(&secret.url, 32),
                truncate(&secret.description, 50),
            );
        }
    }
    Ok(())
}

pub fn update(
    ctx: &VaultContext,
    target: &str,
    username: Option<String>,
    url: Option<String>,
    description: Option<String>,
) -> Result<()> {
    ctx.ensure_unlocked(prompt::master_password)?;
    let mut secrets = sorted_secrets(ctx)?;
    let index = resolve(&secrets, target)?;
    let mut secret = secrets.swap_remove(index);

    if username.is_none() && url.is_none() && description.is_none() {
        edit_interactively(&mut secret)?;
    } else {
        if let Some(u) = username {
            secret.username = u;
        }
        if let Some(u) = url {
            secret.url = u;
        }
        if let Some(d) = description {
            secret.description = d;
        }
    }

    ctx.secrets()
        .update(&mut secret)
        .context("update secret")?;
    info!("secret updated");
    println!("Secret {} updated.", index + 1);
    Ok(())
}

pub fn delete(ctx: &VaultContext, target: &str, yes: bool) -> Result<()> {
    ctx.ensure_unlocked(prompt::master_password)?;
    let secrets = sorted_secrets(ctx)?;
    let index = resolve(&secrets, target)?;
    let secret = &secrets[index];

    if !yes
        && !prompt::confirm(&format!(
            "Delete secret {} ({})?",
            index + 1,
            secret.username
        ))?
    {
        println!("Delete cancelled.");
        return Ok(());
    }

    ctx.secrets()
        .delete(&secret.id)
        .context("delete secret")?;
    info!("secret deleted");
    println!("Secret {} deleted.", index + 1);
    Ok(())
}

pub fn config_get_autolock(ctx: &VaultContext) -> Result<()> {
    let secs = ctx.config().read().auto_lock_secs;
    println!("Autolock timeout: {}", describe_autolock(secs));
    Ok(())
}

pub fn config_set_autolock(ctx: &VaultContext, value: &str) -> Result<()> {
    let secs: u64 = value
        .trim()
        .parse()
        .with_context(|| format!("invalid autolock value {value:?}: expected whole seconds"))?;
    ctx.set_auto_lock(secs)?;
    println!("Autolock timeout set to {}", describe_autolock(secs));
    Ok(())
}

fn edit_interactively(secret: &mut Secret) -> Result<()> {
    let username = prompt::line(&format!(
        "Username (leave blank to keep '{}'): ",
        secret.username
    ))?;
    if !username.is_empty() {
        secret.username = username;
    }
    let password = prompt::hidden("Password (leave blank to keep current): ")?;
    if !password.is_empty() {
        secret.password = password.to_string();
    }
    let url = prompt::line(&format!("URL (leave blank to keep '{}'): ", secret.url))?;
    if !url.is_empty() {
        secret.url = url;
    }
    let description = prompt::line(&format!(
        "Description (leave blank to keep '{}'): ",
        secret.description
    ))?;
    if !description.is_empty() {
        secret.description = description;
    }
    Ok(())
}

/// Records in creation order, the order list indexes refer to.
fn sorted_secrets(ctx: &VaultContext) -> Result<Vec<Secret>> {
    let mut secrets = ctx.secrets().list().context("load secrets")?;
    secrets.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    Ok(secrets)
}

/// Accepts a 1-based list index or a record id.
fn resolve(secrets: &[Secret], target: &str) -> Result<usize> {
    if secrets.is_empty() {
        bail!("the vault has no secrets yet");
    }
    if let Ok(index) = target.parse::<usize>() {
        if index == 0 || index > secrets.len() {
            bail!(
                "invalid index {index} (valid range: 1-{})",
                secrets.len()
            );
        }
        return Ok(index - 1);
    }
    secrets
        .iter()
        .position(|s| s.id == target)
        .ok_or_else(|| VaultError::NotFound(target.to_string()).into())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let head: String = s.chars().take(max.saturating_sub(3)).collect();
    format!("{head}...")
}

fn describe_autolock(secs: u64) -> String {
    if secs == 0 {
        "disabled".to_string()
    } else {
        format!("{secs} seconds ({:.2} minutes)", secs as f64 / 60.0)
    }
}

fn describe_window(remaining: Duration) -> String {
    if remaining == Duration::MAX {
        return "autolock disabled; the session lasts until `coffer lock`".to_string();
    }
    let secs = remaining.as_secs();
    format!("locks after {}m {:02}s of inactivity", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secrets() -> Vec<Secret> {
        vec![
            Secret::new("alice", "p1", "", ""),
            Secret::new("bob", "p2", "", ""),
        ]
    }

    #[test]
    fn resolves_indexes_and_ids() {
        let s = secrets();
        assert_eq!(resolve(&s, "1").unwrap(), 0);
        assert_eq!(resolve(&s, "2").unwrap(), 1);
        assert_eq!(resolve(&s, &s[1].id).unwrap(), 1);
        assert!(resolve(&s, "0").is_err());
        assert!(resolve(&s, "3").is_err());
        assert!(resolve(&[], "1").is_err());

        let err = resolve(&s, "no-such-id").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<VaultError>(),
            Some(VaultError::NotFound(_))
        ));
    }

    #[test]
    fn truncates_on_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghijkl", 8), "abcde...");
        assert_eq!(truncate("ééééééééé", 6), "ééé...");
    }

    #[test]
    fn describes_windows() {
        assert_eq!(describe_autolock(0), "disabled");
        assert_eq!(describe_autolock(300), "300 seconds (5.00 minutes)");
        assert!(describe_window(Duration::MAX).contains("disabled"));
        assert_eq!(
            describe_window(Duration::from_secs(125)),
            "locks after 2m 05s of inactivity"
        );
    }
}
