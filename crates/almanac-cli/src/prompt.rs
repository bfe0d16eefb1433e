//! Interactive prompt helpers for the shell.

use std::io::{self, IsTerminal, Write};

use dialoguer::{theme::ColorfulTheme, Confirm, Input, Password, Select};

fn use_dialoguer() -> bool {
    std::io::stdin().is_terminal() && std::io::stdout().is_terminal()
}

fn read_plain(prompt: &str) -> anyhow::Result<Option<String>> {
    print!("{prompt}");
    io::stdout().flush()?;
    let mut line = String::new();
    if io::stdin().read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

/// Reads one shell line. `None` means stdin is closed.
pub(crate) fn read_command(label: &str) -> anyhow::Result<Option<String>> {
    if use_dialoguer() {
        let theme = ColorfulTheme::default();
        let input = Input::<String>::with_theme(&theme)
            .with_prompt(label)
            .allow_empty(true)
            .interact_text()?;
        return Ok(Some(input));
    }
    read_plain(&format!("{label}> "))
}

pub(crate) fn prompt_string(label: &str, default: &str) -> anyhow::Result<String> {
    if use_dialoguer() {
        let theme = ColorfulTheme::default();
        let mut input = Input::<String>::with_theme(&theme).with_prompt(label);
        if !default.is_empty() {
            input = input.default(default.to_string());
        }
        return Ok(input.interact_text()?);
    }
    let prompt = if default.is_empty() {
        format!("{label}: ")
    } else {
        format!("{label} [{default}]: ")
    };
    let line = read_plain(&prompt)?.unwrap_or_default();
    let trimmed = line.trim();
    if trimmed.is_empty() {
        Ok(default.to_string())
    } else {
        Ok(trimmed.to_string())
    }
}

pub(crate) fn prompt_password(label: &str) -> anyhow::Result<String> {
    if use_dialoguer() {
        let theme = ColorfulTheme::default();
        let password = Password::with_theme(&theme)
            .with_prompt(label)
            .allow_empty_password(true)
            .interact()?;
        return Ok(password);
    }
    Ok(read_plain(&format!("{label}: "))?.unwrap_or_default())
}

/// Picks one of `options` by index; `None` when the user skips.
pub(crate) fn prompt_pick(label: &str, options: &[String]) -> anyhow::Result<Option<usize>> {
    if options.is_empty() {
        return Ok(None);
    }
    if use_dialoguer() {
        let theme = ColorfulTheme::default();
        let selection = Select::with_theme(&theme)
            .with_prompt(label)
            .items(options)
            .default(0)
            .interact_opt()?;
        return Ok(selection);
    }
    for (index, option) in options.iter().enumerate() {
        println!("  {}) {option}", index + 1);
    }
    let line = read_plain(&format!("{label} [1-{}, empty to skip]: ", options.len()))?
        .unwrap_or_default();
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    match trimmed.parse::<usize>() {
        Ok(choice) if (1..=options.len()).contains(&choice) => Ok(Some(choice - 1)),
        _ => anyhow::bail!("Invalid choice '{trimmed}'. Expected 1 to {}.", options.len()),
    }
}

pub(crate) fn prompt_yes_no(label: &str, default: bool) -> anyhow::Result<bool> {
    if use_dialoguer() {
        let theme = ColorfulTheme::default();
        let confirmed = Confirm::with_theme(&theme)
            .with_prompt(label)
            .default(default)
            .interact()?;
        return Ok(confirmed);
    }
    let default_text = if default { "Y/n" } else { "y/N" };
    let line = read_plain(&format!("{label} [{default_text}]: "))?.unwrap_or_default();
    let trimmed = line.trim().to_ascii_lowercase();
    if trimmed.is_empty() {
        return Ok(default);
    }
    match trimmed.as_str() {
        "y" | "yes" => Ok(true),
        "n" | "no" => Ok(false),
        _ => anyhow::bail!("Please answer yes or no."),
    }
}
