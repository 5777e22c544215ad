//! Config subcommand handlers.

use dialoguer::{Input, Select};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config::{self, Config, Profile};
use crate::error::CliError;
use crate::output;

// ── Helpers ─────────────────────────────────────────────────────────

/// Format config for display, masking sensitive fields.
fn format_config_redacted(cfg: &Config) -> String {
    use std::fmt::Write;
    let mut out = String::new();

    if let Some(ref default) = cfg.default_profile {
        let _ = writeln!(out, "default_profile = \"{default}\"");
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "[defaults]");
    let _ = writeln!(out, "output = \"{}\"", cfg.defaults.output);
    let _ = writeln!(out, "color = \"{}\"", cfg.defaults.color);
    let _ = writeln!(out, "timeout = {}", cfg.defaults.timeout);

    let mut names: Vec<_> = cfg.profiles.keys().collect();
    names.sort();
    for name in names {
        let p = &cfg.profiles[name];
        let _ = writeln!(out);
        let _ = writeln!(out, "[profiles.{name}]");
        let _ = writeln!(out, "host = \"{}\"", p.host);
        let _ = writeln!(out, "status = \":{}{}\"", p.status_port, p.status_path);
        if let Some(ref h) = p.socket_host {
            let _ = writeln!(out, "socket_host = \"{h}\"");
        }
        let _ = writeln!(out, "socket = \":{}{}\"", p.socket_port, p.socket_path);
        if let Some(ref url) = p.cloud_url {
            let _ = writeln!(out, "cloud_url = \"{url}\"");
        }
        if let Some(ref id) = p.device_id {
            let _ = writeln!(out, "device_id = \"{id}\"");
        }
        if p.token.is_some() {
            let _ = writeln!(out, "token = \"****\"");
        }
        if let Some(ref env) = p.token_env {
            let _ = writeln!(out, "token_env = \"{env}\"");
        }
        if let Some(ms) = p.poll_interval_ms {
            let _ = writeln!(out, "poll_interval_ms = {ms}");
        }
        if let Some(n) = p.max_reconnect_attempts {
            let _ = writeln!(out, "max_reconnect_attempts = {n}");
        }
    }

    out
}

/// Map a dialoguer / interactive I/O failure into CliError.
fn prompt_err(e: impl std::fmt::Display) -> CliError {
    CliError::Validation {
        field: "interactive".into(),
        reason: format!("prompt failed: {e}"),
    }
}

fn parse_field<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, CliError> {
    value.parse().map_err(|_| CliError::Validation {
        field: key.into(),
        reason: format!("cannot parse '{value}'"),
    })
}

/// `None` for an empty value, so `config set cloud_url ""` clears it.
fn optional(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_owned())
}

/// Apply one `config set` assignment to a profile.
fn set_field(profile: &mut Profile, key: &str, value: &str) -> Result<(), CliError> {
    match key {
        "host" => profile.host = value.to_owned(),
        "status_port" => profile.status_port = parse_field(key, value)?,
        "status_path" => profile.status_path = value.to_owned(),
        "socket_host" => profile.socket_host = optional(value),
        "socket_port" => profile.socket_port = parse_field(key, value)?,
        "socket_path" => profile.socket_path = value.to_owned(),
        "poll_interval_ms" => profile.poll_interval_ms = Some(parse_field(key, value)?),
        "connect_timeout_ms" => profile.connect_timeout_ms = Some(parse_field(key, value)?),
        "reconnect_interval_ms" => profile.reconnect_interval_ms = Some(parse_field(key, value)?),
        "max_reconnect_attempts" => {
            profile.max_reconnect_attempts = Some(parse_field(key, value)?);
        }
        "poll_failure_threshold" => {
            profile.poll_failure_threshold = Some(parse_field(key, value)?);
        }
        "cloud_url" => profile.cloud_url = optional(value),
        "device_id" => profile.device_id = optional(value),
        "token" => profile.token = optional(value),
        "token_env" => profile.token_env = optional(value),
        "insecure" => profile.insecure = Some(parse_field(key, value)?),
        other => {
            return Err(CliError::Validation {
                field: "key".into(),
                reason: format!("unknown profile field '{other}'"),
            });
        }
    }
    Ok(())
}

/// Offer to store the relay token in the system keyring, or return it for
/// plaintext config.
fn prompt_token_storage(token: &str, profile_name: &str) -> Result<Option<String>, CliError> {
    let choices = &[
        "Store in system keyring (recommended)",
        "Save to config file (plaintext)",
    ];
    let selection = Select::new()
        .with_prompt("Where to store the relay token?")
        .items(choices)
        .default(0)
        .interact()
        .map_err(prompt_err)?;

    if selection == 0 {
        config::store_cloud_token(profile_name, token)?;
        eprintln!("   ✓ token stored in system keyring");
        Ok(None)
    } else {
        Ok(Some(token.to_owned()))
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        // ── Init: interactive wizard ────────────────────────────────
        ConfigCommand::Init => {
            let config_path = config::config_path();
            eprintln!("scarelink configuration wizard");
            eprintln!("   Config path: {}\n", config_path.display());

            let profile_name: String = Input::new()
                .with_prompt("Profile name")
                .default("default".into())
                .interact_text()
                .map_err(prompt_err)?;

            let host: String = Input::new()
                .with_prompt("Device host")
                .default(Profile::default().host)
                .interact_text()
                .map_err(prompt_err)?;

            let cloud_url: String = Input::new()
                .with_prompt("Cloud relay URL (empty to skip)")
                .allow_empty(true)
                .interact_text()
                .map_err(prompt_err)?;

            let mut profile = Profile {
                host,
                ..Profile::default()
            };

            if !cloud_url.is_empty() {
                let device_id: String = Input::new()
                    .with_prompt("Device id on the relay")
                    .interact_text()
                    .map_err(prompt_err)?;
                let token =
                    rpassword::prompt_password("Relay token (empty for none): ").map_err(prompt_err)?;

                profile.cloud_url = Some(cloud_url);
                profile.device_id = Some(device_id);
                if !token.is_empty() {
                    profile.token = prompt_token_storage(&token, &profile_name)?;
                }
            }

            let mut cfg = config::load_config_or_default();
            if cfg.profiles.is_empty() {
                cfg.default_profile = Some(profile_name.clone());
            }
            cfg.profiles.insert(profile_name.clone(), profile);
            config::save_config(&cfg)?;

            eprintln!("\n   ✓ profile '{profile_name}' saved");
            eprintln!("   Try: scarelink status");
            Ok(())
        }

        ConfigCommand::Show => {
            let cfg = config::load_config_or_default();
            let out = output::render_single(&global.output, &RedactedConfig::from(&cfg), |_| {
                format_config_redacted(&cfg)
            });
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ConfigCommand::Path => {
            println!("{}", config::config_path().display());
            Ok(())
        }

        ConfigCommand::Set { key, value } => {
            let mut cfg = config::load_config_or_default();
            let name = config::active_profile_name(global, &cfg);
            let mut profile = cfg.profile(&name)?;
            set_field(&mut profile, &key, &value)?;
            cfg.profiles.insert(name.clone(), profile);
            config::save_config(&cfg)?;
            if !global.quiet {
                eprintln!("{name}.{key} updated");
            }
            Ok(())
        }

        ConfigCommand::SetToken => {
            let cfg = config::load_config_or_default();
            let name = config::active_profile_name(global, &cfg);
            let token = rpassword::prompt_password("Relay token: ").map_err(prompt_err)?;
            if token.is_empty() {
                return Err(CliError::Validation {
                    field: "token".into(),
                    reason: "token cannot be empty".into(),
                });
            }
            config::store_cloud_token(&name, &token)?;
            if !global.quiet {
                eprintln!("token for '{name}' stored in system keyring");
            }
            Ok(())
        }

        ConfigCommand::Profiles => {
            let cfg = config::load_config_or_default();
            let default = cfg.profile_name(None).to_owned();
            let mut names: Vec<_> = cfg.profiles.keys().cloned().collect();
            names.sort();
            for name in names {
                let marker = if name == default { "*" } else { " " };
                println!("{marker} {name}");
            }
            Ok(())
        }

        ConfigCommand::Use { name } => {
            let mut cfg = config::load_config_or_default();
            if !cfg.profiles.contains_key(&name) {
                return Err(scarelink_config::ConfigError::UnknownProfile { name }.into());
            }
            cfg.default_profile = Some(name.clone());
            config::save_config(&cfg)?;
            if !global.quiet {
                eprintln!("default profile is now '{name}'");
            }
            Ok(())
        }
    }
}

// ── Structured output ───────────────────────────────────────────────

/// The config with secrets masked, for json/yaml output.
#[derive(serde::Serialize)]
struct RedactedConfig {
    default_profile: Option<String>,
    profiles: std::collections::BTreeMap<String, Profile>,
}

impl From<&Config> for RedactedConfig {
    fn from(cfg: &Config) -> Self {
        let profiles = cfg
            .profiles
            .iter()
            .map(|(name, p)| {
                let mut p = p.clone();
                if p.token.is_some() {
                    p.token = Some("****".into());
                }
                (name.clone(), p)
            })
            .collect();
        Self {
            default_profile: cfg.default_profile.clone(),
            profiles,
        }
    }
}
