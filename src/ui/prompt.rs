//! Interactive prompts for missing selections and secrets

use dialoguer::{Confirm, Input, MultiSelect, Password, Select};
use deploy_transport::SshTarget;

use crate::config::{Config, ServerDescriptor};
use crate::pipeline::PasswordPrompt;
use crate::schedule::PRESETS;
use crate::selection::SelectionRequest;

/// Asks for passwords on the terminal
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalPrompt;

impl PasswordPrompt for TerminalPrompt {
    fn password(&self, target: &SshTarget) -> Option<String> {
        Password::new()
            .with_prompt(format!("Password for {}", target))
            .allow_empty_password(true)
            .interact()
            .ok()
    }
}

fn choose_server(config: &Config) -> dialoguer::Result<String> {
    let items: Vec<String> = config
        .servers
        .iter()
        .map(|s| format!("{} ({}@{}:{})", s.name, s.username, s.host, s.port))
        .collect();
    let index = Select::new()
        .with_prompt("Select a server")
        .items(&items)
        .default(0)
        .interact()?;
    Ok(config.servers[index].name.clone())
}

fn choose_many(prompt: &str, options: &[&str]) -> dialoguer::Result<Vec<String>> {
    if options.is_empty() {
        return Ok(Vec::new());
    }
    let chosen = MultiSelect::new().with_prompt(prompt).items(options).interact()?;
    Ok(chosen.into_iter().map(|i| options[i].to_string()).collect())
}

fn choose_app_types(server: &ServerDescriptor) -> dialoguer::Result<Vec<String>> {
    choose_many("App types to deploy (space to toggle)", &server.app_types())
}

fn choose_groups(server: &ServerDescriptor) -> dialoguer::Result<Vec<String>> {
    choose_many("Command groups to run (space to toggle)", &server.group_names())
}

/// Fill in whatever the request leaves open
///
/// The server is asked for only when there are several; app types and
/// command groups only when neither was given.
pub fn complete_request(config: &Config, mut request: SelectionRequest) -> dialoguer::Result<SelectionRequest> {
    if request.server.is_none() && config.servers.len() > 1 {
        request.server = Some(choose_server(config)?);
    }

    let server = match &request.server {
        Some(name) => config.servers.iter().find(|s| &s.name == name),
        None => config.servers.first(),
    };
    let Some(server) = server else {
        return Ok(request);
    };

    if request.app_types.is_empty() && request.command_groups.is_empty() {
        request.app_types = choose_app_types(server)?;
        request.command_groups = choose_groups(server)?;
    }
    Ok(request)
}

/// Pick a start delay from the presets or type one in
pub fn choose_delay() -> dialoguer::Result<String> {
    let mut items: Vec<String> = PRESETS
        .iter()
        .map(|(value, label)| format!("{:<4} {}", value, label))
        .collect();
    items.push("custom (minutes, 90m, 3h, or a time like 22:30)".to_string());

    let index = Select::new()
        .with_prompt("When should the deployment start?")
        .items(&items)
        .default(0)
        .interact()?;

    match PRESETS.get(index) {
        Some((value, _)) => Ok(value.to_string()),
        None => Input::<String>::new().with_prompt("Start delay or time").interact_text(),
    }
}

pub fn confirm(prompt: &str) -> dialoguer::Result<bool> {
    Confirm::new().with_prompt(prompt).default(true).interact()
}
