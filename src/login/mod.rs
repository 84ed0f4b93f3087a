use std::io::{IsTerminal, Read};

use anyhow::Result;
use clap::{Arg, Command};
use console::Emoji;
use yapp::PasswordReader;

use crate::config::CliConfig;

static LOCK: Emoji = Emoji("🔒 ", "");
static WAVE: Emoji = Emoji("👋 ", "");

pub fn command() -> Command {
    Command::new("login")
        .about("Store an API token for the remote provider")
        .arg(
            Arg::new("token")
                .long("token")
                .short('t')
                .value_name("TOKEN")
                .help("Token to store. NOTE: RECOMMEND TO LEAVE EMPTY AND USE PROMPT OR STDIN")
                .required(false),
        )
}

pub fn logout_command() -> Command {
    Command::new("logout").about("Forget the stored API token")
}

fn read_token() -> Result<String> {
    if std::io::stdin().is_terminal() {
        let mut yapp = yapp::Yapp::new().with_echo_symbol('*');
        return yapp
            .read_password_with_prompt("API token: ")
            .map_err(|e| anyhow::anyhow!("Failed to read token from terminal: {}", e));
    }
    let mut token = String::new();
    std::io::stdin()
        .read_to_string(&mut token)
        .map_err(|e| anyhow::anyhow!("Failed to read token from stdin: {}", e))?;
    Ok(token)
}

pub async fn handle(config: &mut CliConfig, args: &clap::ArgMatches) -> Result<()> {
    let token = match args.get_one::<String>("token") {
        Some(t) => t.clone(),
        None => read_token()?,
    };
    let token = token.trim().to_string();
    if token.is_empty() {
        return Err(anyhow::anyhow!("Token is empty"));
    }

    config.save_token(token)?;
    eprintln!(
        "{}Token stored. Use {} to deploy with it.",
        LOCK,
        console::style("TOPOCTL_PROVIDER=remote").bold()
    );
    Ok(())
}

pub async fn handle_logout(config: &mut CliConfig, _args: &clap::ArgMatches) -> Result<()> {
    if config.api_token().is_none() {
        eprintln!("No token stored.");
        return Ok(());
    }
    config.clear_token()?;
    eprintln!("{}Token removed from the keyring.", WAVE);
    Ok(())
}
