use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::db::{
    prepare, ConnectionRegistry, Position, ResponseFormat, ScriptExecutionOptions, SqlScript,
};
use crate::error::{Error, Result};
use crate::format::ScriptOutput;
use crate::utils::AppConfig;

pub const PASSWORD_ENV: &str = "SQL_WORKSHEET_PASSWORD";

/// Runs SQL worksheet scripts against saved Oracle connections.
#[derive(Parser, Debug)]
#[command(name = "sql_worksheet")]
#[command(version, about = "SQL worksheet script engine", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Execute a script and write the response to stdout
    Run {
        /// Script file
        file: PathBuf,

        /// Saved connection name
        #[arg(short = 'c', long = "connection")]
        connection: String,

        /// Response format: json, text or binary
        #[arg(long = "format", default_value = "json")]
        format: ResponseFormat,

        /// Rows per result page (json only)
        #[arg(long = "page-size")]
        page_size: Option<usize>,

        /// Substitution value, NAME=VALUE (repeatable)
        #[arg(short = 'D', value_name = "NAME=VALUE", value_parser = parse_substitution)]
        substitutions: Vec<(String, String)>,

        /// Password; falls back to SQL_WORKSHEET_PASSWORD
        #[arg(long = "password")]
        password: Option<String>,

        /// Cancel the script after this many seconds
        #[arg(long = "timeout", value_name = "SECONDS")]
        timeout: Option<u64>,
    },

    /// Print the statement at a position and what it needs before it can run
    Prepare {
        /// Script file
        file: PathBuf,

        /// Zero-based line of the cursor
        #[arg(long = "line", requires = "character")]
        line: Option<usize>,

        /// Zero-based character of the cursor
        #[arg(long = "character", requires = "line")]
        character: Option<usize>,
    },

    /// List saved connections
    Connections,
}

fn parse_substitution(value: &str) -> std::result::Result<(String, String), String> {
    let (name, value) = value
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got `{value}`"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err("substitution name is empty".to_string());
    }
    Ok((name.to_string(), value.to_string()))
}

pub struct App {
    config: AppConfig,
}

impl App {
    pub fn new() -> Self {
        let config = AppConfig::load();
        Self { config }
    }

    pub fn with_config(config: AppConfig) -> Self {
        Self { config }
    }

    pub async fn run(&self, cli: Cli) -> Result<()> {
        match cli.command {
            Command::Run {
                file,
                connection,
                format,
                page_size,
                substitutions,
                password,
                timeout,
            } => {
                let mut script = SqlScript::new(&read_script(&file)?);
                for (name, value) in &substitutions {
                    script = script.with_substitution(name, value);
                }
                let mut options = ScriptExecutionOptions::new(format);
                options.page_size = page_size;
                options.timeout = timeout.map(Duration::from_secs);
                let password = password.or_else(|| std::env::var(PASSWORD_ENV).ok());
                self.run_script(&connection, password, script, options).await
            }
            Command::Prepare {
                file,
                line,
                character,
            } => {
                let text = read_script(&file)?;
                let position = line.zip(character).map(|(line, character)| Position::new(line, character));
                let response = prepare(&text, position);
                println!("{}", serde_json::to_string_pretty(&response)?);
                Ok(())
            }
            Command::Connections => {
                for info in &self.config.connections {
                    println!("{}", info.display_string());
                }
                Ok(())
            }
        }
    }

    async fn run_script(
        &self,
        connection: &str,
        password: Option<String>,
        script: SqlScript,
        options: ScriptExecutionOptions,
    ) -> Result<()> {
        let mut info = self
            .config
            .get_connection_by_name(connection)
            .cloned()
            .ok_or_else(|| Error::UnknownConnection(connection.to_string()))?;
        if let Some(password) = password {
            info.password = password;
        }

        let registry = ConnectionRegistry::oracle(self.config.engine_settings());
        let id = registry.add(info.clone()).id().to_string();
        info.clear_password();

        let outcome = self.execute_and_print(&registry, &id, script, options).await;
        registry.close_all().await;
        outcome
    }

    async fn execute_and_print(
        &self,
        registry: &ConnectionRegistry,
        id: &str,
        script: SqlScript,
        options: ScriptExecutionOptions,
    ) -> Result<()> {
        let session = registry.connect(id).await?;
        let format = options.response_format;
        let mut stdout = tokio::io::stdout();

        let output = session.execute(&script, options).await?;
        let mut next = match &output {
            ScriptOutput::Json(response) => response.next_link().cloned(),
            _ => None,
        };
        output.write_to(&mut stdout).await?;

        // Later statement pages of a JSON run follow as separate documents.
        while let (ResponseFormat::Json, Some(link)) = (format, next.take()) {
            let page = session.fetch_script_page(&link).await?;
            next = page.next_link().cloned();
            ScriptOutput::Json(page).write_to(&mut stdout).await?;
        }
        Ok(())
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

fn read_script(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|err| {
        Error::Config(format!("cannot read script {}: {err}", path.display()))
    })
}
