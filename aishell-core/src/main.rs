use std::fs::File;

use aishell_core::config::{self, SessionConfig, LOG_ENV_VAR};
use aishell_core::Session;
use anyhow::{Context, Result};

fn init_logging(config: &SessionConfig) -> Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().filter_or(LOG_ENV_VAR, "warn"));
    if let Some(path) = &config.log_file {
        let file = File::options()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open log file {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.try_init().context("failed to initialize logger")?;
    Ok(())
}

fn main() -> Result<()> {
    let config = SessionConfig::load().context("failed to load config")?;
    init_logging(&config)?;

    if config::inside_session() {
        println!(
            "{} is set. You appear to be already in an AIShell session. \
             Nested sessions are not supported. Exit with ctrl-d or exit",
            config::SESSION_ENV_VAR
        );
        return Ok(());
    }

    println!("✨✨✨ Starting AIShell with {} ✨✨✨", config.shell);
    let result = Session::new(config).run();
    println!("💫 AIShell session ended 💫");

    let reason = result.context("AIShell session failed")?;
    log::debug!("exit reason: {:?}", reason);
    Ok(())
}
