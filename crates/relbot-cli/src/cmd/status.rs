use anyhow::Context;
use relbot_core::{Command, Config};
use relbot_server::Services;

use crate::output::print_json;

pub fn run(config: Config, release: Option<&str>, json: bool) -> anyhow::Result<()> {
    let handler = Services::query_handler(&config)
        .with_context(|| format!("cannot query releases with store {}", config.db_path.display()))?;
    let command = match release {
        Some(fragment) => Command::Detail(fragment.to_lowercase()),
        None => Command::Overall,
    };

    let rt = tokio::runtime::Runtime::new()?;
    let message = rt.block_on(handler.handle(&command));

    if json {
        print_json(&message)
    } else {
        println!("{}", message.to_plain_text());
        Ok(())
    }
}
