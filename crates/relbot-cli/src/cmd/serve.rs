use relbot_core::Config;

pub fn run(config: Config) -> anyhow::Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(relbot_server::serve(config))
}
