use anyhow::Result;

use blazor_host::{
    config::Config,
    helper::{
        bootstrap::{launch, resolve_lease},
        election::InstanceGuard,
        listener_table::SystemListenerTable,
        shell::{ChromiumShell, LoggingShellEvents},
        web_host::CommandWebHost,
    },
};

fn main() -> Result<()> {
    env_logger::builder()
        .target(env_logger::Target::Stdout)
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let config = Config::load()?;

    // Held until the end of main, after the shell has returned.
    let instance = InstanceGuard::acquire(&config.instance_name)?;

    let web_host = CommandWebHost::from_config(&config.server);
    let resolution = resolve_lease(instance.role(), &config, &SystemListenerTable, &web_host)?;

    let mut shell = ChromiumShell::from_config(&config.shell, &config.instance_name);
    launch(&resolution, &config, &mut shell, &mut LoggingShellEvents)?;

    log::info!("shutting down ({})", instance.role());
    Ok(())
}
