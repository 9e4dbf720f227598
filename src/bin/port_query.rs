//! # Port Query Binary
//!
//! Prints where the running host serves its web UI, by reading the mailbox the
//! leader published. Does not wait and never takes part in the election.
//!
//! Exit status is zero when a port is published, non-zero otherwise.

use std::process::ExitCode;

use blazor_host::{
    config::Config,
    helper::{handoff::Mailbox, port_broker::PortLease},
};

fn main() -> anyhow::Result<ExitCode> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Warn)
        .parse_default_env()
        .init();

    let config = Config::load()?;
    let mailbox = Mailbox::new(&config.mailbox_dir(), &config.mailbox_name);

    let Some(record) = mailbox.read()? else {
        println!("no leader has published a port ({})", mailbox.path().display());
        return Ok(ExitCode::FAILURE);
    };

    if !record.leader_is_running() {
        println!(
            "leader (pid {}) has exited; its record is stale",
            record.leader_pid
        );
        return Ok(ExitCode::FAILURE);
    }

    match record.lease {
        PortLease::Bound(_) => {
            let endpoint = record
                .lease
                .endpoint(&config.scheme, config.host)
                .ok_or_else(|| anyhow::anyhow!("bound lease without endpoint"))?;
            println!("{} (leader pid {})", endpoint, record.leader_pid);
            Ok(ExitCode::SUCCESS)
        }
        PortLease::Unavailable => {
            println!(
                "leader (pid {}) found no free port in {:?}",
                record.leader_pid,
                config.port_range()
            );
            Ok(ExitCode::FAILURE)
        }
    }
}
