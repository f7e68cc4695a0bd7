//! airshear binary: configure, arm the interface, and run the
//! probe/deauth loop until a fatal error.

use anyhow::Context;
use clap::Parser;

use airshear::channel::Nl80211ChannelSetter;
use airshear::config::{self, CliArgs};
use airshear::engine::DeauthContext;
use airshear::link::{MonitorSocket, ETH_P_ALL};

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = CliArgs::parse();

    let mut ctx = DeauthContext::new();
    config::apply(&mut ctx, &args)?;

    let link = MonitorSocket::open(&args.interface, ETH_P_ALL)
        .with_context(|| format!("open packet socket on {}", args.interface))?;
    let tuner = Nl80211ChannelSetter::new(&args.interface);

    ctx.init(Box::new(link), Box::new(tuner))?;

    // Only a fatal socket or inventory error breaks the loop; release the
    // handles before reporting it.
    let result = ctx.run();
    ctx.exit();
    result
}
