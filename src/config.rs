//! Command-line surface and context configuration.
//!
//! The options mirror the tool's probing model: an interface, an optional
//! channel allow-list, a BSSID blacklist, and the three probe budgets
//! (probes per channel dwell, beacons per probe, seconds per probe). At
//! least one of the two probe limits must stay positive or the probe loop
//! would never terminate a window.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};

use crate::engine::DeauthContext;
use crate::frame;
use crate::inventory;

/// Selectable deauthentication methods. Only the untargeted `wld` sweep is
/// implemented; the rest are recognized and refused, matching their stub
/// status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DeauthMethod {
    /// Probe every allowed channel and deauthenticate whatever answers.
    Wld,
    AssistedAp,
    StaticFile,
    Args,
    Hardcode,
}

#[derive(Debug, Parser)]
#[command(
    name = "airshear",
    version,
    about = "802.11 broadcast deauthentication tester for monitor-mode interfaces",
    after_help = "Probing must stay limited: --max-probe-addrs and --max-probe-time \
                  cannot both be 0."
)]
pub struct CliArgs {
    /// Send N deauthentication frames for every targeted access point
    #[arg(
        short = 'n',
        long = "n-deauth",
        value_name = "N",
        default_value_t = 64,
        value_parser = clap::value_parser!(u16).range(1..=256)
    )]
    pub n_deauth: u16,

    /// Network interface to probe and inject on (monitor mode)
    #[arg(short = 'i', long = "interface", value_name = "NAME")]
    pub interface: String,

    /// Only probe and inject on this channel (repeatable; default: all 14)
    #[arg(
        short = 'c',
        long = "channels",
        value_name = "CHANNEL",
        value_parser = clap::value_parser!(u8).range(1..=14)
    )]
    pub channels: Vec<u8>,

    /// Never deauthenticate this BSSID (repeatable)
    #[arg(
        short = 'b',
        long = "blacklist",
        value_name = "MAC",
        value_parser = frame::parse_mac
    )]
    pub blacklist: Vec<[u8; 6]>,

    /// Cycle the channel after every N probes
    #[arg(
        short = 'p',
        long = "probe-rate",
        value_name = "N",
        default_value_t = 3,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub probe_rate: u32,

    /// Record at most N beacons per probe (0 = uncapped)
    #[arg(long = "max-probe-addrs", value_name = "N", default_value_t = 64)]
    pub max_probe_addrs: u32,

    /// Probe for at most T seconds per window (0 = uncapped)
    #[arg(long = "max-probe-time", value_name = "T", default_value_t = 20)]
    pub max_probe_time: u32,

    /// Deauthentication method
    #[arg(long = "method", value_enum, default_value = "wld")]
    pub method: DeauthMethod,

    /// Pre-seed the inventories from a record file
    /// (MAC|SSID|location|channel|beacons per line, `_` for unknown)
    #[arg(long = "seed-file", value_name = "PATH")]
    pub seed_file: Option<PathBuf>,
}

/// Apply parsed arguments onto a fresh context.
///
/// Post-conditions: interface set; at least one allowed channel, each with
/// an empty (or seeded) inventory and none elsewhere; at least one probe
/// limit positive.
pub fn apply(ctx: &mut DeauthContext, args: &CliArgs) -> Result<()> {
    if args.method != DeauthMethod::Wld {
        bail!("deauth method {:?} is not implemented; only wld is", args.method);
    }
    if args.max_probe_addrs == 0 && args.max_probe_time == 0 {
        bail!("probing must be limited by address count or time (see --max-probe-addrs / --max-probe-time)");
    }

    ctx.interface = Some(args.interface.clone());
    ctx.n_deauth_rounds = args.n_deauth;
    ctx.probes_per_channel = args.probe_rate;
    ctx.probe_addr_limit = args.max_probe_addrs;
    ctx.probe_time_limit_secs = args.max_probe_time;
    ctx.blacklist = args.blacklist.clone();

    if args.channels.is_empty() {
        // No allow-list given: every 2.4 GHz channel is fair game.
        for channel in 1..=14 {
            ctx.allow_channel(channel)?;
        }
    } else {
        for &channel in &args.channels {
            if !ctx.allow_channel(channel)? {
                log::warn!("channel {channel} was already allowed");
            }
        }
    }

    if let Some(path) = &args.seed_file {
        seed_inventories(ctx, path)?;
    }

    Ok(())
}

/// Merge seed records into the per-channel inventories.
///
/// Records on disallowed channels are dropped; a BSSID already present on
/// its channel keeps the earlier record.
fn seed_inventories(ctx: &mut DeauthContext, path: &std::path::Path) -> Result<()> {
    let records = inventory::load_seed_records(path)
        .with_context(|| format!("load seed records from {}", path.display()))?;

    let mut kept = 0usize;
    for record in records {
        let idx = record.channel as usize - 1;
        match ctx.inventories[idx].as_mut() {
            Some(inventory) => {
                if inventory.contains_bssid(&record.bssid) {
                    log::warn!(
                        "seed record for {} repeats on channel {}, keeping the first",
                        frame::format_mac(&record.bssid),
                        record.channel
                    );
                    continue;
                }
                inventory.append(record);
                kept += 1;
            }
            None => {
                log::warn!(
                    "dropping seed record for {}: channel {} not allowed",
                    frame::format_mac(&record.bssid),
                    record.channel
                );
            }
        }
    }

    log::info!("seeded {kept} access point record(s) from {}", path.display());
    Ok(())
}
