//! Operating-channel control through nl80211.
//!
//! Retuning a monitor-mode interface is one generic-netlink request:
//! `NL80211_CMD_SET_WIPHY` with the interface index, the 2.4 GHz center
//! frequency, and a no-HT channel type. The `nl80211` family id is
//! resolved once through `nlctrl` and the socket is kept for the life of
//! the setter. Callers treat retune failures as non-fatal: the probe loop
//! keeps running on the old channel.

use std::ffi::CString;

use anyhow::{bail, Context, Result};
use netlink_packet_core::{
    NetlinkHeader, NetlinkMessage, NetlinkPayload, NLM_F_ACK, NLM_F_REQUEST,
};
use netlink_packet_generic::ctrl::nlas::GenlCtrlAttrs;
use netlink_packet_generic::ctrl::{GenlCtrl, GenlCtrlCmd};
use netlink_packet_generic::{GenlFamily, GenlHeader, GenlMessage};
use netlink_packet_utils::nla::Nla;
use netlink_packet_utils::{DecodeError, Emitable, ParseableParametrized};
use netlink_sys::{protocols::NETLINK_GENERIC, Socket, SocketAddr};

const NL80211_CMD_SET_WIPHY: u8 = 2;
const NL80211_ATTR_IFINDEX: u16 = 3;
const NL80211_ATTR_WIPHY_FREQ: u16 = 38;
const NL80211_ATTR_WIPHY_CHANNEL_TYPE: u16 = 39;
const NL80211_CHAN_NO_HT: u32 = 0;

/// Something that can retune the interface to a 2.4 GHz channel.
pub trait ChannelTuner {
    fn set_channel(&mut self, channel: u8) -> Result<()>;
}

/// Map a 2.4 GHz channel number to its center frequency in MHz.
///
/// Channels 1..=13 sit at `2407 + 5·n`; channel 14 is the Japan-only
/// outlier at 2484.
pub fn channel_to_freq(channel: u8) -> Result<u32> {
    if !(1..=14).contains(&channel) {
        bail!("channel {channel} outside 1..=14");
    }
    if channel < 14 {
        Ok(2407 + 5 * u32::from(channel))
    } else {
        Ok(2484)
    }
}

/// Retunes a named interface through an owned generic-netlink handle.
///
/// The handle (socket + resolved family id) is opened on first use and
/// reused for every later retune.
pub struct Nl80211ChannelSetter {
    if_name: String,
    conn: Option<GenlConnection>,
    seq: u32,
}

struct GenlConnection {
    socket: Socket,
    family_id: u16,
}

impl Nl80211ChannelSetter {
    pub fn new(if_name: &str) -> Self {
        Self {
            if_name: if_name.to_string(),
            conn: None,
            seq: 0,
        }
    }

    fn ifindex(&self) -> Result<u32> {
        let name = CString::new(self.if_name.as_str()).context("interface name")?;
        let idx = unsafe { libc::if_nametoindex(name.as_ptr()) };
        if idx == 0 {
            bail!("interface {} not found", self.if_name);
        }
        Ok(idx)
    }

    fn connect(&mut self) -> Result<&mut GenlConnection> {
        if self.conn.is_none() {
            let mut socket = Socket::new(NETLINK_GENERIC).context("open generic netlink socket")?;
            socket.bind_auto().context("bind generic netlink socket")?;
            socket
                .connect(&SocketAddr::new(0, 0))
                .context("connect generic netlink socket")?;
            let family_id = resolve_nl80211(&socket, &mut self.seq)?;
            self.conn = Some(GenlConnection { socket, family_id });
        }
        Ok(self.conn.as_mut().expect("connection just established"))
    }
}

impl ChannelTuner for Nl80211ChannelSetter {
    fn set_channel(&mut self, channel: u8) -> Result<()> {
        let freq = channel_to_freq(channel)?;
        let ifindex = self.ifindex()?;

        self.connect()?;
        self.seq += 1;
        let seq = self.seq;
        let conn = self.conn.as_mut().expect("connected above");

        let mut genl = GenlMessage::from_payload(SetWiphyRequest {
            nlas: vec![
                SetWiphyAttr::Ifindex(ifindex),
                SetWiphyAttr::Freq(freq),
                SetWiphyAttr::ChannelType(NL80211_CHAN_NO_HT),
            ],
        });
        genl.set_resolved_family_id(conn.family_id);

        let mut header = NetlinkHeader::default();
        header.flags = NLM_F_REQUEST | NLM_F_ACK;
        header.sequence_number = seq;
        let mut msg = NetlinkMessage::new(header, NetlinkPayload::InnerMessage(genl));
        msg.finalize();

        let mut buf = vec![0u8; msg.buffer_len()];
        msg.serialize(&mut buf);
        conn.socket.send(&buf, 0).context("send SET_WIPHY")?;

        let mut rx = vec![0u8; 4096];
        let read = conn
            .socket
            .recv(&mut &mut rx[..], 0)
            .context("read SET_WIPHY ack")?;
        let reply = NetlinkMessage::<GenlMessage<SetWiphyRequest>>::deserialize(&rx[..read])
            .map_err(|e| anyhow::anyhow!("decode SET_WIPHY reply: {e}"))?;
        if let NetlinkPayload::Error(err) = reply.payload {
            if let Some(code) = err.code {
                bail!("SET_WIPHY refused for channel {channel}: errno {code}");
            }
        }

        Ok(())
    }
}

/// Ask `nlctrl` for the nl80211 family id.
fn resolve_nl80211(socket: &Socket, seq: &mut u32) -> Result<u16> {
    let genl = GenlMessage::from_payload(GenlCtrl {
        cmd: GenlCtrlCmd::GetFamily,
        nlas: vec![GenlCtrlAttrs::FamilyName("nl80211".to_string())],
    });

    *seq += 1;
    let mut header = NetlinkHeader::default();
    header.flags = NLM_F_REQUEST;
    header.sequence_number = *seq;
    let mut msg = NetlinkMessage::new(header, NetlinkPayload::InnerMessage(genl));
    msg.finalize();

    let mut buf = vec![0u8; msg.buffer_len()];
    msg.serialize(&mut buf);
    socket.send(&buf, 0).context("send GETFAMILY")?;

    let mut rx = vec![0u8; 8192];
    let read = socket.recv(&mut &mut rx[..], 0).context("read GETFAMILY")?;

    let mut offset = 0;
    while offset < read {
        let reply = NetlinkMessage::<GenlMessage<GenlCtrl>>::deserialize(&rx[offset..read])
            .map_err(|e| anyhow::anyhow!("decode GETFAMILY reply: {e}"))?;
        match reply.payload {
            NetlinkPayload::InnerMessage(genl) => {
                for nla in genl.payload.nlas {
                    if let GenlCtrlAttrs::FamilyId(id) = nla {
                        return Ok(id);
                    }
                }
            }
            NetlinkPayload::Error(err) => {
                bail!("nl80211 family lookup failed: {err:?}");
            }
            _ => {}
        }
        let len = reply.header.length as usize;
        if len == 0 {
            break;
        }
        offset += len;
    }

    bail!("nl80211 family id missing from GETFAMILY reply")
}

/// `NL80211_CMD_SET_WIPHY` request payload: a flat list of u32 attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SetWiphyRequest {
    nlas: Vec<SetWiphyAttr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SetWiphyAttr {
    Ifindex(u32),
    Freq(u32),
    ChannelType(u32),
}

impl Nla for SetWiphyAttr {
    fn value_len(&self) -> usize {
        4
    }

    fn kind(&self) -> u16 {
        match self {
            Self::Ifindex(_) => NL80211_ATTR_IFINDEX,
            Self::Freq(_) => NL80211_ATTR_WIPHY_FREQ,
            Self::ChannelType(_) => NL80211_ATTR_WIPHY_CHANNEL_TYPE,
        }
    }

    fn emit_value(&self, buffer: &mut [u8]) {
        let value = match self {
            Self::Ifindex(v) | Self::Freq(v) | Self::ChannelType(v) => *v,
        };
        buffer[..4].copy_from_slice(&value.to_ne_bytes());
    }
}

impl GenlFamily for SetWiphyRequest {
    fn family_name() -> &'static str {
        "nl80211"
    }

    fn command(&self) -> u8 {
        NL80211_CMD_SET_WIPHY
    }

    fn version(&self) -> u8 {
        0
    }
}

impl Emitable for SetWiphyRequest {
    fn buffer_len(&self) -> usize {
        self.nlas.as_slice().buffer_len()
    }

    fn emit(&self, buffer: &mut [u8]) {
        self.nlas.as_slice().emit(buffer)
    }
}

// SET_WIPHY is ack-only; the kernel never sends an inner nl80211 message
// back, so decoding one yields an empty attribute list.
impl ParseableParametrized<[u8], GenlHeader> for SetWiphyRequest {
    fn parse_with_param(_buf: &[u8], _header: GenlHeader) -> Result<Self, DecodeError> {
        Ok(Self { nlas: Vec::new() })
    }
}
