//! `URef`: the unit of transport between pipes — an optional [`UBuf`]
//! plus an owned [`UDict`] of attributes (spec.md §3, "URef").
//!
//! A flow-definition uref carries no `ubuf`: its dict alone describes
//! the stream (`def` string, numeric id, language tags, headers, the
//! `global` flag, latency, and the pts/dts/cr clock attributes). Pipes
//! pass these through `set_flow_def`/`get_flow_def` control commands
//! rather than through ordinary data flow.

use crate::buffer::UBuf;
use crate::clock::UClockTs;
use crate::dict::{UDict, UDictValue};

/// Well-known flow-definition attribute names, kept as constants rather
/// than stringly-typed call sites scattered across pipes.
pub mod flow_def {
    pub const DEF: &str = "f.def";
    pub const ID: &str = "f.id";
    pub const LANGUAGE: &str = "f.lang";
    pub const GLOBAL: &str = "f.global";
    pub const LATENCY: &str = "f.latency";
    pub const PTS_ORIG: &str = "k.pts.orig";
    pub const DTS_ORIG: &str = "k.dts.orig";
    pub const CR_SYS: &str = "k.cr.sys";
    pub const RAP_SYS: &str = "k.rap.sys";
    pub const HEADERS: &str = "f.headers";
}

/// The transported unit: `{ ubuf?, udict }`. `uchain` list membership
/// (spec.md's third field) is left to whatever [`crate::chain::UChain`]
/// a pipe chooses to thread urefs through — it is not baked into the
/// struct itself, since not every uref needs to be a chain member at
/// once.
pub struct URef {
    ubuf: Option<UBuf>,
    dict: UDict,
}

impl URef {
    /// A data uref carrying a payload.
    pub fn new(ubuf: UBuf) -> Self {
        Self { ubuf: Some(ubuf), dict: UDict::new() }
    }

    /// A flow-definition uref: dict only, no payload.
    pub fn flow_def(def: impl Into<String>) -> Self {
        let mut dict = UDict::new();
        dict.set(flow_def::DEF, UDictValue::String(def.into()));
        Self { ubuf: None, dict }
    }

    pub fn ubuf(&self) -> Option<&UBuf> {
        self.ubuf.as_ref()
    }

    pub fn ubuf_mut(&mut self) -> Option<&mut UBuf> {
        self.ubuf.as_mut()
    }

    /// Detach the payload, turning this into a dict-only uref. Mirrors
    /// `uref_detach_ubuf`.
    pub fn take_ubuf(&mut self) -> Option<UBuf> {
        self.ubuf.take()
    }

    pub fn attach_ubuf(&mut self, ubuf: UBuf) {
        self.ubuf = Some(ubuf);
    }

    pub fn dict(&self) -> &UDict {
        &self.dict
    }

    pub fn dict_mut(&mut self) -> &mut UDict {
        &mut self.dict
    }

    pub fn is_flow_def(&self) -> bool {
        self.ubuf.is_none()
    }

    pub fn flow_def_name(&self) -> Option<&str> {
        match self.dict.get(flow_def::DEF) {
            Some(UDictValue::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// String-prefix check on the `def` attribute (spec.md §4.4:
    /// "`match_def(prefix)` (string prefix check on the `def`
    /// attribute)"). A flow-def uref with no `def` attribute never
    /// matches.
    pub fn match_def(&self, prefix: &str) -> bool {
        self.flow_def_name().is_some_and(|def| def.starts_with(prefix))
    }

    /// Attach opaque codec headers (e.g. SPS/PPS, stream info) to a
    /// flow-def uref.
    pub fn set_headers(&mut self, headers: Vec<u8>) {
        self.dict.set(flow_def::HEADERS, UDictValue::Bytes(headers));
    }

    pub fn headers(&self) -> Option<&[u8]> {
        match self.dict.get(flow_def::HEADERS) {
            Some(UDictValue::Bytes(b)) => Some(b.as_slice()),
            _ => None,
        }
    }

    /// The flow's original presentation timestamp, if stamped.
    pub fn pts_orig(&self) -> Option<UClockTs> {
        match self.dict.get(flow_def::PTS_ORIG) {
            Some(UDictValue::UInt(ticks)) => Some(UClockTs::from_ticks(*ticks)),
            _ => None,
        }
    }

    pub fn set_pts_orig(&mut self, ts: UClockTs) {
        self.dict.set(flow_def::PTS_ORIG, UDictValue::UInt(ts.as_ticks()));
    }

    /// The flow's original decoding timestamp, if stamped.
    pub fn dts_orig(&self) -> Option<UClockTs> {
        match self.dict.get(flow_def::DTS_ORIG) {
            Some(UDictValue::UInt(ticks)) => Some(UClockTs::from_ticks(*ticks)),
            _ => None,
        }
    }

    pub fn set_dts_orig(&mut self, ts: UClockTs) {
        self.dict.set(flow_def::DTS_ORIG, UDictValue::UInt(ts.as_ticks()));
    }

    /// The system-clock date a dejitter probe has rewritten onto this
    /// uref, if any (spec.md §4.8 "On CLOCK_TS: ... Also stamp the uref
    /// with the current drift rational").
    pub fn cr_sys(&self) -> Option<UClockTs> {
        match self.dict.get(flow_def::CR_SYS) {
            Some(UDictValue::UInt(ticks)) => Some(UClockTs::from_ticks(*ticks)),
            _ => None,
        }
    }

    pub fn set_cr_sys(&mut self, ts: UClockTs) {
        self.dict.set(flow_def::CR_SYS, UDictValue::UInt(ts.as_ticks()));
    }

    pub fn id(&self) -> Option<u64> {
        match self.dict.get(flow_def::ID) {
            Some(UDictValue::UInt(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn set_id(&mut self, id: u64) {
        self.dict.set(flow_def::ID, UDictValue::UInt(id));
    }

    pub fn language(&self) -> Option<&str> {
        match self.dict.get(flow_def::LANGUAGE) {
            Some(UDictValue::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn set_language(&mut self, lang: impl Into<String>) {
        self.dict.set(flow_def::LANGUAGE, UDictValue::String(lang.into()));
    }

    /// Duplicate: the dict is cloned (owned copy), and the ubuf — if
    /// any — is `dup`ed, sharing the underlying buffer storage but
    /// getting its own independent window (spec.md invariant 4).
    pub fn dup(&self) -> Self {
        Self { ubuf: self.ubuf.as_ref().map(UBuf::dup), dict: self.dict.clone() }
    }
}
