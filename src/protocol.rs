/// ESP8266 AT command protocol: tokens, limits, command formatting and
/// response-line parsing.
///
/// Commands are ASCII lines terminated by `\r\n`. Every response ends with a
/// terminator line (`OK`, `ERROR`, `SEND OK`, ...). Uses `heapless` types for
/// no_std/no-alloc operation.
use core::fmt::{self, Write};
use core::net::Ipv4Addr;

use heapless::String;
use serde::Serialize;

use crate::error::CommandError;

// ── Limits ─────────────────────────────────────────────────────────────

/// Link ids the module multiplexes (`0..=4`)
pub const MAX_CHANNELS: usize = 5;

/// Link id reserved for the discovery beacon
pub const BEACON_CHANNEL: u8 = 4;

/// Maximum length of a formatted command line, `\r\n` included
pub const MAX_COMMAND_LEN: usize = 128;

/// Largest `+IPD` payload the driver buffers. Longer frames are dropped.
pub const MAX_PAYLOAD: usize = 512;

/// Largest payload a single `AT+CIPSEND` accepts
pub const MAX_SEND_LEN: usize = 2048;

/// Captured response payload kept by `send_command`
pub const RESPONSE_CAPACITY: usize = 256;

/// Longest response line handed to line sinks; the rest is cut off
pub const MAX_LINE_LEN: usize = 128;

/// Rolling tail used for terminator matching. Must exceed the longest token.
pub const TAIL_LEN: usize = 32;

// ── Timeouts (ms) ──────────────────────────────────────────────────────

pub const RESET_TIMEOUT_MS: u32 = 5_000;
pub const COMMAND_TIMEOUT_MS: u32 = 1_000;
pub const CONNECT_TIMEOUT_MS: u32 = 20_000;
pub const SCAN_TIMEOUT_MS: u32 = 10_000;
pub const SEND_TIMEOUT_MS: u32 = 5_000;

/// Quiet time after which a partially received `+IPD` frame is abandoned
pub const FRAME_GAP_MS: u64 = 100;

/// Period between beacon datagrams
pub const BEACON_INTERVAL_MS: u64 = 10_000;

/// Fixed UDP port peers listen on for beacon datagrams
pub const BEACON_PORT: u16 = 4210;

// ── Terminator tokens ──────────────────────────────────────────────────

pub const OK: &str = "OK";
pub const ERROR: &str = "ERROR";
pub const FAIL: &str = "FAIL";
pub const READY: &str = "ready";
pub const NO_CHANGE: &str = "no change";
pub const PROMPT: &str = ">";
pub const SEND_OK: &str = "SEND OK";
pub const SEND_FAIL: &str = "SEND FAIL";
/// Also covers the newer `ALREADY CONNECTED` spelling
pub const ALREADY_CONNECT: &str = "ALREADY CONNECT";
pub const LINK_INVALID: &str = "link is not";

/// Tokens that end one command transaction.
#[derive(Debug, Clone, Copy)]
pub struct Expect {
    pub success: &'static [&'static str],
    pub failure: &'static [&'static str],
}

pub const EXPECT_OK: Expect = Expect {
    success: &[OK],
    failure: &[ERROR, FAIL],
};

pub const EXPECT_READY: Expect = Expect {
    success: &[READY],
    failure: &[],
};

/// Old firmware answers `no change` when a setting is already in effect
pub const EXPECT_SETTING: Expect = Expect {
    success: &[OK, NO_CHANGE],
    failure: &[ERROR],
};

pub const EXPECT_OPEN: Expect = Expect {
    success: &[OK],
    failure: &[ERROR, ALREADY_CONNECT, LINK_INVALID],
};

pub const EXPECT_PROMPT: Expect = Expect {
    success: &[PROMPT],
    failure: &[ERROR, LINK_INVALID],
};

pub const EXPECT_SENT: Expect = Expect {
    success: &[SEND_OK],
    failure: &[SEND_FAIL, ERROR],
};

// ── Command formatting ─────────────────────────────────────────────────

pub type CommandLine = String<MAX_COMMAND_LEN>;

/// Format a command and append the `\r\n` line terminator.
pub fn command(args: fmt::Arguments<'_>) -> Result<CommandLine, CommandError> {
    let mut line = CommandLine::new();
    line.write_fmt(args).map_err(|_| CommandError::TooLong)?;
    line.push_str("\r\n").map_err(|_| CommandError::TooLong)?;
    Ok(line)
}

/// String argument escaped for a quoted AT parameter.
///
/// The firmware requires `"`, `,` and `\` inside quoted strings to be
/// preceded by a backslash.
pub struct Escaped<'a>(pub &'a str);

impl fmt::Display for Escaped<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in self.0.chars() {
            if matches!(c, '"' | ',' | '\\') {
                f.write_char('\\')?;
            }
            f.write_char(c)?;
        }
        Ok(())
    }
}

// ── Network list (AT+CWLAP) ────────────────────────────────────────────

/// Maximum SSID length (802.11) plus one
pub type NameString = String<33>;

/// "aa:bb:cc:dd:ee:ff"
pub type MacString = String<18>;

/// Access point security as reported in the `ecn` field
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Encryption {
    Open,
    Wep,
    WpaPsk,
    Wpa2Psk,
    WpaWpa2Psk,
    Wpa2Enterprise,
    #[default]
    Unknown,
}

impl Encryption {
    pub fn from_ecn(ecn: u8) -> Self {
        match ecn {
            0 => Encryption::Open,
            1 => Encryption::Wep,
            2 => Encryption::WpaPsk,
            3 => Encryption::Wpa2Psk,
            4 => Encryption::WpaWpa2Psk,
            5 => Encryption::Wpa2Enterprise,
            _ => Encryption::Unknown,
        }
    }
}

/// One record of a network scan
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AccessPoint {
    pub ecn: Encryption,
    pub ssid: NameString,
    pub rssi: i8,
    /// Empty on firmware that omits the BSSID
    pub mac: MacString,
    /// 0 on firmware that omits the channel
    pub channel: u8,
}

/// Parse `+CWLAP:(<ecn>,"<ssid>",<rssi>,"<mac>",<channel>,...)`.
///
/// Old firmware stops after `rssi`; those records keep an empty MAC and
/// channel 0. Fields past the channel are ignored.
pub fn parse_access_point(line: &str) -> Option<AccessPoint> {
    let body = line.strip_prefix("+CWLAP:(")?;
    let body = body.strip_suffix(')').unwrap_or(body);
    let mut fields = Fields { rest: body };

    let ecn = fields.number()?;
    let ssid = fields.quoted::<33>()?;
    let rssi = fields.number()?;
    let mac = fields.quoted::<18>().unwrap_or_default();
    let channel = fields.number().unwrap_or(0);

    Some(AccessPoint {
        ecn: Encryption::from_ecn(u8::try_from(ecn).ok()?),
        ssid,
        rssi: i8::try_from(rssi).ok()?,
        mac,
        channel: u8::try_from(channel).unwrap_or(0),
    })
}

/// Cursor over a comma separated AT parameter list
struct Fields<'a> {
    rest: &'a str,
}

impl<'a> Fields<'a> {
    fn number(&mut self) -> Option<i32> {
        let (field, rest) = match self.rest.find(',') {
            Some(i) => (&self.rest[..i], &self.rest[i + 1..]),
            None => (self.rest, ""),
        };
        let value = field.trim().parse().ok()?;
        self.rest = rest;
        Some(value)
    }

    /// A `"..."` field with backslash escapes removed. Overlong values are
    /// truncated to the buffer.
    fn quoted<const N: usize>(&mut self) -> Option<String<N>> {
        let inner = self.rest.strip_prefix('"')?;
        let mut out = String::new();
        let mut escaped = false;
        for (i, c) in inner.char_indices() {
            if escaped {
                let _ = out.push(c);
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                let after = &inner[i + 1..];
                self.rest = after.strip_prefix(',').unwrap_or(after);
                return Some(out);
            } else {
                let _ = out.push(c);
            }
        }
        None
    }
}

// ── Address status (AT+CIFSR) ──────────────────────────────────────────

/// Which interface an address line describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interface {
    Station,
    AccessPoint,
    /// Bare address line from firmware without `+CIFSR:` prefixes
    Unlabeled,
}

/// Parse one line of an `AT+CIFSR` reply.
///
/// Accepts `+CIFSR:STAIP,"a.b.c.d"`, `+CIFSR:APIP,"a.b.c.d"` and bare
/// `a.b.c.d` lines. MAC lines and anything else yield `None`.
pub fn parse_ip_line(line: &str) -> Option<(Interface, Ipv4Addr)> {
    let line = line.trim();
    let (iface, value) = if let Some(v) = line.strip_prefix("+CIFSR:STAIP,") {
        (Interface::Station, v)
    } else if let Some(v) = line.strip_prefix("+CIFSR:APIP,") {
        (Interface::AccessPoint, v)
    } else {
        (Interface::Unlabeled, line)
    };
    let value = value.trim_matches('"');
    value.parse().ok().map(|addr| (iface, addr))
}

/// Subnet broadcast address, assuming the /24 networks the module hands out
pub fn broadcast_address(ip: Ipv4Addr) -> Ipv4Addr {
    let [a, b, c, _] = ip.octets();
    Ipv4Addr::new(a, b, c, 255)
}

/// Dotted-quad text of an address
pub type IpString = String<15>;

pub fn format_ip(ip: Ipv4Addr) -> IpString {
    let mut s = IpString::new();
    let _ = write!(s, "{}", ip);
    s
}

// ── Discovery beacon ───────────────────────────────────────────────────

/// Datagram broadcast by an enabled beacon
#[derive(Debug, Serialize)]
pub struct Beacon<'a> {
    pub event: &'static str,
    pub ip: &'a str,
    pub port: u16,
    pub device: &'a str,
}

impl<'a> Beacon<'a> {
    pub fn new(ip: &'a str, port: u16, device: &'a str) -> Self {
        Self {
            event: "beacon",
            ip,
            port,
            device,
        }
    }
}

/// Maximum size of an encoded beacon datagram
pub const MAX_BEACON_LEN: usize = 128;

pub type BeaconBuffer = heapless::Vec<u8, MAX_BEACON_LEN>;

/// Serialize a value as compact JSON into `buf`.
/// Returns the number of bytes written, or None if it does not fit.
pub fn encode_json<T: Serialize>(value: &T, buf: &mut [u8]) -> Option<usize> {
    serde_json_core::to_slice(value, buf).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Command formatting ──────────────────────────────────────────

    #[test]
    fn command_appends_crlf() {
        let line = command(format_args!("AT+CWMODE={}", 1)).unwrap();
        assert_eq!(line.as_str(), "AT+CWMODE=1\r\n");
    }

    #[test]
    fn command_too_long_is_rejected() {
        let long = "x".repeat(MAX_COMMAND_LEN);
        assert_eq!(
            command(format_args!("AT+CWJAP=\"{}\"", long)),
            Err(CommandError::TooLong)
        );
    }

    #[test]
    fn escaped_quotes_commas_backslashes() {
        let line = command(format_args!(
            "AT+CWJAP=\"{}\",\"{}\"",
            Escaped(r#"my "net",x"#),
            Escaped(r"pa\ss")
        ))
        .unwrap();
        assert_eq!(line.as_str(), "AT+CWJAP=\"my \\\"net\\\"\\,x\",\"pa\\\\ss\"\r\n");
    }

    // ── CWLAP parsing ───────────────────────────────────────────────

    #[test]
    fn parse_full_cwlap_record() {
        let ap = parse_access_point(r#"+CWLAP:(3,"HomeNet",-67,"a4:2b:b0:12:34:56",6,12,0)"#)
            .unwrap();
        assert_eq!(ap.ecn, Encryption::Wpa2Psk);
        assert_eq!(ap.ssid.as_str(), "HomeNet");
        assert_eq!(ap.rssi, -67);
        assert_eq!(ap.mac.as_str(), "a4:2b:b0:12:34:56");
        assert_eq!(ap.channel, 6);
    }

    #[test]
    fn parse_legacy_cwlap_record() {
        let ap = parse_access_point(r#"+CWLAP:(0,"cafe",-80)"#).unwrap();
        assert_eq!(ap.ecn, Encryption::Open);
        assert_eq!(ap.ssid.as_str(), "cafe");
        assert!(ap.mac.is_empty());
        assert_eq!(ap.channel, 0);
    }

    #[test]
    fn parse_ssid_with_escaped_comma_and_quote() {
        let ap = parse_access_point(r#"+CWLAP:(4,"a\,b\"c",-50,"00:11:22:33:44:55",11)"#)
            .unwrap();
        assert_eq!(ap.ssid.as_str(), "a,b\"c");
        assert_eq!(ap.ecn, Encryption::WpaWpa2Psk);
        assert_eq!(ap.channel, 11);
    }

    #[test]
    fn parse_rejects_other_lines() {
        assert!(parse_access_point("OK").is_none());
        assert!(parse_access_point("+CWLAP:(x,\"a\",-1)").is_none());
        assert!(parse_access_point("+CWLAP:(3,\"unterminated").is_none());
    }

    #[test]
    fn access_point_serializes_to_json() {
        let ap = parse_access_point(r#"+CWLAP:(3,"HomeNet",-67,"a4:2b:b0:12:34:56",6)"#)
            .unwrap();
        let mut buf = [0u8; 256];
        let len = encode_json(&ap, &mut buf).unwrap();
        let json = core::str::from_utf8(&buf[..len]).unwrap();
        assert!(json.contains(r#""ecn":"wpa2_psk""#));
        assert!(json.contains(r#""ssid":"HomeNet""#));
        assert!(json.contains(r#""rssi":-67"#));
        assert!(json.contains(r#""channel":6"#));
    }

    // ── CIFSR parsing ───────────────────────────────────────────────

    #[test]
    fn parse_labeled_ip_lines() {
        assert_eq!(
            parse_ip_line(r#"+CIFSR:STAIP,"192.168.1.42""#),
            Some((Interface::Station, Ipv4Addr::new(192, 168, 1, 42)))
        );
        assert_eq!(
            parse_ip_line(r#"+CIFSR:APIP,"192.168.4.1""#),
            Some((Interface::AccessPoint, Ipv4Addr::new(192, 168, 4, 1)))
        );
    }

    #[test]
    fn parse_bare_ip_line() {
        assert_eq!(
            parse_ip_line("10.0.0.7"),
            Some((Interface::Unlabeled, Ipv4Addr::new(10, 0, 0, 7)))
        );
        assert!(parse_ip_line(r#"+CIFSR:STAMAC,"5c:cf:7f:00:00:01""#).is_none());
        assert!(parse_ip_line("AT+CIFSR").is_none());
    }

    #[test]
    fn broadcast_replaces_host_octet() {
        assert_eq!(
            broadcast_address(Ipv4Addr::new(192, 168, 1, 42)),
            Ipv4Addr::new(192, 168, 1, 255)
        );
    }

    // ── Beacon ──────────────────────────────────────────────────────

    #[test]
    fn beacon_json_layout() {
        let ip = format_ip(Ipv4Addr::new(192, 168, 1, 42));
        let beacon = Beacon::new(&ip, 8000, "kitchen");
        let mut buf = [0u8; MAX_BEACON_LEN];
        let len = encode_json(&beacon, &mut buf).unwrap();
        let json = core::str::from_utf8(&buf[..len]).unwrap();
        assert_eq!(
            json,
            r#"{"event":"beacon","ip":"192.168.1.42","port":8000,"device":"kitchen"}"#
        );
    }
}
