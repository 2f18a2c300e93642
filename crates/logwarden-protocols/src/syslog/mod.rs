//! Syslog decoding: RFC 3164 and RFC 5424, auto-detected per message.
//!
//! UDP carries one message per datagram; TCP uses RFC 6587 octet-count
//! framing with an LF-terminated fallback (see [`framing`]).

mod framing;
mod parser;

pub use framing::SyslogTcpFramer;

use chrono::{DateTime, Utc};

use crate::{normalize::EventDraft, Error, Result};

/// Facility keywords per RFC 5424 table 1.
pub(crate) fn facility_name(facility: u8) -> &'static str {
    match facility {
        0 => "kern",
        1 => "user",
        2 => "mail",
        3 => "daemon",
        4 => "auth",
        5 => "syslog",
        6 => "lpr",
        7 => "news",
        8 => "uucp",
        9 => "cron",
        10 => "authpriv",
        11 => "ftp",
        12 => "ntp",
        13 => "security",
        14 => "console",
        15 => "solaris-cron",
        16 => "local0",
        17 => "local1",
        18 => "local2",
        19 => "local3",
        20 => "local4",
        21 => "local5",
        22 => "local6",
        23 => "local7",
        _ => "unknown",
    }
}

/// Decode one syslog message.
///
/// `reference` is the frame arrival instant, needed because RFC 3164
/// timestamps carry no year.
pub fn decode(payload: &[u8], reference: DateTime<Utc>) -> Result<Vec<EventDraft>> {
    let text = std::str::from_utf8(payload)?.trim_end_matches(['\r', '\n']);
    if text.is_empty() {
        return Err(Error::malformed("empty", "empty syslog message"));
    }

    let (pri, rest) = parser::split_pri(text)?;

    // RFC 5424 messages start with VERSION "1" right after the PRI
    let draft = if rest.starts_with("1 ") {
        parser::parse_rfc5424(pri, &rest[2..])?
    } else {
        parser::parse_rfc3164(pri, rest, reference)?
    };

    Ok(vec![draft])
}

#[cfg(test)]
mod tests {
    use super::*;
    use logwarden_types::{LogLevel, Protocol, RawFrame};

    fn to_event(payload: &str) -> logwarden_types::LogEvent {
        let frame = RawFrame::new(
            Protocol::SyslogUdp,
            payload.as_bytes().to_vec(),
            Some("198.51.100.4:514".parse().unwrap()),
        );
        let drafts = decode(&frame.payload, frame.received_at).unwrap();
        assert_eq!(drafts.len(), 1);
        drafts.into_iter().next().unwrap().into_event(&frame)
    }

    #[test]
    fn rfc3164_su_example() {
        // Classic example from RFC 3164 §5.4
        let event =
            to_event("<34>Oct 11 22:14:15 mymachine su: 'su root' failed for lonvick on /dev/pts/8");
        assert_eq!(event.level, LogLevel::Critical); // severity 2
        assert_eq!(event.source, "mymachine");
        assert_eq!(event.category, "auth"); // facility 4
        assert!(event.message.contains("'su root' failed"));
        assert_eq!(event.host.as_deref(), Some("mymachine"));
    }

    #[test]
    fn rfc5424_with_structured_data() {
        let event = to_event(
            "<165>1 2003-10-11T22:14:15.003Z mymachine.example.com evntslog 1234 ID47 \
             [exampleSDID@32473 iut=\"3\" eventSource=\"Application\"] An application event",
        );
        assert_eq!(event.level, LogLevel::Info); // severity 5 (notice)
        assert_eq!(event.category, "local4"); // facility 20
        assert_eq!(event.host.as_deref(), Some("mymachine.example.com"));
        assert_eq!(event.message, "An application event");
        let meta = event.metadata.unwrap();
        assert_eq!(meta["app_name"], "evntslog");
        assert_eq!(meta["proc_id"], "1234");
        assert!(meta["structured_data"].as_str().unwrap().contains("iut=\"3\""));
    }

    #[test]
    fn rfc5424_nil_fields() {
        let event = to_event("<13>1 2021-01-01T00:00:00Z - - - - - hello");
        assert_eq!(event.message, "hello");
        assert!(event.host.is_none());
    }

    #[test]
    fn missing_pri_is_malformed() {
        let err = decode(b"no pri here", Utc::now()).unwrap_err();
        assert_eq!(err.reason(), "missing_pri");
    }

    #[test]
    fn pri_out_of_range_is_malformed() {
        let err = decode(b"<999>1 2021-01-01T00:00:00Z - - - - - x", Utc::now()).unwrap_err();
        assert_eq!(err.reason(), "bad_pri");
    }
}
