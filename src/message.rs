use crate::error::Error;
use crate::location::{LocationDescriptor, UrlLocation};
use crate::netif::InterfaceInfo;
use crate::node::Config;
use std::fmt;
use std::sync::Arc;

/// Advertised validity of publisher-constructed messages; announcements
/// always go out with the node's configured TTL instead.
const UNBOUNDED: u32 = u32::MAX;

pub(crate) const SERVER_NAME: &str = concat!(
    "rust UPnP/1.0 ",
    env!("CARGO_PKG_NAME"),
    "/",
    env!("CARGO_PKG_VERSION")
);

/// Which wire form to compose for a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SendKind {
    Alive,
    ByeBye,
    Search,
    Reply,
}

/// One SSDP message, semantically: a device identity plus its location
///
/// The same record backs all four wire forms. A *search* is incomplete
/// (uuid and/or urn act as a filter, location is absent); *alive* and
/// *response* messages carry everything; a *byebye* has no location.
///
/// A message is publishable if and only if uuid, urn and location are all
/// present.
#[derive(Clone)]
pub struct SsdpMessage {
    uuid: Option<String>,
    urn: Option<String>,
    location: Option<Arc<dyn LocationDescriptor>>,
    ttl: u32,
}

impl fmt::Debug for SsdpMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SsdpMessage[uuid={:?}, urn={:?}, location={:?}]",
            self.uuid,
            self.urn,
            self.location.as_ref().map(|l| l.name())
        )
    }
}

impl SsdpMessage {
    /// A publishable message for a specific device
    pub fn new(
        uuid: impl Into<String>,
        urn: impl Into<String>,
        location: Arc<dyn LocationDescriptor>,
    ) -> Self {
        Self {
            uuid: Some(uuid.into()),
            urn: Some(urn.into()),
            location: Some(location),
            ttl: UNBOUNDED,
        }
    }

    /// The wildcard matcher; searches as `ssdp:all` and matches anything
    #[must_use]
    pub fn all() -> Self {
        Self {
            uuid: None,
            urn: None,
            location: None,
            ttl: UNBOUNDED,
        }
    }

    /// A matcher for one device type
    pub fn search_urn(urn: impl Into<String>) -> Self {
        Self {
            urn: Some(urn.into()),
            ..Self::all()
        }
    }

    /// A matcher for one device instance
    pub fn search_uuid(uuid: impl Into<String>) -> Self {
        Self {
            uuid: Some(uuid.into()),
            ..Self::all()
        }
    }

    /// The device identifier, if any
    #[must_use]
    pub fn uuid(&self) -> Option<&str> {
        self.uuid.as_deref()
    }

    /// The device or service type, if any
    #[must_use]
    pub fn urn(&self) -> Option<&str> {
        self.urn.as_deref()
    }

    /// The location descriptor, if any
    #[must_use]
    pub fn location(&self) -> Option<&Arc<dyn LocationDescriptor>> {
        self.location.as_ref()
    }

    /// Validity in seconds: MX for parsed searches, max-age for parsed
    /// alive/response messages
    #[must_use]
    pub fn ttl(&self) -> u32 {
        self.ttl
    }

    /// Can this message be published (uuid, urn and location all set)?
    #[must_use]
    pub fn is_publishable(&self) -> bool {
        self.uuid.is_some() && self.urn.is_some() && self.location.is_some()
    }

    /// Does this message satisfy the given search filter?
    ///
    /// True iff each of the filter's uuid and urn is either unset or
    /// equal to this message's. The [`SsdpMessage::all`] filter matches
    /// everything.
    #[must_use]
    pub fn matches(&self, query: &SsdpMessage) -> bool {
        if let Some(uuid) = query.uuid.as_deref() {
            if self.uuid.as_deref() != Some(uuid) {
                return false;
            }
        }
        if let Some(urn) = query.urn.as_deref() {
            if self.urn.as_deref() != Some(urn) {
                return false;
            }
        }
        true
    }

    /// Parse an SSDP header block
    ///
    /// Header names are case-insensitive; unknown headers are skipped;
    /// a malformed MX or max-age is silently ignored. Returns `None` when
    /// the headers resolve to no meaningful message.
    #[must_use]
    pub fn parse(text: &str) -> Option<SsdpMessage> {
        let mut uuid: Option<String> = None;
        let mut urn: Option<String> = None;
        let mut location: Option<String> = None;
        let mut mx: Option<i64> = None;
        let mut max_age: Option<i64> = None;
        let mut st: Option<String> = None;

        for line in text.lines() {
            let Some((tag, value)) = line.split_once(':') else {
                continue;
            };
            if tag.is_empty() {
                continue;
            }
            let value = value.trim();
            match tag.to_ascii_lowercase().as_str() {
                "location" => location = Some(value.to_string()),
                "usn" => {
                    if let Some(rest) = value.strip_prefix("uuid:") {
                        match rest.find("::") {
                            Some(p) if p > 0 => {
                                uuid = Some(rest[..p].to_string());
                                urn = Some(rest[p + 2..].to_string());
                            }
                            _ => {
                                if rest.len() == 36 {
                                    uuid = Some(rest.to_string());
                                }
                            }
                        }
                    }
                }
                "mx" => mx = value.parse().ok(),
                "cache-control" => {
                    // lenient: skip "max-age=" positionally, as the
                    // header is the only cache directive SSDP uses
                    max_age =
                        value.get("max-age=".len()..).and_then(|v| v.parse().ok());
                }
                "st" => st = Some(value.to_string()),
                _ => {}
            }
        }

        if uuid.is_some() && (location.is_some() || max_age.is_none()) {
            let ttl = match mx {
                Some(m) if m > 0 => m,
                _ => max_age.unwrap_or(-1),
            };
            return Some(SsdpMessage {
                uuid,
                urn,
                location: location.map(|l| {
                    Arc::new(UrlLocation::remote(l)) as Arc<dyn LocationDescriptor>
                }),
                ttl: ttl.try_into().unwrap_or(0),
            });
        }
        if st.as_deref() == Some("ssdp:all") {
            return Some(SsdpMessage {
                uuid,
                urn,
                location: None,
                ttl: mx.unwrap_or(-1).try_into().unwrap_or(0),
            });
        }
        match (st, mx) {
            (Some(target), Some(m)) if m > 0 => Some(SsdpMessage {
                uuid: None,
                urn: Some(target),
                location: None,
                ttl: m.try_into().unwrap_or(0),
            }),
            _ => None,
        }
    }

    pub(crate) fn compose(
        &self,
        kind: SendKind,
        config: &Config,
        iface: &InterfaceInfo,
    ) -> Result<String, Error> {
        match kind {
            SendKind::Alive => self.alive_message(config, iface),
            SendKind::ByeBye => self.byebye_message(config),
            SendKind::Search => Ok(self.search_message(config)),
            SendKind::Reply => self.response_message(config, iface),
        }
    }

    /// The M-SEARCH form of this message, used as a search filter
    pub(crate) fn search_message(&self, config: &Config) -> String {
        let target = if let Some(uuid) = &self.uuid {
            format!("uuid:{uuid}")
        } else if let Some(urn) = &self.urn {
            urn.clone()
        } else {
            "ssdp:all".to_string()
        };
        format!(
            "M-SEARCH * HTTP/1.1\r\n\
             HOST: {}\r\n\
             MAN: \"ssdp:discover\"\r\n\
             MX: {}\r\n\
             ST: {}\r\n",
            config.host(),
            config.mx,
            target,
        )
    }

    /// The NOTIFY ssdp:alive form, with LOCATION resolved per interface
    pub(crate) fn alive_message(
        &self,
        config: &Config,
        iface: &InterfaceInfo,
    ) -> Result<String, Error> {
        let (uuid, urn, location) = self.publishable_parts()?;
        Ok(format!(
            "NOTIFY * HTTP/1.1\r\n\
             HOST: {}\r\n\
             SERVER: {}\r\n\
             CACHE-CONTROL: max-age={}\r\n\
             LOCATION: {}\r\n\
             NT: {}\r\n\
             NTS: ssdp:alive\r\n\
             USN: uuid:{}::{}\r\n",
            config.host(),
            SERVER_NAME,
            config.ttl,
            location.location(config.http_port, iface)?,
            urn,
            uuid,
            urn,
        ))
    }

    /// The unicast reply to an M-SEARCH
    ///
    /// Status line and headers are kept exactly as deployed peers expect
    /// them, including the `*` status and the NT header.
    pub(crate) fn response_message(
        &self,
        config: &Config,
        iface: &InterfaceInfo,
    ) -> Result<String, Error> {
        let (uuid, urn, location) = self.publishable_parts()?;
        Ok(format!(
            "HTTP/1.1 * OK\r\n\
             EXT:\r\n\
             SERVER: {}\r\n\
             CACHE-CONTROL: max-age={}\r\n\
             DATE: {}\r\n\
             LOCATION: {}\r\n\
             NT: {}\r\n\
             NTS: ssdp:alive\r\n\
             USN: uuid:{}::{}\r\n",
            SERVER_NAME,
            config.ttl,
            rfc1123_now(),
            location.location(config.http_port, iface)?,
            urn,
            uuid,
            urn,
        ))
    }

    /// The NOTIFY ssdp:byebye form
    pub(crate) fn byebye_message(&self, config: &Config) -> Result<String, Error> {
        let (uuid, urn, _) = self.publishable_parts()?;
        Ok(format!(
            "NOTIFY * HTTP/1.1\r\n\
             HOST: {}\r\n\
             NT: {}\r\n\
             NTS: ssdp:byebye\r\n\
             USN: uuid:{}::{}\r\n",
            config.host(),
            urn,
            uuid,
            urn,
        ))
    }

    fn publishable_parts(
        &self,
    ) -> Result<(&str, &str, &Arc<dyn LocationDescriptor>), Error> {
        match (&self.uuid, &self.urn, &self.location) {
            (Some(uuid), Some(urn), Some(location)) => {
                Ok((uuid, urn, location))
            }
            _ => Err(Error::NotPublishable),
        }
    }
}

fn rfc1123_now() -> String {
    chrono::Utc::now()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::ConstantLocation;

    const UUID: &str = "e53a3f9c-ba31-47f2-8ee4-26e520d30f38";
    const URN: &str = "urn:schemas-upnp-org:device:test:1";

    fn config() -> Config {
        Config {
            http_port: Some(49999),
            ..Config::default()
        }
    }

    fn iface() -> InterfaceInfo {
        InterfaceInfo::new("192.168.100.1".parse().unwrap(), 24)
    }

    fn device() -> SsdpMessage {
        SsdpMessage::new(
            UUID,
            URN,
            Arc::new(ConstantLocation::new("description.xml", "<xml/>")),
        )
    }

    /* ==== parsing ==== */

    #[test]
    fn parses_alive() {
        let m = SsdpMessage::parse(
            "NOTIFY * HTTP/1.1\r\n\
             HOST: 239.255.255.250:1900\r\n\
             CACHE-CONTROL: max-age=300\r\n\
             LOCATION: http://192.168.100.1:49999/description.xml\r\n\
             NT: urn:schemas-upnp-org:device:test:1\r\n\
             NTS: ssdp:alive\r\n\
             USN: uuid:e53a3f9c-ba31-47f2-8ee4-26e520d30f38::urn:schemas-upnp-org:device:test:1\r\n\
             \r\n",
        )
        .unwrap();
        assert_eq!(m.uuid(), Some(UUID));
        assert_eq!(m.urn(), Some(URN));
        assert_eq!(m.ttl(), 300);
        assert_eq!(m.location().unwrap().name(), "description.xml");
    }

    #[test]
    fn parses_byebye_without_location() {
        let m = SsdpMessage::parse(
            "NOTIFY * HTTP/1.1\r\n\
             HOST: 239.255.255.250:1900\r\n\
             NT: urn:x:1\r\n\
             NTS: ssdp:byebye\r\n\
             USN: uuid:e53a3f9c-ba31-47f2-8ee4-26e520d30f38::urn:x:1\r\n\
             \r\n",
        )
        .unwrap();
        assert_eq!(m.uuid(), Some(UUID));
        assert_eq!(m.urn(), Some("urn:x:1"));
        assert!(m.location().is_none());
    }

    #[test]
    fn parses_bare_uuid_usn() {
        let m = SsdpMessage::parse(&format!(
            "NOTIFY * HTTP/1.1\r\nUSN: uuid:{UUID}\r\nLOCATION: http://x/\r\n\r\n"
        ))
        .unwrap();
        assert_eq!(m.uuid(), Some(UUID));
        assert_eq!(m.urn(), None);
    }

    #[test]
    fn ignores_short_non_uuid_usn() {
        // no "::", not 36 chars: USN yields nothing, and with max-age
        // present the message resolves to no form at all
        assert!(SsdpMessage::parse(
            "NOTIFY * HTTP/1.1\r\nUSN: uuid:37\r\nCACHE-CONTROL: max-age=5\r\n\r\n"
        )
        .is_none());
    }

    #[test]
    fn rejects_notify_without_usn() {
        assert!(SsdpMessage::parse(
            "NOTIFY * HTTP/1.1\r\nHOST: x\r\n\r\n"
        )
        .is_none());
    }

    #[test]
    fn parses_targeted_search() {
        let m = SsdpMessage::parse(
            "M-SEARCH * HTTP/1.1\r\n\
             HOST: 239.255.255.250:1900\r\n\
             MAN: \"ssdp:discover\"\r\n\
             MX: 2\r\n\
             ST: urn:schemas-upnp-org:device:test:1\r\n\
             \r\n",
        )
        .unwrap();
        assert_eq!(m.uuid(), None);
        assert_eq!(m.urn(), Some(URN));
        assert_eq!(m.ttl(), 2);
    }

    #[test]
    fn parses_search_all() {
        let m = SsdpMessage::parse(
            "M-SEARCH * HTTP/1.1\r\nMX: 3\r\nST: ssdp:all\r\n\r\n",
        )
        .unwrap();
        assert_eq!(m.uuid(), None);
        assert_eq!(m.urn(), None);
        assert_eq!(m.ttl(), 3);
    }

    #[test]
    fn search_all_survives_missing_mx() {
        let m =
            SsdpMessage::parse("M-SEARCH * HTTP/1.1\r\nST: ssdp:all\r\n\r\n")
                .unwrap();
        assert_eq!(m.ttl(), 0);
    }

    #[test]
    fn rejects_targeted_search_without_mx() {
        assert!(SsdpMessage::parse(
            "M-SEARCH * HTTP/1.1\r\nST: urn:x:1\r\n\r\n"
        )
        .is_none());
        assert!(SsdpMessage::parse(
            "M-SEARCH * HTTP/1.1\r\nST: urn:x:1\r\nMX: fnord\r\n\r\n"
        )
        .is_none());
    }

    #[test]
    fn header_names_are_case_insensitive() {
        let m = SsdpMessage::parse(
            "M-SEARCH * HTTP/1.1\r\nst: ssdp:all\r\nmx: 4\r\n\r\n",
        )
        .unwrap();
        assert_eq!(m.ttl(), 4);
    }

    #[test]
    fn lenient_max_age() {
        let m = SsdpMessage::parse(&format!(
            "HTTP/1.1 200 OK\r\nUSN: uuid:{UUID}::urn:x:1\r\nCACHE-CONTROL: max-age=1800\r\nLOCATION: http://x/\r\n\r\n"
        ))
        .unwrap();
        assert_eq!(m.ttl(), 1800);

        // unparseable max-age is ignored, not fatal
        let m = SsdpMessage::parse(&format!(
            "HTTP/1.1 200 OK\r\nUSN: uuid:{UUID}::urn:x:1\r\nCACHE-CONTROL: no-cache\r\nLOCATION: http://x/\r\n\r\n"
        ))
        .unwrap();
        assert_eq!(m.uuid(), Some(UUID));
    }

    /* ==== matching ==== */

    #[test]
    fn all_matches_anything() {
        assert!(device().matches(&SsdpMessage::all()));
        assert!(SsdpMessage::all().matches(&SsdpMessage::all()));
        assert!(SsdpMessage::search_urn("urn:x:1").matches(&SsdpMessage::all()));
    }

    #[test]
    fn urn_filter() {
        assert!(device().matches(&SsdpMessage::search_urn(URN)));
        assert!(!device().matches(&SsdpMessage::search_urn("urn:other:1")));
        assert!(!SsdpMessage::all().matches(&SsdpMessage::search_urn(URN)));
    }

    #[test]
    fn uuid_filter() {
        assert!(device().matches(&SsdpMessage::search_uuid(UUID)));
        assert!(!device().matches(&SsdpMessage::search_uuid("mismatch")));
    }

    #[test]
    fn combined_filter_needs_both() {
        let mut q = SsdpMessage::search_uuid(UUID);
        q.urn = Some(URN.to_string());
        assert!(device().matches(&q));
        q.urn = Some("urn:other:1".to_string());
        assert!(!device().matches(&q));
    }

    /* ==== composition ==== */

    #[test]
    fn builds_search() {
        assert_eq!(
            SsdpMessage::search_urn(URN).search_message(&config()),
            format!(
                "M-SEARCH * HTTP/1.1\r\n\
                 HOST: 239.255.255.250:1900\r\n\
                 MAN: \"ssdp:discover\"\r\n\
                 MX: 5\r\n\
                 ST: {URN}\r\n"
            )
        );
        assert_eq!(
            SsdpMessage::search_uuid(UUID)
                .search_message(&config())
                .lines()
                .last(),
            Some(format!("ST: uuid:{UUID}").as_str())
        );
        assert_eq!(
            SsdpMessage::all().search_message(&config()).lines().last(),
            Some("ST: ssdp:all")
        );
    }

    #[test]
    fn builds_alive() {
        assert_eq!(
            device().alive_message(&config(), &iface()).unwrap(),
            format!(
                "NOTIFY * HTTP/1.1\r\n\
                 HOST: 239.255.255.250:1900\r\n\
                 SERVER: {SERVER_NAME}\r\n\
                 CACHE-CONTROL: max-age=300\r\n\
                 LOCATION: http://192.168.100.1:49999/description.xml\r\n\
                 NT: {URN}\r\n\
                 NTS: ssdp:alive\r\n\
                 USN: uuid:{UUID}::{URN}\r\n"
            )
        );
    }

    #[test]
    fn builds_byebye() {
        assert_eq!(
            device().byebye_message(&config()).unwrap(),
            format!(
                "NOTIFY * HTTP/1.1\r\n\
                 HOST: 239.255.255.250:1900\r\n\
                 NT: {URN}\r\n\
                 NTS: ssdp:byebye\r\n\
                 USN: uuid:{UUID}::{URN}\r\n"
            )
        );
    }

    #[test]
    fn builds_response() {
        let text = device().response_message(&config(), &iface()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "HTTP/1.1 * OK");
        assert_eq!(lines[1], "EXT:");
        assert_eq!(lines[2], format!("SERVER: {SERVER_NAME}"));
        assert_eq!(lines[3], "CACHE-CONTROL: max-age=300");
        assert!(lines[4].starts_with("DATE: "));
        assert!(lines[4].ends_with(" GMT"));
        assert_eq!(
            lines[5],
            "LOCATION: http://192.168.100.1:49999/description.xml"
        );
        assert_eq!(lines[6], format!("NT: {URN}"));
        assert_eq!(lines[7], "NTS: ssdp:alive");
        assert_eq!(lines[8], format!("USN: uuid:{UUID}::{URN}"));
    }

    #[test]
    fn incomplete_message_has_no_alive_form() {
        assert!(matches!(
            SsdpMessage::search_urn(URN).alive_message(&config(), &iface()),
            Err(Error::NotPublishable)
        ));
    }

    /* ==== round trips ==== */

    #[test]
    fn alive_round_trip() {
        let text = device().alive_message(&config(), &iface()).unwrap();
        let m = SsdpMessage::parse(&text).unwrap();
        assert_eq!(m.uuid(), Some(UUID));
        assert_eq!(m.urn(), Some(URN));
        assert_eq!(
            m.location().unwrap().location(None, &iface()).unwrap(),
            "http://192.168.100.1:49999/description.xml"
        );
        assert_eq!(m.ttl(), 300);
    }

    #[test]
    fn response_round_trip() {
        let text = device().response_message(&config(), &iface()).unwrap();
        let m = SsdpMessage::parse(&text).unwrap();
        assert_eq!(m.uuid(), Some(UUID));
        assert_eq!(m.urn(), Some(URN));
        assert_eq!(
            m.location().unwrap().location(None, &iface()).unwrap(),
            "http://192.168.100.1:49999/description.xml"
        );
    }

    #[test]
    fn byebye_round_trip() {
        let text = device().byebye_message(&config()).unwrap();
        let m = SsdpMessage::parse(&text).unwrap();
        assert_eq!(m.uuid(), Some(UUID));
        assert_eq!(m.urn(), Some(URN));
        assert!(m.location().is_none());
    }

    #[test]
    fn search_round_trip() {
        let text = SsdpMessage::search_urn(URN).search_message(&config());
        let m = SsdpMessage::parse(&text).unwrap();
        assert_eq!(m.urn(), Some(URN));
        assert_eq!(m.ttl(), 5);
    }
}
