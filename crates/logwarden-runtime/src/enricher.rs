use logwarden_types::{GeoInfo, LogEvent, UserAgentInfo};
use lru::LruCache;
use std::net::IpAddr;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

/// Parsed user agents are cached; real traffic repeats a handful of strings.
const UA_CACHE_SIZE: usize = 4096;

/// Reverse DNS gets this long before the field is silently omitted.
const RDNS_TIMEOUT: Duration = Duration::from_millis(100);

/// In-memory IP range → geo table, binary-searched on the range start.
///
/// Loaded from an optional CSV in the data dir with rows
/// `start_ip,end_ip,country,region,city,lat,lon,tz`; absent file means an
/// empty table and no geo enrichment.
pub struct GeoTable {
    /// Sorted by range start, addresses mapped to u128 (v4 in the low bits)
    ranges: Vec<(u128, u128, GeoInfo)>,
}

impl GeoTable {
    pub fn empty() -> Self {
        Self { ranges: Vec::new() }
    }

    pub fn load_csv(path: &Path) -> std::io::Result<Self> {
        let mut ranges = Vec::new();
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(path)?;

        for record in reader.records() {
            let record = match record {
                Ok(r) => r,
                Err(_) => continue,
            };
            let (Some(start), Some(end), Some(country)) =
                (record.get(0), record.get(1), record.get(2))
            else {
                continue;
            };
            let (Ok(start), Ok(end)) = (start.parse::<IpAddr>(), end.parse::<IpAddr>()) else {
                continue;
            };
            let geo = GeoInfo {
                country: country.to_string(),
                region: record.get(3).filter(|s| !s.is_empty()).map(str::to_string),
                city: record.get(4).filter(|s| !s.is_empty()).map(str::to_string),
                lat: record.get(5).and_then(|s| s.parse().ok()),
                lon: record.get(6).and_then(|s| s.parse().ok()),
                tz: record.get(7).filter(|s| !s.is_empty()).map(str::to_string),
            };
            ranges.push((ip_key(start), ip_key(end), geo));
        }

        ranges.sort_by_key(|(start, _, _)| *start);
        Ok(Self { ranges })
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn lookup(&self, ip: IpAddr) -> Option<&GeoInfo> {
        if is_non_routable(ip) {
            return None;
        }
        let key = ip_key(ip);
        let idx = self.ranges.partition_point(|(start, _, _)| *start <= key);
        let (start, end, geo) = self.ranges.get(idx.checked_sub(1)?)?;
        (key >= *start && key <= *end).then_some(geo)
    }
}

fn ip_key(ip: IpAddr) -> u128 {
    match ip {
        IpAddr::V4(v4) => u128::from(u32::from(v4)),
        IpAddr::V6(v6) => u128::from(v6),
    }
}

/// Loopback, RFC 1918 private, link-local, and IPv6 ULA addresses carry no
/// useful geography.
fn is_non_routable(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                || (v6.segments()[0] & 0xfe00) == 0xfc00 // ULA fc00::/7
                || (v6.segments()[0] & 0xffc0) == 0xfe80 // link-local
        }
    }
}

/// Compact token-heuristic user-agent parse.
pub fn parse_user_agent(ua: &str) -> UserAgentInfo {
    let browser = if ua.contains("Edg/") || ua.contains("Edge/") {
        "Edge"
    } else if ua.contains("OPR/") || ua.contains("Opera") {
        "Opera"
    } else if ua.contains("Chrome/") {
        "Chrome"
    } else if ua.contains("Firefox/") {
        "Firefox"
    } else if ua.contains("Safari/") {
        "Safari"
    } else if ua.contains("curl/") {
        "curl"
    } else if ua.contains("python-requests") {
        "python-requests"
    } else {
        "other"
    };

    let os = if ua.contains("Windows") {
        "Windows"
    } else if ua.contains("Android") {
        "Android"
    } else if ua.contains("iPhone") || ua.contains("iPad") || ua.contains("iOS") {
        "iOS"
    } else if ua.contains("Mac OS") || ua.contains("Macintosh") {
        "macOS"
    } else if ua.contains("Linux") {
        "Linux"
    } else {
        "other"
    };

    let device = if ua.contains("iPad") || ua.contains("Tablet") {
        "tablet"
    } else if ua.contains("Mobile") || ua.contains("iPhone") || ua.contains("Android") {
        "mobile"
    } else if browser == "curl" || browser == "python-requests" {
        "bot"
    } else {
        "desktop"
    };

    UserAgentInfo {
        browser: browser.to_string(),
        os: os.to_string(),
        device: device.to_string(),
    }
}

/// Idempotent event augmentation: geo from the peer address, user-agent
/// parsing behind an LRU, optional reverse DNS with a hard timeout.
pub struct Enricher {
    geo: GeoTable,
    ua_cache: Mutex<LruCache<String, UserAgentInfo>>,
    rdns_enabled: bool,
}

impl Enricher {
    pub fn new(geo: GeoTable, rdns_enabled: bool) -> Self {
        Self {
            geo,
            ua_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(UA_CACHE_SIZE).expect("cache size is non-zero"),
            )),
            rdns_enabled,
        }
    }

    pub async fn enrich(&self, event: &mut LogEvent) {
        if event.geo.is_none() {
            if let Some(ip) = event.peer_ip {
                event.geo = self.geo.lookup(ip).cloned();
            }
        }

        if event.user_agent.is_none() {
            let ua_string = event
                .metadata
                .as_ref()
                .and_then(|m| m.get("user_agent").or_else(|| m.get("userAgent")))
                .and_then(|v| v.as_str())
                .map(str::to_string);
            if let Some(ua_string) = ua_string {
                event.user_agent = Some(self.parse_cached(&ua_string));
            }
        }

        if self.rdns_enabled && event.host.is_none() {
            if let Some(ip) = event.peer_ip {
                match tokio::time::timeout(RDNS_TIMEOUT, reverse_lookup(ip)).await {
                    Ok(Some(host)) => event.host = Some(host),
                    // Timeouts and lookup failures fall back silently
                    _ => debug!(%ip, "reverse lookup skipped"),
                }
            }
        }
    }

    fn parse_cached(&self, ua: &str) -> UserAgentInfo {
        let mut cache = self.ua_cache.lock().unwrap();
        if let Some(hit) = cache.get(ua) {
            return hit.clone();
        }
        let parsed = parse_user_agent(ua);
        cache.put(ua.to_string(), parsed.clone());
        parsed
    }
}

#[cfg(unix)]
async fn reverse_lookup(ip: IpAddr) -> Option<String> {
    tokio::task::spawn_blocking(move || reverse_lookup_blocking(ip))
        .await
        .ok()
        .flatten()
}

#[cfg(not(unix))]
async fn reverse_lookup(_ip: IpAddr) -> Option<String> {
    None
}

#[cfg(unix)]
fn reverse_lookup_blocking(ip: IpAddr) -> Option<String> {
    use std::net::SocketAddr;

    let addr = SocketAddr::new(ip, 0);
    let mut host = [0u8; libc::NI_MAXHOST as usize];

    let (storage, len) = sockaddr_storage(addr);
    let rc = unsafe {
        libc::getnameinfo(
            &storage as *const _ as *const libc::sockaddr,
            len,
            host.as_mut_ptr() as *mut libc::c_char,
            host.len() as libc::socklen_t,
            std::ptr::null_mut(),
            0,
            libc::NI_NAMEREQD,
        )
    };
    if rc != 0 {
        return None;
    }
    let end = host.iter().position(|&b| b == 0)?;
    String::from_utf8(host[..end].to_vec()).ok()
}

#[cfg(unix)]
fn sockaddr_storage(addr: std::net::SocketAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
    let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    match addr {
        std::net::SocketAddr::V4(v4) => {
            let sin = libc::sockaddr_in {
                sin_family: libc::AF_INET as libc::sa_family_t,
                sin_port: 0,
                sin_addr: libc::in_addr {
                    s_addr: u32::from_ne_bytes(v4.ip().octets()),
                },
                sin_zero: [0; 8],
            };
            unsafe {
                std::ptr::copy_nonoverlapping(
                    &sin as *const _ as *const u8,
                    &mut storage as *mut _ as *mut u8,
                    std::mem::size_of::<libc::sockaddr_in>(),
                );
            }
            (storage, std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t)
        }
        std::net::SocketAddr::V6(v6) => {
            let sin6 = libc::sockaddr_in6 {
                sin6_family: libc::AF_INET6 as libc::sa_family_t,
                sin6_port: 0,
                sin6_flowinfo: 0,
                sin6_addr: libc::in6_addr {
                    s6_addr: v6.ip().octets(),
                },
                sin6_scope_id: 0,
            };
            unsafe {
                std::ptr::copy_nonoverlapping(
                    &sin6 as *const _ as *const u8,
                    &mut storage as *mut _ as *mut u8,
                    std::mem::size_of::<libc::sockaddr_in6>(),
                );
            }
            (storage, std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use logwarden_types::LogLevel;
    use std::io::Write;

    fn geo_csv() -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "203.0.113.0,203.0.113.255,NL,North Holland,Amsterdam,52.37,4.89,Europe/Amsterdam").unwrap();
        writeln!(f, "198.51.100.0,198.51.100.127,US,,,,,").unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn geo_lookup_hits_range() {
        let f = geo_csv();
        let table = GeoTable::load_csv(f.path()).unwrap();
        assert_eq!(table.len(), 2);

        let geo = table.lookup("203.0.113.9".parse().unwrap()).unwrap();
        assert_eq!(geo.country, "NL");
        assert_eq!(geo.city.as_deref(), Some("Amsterdam"));

        assert!(table.lookup("198.51.100.200".parse().unwrap()).is_none());
    }

    #[test]
    fn private_and_loopback_skipped() {
        let f = geo_csv();
        let table = GeoTable::load_csv(f.path()).unwrap();
        assert!(table.lookup("127.0.0.1".parse().unwrap()).is_none());
        assert!(table.lookup("10.1.2.3".parse().unwrap()).is_none());
        assert!(table.lookup("192.168.1.1".parse().unwrap()).is_none());
        assert!(table.lookup("fc00::1".parse().unwrap()).is_none());
        assert!(table.lookup("fe80::1".parse().unwrap()).is_none());
    }

    #[test]
    fn ua_parse_heuristics() {
        let chrome = parse_user_agent(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
             (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        );
        assert_eq!(chrome.browser, "Chrome");
        assert_eq!(chrome.os, "Windows");
        assert_eq!(chrome.device, "desktop");

        let curl = parse_user_agent("curl/8.4.0");
        assert_eq!(curl.browser, "curl");
        assert_eq!(curl.device, "bot");

        let android = parse_user_agent(
            "Mozilla/5.0 (Linux; Android 14) AppleWebKit/537.36 Chrome/120.0 Mobile Safari/537.36",
        );
        assert_eq!(android.os, "Android");
        assert_eq!(android.device, "mobile");
    }

    #[tokio::test]
    async fn enrich_sets_geo_and_ua() {
        let f = geo_csv();
        let enricher = Enricher::new(GeoTable::load_csv(f.path()).unwrap(), false);

        let now = Utc::now();
        let mut event = LogEvent::new(now, now, LogLevel::Info, "s", "http", "m");
        event.peer_ip = Some("203.0.113.9".parse().unwrap());
        event.metadata = Some(serde_json::json!({"user_agent": "curl/8.4.0"}));

        enricher.enrich(&mut event).await;
        assert_eq!(event.geo.as_ref().unwrap().country, "NL");
        assert_eq!(event.user_agent.as_ref().unwrap().browser, "curl");
    }

    #[tokio::test]
    async fn enrich_is_idempotent() {
        let f = geo_csv();
        let enricher = Enricher::new(GeoTable::load_csv(f.path()).unwrap(), false);

        let now = Utc::now();
        let mut event = LogEvent::new(now, now, LogLevel::Info, "s", "http", "m");
        event.peer_ip = Some("203.0.113.9".parse().unwrap());
        enricher.enrich(&mut event).await;
        let first = event.clone();
        enricher.enrich(&mut event).await;
        assert_eq!(event.geo, first.geo);
    }
}
