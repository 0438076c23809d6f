//! Condition language for the remote/local decision.
//!
//! A condition string evaluates to a boolean; `true` routes the call
//! remotely, `false` locally.  Forms (case-sensitive, surrounding
//! whitespace trimmed):
//!
//! - empty string      → true
//! - `booltrue`        → true
//! - `boolfalse`       → false
//! - `timeHHMM-HHMM`   → true iff the local wall-clock time lies inside the
//!   window, inclusive at both ends, correctly spanning midnight when
//!   start > end
//! - `ip<v4-address>`  → true iff this host owns the address on an up,
//!   non-loopback interface (result cached)
//! - any registered custom prefix → that handler's verdict
//! - anything else     → false

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Mutex;

use chrono::Timelike;
use sb_core::net::host_owns_ipv4;
use tracing::debug;

type CustomHandler = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// Evaluates condition strings; user code can register additional prefixes.
#[derive(Default)]
pub struct ConditionEvaluator {
    custom: Mutex<Vec<(String, CustomHandler)>>,
    ip_cache: Mutex<HashMap<Ipv4Addr, bool>>,
}

impl ConditionEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a custom strategy for conditions starting with `prefix`.
    /// The handler receives the remainder after the prefix.
    pub fn register(
        &self,
        prefix: impl Into<String>,
        handler: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) {
        self.custom
            .lock()
            .expect("condition table lock poisoned")
            .push((prefix.into(), Box::new(handler)));
    }

    pub fn evaluate(&self, raw: &str) -> bool {
        let condition = raw.trim();
        if condition.is_empty() {
            return true;
        }
        match condition {
            "booltrue" => return true,
            "boolfalse" => return false,
            _ => {}
        }

        if let Some(window) = condition.strip_prefix("time").and_then(parse_time_window) {
            let now = chrono::Local::now().time();
            return window.contains(minute_of_day(now.hour(), now.minute()));
        }

        if let Some(ip) = condition
            .strip_prefix("ip")
            .and_then(|rest| rest.parse::<Ipv4Addr>().ok())
        {
            return self.cached_ip_check(ip);
        }

        let custom = self.custom.lock().expect("condition table lock poisoned");
        for (prefix, handler) in custom.iter() {
            if let Some(rest) = condition.strip_prefix(prefix.as_str()) {
                return handler(rest);
            }
        }

        debug!(%condition, "unrecognized condition, treating as false");
        false
    }

    fn cached_ip_check(&self, ip: Ipv4Addr) -> bool {
        let mut cache = self.ip_cache.lock().expect("ip cache lock poisoned");
        *cache.entry(ip).or_insert_with(|| host_owns_ipv4(ip))
    }
}

// ---------------------------------------------------------------------------
// Time windows
// ---------------------------------------------------------------------------

/// A daily window in minutes since midnight, inclusive at both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TimeWindow {
    start: u16,
    end: u16,
}

impl TimeWindow {
    fn contains(self, now: u16) -> bool {
        if self.start <= self.end {
            self.start <= now && now <= self.end
        } else {
            // Spans midnight, e.g. 2200-0600.
            now >= self.start || now <= self.end
        }
    }
}

fn minute_of_day(hour: u32, minute: u32) -> u16 {
    (hour * 60 + minute) as u16
}

/// Parse exactly `HHMM-HHMM`; anything else is not a time condition.
fn parse_time_window(spec: &str) -> Option<TimeWindow> {
    let bytes = spec.as_bytes();
    if bytes.len() != 9 || bytes[4] != b'-' {
        return None;
    }
    Some(TimeWindow {
        start: parse_hhmm(&spec[..4])?,
        end: parse_hhmm(&spec[5..])?,
    })
}

fn parse_hhmm(s: &str) -> Option<u16> {
    if s.len() != 4 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hour: u16 = s[..2].parse().ok()?;
    let minute: u16 = s[2..].parse().ok()?;
    if hour > 23 || minute > 59 {
        return None;
    }
    Some(hour * 60 + minute)
}
